// Deadline race between a child process and its timeout

use crate::executor::process::{ProcessGroup, terminate_tree};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, info, warn};

/// How a supervised process finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Exited on its own before the deadline
    Exited(ExitStatus),
    /// Deadline expired; the whole process group was terminated
    TimedOut,
}

/// Races process exit against an optional deadline
#[derive(Debug, Clone, Copy)]
pub struct TimeoutSupervisor {
    timeout: Option<Duration>,
    grace: Duration,
}

impl TimeoutSupervisor {
    /// A zero or absent `timeout` disables the race
    pub fn new(timeout: Option<Duration>, grace: Duration) -> Self {
        Self {
            timeout: timeout.filter(|t| !t.is_zero()),
            grace,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Wait for `child` to exit, terminating its group if the deadline passes first.
    ///
    /// The pending timer is dropped as soon as the child exits. If waiting
    /// itself fails the group is killed before the error is returned.
    pub async fn supervise(
        &self,
        child: &mut Child,
        group: &ProcessGroup,
    ) -> std::io::Result<Completion> {
        let waited = match self.timeout {
            None => Some(child.wait().await),
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
        };

        match waited {
            Some(Ok(status)) => {
                debug!(pid = group.id(), status = %status, "process exited");
                Ok(Completion::Exited(status))
            }
            Some(Err(e)) => {
                warn!(pid = group.id(), error = %e, "wait failed, killing process group");
                group.kill();
                let _ = child.start_kill();
                Err(e)
            }
            None => {
                info!(
                    pid = group.id(),
                    timeout_ms = self.timeout.map(|t| t.as_millis() as u64),
                    "deadline reached, terminating process group"
                );
                let status = terminate_tree(child, group, self.grace).await?;
                debug!(pid = group.id(), status = %status, "timed out process reaped");
                Ok(Completion::TimedOut)
            }
        }
    }
}
