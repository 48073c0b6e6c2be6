// Process group handles and process tree termination

use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, warn};

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;

/// Handle to the process group led by a spawned child.
///
/// On Unix the child must have been spawned with `process_group(0)`, making
/// its pid the group id. Elsewhere only the child itself can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    /// Capture the group id right after spawning, before the leader is reaped
    pub fn of(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    pub fn id(&self) -> Option<u32> {
        self.pgid
    }

    /// Ask every member of the group to exit. Returns false if nothing was signalled.
    pub fn terminate(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal(Signal::SIGTERM)
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    /// Kill every remaining member of the group. Returns false if nothing was signalled.
    pub fn kill(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal(Signal::SIGKILL)
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    #[cfg(unix)]
    fn signal(&self, signal: Signal) -> bool {
        let Some(pgid) = self.pgid else {
            return false;
        };

        match killpg(Pid::from_raw(pgid as i32), signal) {
            Ok(()) => {
                debug!(pgid, signal = %signal, "signalled process group");
                true
            }
            // Group already empty
            Err(Errno::ESRCH) => false,
            Err(e) => {
                warn!(pgid, signal = %signal, error = %e, "killpg failed");
                false
            }
        }
    }
}

/// Terminate the whole process tree led by `child` and reap the leader.
///
/// The group gets SIGTERM, the leader gets `grace` to exit, then the group
/// gets SIGKILL whether or not the leader complied, so descendants that
/// ignore SIGTERM are reclaimed too.
pub async fn terminate_tree(
    child: &mut Child,
    group: &ProcessGroup,
    grace: Duration,
) -> std::io::Result<ExitStatus> {
    if group.terminate() {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => {
                group.kill();
                return status;
            }
            Err(_) => warn!(
                pgid = group.id(),
                grace_ms = grace.as_millis() as u64,
                "process group still alive after SIGTERM, killing"
            ),
        }
    }

    group.kill();
    if let Err(e) = child.start_kill() {
        // Already reaped
        debug!(error = %e, "start_kill on leader");
    }
    child.wait().await
}

/// Owns a spawned child and kills its whole process group when dropped.
///
/// Dropping covers every early exit of an invocation: errors, caller
/// cancellation and normal completion alike.
pub struct ProcessGuard {
    child: Child,
    group: ProcessGroup,
}

impl ProcessGuard {
    pub fn new(child: Child) -> Self {
        let group = ProcessGroup::of(&child);
        Self { child, group }
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    pub fn group(&self) -> ProcessGroup {
        self.group
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!(
                pid = self.group.id(),
                "dropping process guard with live process, killing group"
            );
        }
        self.group.kill();
        let _ = self.child.start_kill();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Instant;
    use tokio::process::Command;

    fn spawn_in_group(script: &str) -> Child {
        Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_terminate_tree_stops_sleeping_leader() {
        let mut child = spawn_in_group("sleep 30");
        let group = ProcessGroup::of(&child);

        let start = Instant::now();
        let status = terminate_tree(&mut child, &group, Duration::from_secs(2))
            .await
            .unwrap();

        assert!(!status.success());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_terminate_tree_escalates_past_ignored_sigterm() {
        let mut child = spawn_in_group("trap '' TERM; while true; do sleep 1; done");
        let group = ProcessGroup::of(&child);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let start = Instant::now();
        let status = terminate_tree(&mut child, &group, Duration::from_millis(300))
            .await
            .unwrap();

        assert!(!status.success());
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    /// Alive means present in /proc and not a zombie
    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_guard_kills_group_on_drop() {
        let child = spawn_in_group("sleep 30");
        let guard = ProcessGuard::new(child);
        let pid = guard.group().id().unwrap();
        assert!(is_running(pid));

        drop(guard);

        let deadline = Instant::now() + Duration::from_secs(2);
        while is_running(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!is_running(pid), "leader should be gone after drop");
    }
}
