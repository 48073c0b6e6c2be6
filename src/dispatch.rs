// Dispatcher - runs tool calls from Comm against the Executor

use crate::comm::{ToolRequest, ToolResponse};
use crate::executor::Executor;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Fans incoming tool calls out to independent tasks
pub struct Dispatcher {
    executor: Arc<Executor>,
    tasks: JoinSet<()>,
}

impl Dispatcher {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self {
            executor,
            tasks: JoinSet::new(),
        }
    }

    /// Start handling a tool call; the result is sent on the request's reply channel
    pub fn dispatch(&mut self, req: ToolRequest) {
        // Reap finished calls so the set does not grow without bound
        while self.tasks.try_join_next().is_some() {}

        let executor = Arc::clone(&self.executor);
        self.tasks.spawn(async move {
            handle_tool_request(&executor, req).await;
        });
    }

    /// Abort running calls; dropping their futures kills any spawned process groups
    pub async fn shutdown(mut self) {
        let running = self.tasks.len();
        if running > 0 {
            info!(running, "Aborting in-flight tool calls");
        }
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
    }
}

/// Run one tool call and reply to Comm
pub async fn handle_tool_request(executor: &Executor, req: ToolRequest) {
    info!(addr = %req.source_addr, tool = %req.tool, "Handling tool call");

    let output = executor.call(&req.tool, req.arguments).await;
    debug!(
        tool = %req.tool,
        is_error = output.is_error,
        bytes = output.content.len(),
        "Tool call finished"
    );

    let response = if output.is_error {
        ToolResponse::error(output.content)
    } else {
        ToolResponse::new(output.content)
    };

    if req.reply.send(response).is_err() {
        warn!(tool = %req.tool, "Failed to send response to client");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorConfig;
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::sync::oneshot;

    fn request(tool: &str, arguments: serde_json::Value) -> (ToolRequest, oneshot::Receiver<ToolResponse>) {
        let (reply, rx) = oneshot::channel();
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        (
            ToolRequest {
                tool: tool.to_string(),
                arguments,
                reply,
                source_addr: addr,
            },
            rx,
        )
    }

    fn executor(dir: &tempfile::TempDir) -> Arc<Executor> {
        let config = ExecutorConfig {
            base_dir: dir.path().to_path_buf(),
            ..ExecutorConfig::default()
        };
        Arc::new(Executor::new(config))
    }

    #[tokio::test]
    async fn test_unknown_tool_replies_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let (req, rx) = request("nope", json!({}));

        handle_tool_request(&executor(&dir), req).await;

        let response = rx.await.unwrap();
        assert!(response.is_error);
        assert!(response.content.contains("nope"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_calls_run_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = Dispatcher::new(executor(&dir));

        let (slow, slow_rx) = request("run_command", json!({"command": "sleep 5", "timeout": 10}));
        let (fast, fast_rx) = request("run_command", json!({"command": "echo quick"}));
        dispatcher.dispatch(slow);
        dispatcher.dispatch(fast);

        let fast = tokio::time::timeout(std::time::Duration::from_secs(3), fast_rx)
            .await
            .expect("fast call blocked behind slow call")
            .unwrap();
        assert!(!fast.is_error);
        assert!(fast.content.contains("quick"));

        dispatcher.shutdown().await;
        // Aborted call drops its reply sender
        assert!(slow_rx.await.is_err());
    }
}
