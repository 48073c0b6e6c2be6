mod comm;
mod dispatch;
mod env;
mod executor;

use comm::{Comm, CommConfig};
use dispatch::Dispatcher;
use executor::{Executor, ExecutorConfig};
use std::str::FromStr;
use std::sync::Arc;
use tokio::signal;
use tracing::{Level, error, info, warn};
use tracing_subscriber::fmt;

fn log_level() -> Level {
    match env::env_string("FILE_SERVER_LOG") {
        Some(value) => Level::from_str(value.trim()).unwrap_or_else(|_| {
            eprintln!("[warning] Invalid FILE_SERVER_LOG value {value:?}, using debug");
            Level::DEBUG
        }),
        None => Level::DEBUG,
    }
}

/// Tokio runtime with signal handling
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays free for tooling
    fmt()
        .with_max_level(log_level())
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting file server...");

    let comm_config = CommConfig::from_env();
    let executor_config = ExecutorConfig::from_env();

    info!(
        comm_port = comm_config.listen_port,
        base_dir = %executor_config.base_dir.display(),
        max_lines = executor_config.max_lines,
        default_timeout_secs = executor_config.default_timeout.as_secs(),
        "Configuration loaded"
    );

    if !executor_config.base_dir.is_dir() {
        warn!(
            base_dir = %executor_config.base_dir.display(),
            "Base directory does not exist; file tools will fail until it is created"
        );
    }

    // Initialize comm
    let (comm, mut tool_rx) = Comm::new(comm_config).await?;
    info!(addr = %comm.local_addr()?, "Comm initialized");

    // Initialize executor
    let executor = Arc::new(Executor::new(executor_config));
    info!(tools = executor.tool_definitions().len(), "Executor initialized");

    let mut dispatcher = Dispatcher::new(executor);

    // Spawn comm server
    let comm_handle = tokio::spawn(async move {
        if let Err(e) = comm.run().await {
            error!(error = %e, "Comm server error");
        }
    });

    info!("Entering main loop...");

    loop {
        tokio::select! {
            maybe_req = tool_rx.recv() => {
                match maybe_req {
                    Some(req) => dispatcher.dispatch(req),
                    None => {
                        warn!("Comm channel closed");
                        break;
                    }
                }
            }
            // Handle Ctrl+C
            _ = async {
                signal::ctrl_c().await.ok();
            } => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    info!("Shutting down...");
    comm_handle.abort();
    dispatcher.shutdown().await;

    info!("Goodbye!");
    Ok(())
}
