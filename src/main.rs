//! Wanderer node entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::io::BufReader;
use tokio::signal;

mod config;
mod error;
mod manager;
mod process;
mod protocol;
mod server;
mod shell;
mod stream;
mod types;
mod workloads;

use config::Config;
use manager::ProcessManager;
use server::run_server;
use shell::run_shell;
use workloads::WorkloadRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting node {} with config: {:?}", cfg.host_name, cfg);
    let bind_addr = cfg.listen_addr()?;

    // Shared node context
    let manager = Arc::new(ProcessManager::from_config(
        &cfg,
        WorkloadRegistry::with_defaults(),
    ));

    // Listener
    let mut server_handle = tokio::spawn(run_server(bind_addr, Arc::clone(&manager)));

    // Command line
    let stdin = BufReader::new(tokio::io::stdin());
    let shell_manager = Arc::clone(&manager);
    let shell_handle = tokio::spawn(async move { run_shell(stdin, shell_manager).await });

    let outcome = tokio::select! {
        res = &mut server_handle => match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.context("Listener failed")),
            Err(e) => Err(anyhow::Error::from(e).context("Listener panicked")),
        },
        res = shell_handle => {
            info!("Command line closed, shutting down...");
            match res {
                Ok(inner) => inner,
                Err(e) => Err(e.into()),
            }
        }
        res = signal::ctrl_c() => {
            match res {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            }
            Ok(())
        }
    };

    server_handle.abort();
    if let Err(e) = &outcome {
        error!("{:#}", e);
    }
    info!("Shutdown complete.");

    // Stdin is read on a blocking thread that would keep the runtime alive.
    std::process::exit(if outcome.is_ok() { 0 } else { 1 })
}
