// file: src/main.rs
// version: 2.1.0
// guid: h8i9j0k1-l2m3-4567-8901-234567hijklm

//! vps-bootstrap - Main entry point

use clap::Parser;
use tokio::signal;
use tracing::warn;
use vps_bootstrap::cli::{dispatch, Cli};
use vps_bootstrap::interruption::StopSignal;
use vps_bootstrap::runner::exit_codes;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // first Ctrl+C stops the run at the next stage boundary, a second one
    // exits at once; run state is only written at boundaries and checkpoints
    let stop = StopSignal::new();
    let watcher = stop.clone();
    tokio::spawn(async move {
        loop {
            if let Err(e) = signal::ctrl_c().await {
                eprintln!("Failed to install Ctrl+C handler: {}", e);
                return;
            }
            if watcher.request() {
                eprintln!("Interrupted again; exiting now");
                std::process::exit(exit_codes::INTERRUPTED);
            }
            warn!("Interrupt received; stopping after the current stage (Ctrl+C again to exit now)");
        }
    });

    let code = dispatch(cli, stop).await;
    std::process::exit(code);
}
