//! pldbg - breakpoint coordination for cooperating debugged processes
//!
//! Operator CLI for the Shared breakpoint table, and the entry point of the
//! coordinator daemon that owns it.

use clap::Parser;
use commands::Commands;
use pldbg::common::logging;
use pldbg::{cli, commands, coordinator};

#[derive(Parser)]
#[command(name = "pldbg", about = "Shared breakpoint coordinator")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Coordinator => {
            if let Some(path) = logging::init_coordinator() {
                tracing::info!("Logging to {}", path.display());
            }
            coordinator::run().await
        }
        command => {
            logging::init_cli();
            cli::dispatch(command).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
