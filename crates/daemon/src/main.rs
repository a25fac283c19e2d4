// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! oetd: the OET script execution engine daemon.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "oetd", version, about = "OET script execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine and its REST surface (the default)
    Serve,

    /// Internal worker entry point, spawned by the supervisor
    #[command(hide = true)]
    Worker {
        /// Procedure id this worker hosts
        #[arg(long)]
        pid: u64,
    },
}

#[tokio::main]
async fn main() {
    // stdout belongs to the worker event channel; all diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => oet_daemon::lifecycle::serve().await,
        Commands::Worker { pid } => oet_daemon::worker::run(pid).await,
    };
    std::process::exit(code);
}
