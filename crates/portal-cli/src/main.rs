//! Portal CLI: serve and call objects over a TCP portal connection.

mod cli;
mod cmd;
mod demo;
mod ui;

use crate::cli::{Cli, Commands};
use clap::Parser;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing_stderr();
    let cli = Cli::parse();
    let config = portal_wire::load_config(cli.config.as_deref());

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            ui::error(&format!("Failed to create Tokio runtime: {e}"));
            std::process::exit(1);
        }
    };

    let result = rt.block_on(async move {
        match cli.command {
            Commands::Serve { listen } => cmd::serve(listen, config).await,
            Commands::Describe { connect, object } => cmd::describe(connect, object, config).await,
            Commands::Call {
                connect,
                object,
                method,
                args,
            } => cmd::call(connect, object, method, args, config).await,
        }
    });

    if let Err(e) = result {
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
