//! Clap CLI definitions for Portal.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  portal serve --listen 127.0.0.1:7700          Expose the demo `echo` object
  portal describe echo                          List the methods of a remote object
  portal call echo add 1 2 39                   Call a method, args parsed as JSON
  portal call echo log '\"hello\"'                Fire-and-forget call to a void method";

/// Portal: call objects on the other end of a connection as if they were local.
#[derive(Parser)]
#[command(name = "portal", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Accept connections and expose the demo `echo` object on each.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:7700")]
        listen: SocketAddr,
    },
    /// Show the methods a remote object publishes.
    Describe {
        /// Address of the serving peer.
        #[arg(long, default_value = "127.0.0.1:7700")]
        connect: SocketAddr,
        /// Public name of the remote object.
        object: String,
    },
    /// Invoke a method on a remote object and print the result.
    Call {
        /// Address of the serving peer.
        #[arg(long, default_value = "127.0.0.1:7700")]
        connect: SocketAddr,
        /// Public name of the remote object.
        object: String,
        /// Method to invoke.
        method: String,
        /// Positional arguments. Each is parsed as JSON, falling back to a
        /// plain string.
        args: Vec<String>,
    },
}
