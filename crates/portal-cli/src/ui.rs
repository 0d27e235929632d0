//! Terminal output for the portal commands.

use colored::Colorize;
use portal_wire::RemoteProxy;
use serde_json::Value;
use std::net::SocketAddr;

/// Announce a listening server and how to reach it.
pub fn serving(object: &str, addr: SocketAddr) {
    println!(
        "  {} serving `{}` on {}",
        "\u{2714}".bright_green(),
        object.bold(),
        addr.to_string().bright_cyan()
    );
    println!(
        "  {} portal call --connect {addr} {object} add 1 2",
        "try:".dimmed()
    );
}

/// Method inventory of a remote object, one method per line.
pub fn inventory(proxy: &RemoteProxy) {
    println!("  {} {}", ">>".bright_cyan().bold(), proxy.name().bold());
    for method in proxy.methods() {
        let kind = if proxy.is_void(method) {
            "void".yellow()
        } else {
            "reply".green()
        };
        println!("     {method:<16}{kind}");
    }
}

/// Confirmation for a fire-and-forget call.
pub fn void_sent(object: &str, method: &str) {
    println!(
        "  {} {}.{} {}",
        "\u{2714}".bright_green(),
        object,
        method,
        "(void, no reply requested)".dimmed()
    );
}

/// A call result as pretty JSON on stdout, uncoloured so it can be piped.
pub fn result(value: &Value) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Fatal error line on stderr.
pub fn error(msg: &str) {
    eprintln!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
}
