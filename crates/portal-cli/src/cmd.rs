//! Subcommand implementations.

use crate::demo::EchoService;
use crate::ui;

use anyhow::{Context, Result};
use portal_wire::{tcp, Peer, PeerConfig, RemoteProxy, SetOptions};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// How long to wait for a remote object when no call timeout is configured.
const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period for the writer task to flush a fire-and-forget call.
const VOID_FLUSH_GRACE: Duration = Duration::from_millis(200);

pub async fn serve(listen: SocketAddr, config: PeerConfig) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    let local_addr = listener.local_addr()?;
    ui::serving("echo", local_addr);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("portal: accepted connection from {}", addr);
                let channel = tcp::from_stream(stream, config.max_message_size);
                let peer = Peer::with_config(channel, config.clone());
                if let Err(e) = peer.set(
                    "echo",
                    Arc::new(EchoService::new()),
                    SetOptions::void(["log"]),
                ) {
                    warn!("portal: could not expose echo to {}: {}", addr, e);
                }
            }
            Err(e) => {
                error!("portal: accept error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn lookup(connect: SocketAddr, object: &str, config: PeerConfig) -> Result<RemoteProxy> {
    let channel = tcp::connect(connect, config.max_message_size)
        .await
        .with_context(|| format!("failed to connect to {connect}"))?;
    let wait = config.call_timeout().unwrap_or(DEFAULT_LOOKUP_TIMEOUT);
    let peer = Peer::with_config(channel, config);
    let proxy = tokio::time::timeout(wait, peer.get(object))
        .await
        .with_context(|| format!("`{object}` was not published within {wait:?}"))??;
    Ok(proxy)
}

pub async fn describe(connect: SocketAddr, object: String, config: PeerConfig) -> Result<()> {
    let proxy = lookup(connect, &object, config).await?;
    ui::inventory(&proxy);
    Ok(())
}

pub async fn call(
    connect: SocketAddr,
    object: String,
    method: String,
    args: Vec<String>,
    config: PeerConfig,
) -> Result<()> {
    let proxy = lookup(connect, &object, config).await?;
    let args: Vec<Value> = args.iter().map(|a| parse_arg(a)).collect();
    let result = proxy
        .call(&method, args)
        .await
        .with_context(|| format!("{object}.{method} failed"))?;

    if proxy.is_void(&method) {
        tokio::time::sleep(VOID_FLUSH_GRACE).await;
        ui::void_sent(&object, &method);
    } else {
        ui::result(&result)?;
    }
    Ok(())
}

/// Parse a command-line argument as JSON, or take it verbatim as a string.
fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
