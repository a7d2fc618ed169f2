//! Remote log stream.
//!
//! Status lines are published on a broadcast channel and written,
//! CRLF-terminated, to every connected TCP client (telnet-compatible).
//! A slow client lags and skips lines; the control loop never waits on it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use super::TelemetrySink;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// Address of the line stream; no server when unset
    pub listen_addr: Option<String>,
    pub channel_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: Some("127.0.0.1:2323".to_string()),
            channel_capacity: 64,
        }
    }
}

/// Sink publishing each line to all stream subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<String>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn sender(&self) -> broadcast::Sender<String> {
        self.tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl TelemetrySink for BroadcastSink {
    fn emit(&mut self, line: &str) {
        // No subscribers is not an error
        let _ = self.tx.send(line.to_string());
    }
}

/// Bind the stream listener.
pub async fn bind_log_stream(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind log stream on {addr}"))?;
    if addr.starts_with("0.0.0.0") {
        warn!(%addr, "log stream is reachable from the network");
    }
    Ok(listener)
}

/// Accept clients forever, one writer task per client.
pub async fn serve_log_stream(listener: TcpListener, tx: broadcast::Sender<String>) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "log stream listening");
    }
    loop {
        let (socket, peer) = listener.accept().await.context("log stream accept failed")?;
        info!(%peer, "log stream client connected");
        let rx = tx.subscribe();
        tokio::spawn(async move {
            match stream_to_client(socket, rx).await {
                Ok(()) => debug!(%peer, "log stream closed"),
                Err(e) => debug!(%peer, error = %e, "log stream client dropped"),
            }
        });
    }
}

async fn stream_to_client(
    mut socket: TcpStream,
    mut rx: broadcast::Receiver<String>,
) -> std::io::Result<()> {
    loop {
        match rx.recv().await {
            Ok(line) => {
                socket.write_all(line.as_bytes()).await?;
                socket.write_all(b"\r\n").await?;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "log stream client lagging, lines dropped");
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}
