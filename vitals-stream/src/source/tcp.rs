use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncReadExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use vitals_core::RawMessage;

use super::MessageSource;

/// Longest accepted message, excluding the trailing newline.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TcpSourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal message channel closed")]
    ChannelClosed,
}

/// Accepts publisher connections and treats every newline-terminated line as
/// one message.
///
/// A connection is only read while the pipeline has room for another
/// message, so a slow pipeline pushes back on publishers through TCP flow
/// control.
pub struct TcpSource {
    addr: SocketAddr,
    subscription: String,
    capacity: usize,
}

impl TcpSource {
    pub fn new(addr: SocketAddr, subscription: impl Into<String>, capacity: usize) -> Self {
        Self {
            addr,
            subscription: subscription.into(),
            capacity,
        }
    }
}

#[async_trait]
impl MessageSource for TcpSource {
    type Error = io::Error;

    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RawMessage>, Self::Error> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let addr = self.addr;

        let listener = TcpListener::bind(addr).await?;
        info!(%addr, subscription = %self.subscription, "TCP source started");

        tokio::spawn(run_server_loop(listener, tx, cancel, self.subscription.clone()));

        Ok(rx)
    }
}

#[instrument(name = "server_loop", skip_all, fields(%subscription))]
async fn run_server_loop(
    listener: TcpListener,
    tx: mpsc::Sender<RawMessage>,
    cancel: CancellationToken,
    subscription: String,
) {
    info!("TCP source accepting publishers");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Closing TCP source");
                break;
            }
            client = listener.accept() => {
                match client {
                    Ok((stream, addr)) => {
                        info!(%addr, "Publisher connected");

                        let cancel = cancel.clone();
                        let tx = tx.clone();

                        tokio::spawn(async move {
                            match handle_publisher(stream, addr, tx, cancel).await {
                                Ok(count) => info!(%addr, count, "Publisher disconnected"),
                                Err(e) => error!(%addr, error = %e, "Connection closed with error"),
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        if is_transient_error(&e) {
                            sleep(Duration::from_millis(100)).await;
                        } else {
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn is_transient_error(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        e.kind(),
        ConnectionRefused | ConnectionAborted | ConnectionReset | OutOfMemory | Other
    )
}

/// Forward every line from one publisher. Returns the number of messages.
async fn handle_publisher(
    stream: TcpStream,
    addr: SocketAddr,
    tx: mpsc::Sender<RawMessage>,
    cancel: CancellationToken,
) -> Result<u64, TcpSourceError> {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::with_capacity(256);
    let mut count = 0u64;
    // Set while the rest of an oversize line is being thrown away.
    let mut skipping = false;

    loop {
        line.clear();
        let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64 + 1);

        let n = tokio::select! {
            _ = cancel.cancelled() => {
                info!(%addr, "Shutdown signal received");
                break;
            }
            read = limited.read_until(b'\n', &mut line) => read?,
        };

        if n == 0 {
            break;
        }

        let complete = line.ends_with(b"\n");
        if skipping {
            skipping = !complete;
            continue;
        }
        if !complete && line.len() > MAX_LINE_BYTES {
            warn!(%addr, limit = MAX_LINE_BYTES, "Dropping oversize message");
            skipping = true;
            continue;
        }

        // Raw bytes are kept as-is: invalid UTF-8 still reaches the raw tier.
        let payload = trim_line_end(&line);
        if payload.is_empty() {
            continue;
        }

        let message = RawMessage::new(payload.to_vec(), jiff::Timestamp::now());
        debug!(%addr, message_id = %message.id.0, "Received message");

        if tx.send(message).await.is_err() {
            error!("Internal message channel closed");
            return Err(TcpSourceError::ChannelClosed);
        }
        count += 1;
    }

    Ok(count)
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
