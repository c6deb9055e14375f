//! Transport layer: the link to the rooms gateway
//!
//! [`Transport`] is the seam between the connector and the actual
//! socket, so tests can inject a scripted fake. The production
//! implementation is [`TcpTransport`]: newline-delimited JSON envelopes
//! over a TCP stream, with a background read task feeding an inbound
//! frame channel.

mod connector;

pub use connector::Connector;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::protocol::Envelope;

/// A single realtime link to the server.
///
/// `open` may be called repeatedly by the connector's retry loop; each
/// successful call yields a fresh inbound frame stream that ends when
/// the link closes. `send` assumes the last `open` succeeded.
#[async_trait]
pub trait Transport: Send {
    /// Establish (or re-establish) the link and return the inbound
    /// frame stream.
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<Envelope>>;

    /// Write one envelope to the link.
    async fn send(&mut self, envelope: Envelope) -> Result<()>;

    /// Tear the link down. Idempotent.
    async fn close(&mut self);
}

/// NDJSON-over-TCP transport.
pub struct TcpTransport {
    addr: String,
    writer: Option<OwnedWriteHalf>,
    reader_task: Option<JoinHandle<()>>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            writer: None,
            reader_task: None,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<Envelope>> {
        self.close().await;

        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        self.writer = Some(write_half);

        let (tx, rx) = mpsc::unbounded_channel();
        self.reader_task = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Envelope>(&line) {
                            Ok(envelope) => {
                                if tx.send(envelope).is_err() {
                                    // Receiver dropped; stop reading.
                                    return;
                                }
                            }
                            Err(e) => {
                                // Tolerate garbage frames; the session
                                // must not die on one bad line.
                                warn!(error = %e, "dropping unparseable frame");
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        warn!(error = %e, "tcp read failed, treating link as closed");
                        return;
                    }
                }
            }
        }));

        debug!(addr = %self.addr, "tcp link established");
        Ok(rx)
    }

    async fn send(&mut self, envelope: Envelope) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(ClientError::NotConnected)?;
        let mut line = serde_json::to_string(&envelope)
            .map_err(|e| ClientError::protocol(&envelope.event, e.to_string()))?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}
