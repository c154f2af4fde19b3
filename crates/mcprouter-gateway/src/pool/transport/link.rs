//! Channel pair between a session and its transport

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Outbound buffer per link; a full buffer applies backpressure to senders
const LINK_BUFFER: usize = 64;

/// Something the transport observed on the backend side
#[derive(Debug)]
pub enum LinkEvent {
    /// A parsed JSON value (not yet validated as JSON-RPC)
    Message(Value),
    /// Bytes that were not JSON at all
    Malformed(String),
    /// The link is gone; no further events follow
    Closed(String),
}

/// An open connection to one backend.
pub struct BackendLink {
    pub outbound: mpsc::Sender<Value>,
    pub inbound: mpsc::Receiver<LinkEvent>,
    /// Cancelling this token closes the link and releases its resources
    pub shutdown: CancellationToken,
}

impl BackendLink {
    /// Build an unconnected link and return the transport-side ends.
    ///
    /// Transports that are not line-oriented (HTTP, in-process connectors)
    /// use this and drive the channels themselves.
    pub fn channel() -> (Self, LinkEnds) {
        let (out_tx, out_rx) = mpsc::channel(LINK_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(LINK_BUFFER);
        let shutdown = CancellationToken::new();
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
                shutdown: shutdown.clone(),
            },
            LinkEnds {
                outbound: out_rx,
                inbound: in_tx,
                shutdown,
            },
        )
    }

    /// Newline-delimited JSON over any byte stream pair.
    ///
    /// Used for child-process stdio and for in-memory duplex pipes.
    pub fn from_io<R, W>(server: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (link, ends) = Self::channel();
        let LinkEnds {
            outbound: mut out_rx,
            inbound: in_tx,
            shutdown,
        } = ends;

        // Writer task
        let writer_shutdown = shutdown.clone();
        let writer_server = server.to_string();
        tokio::spawn(async move {
            let mut writer = writer;
            loop {
                let msg = tokio::select! {
                    _ = writer_shutdown.cancelled() => break,
                    msg = out_rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                };
                let mut line = msg.to_string();
                line.push('\n');
                trace!(server = %writer_server, "[BackendLink] -> {}", line.trim_end());
                if writer.write_all(line.as_bytes()).await.is_err() || writer.flush().await.is_err() {
                    debug!(server = %writer_server, "[BackendLink] Write failed, closing writer");
                    writer_shutdown.cancel();
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        // Reader task
        let reader_server = server.to_string();
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            let reason = loop {
                line.clear();
                let read = tokio::select! {
                    _ = shutdown.cancelled() => break "link shut down".to_string(),
                    read = reader.read_line(&mut line) => read,
                };
                match read {
                    Ok(0) => break "end of stream".to_string(),
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        trace!(server = %reader_server, "[BackendLink] <- {}", trimmed);
                        let event = match serde_json::from_str::<Value>(trimmed) {
                            Ok(value) => LinkEvent::Message(value),
                            Err(e) => LinkEvent::Malformed(format!("invalid JSON: {}", e)),
                        };
                        if in_tx.send(event).await.is_err() {
                            break "session dropped".to_string();
                        }
                    }
                    Err(e) => break format!("read error: {}", e),
                }
            };
            debug!(server = %reader_server, reason = %reason, "[BackendLink] Reader finished");
            let _ = in_tx.send(LinkEvent::Closed(reason)).await;
        });

        link
    }
}

/// The transport's side of a [`BackendLink`]
pub struct LinkEnds {
    /// Messages the session wants delivered to the backend
    pub outbound: mpsc::Receiver<Value>,
    /// Where the transport reports what the backend sent
    pub inbound: mpsc::Sender<LinkEvent>,
    pub shutdown: CancellationToken,
}
