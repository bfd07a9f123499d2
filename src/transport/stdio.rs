//! stdio transport for MCP server.
//!
//! This module implements the stdio transport as specified by MCP:
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//! - stdin: receives messages from client
//! - stdout: sends messages to client
//! - stderr: may be used for logging (not MCP messages)
//!
//! Binding an engine spawns the read loop as a background task. The loop
//! runs until stdin reaches EOF, an I/O error occurs, or the close signal
//! fires.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::mcp::engine::McpEngine;
use crate::mcp::protocol::{parse_message, OutgoingNotification};
use crate::transport::{CloseReason, CloseSignal, NotificationSender, Transport};

type NotificationReceiver = mpsc::UnboundedReceiver<OutgoingNotification>;

/// A stdio-based MCP transport.
///
/// Generic over its streams so tests can substitute in-memory pipes.
pub struct StdioTransport<R = tokio::io::Stdin, W = tokio::io::Stdout> {
    streams: Mutex<Option<(R, W, NotificationReceiver)>>,
    notifications_tx: NotificationSender,
    closed: CloseSignal,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Creates a transport over the process's stdin and stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_streams(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a transport over arbitrary streams.
    pub fn with_streams(reader: R, writer: W) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            streams: Mutex::new(Some((reader, writer, rx))),
            notifications_tx: tx,
            closed: CloseSignal::new(),
            task: Mutex::new(None),
        }
    }

    /// Completes when the read loop has stopped and its output is flushed.
    pub async fn finished(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "stdio read loop panicked");
            }
        }
    }
}

impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn session_id(&self) -> Option<&str> {
        None
    }

    fn bind(&self, engine: Arc<McpEngine>) -> Result<(), TransportError> {
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }
        let (reader, writer, notifications) =
            self.streams.lock().take().ok_or(TransportError::AlreadyBound)?;

        let closed = self.closed.clone();
        let task = tokio::spawn(async move {
            let reason = match read_loop(reader, writer, notifications, &engine, &closed).await {
                Ok(reason) => reason,
                Err(e) => {
                    tracing::warn!(error = %e, "stdio transport I/O error");
                    CloseReason::Disconnected
                }
            };
            if closed.close(reason) {
                tracing::info!(%reason, "stdio transport closed");
            }
        });
        *self.task.lock() = Some(task);

        Ok(())
    }

    fn notifications(&self) -> NotificationSender {
        self.notifications_tx.clone()
    }

    fn close_signal(&self) -> &CloseSignal {
        &self.closed
    }
}

impl<R, W> std::fmt::Debug for StdioTransport<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("bound", &self.streams.lock().is_none())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Pumps stdin into the engine and engine output onto stdout.
///
/// Returns the reason the loop stopped without an I/O failure.
async fn read_loop<R, W>(
    reader: R,
    mut writer: W,
    mut notifications: NotificationReceiver,
    engine: &McpEngine,
    closed: &CloseSignal,
) -> io::Result<CloseReason>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            () = closed.closed() => {
                return Ok(closed.reason().unwrap_or(CloseReason::Shutdown));
            }

            Some(notification) = notifications.recv() => {
                write_message(&mut writer, &notification).await?;
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(CloseReason::EndOfStream);
                };
                let line = line.trim_end_matches('\r');
                if line.trim().is_empty() {
                    continue;
                }

                let reply = match parse_message(line) {
                    Ok(msg) => engine.handle(msg).await,
                    Err(error) => Some(error.into()),
                };
                if let Some(reply) = reply {
                    write_message(&mut writer, &reply).await?;
                }
            }
        }
    }
}

/// Writes one message as a single newline-terminated line.
async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_string(message)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    // stdio framing forbids embedded newlines
    debug_assert!(
        !json.contains('\n'),
        "JSON message must not contain embedded newlines"
    );

    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
