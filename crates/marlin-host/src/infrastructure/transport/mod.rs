//! Transport adapters: TCP, serial, and an in-memory mock.
//!
//! Every real transport has the same shape:
//!
//! - a **writer** that drains an unbounded queue of lines and writes each one
//!   followed by `\n`;
//! - a **reader** that splits the inbound byte stream into lines and pushes
//!   each one into the channel actor's inbox as `ChannelMessage::Line`;
//! - a final `ChannelMessage::TransportClosed` from whichever side fails first.
//!
//! [`TransportSink`] is the write half handed to the actor.  Because pushing
//! onto an unbounded queue never waits, `send_line` satisfies the
//! non-blocking contract of [`LineSink`].

pub mod mock;
pub mod serial;
pub mod tcp;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::channel::ChannelMessage;
use crate::application::transport::{LineSink, TransportError};

/// What keeps the reader side alive, and how to stop it.
#[derive(Debug)]
enum ReaderGuard {
    /// An async reader task; aborted on drop.
    Task(JoinHandle<()>),
    /// A blocking reader thread polling this flag; cleared on drop.
    Flag(Arc<AtomicBool>),
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        match self {
            ReaderGuard::Task(task) => task.abort(),
            ReaderGuard::Flag(running) => running.store(false, Ordering::Relaxed),
        }
    }
}

/// Write half of an open transport session.  Dropping it closes the session.
#[derive(Debug)]
pub struct TransportSink {
    writer: mpsc::UnboundedSender<String>,
    _reader: ReaderGuard,
}

impl TransportSink {
    fn with_task(writer: mpsc::UnboundedSender<String>, reader: JoinHandle<()>) -> Self {
        Self {
            writer,
            _reader: ReaderGuard::Task(reader),
        }
    }

    fn with_flag(writer: mpsc::UnboundedSender<String>, running: Arc<AtomicBool>) -> Self {
        Self {
            writer,
            _reader: ReaderGuard::Flag(running),
        }
    }
}

impl LineSink for TransportSink {
    fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.writer
            .send(line.to_string())
            .map_err(|_| TransportError::Closed)
    }
}

/// Reads `\n`-terminated lines from `reader` into `inbox` until EOF or error,
/// then reports the close.
pub async fn read_lines<R>(reader: R, inbox: mpsc::Sender<ChannelMessage>, target: String)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if inbox.send(ChannelMessage::Line(line)).await.is_err() {
                    debug!("{target}: reader stopping, channel gone");
                    return;
                }
            }
            Ok(None) => break format!("{target} closed the connection"),
            Err(e) => {
                warn!("{target}: read failed: {e}");
                break format!("read from {target} failed: {e}");
            }
        }
    };
    let _ = inbox.send(ChannelMessage::TransportClosed { reason }).await;
}

/// Writes every queued line to `writer`, appending `\n`.  Stops when the
/// queue's sender is dropped or a write fails; a failure is reported to the
/// actor.
pub async fn write_lines<W>(
    mut writer: W,
    mut lines: mpsc::UnboundedReceiver<String>,
    inbox: mpsc::Sender<ChannelMessage>,
    target: String,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = lines.recv().await {
        line.push('\n');
        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!("{target}: write failed: {e}");
            let _ = inbox
                .send(ChannelMessage::TransportClosed {
                    reason: format!("write to {target} failed: {e}"),
                })
                .await;
            return;
        }
    }
    debug!("{target}: writer stopping");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
