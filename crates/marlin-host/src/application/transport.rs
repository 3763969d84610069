//! Transport seams consumed by the channel actor.
//!
//! The actor never touches a socket.  It writes through a [`LineSink`], which
//! must not block, and receives inbound text as
//! [`ChannelMessage::Line`](super::channel::ChannelMessage::Line) messages
//! that the transport's reader pushes into the actor's inbox.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::channel::ChannelMessage;

/// Errors raised while opening or writing to a transport session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A TCP connection could not be established.
    #[error("failed to connect to {target}: {source}")]
    ConnectFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// A serial port could not be opened or configured.
    #[error("failed to open serial port {port}: {reason}")]
    SerialOpen { port: String, reason: String },

    /// The write path has shut down; the session is gone.
    #[error("transport write path is closed")]
    Closed,
}

/// Fire-and-forget write side of a transport session.
///
/// `send_line` hands one line (without trailing newline) to the transport
/// and returns immediately.  Delivery failures surface later as a
/// `TransportClosed` message in the actor inbox.
#[cfg_attr(test, mockall::automock)]
pub trait LineSink: Send {
    fn send_line(&mut self, line: &str) -> Result<(), TransportError>;
}

impl LineSink for Box<dyn LineSink> {
    fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        (**self).send_line(line)
    }
}

/// Opens transport sessions.
///
/// The production implementations use TCP and serial ports; tests use the
/// recording connector from `infrastructure::transport::mock`.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a session.  Inbound lines, and finally a `TransportClosed`
    /// message, are delivered to `inbox`.  Dropping the returned sink closes
    /// the session.
    async fn open(
        &self,
        inbox: mpsc::Sender<ChannelMessage>,
    ) -> Result<Box<dyn LineSink>, TransportError>;

    /// Human-readable target, for log lines.
    fn target(&self) -> String;
}
