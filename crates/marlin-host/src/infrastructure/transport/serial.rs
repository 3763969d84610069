//! Serial transport for controllers on a USB/UART link.
//!
//! `serialport` is a blocking API, so each session runs two plain threads:
//! one reading with a short timeout (so it can notice the stop flag) and one
//! draining the write queue.  They talk to the async side with
//! `blocking_send` / `blocking_recv`.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use serialport::SerialPort;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::TransportSink;
use crate::application::channel::ChannelMessage;
use crate::application::transport::{Connector, LineSink, TransportError};

/// Read timeout; bounds how long the reader thread takes to notice a close.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Opens serial sessions on `port` at `baud_rate`.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port: String,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
        }
    }

    fn open_error(&self, reason: impl ToString) -> TransportError {
        TransportError::SerialOpen {
            port: self.port.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn open(
        &self,
        inbox: mpsc::Sender<ChannelMessage>,
    ) -> Result<Box<dyn LineSink>, TransportError> {
        let mut builder = serialport::new(&self.port, self.baud_rate).timeout(READ_TIMEOUT);
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let reader = builder.open().map_err(|e| self.open_error(e))?;
        let writer = reader.try_clone().map_err(|e| self.open_error(e))?;
        info!("opened serial port {} at {} baud", self.port, self.baud_rate);

        let running = Arc::new(AtomicBool::new(true));
        let (line_tx, line_rx) = mpsc::unbounded_channel();

        let target = self.target();
        {
            let running = running.clone();
            let inbox = inbox.clone();
            let target = target.clone();
            thread::Builder::new()
                .name("serial-reader".into())
                .spawn(move || read_port(reader, inbox, running, target))
                .map_err(|e| self.open_error(e))?;
        }
        thread::Builder::new()
            .name("serial-writer".into())
            .spawn(move || write_port(writer, line_rx, inbox, target))
            .map_err(|e| self.open_error(e))?;

        Ok(Box::new(TransportSink::with_flag(line_tx, running)))
    }

    fn target(&self) -> String {
        self.port.clone()
    }
}

fn read_port(
    mut port: Box<dyn SerialPort>,
    inbox: mpsc::Sender<ChannelMessage>,
    running: Arc<AtomicBool>,
    target: String,
) {
    let mut assembler = LineAssembler::default();
    let mut buf = [0u8; 256];

    while running.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                for line in assembler.push(&buf[..n]) {
                    if inbox.blocking_send(ChannelMessage::Line(line)).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("{target}: read failed: {e}");
                let _ = inbox.blocking_send(ChannelMessage::TransportClosed {
                    reason: format!("read from {target} failed: {e}"),
                });
                return;
            }
        }
    }
    debug!("{target}: reader stopping");
}

fn write_port(
    mut port: Box<dyn SerialPort>,
    mut lines: mpsc::UnboundedReceiver<String>,
    inbox: mpsc::Sender<ChannelMessage>,
    target: String,
) {
    while let Some(mut line) = lines.blocking_recv() {
        line.push('\n');
        if let Err(e) = port.write_all(line.as_bytes()).and_then(|()| port.flush()) {
            warn!("{target}: write failed: {e}");
            let _ = inbox.blocking_send(ChannelMessage::TransportClosed {
                reason: format!("write to {target} failed: {e}"),
            });
            return;
        }
    }
    debug!("{target}: writer stopping");
}

/// Splits a byte stream into text lines.
///
/// `\r` is dropped, so both `\n` and `\r\n` terminators work.  Invalid UTF-8
/// is replaced rather than rejected; the classifier treats such lines as
/// plain text.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    /// Feeds `bytes` and returns every line they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            match byte {
                b'\n' => {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                }
                b'\r' => {}
                other => self.pending.push(other),
            }
        }
        lines
    }

    /// Bytes received since the last complete line.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}
