//! TCP transport, for controllers behind a serial-to-network bridge.

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::info;

use super::{read_lines, write_lines, TransportSink};
use crate::application::channel::ChannelMessage;
use crate::application::transport::{Connector, LineSink, TransportError};

/// Opens TCP sessions to `addr` (`host:port`).
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(
        &self,
        inbox: mpsc::Sender<ChannelMessage>,
    ) -> Result<Box<dyn LineSink>, TransportError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| TransportError::ConnectFailed {
                target: self.addr.clone(),
                source,
            })?;
        // Commands are single short lines; Nagle would only add latency.
        stream
            .set_nodelay(true)
            .map_err(|source| TransportError::ConnectFailed {
                target: self.addr.clone(),
                source,
            })?;
        info!("connected to {}", self.addr);

        let (read_half, write_half) = stream.into_split();
        let (line_tx, line_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_lines(write_half, line_rx, inbox.clone(), self.addr.clone()));
        let reader = tokio::spawn(read_lines(read_half, inbox, self.addr.clone()));

        Ok(Box::new(TransportSink::with_task(line_tx, reader)))
    }

    fn target(&self) -> String {
        self.addr.clone()
    }
}
