//! In-memory transport for tests.
//!
//! [`RecordingSink`] remembers every line written to it and can be told to
//! start failing.  [`MockConnector`] hands out recording sinks and keeps the
//! inbox of the last session so a test can play the firmware's side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::channel::ChannelMessage;
use crate::application::transport::{Connector, LineSink, TransportError};

/// Line sink that records what was sent.  Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    lines: Arc<Mutex<Vec<String>>>,
    should_fail: Arc<AtomicBool>,
}

impl RecordingSink {
    /// Every line sent so far, oldest first.
    pub fn sent(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Makes every later `send_line` fail with [`TransportError::Closed`].
    pub fn fail_writes(&self) {
        self.should_fail.store(true, Ordering::SeqCst);
    }
}

impl LineSink for RecordingSink {
    fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.to_string()),
            Err(poisoned) => poisoned.into_inner().push(line.to_string()),
        }
        Ok(())
    }
}

/// Connector returning [`RecordingSink`]s.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    sink: RecordingSink,
    refuse: bool,
    inbox: Arc<Mutex<Option<mpsc::Sender<ChannelMessage>>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector whose `open` always fails.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// The sink shared by every session this connector opened.
    pub fn sink(&self) -> RecordingSink {
        self.sink.clone()
    }

    /// Inbox of the most recent session, for injecting firmware replies.
    pub fn inbox(&self) -> Option<mpsc::Sender<ChannelMessage>> {
        self.inbox.lock().ok().and_then(|inbox| inbox.clone())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(
        &self,
        inbox: mpsc::Sender<ChannelMessage>,
    ) -> Result<Box<dyn LineSink>, TransportError> {
        if self.refuse {
            return Err(TransportError::ConnectFailed {
                target: self.target(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        if let Ok(mut slot) = self.inbox.lock() {
            *slot = Some(inbox);
        }
        Ok(Box::new(self.sink.clone()))
    }

    fn target(&self) -> String {
        "mock".to_string()
    }
}
