//! Cloneable async front door to a running channel actor.
//!
//! Everything here is a thin wrapper that turns a method call into a
//! [`ChannelMessage`] and, where the caller needs an answer, waits on a
//! `oneshot` reply.  If the actor has already stopped, every request fails with
//! [`ChannelError::NotConnected`].

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use marlin_core::RobotAdapter;

use super::channel::{
    ChannelActor, ChannelConfig, ChannelError, ChannelEvent, ChannelMessage, ChannelStatus,
    LinkState, RobotCommand,
};
use super::liveness::spawn_ticker;
use super::transport::{Connector, LineSink, TransportError};

/// Capacity of the actor inbox.  Senders wait when it is full, which only
/// happens if the actor falls far behind the transport.
pub const INBOX_CAPACITY: usize = 256;

/// Handle used by callers to talk to a channel actor.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    inbox: mpsc::Sender<ChannelMessage>,
}

impl ChannelHandle {
    pub fn new(inbox: mpsc::Sender<ChannelMessage>) -> Self {
        Self { inbox }
    }

    /// Queues a raw command and returns its line number.
    pub async fn enqueue(&self, payload: impl Into<String>) -> Result<u64, ChannelError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            ChannelMessage::Enqueue {
                payload: payload.into(),
                reply: Some(reply),
            },
            rx,
        )
        .await?
    }

    /// Moves the robot to its current joint values (`G1`).
    pub async fn send_goto(&self) -> Result<u64, ChannelError> {
        queued(self.robot(RobotCommand::Goto).await?)
    }

    /// Declares the home values as the current position (`G92`) and moves the
    /// local joint values home.
    pub async fn set_home(&self) -> Result<u64, ChannelError> {
        queued(self.robot(RobotCommand::SetHome).await?)
    }

    /// Asks the firmware for a position report (`M114`).
    pub async fn request_position(&self) -> Result<u64, ChannelError> {
        queued(self.robot(RobotCommand::RequestPosition).await?)
    }

    /// Sets every local joint value to its home value.
    pub async fn go_home(&self) -> Result<(), ChannelError> {
        self.robot(RobotCommand::GoHome).await?.map(|_| ())
    }

    /// Writes `M112` straight to the transport, ahead of anything queued.
    pub async fn emergency_stop(&self) -> Result<(), ChannelError> {
        self.robot(RobotCommand::EmergencyStop).await?.map(|_| ())
    }

    pub async fn status(&self) -> Result<ChannelStatus, ChannelError> {
        let (reply, rx) = oneshot::channel();
        self.request(ChannelMessage::Status(reply), rx).await
    }

    /// Current link state; `Disconnected` once the actor has stopped.
    pub async fn state(&self) -> LinkState {
        self.status()
            .await
            .map(|s| s.state)
            .unwrap_or(LinkState::Disconnected)
    }

    /// `true` while the send window is full.
    pub async fn is_busy(&self) -> bool {
        self.status().await.map(|s| s.busy).unwrap_or(false)
    }

    /// Asks the actor to disconnect.  Succeeds silently if it already has.
    pub async fn close(&self) {
        let _ = self.inbox.send(ChannelMessage::Close).await;
    }

    /// `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }

    /// Raw inbox, for transports and tests that inject messages directly.
    pub fn inbox(&self) -> &mpsc::Sender<ChannelMessage> {
        &self.inbox
    }

    async fn robot(&self, command: RobotCommand) -> Result<Result<Option<u64>, ChannelError>, ChannelError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            ChannelMessage::Robot {
                command,
                reply: Some(reply),
            },
            rx,
        )
        .await
    }

    async fn request<T>(
        &self,
        message: ChannelMessage,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, ChannelError> {
        self.inbox
            .send(message)
            .await
            .map_err(|_| ChannelError::NotConnected)?;
        rx.await.map_err(|_| ChannelError::NotConnected)
    }
}

fn queued(result: Result<Option<u64>, ChannelError>) -> Result<u64, ChannelError> {
    result.and_then(|seq| seq.ok_or(ChannelError::NotConnected))
}

/// Opens a transport session through `connector` and starts a channel on it.
///
/// # Errors
///
/// Returns the connector's [`TransportError`] when the session cannot be
/// opened.
pub async fn connect<C, R>(
    connector: &C,
    config: ChannelConfig,
    robot: R,
    events: mpsc::UnboundedSender<ChannelEvent>,
) -> Result<(ChannelHandle, JoinHandle<()>), TransportError>
where
    C: Connector + ?Sized,
    R: RobotAdapter + 'static,
{
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    info!("connecting to {}", connector.target());
    let sink = connector.open(tx.clone()).await?;
    Ok(start(config, sink, robot, events, tx, rx))
}

/// Starts a channel on an already-open sink.  Inbound lines must be pushed
/// into [`ChannelHandle::inbox`] by the caller.
pub fn spawn_channel<S, R>(
    config: ChannelConfig,
    sink: S,
    robot: R,
    events: mpsc::UnboundedSender<ChannelEvent>,
) -> (ChannelHandle, JoinHandle<()>)
where
    S: LineSink + 'static,
    R: RobotAdapter + 'static,
{
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    start(config, sink, robot, events, tx, rx)
}

fn start<S, R>(
    config: ChannelConfig,
    sink: S,
    robot: R,
    events: mpsc::UnboundedSender<ChannelEvent>,
    tx: mpsc::Sender<ChannelMessage>,
    rx: mpsc::Receiver<ChannelMessage>,
) -> (ChannelHandle, JoinHandle<()>)
where
    S: LineSink + 'static,
    R: RobotAdapter + 'static,
{
    let session_id = Uuid::new_v4();
    let actor = ChannelActor::new(
        session_id,
        &config,
        sink,
        robot,
        events,
        std::time::Instant::now(),
    );

    // Background tasks hold weak senders: once every handle (and the
    // transport reader) is gone, the inbox closes and the actor stops.
    let ticker = spawn_ticker(config.probe_interval, tx.downgrade());
    let homing = config
        .home_on_connect
        .then(|| spawn_home_on_connect(config.home_delay, tx.downgrade()));

    let task = tokio::spawn(async move {
        actor.run(rx).await;
        ticker.abort();
        if let Some(homing) = homing {
            homing.abort();
        }
        debug!("session {session_id}: channel task finished");
    });

    (ChannelHandle::new(tx), task)
}

/// Issues `set_home` once the firmware has had time to settle after connect.
fn spawn_home_on_connect(
    delay: std::time::Duration,
    inbox: mpsc::WeakSender<ChannelMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let Some(inbox) = inbox.upgrade() else {
            return;
        };
        let _ = inbox
            .send(ChannelMessage::Robot {
                command: RobotCommand::SetHome,
                reply: None,
            })
            .await;
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::infrastructure::transport::mock::RecordingSink;
    use marlin_core::{Joint, JointTable};

    fn quiet_config() -> ChannelConfig {
        ChannelConfig {
            home_on_connect: false,
            ..ChannelConfig::default()
        }
    }

    fn robot() -> JointTable {
        JointTable::new(vec![Joint::new("X", 1.0, 0.0)])
    }

    #[tokio::test]
    async fn test_enqueue_through_handle_returns_sequence_numbers() {
        // Arrange
        let sink = RecordingSink::default();
        let (events, _rx) = mpsc::unbounded_channel();
        let (handle, _task) = spawn_channel(quiet_config(), sink.clone(), robot(), events);

        // Act
        let first = handle.enqueue("G28").await.unwrap();
        let second = handle.send_goto().await.unwrap();

        // Assert
        assert_eq!((first, second), (1, 2));
        assert_eq!(sink.sent().len(), 2);
        assert_eq!(handle.state().await, LinkState::Streaming);
    }

    #[tokio::test]
    async fn test_requests_fail_after_close() {
        // Arrange
        let (events, mut event_rx) = mpsc::unbounded_channel();
        let (handle, task) =
            spawn_channel(quiet_config(), RecordingSink::default(), robot(), events);

        // Act
        handle.close().await;
        task.await.unwrap();

        // Assert
        assert_eq!(handle.enqueue("G28").await, Err(ChannelError::NotConnected));
        assert_eq!(handle.state().await, LinkState::Disconnected);
        assert!(handle.is_closed());
        assert!(matches!(event_rx.recv().await, Some(ChannelEvent::Connected { .. })));
        assert!(matches!(event_rx.recv().await, Some(ChannelEvent::Disconnected { .. })));
    }

    #[tokio::test]
    async fn test_actor_stops_when_every_handle_is_dropped() {
        // Arrange
        let sink = RecordingSink::default();
        let (events, mut event_rx) = mpsc::unbounded_channel();
        let config = ChannelConfig {
            probe_interval: Duration::from_millis(5),
            home_on_connect: true,
            home_delay: Duration::from_secs(60),
            ..ChannelConfig::default()
        };
        let (handle, task) = spawn_channel(config, sink, robot(), events);
        let other = handle.clone();

        // Act
        drop(handle);
        drop(other);

        // Assert
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("actor must stop once every handle is dropped")
            .unwrap();
        assert!(matches!(event_rx.recv().await, Some(ChannelEvent::Connected { .. })));
        assert!(matches!(
            event_rx.recv().await,
            Some(ChannelEvent::Disconnected { reason, .. }) if reason == "all channel handles dropped"
        ));
    }

    #[tokio::test]
    async fn test_home_on_connect_sends_set_home_after_delay() {
        // Arrange
        let sink = RecordingSink::default();
        let (events, _rx) = mpsc::unbounded_channel();
        let config = ChannelConfig {
            home_on_connect: true,
            home_delay: Duration::from_millis(10),
            ..ChannelConfig::default()
        };

        // Act
        let (handle, _task) = spawn_channel(config, sink.clone(), robot(), events);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Assert
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("N1 G92 X0.000*"), "got {sent:?}");
        assert_eq!(handle.status().await.unwrap().last_enqueued, 1);
    }
}
