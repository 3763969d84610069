//! End-to-end behaviour of the channel actor against an in-memory transport.
//!
//! Most tests drive `ChannelActor::handle` directly so each firmware reply is
//! applied at a known point; the last few go through `connect` and the async
//! handle.

use std::time::{Duration, Instant};

use marlin_core::{decode_command, Joint, JointTable};
use marlin_host::application::channel::{
    ChannelActor, ChannelConfig, ChannelError, ChannelEvent, ChannelMessage, LinkState,
};
use marlin_host::application::handle::connect;
use marlin_host::infrastructure::transport::mock::{MockConnector, RecordingSink};
use tokio::sync::{mpsc, oneshot};
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

type Actor = ChannelActor<RecordingSink, JointTable>;

struct Harness {
    actor: Actor,
    sink: RecordingSink,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    started: Instant,
}

impl Harness {
    fn new(window_size: usize, retention_window: usize) -> Self {
        let sink = RecordingSink::default();
        let robot = JointTable::new(vec![Joint::new("X", 0.0, 0.0), Joint::new("Y", 0.0, 0.0)]);
        let (events_tx, events) = mpsc::unbounded_channel();
        let config = ChannelConfig {
            window_size,
            retention_window,
            ..ChannelConfig::default()
        };
        let started = Instant::now();
        let actor = ChannelActor::new(Uuid::new_v4(), &config, sink.clone(), robot, events_tx, started);
        let mut harness = Self {
            actor,
            sink,
            events,
            started,
        };
        harness.take_events();
        harness
    }

    fn enqueue(&mut self, payload: &str) -> Result<u64, ChannelError> {
        let (tx, mut rx) = oneshot::channel();
        self.actor.handle(ChannelMessage::Enqueue {
            payload: payload.to_string(),
            reply: Some(tx),
        });
        rx.try_recv().expect("actor replies synchronously")
    }

    fn receive(&mut self, line: &str) {
        self.actor.handle(ChannelMessage::Line(line.to_string()));
    }

    /// Line numbers of every numbered line written so far.
    fn sent_numbers(&self) -> Vec<u64> {
        self.sink
            .sent()
            .iter()
            .filter_map(|line| decode_command(line).ok())
            .map(|(seq, _)| seq)
            .collect()
    }

    fn take_events(&mut self) -> Vec<ChannelEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

fn idle_count(events: &[ChannelEvent]) -> usize {
    events.iter().filter(|e| **e == ChannelEvent::Idle).count()
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[test]
fn test_two_commands_acknowledged_in_order_fire_one_idle() {
    // Arrange
    let mut h = Harness::new(20, 250);

    // Act
    h.enqueue("G1 X10").unwrap();
    h.enqueue("G1 X20").unwrap();
    h.receive("ok");
    h.receive("ok");

    // Assert
    assert_eq!(h.sent_numbers(), vec![1, 2]);
    assert_eq!(h.sink.sent()[0], "N1 G1 X10*80");
    let status = h.actor.status();
    assert_eq!(status.credit, 20);
    assert_eq!(status.state, LinkState::Idle);
    assert_eq!(idle_count(&h.take_events()), 1);
}

#[test]
fn test_resend_retransmits_from_requested_line_before_new_commands() {
    // Arrange
    let mut h = Harness::new(20, 250);
    for payload in ["G1 X1", "G1 X2", "G1 X3"] {
        h.enqueue(payload).unwrap();
    }

    // Act – Marlin follows every Resend with an ok
    h.receive("ok");
    h.receive("Resend: 2");
    h.receive("ok");
    h.enqueue("G1 X4").unwrap();

    // Assert
    assert_eq!(h.sent_numbers(), vec![1, 2, 3, 2, 3, 4]);
    let (_, payload) = decode_command(&h.sink.sent()[3]).unwrap();
    assert_eq!(payload, "G1 X2");
}

#[test]
fn test_position_report_sets_joints_without_changing_credit() {
    // Arrange
    let mut h = Harness::new(20, 250);
    h.enqueue("M114").unwrap();
    let credit_before = h.actor.status().credit;

    // Act
    h.receive("X:10.00 Y:20.00 Count X:0 Y:0");

    // Assert
    assert_eq!(h.actor.robot().get("X").map(|j| j.value), Some(10.0));
    assert_eq!(h.actor.robot().get("Y").map(|j| j.value), Some(20.0));
    assert_eq!(h.actor.status().credit, credit_before);
}

#[test]
fn test_silence_sends_exactly_one_unsequenced_probe() {
    // Arrange
    let mut h = Harness::new(20, 250);
    let t = h.started;

    // Act
    h.actor.handle(ChannelMessage::Tick(t + Duration::from_secs(1)));
    h.actor.handle(ChannelMessage::Tick(t + Duration::from_secs(3)));
    h.actor.handle(ChannelMessage::Tick(t + Duration::from_secs(13)));
    h.actor.handle(ChannelMessage::Tick(t + Duration::from_secs(23)));

    // Assert
    assert_eq!(h.sink.sent(), vec!["M400".to_string()]);
    assert!(h.sent_numbers().is_empty(), "probe must not consume a line number");
    assert_eq!(h.actor.status().last_enqueued, 0);
}

// ── Properties ────────────────────────────────────────────────────────────────

#[test]
fn test_sequence_numbers_increase_by_one_from_one() {
    let mut h = Harness::new(4, 16);
    let numbers: Vec<u64> = (0..10).map(|i| h.enqueue(&format!("G1 X{i}")).unwrap()).collect();
    assert_eq!(numbers, (1..=10).collect::<Vec<u64>>());
}

#[test]
fn test_in_flight_never_exceeds_window() {
    // Arrange
    let window = 3;
    let mut h = Harness::new(window, 16);
    for i in 0..12 {
        h.enqueue(&format!("G1 X{i}")).unwrap();
    }

    // Act / Assert
    for acked in 0..12 {
        let sent = h.sent_numbers().len();
        assert!(sent - acked <= window, "{sent} sent with only {acked} acknowledged");
        h.receive("ok");
    }
    assert_eq!(h.sent_numbers(), (1..=12).collect::<Vec<u64>>());
    assert_eq!(idle_count(&h.take_events()), 1);
}

#[test]
fn test_idle_fires_once_per_busy_period() {
    // Arrange
    let mut h = Harness::new(2, 16);

    // Act – two separate batches, with a stray ok in between
    h.enqueue("G28").unwrap();
    h.receive("ok");
    h.receive("ok");
    h.enqueue("G1 X1").unwrap();
    h.enqueue("G1 X2").unwrap();
    h.receive("ok");
    h.receive("ok");

    // Assert
    assert_eq!(idle_count(&h.take_events()), 2);
}

#[test]
fn test_history_stays_within_retention_window() {
    // Arrange
    let retention = 8;
    let mut h = Harness::new(2, retention);

    // Act
    for i in 0..40 {
        h.enqueue(&format!("G1 X{i}")).unwrap();
        h.receive("ok");
    }

    // Assert
    let status = h.actor.status();
    assert!(status.retained <= retention, "retained {}", status.retained);
    assert_eq!(status.next_to_send, 41);
}

#[test]
fn test_resend_of_evicted_line_faults_channel() {
    // Arrange
    let mut h = Harness::new(2, 4);
    for i in 0..20 {
        h.enqueue(&format!("G1 X{i}")).unwrap();
        h.receive("ok");
    }
    h.take_events();
    let sent_before = h.sink.sent().len();

    // Act
    h.receive("Resend: 1");

    // Assert
    let events = h.take_events();
    assert!(matches!(events.as_slice(), [ChannelEvent::ProtocolFault(_)]));
    assert_eq!(h.actor.status().state, LinkState::Faulted);
    assert!(matches!(h.enqueue("G28"), Err(ChannelError::Faulted(_))));
    assert_eq!(h.sink.sent().len(), sent_before, "nothing may be sent after a fault");
}

#[test]
fn test_in_flight_line_stays_resendable_when_retention_is_below_window() {
    // Arrange – a whole window in flight, retention asked for only two
    let mut h = Harness::new(10, 2);
    for i in 1..=10 {
        h.enqueue(&format!("G1 X{i}")).unwrap();
    }
    h.receive("ok");

    // Act
    h.receive("Resend: 2");

    // Assert
    let mut expected: Vec<u64> = (1..=10).collect();
    expected.push(2);
    assert_eq!(h.sent_numbers(), expected);
    assert_eq!(h.actor.status().state, LinkState::Streaming);
    assert!(!h
        .take_events()
        .iter()
        .any(|e| matches!(e, ChannelEvent::ProtocolFault(_))));
}

#[test]
fn test_resend_of_unsent_line_skips_nothing() {
    // Arrange – five queued, window of three
    let mut h = Harness::new(3, 16);
    for i in 1..=5 {
        h.enqueue(&format!("G1 X{i}")).unwrap();
    }

    // Act
    h.receive("Resend: 5");
    h.receive("ok");

    // Assert – line 4 still goes out before line 5
    assert_eq!(h.sent_numbers(), vec![1, 2, 3, 4]);
    assert_eq!(h.actor.status().state, LinkState::Streaming);
    assert!(h.take_events().is_empty());
}

#[test]
fn test_malformed_resend_is_ignored() {
    // Arrange
    let mut h = Harness::new(2, 16);
    h.enqueue("G28").unwrap();

    // Act
    h.receive("Resend: soon");

    // Assert
    assert_eq!(h.sent_numbers(), vec![1]);
    assert_eq!(h.actor.status().state, LinkState::Streaming);
}

#[test]
fn test_transport_close_discards_pending_commands() {
    // Arrange
    let mut h = Harness::new(1, 16);
    h.enqueue("G1 X1").unwrap();
    h.enqueue("G1 X2").unwrap();

    // Act
    let keep_running = h.actor.handle(ChannelMessage::TransportClosed {
        reason: "cable unplugged".to_string(),
    });

    // Assert
    assert!(!keep_running);
    let events = h.take_events();
    assert!(matches!(
        events.as_slice(),
        [ChannelEvent::Disconnected { reason, .. }] if reason == "cable unplugged"
    ));
    let status = h.actor.status();
    assert_eq!(status.state, LinkState::Disconnected);
    assert_eq!(status.retained, 0);
}

// ── Through the async handle ─────────────────────────────────────────────────

fn robot() -> JointTable {
    JointTable::new(vec![Joint::new("X", 10.0, 0.0), Joint::new("Y", 20.0, 270.0)])
}

fn no_homing() -> ChannelConfig {
    ChannelConfig {
        home_on_connect: false,
        ..ChannelConfig::default()
    }
}

#[tokio::test]
async fn test_connect_streams_and_reports_idle() {
    // Arrange
    let connector = MockConnector::new();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (handle, _task) = connect(&connector, no_homing(), robot(), events_tx)
        .await
        .expect("mock connect");
    let inbox = connector.inbox().expect("session inbox");

    // Act
    let first = handle.send_goto().await.unwrap();
    let second = handle.request_position().await.unwrap();
    inbox.send(ChannelMessage::Line("ok".into())).await.unwrap();
    inbox.send(ChannelMessage::Line("ok".into())).await.unwrap();
    let status = handle.status().await.unwrap();

    // Assert
    assert_eq!((first, second), (1, 2));
    assert_eq!(status.state, LinkState::Idle);
    let payloads: Vec<String> = connector
        .sink()
        .sent()
        .iter()
        .map(|l| decode_command(l).unwrap().1)
        .collect();
    assert_eq!(payloads, ["G1 X10.000 Y20.000", "M114"]);

    assert!(matches!(events.recv().await, Some(ChannelEvent::Connected { .. })));
    assert_eq!(events.recv().await, Some(ChannelEvent::Idle));
}

#[tokio::test]
async fn test_reconnect_restarts_numbering_at_one() {
    // Arrange
    let connector = MockConnector::new();
    let (events_tx, _events) = mpsc::unbounded_channel();
    let (first, task) = connect(&connector, no_homing(), robot(), events_tx.clone())
        .await
        .unwrap();
    first.enqueue("G28").await.unwrap();
    first.enqueue("G28").await.unwrap();
    first.close().await;
    task.await.unwrap();

    // Act
    let (second, _task) = connect(&connector, no_homing(), robot(), events_tx)
        .await
        .unwrap();
    let seq = second.enqueue("G28").await.unwrap();

    // Assert
    assert_eq!(seq, 1);
    assert_eq!(first.enqueue("G28").await, Err(ChannelError::NotConnected));
}

#[tokio::test]
async fn test_refused_connection_returns_error() {
    let connector = MockConnector::refusing();
    let (events_tx, _events) = mpsc::unbounded_channel();
    assert_err!(connect(&connector, no_homing(), robot(), events_tx).await);
}

#[tokio::test]
async fn test_empty_command_is_rejected_through_handle() {
    let connector = MockConnector::new();
    let (events_tx, _events) = mpsc::unbounded_channel();
    let (handle, _task) = assert_ok!(connect(&connector, no_homing(), robot(), events_tx).await);

    assert_eq!(handle.enqueue("").await, Err(ChannelError::EmptyCommand));
    assert!(connector.sink().sent().is_empty());
}
