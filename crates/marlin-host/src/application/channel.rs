//! The channel actor: one task, one connection, all protocol state.
//!
//! # Why an actor? (for beginners)
//!
//! Four things touch the protocol state of a connection: callers enqueueing
//! commands, the transport delivering replies, the liveness timer, and the
//! transport reporting that it closed.  Rather than guard the line counter,
//! credit and history with locks, every one of those inputs is turned into a
//! [`ChannelMessage`] and pushed into a single inbox.  The actor drains the
//! inbox one message at a time, so its state is only ever touched by one task.
//!
//! ```text
//!  ChannelHandle ──Enqueue/Robot/Status──┐
//!  transport reader ──Line/Closed────────┼──▶ inbox ──▶ ChannelActor ──▶ LineSink
//!  liveness ticker ──Tick────────────────┘                    │
//!                                                             └──▶ ChannelEvent
//! ```
//!
//! [`ChannelActor::handle`] is synchronous and never waits on I/O, so tests
//! drive it directly, one message at a time.

use std::time::{Duration, Instant};

use marlin_core::domain::joints::{apply_position_report, go_home, goto_payload, set_home_payload};
use marlin_core::protocol::messages::{
    EMERGENCY_STOP_COMMAND, PROBE_COMMAND, REPORT_POSITION_COMMAND,
};
use marlin_core::{
    classify_line, AckKind, FlowControl, HistoryError, InboundLine, JointReading, NextSend,
    RobotAdapter,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::liveness::LivenessMonitor;
use super::transport::{LineSink, TransportError};

/// How many times the emergency stop is written.  Repeating it makes it far
/// more likely that at least one copy survives a noisy line.
const EMERGENCY_STOP_REPEAT: usize = 3;

// ── Configuration ─────────────────────────────────────────────────────────────

/// Tunables for one channel.  Built from the `[channel]` config section.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Commands allowed in flight before an `ok` is needed.
    pub window_size: usize,
    /// Lines of history kept behind the send cursor for `Resend:` requests.
    pub retention_window: usize,
    /// Silence after which the keepalive probe is sent.
    pub probe_timeout: Duration,
    /// Period of the liveness timer.
    pub probe_interval: Duration,
    /// Issue `set_home` automatically after connecting.
    pub home_on_connect: bool,
    /// Settle time before the automatic `set_home`.
    pub home_delay: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            retention_window: 250,
            probe_timeout: Duration::from_millis(2_000),
            probe_interval: Duration::from_millis(10_000),
            home_on_connect: true,
            home_delay: Duration::from_millis(1_000),
        }
    }
}

// ── Messages, events and errors ───────────────────────────────────────────────

/// Robot-level operations built on top of the command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotCommand {
    /// Move every joint to its current value (`G1`).
    Goto,
    /// Declare the home values as the current position (`G92`), then move the
    /// local joint values home.
    SetHome,
    /// Set every local joint value to its home value; nothing is sent.
    GoHome,
    /// Ask the firmware where it is (`M114`).
    RequestPosition,
    /// Write `M112` straight to the transport, bypassing the window.
    EmergencyStop,
}

/// Everything the actor reacts to.
#[derive(Debug)]
pub enum ChannelMessage {
    /// Queue a raw command payload.  The reply carries its line number.
    Enqueue {
        payload: String,
        reply: Option<oneshot::Sender<Result<u64, ChannelError>>>,
    },
    /// Run a robot operation.  The reply carries the line number when the
    /// operation queued a command.
    Robot {
        command: RobotCommand,
        reply: Option<oneshot::Sender<Result<Option<u64>, ChannelError>>>,
    },
    /// One line received from the firmware.
    Line(String),
    /// Liveness timer tick.
    Tick(Instant),
    /// Snapshot request.
    Status(oneshot::Sender<ChannelStatus>),
    /// The transport's reader or writer stopped.
    TransportClosed { reason: String },
    /// Caller-initiated disconnect.
    Close,
}

/// Notifications for the owner of the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected { session_id: Uuid },
    Disconnected { session_id: Uuid, reason: String },
    /// Everything queued has been sent and acknowledged.  Raised once per busy
    /// period.
    Idle,
    /// The firmware asked for a line the history no longer holds.  The channel
    /// refuses new commands until reconnected.
    ProtocolFault(HistoryError),
    /// A position report was applied to the robot.
    PositionUpdated(Vec<JointReading>),
    /// Unclassified text from the firmware.
    InboundText(String),
}

/// Errors returned to callers of the channel.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChannelError {
    /// The actor has stopped or never started.
    #[error("channel is not connected")]
    NotConnected,

    /// The payload was empty or whitespace only.
    #[error("refusing to queue an empty command")]
    EmptyCommand,

    /// A protocol fault occurred earlier on this connection.
    #[error("channel is faulted: {0}")]
    Faulted(HistoryError),

    /// Writing to the transport failed; the connection is gone.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Coarse link state reported by [`ChannelStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    /// Connected with nothing queued or in flight.
    Idle,
    /// Connected with commands queued or awaiting `ok`.
    Streaming,
    /// Connected, but a protocol fault stopped streaming.
    Faulted,
}

/// Point-in-time view of the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStatus {
    pub session_id: Uuid,
    pub state: LinkState,
    pub next_to_send: u64,
    pub last_enqueued: u64,
    pub credit: usize,
    pub window_size: usize,
    /// Number of history entries currently retained.
    pub retained: usize,
    /// `true` while the window is full.
    pub busy: bool,
}

// ── Actor ─────────────────────────────────────────────────────────────────────

/// Owns the protocol state of one connection.
pub struct ChannelActor<S: LineSink, R: RobotAdapter> {
    session_id: Uuid,
    flow: FlowControl,
    liveness: LivenessMonitor,
    sink: S,
    robot: R,
    events: mpsc::UnboundedSender<ChannelEvent>,
    fault: Option<HistoryError>,
    connected: bool,
}

impl<S: LineSink, R: RobotAdapter> ChannelActor<S, R> {
    /// Starts a freshly-connected channel and raises `Connected`.
    pub fn new(
        session_id: Uuid,
        config: &ChannelConfig,
        sink: S,
        robot: R,
        events: mpsc::UnboundedSender<ChannelEvent>,
        now: Instant,
    ) -> Self {
        let actor = Self {
            session_id,
            flow: FlowControl::new(config.window_size, config.retention_window),
            liveness: LivenessMonitor::new(config.probe_timeout, now),
            sink,
            robot,
            events,
            fault: None,
            connected: true,
        };
        info!(
            "session {session_id}: connected (window {}, retention {})",
            actor.flow.window_size(),
            actor.flow.history().retention_window()
        );
        actor.emit(ChannelEvent::Connected { session_id });
        actor
    }

    /// Processes one message.  Returns `false` once the channel has
    /// disconnected and the actor should stop.
    pub fn handle(&mut self, message: ChannelMessage) -> bool {
        match message {
            ChannelMessage::Enqueue { payload, reply } => {
                let result = self.enqueue(&payload);
                respond(reply, result);
            }
            ChannelMessage::Robot { command, reply } => {
                let result = self.robot_command(command);
                respond(reply, result);
            }
            ChannelMessage::Line(line) => self.on_line(&line, Instant::now()),
            ChannelMessage::Tick(now) => self.on_tick(now),
            ChannelMessage::Status(reply) => {
                let _ = reply.send(self.status());
            }
            ChannelMessage::TransportClosed { reason } => self.disconnect(&reason),
            ChannelMessage::Close => self.disconnect("closed by caller"),
        }
        self.connected
    }

    /// Drains `inbox` until the channel disconnects or every sender is gone.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<ChannelMessage>) {
        while let Some(message) = inbox.recv().await {
            if !self.handle(message) {
                return;
            }
        }
        self.disconnect("all channel handles dropped");
    }

    pub fn status(&self) -> ChannelStatus {
        let state = if !self.connected {
            LinkState::Disconnected
        } else if self.fault.is_some() {
            LinkState::Faulted
        } else if self.flow.is_idle() {
            LinkState::Idle
        } else {
            LinkState::Streaming
        };
        ChannelStatus {
            session_id: self.session_id,
            state,
            next_to_send: self.flow.next_to_send(),
            last_enqueued: self.flow.last_enqueued(),
            credit: self.flow.credit(),
            window_size: self.flow.window_size(),
            retained: self.flow.history().len(),
            busy: self.flow.is_busy(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn robot(&self) -> &R {
        &self.robot
    }

    // ── Caller requests ───────────────────────────────────────────────────────

    fn enqueue(&mut self, payload: &str) -> Result<u64, ChannelError> {
        if !self.connected {
            return Err(ChannelError::NotConnected);
        }
        if let Some(fault) = &self.fault {
            return Err(ChannelError::Faulted(fault.clone()));
        }
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(ChannelError::EmptyCommand);
        }

        let sequence_number = self.flow.enqueue(payload);
        debug!("session {}: queued line {sequence_number}: {payload}", self.session_id);

        let next = self.flow.try_send_next();
        self.transmit(next)?;
        Ok(sequence_number)
    }

    fn robot_command(&mut self, command: RobotCommand) -> Result<Option<u64>, ChannelError> {
        match command {
            RobotCommand::Goto => {
                let payload = goto_payload(&self.robot.joints());
                self.enqueue(&payload).map(Some)
            }
            RobotCommand::SetHome => {
                let payload = set_home_payload(&self.robot.joints());
                let sequence_number = self.enqueue(&payload)?;
                go_home(&mut self.robot);
                Ok(Some(sequence_number))
            }
            RobotCommand::GoHome => {
                go_home(&mut self.robot);
                Ok(None)
            }
            RobotCommand::RequestPosition => self.enqueue(REPORT_POSITION_COMMAND).map(Some),
            RobotCommand::EmergencyStop => {
                if !self.connected {
                    return Err(ChannelError::NotConnected);
                }
                warn!("session {}: emergency stop", self.session_id);
                for _ in 0..EMERGENCY_STOP_REPEAT {
                    self.write_unsequenced(EMERGENCY_STOP_COMMAND)?;
                }
                Ok(None)
            }
        }
    }

    // ── Inbound traffic ───────────────────────────────────────────────────────

    fn on_line(&mut self, line: &str, now: Instant) {
        if !self.connected {
            return;
        }
        self.liveness.record_activity(now);

        match classify_line(line) {
            InboundLine::PositionReport(readings) => {
                let updated = apply_position_report(&mut self.robot, &readings);
                debug!("session {}: position report updated {updated} joints", self.session_id);
                self.emit(ChannelEvent::PositionUpdated(readings));
            }
            InboundLine::Ack => self.on_ack(),
            InboundLine::Resend(sequence_number) => self.on_resend(sequence_number),
            InboundLine::Malformed { line, reason } => {
                warn!("session {}: ignoring malformed line {line:?}: {reason}", self.session_id);
            }
            InboundLine::Text(text) => {
                debug!("session {}: firmware: {text}", self.session_id);
                self.emit(ChannelEvent::InboundText(text));
            }
        }
    }

    fn on_ack(&mut self) {
        if self.fault.is_some() {
            return;
        }
        if self.flow.attribute_ok() == AckKind::Unsequenced {
            debug!("session {}: probe answered", self.session_id);
            return;
        }

        let next = self.flow.on_acknowledged();
        if self.transmit(next).is_err() {
            return;
        }
        if self.flow.take_idle() {
            debug!("session {}: idle", self.session_id);
            self.emit(ChannelEvent::Idle);
        }
    }

    fn on_resend(&mut self, sequence_number: u64) {
        if self.fault.is_some() {
            return;
        }
        match self.flow.on_resend_requested(sequence_number) {
            Ok(NextSend::NotYetSent { requested, next_to_send }) => {
                warn!(
                    "session {}: ignoring resend of line {requested}, which has not been sent yet (next is {next_to_send})",
                    self.session_id
                );
            }
            Ok(next) => {
                info!("session {}: firmware requested resend from line {sequence_number}", self.session_id);
                let _ = self.transmit(next);
            }
            Err(fault) => {
                error!("session {}: protocol fault: {fault}", self.session_id);
                self.fault = Some(fault.clone());
                self.emit(ChannelEvent::ProtocolFault(fault));
            }
        }
    }

    fn on_tick(&mut self, now: Instant) {
        if !self.connected || !self.liveness.should_probe(now) {
            return;
        }
        debug!(
            "session {}: link silent for {:?}, sending probe",
            self.session_id,
            self.liveness.silent_for(now)
        );
        if self.write_unsequenced(PROBE_COMMAND).is_ok() {
            self.flow.note_unsequenced_command();
        }
    }

    // ── Output ────────────────────────────────────────────────────────────────

    /// Writes the command offered by the window, if any.
    fn transmit(&mut self, next: NextSend) -> Result<(), ChannelError> {
        match next {
            NextSend::Transmit(command) => {
                debug!("session {}: -> {}", self.session_id, command.wire_text);
                self.write(&command.wire_text)
            }
            NextSend::Missing { expected, retained } => {
                warn!(
                    "session {}: line {expected} is due but not in history (retained: {retained:?})",
                    self.session_id
                );
                Ok(())
            }
            NextSend::CaughtUp | NextSend::NoCredit | NextSend::NotYetSent { .. } => Ok(()),
        }
    }

    fn write_unsequenced(&mut self, line: &str) -> Result<(), ChannelError> {
        debug!("session {}: -> {line} (unsequenced)", self.session_id);
        self.write(line)
    }

    fn write(&mut self, line: &str) -> Result<(), ChannelError> {
        self.sink.send_line(line).map_err(|e| self.on_write_failed(e))
    }

    fn on_write_failed(&mut self, error: TransportError) -> ChannelError {
        let reason = error.to_string();
        self.disconnect(&reason);
        ChannelError::Transport(reason)
    }

    /// Drops all per-connection state and raises `Disconnected` once.
    fn disconnect(&mut self, reason: &str) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.flow.reset();
        self.fault = None;
        info!("session {}: disconnected: {reason}", self.session_id);
        self.emit(ChannelEvent::Disconnected {
            session_id: self.session_id,
            reason: reason.to_string(),
        });
    }

    fn emit(&self, event: ChannelEvent) {
        // Nobody listening is fine; the channel keeps working.
        let _ = self.events.send(event);
    }
}

fn respond<T>(reply: Option<oneshot::Sender<T>>, value: T) {
    if let Some(reply) = reply {
        let _ = reply.send(value);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
