//! Credit-based send window for numbered commands.
//!
//! [`FlowControl`] decides *when* the next queued command may be written.
//! Marlin has a small serial receive buffer (typically room for a couple of
//! dozen lines) and says `ok` each time it has taken one line out of it.  The
//! host therefore holds a *credit* count:
//!
//! - each transmission (first send or retransmission) spends one credit;
//! - each `ok` returns one credit, never above the window size;
//! - nothing is written while credit is zero.
//!
//! # Cursor layout
//!
//! ```text
//!   evicted      retained history                      last_enqueued
//!  ─────────┼─────────────────────────┼──────────────────────┼──────▶ line numbers
//!           │ <── retention_window ──▶│ <── not yet sent ───▶│
//!                                next_to_send
//! ```
//!
//! A `Resend: N` request moves `next_to_send` back to `N`; that is the only
//! way the cursor ever moves backwards.
//!
//! This module only manages state; all transport I/O is the caller's
//! responsibility.  The caller writes the wire text carried by
//! [`NextSend::Transmit`] and nothing else.

use std::collections::VecDeque;
use std::ops::RangeInclusive;

use crate::domain::history::{CommandHistory, HistoryError, QueuedCommand};

/// Result of asking the window for the next transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextSend {
    /// Write this command now.  Credit has been spent and the cursor advanced.
    Transmit(QueuedCommand),
    /// Every queued command has been sent.
    CaughtUp,
    /// The window is full; wait for an `ok`.
    NoCredit,
    /// The cursor names a line the history does not hold.  Indicates a
    /// bookkeeping bug; the caller should log the retained range.
    Missing {
        expected: u64,
        retained: Option<RangeInclusive<u64>>,
    },
    /// A resend named a line that is queued but has not been transmitted
    /// yet.  Nothing was rewound and no credit was spent.
    NotYetSent { requested: u64, next_to_send: u64 },
}

/// Which outstanding line an `ok` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// Acknowledges a numbered command; credit is returned.
    Sequenced,
    /// Answers an unsequenced command such as the keepalive probe; credit is
    /// left alone.
    Unsequenced,
}

/// Send-side bookkeeping for one connection.
#[derive(Debug)]
pub struct FlowControl {
    history: CommandHistory,
    /// Line number of the next command eligible for transmission.
    next_to_send: u64,
    /// Transmissions still allowed before an `ok` is needed.
    credit: usize,
    window_size: usize,
    /// Set by enqueue, cleared when the idle notification is taken.
    idle_pending: bool,
    /// For each outstanding unsequenced command, oldest first: how many
    /// sequenced `ok`s the firmware will send before answering it.
    unsequenced_replies: VecDeque<usize>,
}

impl FlowControl {
    /// Creates a window allowing `window_size` commands in flight and keeping
    /// `retention_window` lines of history behind the cursor.
    ///
    /// A `window_size` of 0 is raised to 1 so the channel can always make
    /// progress, and `retention_window` is raised to at least `window_size`
    /// so every line awaiting an `ok` can still be resent.
    pub fn new(window_size: usize, retention_window: usize) -> Self {
        let window_size = window_size.max(1);
        let retention_window = retention_window.max(window_size);
        Self {
            history: CommandHistory::new(retention_window),
            next_to_send: 1,
            credit: window_size,
            window_size,
            idle_pending: false,
            unsequenced_replies: VecDeque::new(),
        }
    }

    /// Returns to the freshly-connected state: cursor 1, nothing queued, full
    /// credit, empty history.
    pub fn reset(&mut self) {
        self.history.reset();
        self.next_to_send = 1;
        self.credit = self.window_size;
        self.idle_pending = false;
        self.unsequenced_replies.clear();
    }

    /// Queues `payload` and returns its line number.
    pub fn enqueue(&mut self, payload: &str) -> u64 {
        self.idle_pending = true;
        self.history.enqueue(payload)
    }

    /// Takes the command at the cursor if credit allows.
    pub fn try_send_next(&mut self) -> NextSend {
        if self.next_to_send > self.history.last_enqueued() {
            return NextSend::CaughtUp;
        }
        if self.credit == 0 {
            return NextSend::NoCredit;
        }
        match self.history.lookup(self.next_to_send) {
            Some(command) => {
                let command = command.clone();
                self.credit -= 1;
                self.next_to_send += 1;
                NextSend::Transmit(command)
            }
            None => NextSend::Missing {
                expected: self.next_to_send,
                retained: self.history.retained_range(),
            },
        }
    }

    /// Decides whether an incoming `ok` answers an unsequenced command.
    ///
    /// Marlin answers lines strictly in arrival order, so an unsequenced
    /// command's `ok` comes after the `ok`s of every numbered line written
    /// before it.
    pub fn attribute_ok(&mut self) -> AckKind {
        match self.unsequenced_replies.front_mut() {
            Some(0) => {
                self.unsequenced_replies.pop_front();
                AckKind::Unsequenced
            }
            Some(ahead) => {
                *ahead -= 1;
                AckKind::Sequenced
            }
            None => AckKind::Sequenced,
        }
    }

    /// Handles a sequenced `ok`: returns one credit, offers the next command,
    /// and evicts history the cursor has moved well past.
    pub fn on_acknowledged(&mut self) -> NextSend {
        self.credit = (self.credit + 1).min(self.window_size);
        let next = self.try_send_next();
        self.history.evict_before(self.next_to_send);
        next
    }

    /// Rewinds the cursor to `sequence_number` and offers that command again.
    ///
    /// Credit is unchanged: a retransmission is not new capacity.
    ///
    /// # Errors
    ///
    /// Returns a [`HistoryError`] when the requested line is not retained.
    /// The cursor is left where it was.  A line that is queued but not yet
    /// sent yields [`NextSend::NotYetSent`] and also leaves the cursor alone.
    pub fn on_resend_requested(&mut self, sequence_number: u64) -> Result<NextSend, HistoryError> {
        self.history.check_retained(sequence_number)?;
        if sequence_number >= self.next_to_send {
            return Ok(NextSend::NotYetSent {
                requested: sequence_number,
                next_to_send: self.next_to_send,
            });
        }
        self.next_to_send = sequence_number;
        Ok(self.try_send_next())
    }

    /// Records that an unsequenced command was written so its `ok` is not
    /// mistaken for a numbered acknowledgement.
    pub fn note_unsequenced_command(&mut self) {
        let already_ahead: usize = self.unsequenced_replies.iter().sum();
        self.unsequenced_replies
            .push_back(self.in_flight().saturating_sub(already_ahead));
    }

    /// Returns `true` exactly once per busy period, when everything queued has
    /// been sent and acknowledged.
    pub fn take_idle(&mut self) -> bool {
        if self.idle_pending && self.is_idle() {
            self.idle_pending = false;
            true
        } else {
            false
        }
    }

    /// `true` when nothing is queued and nothing is awaiting an `ok`.
    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0 && self.next_to_send > self.history.last_enqueued()
    }

    /// `true` while the window is full.
    pub fn is_busy(&self) -> bool {
        self.credit == 0
    }

    /// Transmissions not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.window_size - self.credit
    }

    pub fn next_to_send(&self) -> u64 {
        self.next_to_send
    }

    pub fn last_enqueued(&self) -> u64 {
        self.history.last_enqueued()
    }

    pub fn credit(&self) -> usize {
        self.credit
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
