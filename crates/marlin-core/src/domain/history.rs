//! Bounded history of encoded commands, indexed by line number.
//!
//! Every command is stored here at enqueue time and stays until it falls more
//! than `retention_window` lines behind the send cursor.  Entries are always
//! contiguous (enqueue appends, eviction pops from the front), so lookup is a
//! subtraction rather than a search.

use std::collections::VecDeque;
use std::ops::RangeInclusive;

use thiserror::Error;
use tracing::trace;

use crate::protocol::{codec::encode_command, sequence::SequenceCounter};

/// Why a line number cannot be served from the history.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HistoryError {
    /// The line was sent once but has since been evicted.  The firmware is
    /// asking for data that is permanently lost.
    #[error("line {requested} is no longer retained (oldest retained line is {oldest})")]
    Evicted { requested: u64, oldest: u64 },

    /// The line number was never issued on this connection.
    #[error("line {requested} was never queued (last queued line is {last_enqueued})")]
    NotQueued { requested: u64, last_enqueued: u64 },
}

/// One outbound command awaiting acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    /// Line number assigned at enqueue time.
    pub sequence_number: u64,
    /// Command text before numbering, e.g. `G1 X10.000`.
    pub payload: String,
    /// `N<seq> <payload>*<checksum>`, ready for the transport.
    pub wire_text: String,
}

/// Sequence-indexed store of recently queued commands.
#[derive(Debug)]
pub struct CommandHistory {
    entries: VecDeque<QueuedCommand>,
    counter: SequenceCounter,
    retention_window: u64,
}

impl CommandHistory {
    /// Creates an empty history that keeps `retention_window` lines behind the
    /// send cursor.
    pub fn new(retention_window: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            counter: SequenceCounter::new(),
            retention_window: retention_window as u64,
        }
    }

    /// Numbers, encodes and stores `payload`, returning the assigned line number.
    ///
    /// Never blocks and never refuses; rate limiting is the flow-control
    /// window's job.
    pub fn enqueue(&mut self, payload: &str) -> u64 {
        let sequence_number = self.counter.next();
        self.entries.push_back(QueuedCommand {
            sequence_number,
            payload: payload.to_string(),
            wire_text: encode_command(sequence_number, payload),
        });
        sequence_number
    }

    /// Returns the stored command for `sequence_number`, if retained.
    pub fn lookup(&self, sequence_number: u64) -> Option<&QueuedCommand> {
        let first = self.entries.front()?.sequence_number;
        let index = sequence_number.checked_sub(first)?;
        self.entries.get(usize::try_from(index).ok()?)
    }

    /// Checks that `sequence_number` can be served, explaining why not otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::NotQueued`] for numbers that were never issued
    /// and [`HistoryError::Evicted`] for numbers that have been dropped.
    pub fn check_retained(&self, sequence_number: u64) -> Result<(), HistoryError> {
        let last_enqueued = self.last_enqueued();
        if sequence_number == 0 || sequence_number > last_enqueued {
            return Err(HistoryError::NotQueued {
                requested: sequence_number,
                last_enqueued,
            });
        }
        match self.lookup(sequence_number) {
            Some(_) => Ok(()),
            None => Err(HistoryError::Evicted {
                requested: sequence_number,
                oldest: self
                    .entries
                    .front()
                    .map_or(last_enqueued + 1, |c| c.sequence_number),
            }),
        }
    }

    /// Drops every entry more than `retention_window` lines behind
    /// `sequence_number`.  Returns the number of entries removed.
    pub fn evict_before(&mut self, sequence_number: u64) -> usize {
        let keep_from = sequence_number.saturating_sub(self.retention_window);
        let mut removed = 0;
        while self
            .entries
            .front()
            .is_some_and(|c| c.sequence_number < keep_from)
        {
            self.entries.pop_front();
            removed += 1;
        }
        if removed > 0 {
            trace!("evicted {removed} lines below {keep_from}");
        }
        removed
    }

    /// The line number most recently assigned; 0 before the first enqueue.
    pub fn last_enqueued(&self) -> u64 {
        self.counter.current()
    }

    /// First and last retained line numbers, or `None` when empty.
    pub fn retained_range(&self) -> Option<RangeInclusive<u64>> {
        let first = self.entries.front()?.sequence_number;
        let last = self.entries.back()?.sequence_number;
        Some(first..=last)
    }

    /// Iterates retained commands oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedCommand> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn retention_window(&self) -> usize {
        self.retention_window as usize
    }

    /// Forgets every entry and restarts numbering at 1.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.counter.reset();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
