//! Per-connection line-number counter.
//!
//! # What is a line number? (for beginners)
//!
//! Every numbered command carries a monotonically increasing integer in its
//! `N<seq>` prefix.  Marlin tracks the last line it accepted and refuses any
//! line whose number is not exactly one higher, answering `Resend: <n>` with
//! the number it expected instead.  Line numbers therefore:
//!
//! - **Start at 1 on every connection.**  The firmware is told nothing about a
//!   previous session, so the host must not resume an old count.
//! - **Never skip.**  A gap looks to the firmware like a lost line.
//! - **Are never reused** within one connection, so a `Resend: <n>` always
//!   names exactly one stored command.
//!
//! # Ownership
//!
//! Unlike a counter shared between threads, this one is owned by the single
//! channel actor and mutated only from there, so a plain `u64` suffices.

/// A monotonically increasing counter for command line numbers.
///
/// # Examples
///
/// ```rust
/// use marlin_core::protocol::SequenceCounter;
///
/// let mut counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// assert_eq!(counter.current(), 2);
/// ```
#[derive(Debug, Default, Clone)]
pub struct SequenceCounter {
    /// The most recently issued number; 0 before the first call to `next`.
    last: u64,
}

impl SequenceCounter {
    /// Creates a new counter whose first issued number is 1.
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Issues the next line number.
    ///
    /// The first call returns 1, the second returns 2, and so on.  A counter
    /// that reaches `u64::MAX` saturates instead of wrapping back to a number
    /// the firmware has already seen; at one line per microsecond that is
    /// several hundred thousand years away.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u64 {
        self.last = self.last.saturating_add(1);
        self.last
    }

    /// Returns the most recently issued number without advancing.
    ///
    /// Returns 0 when nothing has been issued since the last reset.
    pub fn current(&self) -> u64 {
        self.last
    }

    /// Rewinds the counter so the next issued number is 1 again.
    pub fn reset(&mut self) {
        self.last = 0;
    }
}
