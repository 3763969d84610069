//! Liveness monitor: provoke traffic on a silent link.
//!
//! A serial cable pulled mid-print, or a TCP bridge whose peer vanished
//! without a FIN, can leave the host waiting forever for an `ok`.  The monitor
//! does not declare the link dead (that is the transport's job); it only sends
//! a harmless probe so that a dead link produces a write or read error sooner
//! than the next user action would.
//!
//! The decision logic ([`LivenessMonitor`]) is pure and takes the current
//! time as an argument.  The periodic timer ([`spawn_ticker`]) only delivers
//! `Tick` messages into the actor inbox.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use super::channel::ChannelMessage;

/// Tracks inbound activity and decides when a probe is due.
#[derive(Debug)]
pub struct LivenessMonitor {
    timeout: Duration,
    last_activity: Instant,
    /// Set when a probe is sent, cleared by the next inbound line.
    probe_outstanding: bool,
}

impl LivenessMonitor {
    /// Starts monitoring as if a line had just been received at `now`.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            timeout,
            last_activity: now,
            probe_outstanding: false,
        }
    }

    /// Records an inbound line.
    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
        self.probe_outstanding = false;
    }

    /// Returns `true` when the link has been silent longer than the timeout
    /// and no probe is already waiting for a reply.  A `true` result marks
    /// the probe as sent.
    pub fn should_probe(&mut self, now: Instant) -> bool {
        if self.probe_outstanding {
            return false;
        }
        if self.silent_for(now) > self.timeout {
            self.probe_outstanding = true;
            true
        } else {
            false
        }
    }

    pub fn probe_outstanding(&self) -> bool {
        self.probe_outstanding
    }

    /// How long the link has been silent at `now`.
    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }
}

/// Spawns the periodic timer that feeds `Tick` messages to the actor.
///
/// The ticker holds only a weak sender, so it never keeps the actor alive
/// on its own.  It stops once the inbox is closed or every strong sender is
/// gone; the actor also aborts it on disconnect.
pub fn spawn_ticker(period: Duration, inbox: mpsc::WeakSender<ChannelMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick resolves immediately; skip it.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(inbox) = inbox.upgrade() else {
                debug!("liveness ticker stopping: no channel handles left");
                break;
            };
            if inbox.send(ChannelMessage::Tick(Instant::now())).await.is_err() {
                debug!("liveness ticker stopping: channel inbox closed");
                break;
            }
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[test]
    fn test_no_probe_before_timeout() {
        // Arrange
        let start = Instant::now();
        let mut monitor = LivenessMonitor::new(TIMEOUT, start);

        // Act / Assert
        assert!(!monitor.should_probe(start + Duration::from_millis(1999)));
        assert!(!monitor.should_probe(start + TIMEOUT), "timeout must be exceeded, not reached");
    }

    #[test]
    fn test_probe_once_after_timeout() {
        // Arrange
        let start = Instant::now();
        let mut monitor = LivenessMonitor::new(TIMEOUT, start);

        // Act
        let first = monitor.should_probe(start + Duration::from_secs(3));
        let second = monitor.should_probe(start + Duration::from_secs(13));

        // Assert
        assert!(first);
        assert!(!second, "no second probe until a reply is seen");
        assert!(monitor.probe_outstanding());
    }

    #[test]
    fn test_activity_rearms_probe() {
        // Arrange
        let start = Instant::now();
        let mut monitor = LivenessMonitor::new(TIMEOUT, start);
        assert!(monitor.should_probe(start + Duration::from_secs(3)));

        // Act – the firmware answers
        monitor.record_activity(start + Duration::from_secs(4));

        // Assert
        assert!(!monitor.probe_outstanding());
        assert!(!monitor.should_probe(start + Duration::from_secs(5)));
        assert!(monitor.should_probe(start + Duration::from_secs(7)));
    }

    #[test]
    fn test_silent_for_measures_since_last_activity() {
        // Arrange
        let start = Instant::now();
        let mut monitor = LivenessMonitor::new(TIMEOUT, start);

        // Act
        monitor.record_activity(start + Duration::from_secs(4));

        // Assert
        assert_eq!(monitor.silent_for(start + Duration::from_secs(5)), Duration::from_secs(1));
        assert_eq!(monitor.silent_for(start), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_ticker_stops_when_only_weak_sender_remains() {
        // Arrange
        let (tx, _rx) = mpsc::channel::<ChannelMessage>(4);
        let task = spawn_ticker(Duration::from_millis(5), tx.downgrade());

        // Act
        drop(tx);

        // Assert
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("ticker must stop once no strong sender is left")
            .expect("ticker must not panic");
    }

    #[tokio::test]
    async fn test_ticker_delivers_ticks_and_stops_when_inbox_closes() {
        // Arrange
        let (tx, mut rx) = mpsc::channel(4);
        let task = spawn_ticker(Duration::from_millis(5), tx.downgrade());

        // Act
        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("tick within two seconds");
        drop(rx);

        // Assert
        assert!(matches!(msg, Some(ChannelMessage::Tick(_))));
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("ticker must stop after the inbox closes")
            .expect("ticker must not panic");
    }
}
