//! marlin-host library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does marlin-host do? (for beginners)
//!
//! The host is the computer side of a Marlin connection.  It:
//!
//! 1. Opens a TCP socket or serial port to the controller.
//! 2. Spawns one *channel actor* per connection.  The actor owns the line
//!    counter, the send window and the command history, so no locks are
//!    needed around them.
//! 3. Accepts commands from callers, numbers and checksums them, and writes
//!    them only as fast as the firmware's `ok` replies allow.
//! 4. Retransmits on `Resend: N`, applies `M114` position reports to the
//!    robot model, and probes a silent link with a harmless `M400`.
//! 5. Reports `Connected`, `Idle`, `ProtocolFault` and `Disconnected` events
//!    so a UI or script knows when to submit the next batch of moves.

/// Application layer: the channel actor, its handle, and the liveness monitor.
pub mod application;

/// Infrastructure layer: TCP/serial transports and config file storage.
pub mod infrastructure;
