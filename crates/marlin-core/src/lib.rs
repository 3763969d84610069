//! # marlin-core
//!
//! Shared library for MarlinLink containing the line-protocol codec, the
//! bounded command history, the flow-control window, and the joint model
//! used to build and apply motion commands.
//!
//! This crate has zero dependencies on sockets, serial ports, timers, or
//! async runtimes.  Everything here is plain state plus pure functions, so the
//! host application can drive it from a single actor task and tests can drive
//! it directly.
//!
//! # Architecture overview (for beginners)
//!
//! A Marlin-style motion controller (the firmware found in most 3D printers
//! and many small robot arms) accepts text commands such as `G1 X10 Y20`, one
//! per line.  Over a noisy serial cable lines can be corrupted or dropped, so
//! Marlin supports *numbered, checksummed* lines:
//!
//! ```text
//! host  → N7 G1 X10.000 Y20.000*93
//! robot ← ok                        (line 7 accepted, room for one more)
//! robot ← Resend: 7                 (line 7 was garbled, send it again)
//! ```
//!
//! This crate is split into two modules:
//!
//! - **`protocol`** – What travels over the wire: the checksum codec, the
//!   classification of inbound lines (`ok`, `Resend: N`, position reports),
//!   and the per-connection sequence counter.
//!
//! - **`domain`** – The bookkeeping behind reliable delivery: the bounded
//!   [`CommandHistory`], the credit-based [`FlowControl`] window, and the
//!   [`RobotAdapter`] seam through which joint values are read and written.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `marlin_core::FlowControl` instead of `marlin_core::domain::flow_control::FlowControl`.
pub use domain::flow_control::{AckKind, FlowControl, NextSend};
pub use domain::history::{CommandHistory, HistoryError, QueuedCommand};
pub use domain::joints::{Joint, JointTable, RobotAdapter};
pub use protocol::codec::{checksum, decode_command, encode_command, CodecError};
pub use protocol::messages::{classify_line, InboundLine, JointReading};
pub use protocol::sequence::SequenceCounter;
