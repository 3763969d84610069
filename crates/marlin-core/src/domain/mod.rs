//! Domain layer: pure bookkeeping for reliable delivery.
//!
//! # Sub-modules
//!
//! - **`history`** – [`CommandHistory`](history::CommandHistory): the
//!   bounded, sequence-indexed store of every encoded command that might still
//!   be asked for again.
//!
//! - **`flow_control`** – [`FlowControl`](flow_control::FlowControl): the
//!   credit window that decides when the next command may be written, how
//!   `ok` and `Resend: N` change that decision, and when the link is idle.
//!
//! - **`joints`** – The [`RobotAdapter`](joints::RobotAdapter) seam, the
//!   in-memory [`JointTable`](joints::JointTable), and the builders that turn
//!   joint values into `G1`/`G92` payloads.

pub mod flow_control;
pub mod history;
pub mod joints;
