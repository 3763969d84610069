//! Application layer for the host.
//!
//! # What lives here?
//!
//! - **`transport`** – The narrow seams through which the channel reaches the
//!   outside world: [`LineSink`](transport::LineSink) for the write path and
//!   [`Connector`](transport::Connector) for opening a session.  The
//!   infrastructure layer implements them.
//!
//! - **`channel`** – The single-writer [`ChannelActor`](channel::ChannelActor).
//!   All state for one connection lives inside it; everything else talks to
//!   it by message.
//!
//! - **`handle`** – [`ChannelHandle`](handle::ChannelHandle), the cloneable
//!   async front door, plus `spawn_channel` / `connect` which start an actor.
//!
//! - **`liveness`** – The silence detector that decides when to send the
//!   keepalive probe, and the timer task that drives it.

pub mod channel;
pub mod handle;
pub mod liveness;
pub mod transport;
