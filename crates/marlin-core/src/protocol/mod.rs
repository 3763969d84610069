//! Protocol module containing the line codec, inbound line classification,
//! and the sequence counter.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{checksum, decode_command, encode_command, CodecError};
pub use messages::*;
pub use sequence::SequenceCounter;
