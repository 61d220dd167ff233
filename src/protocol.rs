//! Peer wire framing: buffers, typed messages, and the per-direction
//! state machines.
//!
//! Each connection direction owns a [`ProtocolBuffer`] holding at most one
//! pending wire message, plus a small finite-state machine tracking what is
//! currently crossing the wire. Bitfield and block bodies never pass
//! through the buffer; they are streamed between the socket and their
//! backing stores with only the headers framed here.

mod buffer;
mod direction;
mod message;

pub use buffer::{ProtocolBuffer, BUFFER_CAPACITY};
pub use direction::{ProtocolRead, ProtocolWrite, ReadState, WriteState};
pub use message::{Message, MessageId};

#[cfg(test)]
mod tests;
