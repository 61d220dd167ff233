//! Peer connections and their supporting state.
//!
//! A [`PeerConnection`] multiplexes the peer wire protocol over one
//! non-blocking socket: framing through the protocol buffers, choke and
//! interest exchange, request pipelining against the download's selector,
//! and throttled block transfer against the shared chunk store. The
//! [`ConnectionList`] owns every connection and converts fatal handler
//! errors into teardowns.

mod bitfield;
mod chunks;
mod connection;
mod list;
mod requests;

pub use bitfield::Bitfield;
pub use chunks::PeerChunks;
pub use connection::{PeerConnection, PeerInfo};
pub use list::ConnectionList;
pub use requests::RequestList;
