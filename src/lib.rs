//! capstan - the core of a BitTorrent transfer engine
//!
//! This library implements the two coupled state machines at the heart of
//! a BitTorrent client: the per-peer connection engine and the tracker
//! coordination layer.
//!
//! # Modules
//!
//! - [`piece`] - block descriptors and the wire block ceiling
//! - [`protocol`] - framing buffers, typed messages, direction FSMs
//! - [`throttle`] - upload/download rate trees and per-connection nodes
//! - [`chunk`] - the shared chunk store and its lease discipline
//! - [`peer`] - peer connections, bitfields, request pipelining
//! - [`download`] - the enclosing download's collaborator surface
//! - [`tracker`] - tiered tracker list, HTTP/UDP workers, scrapes
//! - [`poll`] - the abstract readiness surface and non-blocking streams
//! - [`bencode`] - minimal bencode decoding for tracker responses
//!
//! The main I/O domain is a single-threaded poll loop: connections are
//! driven by readiness events and never block. Tracker workers run as
//! tasks on a shared runtime and report back over a channel drained on the
//! main domain.

pub mod bencode;
pub mod chunk;
pub mod download;
pub mod error;
pub mod peer;
pub mod piece;
pub mod poll;
pub mod protocol;
pub mod throttle;
pub mod tracker;

pub use chunk::{ChunkHandle, ChunkStore, ChunkView, StoreError};
pub use download::{ChokeManager, ContentInfo, Download, Selector};
pub use error::EngineError;
pub use peer::{Bitfield, ConnectionList, PeerChunks, PeerConnection, PeerInfo, RequestList};
pub use piece::{Piece, MAX_BLOCK_LEN};
pub use poll::{PollSurface, Stream, Token};
pub use protocol::{Message, MessageId, ProtocolBuffer, ProtocolRead, ProtocolWrite};
pub use throttle::{RateMeter, ThrottleList, ThrottleNode};
pub use tracker::{
    AnnounceTotals, HttpWorker, Tracker, TrackerEvent, TrackerInfo, TrackerList, TrackerState,
    TrackerWorker, UdpWorker, WorkerSet,
};
