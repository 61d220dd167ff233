//! The enclosing download's collaborator surface.
//!
//! A [`Download`] bundles everything a peer connection reaches for while
//! servicing readiness events: the content descriptor, the shared chunk
//! store, the piece selector, the choke manager, the two throttle trees,
//! and the aggregate rate meters. Connections hold no back-reference; the
//! event dispatch passes the download into every handler.

use crate::chunk::ChunkStore;
use crate::peer::{Bitfield, PeerChunks};
use crate::piece::{Piece, MAX_BLOCK_LEN};
use crate::poll::Token;
use crate::throttle::{RateMeter, ThrottleList};

/// Span of the aggregate transfer-rate meters, in seconds.
const DOWNLOAD_RATE_SPAN: u64 = 60;

/// Immutable geometry of the content plus our own chunk bitfield.
pub struct ContentInfo {
    chunk_total: u32,
    chunk_length: u32,
    total_length: u64,
    bitfield: Bitfield,
}

impl ContentInfo {
    pub fn new(chunk_total: u32, chunk_length: u32, total_length: u64) -> Self {
        Self {
            chunk_total,
            chunk_length,
            total_length,
            bitfield: Bitfield::new(chunk_total),
        }
    }

    pub fn chunk_total(&self) -> u32 {
        self.chunk_total
    }

    /// Length of chunk `index`; the last chunk may be shorter.
    pub fn chunk_length(&self, index: u32) -> u32 {
        if index + 1 < self.chunk_total {
            return self.chunk_length;
        }
        let tail = self.total_length
            - u64::from(self.chunk_length) * u64::from(self.chunk_total.saturating_sub(1));
        tail as u32
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Whether `p` fits the content's piece geometry.
    pub fn is_valid_piece(&self, p: &Piece) -> bool {
        p.index < self.chunk_total
            && p.length > 0
            && p.length <= MAX_BLOCK_LEN
            && u64::from(p.offset) + u64::from(p.length) <= u64::from(self.chunk_length(p.index))
    }

    /// Whether we hold chunk `index`.
    pub fn has_chunk(&self, index: u32) -> bool {
        self.bitfield.get(index)
    }

    /// Our own chunk bitfield.
    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    pub fn bitfield_mut(&mut self) -> &mut Bitfield {
        &mut self.bitfield
    }
}

/// Piece selection, delegated by the request list.
///
/// `delegate` must hand out blocks valid against the content geometry and
/// set in the peer's bitfield, and must not hand the same block to two
/// peers outside endgame. Returned and completed blocks flow back through
/// `returned`/`completed`.
pub trait Selector {
    /// Picks the next block to request from this peer, or `None`.
    fn delegate(&mut self, peer: &PeerChunks) -> Option<Piece>;

    /// Returns an unfinished block to the pool.
    fn returned(&mut self, piece: Piece);

    /// Marks a fully received block.
    fn completed(&mut self, piece: Piece);

    /// Drops the peer's chunk advertisements from availability tracking.
    fn erase_peer_chunks(&mut self, peer: &PeerChunks);
}

/// The download's choke rotation, notified when a peer's upload wantedness
/// changes.
pub trait ChokeManager {
    fn set_interested(&mut self, conn: Token);
    fn set_not_interested(&mut self, conn: Token);
    fn disconnected(&mut self, conn: Token);
}

/// Everything one download shares among its peer connections.
pub struct Download {
    pub content: ContentInfo,
    pub store: ChunkStore,
    pub selector: Box<dyn Selector>,
    pub choke: Box<dyn ChokeManager>,
    pub down_throttle: ThrottleList,
    pub up_throttle: ThrottleList,
    pub down_rate: RateMeter,
    pub up_rate: RateMeter,
    endgame: bool,
}

impl Download {
    pub fn new(
        content: ContentInfo,
        store: ChunkStore,
        selector: Box<dyn Selector>,
        choke: Box<dyn ChokeManager>,
    ) -> Self {
        Self {
            content,
            store,
            selector,
            choke,
            down_throttle: ThrottleList::unlimited(),
            up_throttle: ThrottleList::unlimited(),
            down_rate: RateMeter::new(DOWNLOAD_RATE_SPAN),
            up_rate: RateMeter::new(DOWNLOAD_RATE_SPAN),
            endgame: false,
        }
    }

    /// Whether the download is in its endgame phase.
    pub fn endgame(&self) -> bool {
        self.endgame
    }

    pub fn set_endgame(&mut self, endgame: bool) {
        self.endgame = endgame;
    }
}
