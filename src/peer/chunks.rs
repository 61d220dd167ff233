use super::bitfield::Bitfield;

/// Per-peer chunk accounting: the peer's advertised bitfield plus byte
/// tallies for both directions.
pub struct PeerChunks {
    bitfield: Bitfield,
    bytes_down: u64,
    bytes_up: u64,
}

impl PeerChunks {
    /// Creates accounting sized to nothing; [`PeerChunks::resize`] follows
    /// at connection initialization.
    pub fn new() -> Self {
        Self {
            bitfield: Bitfield::new(0),
            bytes_down: 0,
            bytes_up: 0,
        }
    }

    /// Sizes the bitfield from the content's chunk total, zero-filled.
    pub fn resize(&mut self, chunk_total: u32) {
        self.bitfield = Bitfield::new(chunk_total);
    }

    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    pub fn bitfield_mut(&mut self) -> &mut Bitfield {
        &mut self.bitfield
    }

    pub fn record_down(&mut self, bytes: u32) {
        self.bytes_down += u64::from(bytes);
    }

    pub fn record_up(&mut self, bytes: u32) {
        self.bytes_up += u64::from(bytes);
    }

    pub fn bytes_down(&self) -> u64 {
        self.bytes_down
    }

    pub fn bytes_up(&self) -> u64 {
        self.bytes_up
    }
}

impl Default for PeerChunks {
    fn default() -> Self {
        Self::new()
    }
}
