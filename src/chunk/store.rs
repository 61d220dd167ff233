use std::sync::Arc;

use parking_lot::Mutex;

use super::error::StoreError;
use super::handle::{ChunkHandle, ChunkView};

/// Default size of one chunk part.
const DEFAULT_PART_SIZE: u32 = 64 << 10;

struct ChunkSlot {
    parts: Vec<Arc<Mutex<Box<[u8]>>>>,
    length: u32,
    readers: u32,
    writer: bool,
}

/// In-memory chunk store with lease discipline.
///
/// Chunks are allocated up front from the content geometry, each segmented
/// into parts so transfer loops exercise part-wise iteration. The store
/// permits concurrent readable leases per chunk but at most one writable
/// lease; releasing is idempotent.
pub struct ChunkStore {
    slots: Vec<ChunkSlot>,
    part_size: u32,
}

impl ChunkStore {
    /// Creates a store for `chunk_total` chunks of `chunk_length` bytes,
    /// the last one trimmed to `total_length`.
    pub fn new(chunk_total: u32, chunk_length: u32, total_length: u64) -> Self {
        Self::with_part_size(chunk_total, chunk_length, total_length, DEFAULT_PART_SIZE)
    }

    pub fn with_part_size(
        chunk_total: u32,
        chunk_length: u32,
        total_length: u64,
        part_size: u32,
    ) -> Self {
        assert!(part_size > 0);

        let slots = (0..chunk_total)
            .map(|index| {
                let length = chunk_length_at(index, chunk_total, chunk_length, total_length);
                let parts = (0..length.div_ceil(part_size))
                    .map(|p| {
                        let part_len = (length - p * part_size).min(part_size) as usize;
                        Arc::new(Mutex::new(vec![0u8; part_len].into_boxed_slice()))
                    })
                    .collect();
                ChunkSlot {
                    parts,
                    length,
                    readers: 0,
                    writer: false,
                }
            })
            .collect();

        Self { slots, part_size }
    }

    pub fn chunk_total(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Acquires a lease on `index`. The returned handle is invalid, with
    /// the refusal attached, when the index is out of range or a writable
    /// lease is already held.
    pub fn get(&mut self, index: u32, writable: bool) -> ChunkHandle {
        let Some(slot) = self.slots.get_mut(index as usize) else {
            return ChunkHandle::refused(index, writable, StoreError::UnknownChunk(index));
        };

        if writable && slot.writer {
            return ChunkHandle::refused(index, writable, StoreError::WriterHeld(index));
        }

        if writable {
            slot.writer = true;
        } else {
            slot.readers += 1;
        }

        let view = ChunkView::new(slot.parts.clone(), self.part_size, slot.length);
        ChunkHandle::leased(index, writable, view)
    }

    /// Returns a lease to the store. Releasing an invalid or
    /// already-released handle is a no-op.
    pub fn release(&mut self, handle: &mut ChunkHandle) {
        if handle.take_view().is_none() {
            return;
        }

        let slot = &mut self.slots[handle.index() as usize];
        if handle.writable_requested() {
            slot.writer = false;
        } else {
            slot.readers = slot.readers.saturating_sub(1);
        }
    }

    /// Outstanding readable leases on `index`.
    pub fn readers(&self, index: u32) -> u32 {
        self.slots.get(index as usize).map_or(0, |s| s.readers)
    }

    /// Whether a writable lease is outstanding on `index`.
    pub fn has_writer(&self, index: u32) -> bool {
        self.slots.get(index as usize).is_some_and(|s| s.writer)
    }
}

fn chunk_length_at(index: u32, chunk_total: u32, chunk_length: u32, total_length: u64) -> u32 {
    if index + 1 < chunk_total {
        return chunk_length;
    }
    let tail = total_length - u64::from(chunk_length) * u64::from(chunk_total - 1);
    tail as u32
}
