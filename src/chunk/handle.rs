use std::sync::Arc;

use parking_lot::Mutex;

use super::error::StoreError;

/// Cursor over the parts of a chunk's memory view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartCursor(pub(crate) usize);

impl PartCursor {
    /// Advances to the next part.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// The memory of one chunk, segmented into one or more parts.
///
/// Parts are fixed-size segments except for the tail; byte positions are
/// chunk-relative and a [`PartCursor`] names the part a position falls in.
/// Access goes through [`ChunkView::with_part`], which borrows the part's
/// bytes for the duration of one read or write attempt.
#[derive(Clone)]
pub struct ChunkView {
    parts: Vec<Arc<Mutex<Box<[u8]>>>>,
    part_size: u32,
    length: u32,
}

impl ChunkView {
    pub(crate) fn new(parts: Vec<Arc<Mutex<Box<[u8]>>>>, part_size: u32, length: u32) -> Self {
        Self {
            parts,
            part_size,
            length,
        }
    }

    /// Chunk length in bytes.
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Cursor for the part containing `byte`.
    pub fn at_position(&self, byte: u32) -> PartCursor {
        PartCursor((byte / self.part_size) as usize)
    }

    /// Bytes available in `cursor`'s part from position `byte` onward.
    ///
    /// Zero when `byte` lies outside the part or past the chunk end.
    pub fn part_remaining(&self, cursor: PartCursor, byte: u32) -> u32 {
        let part_begin = cursor.0 as u32 * self.part_size;
        let part_end = (part_begin + self.part_size).min(self.length);

        if cursor.0 >= self.parts.len() || byte < part_begin || byte >= part_end {
            return 0;
        }
        part_end - byte
    }

    /// Runs `f` over the part's bytes from position `byte` to the part end.
    ///
    /// Returns `None` when the position does not fall inside `cursor`'s
    /// part.
    pub fn with_part<R>(
        &self,
        cursor: PartCursor,
        byte: u32,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Option<R> {
        let avail = self.part_remaining(cursor, byte);
        if avail == 0 {
            return None;
        }

        let offset = (byte - cursor.0 as u32 * self.part_size) as usize;
        let mut part = self.parts[cursor.0].lock();
        Some(f(&mut part[offset..offset + avail as usize]))
    }
}

/// A reference-counted lease on one chunk's memory.
///
/// Acquired from the store as either readable or writable; an invalid
/// handle carries the store's refusal instead of a view. Release through
/// the store is idempotent.
pub struct ChunkHandle {
    index: u32,
    writable: bool,
    view: Option<ChunkView>,
    error: Option<StoreError>,
}

impl ChunkHandle {
    pub(crate) fn leased(index: u32, writable: bool, view: ChunkView) -> Self {
        Self {
            index,
            writable,
            view: Some(view),
            error: None,
        }
    }

    pub(crate) fn refused(index: u32, writable: bool, error: StoreError) -> Self {
        Self {
            index,
            writable,
            view: None,
            error: Some(error),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn is_valid(&self) -> bool {
        self.view.is_some()
    }

    /// Any valid lease may read; only a writable lease may write.
    pub fn is_readable(&self) -> bool {
        self.view.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.view.is_some() && self.writable
    }

    pub(crate) fn writable_requested(&self) -> bool {
        self.writable
    }

    /// The store's refusal, for invalid handles.
    pub fn error(&self) -> Option<&StoreError> {
        self.error.as_ref()
    }

    /// The chunk memory view; `None` once released or refused.
    pub fn chunk(&self) -> Option<&ChunkView> {
        self.view.as_ref()
    }

    pub(crate) fn take_view(&mut self) -> Option<ChunkView> {
        self.view.take()
    }
}
