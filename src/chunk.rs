//! The shared chunk store and its lease discipline.
//!
//! Content is held as fixed-size chunks, each segmented into parts.
//! Connections acquire chunks as reference-counted leases: writable for
//! incoming blocks, readable for outgoing ones. The store guarantees
//! at most one writable lease per chunk while permitting concurrent
//! readable leases, and releasing a lease is idempotent so every teardown
//! path may release unconditionally.
//!
//! Persistence and integrity hashing live outside this crate; the store
//! here is the in-memory region transfer loops read and write through.

mod error;
mod handle;
mod store;

pub use error::StoreError;
pub use handle::{ChunkHandle, ChunkView, PartCursor};
pub use store::ChunkStore;
