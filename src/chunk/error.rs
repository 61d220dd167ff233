use thiserror::Error;

/// Reasons the store refused a lease.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chunk {0} is out of range")]
    UnknownChunk(u32),

    #[error("chunk {0} already has a writable lease")]
    WriterHeld(u32),
}
