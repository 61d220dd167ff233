//! Byte-rate throttling for peer transfers.
//!
//! Each connection direction owns a [`ThrottleNode`]: a leaf registered
//! with one of the two global [`ThrottleList`] trees (upload and
//! download). The list hands out per-tick byte quotas; a node whose quota
//! runs dry is deactivated and its connection drops the matching poll
//! interest until the next refill re-arms it through the node's activation
//! callback.
//!
//! All list operations run on the main I/O domain; no locking is involved.

mod list;
mod rate;

pub use list::{ActivateSlot, ThrottleList, ThrottleNode};
pub use rate::RateMeter;
