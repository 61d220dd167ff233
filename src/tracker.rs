//! Tracker coordination: the tiered tracker list and its workers.
//!
//! A [`TrackerList`] keeps tracker endpoints ordered by group (tier), with
//! the front of each group as its primary. Selection walks the list
//! honoring per-tracker backoff, successful announces promote to group
//! front, and startup shuffles each group to spread load.
//!
//! Transports are [`TrackerWorker`]s chosen by URL scheme — HTTP(S), UDP,
//! and optionally DHT. Workers run in their own scheduling domain; their
//! terminal outcomes cross back to the main domain as [`TrackerSignal`]s
//! drained by [`TrackerList::dispatch`], and the shared per-tracker
//! [`TrackerState`] is always touched under the worker's lock.

mod endpoint;
mod error;
mod http;
mod list;
mod state;
mod udp;
mod worker;

pub use endpoint::Tracker;
pub use error::TrackerError;
pub use http::HttpWorker;
pub use list::{AnnounceTotals, MessageSlot, SuccessSlot, TrackerList, TrackerSlot};
pub use state::{
    TrackerEvent, TrackerInfo, TrackerParameters, TrackerState, DEFAULT_MIN_INTERVAL,
    DEFAULT_NORMAL_INTERVAL,
};
pub use udp::UdpWorker;
pub use worker::{DhtBuilder, TrackerId, TrackerSignal, TrackerWorker, WorkerSet, WorkerSlots};

#[cfg(test)]
mod tests;
