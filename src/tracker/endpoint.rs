use std::sync::Arc;

use super::state::{TrackerEvent, TrackerState};
use super::worker::{TrackerId, TrackerWorker};

/// One tracker endpoint: a group index plus the shared transport worker.
///
/// The facet the list manipulates; state reads go through snapshots taken
/// under the worker's lock.
pub struct Tracker {
    id: TrackerId,
    group: u32,
    worker: Arc<dyn TrackerWorker>,
}

impl Tracker {
    pub(crate) fn new(id: TrackerId, worker: Arc<dyn TrackerWorker>) -> Self {
        Self {
            id,
            group: 0,
            worker,
        }
    }

    pub fn id(&self) -> TrackerId {
        self.id
    }

    pub fn group(&self) -> u32 {
        self.group
    }

    pub(crate) fn set_group(&mut self, group: u32) {
        self.group = group;
    }

    pub fn url(&self) -> &str {
        &self.worker.info().url
    }

    pub fn worker(&self) -> &Arc<dyn TrackerWorker> {
        &self.worker
    }

    /// A snapshot of the tracker's state, taken under the worker's lock.
    pub fn state(&self) -> TrackerState {
        self.worker.state().lock().clone()
    }

    pub fn latest_event(&self) -> TrackerEvent {
        self.worker.state().lock().latest_event
    }

    pub fn is_busy(&self) -> bool {
        self.worker.is_busy()
    }

    pub fn is_busy_not_scrape(&self) -> bool {
        self.is_busy() && self.latest_event() != TrackerEvent::Scrape
    }

    pub fn is_usable(&self) -> bool {
        self.worker.state().lock().enabled
    }

    pub fn is_scrapable(&self) -> bool {
        self.worker.state().lock().scrapable
    }

    pub fn is_extra_tracker(&self) -> bool {
        self.worker.state().lock().extra_tracker
    }

    /// Whether selection may hand this tracker a new request.
    pub fn can_request_state(&self) -> bool {
        self.is_usable() && !self.is_busy()
    }

    pub fn clear_stats(&self) {
        self.worker.state().lock().clear_stats();
    }
}
