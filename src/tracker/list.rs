use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use rand::seq::SliceRandom;
use rand::Rng as _;
use tracing::{debug, info, warn};

use super::endpoint::Tracker;
use super::state::{unix_seconds, TrackerEvent, TrackerInfo};
use super::worker::{TrackerId, TrackerSignal, TrackerWorker, WorkerSet, WorkerSlots};
use crate::error::EngineError;

/// Minimum spacing between scrapes of one tracker.
const SCRAPE_INTERVAL: u64 = 10 * 60;

/// Live announce figures shared with every worker.
///
/// Workers pull these through their parameters slot immediately before each
/// announce; the enclosing download keeps them current.
#[derive(Debug)]
pub struct AnnounceTotals {
    pub uploaded: AtomicU64,
    pub completed: AtomicU64,
    pub left: AtomicU64,
    pub numwant: AtomicI32,
}

impl AnnounceTotals {
    pub fn new(left: u64) -> Self {
        Self {
            uploaded: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            left: AtomicU64::new(left),
            numwant: AtomicI32::new(-1),
        }
    }

    fn parameters(&self) -> super::state::TrackerParameters {
        super::state::TrackerParameters {
            numwant: self.numwant.load(Ordering::Relaxed),
            uploaded_adjusted: self.uploaded.load(Ordering::Relaxed),
            completed_adjusted: self.completed.load(Ordering::Relaxed),
            download_left: self.left.load(Ordering::Relaxed),
        }
    }
}

/// Fed the tracker and its deduplicated address list; returns how many
/// peers were new to the download.
pub type SuccessSlot = Box<dyn FnMut(&Tracker, &[SocketAddr]) -> u32>;
pub type MessageSlot = Box<dyn FnMut(&Tracker, &str)>;
pub type TrackerSlot = Box<dyn FnMut(&Tracker)>;

/// The ordered, group-tiered tracker list.
///
/// Sorted by group ascending; within a group insertion order is preserved
/// except for promotion, and the list is never reordered across group
/// boundaries. The entry at a group's start is the primary, the rest are
/// fallbacks.
pub struct TrackerList {
    trackers: Vec<Tracker>,
    next_id: TrackerId,

    workers: WorkerSet,
    totals: Arc<AnnounceTotals>,
    info_hash: [u8; 20],
    local_id: [u8; 20],
    listen_port: u16,
    key: u32,

    signal_tx: Sender<(TrackerId, TrackerSignal)>,
    signal_rx: Receiver<(TrackerId, TrackerSignal)>,

    slot_success: Option<SuccessSlot>,
    slot_failed: Option<MessageSlot>,
    slot_scrape_success: Option<TrackerSlot>,
    slot_scrape_failed: Option<MessageSlot>,
    slot_tracker_enabled: Option<TrackerSlot>,
    slot_tracker_disabled: Option<TrackerSlot>,
}

impl TrackerList {
    pub fn new(
        workers: WorkerSet,
        info_hash: [u8; 20],
        local_id: [u8; 20],
        listen_port: u16,
        totals: Arc<AnnounceTotals>,
    ) -> Self {
        let (signal_tx, signal_rx) = crossbeam_channel::unbounded();
        Self {
            trackers: Vec::new(),
            next_id: 0,
            workers,
            totals,
            info_hash,
            local_id,
            listen_port,
            key: rand::rng().random(),
            signal_tx,
            signal_rx,
            slot_success: None,
            slot_failed: None,
            slot_scrape_success: None,
            slot_scrape_failed: None,
            slot_tracker_enabled: None,
            slot_tracker_disabled: None,
        }
    }

    pub fn set_slot_success(&mut self, slot: SuccessSlot) {
        self.slot_success = Some(slot);
    }

    pub fn set_slot_failed(&mut self, slot: MessageSlot) {
        self.slot_failed = Some(slot);
    }

    pub fn set_slot_scrape_success(&mut self, slot: TrackerSlot) {
        self.slot_scrape_success = Some(slot);
    }

    pub fn set_slot_scrape_failed(&mut self, slot: MessageSlot) {
        self.slot_scrape_failed = Some(slot);
    }

    pub fn set_slot_tracker_enabled(&mut self, slot: TrackerSlot) {
        self.slot_tracker_enabled = Some(slot);
    }

    pub fn set_slot_tracker_disabled(&mut self, slot: TrackerSlot) {
        self.slot_tracker_disabled = Some(slot);
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn get(&self, at: usize) -> Option<&Tracker> {
        self.trackers.get(at)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tracker> {
        self.trackers.iter()
    }

    pub fn has_active(&self) -> bool {
        self.trackers.iter().any(Tracker::is_busy)
    }

    pub fn has_active_not_scrape(&self) -> bool {
        self.trackers.iter().any(Tracker::is_busy_not_scrape)
    }

    pub fn has_usable(&self) -> bool {
        self.trackers.iter().any(Tracker::is_usable)
    }

    pub fn count_active(&self) -> usize {
        self.trackers.iter().filter(|t| t.is_busy()).count()
    }

    pub fn count_usable(&self) -> usize {
        self.trackers.iter().filter(|t| t.is_usable()).count()
    }

    pub fn find_url(&self, url: &str) -> Option<usize> {
        self.trackers.iter().position(|t| t.url() == url)
    }

    pub fn find_usable(&self, from: usize) -> Option<usize> {
        (from..self.trackers.len()).find(|&i| self.trackers[i].is_usable())
    }

    /// Inserts a tracker at the end of its group and wires the worker's
    /// callback surface.
    pub fn insert(&mut self, group: u32, worker: Arc<dyn TrackerWorker>) -> usize {
        let id = self.next_id;
        self.next_id += 1;

        let totals = self.totals.clone();
        worker.wire(WorkerSlots::new(
            id,
            self.signal_tx.clone(),
            Arc::new(move || totals.parameters()),
        ));

        let mut tracker = Tracker::new(id, worker);
        tracker.set_group(group);

        let at = self.end_group(group);
        info!(group, url = tracker.url(), "added tracker");
        self.trackers.insert(at, tracker);

        if let Some(slot) = &mut self.slot_tracker_enabled {
            slot(&self.trackers[at]);
        }

        at
    }

    /// Builds a worker for `url` by scheme and inserts it.
    ///
    /// An unrecognized scheme is skipped for automatic insertion but is an
    /// input error when the tracker was user-supplied (`extra_tracker`).
    pub fn insert_url(
        &mut self,
        group: u32,
        url: &str,
        extra_tracker: bool,
    ) -> Result<(), EngineError> {
        let info = TrackerInfo {
            info_hash: self.info_hash,
            local_id: self.local_id,
            url: url.to_string(),
            key: self.key,
            listen_port: self.listen_port,
        };

        let built = match self.workers.build(info, extra_tracker) {
            Ok(built) => built,
            Err(e) => {
                warn!(url, error = %e, "tracker worker construction failed");
                if extra_tracker {
                    return Err(EngineError::Input(format!(
                        "could not use tracker url {url}: {e}"
                    )));
                }
                return Ok(());
            }
        };

        match built {
            Some(worker) => {
                self.insert(group, worker);
                Ok(())
            }
            None => {
                warn!(url, "could not find matching tracker protocol");
                if extra_tracker {
                    Err(EngineError::Input(format!(
                        "could not find matching tracker protocol (url:{url})"
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Index of the first entry with group >= `group`.
    pub fn begin_group(&self, group: u32) -> usize {
        self.trackers
            .iter()
            .position(|t| group <= t.group())
            .unwrap_or(self.trackers.len())
    }

    /// Index one past the last entry of `group`.
    pub fn end_group(&self, group: u32) -> usize {
        self.trackers
            .iter()
            .position(|t| group < t.group())
            .unwrap_or(self.trackers.len())
    }

    /// One past the highest group in the list.
    pub fn size_group(&self) -> u32 {
        self.trackers.last().map_or(0, |t| t.group() + 1)
    }

    /// Deterministic next tracker to try, starting the walk at `from`.
    ///
    /// The first requestable entry is the preferred candidate; if it has
    /// never failed it wins outright. Otherwise later requestable entries
    /// are weighed by their backoff clocks, and a healthy successor that
    /// will be ready before the preferred one's retry short-circuits the
    /// scan.
    pub fn find_next_to_request(&self, from: usize) -> Option<usize> {
        let mut preferred = (from..self.trackers.len())
            .find(|&i| self.trackers[i].can_request_state())?;
        let mut preferred_state = self.trackers[preferred].state();

        if preferred_state.failed_counter == 0 {
            return Some(preferred);
        }

        for at in preferred + 1..self.trackers.len() {
            if !self.trackers[at].can_request_state() {
                continue;
            }

            let state = self.trackers[at].state();

            if state.failed_counter != 0 {
                if state.failed_time_next() < preferred_state.failed_time_next() {
                    preferred = at;
                    preferred_state = state;
                }
            } else {
                if state.success_time_next() < preferred_state.failed_time_next() {
                    preferred = at;
                }
                break;
            }
        }

        Some(preferred)
    }

    /// Swaps the entry to the front of its group. Promoting a group's
    /// first entry is a no-op.
    pub fn promote(&mut self, at: usize) -> usize {
        let first = self.begin_group(self.trackers[at].group());
        self.trackers.swap(first, at);
        first
    }

    /// Left-rotates one group, moving its current front to the back.
    pub fn cycle_group(&mut self, group: u32) {
        let begin = self.begin_group(group);
        if begin >= self.trackers.len() || self.trackers[begin].group() != group {
            return;
        }

        let mut at = begin;
        while at + 1 < self.trackers.len() && self.trackers[at + 1].group() == group {
            self.trackers.swap(at, at + 1);
            at += 1;
        }
    }

    /// Independently shuffles each group's internal order.
    pub fn randomize_group_entries(&mut self) {
        let mut rng = rand::rng();

        let mut begin = 0;
        while begin < self.trackers.len() {
            let end = self.end_group(self.trackers[begin].group());
            self.trackers[begin..end].shuffle(&mut rng);
            begin = end;
        }
    }

    /// Dispatches an announce event to the tracker. Scrape events and
    /// unusable trackers are refused; a tracker busy with a scrape has the
    /// scrape closed first, one busy with an announce is left alone.
    pub fn send_event(&mut self, at: usize, event: TrackerEvent) {
        let Some(tracker) = self.trackers.get(at) else {
            return;
        };

        if !tracker.is_usable() || event == TrackerEvent::Scrape {
            return;
        }

        if tracker.is_busy() {
            if tracker.latest_event() != TrackerEvent::Scrape {
                return;
            }
            tracker.worker().close();
        }

        info!(event = event.as_str(), group = tracker.group(), url = tracker.url(), "sending event");
        tracker.worker().send_event(event);
    }

    /// Dispatches a scrape unless the tracker is busy, unusable, not
    /// scrapable, or was scraped within the last ten minutes.
    pub fn send_scrape(&mut self, at: usize) {
        let Some(tracker) = self.trackers.get(at) else {
            return;
        };

        if tracker.is_busy() || !tracker.is_usable() || !tracker.is_scrapable() {
            return;
        }

        if tracker.state().scrape_time_last + SCRAPE_INTERVAL > unix_seconds() {
            return;
        }

        info!(group = tracker.group(), url = tracker.url(), "sending scrape");
        tracker.worker().send_scrape();
    }

    /// Closes every busy tracker whose latest event is NOT in the bitmap.
    pub fn close_all_excluding(&mut self, event_bitmap: u32) {
        for tracker in &self.trackers {
            if event_bitmap & tracker.latest_event().bit() != 0 {
                continue;
            }
            tracker.worker().close();
        }
    }

    /// Disowns every tracker whose latest event IS in the bitmap.
    pub fn disown_all_including(&mut self, event_bitmap: u32) {
        for tracker in &self.trackers {
            if event_bitmap & tracker.latest_event().bit() != 0 {
                tracker.worker().disown();
            }
        }
    }

    pub fn clear_stats(&mut self) {
        for tracker in &self.trackers {
            tracker.clear_stats();
        }
    }

    /// Flips a tracker's enabled flag, firing the matching slot on change.
    pub fn set_tracker_enabled(&mut self, at: usize, enabled: bool) {
        let Some(tracker) = self.trackers.get(at) else {
            return;
        };

        {
            let mut state = tracker.worker().state().lock();
            if state.enabled == enabled {
                return;
            }
            state.enabled = enabled;
        }

        let slot = if enabled {
            &mut self.slot_tracker_enabled
        } else {
            &mut self.slot_tracker_disabled
        };
        if let Some(slot) = slot {
            slot(&self.trackers[at]);
        }
    }

    /// Drains worker signals on the main domain, running the receive
    /// handlers. Signals from trackers no longer in the list are dropped.
    pub fn dispatch(&mut self) {
        while let Ok((id, signal)) = self.signal_rx.try_recv() {
            let Some(at) = self.trackers.iter().position(|t| t.id() == id) else {
                debug!(id, "signal from removed tracker dropped");
                continue;
            };

            let outcome = match signal {
                TrackerSignal::Enabled => {
                    if let Some(slot) = &mut self.slot_tracker_enabled {
                        slot(&self.trackers[at]);
                    }
                    Ok(())
                }
                TrackerSignal::Disabled => {
                    if let Some(slot) = &mut self.slot_tracker_disabled {
                        slot(&self.trackers[at]);
                    }
                    Ok(())
                }
                TrackerSignal::Success(addrs) => self.receive_success(at, addrs),
                TrackerSignal::Failure(msg) => self.receive_failed(at, &msg),
                TrackerSignal::ScrapeSuccess => self.receive_scrape_success(at),
                TrackerSignal::ScrapeFailure(msg) => self.receive_scrape_failed(at, &msg),
            };

            if let Err(e) = outcome {
                warn!(error = %e, "tracker signal dispatch failed");
            }
        }
    }

    /// Announce success: promote within the group, settle counters under
    /// the worker lock, then hand the deduplicated addresses to the
    /// external success slot.
    pub fn receive_success(
        &mut self,
        at: usize,
        mut addrs: Vec<SocketAddr>,
    ) -> Result<(), EngineError> {
        let tracker = self
            .trackers
            .get(at)
            .ok_or(EngineError::Internal("receive_success on unknown tracker"))?;
        if tracker.is_busy() {
            return Err(EngineError::Internal("receive_success on a busy tracker"));
        }

        let at = self.promote(at);

        addrs.sort();
        addrs.dedup();

        let tracker = &self.trackers[at];
        info!(peers = addrs.len(), url = tracker.url(), "announce succeeded");

        {
            let mut state = tracker.worker().state().lock();
            state.success_time_last = unix_seconds();
            state.success_counter += 1;
            state.failed_counter = 0;
            state.latest_sum_peers = addrs.len() as u32;
        }

        if let Some(slot) = &mut self.slot_success {
            let new_peers = slot(&self.trackers[at], &addrs);
            self.trackers[at].worker().state().lock().latest_new_peers = new_peers;
        }

        Ok(())
    }

    /// Announce failure: bump the failure clock without touching the
    /// success counter.
    pub fn receive_failed(&mut self, at: usize, msg: &str) -> Result<(), EngineError> {
        let tracker = self
            .trackers
            .get(at)
            .ok_or(EngineError::Internal("receive_failed on unknown tracker"))?;
        if tracker.is_busy() {
            return Err(EngineError::Internal("receive_failed on a busy tracker"));
        }

        info!(url = tracker.url(), msg, "announce failed");

        {
            let mut state = tracker.worker().state().lock();
            state.failed_time_last = unix_seconds();
            state.failed_counter += 1;
        }

        if let Some(slot) = &mut self.slot_failed {
            slot(&self.trackers[at], msg);
        }

        Ok(())
    }

    pub fn receive_scrape_success(&mut self, at: usize) -> Result<(), EngineError> {
        let tracker = self.trackers.get(at).ok_or(EngineError::Internal(
            "receive_scrape_success on unknown tracker",
        ))?;
        if tracker.is_busy() {
            return Err(EngineError::Internal(
                "receive_scrape_success on a busy tracker",
            ));
        }

        info!(url = tracker.url(), "scrape succeeded");

        {
            let mut state = tracker.worker().state().lock();
            state.scrape_time_last = unix_seconds();
            state.scrape_counter += 1;
        }

        if let Some(slot) = &mut self.slot_scrape_success {
            slot(&self.trackers[at]);
        }

        Ok(())
    }

    pub fn receive_scrape_failed(&mut self, at: usize, msg: &str) -> Result<(), EngineError> {
        let tracker = self.trackers.get(at).ok_or(EngineError::Internal(
            "receive_scrape_failed on unknown tracker",
        ))?;
        if tracker.is_busy() {
            return Err(EngineError::Internal(
                "receive_scrape_failed on a busy tracker",
            ));
        }

        info!(url = tracker.url(), msg, "scrape failed");

        if let Some(slot) = &mut self.slot_scrape_failed {
            slot(&self.trackers[at], msg);
        }

        Ok(())
    }
}
