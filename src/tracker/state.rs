use std::time::{SystemTime, UNIX_EPOCH};

/// Default announce interval when a tracker does not supply one.
pub const DEFAULT_NORMAL_INTERVAL: u32 = 1800;

/// Default lower bound between announces.
pub const DEFAULT_MIN_INTERVAL: u32 = 600;

/// Seconds since the Unix epoch.
pub(crate) fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Announce lifecycle events, plus scrape for event bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TrackerEvent {
    None = 0,
    Completed = 1,
    Started = 2,
    Stopped = 3,
    Scrape = 4,
}

impl TrackerEvent {
    /// Query-string form for HTTP announces; empty for the periodic event.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Completed => "completed",
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Scrape => "scrape",
        }
    }

    /// Numeric id in the UDP announce packet.
    pub fn as_udp_id(&self) -> u32 {
        match self {
            TrackerEvent::None | TrackerEvent::Scrape => 0,
            TrackerEvent::Completed => 1,
            TrackerEvent::Started => 2,
            TrackerEvent::Stopped => 3,
        }
    }

    /// This event's position in an event bitmap.
    pub fn bit(&self) -> u32 {
        1 << (*self as u32)
    }
}

/// Identity a worker announces with.
#[derive(Debug, Clone)]
pub struct TrackerInfo {
    pub info_hash: [u8; 20],
    pub local_id: [u8; 20],
    pub url: String,
    pub key: u32,
    pub listen_port: u16,
}

/// Figures pulled by a worker immediately before each announce.
#[derive(Debug, Clone, Copy)]
pub struct TrackerParameters {
    pub numwant: i32,
    pub uploaded_adjusted: u64,
    pub completed_adjusted: u64,
    pub download_left: u64,
}

/// Mutable per-tracker counters, timestamps, and flags.
///
/// Shared between the worker's thread and the main domain; always accessed
/// under the worker's lock.
#[derive(Debug, Clone)]
pub struct TrackerState {
    pub enabled: bool,
    pub extra_tracker: bool,
    pub scrapable: bool,

    pub latest_event: TrackerEvent,

    pub normal_interval: u32,
    pub min_interval: u32,

    pub success_time_last: u64,
    pub success_counter: u32,
    pub failed_time_last: u64,
    pub failed_counter: u32,
    pub scrape_time_last: u64,
    pub scrape_counter: u32,

    pub latest_sum_peers: u32,
    pub latest_new_peers: u32,

    pub scrape_complete: u32,
    pub scrape_incomplete: u32,
    pub scrape_downloaded: u32,
}

impl TrackerState {
    pub fn new(extra_tracker: bool, scrapable: bool) -> Self {
        Self {
            enabled: true,
            extra_tracker,
            scrapable,
            latest_event: TrackerEvent::None,
            normal_interval: DEFAULT_NORMAL_INTERVAL,
            min_interval: DEFAULT_MIN_INTERVAL,
            success_time_last: 0,
            success_counter: 0,
            failed_time_last: 0,
            failed_counter: 0,
            scrape_time_last: 0,
            scrape_counter: 0,
            latest_sum_peers: 0,
            latest_new_peers: 0,
            scrape_complete: 0,
            scrape_incomplete: 0,
            scrape_downloaded: 0,
        }
    }

    /// Stores a tracker-supplied interval, clamped to a sane range.
    pub fn set_normal_interval(&mut self, seconds: u32) {
        self.normal_interval = seconds.clamp(60, 24 * 60 * 60);
    }

    /// Earliest time the next periodic announce is due after a success.
    /// Zero when no announce has succeeded yet.
    pub fn success_time_next(&self) -> u64 {
        if self.success_counter == 0 {
            return 0;
        }
        self.success_time_last + u64::from(self.normal_interval)
    }

    /// Earliest retry time after failures: exponential backoff doubling
    /// from five seconds, capped near five minutes.
    pub fn failed_time_next(&self) -> u64 {
        if self.failed_counter == 0 {
            return 0;
        }
        self.failed_time_last + (5u64 << self.failed_counter.min(6))
    }

    pub fn clear_stats(&mut self) {
        self.success_counter = 0;
        self.failed_counter = 0;
        self.scrape_counter = 0;
        self.latest_sum_peers = 0;
        self.latest_new_peers = 0;
    }
}
