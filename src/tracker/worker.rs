use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use super::error::TrackerError;
use super::http::HttpWorker;
use super::state::{TrackerEvent, TrackerInfo, TrackerParameters, TrackerState};
use super::udp::UdpWorker;

/// Stable identity of a tracker within its list, independent of position.
pub type TrackerId = usize;

/// Terminal outcomes a worker reports back to the list.
///
/// Workers run in their own scheduling domain; signals cross into the main
/// domain over the list's channel and are drained by a single consumer.
#[derive(Debug, Clone)]
pub enum TrackerSignal {
    Enabled,
    Disabled,
    Success(Vec<SocketAddr>),
    Failure(String),
    ScrapeSuccess,
    ScrapeFailure(String),
}

/// Callback surface the list wires into a worker at insertion.
#[derive(Clone)]
pub struct WorkerSlots {
    id: TrackerId,
    signals: Sender<(TrackerId, TrackerSignal)>,
    parameters: Arc<dyn Fn() -> TrackerParameters + Send + Sync>,
}

impl WorkerSlots {
    pub(crate) fn new(
        id: TrackerId,
        signals: Sender<(TrackerId, TrackerSignal)>,
        parameters: Arc<dyn Fn() -> TrackerParameters + Send + Sync>,
    ) -> Self {
        Self {
            id,
            signals,
            parameters,
        }
    }

    pub fn id(&self) -> TrackerId {
        self.id
    }

    /// Pulls fresh announce figures from the enclosing download.
    pub fn parameters(&self) -> TrackerParameters {
        (self.parameters)()
    }

    /// Posts a signal to the list; dropped silently if the list is gone.
    pub fn emit(&self, signal: TrackerSignal) {
        let _ = self.signals.send((self.id, signal));
    }
}

/// A transport-specific tracker worker.
///
/// The list drives workers through this narrow surface; `TrackerState`
/// mutations on either side go through the lock returned by
/// [`TrackerWorker::state`].
pub trait TrackerWorker: Send + Sync {
    fn info(&self) -> &TrackerInfo;

    /// The shared mutable state; lock before reading or writing.
    fn state(&self) -> &Mutex<TrackerState>;

    /// Whether a request is in flight.
    fn is_busy(&self) -> bool;

    /// Wires the list's callback surface; called once at insertion.
    fn wire(&self, slots: WorkerSlots);

    /// Starts an announce carrying `event`. Any in-flight request is closed
    /// first.
    fn send_event(&self, event: TrackerEvent);

    /// Starts a scrape.
    fn send_scrape(&self);

    /// Cancels any in-flight request.
    fn close(&self);

    /// Lets any in-flight request run to completion without callbacks.
    fn disown(&self);
}

/// Builder for `dht://` workers; present only when DHT is permitted in
/// this runtime.
pub type DhtBuilder =
    Box<dyn Fn(TrackerInfo) -> Result<Arc<dyn TrackerWorker>, TrackerError> + Send + Sync>;

/// Constructs workers by URL scheme.
pub struct WorkerSet {
    runtime: tokio::runtime::Handle,
    dht: Option<DhtBuilder>,
}

impl WorkerSet {
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self { runtime, dht: None }
    }

    /// Permits `dht://` trackers, built through `builder`.
    pub fn with_dht(mut self, builder: DhtBuilder) -> Self {
        self.dht = Some(builder);
        self
    }

    /// Builds the worker matching `info.url`'s scheme, or `None` for a
    /// scheme this runtime does not speak.
    pub fn build(
        &self,
        info: TrackerInfo,
        extra_tracker: bool,
    ) -> Result<Option<Arc<dyn TrackerWorker>>, TrackerError> {
        if info.url.starts_with("http://") || info.url.starts_with("https://") {
            let worker = HttpWorker::new(info, extra_tracker, self.runtime.clone())?;
            return Ok(Some(Arc::new(worker)));
        }

        if info.url.starts_with("udp://") {
            let worker = UdpWorker::new(info, extra_tracker, self.runtime.clone())?;
            return Ok(Some(Arc::new(worker)));
        }

        if info.url.starts_with("dht://") {
            return match &self.dht {
                Some(builder) => builder(info).map(Some),
                None => Ok(None),
            };
        }

        Ok(None)
    }
}

/// Parses IPv4 compact peer entries: 4 address bytes plus a big-endian
/// port each.
pub(crate) fn parse_compact_peers(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(6)
        .map(|b| {
            let ip = Ipv4Addr::new(b[0], b[1], b[2], b[3]);
            let port = u16::from_be_bytes([b[4], b[5]]);
            SocketAddr::new(IpAddr::V4(ip), port)
        })
        .collect()
}

/// Parses IPv6 compact peer entries: 16 address bytes plus a big-endian
/// port each.
pub(crate) fn parse_compact_peers6(data: &[u8]) -> Vec<SocketAddr> {
    data.chunks_exact(18)
        .map(|b| {
            let mut ip = [0u8; 16];
            ip.copy_from_slice(&b[..16]);
            let port = u16::from_be_bytes([b[16], b[17]]);
            SocketAddr::new(IpAddr::V6(Ipv6Addr::from(ip)), port)
        })
        .collect()
}
