use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use tokio::task::JoinHandle;

use super::error::TrackerError;
use super::state::{TrackerEvent, TrackerInfo, TrackerParameters, TrackerState};
use super::worker::{
    parse_compact_peers, parse_compact_peers6, TrackerSignal, TrackerWorker, WorkerSlots,
};
use crate::bencode::{decode, Value};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP(S) announce/scrape worker.
///
/// Each request runs as one task on the shared runtime; the terminal
/// signal crosses back to the list through the wired slots. Scrape support
/// requires the conventional `/announce` path segment.
pub struct HttpWorker {
    info: TrackerInfo,
    state: Arc<Mutex<TrackerState>>,
    slots: Mutex<Option<WorkerSlots>>,
    busy: Arc<AtomicBool>,
    disowned: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    runtime: tokio::runtime::Handle,
    client: Client,
}

impl HttpWorker {
    pub fn new(
        info: TrackerInfo,
        extra_tracker: bool,
        runtime: tokio::runtime::Handle,
    ) -> Result<Self, TrackerError> {
        let scrapable = scrape_url(&info.url).is_some();
        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;

        Ok(Self {
            info,
            state: Arc::new(Mutex::new(TrackerState::new(extra_tracker, scrapable))),
            slots: Mutex::new(None),
            busy: Arc::new(AtomicBool::new(false)),
            disowned: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            runtime,
            client,
        })
    }
}

impl TrackerWorker for HttpWorker {
    fn info(&self) -> &TrackerInfo {
        &self.info
    }

    fn state(&self) -> &Mutex<TrackerState> {
        &self.state
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn wire(&self, slots: WorkerSlots) {
        *self.slots.lock() = Some(slots);
    }

    fn send_event(&self, event: TrackerEvent) {
        self.close();
        self.disowned.store(false, Ordering::SeqCst);
        self.state.lock().latest_event = event;

        let Some(slots) = self.slots.lock().clone() else {
            return;
        };
        let params = slots.parameters();

        self.busy.store(true, Ordering::SeqCst);

        let client = self.client.clone();
        let info = self.info.clone();
        let state = self.state.clone();
        let busy = self.busy.clone();
        let disowned = self.disowned.clone();

        let task = self.runtime.spawn(async move {
            let result = announce(&client, &info, &params, event).await;
            busy.store(false, Ordering::SeqCst);
            if disowned.load(Ordering::SeqCst) {
                return;
            }

            match result {
                Ok(response) => {
                    {
                        let mut state = state.lock();
                        if let Some(interval) = response.interval {
                            state.set_normal_interval(interval);
                        }
                        if let Some(min) = response.min_interval {
                            state.min_interval = min;
                        }
                        if let Some(complete) = response.complete {
                            state.scrape_complete = complete;
                        }
                        if let Some(incomplete) = response.incomplete {
                            state.scrape_incomplete = incomplete;
                        }
                    }

                    let mut peers = response.peers;
                    peers.extend(response.peers6);
                    slots.emit(TrackerSignal::Success(peers));
                }
                Err(e) => slots.emit(TrackerSignal::Failure(e.to_string())),
            }
        });
        *self.task.lock() = Some(task);
    }

    fn send_scrape(&self) {
        self.close();
        self.disowned.store(false, Ordering::SeqCst);
        self.state.lock().latest_event = TrackerEvent::Scrape;

        let Some(slots) = self.slots.lock().clone() else {
            return;
        };

        self.busy.store(true, Ordering::SeqCst);

        let client = self.client.clone();
        let info = self.info.clone();
        let state = self.state.clone();
        let busy = self.busy.clone();
        let disowned = self.disowned.clone();

        let task = self.runtime.spawn(async move {
            let result = scrape(&client, &info).await;
            busy.store(false, Ordering::SeqCst);
            if disowned.load(Ordering::SeqCst) {
                return;
            }

            match result {
                Ok(stats) => {
                    {
                        let mut state = state.lock();
                        state.scrape_complete = stats.complete;
                        state.scrape_incomplete = stats.incomplete;
                        state.scrape_downloaded = stats.downloaded;
                    }
                    slots.emit(TrackerSignal::ScrapeSuccess);
                }
                Err(e) => slots.emit(TrackerSignal::ScrapeFailure(e.to_string())),
            }
        });
        *self.task.lock() = Some(task);
    }

    fn close(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.busy.store(false, Ordering::SeqCst);
    }

    fn disown(&self) {
        self.disowned.store(true, Ordering::SeqCst);
        self.task.lock().take();
        self.busy.store(false, Ordering::SeqCst);
    }
}

struct HttpAnnounce {
    interval: Option<u32>,
    min_interval: Option<u32>,
    complete: Option<u32>,
    incomplete: Option<u32>,
    peers: Vec<SocketAddr>,
    peers6: Vec<SocketAddr>,
}

async fn announce(
    client: &Client,
    info: &TrackerInfo,
    params: &TrackerParameters,
    event: TrackerEvent,
) -> Result<HttpAnnounce, TrackerError> {
    let mut url = format!(
        "{}?info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1&key={:08x}",
        info.url,
        url_encode(&info.info_hash),
        url_encode(&info.local_id),
        info.listen_port,
        params.uploaded_adjusted,
        params.completed_adjusted,
        params.download_left,
        info.key,
    );

    if params.numwant >= 0 {
        url.push_str(&format!("&numwant={}", params.numwant));
    }

    let event_str = event.as_str();
    if !event_str.is_empty() && event != TrackerEvent::Scrape {
        url.push_str(&format!("&event={event_str}"));
    }

    let response = client.get(&url).send().await?;
    let bytes = response.bytes().await?;

    let value = decode(&bytes)?;
    let dict = value
        .as_dict()
        .ok_or_else(|| TrackerError::InvalidResponse("expected dictionary".into()))?;

    if let Some(reason) = dict
        .get(b"failure reason".as_slice())
        .and_then(Value::as_str)
    {
        return Err(TrackerError::Failure(reason.to_string()));
    }

    let mut out = HttpAnnounce {
        interval: dict
            .get(b"interval".as_slice())
            .and_then(Value::as_integer)
            .map(|v| v as u32),
        min_interval: dict
            .get(b"min interval".as_slice())
            .and_then(Value::as_integer)
            .map(|v| v as u32),
        complete: dict
            .get(b"complete".as_slice())
            .and_then(Value::as_integer)
            .map(|v| v as u32),
        incomplete: dict
            .get(b"incomplete".as_slice())
            .and_then(Value::as_integer)
            .map(|v| v as u32),
        peers: Vec::new(),
        peers6: Vec::new(),
    };

    match dict.get(b"peers".as_slice()) {
        Some(Value::Bytes(compact)) => out.peers = parse_compact_peers(compact),
        Some(Value::List(list)) => {
            for peer in list {
                let Some(peer) = peer.as_dict() else { continue };
                let ip = peer
                    .get(b"ip".as_slice())
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse().ok());
                let port = peer
                    .get(b"port".as_slice())
                    .and_then(Value::as_integer)
                    .map(|p| p as u16);
                if let (Some(ip), Some(port)) = (ip, port) {
                    out.peers.push(SocketAddr::new(ip, port));
                }
            }
        }
        _ => {}
    }

    if let Some(compact) = dict.get(b"peers6".as_slice()).and_then(Value::as_bytes) {
        out.peers6 = parse_compact_peers6(compact);
    }

    Ok(out)
}

struct HttpScrape {
    complete: u32,
    incomplete: u32,
    downloaded: u32,
}

async fn scrape(client: &Client, info: &TrackerInfo) -> Result<HttpScrape, TrackerError> {
    let base = scrape_url(&info.url).ok_or_else(|| TrackerError::InvalidUrl(info.url.clone()))?;
    let url = format!("{}?info_hash={}", base, url_encode(&info.info_hash));

    let response = client.get(&url).send().await?;
    let bytes = response.bytes().await?;

    let value = decode(&bytes)?;
    let dict = value
        .as_dict()
        .ok_or_else(|| TrackerError::InvalidResponse("expected dictionary".into()))?;

    if let Some(reason) = dict
        .get(b"failure reason".as_slice())
        .and_then(Value::as_str)
    {
        return Err(TrackerError::Failure(reason.to_string()));
    }

    let entry = dict
        .get(b"files".as_slice())
        .and_then(Value::as_dict)
        .and_then(|files| files.get(info.info_hash.as_slice()))
        .and_then(Value::as_dict)
        .ok_or_else(|| TrackerError::InvalidResponse("no scrape entry for torrent".into()))?;

    let field = |key: &[u8]| {
        entry
            .get(key)
            .and_then(Value::as_integer)
            .unwrap_or_default() as u32
    };

    Ok(HttpScrape {
        complete: field(b"complete"),
        incomplete: field(b"incomplete"),
        downloaded: field(b"downloaded"),
    })
}

/// The conventional scrape URL: the last `/announce` path segment swapped
/// for `/scrape`. `None` when the URL does not admit the substitution.
pub(crate) fn scrape_url(announce_url: &str) -> Option<String> {
    let at = announce_url.rfind("/announce")?;
    Some(format!(
        "{}/scrape{}",
        &announce_url[..at],
        &announce_url[at + "/announce".len()..]
    ))
}

/// Percent-encodes binary query parameters.
pub(crate) fn url_encode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~' {
                (b as char).to_string()
            } else {
                format!("%{b:02X}")
            }
        })
        .collect()
}
