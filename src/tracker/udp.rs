use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut};
use parking_lot::Mutex;
use rand::Rng as _;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::error::TrackerError;
use super::state::{
    unix_seconds, TrackerEvent, TrackerInfo, TrackerParameters, TrackerState,
    DEFAULT_MIN_INTERVAL,
};
use super::worker::{parse_compact_peers, TrackerSignal, TrackerWorker, WorkerSlots};

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

const UDP_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RETRIES: u32 = 3;

const CONNECT_RESPONSE_LEN: usize = 16;
const ANNOUNCE_REQUEST_LEN: usize = 98;
const ANNOUNCE_RESPONSE_LEN: usize = 20;

/// UDP announce worker speaking the connect/announce exchange.
///
/// The protocol has no scrape here; UDP trackers are inserted
/// non-scrapable. Announce responses carry swarm counts, which land in the
/// state's scrape fields under the lock.
pub struct UdpWorker {
    info: TrackerInfo,
    state: Arc<Mutex<TrackerState>>,
    slots: Mutex<Option<WorkerSlots>>,
    busy: Arc<AtomicBool>,
    disowned: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    runtime: tokio::runtime::Handle,
}

impl UdpWorker {
    pub fn new(
        info: TrackerInfo,
        extra_tracker: bool,
        runtime: tokio::runtime::Handle,
    ) -> Result<Self, TrackerError> {
        parse_udp_url(&info.url)?;

        Ok(Self {
            info,
            state: Arc::new(Mutex::new(TrackerState::new(extra_tracker, false))),
            slots: Mutex::new(None),
            busy: Arc::new(AtomicBool::new(false)),
            disowned: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            runtime,
        })
    }
}

impl TrackerWorker for UdpWorker {
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

        let info = self.info.clone();
        let state = self.state.clone();
        let busy = self.busy.clone();
        let disowned = self.disowned.clone();

        let task = self.runtime.spawn(async move {
            let result = exchange(&info, &params, event).await;
            busy.store(false, Ordering::SeqCst);
            if disowned.load(Ordering::SeqCst) {
                return;
            }

            match result {
                Ok(announce) => {
                    {
                        let mut state = state.lock();
                        state.set_normal_interval(announce.interval);
                        state.min_interval = DEFAULT_MIN_INTERVAL;
                        state.scrape_incomplete = announce.leechers;
                        state.scrape_complete = announce.seeders;
                        state.scrape_time_last = unix_seconds();
                    }
                    slots.emit(TrackerSignal::Success(announce.peers));
                }
                Err(e) => slots.emit(TrackerSignal::Failure(e.to_string())),
            }
        });
        *self.task.lock() = Some(task);
    }

    fn send_scrape(&self) {
        // UDP trackers are inserted non-scrapable; the list never routes a
        // scrape here.
        if let Some(slots) = self.slots.lock().clone() {
            slots.emit(TrackerSignal::ScrapeFailure(
                "udp tracker does not support scrape".into(),
            ));
        }
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

#[derive(Debug)]
pub(crate) struct UdpAnnounce {
    pub interval: u32,
    pub leechers: u32,
    pub seeders: u32,
    pub peers: Vec<SocketAddr>,
}

async fn exchange(
    info: &TrackerInfo,
    params: &TrackerParameters,
    event: TrackerEvent,
) -> Result<UdpAnnounce, TrackerError> {
    let (host, port) = parse_udp_url(&info.url)?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect((host.as_str(), port)).await?;

    let transaction_id: u32 = rand::rng().random();
    let request = build_connect_request(transaction_id);
    let response = send_and_receive(&socket, &request, CONNECT_RESPONSE_LEN).await?;
    let connection_id = parse_connect_response(&response, transaction_id)?;

    let transaction_id: u32 = rand::rng().random();
    let request = build_announce_request(connection_id, transaction_id, info, params, event);
    let response = send_and_receive(&socket, &request, ANNOUNCE_RESPONSE_LEN).await?;
    parse_announce_response(&response, transaction_id)
}

async fn send_and_receive(
    socket: &UdpSocket,
    request: &[u8],
    min_response_len: usize,
) -> Result<Vec<u8>, TrackerError> {
    let mut buf = vec![0u8; 2048];

    for attempt in 0..MAX_RETRIES {
        socket.send(request).await?;

        match timeout(UDP_TIMEOUT * (1 << attempt), socket.recv(&mut buf)).await {
            Ok(Ok(n)) if n >= min_response_len => return Ok(buf[..n].to_vec()),
            Ok(Ok(_)) => {
                return Err(TrackerError::InvalidResponse("response too short".into()))
            }
            Ok(Err(e)) => return Err(TrackerError::Io(e)),
            Err(_) => continue,
        }
    }

    Err(TrackerError::Timeout)
}

pub(crate) fn build_connect_request(transaction_id: u32) -> Vec<u8> {
    let mut request = Vec::with_capacity(16);
    request.put_u64(PROTOCOL_ID);
    request.put_u32(ACTION_CONNECT);
    request.put_u32(transaction_id);
    request
}

pub(crate) fn parse_connect_response(
    response: &[u8],
    transaction_id: u32,
) -> Result<u64, TrackerError> {
    if response.len() < CONNECT_RESPONSE_LEN {
        return Err(TrackerError::InvalidResponse("connect response too short".into()));
    }

    let mut buf = response;
    if buf.get_u32() != ACTION_CONNECT || buf.get_u32() != transaction_id {
        return Err(TrackerError::InvalidResponse("connect response mismatch".into()));
    }

    Ok(buf.get_u64())
}

pub(crate) fn build_announce_request(
    connection_id: u64,
    transaction_id: u32,
    info: &TrackerInfo,
    params: &TrackerParameters,
    event: TrackerEvent,
) -> Vec<u8> {
    let mut request = Vec::with_capacity(ANNOUNCE_REQUEST_LEN);
    request.put_u64(connection_id);
    request.put_u32(ACTION_ANNOUNCE);
    request.put_u32(transaction_id);
    request.put_slice(&info.info_hash);
    request.put_slice(&info.local_id);
    request.put_u64(params.completed_adjusted);
    request.put_u64(params.download_left);
    request.put_u64(params.uploaded_adjusted);
    request.put_u32(event.as_udp_id());
    request.put_u32(0); // default source address
    request.put_u32(info.key);
    request.put_i32(params.numwant);
    request.put_u16(info.listen_port);

    debug_assert_eq!(request.len(), ANNOUNCE_REQUEST_LEN);
    request
}

pub(crate) fn parse_announce_response(
    response: &[u8],
    transaction_id: u32,
) -> Result<UdpAnnounce, TrackerError> {
    if response.len() < 8 {
        return Err(TrackerError::InvalidResponse("announce response too short".into()));
    }

    let mut buf = response;
    let action = buf.get_u32();

    if buf.get_u32() != transaction_id {
        return Err(TrackerError::InvalidResponse("transaction id mismatch".into()));
    }

    if action == ACTION_ERROR {
        return Err(TrackerError::Failure(
            String::from_utf8_lossy(buf).to_string(),
        ));
    }

    if action != ACTION_ANNOUNCE || response.len() < ANNOUNCE_RESPONSE_LEN {
        return Err(TrackerError::InvalidResponse("announce response mismatch".into()));
    }

    Ok(UdpAnnounce {
        interval: buf.get_u32(),
        leechers: buf.get_u32(),
        seeders: buf.get_u32(),
        peers: parse_compact_peers(buf),
    })
}

/// Splits `udp://host:port[/...]` into host and port; bracketed IPv6
/// literals are accepted.
pub(crate) fn parse_udp_url(url: &str) -> Result<(String, u16), TrackerError> {
    let invalid = || TrackerError::InvalidUrl(url.to_string());

    let rest = url.strip_prefix("udp://").ok_or_else(invalid)?;
    let authority = rest.split('/').next().unwrap_or(rest);

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let end = bracketed.find(']').ok_or_else(invalid)?;
        let port = bracketed[end + 1..].strip_prefix(':').ok_or_else(invalid)?;
        (&bracketed[..end], port)
    } else {
        authority.rsplit_once(':').ok_or_else(invalid)?
    };

    let port: u16 = port.parse().map_err(|_| invalid())?;
    if host.is_empty() || port == 0 {
        return Err(invalid());
    }

    Ok((host.to_string(), port))
}
