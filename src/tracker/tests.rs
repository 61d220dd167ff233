use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::http::{scrape_url, url_encode};
use super::state::unix_seconds;
use super::udp::{
    build_announce_request, build_connect_request, parse_announce_response,
    parse_connect_response, parse_udp_url,
};
use super::worker::{parse_compact_peers, parse_compact_peers6};
use super::*;
use crate::error::EngineError;

fn test_runtime() -> tokio::runtime::Handle {
    static RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RT.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap()
    })
    .handle()
    .clone()
}

fn tracker_info(url: &str) -> TrackerInfo {
    TrackerInfo {
        info_hash: [0xAB; 20],
        local_id: [0x42; 20],
        url: url.to_string(),
        key: 0xDEADBEEF,
        listen_port: 6881,
    }
}

struct MockWorker {
    info: TrackerInfo,
    state: Mutex<TrackerState>,
    slots: Mutex<Option<WorkerSlots>>,
    busy: AtomicBool,
    events: Mutex<Vec<TrackerEvent>>,
    scrapes: AtomicUsize,
    closes: AtomicUsize,
    disowns: AtomicUsize,
}

impl MockWorker {
    fn new(url: &str, scrapable: bool) -> Arc<Self> {
        Arc::new(Self {
            info: tracker_info(url),
            state: Mutex::new(TrackerState::new(false, scrapable)),
            slots: Mutex::new(None),
            busy: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
            scrapes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            disowns: AtomicUsize::new(0),
        })
    }

    /// Completes the in-flight request: clears busy, then emits the
    /// terminal signal the way real workers do.
    fn finish(&self, signal: TrackerSignal) {
        self.busy.store(false, Ordering::SeqCst);
        if let Some(slots) = self.slots.lock().clone() {
            slots.emit(signal);
        }
    }

    fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    fn sent_events(&self) -> Vec<TrackerEvent> {
        self.events.lock().clone()
    }
}

impl TrackerWorker for MockWorker {
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
        self.state.lock().latest_event = event;
        self.events.lock().push(event);
        self.busy.store(true, Ordering::SeqCst);
    }

    fn send_scrape(&self) {
        self.state.lock().latest_event = TrackerEvent::Scrape;
        self.scrapes.fetch_add(1, Ordering::SeqCst);
        self.busy.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.busy.store(false, Ordering::SeqCst);
    }

    fn disown(&self) {
        self.disowns.fetch_add(1, Ordering::SeqCst);
        self.busy.store(false, Ordering::SeqCst);
    }
}

fn list() -> TrackerList {
    TrackerList::new(
        WorkerSet::new(test_runtime()),
        [0xAB; 20],
        [0x42; 20],
        6881,
        Arc::new(AnnounceTotals::new(1 << 30)),
    )
}

fn addr(s: &str) -> std::net::SocketAddr {
    s.parse().unwrap()
}

#[test]
fn insert_keeps_group_order() {
    let mut list = list();

    let a = MockWorker::new("udp://a:1", false);
    let b = MockWorker::new("udp://b:1", false);
    let c = MockWorker::new("udp://c:1", false);

    list.insert(0, a);
    list.insert(1, c);
    list.insert(0, b);

    let urls: Vec<_> = list.iter().map(|t| t.url().to_string()).collect();
    assert_eq!(urls, ["udp://a:1", "udp://b:1", "udp://c:1"]);
    let groups: Vec<_> = list.iter().map(Tracker::group).collect();
    assert_eq!(groups, [0, 0, 1]);

    assert_eq!(list.begin_group(0), 0);
    assert_eq!(list.end_group(0), 2);
    assert_eq!(list.begin_group(1), 2);
    assert_eq!(list.size_group(), 2);

    assert_eq!(list.find_url("udp://b:1"), Some(1));
    assert_eq!(list.find_url("udp://nope:1"), None);
}

#[test]
fn insert_fires_enabled_slot_and_wires_parameters() {
    let mut list = list();
    let enabled = Rc::new(RefCell::new(Vec::new()));
    let enabled_in_slot = enabled.clone();
    list.set_slot_tracker_enabled(Box::new(move |t| {
        enabled_in_slot.borrow_mut().push(t.url().to_string());
    }));

    let a = MockWorker::new("udp://a:1", false);
    list.insert(0, a.clone());

    assert_eq!(enabled.borrow().as_slice(), ["udp://a:1"]);

    // The wired parameters slot pulls live figures from the totals.
    let params = a.slots.lock().clone().unwrap().parameters();
    assert_eq!(params.download_left, 1 << 30);
    assert_eq!(params.numwant, -1);
}

#[test]
fn insert_url_dispatches_by_scheme() {
    let mut list = list();

    list.insert_url(0, "http://tracker.example.com/announce", false)
        .unwrap();
    list.insert_url(0, "udp://tracker.example.com:6969", false)
        .unwrap();
    assert_eq!(list.len(), 2);

    assert!(list.get(0).unwrap().is_scrapable());
    assert!(!list.get(1).unwrap().is_scrapable());

    // Unknown scheme: skipped on auto-insert, input error when
    // user-initiated.
    list.insert_url(0, "wss://tracker.example.com", false).unwrap();
    assert_eq!(list.len(), 2);

    let err = list
        .insert_url(0, "wss://tracker.example.com", true)
        .unwrap_err();
    assert!(matches!(err, EngineError::Input(_)));

    // DHT is permitted only when a builder is present.
    list.insert_url(0, "dht://wide", false).unwrap();
    assert_eq!(list.len(), 2);
}

#[test]
fn insert_url_with_dht_builder() {
    let workers = WorkerSet::new(test_runtime()).with_dht(Box::new(|info| {
        let worker: Arc<dyn TrackerWorker> = MockWorker::new(&info.url, false);
        Ok(worker)
    }));
    let mut list = TrackerList::new(
        workers,
        [0xAB; 20],
        [0x42; 20],
        6881,
        Arc::new(AnnounceTotals::new(0)),
    );

    list.insert_url(2, "dht://wide", false).unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list.get(0).unwrap().group(), 2);
}

#[test]
fn find_next_prefers_healthy_primary() {
    let mut list = list();
    let a = MockWorker::new("udp://a:1", false);
    list.insert(0, a);
    list.insert(0, MockWorker::new("udp://b:1", false));

    assert_eq!(list.find_next_to_request(0), Some(0));
    assert_eq!(list.find_next_to_request(1), Some(1));
}

#[test]
fn find_next_prefers_sooner_ready_healthy_fallback() {
    // Scenario: A failing with retry due in ~30 s, B healthy and due for
    // its periodic announce in ~10 s. B wins.
    let mut list = list();
    let a = MockWorker::new("udp://a:1", false);
    let b = MockWorker::new("udp://b:1", false);
    list.insert(0, a.clone());
    list.insert(0, b.clone());

    let now = unix_seconds();
    {
        let mut state = a.state.lock();
        state.failed_counter = 3;
        state.failed_time_last = now - 10; // retry at now + 30
    }
    {
        let mut state = b.state.lock();
        state.success_counter = 1;
        state.success_time_last = now - 1790; // due at now + 10
    }

    assert_eq!(list.find_next_to_request(0), Some(1));
}

#[test]
fn find_next_weighs_failing_trackers_by_retry_time() {
    let mut list = list();
    let a = MockWorker::new("udp://a:1", false);
    let b = MockWorker::new("udp://b:1", false);
    list.insert(0, a.clone());
    list.insert(0, b.clone());

    let now = unix_seconds();
    {
        let mut state = a.state.lock();
        state.failed_counter = 5;
        state.failed_time_last = now; // retry at now + 160
    }
    {
        let mut state = b.state.lock();
        state.failed_counter = 1;
        state.failed_time_last = now; // retry at now + 10
    }

    assert_eq!(list.find_next_to_request(0), Some(1));
}

#[test]
fn find_next_skips_busy_and_disabled() {
    let mut list = list();
    let a = MockWorker::new("udp://a:1", false);
    let b = MockWorker::new("udp://b:1", false);
    let c = MockWorker::new("udp://c:1", false);
    list.insert(0, a.clone());
    list.insert(0, b.clone());
    list.insert(0, c);

    a.set_busy(true);
    b.state.lock().enabled = false;

    assert_eq!(list.find_next_to_request(0), Some(2));
}

#[test]
fn success_promotes_to_group_front() {
    let mut list = list();
    let a = MockWorker::new("udp://a:1", false);
    let b = MockWorker::new("udp://b:1", false);
    let c = MockWorker::new("udp://c:1", false);
    list.insert(0, a);
    list.insert(0, b);
    list.insert(0, c.clone());

    let new_peers = Rc::new(RefCell::new(0u32));
    let seen = new_peers.clone();
    list.set_slot_success(Box::new(move |_t, addrs| {
        *seen.borrow_mut() = addrs.len() as u32;
        1
    }));

    list.send_event(2, TrackerEvent::Started);
    assert_eq!(c.sent_events(), [TrackerEvent::Started]);

    // Duplicate addresses collapse before reaching the success slot.
    c.finish(TrackerSignal::Success(vec![
        addr("10.0.0.2:6881"),
        addr("10.0.0.1:6881"),
        addr("10.0.0.1:6881"),
    ]));
    list.dispatch();

    let urls: Vec<_> = list.iter().map(|t| t.url().to_string()).collect();
    assert_eq!(urls, ["udp://c:1", "udp://b:1", "udp://a:1"]);

    let state = list.get(0).unwrap().state();
    assert_eq!(state.success_counter, 1);
    assert_eq!(state.failed_counter, 0);
    assert_eq!(state.latest_sum_peers, 2);
    assert_eq!(state.latest_new_peers, 1);
    assert_eq!(*new_peers.borrow(), 2);
}

#[test]
fn promotion_of_group_front_is_noop() {
    let mut list = list();
    list.insert(0, MockWorker::new("udp://a:1", false));
    list.insert(0, MockWorker::new("udp://b:1", false));

    assert_eq!(list.promote(0), 0);
    let urls: Vec<_> = list.iter().map(|t| t.url().to_string()).collect();
    assert_eq!(urls, ["udp://a:1", "udp://b:1"]);
}

#[test]
fn failure_backs_off_without_resetting_success() {
    let mut list = list();
    let a = MockWorker::new("udp://a:1", false);
    list.insert(0, a.clone());
    a.state.lock().success_counter = 2;

    let failures = Rc::new(RefCell::new(Vec::new()));
    let seen = failures.clone();
    list.set_slot_failed(Box::new(move |t, msg| {
        seen.borrow_mut().push((t.url().to_string(), msg.to_string()));
    }));

    list.send_event(0, TrackerEvent::Started);
    a.finish(TrackerSignal::Failure("connection refused".into()));
    list.dispatch();

    let state = list.get(0).unwrap().state();
    assert_eq!(state.failed_counter, 1);
    assert_eq!(state.success_counter, 2);
    assert!(state.failed_time_last > 0);
    assert_eq!(
        failures.borrow().as_slice(),
        &[("udp://a:1".to_string(), "connection refused".to_string())]
    );

    // A later success clears the failure streak.
    list.send_event(0, TrackerEvent::None);
    a.finish(TrackerSignal::Success(vec![]));
    list.dispatch();

    let state = list.get(0).unwrap().state();
    assert_eq!(state.failed_counter, 0);
    assert_eq!(state.success_counter, 3);
}

#[test]
fn receive_on_busy_tracker_is_internal_error() {
    let mut list = list();
    let a = MockWorker::new("udp://a:1", false);
    list.insert(0, a.clone());

    a.set_busy(true);
    let err = list.receive_success(0, vec![]).unwrap_err();
    assert!(matches!(err, EngineError::Internal(_)));

    let err = list.receive_failed(0, "late").unwrap_err();
    assert!(matches!(err, EngineError::Internal(_)));
}

#[test]
fn send_event_rules() {
    let mut list = list();
    let a = MockWorker::new("udp://a:1", false);
    list.insert(0, a.clone());

    // Scrape is not an announce event.
    list.send_event(0, TrackerEvent::Scrape);
    assert!(a.sent_events().is_empty());

    // Disabled trackers are skipped.
    a.state.lock().enabled = false;
    list.send_event(0, TrackerEvent::Started);
    assert!(a.sent_events().is_empty());
    a.state.lock().enabled = true;

    // Busy with an announce: the event is dropped.
    a.send_event(TrackerEvent::Started);
    list.send_event(0, TrackerEvent::Stopped);
    assert_eq!(a.sent_events(), [TrackerEvent::Started]);

    // Busy with a scrape: the scrape is closed, then the event goes out.
    a.finish(TrackerSignal::Success(vec![]));
    list.dispatch();
    a.send_scrape();
    let closes_before = a.closes.load(Ordering::SeqCst);
    list.send_event(0, TrackerEvent::Stopped);
    assert_eq!(a.closes.load(Ordering::SeqCst), closes_before + 1);
    assert_eq!(
        a.sent_events(),
        [TrackerEvent::Started, TrackerEvent::Stopped]
    );
}

#[test]
fn scrape_suppression_window() {
    let mut list = list();
    let a = MockWorker::new("http://a/announce", true);
    list.insert(0, a.clone());

    // Scraped five minutes ago: suppressed.
    a.state.lock().scrape_time_last = unix_seconds() - 300;
    list.send_scrape(0);
    assert_eq!(a.scrapes.load(Ordering::SeqCst), 0);

    // Over ten minutes ago: dispatched.
    a.state.lock().scrape_time_last = unix_seconds() - 601;
    list.send_scrape(0);
    assert_eq!(a.scrapes.load(Ordering::SeqCst), 1);

    // Busy or non-scrapable trackers never scrape.
    a.finish(TrackerSignal::ScrapeSuccess);
    list.dispatch();
    assert!(list.get(0).unwrap().state().scrape_time_last >= unix_seconds() - 1);
    assert_eq!(list.get(0).unwrap().state().scrape_counter, 1);

    let b = MockWorker::new("udp://b:1", false);
    list.insert(0, b.clone());
    list.send_scrape(1);
    assert_eq!(b.scrapes.load(Ordering::SeqCst), 0);
}

#[test]
fn cycle_group_rotates_and_round_trips() {
    let mut list = list();
    list.insert(0, MockWorker::new("udp://a:1", false));
    list.insert(0, MockWorker::new("udp://b:1", false));
    list.insert(0, MockWorker::new("udp://c:1", false));
    list.insert(1, MockWorker::new("udp://z:1", false));

    list.cycle_group(0);
    let urls: Vec<_> = list.iter().map(|t| t.url().to_string()).collect();
    assert_eq!(urls, ["udp://b:1", "udp://c:1", "udp://a:1", "udp://z:1"]);

    list.cycle_group(0);
    list.cycle_group(0);
    let urls: Vec<_> = list.iter().map(|t| t.url().to_string()).collect();
    assert_eq!(urls, ["udp://a:1", "udp://b:1", "udp://c:1", "udp://z:1"]);

    // Unknown groups are a no-op.
    list.cycle_group(7);
    assert_eq!(list.len(), 4);
}

#[test]
fn randomize_preserves_group_partition() {
    let mut list = list();
    for i in 0..4 {
        list.insert(0, MockWorker::new(&format!("udp://g0-{i}:1"), false));
    }
    for i in 0..3 {
        list.insert(1, MockWorker::new(&format!("udp://g1-{i}:1"), false));
    }

    list.randomize_group_entries();

    let groups: Vec<_> = list.iter().map(Tracker::group).collect();
    assert_eq!(groups, [0, 0, 0, 0, 1, 1, 1]);

    let g0: std::collections::HashSet<_> = list
        .iter()
        .take(4)
        .map(|t| t.url().to_string())
        .collect();
    assert!(g0.iter().all(|u| u.starts_with("udp://g0-")));
}

#[test]
fn close_and_disown_by_event_bitmap() {
    let mut list = list();
    let a = MockWorker::new("udp://a:1", false);
    let b = MockWorker::new("udp://b:1", false);
    let c = MockWorker::new("udp://c:1", false);
    list.insert(0, a.clone());
    list.insert(0, b.clone());
    list.insert(0, c.clone());

    a.state.lock().latest_event = TrackerEvent::Started;
    b.state.lock().latest_event = TrackerEvent::Stopped;
    c.state.lock().latest_event = TrackerEvent::Scrape;

    // Close everything except trackers whose last event was Stopped.
    list.close_all_excluding(TrackerEvent::Stopped.bit());
    assert_eq!(a.closes.load(Ordering::SeqCst), 1);
    assert_eq!(b.closes.load(Ordering::SeqCst), 0);
    assert_eq!(c.closes.load(Ordering::SeqCst), 1);

    // Disown only trackers whose last event was Stopped.
    list.disown_all_including(TrackerEvent::Stopped.bit());
    assert_eq!(a.disowns.load(Ordering::SeqCst), 0);
    assert_eq!(b.disowns.load(Ordering::SeqCst), 1);
}

#[test]
fn enabled_toggle_fires_slots() {
    let mut list = list();
    let a = MockWorker::new("udp://a:1", false);
    list.insert(0, a);

    let log = Rc::new(RefCell::new(Vec::new()));
    let enabled_log = log.clone();
    let disabled_log = log.clone();
    list.set_slot_tracker_enabled(Box::new(move |_| enabled_log.borrow_mut().push("on")));
    list.set_slot_tracker_disabled(Box::new(move |_| disabled_log.borrow_mut().push("off")));

    list.set_tracker_enabled(0, false);
    assert!(!list.get(0).unwrap().is_usable());
    list.set_tracker_enabled(0, false);
    list.set_tracker_enabled(0, true);

    assert_eq!(log.borrow().as_slice(), ["off", "on"]);
}

#[test]
fn state_backoff_clocks() {
    let mut state = TrackerState::new(false, false);
    assert_eq!(state.failed_time_next(), 0);
    assert_eq!(state.success_time_next(), 0);

    state.failed_time_last = 1000;
    state.failed_counter = 1;
    assert_eq!(state.failed_time_next(), 1010);

    state.failed_counter = 3;
    assert_eq!(state.failed_time_next(), 1040);

    // The doubling caps out near five minutes.
    state.failed_counter = 12;
    assert_eq!(state.failed_time_next(), 1320);

    state.success_counter = 1;
    state.success_time_last = 5000;
    state.set_normal_interval(1800);
    assert_eq!(state.success_time_next(), 6800);

    // Intervals outside the sane range are clamped.
    state.set_normal_interval(5);
    assert_eq!(state.normal_interval, 60);
}

#[test]
fn tracker_event_wire_forms() {
    assert_eq!(TrackerEvent::Started.as_str(), "started");
    assert_eq!(TrackerEvent::Stopped.as_str(), "stopped");
    assert_eq!(TrackerEvent::Completed.as_str(), "completed");
    assert_eq!(TrackerEvent::None.as_str(), "");

    assert_eq!(TrackerEvent::None.as_udp_id(), 0);
    assert_eq!(TrackerEvent::Completed.as_udp_id(), 1);
    assert_eq!(TrackerEvent::Started.as_udp_id(), 2);
    assert_eq!(TrackerEvent::Stopped.as_udp_id(), 3);

    assert_eq!(TrackerEvent::None.bit(), 1);
    assert_eq!(TrackerEvent::Scrape.bit(), 1 << 4);
}

#[test]
fn udp_codec_round_trip() {
    let request = build_connect_request(0x01020304);
    assert_eq!(request.len(), 16);
    assert_eq!(&request[..8], &0x41727101980u64.to_be_bytes());
    assert_eq!(&request[8..12], &[0, 0, 0, 0]);
    assert_eq!(&request[12..16], &[1, 2, 3, 4]);

    let mut response = Vec::new();
    response.extend_from_slice(&0u32.to_be_bytes());
    response.extend_from_slice(&0x01020304u32.to_be_bytes());
    response.extend_from_slice(&0xCAFEBABEu64.to_be_bytes());
    assert_eq!(
        parse_connect_response(&response, 0x01020304).unwrap(),
        0xCAFEBABE
    );

    // A transaction mismatch is rejected.
    assert!(parse_connect_response(&response, 7).is_err());
}

#[test]
fn udp_announce_request_layout() {
    let info = tracker_info("udp://tracker:6969");
    let params = TrackerParameters {
        numwant: -1,
        uploaded_adjusted: 111,
        completed_adjusted: 222,
        download_left: 333,
    };

    let request = build_announce_request(0xCAFEBABE, 0x55667788, &info, &params, TrackerEvent::Started);
    assert_eq!(request.len(), 98);

    assert_eq!(&request[..8], &0xCAFEBABEu64.to_be_bytes());
    assert_eq!(&request[8..12], &1u32.to_be_bytes());
    assert_eq!(&request[12..16], &0x55667788u32.to_be_bytes());
    assert_eq!(&request[16..36], &[0xAB; 20]);
    assert_eq!(&request[36..56], &[0x42; 20]);
    assert_eq!(&request[56..64], &222u64.to_be_bytes());
    assert_eq!(&request[64..72], &333u64.to_be_bytes());
    assert_eq!(&request[72..80], &111u64.to_be_bytes());
    assert_eq!(&request[80..84], &2u32.to_be_bytes());
    assert_eq!(&request[88..92], &0xDEADBEEFu32.to_be_bytes());
    assert_eq!(&request[92..96], &(-1i32).to_be_bytes());
    assert_eq!(&request[96..98], &6881u16.to_be_bytes());
}

#[test]
fn udp_announce_response_parsing() {
    let mut response = Vec::new();
    response.extend_from_slice(&1u32.to_be_bytes());
    response.extend_from_slice(&9u32.to_be_bytes());
    response.extend_from_slice(&1800u32.to_be_bytes());
    response.extend_from_slice(&5u32.to_be_bytes());
    response.extend_from_slice(&12u32.to_be_bytes());
    response.extend_from_slice(&[10, 0, 0, 1, 0x1A, 0xE1]);
    response.extend_from_slice(&[10, 0, 0, 2, 0x1A, 0xE2]);

    let announce = parse_announce_response(&response, 9).unwrap();
    assert_eq!(announce.interval, 1800);
    assert_eq!(announce.leechers, 5);
    assert_eq!(announce.seeders, 12);
    assert_eq!(
        announce.peers,
        [addr("10.0.0.1:6881"), addr("10.0.0.2:6882")]
    );

    // An error action carries a message.
    let mut error = Vec::new();
    error.extend_from_slice(&3u32.to_be_bytes());
    error.extend_from_slice(&9u32.to_be_bytes());
    error.extend_from_slice(b"torrent not registered");
    let err = parse_announce_response(&error, 9).unwrap_err();
    assert!(matches!(err, TrackerError::Failure(_)));
}

#[test]
fn udp_url_parsing() {
    assert_eq!(
        parse_udp_url("udp://tracker.example.com:6969").unwrap(),
        ("tracker.example.com".to_string(), 6969)
    );
    assert_eq!(
        parse_udp_url("udp://tracker.example.com:6969/announce").unwrap(),
        ("tracker.example.com".to_string(), 6969)
    );
    assert_eq!(
        parse_udp_url("udp://[::1]:6969").unwrap(),
        ("::1".to_string(), 6969)
    );

    assert!(parse_udp_url("udp://tracker.example.com").is_err());
    assert!(parse_udp_url("udp://:6969").is_err());
    assert!(parse_udp_url("http://tracker.example.com:80").is_err());
}

#[test]
fn scrape_url_substitution() {
    assert_eq!(
        scrape_url("http://t.example.com/announce").as_deref(),
        Some("http://t.example.com/scrape")
    );
    assert_eq!(
        scrape_url("http://t.example.com/announce.php").as_deref(),
        Some("http://t.example.com/scrape.php")
    );
    assert_eq!(scrape_url("http://t.example.com/a"), None);
}

#[test]
fn binary_query_encoding() {
    assert_eq!(url_encode(b"abc-_.~"), "abc-_.~");
    assert_eq!(url_encode(&[0x00, 0xFF, b' ']), "%00%FF%20");
}

#[test]
fn compact_peer_parsing() {
    let peers = parse_compact_peers(&[192, 168, 1, 1, 0x1A, 0xE1, 10, 0, 0, 1, 0x1A, 0xE1]);
    assert_eq!(peers, [addr("192.168.1.1:6881"), addr("10.0.0.1:6881")]);

    // A trailing partial entry is ignored.
    let peers = parse_compact_peers(&[192, 168, 1, 1, 0x1A, 0xE1, 9, 9]);
    assert_eq!(peers.len(), 1);

    let mut v6 = [0u8; 18];
    v6[15] = 1;
    v6[16] = 0x1A;
    v6[17] = 0xE1;
    let peers = parse_compact_peers6(&v6);
    assert_eq!(peers, [addr("[::1]:6881")]);
}

#[test]
fn worker_construction_validates_urls() {
    let runtime = test_runtime();

    assert!(UdpWorker::new(tracker_info("udp://t:6969"), false, runtime.clone()).is_ok());
    assert!(UdpWorker::new(tracker_info("udp://t"), false, runtime.clone()).is_err());

    let http = HttpWorker::new(tracker_info("http://t/announce"), true, runtime).unwrap();
    let state = http.state().lock().clone();
    assert!(state.scrapable);
    assert!(state.extra_tracker);
    assert!(state.enabled);
}
