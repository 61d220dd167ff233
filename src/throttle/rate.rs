use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A smoothed byte-per-second rate over a sliding window.
///
/// Samples older than the window span are pruned on every access; the rate
/// is the windowed byte total divided by the span, so a burst decays to
/// zero once it leaves the window.
#[derive(Debug)]
pub struct RateMeter {
    span: Duration,
    samples: VecDeque<(Instant, u64)>,
    total: u64,
}

impl RateMeter {
    /// Creates a meter smoothing over `span_secs` seconds.
    pub fn new(span_secs: u64) -> Self {
        Self {
            span: Duration::from_secs(span_secs.max(1)),
            samples: VecDeque::new(),
            total: 0,
        }
    }

    /// Records `bytes` transferred now.
    pub fn insert(&mut self, bytes: u32) {
        if bytes == 0 {
            return;
        }
        let now = Instant::now();
        self.prune(now);
        self.total += u64::from(bytes);
        self.samples.push_back((now, u64::from(bytes)));
    }

    /// Returns the smoothed rate in bytes per second.
    pub fn rate(&mut self) -> u32 {
        self.prune(Instant::now());
        (self.total / self.span.as_secs()).min(u64::from(u32::MAX)) as u32
    }

    /// Total bytes currently inside the window.
    pub fn total(&mut self) -> u64 {
        self.prune(Instant::now());
        self.total
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(at, bytes)) = self.samples.front() {
            if now.duration_since(at) <= self.span {
                break;
            }
            self.total -= bytes;
            self.samples.pop_front();
        }
    }
}
