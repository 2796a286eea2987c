//! Traffic Sampler
//!
//! A fixed-capacity circular history of periodic byte-count samples, read
//! by the admin console. Every five seconds a background task reads and
//! resets the cumulative byte counter fed by the HTTP layer, appends the
//! per-second rate to the buffer, and accumulates a lifetime total.
//!
//! This is a decoupled observability feed: nothing else in the catalog
//! depends on it, and the only property it guarantees is FIFO eviction at
//! fixed capacity.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Sampling period of the background task.
pub const SAMPLE_PERIOD_SECS: u64 = 5;

/// Samples per minute at the fixed period.
pub const SAMPLES_PER_MINUTE: usize = 60 / SAMPLE_PERIOD_SECS as usize;

/// Buffer capacity: one hour of samples.
pub const BUFFER_CAPACITY: usize = SAMPLES_PER_MINUTE * 60;

/// Cumulative byte counter fed by the network layer and drained by the
/// sampler.
#[derive(Debug, Default)]
pub struct ByteCounter(AtomicU64);

impl ByteCounter {
    pub fn add(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Read and reset the counter.
    pub fn take(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}

/// The bounded sample history.
pub struct TrafficSampler {
    samples: Mutex<VecDeque<u64>>,
    capacity: usize,
    total_bytes: AtomicU64,
}

impl TrafficSampler {
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            total_bytes: AtomicU64::new(0),
        }
    }

    /// Record the bytes sent during one sampling interval.
    ///
    /// Appends the per-second rate; the oldest sample is evicted once the
    /// buffer is full.
    pub fn record(&self, interval_bytes: u64) {
        self.total_bytes.fetch_add(interval_bytes, Ordering::Relaxed);

        let mut samples = self
            .samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(interval_bytes / SAMPLE_PERIOD_SECS);
    }

    /// The most recent `n` samples, oldest first.
    ///
    /// When fewer than `n` samples exist, the result is left-padded with
    /// zeros so its length is always exactly `n`.
    pub fn window(&self, n: usize) -> Vec<u64> {
        let samples = self
            .samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut out = vec![0u64; n];
        if n <= samples.len() {
            for (slot, sample) in out.iter_mut().zip(samples.iter().skip(samples.len() - n)) {
                *slot = *sample;
            }
        } else {
            let pad = n - samples.len();
            for (slot, sample) in out[pad..].iter_mut().zip(samples.iter()) {
                *slot = *sample;
            }
        }
        out
    }

    /// The most recent `minutes` worth of samples, clamped to the buffer
    /// capacity.
    pub fn window_minutes(&self, minutes: usize) -> Vec<u64> {
        let n = (minutes * SAMPLES_PER_MINUTE).min(self.capacity).max(1);
        self.window(n)
    }

    /// Lifetime bytes recorded.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TrafficSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection and request statistics for the admin console.
#[derive(Debug, Default)]
pub struct ServerStats {
    requests: AtomicU64,
    open_connections: AtomicI64,
    peak_connections: AtomicI64,
}

impl ServerStats {
    pub fn request_started(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let open = self.open_connections.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_connections.fetch_max(open, Ordering::Relaxed);
    }

    pub fn request_finished(&self) {
        self.open_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn open_connections(&self) -> i64 {
        self.open_connections.load(Ordering::Relaxed)
    }

    pub fn peak_connections(&self) -> i64 {
        self.peak_connections.load(Ordering::Relaxed)
    }
}

/// Spawn the periodic sampling task.
///
/// Runs on the tokio runtime for the life of the process; the first tick
/// fires immediately and records whatever accumulated before startup.
pub fn spawn(sampler: Arc<TrafficSampler>, counter: Arc<ByteCounter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SAMPLE_PERIOD_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sampler.record(counter.take());
        }
    })
}

/// Human-readable byte size, admin-console style.
pub fn format_bytes(size: u64) -> String {
    if size == 0 {
        return "0".to_string();
    }
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let group = (((size as f64).log10() / 1024f64.log10()) as usize).min(UNITS.len() - 1);
    let value = size as f64 / 1024f64.powi(group as i32);
    if group == 0 {
        format!("{} {}", size, UNITS[group])
    } else {
        format!("{:.1} {}", value, UNITS[group])
    }
}
