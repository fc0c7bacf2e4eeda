//! # Per-Error-Kind and Per-Device Metrics
//!
//! Operators see structured logs and metrics counters per error kind,
//! keyed by `dev_eui`/`gateway_id` — this module is the metrics half of
//! that contract. It is a direct generalization of the teacher crate's
//! device-statistics registry: a global `lazy_static` map of per-device
//! counters, each counter tracking a rolling per-minute rate via a small
//! windowed-counter helper, so operators can alert on "device X is
//! replaying frames at an unusual rate" the same way the teacher alerts on
//! CRC error rates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;

use crate::error::NsError;

lazy_static! {
    static ref DEVICE_METRICS: Arc<Mutex<HashMap<String, Arc<Mutex<DeviceMetrics>>>>> =
        Arc::new(Mutex::new(HashMap::new()));
}

/// The abstract error kinds of the network server core, used as metric
/// labels (mirrors `NsError`'s variants without carrying their payloads).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadArgument,
    NotFound,
    Replay,
    PreconditionFailed,
    Transient,
    Fatal,
    AlreadyExists,
}

impl From<&NsError> for ErrorKind {
    fn from(e: &NsError) -> Self {
        match e {
            NsError::BadArgument(_) => ErrorKind::BadArgument,
            NsError::NotFound(_) => ErrorKind::NotFound,
            NsError::Replay => ErrorKind::Replay,
            NsError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            NsError::Transient(_) => ErrorKind::Transient,
            NsError::Fatal(_) => ErrorKind::Fatal,
            NsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
        }
    }
}

/// Rolling per-minute rate counter over a handful of time windows.
#[derive(Debug, Clone)]
struct WindowedCounter {
    windows: Vec<(Instant, u64)>,
    window_duration: Duration,
    max_windows: usize,
}

impl WindowedCounter {
    fn new(window_duration: Duration, max_windows: usize) -> Self {
        Self { windows: Vec::new(), window_duration, max_windows }
    }

    fn increment(&mut self) {
        let now = Instant::now();
        self.cleanup(now);

        if let Some(last) = self.windows.last_mut() {
            if now.duration_since(last.0) < self.window_duration {
                last.1 += 1;
                return;
            }
        }
        self.windows.push((now, 1));
    }

    fn rate_per_minute(&mut self) -> f64 {
        let now = Instant::now();
        self.cleanup(now);

        if self.windows.is_empty() {
            return 0.0;
        }
        let total: u64 = self.windows.iter().map(|(_, c)| c).sum();
        let elapsed = now.duration_since(self.windows[0].0).as_secs_f64();
        if elapsed > 0.0 {
            total as f64 / elapsed * 60.0
        } else {
            0.0
        }
    }

    fn total(&self) -> u64 {
        self.windows.iter().map(|(_, c)| c).sum()
    }

    fn cleanup(&mut self, now: Instant) {
        let cutoff = self.window_duration * self.max_windows as u32;
        self.windows.retain(|(t, _)| now.duration_since(*t) < cutoff);
        if self.windows.len() > self.max_windows {
            let drop_to = self.windows.len() - self.max_windows;
            self.windows.drain(0..drop_to);
        }
    }
}

/// Per-device uplink/error counters, keyed by DevEUI hex string.
#[derive(Debug)]
pub struct DeviceMetrics {
    pub dev_eui: String,
    pub uplinks_received: u64,
    pub uplinks_delivered: u64,
    error_counters: HashMap<ErrorKind, WindowedCounter>,
}

impl DeviceMetrics {
    fn new(dev_eui: String) -> Self {
        Self {
            dev_eui,
            uplinks_received: 0,
            uplinks_delivered: 0,
            error_counters: HashMap::new(),
        }
    }

    fn record_error(&mut self, kind: ErrorKind) {
        let counter = self
            .error_counters
            .entry(kind)
            .or_insert_with(|| WindowedCounter::new(Duration::from_secs(60), 10));
        counter.increment();
    }

    pub fn error_rate_per_minute(&mut self, kind: ErrorKind) -> f64 {
        self.error_counters.get_mut(&kind).map(|c| c.rate_per_minute()).unwrap_or(0.0)
    }

    pub fn error_count(&self, kind: ErrorKind) -> u64 {
        self.error_counters.get(&kind).map(|c| c.total()).unwrap_or(0)
    }
}

fn get_or_insert(dev_eui: &str) -> Arc<Mutex<DeviceMetrics>> {
    let mut registry = DEVICE_METRICS.lock().unwrap();
    registry
        .entry(dev_eui.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(DeviceMetrics::new(dev_eui.to_string()))))
        .clone()
}

/// Record a completed application delivery for `dev_eui`.
pub fn record_uplink_delivered(dev_eui: &str) {
    let m = get_or_insert(dev_eui);
    let mut m = m.lock().unwrap();
    m.uplinks_received += 1;
    m.uplinks_delivered += 1;
}

/// Record an uplink that was received but did not result in delivery
/// (dropped for a `Replay` or other silent reason).
pub fn record_uplink_dropped(dev_eui: &str, kind: ErrorKind) {
    let m = get_or_insert(dev_eui);
    let mut m = m.lock().unwrap();
    m.uplinks_received += 1;
    m.record_error(kind);
}

/// Record any `NsError` against a device's error-kind counters.
pub fn record_error(dev_eui: &str, err: &NsError) {
    let m = get_or_insert(dev_eui);
    let mut m = m.lock().unwrap();
    m.record_error(ErrorKind::from(err));
}

/// Snapshot all per-device metrics (for a monitoring endpoint / test
/// assertions).
pub fn snapshot(dev_eui: &str) -> Option<(u64, u64)> {
    let registry = DEVICE_METRICS.lock().unwrap();
    registry.get(dev_eui).map(|m| {
        let m = m.lock().unwrap();
        (m.uplinks_received, m.uplinks_delivered)
    })
}

/// Clear all metrics (test isolation helper).
pub fn clear_all() {
    DEVICE_METRICS.lock().unwrap().clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_delivery_and_drop() {
        clear_all();
        record_uplink_delivered("AABBCCDD00112233");
        record_uplink_dropped("AABBCCDD00112233", ErrorKind::Replay);

        let (received, delivered) = snapshot("AABBCCDD00112233").unwrap();
        assert_eq!(received, 2);
        assert_eq!(delivered, 1);
    }

    #[test]
    fn error_kind_from_ns_error() {
        assert_eq!(ErrorKind::from(&NsError::Replay), ErrorKind::Replay);
        assert_eq!(ErrorKind::from(&NsError::Fatal("x".into())), ErrorKind::Fatal);
    }
}
