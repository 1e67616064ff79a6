// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Round-trip latency tracking via ping/pong probes.

use common::time::Timestamp;
use parking_lot::Mutex;
use protocol_agv::LatencyProbe;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Per-vehicle RTT statistics, all in milliseconds.
#[derive(Copy, Clone, Debug)]
pub struct RttStats {
    pub latest_ms: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub samples: u64,
    pub total_ms: f64,
}

impl Default for RttStats {
    fn default() -> Self {
        Self {
            latest_ms: 0.0,
            avg_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
            samples: 0,
            total_ms: 0.0,
        }
    }
}

impl RttStats {
    fn record(&mut self, rtt_ms: f64) {
        self.latest_ms = rtt_ms;
        self.min_ms = self.min_ms.min(rtt_ms);
        self.max_ms = self.max_ms.max(rtt_ms);
        self.samples += 1;
        self.total_ms += rtt_ms;
        self.avg_ms = self.total_ms / self.samples as f64;
    }
}

struct MonitorInner {
    /// Outstanding pings: seq -> (vehicle id, send time in micros).
    pending: HashMap<u64, (String, u64)>,
    stats: HashMap<String, RttStats>,
}

/// Creates ping probes and matches the echoed pongs back to them. Probes the
/// client never answers are purged by [`LatencyMonitor::cleanup_expired`].
pub struct LatencyMonitor {
    next_seq: AtomicU64,
    inner: Mutex<MonitorInner>,
}

impl Default for LatencyMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyMonitor {
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(0),
            inner: Mutex::new(MonitorInner {
                pending: HashMap::new(),
                stats: HashMap::new(),
            }),
        }
    }

    /// Allocate a sequence number, record the outstanding ping, and return
    /// the probe to be sent.
    pub fn create_ping(&self, agv_id: &str) -> LatencyProbe {
        let seq_num = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let send_timestamp_us = Timestamp::now().as_micros();

        self.inner
            .lock()
            .pending
            .insert(seq_num, (agv_id.to_string(), send_timestamp_us));

        LatencyProbe {
            target_agv_id: agv_id.to_string(),
            send_timestamp_us,
            seq_num,
            is_response: false,
        }
    }

    /// Match a pong against its outstanding ping and fold the RTT into the
    /// vehicle's statistics. Returns `None` when the sequence number is
    /// unknown (expired or never sent).
    pub fn process_pong(&self, pong: &LatencyProbe) -> Option<f64> {
        let now_us = Timestamp::now().as_micros();
        let mut inner = self.inner.lock();

        let (agv_id, send_us) = inner.pending.remove(&pong.seq_num)?;
        let rtt_ms = now_us.saturating_sub(send_us) as f64 / 1000.0;
        inner.stats.entry(agv_id).or_default().record(rtt_ms);
        Some(rtt_ms)
    }

    pub fn stats(&self, agv_id: &str) -> Option<RttStats> {
        self.inner.lock().stats.get(agv_id).copied()
    }

    /// Snapshot of every vehicle's statistics.
    pub fn all_stats(&self) -> Vec<(String, RttStats)> {
        self.inner
            .lock()
            .stats
            .iter()
            .map(|(id, stats)| (id.clone(), *stats))
            .collect()
    }

    /// Number of pings still waiting for a pong.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Drop outstanding pings older than `timeout`, returning how many were
    /// removed.
    pub fn cleanup_expired(&self, timeout: Duration) -> usize {
        let now_us = Timestamp::now().as_micros();
        let timeout_us = timeout.as_micros() as u64;

        let mut inner = self.inner.lock();
        let before = inner.pending.len();
        inner
            .pending
            .retain(|_, (_, send_us)| now_us.saturating_sub(*send_us) <= timeout_us);
        before - inner.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong_for(ping: &LatencyProbe) -> LatencyProbe {
        LatencyProbe {
            is_response: true,
            ..ping.clone()
        }
    }

    #[test]
    fn ping_pong_round_trip() {
        let monitor = LatencyMonitor::new();
        let ping = monitor.create_ping("AGV-01");
        assert!(!ping.is_response);
        assert_eq!(monitor.pending_count(), 1);

        std::thread::sleep(Duration::from_millis(2));

        let rtt = monitor.process_pong(&pong_for(&ping)).unwrap();
        assert!(rtt >= 2.0);
        assert_eq!(monitor.pending_count(), 0);

        let stats = monitor.stats("AGV-01").unwrap();
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.latest_ms, rtt);
        assert_eq!(stats.min_ms, rtt);
        assert_eq!(stats.max_ms, rtt);
    }

    #[test]
    fn unknown_seq_is_rejected() {
        let monitor = LatencyMonitor::new();
        let bogus = LatencyProbe {
            target_agv_id: "AGV-01".to_string(),
            send_timestamp_us: 0,
            seq_num: 999,
            is_response: true,
        };
        assert!(monitor.process_pong(&bogus).is_none());

        // a pong only matches once
        let ping = monitor.create_ping("AGV-01");
        assert!(monitor.process_pong(&pong_for(&ping)).is_some());
        assert!(monitor.process_pong(&pong_for(&ping)).is_none());
    }

    #[test]
    fn stats_accumulate() {
        let monitor = LatencyMonitor::new();
        for _ in 0..3 {
            let ping = monitor.create_ping("AGV-01");
            monitor.process_pong(&pong_for(&ping)).unwrap();
        }
        let stats = monitor.stats("AGV-01").unwrap();
        assert_eq!(stats.samples, 3);
        assert!(stats.min_ms <= stats.avg_ms && stats.avg_ms <= stats.max_ms);
        assert!((stats.total_ms / 3.0 - stats.avg_ms).abs() < f64::EPSILON);
    }

    #[test]
    fn expired_probes_are_purged() {
        let monitor = LatencyMonitor::new();
        let ping = monitor.create_ping("AGV-01");
        monitor.create_ping("AGV-02");
        assert_eq!(monitor.pending_count(), 2);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(monitor.cleanup_expired(Duration::from_millis(1)), 2);
        assert_eq!(monitor.pending_count(), 0);

        // the purged ping can no longer be matched
        assert!(monitor.process_pong(&pong_for(&ping)).is_none());
    }
}
