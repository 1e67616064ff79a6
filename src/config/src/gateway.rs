// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

const KB: usize = 1024;
const MB: usize = 1024 * KB;

// constants to define default values
const SESSION_TIMEOUT: f64 = 5.0;
const WATCHDOG_INTERVAL_MS: u64 = 100;
const LATENCY_PROBE_INTERVAL: f64 = 5.0;
const PROBE_EXPIRY: f64 = 30.0;
const LOW_BATTERY_THRESHOLD: f64 = 20.0;
const TASK_THREADS: usize = 4;
const TASK_QUEUE_DEPTH: usize = 1024;
const WRITE_HIGH_WATER: usize = 64 * MB;

// helper functions
fn session_timeout() -> f64 {
    SESSION_TIMEOUT
}

fn watchdog_interval_ms() -> u64 {
    WATCHDOG_INTERVAL_MS
}

fn latency_probe_interval() -> f64 {
    LATENCY_PROBE_INTERVAL
}

fn probe_expiry() -> f64 {
    PROBE_EXPIRY
}

fn low_battery_threshold() -> f64 {
    LOW_BATTERY_THRESHOLD
}

fn task_threads() -> usize {
    TASK_THREADS
}

fn task_queue_depth() -> usize {
    TASK_QUEUE_DEPTH
}

fn write_high_water() -> usize {
    WRITE_HIGH_WATER
}

// definitions
#[derive(Serialize, Deserialize, Debug)]
pub struct Gateway {
    #[serde(default = "session_timeout")]
    session_timeout: f64,
    #[serde(default = "watchdog_interval_ms")]
    watchdog_interval_ms: u64,
    #[serde(default = "latency_probe_interval")]
    latency_probe_interval: f64,
    #[serde(default = "probe_expiry")]
    probe_expiry: f64,
    #[serde(default = "low_battery_threshold")]
    low_battery_threshold: f64,
    #[serde(default = "task_threads")]
    task_threads: usize,
    #[serde(default = "task_queue_depth")]
    task_queue_depth: usize,
    #[serde(default = "write_high_water")]
    write_high_water: usize,
}

// implementation
impl Gateway {
    /// Seconds of silence after which a session is marked offline.
    pub fn session_timeout(&self) -> f64 {
        self.session_timeout
    }

    pub(crate) fn set_session_timeout(&mut self, seconds: f64) {
        self.session_timeout = seconds;
    }

    /// Period of the liveness watchdog in milliseconds.
    pub fn watchdog_interval_ms(&self) -> u64 {
        self.watchdog_interval_ms
    }

    /// Seconds between latency probe rounds.
    pub fn latency_probe_interval(&self) -> f64 {
        self.latency_probe_interval
    }

    /// Seconds after which an unanswered probe is discarded.
    pub fn probe_expiry(&self) -> f64 {
        self.probe_expiry
    }

    /// Battery percentage below which a charge command is issued.
    pub fn low_battery_threshold(&self) -> f64 {
        self.low_battery_threshold
    }

    /// Number of threads in the blocking task pool.
    pub fn task_threads(&self) -> usize {
        self.task_threads
    }

    /// Capacity of the task pool queue.
    pub fn task_queue_depth(&self) -> usize {
        self.task_queue_depth
    }

    /// Write buffer size past which a connection stops being read.
    pub fn write_high_water(&self) -> usize {
        self.write_high_water
    }
}

// trait implementations
impl Default for Gateway {
    fn default() -> Self {
        Self {
            session_timeout: session_timeout(),
            watchdog_interval_ms: watchdog_interval_ms(),
            latency_probe_interval: latency_probe_interval(),
            probe_expiry: probe_expiry(),
            low_battery_threshold: low_battery_threshold(),
            task_threads: task_threads(),
            task_queue_depth: task_queue_depth(),
            write_high_water: write_high_water(),
        }
    }
}

// trait definitions
pub trait GatewayConfig {
    fn gateway(&self) -> &Gateway;
}
