// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

// constants to define default values
const WORKER_THREADS: usize = 0;
const WORKER_TIMEOUT: usize = 100;
const WORKER_NEVENT: usize = 1024;

// helper functions
fn threads() -> usize {
    WORKER_THREADS
}

fn timeout() -> usize {
    WORKER_TIMEOUT
}

fn nevent() -> usize {
    WORKER_NEVENT
}

// definitions
#[derive(Serialize, Deserialize, Debug)]
pub struct Worker {
    #[serde(default = "threads")]
    threads: usize,
    #[serde(default = "timeout")]
    timeout: usize,
    #[serde(default = "nevent")]
    nevent: usize,
}

// implementation
impl Worker {
    /// Number of worker reactor threads. Zero means a single reactor carries
    /// every connection.
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub(crate) fn set_threads(&mut self, threads: usize) {
        self.threads = threads;
    }

    /// Upper bound for a poll in milliseconds.
    pub fn timeout(&self) -> usize {
        self.timeout
    }

    /// Maximum events returned by a single poll.
    pub fn nevent(&self) -> usize {
        self.nevent
    }
}

// trait implementations
impl Default for Worker {
    fn default() -> Self {
        Self {
            threads: threads(),
            timeout: timeout(),
            nevent: nevent(),
        }
    }
}

// trait definitions
pub trait WorkerConfig {
    fn worker(&self) -> &Worker;
}
