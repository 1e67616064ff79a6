// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The blocking task pool.
//!
//! Distinct from the worker reactors: these threads have no poll instance
//! and exist to absorb work that sleeps or blocks, keeping it off the I/O
//! threads. Results are routed back to the owning reactor through the
//! outbound queues, never written to a connection directly.

use crate::agv::AgvSession;
use crate::context::ConnectionRef;

use common::time::Timestamp;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use protocol_agv::NavigationTask;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A navigation assignment captured for execution on the task pool. The
/// connection handle is weak (validated at delivery), while the session
/// reference is strong: the session the task was enqueued with stays alive
/// for the whole execution even if its table entry is erased in the interim.
pub struct WorkerTask {
    pub conn: ConnectionRef,
    pub session: Arc<AgvSession>,
    pub task: NavigationTask,
    pub msg_type: u16,
    pub submit_time: Timestamp,
}

impl WorkerTask {
    /// How long the task sat in the queue before a pool thread picked it up.
    pub fn queue_latency(&self) -> Duration {
        self.submit_time.elapsed()
    }
}

/// Fixed pool of threads consuming a bounded job queue. [`TaskPool::run`]
/// blocks the producer when the queue is full; [`TaskPool::try_run`] is the
/// non-blocking variant for reactor threads, which must never stall.
pub struct TaskPool {
    sender: Mutex<Option<Sender<Job>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskPool {
    pub fn new(threads: usize, queue_depth: usize) -> Self {
        let (sender, receiver) = bounded::<Job>(queue_depth);

        let threads = (0..threads)
            .map(|i| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("agv_task_{}", i))
                    .spawn(move || {
                        // the loop ends when the last sender is dropped
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
                    .expect("failed to spawn task pool thread")
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            threads: Mutex::new(threads),
        }
    }

    /// Submit a job, blocking while the queue is full. Returns `false` after
    /// shutdown.
    pub fn run<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        match &*sender {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    /// Submit a job without blocking. Returns `false` when the queue is full
    /// or the pool has shut down.
    pub fn try_run<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        match &*sender {
            Some(sender) => match sender.try_send(Box::new(job)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
            },
            None => false,
        }
    }

    /// Drain and join. Queued jobs still run; new submissions are refused.
    pub fn shutdown(&self) {
        // dropping the sender ends the worker loops once the queue drains
        drop(self.sender.lock().take());
        for thread in self.threads.lock().drain(..) {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn executes_submitted_jobs() {
        let pool = TaskPool::new(2, 64);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = counter.clone();
            assert!(pool.run(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn try_run_refuses_when_full() {
        let pool = TaskPool::new(1, 1);
        let (release_tx, release_rx) = bounded::<()>(0);

        // occupy the single thread
        assert!(pool.run(move || {
            let _ = release_rx.recv();
        }));
        // fill the single queue slot
        assert!(pool.run(|| {}));
        std::thread::sleep(Duration::from_millis(20));

        // the queue slot may have been freed when the worker picked the job
        // up; saturate it again without blocking
        while pool.try_run(|| {}) {}
        assert!(!pool.try_run(|| {}));

        release_tx.send(()).unwrap();
        pool.shutdown();
    }

    #[test]
    fn refuses_after_shutdown() {
        let pool = TaskPool::new(1, 8);
        pool.shutdown();
        assert!(!pool.run(|| {}));
        assert!(!pool.try_run(|| {}));
    }
}
