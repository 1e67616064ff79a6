// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A TCP gateway for an AGV fleet.
//!
//! Vehicles hold long-lived connections speaking a length-header framed
//! protocol. A listener thread accepts and shards connections across worker
//! reactors; handlers run inline on the reactors for hot-path messages and
//! on a blocking task pool for slow ones. Per-vehicle sessions track
//! liveness (with a watchdog), battery, pose, and round-trip latency.

#[macro_use]
extern crate logger;

mod agv;
mod context;
mod dispatch;
mod handlers;
mod latency;
mod listener;
mod sessions;
mod tasks;
mod worker;

pub use agv::{AgvSession, Pose, SessionState};
pub use context::{ConnectionRef, GatewayContext, Outbound};
pub use dispatch::{Dispatcher, Reply};
pub use latency::{LatencyMonitor, RttStats};
pub use sessions::SessionManager;
pub use tasks::{TaskPool, WorkerTask};

use common::signal::Signal;
use config::{AgvGatewayConfig, WorkerConfig};
use crossbeam_channel::{bounded, Sender};
use listener::ListenerBuilder;
use net::{Token, Waker};
use std::io::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use worker::WorkerBuilder;

pub(crate) const LISTENER_TOKEN: Token = Token(usize::MAX - 1);
pub(crate) const WAKER_TOKEN: Token = Token(usize::MAX);
pub(crate) const QUEUE_CAPACITY: usize = 1024;

const THREAD_PREFIX: &str = "agv";

/// A gateway that has been configured but not yet spawned.
pub struct GatewayBuilder {
    listener: ListenerBuilder,
    workers: Vec<WorkerBuilder>,
    context: Arc<GatewayContext>,
}

impl GatewayBuilder {
    /// Bind the listen socket and prepare the worker reactors. A worker
    /// count of zero collapses to one reactor carrying every connection.
    pub fn new(config: AgvGatewayConfig, log_drain: Box<dyn logger::Drain>) -> Result<Self> {
        let worker_threads = std::cmp::max(1, config.worker().threads());

        let mut workers = Vec::with_capacity(worker_threads);
        let mut outbound_senders = Vec::with_capacity(worker_threads);
        for _ in 0..worker_threads {
            let worker = WorkerBuilder::new(&config)?;
            outbound_senders.push(worker.outbound_sender());
            workers.push(worker);
        }

        let context = Arc::new(GatewayContext::new(&config, outbound_senders));
        let listener = ListenerBuilder::new(&config, log_drain)?;

        Ok(Self {
            listener,
            workers,
            context,
        })
    }

    /// The bound listen address. Useful when the configured port was zero.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Spawn the listener and worker threads and return the running gateway.
    pub fn spawn(self) -> Gateway {
        let mut dispatcher = Dispatcher::new();
        handlers::register(&mut dispatcher);
        let dispatcher = Arc::new(dispatcher);

        let local_addr = self.listener.local_addr();
        let context = self.context;

        let mut threads = Vec::new();
        let mut signal_senders = Vec::new();
        let mut wakers = Vec::new();
        let mut session_senders = Vec::new();
        let mut worker_wakers = Vec::new();

        for (id, builder) in self.workers.into_iter().enumerate() {
            let (session_tx, session_rx) = bounded(QUEUE_CAPACITY);
            let (signal_tx, signal_rx) = bounded(QUEUE_CAPACITY);
            session_senders.push(session_tx);
            signal_senders.push(signal_tx);
            wakers.push(builder.waker());
            worker_wakers.push(builder.waker());

            let mut worker = builder.build(
                id,
                session_rx,
                signal_rx,
                context.clone(),
                dispatcher.clone(),
            );
            threads.push(
                std::thread::Builder::new()
                    .name(format!("{}_worker_{}", THREAD_PREFIX, id))
                    .spawn(move || worker.run())
                    .expect("failed to spawn worker thread"),
            );
        }

        let (signal_tx, signal_rx) = bounded(QUEUE_CAPACITY);
        signal_senders.push(signal_tx);
        wakers.push(self.listener.waker());

        let mut listener = self
            .listener
            .build(session_senders, worker_wakers, signal_rx, context.clone());
        threads.insert(
            0,
            std::thread::Builder::new()
                .name(format!("{}_listener", THREAD_PREFIX))
                .spawn(move || listener.run())
                .expect("failed to spawn listener thread"),
        );

        Gateway {
            threads,
            context,
            local_addr,
            shutdown: ShutdownHandle {
                senders: signal_senders,
                wakers,
            },
        }
    }
}

/// A running gateway. Dropping without calling [`Gateway::shutdown`] or
/// [`Gateway::wait`] detaches the threads.
pub struct Gateway {
    threads: Vec<JoinHandle<()>>,
    context: Arc<GatewayContext>,
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,
}

impl Gateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared services, for embedding and inspection.
    pub fn context(&self) -> Arc<GatewayContext> {
        self.context.clone()
    }

    /// A cloneable handle that requests a graceful shutdown, suitable for a
    /// signal handler.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Request shutdown and block until every thread has exited.
    pub fn shutdown(self) {
        self.shutdown.shutdown();
        self.wait()
    }

    /// Block until the threads exit. Under normal operation this blocks
    /// until a shutdown is requested elsewhere.
    pub fn wait(self) {
        for thread in self.threads {
            let _ = thread.join();
        }
        self.context.tasks().shutdown();
    }
}

/// Requests a graceful stop of every gateway thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    senders: Vec<Sender<Signal>>,
    wakers: Vec<Arc<Waker>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        for sender in &self.senders {
            let _ = sender.try_send(Signal::Shutdown);
        }
        for waker in &self.wakers {
            let _ = waker.wake();
        }
    }
}
