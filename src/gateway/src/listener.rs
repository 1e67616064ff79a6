// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The listener thread: accepts connections and shards them round-robin
//! across the worker reactors. It also owns the gateway's periodic work —
//! the liveness watchdog and the latency probe rounds — and flushes the log
//! drain outside of any latency-critical path.

use crate::agv::SessionState;
use crate::context::GatewayContext;
use crate::worker::NewSession;
use crate::LISTENER_TOKEN;

use common::signal::Signal;
use common::timer::TimerWheel;
use config::{AgvGatewayConfig, GatewayConfig, ServerConfig, TcpConfig};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use logger::Drain;
use ::net::event::Source;
use ::net::*;
use protocol_agv::Frame;
use session::Session;
use std::io::{Error, ErrorKind, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Periodic work owned by the listener loop.
#[derive(Copy, Clone)]
enum Tick {
    Watchdog,
    LatencyProbe,
}

pub(crate) struct ListenerBuilder {
    listener: TcpListener,
    local_addr: SocketAddr,
    poll: Poll,
    waker: Arc<Waker>,
    log_drain: Box<dyn Drain>,
    nevent: usize,
    timeout: Duration,
    nodelay: bool,
    watchdog_interval: Duration,
    probe_interval: Duration,
}

impl ListenerBuilder {
    pub fn new(config: &AgvGatewayConfig, log_drain: Box<dyn Drain>) -> Result<Self> {
        let addr = config.server().socket_addr().map_err(|e| {
            error!("{}", e);
            Error::new(ErrorKind::Other, "bad listen address")
        })?;

        let mut listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        listener.register(poll.registry(), LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), crate::WAKER_TOKEN)?);

        Ok(Self {
            listener,
            local_addr,
            poll,
            waker,
            log_drain,
            nevent: config.server().nevent(),
            timeout: Duration::from_millis(config.server().timeout() as u64),
            nodelay: config.tcp().nodelay(),
            watchdog_interval: Duration::from_millis(config.gateway().watchdog_interval_ms()),
            probe_interval: Duration::from_secs_f64(config.gateway().latency_probe_interval()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    pub fn build(
        self,
        session_senders: Vec<Sender<NewSession>>,
        worker_wakers: Vec<Arc<Waker>>,
        signal_rx: Receiver<Signal>,
        context: Arc<GatewayContext>,
    ) -> Listener {
        Listener {
            listener: self.listener,
            local_addr: self.local_addr,
            poll: self.poll,
            session_senders,
            worker_wakers,
            next_sender: 0,
            next_conn_id: 0,
            signal_rx,
            context,
            log_drain: self.log_drain,
            timers: TimerWheel::new(),
            nevent: self.nevent,
            timeout: self.timeout,
            nodelay: self.nodelay,
            watchdog_interval: self.watchdog_interval,
            probe_interval: self.probe_interval,
        }
    }
}

pub(crate) struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    poll: Poll,
    session_senders: Vec<Sender<NewSession>>,
    worker_wakers: Vec<Arc<Waker>>,
    next_sender: usize,
    next_conn_id: u64,
    signal_rx: Receiver<Signal>,
    context: Arc<GatewayContext>,
    log_drain: Box<dyn Drain>,
    timers: TimerWheel<Tick>,
    nevent: usize,
    timeout: Duration,
    nodelay: bool,
    watchdog_interval: Duration,
    probe_interval: Duration,
}

impl Listener {
    pub fn run(&mut self) {
        info!("gateway listening on {}", self.local_addr);

        self.timers
            .schedule_repeating(self.watchdog_interval, Tick::Watchdog);
        self.timers
            .schedule_repeating(self.probe_interval, Tick::LatencyProbe);

        let mut events = Events::with_capacity(self.nevent);

        loop {
            // sleep until readiness, a wakeup, or the next timer
            let timeout = self
                .timers
                .next_timeout(Instant::now())
                .map_or(self.timeout, |t| t.min(self.timeout));
            if self.poll.poll(&mut events, Some(timeout)).is_err() {
                error!("error polling listener");
            }

            for event in events.iter() {
                if event.token() == LISTENER_TOKEN {
                    self.accept();
                }
            }

            for (_, tick) in self.timers.poll_expired(Instant::now()) {
                match tick {
                    Tick::Watchdog => self.check_watchdog(),
                    Tick::LatencyProbe => self.probe_latency(),
                }
            }

            while let Ok(signal) = self.signal_rx.try_recv() {
                match signal {
                    Signal::Shutdown => {
                        info!("gateway shutting down");
                        let _ = self.log_drain.flush();
                        return;
                    }
                }
            }

            let _ = self.log_drain.flush();
        }
    }

    /// Accept until the listen queue is drained, handing each connection to
    /// a worker round-robin. A worker whose queue is full is skipped.
    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if self.nodelay {
                        let _ = stream.set_nodelay(true);
                    }

                    self.next_conn_id += 1;
                    let mut new = NewSession {
                        session: Session::from(stream),
                        conn_id: self.next_conn_id,
                    };
                    trace!("accepted connection {} from {}", new.conn_id, peer);

                    let workers = self.session_senders.len();
                    let mut placed = None;
                    for i in 0..workers {
                        let index = (self.next_sender + i) % workers;
                        match self.session_senders[index].try_send(new) {
                            Ok(()) => {
                                self.next_sender = self.next_sender.wrapping_add(1);
                                placed = Some(index);
                                break;
                            }
                            Err(TrySendError::Full(returned))
                            | Err(TrySendError::Disconnected(returned)) => {
                                new = returned;
                            }
                        }
                    }

                    match placed {
                        Some(index) => {
                            let _ = self.worker_wakers[index].wake();
                        }
                        None => {
                            error!("all worker queues full, dropping connection from {}", peer);
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    // includes fd exhaustion; the listen socket stays
                    // registered and accept is retried on the next event
                    error!("accept error: {}", e);
                    break;
                }
            }
        }
    }

    /// Mark sessions silent for longer than the session timeout as Offline.
    /// The session stays in the table and its connection stays open.
    fn check_watchdog(&mut self) {
        let timeout = self.context.session_timeout();
        self.context.sessions().for_each(|agv_id, session| {
            if session.mark_offline_if_stale(timeout) {
                error!(
                    "[WATCHDOG] [{}] offline ({:?} without activity)",
                    agv_id, timeout
                );
            }
        });
    }

    /// Send a ping to every online vehicle with a live connection, log the
    /// accumulated RTT statistics, and purge unanswered probes.
    fn probe_latency(&mut self) {
        let context = &self.context;

        context.sessions().for_each(|agv_id, session| {
            if session.state() != SessionState::Online {
                return;
            }
            if let Some(conn) = session.connection() {
                let ping = context.latency().create_ping(agv_id);
                if !context.send_to(&conn, Frame::from_message(&ping)) {
                    trace!("[{}] probe not routable", agv_id);
                }
            }
        });

        for (agv_id, stats) in context.latency().all_stats() {
            if stats.samples > 0 {
                info!(
                    "[RTT] [{}] latest={:.3}ms avg={:.3}ms min={:.3}ms max={:.3}ms samples={}",
                    agv_id,
                    stats.latest_ms,
                    stats.avg_ms,
                    stats.min_ms,
                    stats.max_ms,
                    stats.samples
                );
            }
        }

        let purged = context.latency().cleanup_expired(context.probe_expiry());
        if purged > 0 {
            warn!("purged {} unanswered probes", purged);
        }
    }
}
