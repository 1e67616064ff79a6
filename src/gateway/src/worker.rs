// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Worker reactors. Each worker owns a poll instance and a slab of
//! connections handed off by the listener; it decodes frames, dispatches
//! them to the business handlers, and writes replies and routed outbound
//! frames back to its connections.

use crate::context::{ConnectionRef, GatewayContext, Outbound};
use crate::dispatch::{Dispatcher, Reply};
use crate::{QUEUE_CAPACITY, WAKER_TOKEN};

use common::signal::Signal;
use config::{AgvGatewayConfig, GatewayConfig, WorkerConfig};
use crossbeam_channel::Receiver;
use ::net::event::{Event, Source};
use ::net::*;
use protocol_agv::{Frame, FrameParser};
use queues::{waking_queue, WakingReceiver, WakingSender};
use session::{ServerSession, Session};
use slab::Slab;
use std::io::{Error, ErrorKind, Result};
use std::sync::Arc;
use std::time::Duration;

/// An accepted connection in flight from the listener to a worker.
pub(crate) struct NewSession {
    pub session: Session,
    pub conn_id: u64,
}

struct Connection {
    session: ServerSession<FrameParser, Frame, Frame>,
    conn_id: u64,
    /// Reads are paused while the peer lets our write buffer back up past
    /// the high watermark.
    paused: bool,
}

pub(crate) struct WorkerBuilder {
    poll: Poll,
    waker: Arc<Waker>,
    outbound_tx: WakingSender<Outbound>,
    outbound_rx: WakingReceiver<Outbound>,
    nevent: usize,
    timeout: Duration,
    high_water: usize,
}

impl WorkerBuilder {
    pub fn new(config: &AgvGatewayConfig) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (outbound_tx, outbound_rx) = waking_queue(waker.clone(), QUEUE_CAPACITY);

        Ok(Self {
            poll,
            waker,
            outbound_tx,
            outbound_rx,
            nevent: config.worker().nevent(),
            timeout: Duration::from_millis(config.worker().timeout() as u64),
            high_water: config.gateway().write_high_water(),
        })
    }

    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    pub fn outbound_sender(&self) -> WakingSender<Outbound> {
        self.outbound_tx.clone()
    }

    pub fn build(
        self,
        id: usize,
        session_rx: Receiver<NewSession>,
        signal_rx: Receiver<Signal>,
        context: Arc<GatewayContext>,
        dispatcher: Arc<Dispatcher>,
    ) -> Worker {
        Worker {
            id,
            poll: self.poll,
            connections: Slab::new(),
            session_rx,
            signal_rx,
            outbound_rx: self.outbound_rx,
            context,
            dispatcher,
            nevent: self.nevent,
            timeout: self.timeout,
            high_water: self.high_water,
            low_water: self.high_water / 2,
        }
    }
}

pub(crate) struct Worker {
    id: usize,
    poll: Poll,
    connections: Slab<Connection>,
    session_rx: Receiver<NewSession>,
    signal_rx: Receiver<Signal>,
    outbound_rx: WakingReceiver<Outbound>,
    context: Arc<GatewayContext>,
    dispatcher: Arc<Dispatcher>,
    nevent: usize,
    timeout: Duration,
    high_water: usize,
    low_water: usize,
}

impl Worker {
    pub fn run(&mut self) {
        let mut events = Events::with_capacity(self.nevent);

        loop {
            if self.poll.poll(&mut events, Some(self.timeout)).is_err() {
                error!("worker {}: error polling", self.id);
            }

            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => {
                        // the waker-signalled queues are drained below
                    }
                    token => self.connection_event(token, event),
                }
            }

            self.drain_new_sessions();
            self.drain_outbound();

            while let Ok(signal) = self.signal_rx.try_recv() {
                match signal {
                    Signal::Shutdown => {
                        return;
                    }
                }
            }
        }
    }

    /// Demultiplex readiness for one connection: errors first, then writes
    /// (so the write buffer drains before it grows), reads last.
    fn connection_event(&mut self, token: Token, event: &Event) {
        if event.is_error() {
            self.close(token);
            return;
        }
        if event.is_writable() && self.do_write(token).is_err() {
            self.close(token);
            return;
        }
        if event.is_readable() && self.do_read(token).is_err() {
            self.close(token);
        }
    }

    fn do_write(&mut self, token: Token) -> Result<()> {
        let was_paused = {
            let conn = self
                .connections
                .get_mut(token.0)
                .ok_or_else(|| Error::new(ErrorKind::Other, "non-existent connection"))?;

            match conn.session.flush() {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
            conn.paused
        };

        self.update_readiness(token)?;

        // a drain below the low watermark resumes reading; frames that were
        // buffered while paused are picked up here rather than waiting for
        // the next readable event
        let resumed = was_paused
            && !self
                .connections
                .get(token.0)
                .map(|conn| conn.paused)
                .unwrap_or(true);
        if resumed {
            return self.process_frames(token);
        }
        Ok(())
    }

    fn do_read(&mut self, token: Token) -> Result<()> {
        {
            let conn = self
                .connections
                .get_mut(token.0)
                .ok_or_else(|| Error::new(ErrorKind::Other, "non-existent connection"))?;

            match conn.session.fill() {
                Ok(0) => {
                    trace!("worker {}: hangup for connection {}", self.id, conn.conn_id);
                    return Err(Error::new(ErrorKind::Other, "client hangup"));
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    // spurious wakeup
                }
                Err(e) => return Err(e),
            }
        }

        self.process_frames(token)
    }

    /// Decode and dispatch every complete frame buffered on the connection,
    /// writing the handlers' replies back in arrival order.
    fn process_frames(&mut self, token: Token) -> Result<()> {
        loop {
            let (conn_id, frame) = {
                let conn = match self.connections.get_mut(token.0) {
                    Some(conn) => conn,
                    None => return Ok(()),
                };
                if conn.paused {
                    break;
                }
                match conn.session.receive() {
                    Ok(frame) => (conn.conn_id, frame),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    // framing violation: close the connection
                    Err(e) => return Err(e),
                }
            };

            let conn_ref = ConnectionRef {
                conn_id,
                worker: self.id,
                token: token.0,
            };
            let mut reply = Reply::new();
            self.dispatcher
                .dispatch(&self.context, conn_ref, &frame, &mut reply);

            if let Some(conn) = self.connections.get_mut(token.0) {
                for frame in reply.into_frames() {
                    let _ = conn.session.send(frame);
                }
                match conn.session.flush() {
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }
            }
        }

        self.update_readiness(token)
    }

    /// Recompute watermark pausing and event interest after buffer changes.
    fn update_readiness(&mut self, token: Token) -> Result<()> {
        let registry = self.poll.registry();
        let conn = match self.connections.get_mut(token.0) {
            Some(conn) => conn,
            None => return Ok(()),
        };

        let pending = conn.session.write_pending();
        if !conn.paused && pending > self.high_water {
            conn.paused = true;
            warn!(
                "connection {} over write high watermark ({} bytes), pausing reads",
                conn.conn_id, pending
            );
        } else if conn.paused && pending <= self.low_water {
            conn.paused = false;
        }

        let interest = if conn.paused {
            Interest::WRITABLE
        } else if pending > 0 {
            Interest::READABLE.add(Interest::WRITABLE)
        } else {
            Interest::READABLE
        };

        conn.session.reregister(registry, token, interest)
    }

    fn drain_new_sessions(&mut self) {
        while let Ok(new) = self.session_rx.try_recv() {
            let entry = self.connections.vacant_entry();
            let token = Token(entry.key());
            let mut session = ServerSession::new(new.session, FrameParser::new());

            match session.register(self.poll.registry(), token, session.interest()) {
                Ok(()) => {
                    debug!(
                        "worker {}: connection {} registered as {:?}",
                        self.id, new.conn_id, token
                    );
                    entry.insert(Connection {
                        session,
                        conn_id: new.conn_id,
                        paused: false,
                    });
                }
                Err(e) => {
                    error!("worker {}: failed to register connection: {}", self.id, e);
                }
            }
        }
    }

    /// Deliver frames routed here by other threads. A frame whose connection
    /// id no longer matches the slot addresses a connection that died; it is
    /// dropped silently.
    fn drain_outbound(&mut self) {
        while let Some(out) = self.outbound_rx.try_recv() {
            let token = Token(out.token);

            let result = match self.connections.get_mut(token.0) {
                Some(conn) if conn.conn_id == out.conn_id => {
                    let _ = conn.session.send(out.frame);
                    match conn.session.flush() {
                        Ok(_) => Ok(()),
                        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
                        Err(e) => Err(e),
                    }
                }
                _ => {
                    trace!(
                        "worker {}: dropping frame for stale connection {}",
                        self.id,
                        out.conn_id
                    );
                    continue;
                }
            };

            match result.and_then(|_| self.update_readiness(token)) {
                Ok(()) => {}
                Err(_) => self.close(token),
            }
        }
    }

    /// Tear down a connection: deregister, final flush, drop the socket, and
    /// sweep its sessions out of the table.
    fn close(&mut self, token: Token) {
        if self.connections.contains(token.0) {
            let mut conn = self.connections.remove(token.0);
            let _ = conn.session.deregister(self.poll.registry());
            let _ = conn.session.flush();
            let _ = conn.session.shutdown();

            let removed = self.context.sessions().remove_by_connection(conn.conn_id);
            if removed > 0 {
                info!(
                    "worker {}: connection {} closed, {} session(s) removed",
                    self.id, conn.conn_id, removed
                );
            } else {
                debug!("worker {}: connection {} closed", self.id, conn.conn_id);
            }
        }
    }
}
