// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::latency::LatencyMonitor;
use crate::sessions::SessionManager;
use crate::tasks::TaskPool;

use config::{AgvGatewayConfig, GatewayConfig};
use protocol_agv::Frame;
use queues::WakingSender;
use std::time::Duration;

/// A weak handle to a connection: the id is unique for the lifetime of the
/// process, while the token addresses the slab slot on the owning worker.
/// Delivery through a handle is validated against the live connection id, so
/// a handle to a dead connection routes nowhere instead of reaching a slot
/// that has been reused.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConnectionRef {
    pub conn_id: u64,
    pub worker: usize,
    pub token: usize,
}

/// A frame addressed to one connection, in flight toward its owning worker.
pub struct Outbound {
    pub conn_id: u64,
    pub token: usize,
    pub frame: Frame,
}

/// Shared services of the gateway. All state is internally synchronized;
/// handlers on any worker thread, the listener timers, and the task pool all
/// operate against one instance.
pub struct GatewayContext {
    sessions: SessionManager,
    latency: LatencyMonitor,
    tasks: TaskPool,
    outbound: Vec<WakingSender<Outbound>>,
    session_timeout: Duration,
    low_battery_threshold: f64,
    probe_expiry: Duration,
}

impl GatewayContext {
    pub(crate) fn new(config: &AgvGatewayConfig, outbound: Vec<WakingSender<Outbound>>) -> Self {
        let gateway = config.gateway();
        Self {
            sessions: SessionManager::new(),
            latency: LatencyMonitor::new(),
            tasks: TaskPool::new(
                std::cmp::max(1, gateway.task_threads()),
                gateway.task_queue_depth(),
            ),
            outbound,
            session_timeout: Duration::from_secs_f64(gateway.session_timeout()),
            low_battery_threshold: gateway.low_battery_threshold(),
            probe_expiry: Duration::from_secs_f64(gateway.probe_expiry()),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn latency(&self) -> &LatencyMonitor {
        &self.latency
    }

    pub(crate) fn tasks(&self) -> &TaskPool {
        &self.tasks
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    pub fn low_battery_threshold(&self) -> f64 {
        self.low_battery_threshold
    }

    pub fn probe_expiry(&self) -> Duration {
        self.probe_expiry
    }

    /// Route a frame toward the connection behind `conn`. Returns `false`
    /// when the owning worker's queue is full or the worker is gone; the
    /// worker additionally drops frames whose connection id no longer
    /// matches the slot.
    pub fn send_to(&self, conn: &ConnectionRef, frame: Frame) -> bool {
        match self.outbound.get(conn.worker) {
            Some(queue) => queue
                .try_send(Outbound {
                    conn_id: conn.conn_id,
                    token: conn.token,
                    frame,
                })
                .is_ok(),
            None => false,
        }
    }
}
