// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The session table: vehicle id to session, shared across every thread.

use crate::agv::AgvSession;
use crate::context::ConnectionRef;

use common::collections::ConcurrentMap;
use std::sync::Arc;

/// Wraps the concurrent map with session lifecycle semantics. Reads dominate
/// (every telemetry message is a lookup); writes happen on first sight of a
/// vehicle id and on connection teardown.
pub struct SessionManager {
    sessions: ConcurrentMap<String, AgvSession>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: ConcurrentMap::new(),
        }
    }

    /// Look up the session for `agv_id`, creating it on first sight. An
    /// existing session whose vehicle reconnected gets its connection handle
    /// swapped to the new connection.
    pub fn ensure(&self, agv_id: &str, conn: ConnectionRef) -> Arc<AgvSession> {
        if let Some(session) = self.sessions.find(agv_id) {
            if session.connection() != Some(conn) {
                info!("[{}] reconnected, updating session connection", agv_id);
                session.set_connection(conn);
            }
            session
        } else {
            let session = Arc::new(AgvSession::new(agv_id, conn));
            if !self.sessions.insert(agv_id.to_string(), session.clone()) {
                warn!("[{}] session replaced", agv_id);
            } else {
                info!("[{}] session registered", agv_id);
            }
            session
        }
    }

    /// Insert-or-replace a session for `agv_id`. Returns `true` on a fresh
    /// insert, `false` when an existing session was kept and rebound.
    pub fn register(&self, agv_id: &str, conn: ConnectionRef) -> bool {
        if let Some(session) = self.sessions.find(agv_id) {
            session.set_connection(conn);
            false
        } else {
            self.sessions
                .insert(agv_id.to_string(), Arc::new(AgvSession::new(agv_id, conn)))
        }
    }

    pub fn find(&self, agv_id: &str) -> Option<Arc<AgvSession>> {
        self.sessions.find(agv_id)
    }

    pub fn remove(&self, agv_id: &str) -> bool {
        self.sessions.remove(agv_id)
    }

    /// Remove every session bound to the given connection id. Called by the
    /// owning worker when a connection closes.
    pub fn remove_by_connection(&self, conn_id: u64) -> usize {
        self.sessions.erase_if(|agv_id, session| {
            let matches = session.connection().map(|c| c.conn_id) == Some(conn_id);
            if matches {
                warn!("[{}] connection lost, removing session", agv_id);
            }
            matches
        })
    }

    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Arc<AgvSession>),
    {
        self.sessions.for_each(|agv_id, session| f(agv_id, session));
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn agv_ids(&self) -> Vec<String> {
        self.sessions.keys()
    }
}
