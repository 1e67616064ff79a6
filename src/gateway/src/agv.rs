// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Per-vehicle session state.

use crate::context::ConnectionRef;

use common::spin::SpinLock;
use common::time::Timestamp;
use parking_lot::Mutex;
use std::time::Duration;

/// Liveness state of a vehicle session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Messages are arriving within the session timeout.
    Online,
    /// The watchdog saw no activity for longer than the session timeout.
    /// The connection, if any, is left open.
    Offline,
    /// A charge command was issued; suppresses repeated low-battery fires.
    Charging,
}

/// Vehicle pose as reported by telemetry.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub confidence: f64,
}

struct SessionInner {
    last_active_time: Timestamp,
    battery_level: f64,
    state: SessionState,
    connection: Option<ConnectionRef>,
}

/// State tracked per vehicle, created lazily on the first message carrying a
/// given vehicle id and owned by the session table.
///
/// Locking is split two ways: the pose is written at telemetry rate on the
/// reactor thread and sits behind a spinlock; every other field is behind a
/// general mutex. Neither lock is held across a syscall.
pub struct AgvSession {
    agv_id: String,
    inner: Mutex<SessionInner>,
    pose: SpinLock<Pose>,
}

impl AgvSession {
    pub fn new(agv_id: &str, connection: ConnectionRef) -> Self {
        Self {
            agv_id: agv_id.to_string(),
            inner: Mutex::new(SessionInner {
                last_active_time: Timestamp::now(),
                battery_level: 0.0,
                state: SessionState::Online,
                connection: Some(connection),
            }),
            pose: SpinLock::new(Pose::default()),
        }
    }

    pub fn agv_id(&self) -> &str {
        &self.agv_id
    }

    pub fn last_active_time(&self) -> Timestamp {
        self.inner.lock().last_active_time
    }

    pub fn battery_level(&self) -> f64 {
        self.inner.lock().battery_level
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: SessionState) {
        self.inner.lock().state = state;
    }

    /// The current connection handle, if the vehicle ever had one.
    pub fn connection(&self) -> Option<ConnectionRef> {
        self.inner.lock().connection
    }

    /// Swap the connection handle, used when a vehicle reconnects and its
    /// session is kept.
    pub fn set_connection(&self, connection: ConnectionRef) {
        self.inner.lock().connection = Some(connection);
    }

    /// Refresh the liveness timestamp. A session the watchdog had marked
    /// offline comes back online when its vehicle resumes sending.
    pub fn touch(&self) {
        let mut inner = self.inner.lock();
        inner.last_active_time = Timestamp::now();
        if inner.state == SessionState::Offline {
            inner.state = SessionState::Online;
        }
    }

    /// Update the battery level, clamped to `0.0..=100.0`.
    pub fn update_battery(&self, level: f64) {
        self.inner.lock().battery_level = level.clamp(0.0, 100.0);
    }

    pub fn pose(&self) -> Pose {
        *self.pose.lock()
    }

    pub fn update_pose(&self, pose: Pose) {
        *self.pose.lock() = pose;
    }

    /// The low-battery guard: transitions to Charging exactly once per
    /// low-battery episode. Returns `true` when the caller should issue the
    /// charge command.
    pub fn begin_charging_if_low(&self, threshold: f64) -> bool {
        let mut inner = self.inner.lock();
        if inner.battery_level < threshold && inner.state != SessionState::Charging {
            inner.state = SessionState::Charging;
            true
        } else {
            false
        }
    }

    /// The watchdog check: an Online session silent for longer than
    /// `timeout` goes Offline. Returns `true` on the transition.
    pub fn mark_offline_if_stale(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Online && inner.last_active_time.elapsed() > timeout {
            inner.state = SessionState::Offline;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> ConnectionRef {
        ConnectionRef {
            conn_id: 1,
            worker: 0,
            token: 0,
        }
    }

    #[test]
    fn battery_is_clamped() {
        let session = AgvSession::new("AGV-01", conn());
        session.update_battery(120.0);
        assert_eq!(session.battery_level(), 100.0);
        session.update_battery(-3.0);
        assert_eq!(session.battery_level(), 0.0);
        session.update_battery(55.5);
        assert_eq!(session.battery_level(), 55.5);
    }

    #[test]
    fn charge_guard_fires_once_per_episode() {
        let session = AgvSession::new("AGV-01", conn());
        session.update_battery(15.0);

        assert!(session.begin_charging_if_low(20.0));
        assert_eq!(session.state(), SessionState::Charging);
        // still low, but already charging
        assert!(!session.begin_charging_if_low(20.0));

        // healthy battery ends the episode
        session.update_battery(90.0);
        session.set_state(SessionState::Online);
        assert!(!session.begin_charging_if_low(20.0));
    }

    #[test]
    fn watchdog_transition_and_recovery() {
        let session = AgvSession::new("AGV-01", conn());

        // fresh session is within any reasonable timeout
        assert!(!session.mark_offline_if_stale(Duration::from_millis(50)));

        std::thread::sleep(Duration::from_millis(60));
        assert!(session.mark_offline_if_stale(Duration::from_millis(50)));
        assert_eq!(session.state(), SessionState::Offline);
        // the transition is edge triggered
        assert!(!session.mark_offline_if_stale(Duration::from_millis(50)));

        // resumed traffic brings the session back online
        session.touch();
        assert_eq!(session.state(), SessionState::Online);
    }

    #[test]
    fn pose_updates() {
        let session = AgvSession::new("AGV-01", conn());
        session.update_pose(Pose {
            x: 1.0,
            y: 2.0,
            theta: 0.5,
            confidence: 0.9,
        });
        let pose = session.pose();
        assert_eq!(pose.x, 1.0);
        assert_eq!(pose.confidence, 0.9);
    }
}
