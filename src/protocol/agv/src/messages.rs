// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Typed messages and their payload layouts.
//!
//! Type id allocation: upstream (vehicle to server) `0x1000..0x2000`,
//! downstream (server to vehicle) `0x2000..0x3000`, bidirectional
//! `0x3000..0x4000`.

use crate::wire::*;

use std::convert::TryFrom;

// upstream
pub const MSG_AGV_TELEMETRY: u16 = 0x1001;
pub const MSG_MPC_TRAJECTORY: u16 = 0x1002;
pub const MSG_TASK_FEEDBACK: u16 = 0x1003;

// downstream
pub const MSG_AGV_COMMAND: u16 = 0x2001;
pub const MSG_NAVIGATION_TASK: u16 = 0x2002;
pub const MSG_LATENCY_PROBE: u16 = 0x2003;

// bidirectional
pub const MSG_COMMON_RESPONSE: u16 = 0x3001;
pub const MSG_HEARTBEAT: u16 = 0x3002;

/// Human-readable message name for logging.
pub fn message_type_name(msg_type: u16) -> &'static str {
    match msg_type {
        MSG_AGV_TELEMETRY => "AgvTelemetry",
        MSG_MPC_TRAJECTORY => "MpcTrajectory",
        MSG_TASK_FEEDBACK => "TaskFeedback",
        MSG_AGV_COMMAND => "AgvCommand",
        MSG_NAVIGATION_TASK => "NavigationTask",
        MSG_LATENCY_PROBE => "LatencyProbe",
        MSG_COMMON_RESPONSE => "CommonResponse",
        MSG_HEARTBEAT => "Heartbeat",
        _ => "Unknown",
    }
}

/// A 2D map position in meters.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

fn put_point(dst: &mut Vec<u8>, p: &Point) {
    put_f64(dst, p.x);
    put_f64(dst, p.y);
}

fn read_point(r: &mut Reader) -> Result<Point, WireError> {
    Ok(Point {
        x: r.f64()?,
        y: r.f64()?,
    })
}

/// Vehicle commands, ordered by severity. EmergencyStop must always be
/// forwarded on the fast path.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CmdType {
    EmergencyStop = 1,
    Resume = 2,
    Pause = 3,
    Reboot = 4,
    NavigateTo = 5,
}

impl TryFrom<u8> for CmdType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            1 => Ok(CmdType::EmergencyStop),
            2 => Ok(CmdType::Resume),
            3 => Ok(CmdType::Pause),
            4 => Ok(CmdType::Reboot),
            5 => Ok(CmdType::NavigateTo),
            _ => Err(WireError::InvalidEnum {
                what: "cmd_type",
                value,
            }),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    MoveOnly = 1,
    PickUp = 2,
    PutDown = 3,
}

impl TryFrom<u8> for Operation {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            1 => Ok(Operation::MoveOnly),
            2 => Ok(Operation::PickUp),
            3 => Ok(Operation::PutDown),
            _ => Err(WireError::InvalidEnum {
                what: "operation",
                value,
            }),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    InvalidRequest = 1,
    InternalError = 2,
    Timeout = 3,
}

impl TryFrom<u8> for Status {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(Status::Ok),
            1 => Ok(Status::InvalidRequest),
            2 => Ok(Status::InternalError),
            3 => Ok(Status::Timeout),
            _ => Err(WireError::InvalidEnum {
                what: "status",
                value,
            }),
        }
    }
}

/// High-frequency vehicle state report, nominally 50 Hz.
#[derive(Clone, Debug, PartialEq)]
pub struct Telemetry {
    pub agv_id: String,
    pub timestamp_us: u64,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub confidence: f64,
    pub linear_velocity: f64,
    pub angular_velocity: f64,
    pub acceleration: f64,
    pub payload_weight: f64,
    /// Battery charge in percent.
    pub battery: f64,
    pub error_code: u32,
    pub fork_height: f64,
}

impl WireMessage for Telemetry {
    const MSG_TYPE: u16 = MSG_AGV_TELEMETRY;

    fn encode(&self, dst: &mut Vec<u8>) {
        put_string(dst, &self.agv_id);
        put_u64(dst, self.timestamp_us);
        put_f64(dst, self.x);
        put_f64(dst, self.y);
        put_f64(dst, self.theta);
        put_f64(dst, self.confidence);
        put_f64(dst, self.linear_velocity);
        put_f64(dst, self.angular_velocity);
        put_f64(dst, self.acceleration);
        put_f64(dst, self.payload_weight);
        put_f64(dst, self.battery);
        put_u32(dst, self.error_code);
        put_f64(dst, self.fork_height);
    }

    fn decode(src: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(src);
        Ok(Self {
            agv_id: r.string()?,
            timestamp_us: r.u64()?,
            x: r.f64()?,
            y: r.f64()?,
            theta: r.f64()?,
            confidence: r.f64()?,
            linear_velocity: r.f64()?,
            angular_velocity: r.f64()?,
            acceleration: r.f64()?,
            payload_weight: r.f64()?,
            battery: r.f64()?,
            error_code: r.u32()?,
            fork_height: r.f64()?,
        })
    }
}

/// Predicted trajectory from the vehicle's motion controller.
#[derive(Clone, Debug, PartialEq)]
pub struct MpcTrajectory {
    pub agv_id: String,
    pub timestamp_us: u64,
    /// (x, y, theta) per predicted step.
    pub points: Vec<(f64, f64, f64)>,
}

impl WireMessage for MpcTrajectory {
    const MSG_TYPE: u16 = MSG_MPC_TRAJECTORY;

    fn encode(&self, dst: &mut Vec<u8>) {
        put_string(dst, &self.agv_id);
        put_u64(dst, self.timestamp_us);
        put_u16(dst, self.points.len() as u16);
        for (x, y, theta) in &self.points {
            put_f64(dst, *x);
            put_f64(dst, *y);
            put_f64(dst, *theta);
        }
    }

    fn decode(src: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(src);
        let agv_id = r.string()?;
        let timestamp_us = r.u64()?;
        let count = r.u16()? as usize;
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            points.push((r.f64()?, r.f64()?, r.f64()?));
        }
        Ok(Self {
            agv_id,
            timestamp_us,
            points,
        })
    }
}

/// Progress report for a previously assigned task.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskFeedback {
    pub agv_id: String,
    pub task_id: u64,
    pub timestamp_us: u64,
    /// Completion in percent.
    pub progress: f64,
    pub status: Status,
}

impl WireMessage for TaskFeedback {
    const MSG_TYPE: u16 = MSG_TASK_FEEDBACK;

    fn encode(&self, dst: &mut Vec<u8>) {
        put_string(dst, &self.agv_id);
        put_u64(dst, self.task_id);
        put_u64(dst, self.timestamp_us);
        put_f64(dst, self.progress);
        put_u8(dst, self.status as u8);
    }

    fn decode(src: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(src);
        Ok(Self {
            agv_id: r.string()?,
            task_id: r.u64()?,
            timestamp_us: r.u64()?,
            progress: r.f64()?,
            status: Status::try_from(r.u8()?)?,
        })
    }
}

/// Direct command to a vehicle.
#[derive(Clone, Debug, PartialEq)]
pub struct AgvCommand {
    pub target_agv_id: String,
    pub timestamp_us: u64,
    pub cmd_type: CmdType,
}

impl WireMessage for AgvCommand {
    const MSG_TYPE: u16 = MSG_AGV_COMMAND;

    fn encode(&self, dst: &mut Vec<u8>) {
        put_string(dst, &self.target_agv_id);
        put_u64(dst, self.timestamp_us);
        put_u8(dst, self.cmd_type as u8);
    }

    fn decode(src: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(src);
        Ok(Self {
            target_agv_id: r.string()?,
            timestamp_us: r.u64()?,
            cmd_type: CmdType::try_from(r.u8()?)?,
        })
    }
}

/// A navigation assignment with its planned path.
#[derive(Clone, Debug, PartialEq)]
pub struct NavigationTask {
    pub target_agv_id: String,
    pub task_id: u64,
    pub target_node: Point,
    pub operation: Operation,
    pub global_path: Vec<Point>,
}

impl WireMessage for NavigationTask {
    const MSG_TYPE: u16 = MSG_NAVIGATION_TASK;

    fn encode(&self, dst: &mut Vec<u8>) {
        put_string(dst, &self.target_agv_id);
        put_u64(dst, self.task_id);
        put_point(dst, &self.target_node);
        put_u8(dst, self.operation as u8);
        put_u16(dst, self.global_path.len() as u16);
        for point in &self.global_path {
            put_point(dst, point);
        }
    }

    fn decode(src: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(src);
        let target_agv_id = r.string()?;
        let task_id = r.u64()?;
        let target_node = read_point(&mut r)?;
        let operation = Operation::try_from(r.u8()?)?;
        let count = r.u16()? as usize;
        let mut global_path = Vec::with_capacity(count);
        for _ in 0..count {
            global_path.push(read_point(&mut r)?);
        }
        Ok(Self {
            target_agv_id,
            task_id,
            target_node,
            operation,
            global_path,
        })
    }
}

/// Round-trip latency probe. The server sends `is_response = false`; the
/// vehicle echoes the probe back with `is_response = true` and the original
/// sequence number and send timestamp intact.
#[derive(Clone, Debug, PartialEq)]
pub struct LatencyProbe {
    pub target_agv_id: String,
    pub send_timestamp_us: u64,
    pub seq_num: u64,
    pub is_response: bool,
}

impl WireMessage for LatencyProbe {
    const MSG_TYPE: u16 = MSG_LATENCY_PROBE;

    fn encode(&self, dst: &mut Vec<u8>) {
        put_string(dst, &self.target_agv_id);
        put_u64(dst, self.send_timestamp_us);
        put_u64(dst, self.seq_num);
        put_bool(dst, self.is_response);
    }

    fn decode(src: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(src);
        Ok(Self {
            target_agv_id: r.string()?,
            send_timestamp_us: r.u64()?,
            seq_num: r.u64()?,
            is_response: r.bool()?,
        })
    }
}

/// Generic acknowledgement for requests without a dedicated reply type.
#[derive(Clone, Debug, PartialEq)]
pub struct CommonResponse {
    pub status: Status,
    pub message: String,
    pub timestamp_us: u64,
}

impl WireMessage for CommonResponse {
    const MSG_TYPE: u16 = MSG_COMMON_RESPONSE;

    fn encode(&self, dst: &mut Vec<u8>) {
        put_u8(dst, self.status as u8);
        put_string(dst, &self.message);
        put_u64(dst, self.timestamp_us);
    }

    fn decode(src: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(src);
        Ok(Self {
            status: Status::try_from(r.u8()?)?,
            message: r.string()?,
            timestamp_us: r.u64()?,
        })
    }
}

/// Liveness keep-alive, echoed by the gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct Heartbeat {
    pub agv_id: String,
    pub timestamp_us: u64,
}

impl WireMessage for Heartbeat {
    const MSG_TYPE: u16 = MSG_HEARTBEAT;

    fn encode(&self, dst: &mut Vec<u8>) {
        put_string(dst, &self.agv_id);
        put_u64(dst, self.timestamp_us);
    }

    fn decode(src: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(src);
        Ok(Self {
            agv_id: r.string()?,
            timestamp_us: r.u64()?,
        })
    }
}
