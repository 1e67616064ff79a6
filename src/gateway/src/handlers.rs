// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Business handlers for every message type the gateway speaks.
//!
//! Telemetry, Heartbeat, AgvCommand, and LatencyProbe run inline on the
//! worker reactor: they touch hot session state and reply through the
//! current connection. NavigationTask is the slow path and is packaged onto
//! the task pool; its response is routed back to the owning reactor.

use crate::agv::Pose;
use crate::context::{ConnectionRef, GatewayContext};
use crate::dispatch::{Dispatcher, Reply};
use crate::tasks::WorkerTask;

use common::time::Timestamp;
use protocol_agv::*;
use std::sync::Arc;
use std::time::Duration;

// simulated blocking store for accepted navigation tasks
const SIMULATED_STORE_DELAY: Duration = Duration::from_millis(200);

// tasks that queued longer than this indicate pool saturation
const QUEUE_DELAY_ALARM: Duration = Duration::from_millis(500);

pub(crate) fn register(dispatcher: &mut Dispatcher) {
    dispatcher.register::<Telemetry, _>(on_telemetry);
    dispatcher.register::<Heartbeat, _>(on_heartbeat);
    dispatcher.register::<NavigationTask, _>(on_navigation_task);
    dispatcher.register::<AgvCommand, _>(on_agv_command);
    dispatcher.register::<LatencyProbe, _>(on_latency_probe);
    dispatcher.set_default(on_unhandled);
}

fn now_us() -> u64 {
    Timestamp::now().as_micros()
}

/// High-frequency state report. Runs inline: refresh liveness, fold battery
/// and pose into the session, then run the low-battery rule.
fn on_telemetry(ctx: &Arc<GatewayContext>, conn: ConnectionRef, msg: Telemetry, reply: &mut Reply) {
    let session = ctx.sessions().ensure(&msg.agv_id, conn);

    session.touch();
    session.update_battery(msg.battery);
    session.update_pose(Pose {
        x: msg.x,
        y: msg.y,
        theta: msg.theta,
        confidence: msg.confidence,
    });

    if session.begin_charging_if_low(ctx.low_battery_threshold()) {
        warn!(
            "[{}] low battery ({:.1}%), sending charge command",
            msg.agv_id, msg.battery
        );
        reply.push(&AgvCommand {
            target_agv_id: msg.agv_id.clone(),
            timestamp_us: now_us(),
            cmd_type: CmdType::NavigateTo,
        });
    }
}

/// Keep-alive. Refresh liveness and echo a heartbeat of the same shape.
fn on_heartbeat(ctx: &Arc<GatewayContext>, conn: ConnectionRef, msg: Heartbeat, reply: &mut Reply) {
    let session = ctx.sessions().ensure(&msg.agv_id, conn);
    session.touch();
    debug!("heartbeat from [{}]", msg.agv_id);

    reply.push(&Heartbeat {
        agv_id: msg.agv_id,
        timestamp_us: now_us(),
    });
}

/// Slow path: the store is simulated as blocking work, so the task is
/// packaged and submitted to the pool. The reactor never blocks on the
/// queue; a full queue is answered inline with an error.
fn on_navigation_task(
    ctx: &Arc<GatewayContext>,
    conn: ConnectionRef,
    msg: NavigationTask,
    reply: &mut Reply,
) {
    let session = ctx.sessions().ensure(&msg.target_agv_id, conn);

    let task = WorkerTask {
        conn,
        session,
        msg_type: NavigationTask::MSG_TYPE,
        submit_time: Timestamp::now(),
        task: msg,
    };

    let pool_ctx = ctx.clone();
    let submitted = ctx
        .tasks()
        .try_run(move || process_worker_task(&pool_ctx, task));

    if !submitted {
        error!("task queue full, rejecting navigation task");
        reply.push(&CommonResponse {
            status: Status::InternalError,
            message: "task queue full".to_string(),
            timestamp_us: now_us(),
        });
    }
}

/// Runs on a task pool thread. The connection handle is weak: if the vehicle
/// disconnected while the task was queued or stored, the response is
/// dropped at routing or by the owning worker, and the task ends silently.
/// The session reference stays valid for the whole execution regardless.
fn process_worker_task(ctx: &Arc<GatewayContext>, task: WorkerTask) {
    let queued = task.queue_latency();
    if queued > QUEUE_DELAY_ALARM {
        warn!(
            "navigation task {} for [{}] queued {:?}",
            task.task.task_id,
            task.session.agv_id(),
            queued
        );
    }

    // simulated persistent store of the assignment
    std::thread::sleep(SIMULATED_STORE_DELAY);
    debug!(
        "stored navigation task {} for [{}] ({} path points)",
        task.task.task_id,
        task.task.target_agv_id,
        task.task.global_path.len()
    );

    let response = CommonResponse {
        status: Status::Ok,
        message: format!("task {} accepted", task.task.task_id),
        timestamp_us: now_us(),
    };
    if !ctx.send_to(&task.conn, Frame::from_message(&response)) {
        trace!(
            "connection {} gone before task {} response",
            task.conn.conn_id,
            task.task.task_id
        );
    }
}

/// Command pass-through. Always inline: critical commands such as
/// EmergencyStop must never sit behind the task queue.
fn on_agv_command(
    ctx: &Arc<GatewayContext>,
    _conn: ConnectionRef,
    msg: AgvCommand,
    reply: &mut Reply,
) {
    let target = match ctx.sessions().find(&msg.target_agv_id) {
        Some(target) => target,
        None => {
            warn!("command for unknown vehicle [{}]", msg.target_agv_id);
            reply.push(&CommonResponse {
                status: Status::InvalidRequest,
                message: format!("unknown vehicle {}", msg.target_agv_id),
                timestamp_us: now_us(),
            });
            return;
        }
    };

    let delivered = target
        .connection()
        .map(|target_conn| ctx.send_to(&target_conn, Frame::from_message(&msg)))
        .unwrap_or(false);

    if delivered {
        info!("forwarded {:?} to [{}]", msg.cmd_type, msg.target_agv_id);
        reply.push(&CommonResponse {
            status: Status::Ok,
            message: format!("command delivered to {}", msg.target_agv_id),
            timestamp_us: now_us(),
        });
    } else {
        warn!(
            "[{}] unreachable, dropping {:?}",
            msg.target_agv_id, msg.cmd_type
        );
        reply.push(&CommonResponse {
            status: Status::Timeout,
            message: format!("vehicle {} unreachable", msg.target_agv_id),
            timestamp_us: now_us(),
        });
    }
}

/// Pong side of the latency probe. The ping side is driven by the listener's
/// probe timer.
fn on_latency_probe(
    ctx: &Arc<GatewayContext>,
    _conn: ConnectionRef,
    msg: LatencyProbe,
    _reply: &mut Reply,
) {
    if !msg.is_response {
        warn!("unexpected probe request from [{}]", msg.target_agv_id);
        return;
    }

    match ctx.latency().process_pong(&msg) {
        Some(rtt_ms) => trace!("[{}] rtt {:.3} ms", msg.target_agv_id, rtt_ms),
        None => warn!(
            "pong from [{}] with unknown seq {}",
            msg.target_agv_id, msg.seq_num
        ),
    }
}

/// Known-but-unhandled upstream types are dropped quietly; anything else is
/// logged so a misbehaving client is visible.
fn on_unhandled(
    _ctx: &Arc<GatewayContext>,
    _conn: ConnectionRef,
    frame: &protocol_agv::Frame,
    _reply: &mut Reply,
) {
    match frame.msg_type {
        MSG_MPC_TRAJECTORY | MSG_TASK_FEEDBACK => debug!(
            "ignoring {} ({} bytes)",
            message_type_name(frame.msg_type),
            frame.payload.len()
        ),
        _ => warn!(
            "unknown message type {:#06x} ({} bytes)",
            frame.msg_type,
            frame.payload.len()
        ),
    }
}
