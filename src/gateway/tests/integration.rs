// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! End-to-end tests driving the wire protocol through real sockets. Each
//! test spawns a gateway on an ephemeral port and plays the vehicle role
//! over a plain blocking TCP stream.

use agv_gateway::{Gateway, GatewayBuilder, SessionState};
use config::AgvGatewayConfig;
use logger::NopDrain;
use protocol_agv::*;
use protocol_common::{Compose, Parse};

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

fn gateway_with(config: &str) -> (Gateway, SocketAddr) {
    let config: AgvGatewayConfig = toml::from_str(config).expect("bad test config");
    let builder =
        GatewayBuilder::new(config, Box::new(NopDrain)).expect("failed to build gateway");
    let addr = builder.local_addr();
    (builder.spawn(), addr)
}

fn default_gateway() -> (Gateway, SocketAddr) {
    gateway_with(
        r#"
        [server]
        host = "127.0.0.1"
        port = "0"
        "#,
    )
}

fn telemetry(agv_id: &str, battery: f64) -> Telemetry {
    Telemetry {
        agv_id: agv_id.to_string(),
        timestamp_us: 1,
        x: 10.0,
        y: 20.0,
        theta: 0.5,
        confidence: 0.95,
        linear_velocity: 1.0,
        angular_velocity: 0.0,
        acceleration: 0.0,
        payload_weight: 0.0,
        battery,
        error_code: 0,
        fork_height: 0.0,
    }
}

/// A vehicle-side client over a plain blocking stream with a short read
/// timeout, accumulating frames as they arrive.
struct Vehicle {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl Vehicle {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("failed to connect");
        stream.set_nodelay(true).expect("failed to set nodelay");
        stream
            .set_read_timeout(Some(Duration::from_millis(50)))
            .expect("failed to set read timeout");
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    fn send<M: WireMessage>(&mut self, message: &M) {
        self.send_frame(&Frame::from_message(message));
    }

    fn send_frame(&mut self, frame: &Frame) {
        let mut buf = Vec::new();
        frame.compose(&mut buf);
        self.stream.write_all(&buf).expect("failed to write");
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("failed to write");
    }

    /// Pull whatever is on the socket and return all newly completed frames.
    fn poll_frames(&mut self) -> Vec<Frame> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
                {
                    break
                }
                Err(e) => panic!("read error: {}", e),
            }
        }

        let parser = FrameParser::new();
        let mut frames = Vec::new();
        while has_complete_message(&self.buffer) {
            let parsed = parser.parse(&self.buffer).expect("parse failed");
            let consumed = parsed.consumed();
            frames.push(parsed.into_inner());
            self.buffer.drain(..consumed);
        }
        frames
    }

    /// Wait up to `timeout` for a frame matching `pred`.
    fn recv_matching<F>(&mut self, timeout: Duration, pred: F) -> Option<Frame>
    where
        F: Fn(&Frame) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            for frame in self.poll_frames() {
                if pred(&frame) {
                    return Some(frame);
                }
            }
        }
        None
    }

    /// True if the server closed the connection within `timeout`.
    fn closed_within(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 1024];
        while Instant::now() < deadline {
            match self.stream.read(&mut chunk) {
                Ok(0) => return true,
                Ok(_) => {}
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
                Err(_) => return true,
            }
        }
        false
    }
}

// telemetry creates a session and populates battery, pose, and liveness
#[test]
fn telemetry_registers_session() {
    let (gateway, addr) = default_gateway();
    let context = gateway.context();

    let mut vehicle = Vehicle::connect(addr);
    for _ in 0..10 {
        vehicle.send(&telemetry("AGV-IT1", 80.0));
        std::thread::sleep(Duration::from_millis(20));
    }
    std::thread::sleep(Duration::from_millis(500));

    assert_eq!(context.sessions().len(), 1);
    let session = context.sessions().find("AGV-IT1").expect("no session");
    assert_eq!(session.battery_level(), 80.0);
    assert_eq!(session.state(), SessionState::Online);
    let pose = session.pose();
    assert_eq!(pose.x, 10.0);
    assert_eq!(pose.y, 20.0);

    gateway.shutdown();
}

// heartbeats are echoed and keep the session online
#[test]
fn heartbeat_is_echoed() {
    let (gateway, addr) = default_gateway();
    let context = gateway.context();

    let mut vehicle = Vehicle::connect(addr);
    vehicle.send(&Heartbeat {
        agv_id: "AGV-HB1".to_string(),
        timestamp_us: 42,
    });

    let echo = vehicle
        .recv_matching(Duration::from_secs(2), |f| f.msg_type == MSG_HEARTBEAT)
        .expect("no heartbeat reply");
    let echo = echo.decode_message::<Heartbeat>().expect("bad heartbeat");
    assert_eq!(echo.agv_id, "AGV-HB1");

    let session = context.sessions().find("AGV-HB1").expect("no session");
    assert_eq!(session.state(), SessionState::Online);

    gateway.shutdown();
}

// a low battery report triggers exactly one charge command per episode
#[test]
fn low_battery_triggers_charge_command() {
    let (gateway, addr) = default_gateway();
    let context = gateway.context();

    let mut vehicle = Vehicle::connect(addr);
    vehicle.send(&telemetry("AGV-LB1", 15.0));

    let cmd = vehicle
        .recv_matching(Duration::from_secs(1), |f| f.msg_type == MSG_AGV_COMMAND)
        .expect("no charge command within 1s");
    let cmd = cmd.decode_message::<AgvCommand>().expect("bad command");
    assert_eq!(cmd.cmd_type, CmdType::NavigateTo);
    assert_eq!(cmd.target_agv_id, "AGV-LB1");

    let session = context.sessions().find("AGV-LB1").expect("no session");
    assert_eq!(session.state(), SessionState::Charging);

    // the guard is single-fire: further low readings do not re-trigger
    vehicle.send(&telemetry("AGV-LB1", 14.0));
    assert!(vehicle
        .recv_matching(Duration::from_millis(400), |f| f.msg_type
            == MSG_AGV_COMMAND)
        .is_none());

    gateway.shutdown();
}

// navigation tasks run on the pool and each produces exactly one response,
// while telemetry keeps flowing inline
#[test]
fn navigation_tasks_produce_responses() {
    let (gateway, addr) = default_gateway();
    let context = gateway.context();

    let mut vehicle = Vehicle::connect(addr);
    vehicle.send(&telemetry("AGV-NAV", 90.0));

    for task_id in 1..=3u64 {
        vehicle.send(&NavigationTask {
            target_agv_id: "AGV-NAV".to_string(),
            task_id,
            target_node: Point { x: 5.0, y: 6.0 },
            operation: Operation::MoveOnly,
            global_path: vec![Point { x: 0.0, y: 0.0 }, Point { x: 5.0, y: 6.0 }],
        });
        std::thread::sleep(Duration::from_millis(50));
        // the fast path stays live while the store is in flight
        vehicle.send(&telemetry("AGV-NAV", 90.0));
    }

    let deadline = Instant::now() + Duration::from_secs(3);
    let mut responses = 0;
    while Instant::now() < deadline && responses < 3 {
        for frame in vehicle.poll_frames() {
            if frame.msg_type == MSG_COMMON_RESPONSE {
                let response = frame
                    .decode_message::<CommonResponse>()
                    .expect("bad response");
                assert_eq!(response.status, Status::Ok);
                responses += 1;
            }
        }
    }
    assert_eq!(responses, 3);

    let session = context.sessions().find("AGV-NAV").expect("no session");
    assert_eq!(session.state(), SessionState::Online);

    gateway.shutdown();
}

// a silent session is reported offline by the watchdog but not removed
#[test]
fn silent_session_goes_offline() {
    let (gateway, addr) = gateway_with(
        r#"
        [server]
        host = "127.0.0.1"
        port = "0"

        [gateway]
        session_timeout = 1.0
        "#,
    );
    let context = gateway.context();

    let mut vehicle = Vehicle::connect(addr);
    vehicle.send(&telemetry("AGV-TO", 70.0));
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(
        context.sessions().find("AGV-TO").expect("no session").state(),
        SessionState::Online
    );

    // stop sending and let the watchdog fire
    std::thread::sleep(Duration::from_millis(2200));
    let session = context.sessions().find("AGV-TO").expect("session removed");
    assert_eq!(session.state(), SessionState::Offline);

    // resumed traffic brings it back
    vehicle.send(&telemetry("AGV-TO", 70.0));
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(session.state(), SessionState::Online);

    gateway.shutdown();
}

// commands are forwarded to the target vehicle across worker reactors and
// the source receives an acknowledgement
#[test]
fn emergency_stop_is_forwarded() {
    let (gateway, addr) = gateway_with(
        r#"
        [server]
        host = "127.0.0.1"
        port = "0"

        [worker]
        threads = 2
        "#,
    );

    let mut source = Vehicle::connect(addr);
    let mut target = Vehicle::connect(addr);
    source.send(&telemetry("AGV-SRC", 90.0));
    target.send(&telemetry("AGV-TGT", 90.0));
    std::thread::sleep(Duration::from_millis(300));

    source.send(&AgvCommand {
        target_agv_id: "AGV-TGT".to_string(),
        timestamp_us: 1,
        cmd_type: CmdType::EmergencyStop,
    });

    let forwarded = target
        .recv_matching(Duration::from_secs(2), |f| f.msg_type == MSG_AGV_COMMAND)
        .expect("target never saw the command");
    let forwarded = forwarded.decode_message::<AgvCommand>().expect("bad command");
    assert_eq!(forwarded.cmd_type, CmdType::EmergencyStop);
    assert_eq!(forwarded.target_agv_id, "AGV-TGT");

    let ack = source
        .recv_matching(Duration::from_secs(2), |f| {
            f.msg_type == MSG_COMMON_RESPONSE
        })
        .expect("source never saw a response");
    let ack = ack.decode_message::<CommonResponse>().expect("bad response");
    assert_eq!(ack.status, Status::Ok);

    gateway.shutdown();
}

// a command for a vehicle that was never seen is answered with an error
#[test]
fn command_for_unknown_vehicle_is_rejected() {
    let (gateway, addr) = default_gateway();

    let mut source = Vehicle::connect(addr);
    source.send(&telemetry("AGV-SRC", 90.0));

    source.send(&AgvCommand {
        target_agv_id: "AGV-GHOST".to_string(),
        timestamp_us: 1,
        cmd_type: CmdType::Pause,
    });

    let ack = source
        .recv_matching(Duration::from_secs(2), |f| {
            f.msg_type == MSG_COMMON_RESPONSE
        })
        .expect("no response");
    let ack = ack.decode_message::<CommonResponse>().expect("bad response");
    assert_eq!(ack.status, Status::InvalidRequest);

    gateway.shutdown();
}

// the gateway pings online vehicles and folds echoed pongs into RTT stats
#[test]
fn latency_probes_accumulate_stats() {
    let (gateway, addr) = gateway_with(
        r#"
        [server]
        host = "127.0.0.1"
        port = "0"

        [gateway]
        latency_probe_interval = 0.5
        "#,
    );
    let context = gateway.context();

    let mut vehicle = Vehicle::connect(addr);
    vehicle.send(&telemetry("AGV-RTT", 90.0));

    // echo every ping for a few probe rounds
    let deadline = Instant::now() + Duration::from_millis(2500);
    while Instant::now() < deadline {
        for frame in vehicle.poll_frames() {
            if frame.msg_type == MSG_LATENCY_PROBE {
                let mut probe = frame
                    .decode_message::<LatencyProbe>()
                    .expect("bad probe");
                assert!(!probe.is_response);
                probe.is_response = true;
                vehicle.send(&probe);
            }
        }
        // keep the session alive so probing continues
        vehicle.send(&telemetry("AGV-RTT", 90.0));
        std::thread::sleep(Duration::from_millis(100));
    }

    let stats = context.latency().stats("AGV-RTT").expect("no rtt stats");
    assert!(stats.samples >= 1);
    assert!(stats.avg_ms > 0.0);
    assert!(stats.avg_ms < 1000.0);
    assert!(stats.min_ms <= stats.max_ms);

    gateway.shutdown();
}

// a frame with an invalid declared length closes the connection, and the
// vehicle can reconnect afterwards
#[test]
fn invalid_frame_closes_connection() {
    let (gateway, addr) = default_gateway();

    let mut vehicle = Vehicle::connect(addr);
    // declared total length below the minimum
    vehicle.send_raw(&[0x00, 0x00, 0x00, 0x03, 0x10, 0x01, 0x00, 0x00, 0xFF]);
    assert!(vehicle.closed_within(Duration::from_secs(2)));

    // the listener is unaffected
    let mut vehicle = Vehicle::connect(addr);
    vehicle.send(&Heartbeat {
        agv_id: "AGV-RE1".to_string(),
        timestamp_us: 1,
    });
    assert!(vehicle
        .recv_matching(Duration::from_secs(2), |f| f.msg_type == MSG_HEARTBEAT)
        .is_some());

    gateway.shutdown();
}

// closing the connection removes the session from the table
#[test]
fn disconnect_removes_session() {
    let (gateway, addr) = default_gateway();
    let context = gateway.context();

    {
        let mut vehicle = Vehicle::connect(addr);
        vehicle.send(&telemetry("AGV-BYE", 50.0));
        std::thread::sleep(Duration::from_millis(300));
        assert!(context.sessions().find("AGV-BYE").is_some());
        // vehicle drops here
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && context.sessions().find("AGV-BYE").is_some() {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(context.sessions().find("AGV-BYE").is_none());

    gateway.shutdown();
}
