// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Minimal usage: build a single-output log, start it, and flush the drain
//! from a background thread the way the gateway's listener does.

use core::time::Duration;
use logger::*;

fn main() {
    let log = LogBuilder::new()
        .output(Box::new(Stdout::new()))
        .level_filter(LevelFilter::Trace)
        .build()
        .expect("failed to initialize log");

    let mut drain = log.start();

    std::thread::spawn(move || loop {
        let _ = drain.flush();
        std::thread::sleep(Duration::from_millis(100));
    });

    error!("vehicle [AGV-01] unreachable");
    warn!("vehicle [AGV-02] battery at 18.5%");
    info!("gateway listening on 0.0.0.0:8000");
    debug!("heartbeat from [AGV-02]");
    trace!("telemetry pose update for [AGV-02]");

    std::thread::sleep(Duration::from_millis(500));
}
