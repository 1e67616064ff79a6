// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The gateway binary: parses command line options, loads the
//! configuration, and launches the gateway threads.

#[macro_use]
extern crate logger;

use agv_gateway::GatewayBuilder;
use backtrace::Backtrace;
use clap::{App, Arg};
use config::AgvGatewayConfig;

fn main() {
    // custom panic hook to terminate the whole process after unwinding
    std::panic::set_hook(Box::new(|s| {
        error!("{}", s);
        eprintln!("{:?}", Backtrace::new());
        std::process::exit(101);
    }));

    let matches = App::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(
            "TCP gateway for an AGV fleet. Vehicles hold long-lived \
            connections speaking a length-header framed protocol; the \
            gateway tracks per-vehicle sessions, watchdog liveness, and \
            round-trip latency.",
        )
        .arg(
            Arg::with_name("CONFIG")
                .help("Gateway configuration file")
                .index(1),
        )
        .arg(
            Arg::with_name("port")
                .long("port")
                .takes_value(true)
                .help("Listen port, overrides the config file"),
        )
        .arg(
            Arg::with_name("timeout")
                .long("timeout")
                .takes_value(true)
                .help("Session timeout in seconds, overrides the config file"),
        )
        .arg(
            Arg::with_name("threads")
                .long("threads")
                .takes_value(true)
                .help("Worker reactor count, overrides the config file"),
        )
        .arg(
            Arg::with_name("print-config")
                .help("List all options in config")
                .long("config")
                .short("c"),
        )
        .get_matches();

    // load config from file
    let mut config = if let Some(file) = matches.value_of("CONFIG") {
        match AgvGatewayConfig::load(file) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("unable to load config file: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Default::default()
    };

    // apply command line overrides
    if let Some(port) = matches.value_of("port") {
        match port.parse::<u16>() {
            Ok(port) => config.set_port(port),
            Err(_) => {
                eprintln!("bad value for --port: {}", port);
                std::process::exit(1);
            }
        }
    }
    if let Some(timeout) = matches.value_of("timeout") {
        match timeout.parse::<f64>() {
            Ok(seconds) if seconds > 0.0 => config.set_session_timeout(seconds),
            _ => {
                eprintln!("bad value for --timeout: {}", timeout);
                std::process::exit(1);
            }
        }
    }
    if let Some(threads) = matches.value_of("threads") {
        match threads.parse::<usize>() {
            Ok(threads) => config.set_worker_threads(threads),
            Err(_) => {
                eprintln!("bad value for --threads: {}", threads);
                std::process::exit(1);
            }
        }
    }

    if matches.is_present("print-config") {
        config.print();
        std::process::exit(0);
    }

    let log_drain = logger::configure_logging(&config);

    // launch the gateway
    match GatewayBuilder::new(config, log_drain) {
        Ok(builder) => {
            let gateway = builder.spawn();

            // SIGINT and SIGTERM request a graceful quit
            let shutdown = gateway.shutdown_handle();
            if let Err(e) = ctrlc::set_handler(move || shutdown.shutdown()) {
                fatal!("failed to install signal handler: {}", e);
            }

            gateway.wait();
        }
        Err(e) => {
            eprintln!("error launching gateway: {}", e);
            std::process::exit(1);
        }
    }
}
