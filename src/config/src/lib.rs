// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

mod debug;
mod gateway;
mod server;
mod tcp;
mod worker;

pub use debug::{Debug, DebugConfig};
pub use gateway::{Gateway, GatewayConfig};
pub use server::{Server, ServerConfig};
pub use tcp::{Tcp, TcpConfig};
pub use worker::{Worker, WorkerConfig};

use serde::{Deserialize, Serialize};
use std::io::Read;

/// Top-level configuration for the AGV gateway process. Every section has
/// per-field defaults, so an empty (or absent) config file yields a working
/// configuration.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct AgvGatewayConfig {
    #[serde(default)]
    server: Server,
    #[serde(default)]
    worker: Worker,
    #[serde(default)]
    gateway: Gateway,
    #[serde(default)]
    debug: Debug,
    #[serde(default)]
    tcp: Tcp,
}

impl AgvGatewayConfig {
    /// Load the configuration from a toml file.
    pub fn load(file: &str) -> Result<Self, std::io::Error> {
        let mut file = std::fs::File::open(file)?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        toml::from_str(&content).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("error parsing config: {}", e),
            )
        })
    }

    /// Print the resolved configuration to stdout.
    pub fn print(&self) {
        match toml::to_string(self) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("error serializing config: {}", e),
        }
    }

    // command line overrides

    pub fn set_port(&mut self, port: u16) {
        self.server.set_port(port);
    }

    pub fn set_worker_threads(&mut self, threads: usize) {
        self.worker.set_threads(threads);
    }

    pub fn set_session_timeout(&mut self, seconds: f64) {
        self.gateway.set_session_timeout(seconds);
    }
}

impl ServerConfig for AgvGatewayConfig {
    fn server(&self) -> &Server {
        &self.server
    }
}

impl WorkerConfig for AgvGatewayConfig {
    fn worker(&self) -> &Worker {
        &self.worker
    }
}

impl GatewayConfig for AgvGatewayConfig {
    fn gateway(&self) -> &Gateway {
        &self.gateway
    }
}

impl DebugConfig for AgvGatewayConfig {
    fn debug(&self) -> &Debug {
        &self.debug
    }
}

impl TcpConfig for AgvGatewayConfig {
    fn tcp(&self) -> &Tcp {
        &self.tcp
    }
}
