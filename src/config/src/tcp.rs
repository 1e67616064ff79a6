// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

// constants to define default values
const TCP_BACKLOG: usize = 128;
const TCP_NODELAY: bool = true;

// helper functions
fn backlog() -> usize {
    TCP_BACKLOG
}

fn nodelay() -> bool {
    TCP_NODELAY
}

// definitions
#[derive(Serialize, Deserialize, Debug)]
pub struct Tcp {
    #[serde(default = "backlog")]
    backlog: usize,
    #[serde(default = "nodelay")]
    nodelay: bool,
}

// implementation
impl Tcp {
    pub fn backlog(&self) -> usize {
        self.backlog
    }

    /// Disable Nagle's algorithm on accepted connections.
    pub fn nodelay(&self) -> bool {
        self.nodelay
    }
}

// trait implementations
impl Default for Tcp {
    fn default() -> Self {
        Self {
            backlog: backlog(),
            nodelay: nodelay(),
        }
    }
}

// trait definitions
pub trait TcpConfig {
    fn tcp(&self) -> &Tcp;
}
