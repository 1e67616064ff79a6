// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

/// Signals which can be sent to the gateway threads. Each thread checks its
/// signal queue once per loop iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    /// Request a graceful shutdown. Each thread finishes its current loop
    /// iteration and returns.
    Shutdown,
}
