// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Thin wrappers over non-blocking TCP sockets, re-exporting the poller
//! types so event-loop code has a single import surface.

pub use mio::*;

pub mod event {
    pub use mio::event::*;
}

mod connector;
mod tcp;

pub use connector::*;
pub use tcp::*;
