// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The wire protocol spoken between vehicles and the gateway.
//!
//! Every message travels in a length-header frame:
//!
//! ```text
//! +------------------+----------------+--------------+-------------+
//! | total_length u32 | msg_type u16   | flags u16    | payload ... |
//! +------------------+----------------+--------------+-------------+
//! ```
//!
//! All integers are network byte order. `total_length` covers the 8-byte
//! header plus the payload and must be within `9..=10 MiB`; anything else is
//! a protocol violation and the connection carrying it is closed.
//!
//! Payloads are fixed big-endian layouts described per message in
//! [`messages`]: `f64` as IEEE-754 bits, strings as a u16 length prefix plus
//! UTF-8 bytes, repeated fields as a u16 count plus elements.

#[macro_use]
extern crate log;

mod frame;
mod messages;
mod wire;

pub use frame::*;
pub use messages::*;
pub use wire::*;
