// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Bi-directional buffered sessions on top of non-blocking streams, plus
//! typed server/client wrappers which parse and compose protocol messages
//! directly against the session buffers.

#[macro_use]
extern crate log;

mod buffer;
mod client;
mod server;

pub use buffer::*;
pub use client::ClientSession;
pub use server::ServerSession;

use core::borrow::{Borrow, BorrowMut};
use core::fmt::Debug;
use core::marker::PhantomData;
use ::net::*;
use protocol_common::{Compose, Parse};
use std::io::{ErrorKind, Read, Result, Write};
use std::net::SocketAddr;
use std::os::unix::prelude::AsRawFd;

// The size of one kilobyte, in bytes
const KB: usize = 1024;

// If the read buffer has less than this amount available before a read, we
// will grow the read buffer
const BUFFER_MIN_FREE: usize = 4 * KB;

// The target size of read operations
const TARGET_READ_SIZE: usize = 16 * KB;

/// A `Session` is a `TcpStream` with its read and write buffers. Reads are
/// buffered so the stream is drained with few syscalls; writes are buffered
/// so short writes under `WouldBlock` are retried from userspace.
pub struct Session {
    stream: TcpStream,
    read_buffer: Buffer,
    write_buffer: Buffer,
}

impl AsRawFd for Session {
    fn as_raw_fd(&self) -> i32 {
        self.stream.as_raw_fd()
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        write!(f, "{:?}", self.stream)
    }
}

impl Session {
    pub fn new(stream: TcpStream, read_buffer: Buffer, write_buffer: Buffer) -> Self {
        Self {
            stream,
            read_buffer,
            write_buffer,
        }
    }

    /// The event interest for the session: always readable, writable only
    /// while the write buffer holds unflushed bytes.
    pub fn interest(&self) -> Interest {
        if self.write_buffer.remaining() > 0 {
            Interest::READABLE.add(Interest::WRITABLE)
        } else {
            Interest::READABLE
        }
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Fill the read buffer by reading until the stream would block. `Ok(0)`
    /// means the remote side closed the stream.
    pub fn fill(&mut self) -> Result<usize> {
        let mut read = 0;

        loop {
            if self.read_buffer.remaining_mut() < BUFFER_MIN_FREE {
                self.read_buffer.reserve(TARGET_READ_SIZE);
            }

            match self.stream.read(self.read_buffer.borrow_mut()) {
                Ok(0) => {
                    return Ok(0);
                }
                Ok(n) => {
                    unsafe {
                        self.read_buffer.advance_mut(n);
                    }
                    read += n;
                }
                Err(e) => match e.kind() {
                    ErrorKind::WouldBlock => {
                        if read == 0 {
                            return Err(e);
                        } else {
                            return Ok(read);
                        }
                    }
                    ErrorKind::Interrupted => {}
                    _ => {
                        return Err(e);
                    }
                },
            }
        }
    }

    /// Mark `amt` bytes of the read buffer as consumed.
    pub fn consume(&mut self, amt: usize) {
        self.read_buffer.advance(amt)
    }

    /// Number of unflushed bytes in the write buffer.
    pub fn write_pending(&self) -> usize {
        self.write_buffer.remaining()
    }

    /// Flush the write buffer to the stream until it would block. Returns
    /// the number of bytes flushed; `WouldBlock` is only surfaced when
    /// nothing could be written at all.
    pub fn flush(&mut self) -> Result<usize> {
        let mut flushed = 0;
        while self.write_buffer.remaining() > 0 {
            match self.stream.write(self.write_buffer.borrow()) {
                Ok(amt) => {
                    self.write_buffer.advance(amt);
                    flushed += amt;
                }
                Err(e) => match e.kind() {
                    ErrorKind::WouldBlock => {
                        if flushed == 0 {
                            return Err(e);
                        }
                        break;
                    }
                    ErrorKind::Interrupted => {}
                    _ => {
                        return Err(e);
                    }
                },
            }
        }
        Ok(flushed)
    }

    /// Shut down the write half, letting already-buffered peer data drain.
    pub fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown(Shutdown::Write)
    }

    pub fn read_buffer_mut(&mut self) -> &mut Buffer {
        &mut self.read_buffer
    }

    pub fn write_buffer_mut(&mut self) -> &mut Buffer {
        &mut self.write_buffer
    }
}

impl From<TcpStream> for Session {
    fn from(stream: TcpStream) -> Self {
        Self::new(
            stream,
            Buffer::new(TARGET_READ_SIZE),
            Buffer::new(TARGET_READ_SIZE),
        )
    }
}

impl Borrow<[u8]> for Session {
    fn borrow(&self) -> &[u8] {
        self.read_buffer.borrow()
    }
}

impl Buf for Session {
    fn remaining(&self) -> usize {
        self.read_buffer.remaining()
    }

    fn chunk(&self) -> &[u8] {
        self.read_buffer.chunk()
    }

    fn advance(&mut self, amt: usize) {
        self.read_buffer.advance(amt)
    }
}

unsafe impl BufMut for Session {
    fn remaining_mut(&self) -> usize {
        self.write_buffer.remaining_mut()
    }

    unsafe fn advance_mut(&mut self, amt: usize) {
        self.write_buffer.advance_mut(amt)
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        self.write_buffer.chunk_mut()
    }

    fn put_slice(&mut self, src: &[u8]) {
        self.write_buffer.put_slice(src)
    }
}

impl event::Source for Session {
    fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> Result<()> {
        self.stream.register(registry, token, interest)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interest: Interest) -> Result<()> {
        self.stream.reregister(registry, token, interest)
    }

    fn deregister(&mut self, registry: &Registry) -> Result<()> {
        self.stream.deregister(registry)
    }
}
