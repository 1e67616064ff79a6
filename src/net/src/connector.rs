// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::*;
use std::io::{Error, ErrorKind, Result};
use std::net::ToSocketAddrs;
use std::time::Duration;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Establishes non-blocking TCP connections.
#[derive(Default)]
pub struct Connector {
    _inner: (),
}

impl Connector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a non-blocking connect, trying each resolved address in order.
    /// The returned stream may still be mid-connect; callers wait for
    /// writability and then check [`is_self_connect`] before using it.
    pub fn connect<A: ToSocketAddrs>(&self, addr: A) -> Result<TcpStream> {
        let stream = resolve_connect(addr)?;

        // a simultaneous open can complete instantly with the socket
        // connected to itself; treat that as a failed attempt
        if is_self_connect(&stream) {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(Error::new(
                ErrorKind::ConnectionRefused,
                "connection to self",
            ));
        }

        Ok(stream)
    }
}

/// True when a socket's local and peer addresses are equal, which happens
/// when a connect races with its own ephemeral port (TCP simultaneous open).
/// Such a connection is useless and must be retried on a new socket.
pub fn is_self_connect(stream: &TcpStream) -> bool {
    match (stream.local_addr(), stream.peer_addr()) {
        (Ok(local), Ok(peer)) => local == peer,
        _ => false,
    }
}

/// Reconnect schedule: 500 ms doubling up to a 30 s ceiling.
pub struct Backoff {
    delay: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            delay: INITIAL_BACKOFF,
            max: MAX_BACKOFF,
        }
    }

    /// The delay to wait before the next attempt. Each call doubles the
    /// subsequent delay until the ceiling is reached.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = std::cmp::min(self.delay * 2, self.max);
        delay
    }

    /// Reset the schedule after a successful connection.
    pub fn reset(&mut self) {
        self.delay = INITIAL_BACKOFF;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn backoff_schedule() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        for _ in 0..10 {
            backoff.next_delay();
        }
        // capped at the ceiling
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn connect_ping_pong() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
        let addr = listener.local_addr().expect("listener has no local addr");

        let connector = Connector::new();
        let mut client = connector.connect(addr).expect("failed to connect");
        std::thread::sleep(Duration::from_millis(100));
        let (mut server, _) = listener.accept().expect("failed to accept");

        assert!(client.is_established());
        assert!(!is_self_connect(&client));

        client.write_all(b"ping").expect("failed to write");
        std::thread::sleep(Duration::from_millis(100));

        let mut buf = [0; 16];
        let n = server.read(&mut buf).expect("failed to read");
        assert_eq!(&buf[..n], b"ping");

        server.write_all(b"pong").expect("failed to write");
        std::thread::sleep(Duration::from_millis(100));

        let n = client.read(&mut buf).expect("failed to read");
        assert_eq!(&buf[..n], b"pong");
    }
}
