// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use super::*;

/// The server side of a framed session: parses received messages of type
/// `Rx` out of the read buffer and composes messages of type `Tx` into the
/// write buffer.
pub struct ServerSession<Parser, Tx, Rx> {
    session: Session,
    parser: Parser,
    _rx: PhantomData<Rx>,
    _tx: PhantomData<Tx>,
}

impl<Parser, Tx, Rx> AsRawFd for ServerSession<Parser, Tx, Rx> {
    fn as_raw_fd(&self) -> i32 {
        self.session.as_raw_fd()
    }
}

impl<Parser, Tx, Rx> Debug for ServerSession<Parser, Tx, Rx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        write!(f, "{:?}", self.session)
    }
}

impl<Parser, Tx, Rx> ServerSession<Parser, Tx, Rx>
where
    Tx: Compose,
    Parser: Parse<Rx>,
{
    pub fn new(session: Session, parser: Parser) -> Self {
        Self {
            session,
            parser,
            _rx: PhantomData,
            _tx: PhantomData,
        }
    }

    /// Consume the wrapper and return the inner `Session`.
    pub fn into_inner(self) -> Session {
        self.session
    }

    /// Try to parse one message out of the read buffer, consuming its bytes
    /// on success. `WouldBlock` means no complete message is buffered.
    pub fn receive(&mut self) -> Result<Rx> {
        let src: &[u8] = self.session.borrow();
        let res = self.parser.parse(src)?;
        let consumed = res.consumed();
        let msg = res.into_inner();
        self.session.consume(consumed);
        Ok(msg)
    }

    /// Compose a message into the write buffer. The caller flushes.
    pub fn send(&mut self, tx: Tx) -> Result<usize> {
        trace!("sending message on session: {:?}", self.session);
        Ok(tx.compose(&mut self.session))
    }

    pub fn fill(&mut self) -> Result<usize> {
        self.session.fill()
    }

    pub fn flush(&mut self) -> Result<usize> {
        self.session.flush()
    }

    pub fn write_pending(&self) -> usize {
        self.session.write_pending()
    }

    pub fn interest(&self) -> Interest {
        self.session.interest()
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.session.peer_addr()
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.session.shutdown()
    }
}

impl<Parser, Tx, Rx> Borrow<[u8]> for ServerSession<Parser, Tx, Rx> {
    fn borrow(&self) -> &[u8] {
        self.session.borrow()
    }
}

impl<Parser, Tx, Rx> Buf for ServerSession<Parser, Tx, Rx> {
    fn remaining(&self) -> usize {
        self.session.remaining()
    }

    fn chunk(&self) -> &[u8] {
        self.session.chunk()
    }

    fn advance(&mut self, amt: usize) {
        self.session.advance(amt)
    }
}

impl<Parser, Tx, Rx> event::Source for ServerSession<Parser, Tx, Rx> {
    fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> Result<()> {
        self.session.register(registry, token, interest)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interest: Interest) -> Result<()> {
        self.session.reregister(registry, token, interest)
    }

    fn deregister(&mut self, registry: &Registry) -> Result<()> {
        self.session.deregister(registry)
    }
}
