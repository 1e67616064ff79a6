// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use super::*;

/// The client side of a framed session: composes messages of type `Tx` into
/// the write buffer and parses replies of type `Rx` out of the read buffer.
/// Used by tooling and tests which play the vehicle role against a gateway.
pub struct ClientSession<Parser, Tx, Rx> {
    session: Session,
    parser: Parser,
    _rx: PhantomData<Rx>,
    _tx: PhantomData<Tx>,
}

impl<Parser, Tx, Rx> Debug for ClientSession<Parser, Tx, Rx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        write!(f, "{:?}", self.session)
    }
}

impl<Parser, Tx, Rx> AsRawFd for ClientSession<Parser, Tx, Rx> {
    fn as_raw_fd(&self) -> i32 {
        self.session.as_raw_fd()
    }
}

impl<Parser, Tx, Rx> ClientSession<Parser, Tx, Rx>
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

    pub fn into_inner(self) -> Session {
        self.session
    }

    /// Compose a message into the write buffer. The caller flushes.
    pub fn send(&mut self, tx: Tx) -> Result<usize> {
        Ok(tx.compose(&mut self.session))
    }

    /// Try to parse one reply out of the read buffer. `WouldBlock` means no
    /// complete reply is buffered.
    pub fn receive(&mut self) -> Result<Rx> {
        let src: &[u8] = self.session.borrow();
        let res = self.parser.parse(src)?;
        let consumed = res.consumed();
        let msg = res.into_inner();
        self.session.consume(consumed);
        Ok(msg)
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
}

impl<Parser, Tx, Rx> event::Source for ClientSession<Parser, Tx, Rx> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use ::net::{Connector, TcpListener};
    use protocol_common::ParseOk;
    use std::time::{Duration, Instant};

    // a newline-delimited test protocol
    struct Line(String);

    impl Compose for Line {
        fn compose(&self, dst: &mut dyn BufMut) -> usize {
            dst.put_slice(self.0.as_bytes());
            dst.put_slice(b"\n");
            self.0.len() + 1
        }
    }

    #[derive(Clone, Default)]
    struct LineParser;

    impl Parse<String> for LineParser {
        fn parse(&self, buffer: &[u8]) -> Result<ParseOk<String>> {
            match buffer.iter().position(|b| *b == b'\n') {
                Some(pos) => Ok(ParseOk::new(
                    String::from_utf8_lossy(&buffer[..pos]).into_owned(),
                    pos + 1,
                )),
                None => Err(ErrorKind::WouldBlock.into()),
            }
        }
    }

    #[test]
    fn request_response_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
        let addr = listener.local_addr().expect("no local addr");

        let stream = Connector::new().connect(addr).expect("failed to connect");
        let mut client: ClientSession<LineParser, Line, String> =
            ClientSession::new(Session::from(stream), LineParser::default());

        std::thread::sleep(Duration::from_millis(100));
        let (mut server, _) = listener.accept().expect("failed to accept");

        // request
        client
            .send(Line("status AGV-01".to_string()))
            .expect("send failed");
        let deadline = Instant::now() + Duration::from_secs(1);
        while client.write_pending() > 0 {
            match client.flush() {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10))
                }
                Err(e) => panic!("flush failed: {}", e),
            }
            assert!(Instant::now() < deadline, "flush timed out");
        }

        std::thread::sleep(Duration::from_millis(100));
        let mut buf = [0u8; 64];
        let n = server.read(&mut buf).expect("server read failed");
        assert_eq!(&buf[..n], b"status AGV-01\n");

        // response
        server.write_all(b"ok\n").expect("server write failed");

        let deadline = Instant::now() + Duration::from_secs(1);
        let reply = loop {
            match client.receive() {
                Ok(line) => break line,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    match client.fill() {
                        Ok(_) => {}
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            std::thread::sleep(Duration::from_millis(10))
                        }
                        Err(e) => panic!("fill failed: {}", e),
                    }
                    assert!(Instant::now() < deadline, "no reply within deadline");
                }
                Err(e) => panic!("receive failed: {}", e),
            }
        };
        assert_eq!(reply, "ok");
    }
}

