// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::wire::{WireError, WireMessage};

use protocol_common::{BufMut, Compose, Parse, ParseOk};
use std::convert::TryInto;
use std::io::{Error, ErrorKind};
use thiserror::Error;

/// Fixed frame header size: u32 length + u16 type + u16 flags.
pub const HEADER_LEN: usize = 8;

/// Smallest valid frame: header plus one payload byte.
pub const MIN_MESSAGE_LEN: usize = HEADER_LEN + 1;

/// Largest valid frame. Anything larger is treated as hostile.
pub const MAX_MESSAGE_LEN: usize = 10 * 1024 * 1024;

// flags are declared on the wire but currently advisory; producers send zero
pub const FLAG_NONE: u16 = 0x0000;
pub const FLAG_COMPRESSED: u16 = 0x0001;
pub const FLAG_ENCRYPTED: u16 = 0x0002;
pub const FLAG_PRIORITY: u16 = 0x0004;

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("frame length {0} outside {MIN_MESSAGE_LEN}..={MAX_MESSAGE_LEN}")]
    LengthOutOfRange(usize),
    #[error("frame with empty payload")]
    EmptyPayload,
}

/// One wire frame: a message type, flags, and an opaque payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub msg_type: u16,
    pub flags: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: u16, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            flags: FLAG_NONE,
            payload,
        }
    }

    /// Frame a typed message under its fixed type id.
    pub fn from_message<M: WireMessage>(message: &M) -> Self {
        let mut payload = Vec::new();
        message.encode(&mut payload);
        Self::new(M::MSG_TYPE, payload)
    }

    /// Decode the payload as a typed message. The caller matches `msg_type`
    /// against `M::MSG_TYPE` before calling.
    pub fn decode_message<M: WireMessage>(&self) -> Result<M, WireError> {
        M::decode(&self.payload)
    }

    /// Total on-wire size, header included.
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

impl Compose for Frame {
    fn compose(&self, dst: &mut dyn BufMut) -> usize {
        if self.payload.is_empty() {
            error!("refusing to compose frame with empty payload");
            return 0;
        }
        let total_len = self.total_len();
        if total_len > MAX_MESSAGE_LEN {
            error!("refusing to compose oversize frame: {} bytes", total_len);
            return 0;
        }

        dst.put_u32(total_len as u32);
        dst.put_u16(self.msg_type);
        dst.put_u16(self.flags);
        dst.put_slice(&self.payload);
        total_len
    }
}

/// Parses frames out of a session's read buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameParser;

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Parse<Frame> for FrameParser {
    fn parse(&self, buffer: &[u8]) -> Result<ParseOk<Frame>, Error> {
        if buffer.len() < HEADER_LEN {
            return Err(ErrorKind::WouldBlock.into());
        }

        let total_len = u32::from_be_bytes(buffer[0..4].try_into().unwrap()) as usize;
        if !(MIN_MESSAGE_LEN..=MAX_MESSAGE_LEN).contains(&total_len) {
            return Err(Error::new(
                ErrorKind::InvalidData,
                FrameError::LengthOutOfRange(total_len),
            ));
        }

        if buffer.len() < total_len {
            return Err(ErrorKind::WouldBlock.into());
        }

        let msg_type = u16::from_be_bytes(buffer[4..6].try_into().unwrap());
        let flags = u16::from_be_bytes(buffer[6..8].try_into().unwrap());
        let payload = buffer[HEADER_LEN..total_len].to_vec();

        Ok(ParseOk::new(
            Frame {
                msg_type,
                flags,
                payload,
            },
            total_len,
        ))
    }
}

/// True iff the buffer starts with a full frame whose declared length is
/// within the valid range.
pub fn has_complete_message(buffer: &[u8]) -> bool {
    if buffer.len() < HEADER_LEN {
        return false;
    }
    let total_len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
    (MIN_MESSAGE_LEN..=MAX_MESSAGE_LEN).contains(&total_len) && buffer.len() >= total_len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Heartbeat, MSG_HEARTBEAT};

    fn compose_to_vec(frame: &Frame) -> Vec<u8> {
        let mut buf = Vec::new();
        let written = frame.compose(&mut buf);
        assert_eq!(written, buf.len());
        buf
    }

    #[test]
    fn header_layout_is_big_endian() {
        let frame = Frame::new(0x1001, vec![0xAB]);
        let bytes = compose_to_vec(&frame);
        assert_eq!(bytes, vec![0x00, 0x00, 0x00, 0x09, 0x10, 0x01, 0x00, 0x00, 0xAB]);
    }

    #[test]
    fn round_trip() {
        let frame = Frame::new(0x2001, b"charge at node 7".to_vec());
        let bytes = compose_to_vec(&frame);

        let parsed = FrameParser::new().parse(&bytes).unwrap();
        assert_eq!(parsed.consumed(), frame.total_len());
        assert_eq!(parsed.into_inner(), frame);
    }

    #[test]
    fn round_trip_typed() {
        let hb = Heartbeat {
            agv_id: "AGV-IT1".to_string(),
            timestamp_us: 1_234_567,
        };
        let frame = Frame::from_message(&hb);
        assert_eq!(frame.msg_type, MSG_HEARTBEAT);

        let bytes = compose_to_vec(&frame);
        let parsed = FrameParser::new().parse(&bytes).unwrap().into_inner();
        assert_eq!(parsed.decode_message::<Heartbeat>().unwrap(), hb);
    }

    #[test]
    fn incomplete_frames_would_block() {
        let frame = Frame::new(0x1001, vec![1, 2, 3, 4]);
        let bytes = compose_to_vec(&frame);

        let parser = FrameParser::new();
        // truncated header
        assert_eq!(
            parser.parse(&bytes[..4]).unwrap_err().kind(),
            ErrorKind::WouldBlock
        );
        // header complete, payload short
        assert_eq!(
            parser.parse(&bytes[..10]).unwrap_err().kind(),
            ErrorKind::WouldBlock
        );
        assert!(!has_complete_message(&bytes[..10]));
        assert!(has_complete_message(&bytes));
    }

    #[test]
    fn length_gates() {
        let parser = FrameParser::new();

        // declared length below the minimum
        let mut bytes = vec![0x00, 0x00, 0x00, 0x08, 0x10, 0x01, 0x00, 0x00];
        assert_eq!(
            parser.parse(&bytes).unwrap_err().kind(),
            ErrorKind::InvalidData
        );
        assert!(!has_complete_message(&bytes));

        // declared length above the maximum
        bytes[0..4].copy_from_slice(&((MAX_MESSAGE_LEN + 1) as u32).to_be_bytes());
        assert_eq!(
            parser.parse(&bytes).unwrap_err().kind(),
            ErrorKind::InvalidData
        );
        assert!(!has_complete_message(&bytes));
    }

    #[test]
    fn trailing_bytes_are_left_in_place() {
        let first = Frame::new(0x3002, vec![0x01]);
        let mut bytes = compose_to_vec(&first);
        bytes.extend_from_slice(&[0xFF, 0xFF]);

        let parsed = FrameParser::new().parse(&bytes).unwrap();
        assert_eq!(parsed.consumed(), first.total_len());
    }

    #[test]
    fn empty_payload_is_not_composed() {
        let mut buf = Vec::new();
        assert_eq!(Frame::new(0x1001, Vec::new()).compose(&mut buf), 0);
        assert!(buf.is_empty());
    }
}
