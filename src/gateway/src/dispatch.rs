// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Type-dispatched message handling.
//!
//! The dispatcher maps a 16-bit message type to a handler that owns the
//! typed decoder for its payload. Registration happens once, before the
//! gateway threads spawn; dispatch runs on every worker thread against the
//! shared context.

use crate::context::{ConnectionRef, GatewayContext};

use protocol_agv::{message_type_name, Frame, WireMessage};
use std::collections::HashMap;
use std::sync::Arc;

/// Frames queued for the originating connection. Handlers push replies here
/// and the worker writes them out in order, which keeps responses FIFO per
/// connection for inline handlers.
#[derive(Default)]
pub struct Reply {
    frames: Vec<Frame>,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a typed message, framed under its fixed type id.
    pub fn push<M: WireMessage>(&mut self, message: &M) {
        self.frames.push(Frame::from_message(message));
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub(crate) fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

type Handler =
    Box<dyn Fn(&Arc<GatewayContext>, ConnectionRef, &Frame, &mut Reply) -> bool + Send + Sync>;

type DefaultHandler =
    Box<dyn Fn(&Arc<GatewayContext>, ConnectionRef, &Frame, &mut Reply) + Send + Sync>;

pub struct Dispatcher {
    handlers: HashMap<u16, Handler>,
    default: Option<DefaultHandler>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default: None,
        }
    }

    /// Register the handler for message type `M`. The handler is only
    /// invoked with a fully decoded instance of `M`; a payload that fails to
    /// decode is logged and dropped without reaching it.
    pub fn register<M, F>(&mut self, handler: F)
    where
        M: WireMessage,
        F: Fn(&Arc<GatewayContext>, ConnectionRef, M, &mut Reply) + Send + Sync + 'static,
    {
        self.handlers.insert(
            M::MSG_TYPE,
            Box::new(move |ctx, conn, frame, reply| match frame.decode_message::<M>() {
                Ok(message) => {
                    handler(ctx, conn, message, reply);
                    true
                }
                Err(e) => {
                    error!(
                        "failed to decode {}: {}",
                        message_type_name(frame.msg_type),
                        e
                    );
                    false
                }
            }),
        );
    }

    /// Fallback for message types without a registered handler. Receives the
    /// raw frame.
    pub fn set_default<F>(&mut self, handler: F)
    where
        F: Fn(&Arc<GatewayContext>, ConnectionRef, &Frame, &mut Reply) + Send + Sync + 'static,
    {
        self.default = Some(Box::new(handler));
    }

    /// Route one frame. Returns `false` only when a registered handler's
    /// payload failed to decode; the connection continues either way.
    pub fn dispatch(
        &self,
        ctx: &Arc<GatewayContext>,
        conn: ConnectionRef,
        frame: &Frame,
        reply: &mut Reply,
    ) -> bool {
        if let Some(handler) = self.handlers.get(&frame.msg_type) {
            handler(ctx, conn, frame, reply)
        } else if let Some(default) = &self.default {
            default(ctx, conn, frame, reply);
            true
        } else {
            warn!("unknown message type: {:#06x}", frame.msg_type);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::AgvGatewayConfig;
    use protocol_agv::Heartbeat;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_context() -> Arc<GatewayContext> {
        Arc::new(GatewayContext::new(
            &AgvGatewayConfig::default(),
            Vec::new(),
        ))
    }

    fn conn() -> ConnectionRef {
        ConnectionRef {
            conn_id: 1,
            worker: 0,
            token: 0,
        }
    }

    #[test]
    fn typed_handler_sees_decoded_message() {
        let ctx = test_context();
        let hits = Arc::new(AtomicUsize::new(0));

        let mut dispatcher = Dispatcher::new();
        {
            let hits = hits.clone();
            dispatcher.register::<Heartbeat, _>(move |_ctx, _conn, msg, reply| {
                assert_eq!(msg.agv_id, "AGV-01");
                hits.fetch_add(1, Ordering::SeqCst);
                reply.push(&msg);
            });
        }

        let frame = Frame::from_message(&Heartbeat {
            agv_id: "AGV-01".to_string(),
            timestamp_us: 7,
        });

        let mut reply = Reply::new();
        assert!(dispatcher.dispatch(&ctx, conn(), &frame, &mut reply));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!reply.is_empty());
    }

    #[test]
    fn decode_failure_skips_handler() {
        let ctx = test_context();
        let hits = Arc::new(AtomicUsize::new(0));

        let mut dispatcher = Dispatcher::new();
        {
            let hits = hits.clone();
            dispatcher.register::<Heartbeat, _>(move |_ctx, _conn, _msg, _reply| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        // heartbeat frame with a truncated payload
        let mut frame = Frame::from_message(&Heartbeat {
            agv_id: "AGV-01".to_string(),
            timestamp_us: 7,
        });
        frame.payload.truncate(3);

        let mut reply = Reply::new();
        assert!(!dispatcher.dispatch(&ctx, conn(), &frame, &mut reply));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_type_falls_back_to_default() {
        let ctx = test_context();
        let fallbacks = Arc::new(AtomicUsize::new(0));

        let mut dispatcher = Dispatcher::new();
        {
            let fallbacks = fallbacks.clone();
            dispatcher.set_default(move |_ctx, _conn, frame, _reply| {
                assert_eq!(frame.msg_type, 0x7777);
                fallbacks.fetch_add(1, Ordering::SeqCst);
            });
        }

        let frame = Frame::new(0x7777, vec![0x01, 0x02]);
        let mut reply = Reply::new();
        assert!(dispatcher.dispatch(&ctx, conn(), &frame, &mut reply));
        assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
    }
}
