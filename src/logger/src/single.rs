// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::*;
use chrono::Utc;
use crossbeam_queue::ArrayQueue;
use std::sync::Arc;

/// The producer half: formats records into pooled buffers and enqueues them.
/// Never blocks; a full queue drops the message.
pub(crate) struct Logger {
    log_filled: Arc<ArrayQueue<LogBuffer>>,
    log_cleared: Arc<ArrayQueue<LogBuffer>>,
    buffer_size: usize,
    format: FormatFunction,
    level_filter: LevelFilter,
}

impl Log for Logger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= self.level_filter
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // re-use a buffer from the pool when one is available so the steady
        // state allocates nothing
        let mut buffer = self
            .log_cleared
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_size));

        if (self.format)(&mut buffer, Utc::now(), record).is_ok() {
            // a full queue drops the message instead of blocking
            let _ = self.log_filled.push(buffer);
        }
    }

    fn flush(&self) {}
}

/// The consumer half: drains queued messages to the output.
pub(crate) struct LogDrain {
    log_filled: Arc<ArrayQueue<LogBuffer>>,
    log_cleared: Arc<ArrayQueue<LogBuffer>>,
    buffer_size: usize,
    output: Box<dyn Output>,
}

impl Drain for LogDrain {
    fn flush(&mut self) -> Result<(), std::io::Error> {
        while let Some(mut buffer) = self.log_filled.pop() {
            let _ = self.output.write(&buffer);

            // oversized messages forced an extra allocation; trim before
            // recycling so the pool stays at its configured footprint
            if buffer.capacity() > self.buffer_size {
                buffer.truncate(self.buffer_size);
                buffer.shrink_to_fit();
            }
            buffer.clear();
            let _ = self.log_cleared.push(buffer);
        }
        self.output.flush()
    }
}

/// Builds an [`AsyncLog`] which routes all messages to a single output.
pub struct LogBuilder {
    total_buffer_size: usize,
    log_message_size: usize,
    format: FormatFunction,
    level_filter: LevelFilter,
    output: Option<Box<dyn Output>>,
}

impl Default for LogBuilder {
    fn default() -> Self {
        Self {
            total_buffer_size: 4 * 1024 * 1024,
            log_message_size: 1024,
            format: default_format,
            level_filter: LevelFilter::Info,
            output: None,
        }
    }
}

impl LogBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Total size of the message pool in bytes.
    pub fn total_buffer_size(mut self, bytes: usize) -> Self {
        self.total_buffer_size = bytes;
        self
    }

    /// Size of a single pooled message buffer. Oversized messages cost an
    /// extra allocation but are not truncated.
    pub fn log_message_size(mut self, bytes: usize) -> Self {
        self.log_message_size = bytes;
        self
    }

    pub fn output(mut self, output: Box<dyn Output>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn format(mut self, format: FormatFunction) -> Self {
        self.format = format;
        self
    }

    pub fn level_filter(mut self, level_filter: LevelFilter) -> Self {
        self.level_filter = level_filter;
        self
    }

    pub fn build(self) -> Result<AsyncLog, &'static str> {
        let output = self.output.ok_or("no output configured")?;

        let queue_depth = std::cmp::max(1, self.total_buffer_size / self.log_message_size);
        let log_filled = Arc::new(ArrayQueue::new(queue_depth));
        let log_cleared = Arc::new(ArrayQueue::new(queue_depth));
        for _ in 0..queue_depth {
            let _ = log_cleared.push(Vec::with_capacity(self.log_message_size));
        }

        let logger = Logger {
            log_filled: log_filled.clone(),
            log_cleared: log_cleared.clone(),
            buffer_size: self.log_message_size,
            format: self.format,
            level_filter: self.level_filter,
        };
        let drain = LogDrain {
            log_filled,
            log_cleared,
            buffer_size: self.log_message_size,
            output,
        };

        Ok(AsyncLog {
            logger: Box::new(logger),
            drain: Box::new(drain),
            level_filter: self.level_filter,
        })
    }
}
