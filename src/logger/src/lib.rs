// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! An asynchronous logging backend. Producers format log records into pooled
//! buffers and push them onto a bounded queue without ever blocking; a
//! [`Drain`] held by one thread flushes the queue to the configured output
//! outside of any latency-critical path. When the queue is full, messages are
//! dropped rather than stalling the caller.
//!
//! Construct an [`AsyncLog`] with [`LogBuilder`], register it with
//! [`AsyncLog::start`], and flush the returned drain periodically — the
//! gateway does this once per listener loop iteration and once more on
//! shutdown.

pub use log::*;

mod format;
mod nop;
mod outputs;
mod single;

pub use format::*;
pub use nop::*;
pub use outputs::*;
pub use single::*;

use config::DebugConfig;

pub(crate) type LogBuffer = Vec<u8>;

/// Log and terminate the process. Reserved for programmer-contract
/// violations where continuing would corrupt state.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        $crate::error!($($arg)*);
        std::process::exit(1);
    }};
}

/// The handle side of the logging backend: a `Log` implementation to be
/// registered globally and the `Drain` which owns the output.
pub struct AsyncLog {
    pub(crate) logger: Box<dyn Log>,
    pub(crate) drain: Box<dyn Drain>,
    pub(crate) level_filter: LevelFilter,
}

impl AsyncLog {
    /// Register the logger and return the drain. It is up to the caller to
    /// flush the drain periodically.
    pub fn start(self) -> Box<dyn Drain> {
        let level_filter = self.level_filter;
        log::set_boxed_logger(self.logger)
            .map(|()| log::set_max_level(level_filter))
            .expect("failed to start logger");
        self.drain
    }
}

/// The flush side of the logging backend.
pub trait Drain: Send {
    fn flush(&mut self) -> Result<(), std::io::Error>;
}

/// A sink for formatted log messages.
pub trait Output: std::io::Write + Send + Sync {}

/// Build the logging backend from the debug config section: a rotating file
/// when one is configured, stdout otherwise.
pub fn configure_logging<T: DebugConfig>(config: &T) -> Box<dyn Drain> {
    let config = config.debug();

    let output: Box<dyn Output> = if let Some(file) = config.log_file() {
        let backup = config
            .log_backup()
            .unwrap_or_else(|| format!("{}.old", file));
        Box::new(File::new(&file, &backup, config.log_max_size()).expect("failed to open log file"))
    } else {
        Box::new(Stdout::new())
    };

    LogBuilder::new()
        .output(output)
        .level_filter(config.log_level().to_level_filter())
        .total_buffer_size(config.log_total_buffer_size())
        .log_message_size(config.log_message_size())
        .build()
        .expect("failed to initialize logging")
        .start()
}
