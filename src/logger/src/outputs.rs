// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::Output;

use std::io::{BufWriter, Error, Write};
use std::path::{Path, PathBuf};

/// An output that writes to `stdout`.
pub struct Stdout {
    writer: BufWriter<std::io::Stdout>,
}

impl Default for Stdout {
    fn default() -> Self {
        Self::new()
    }
}

impl Stdout {
    pub fn new() -> Self {
        Self {
            writer: BufWriter::new(std::io::stdout()),
        }
    }
}

impl Write for Stdout {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.writer.flush()
    }
}

impl Output for Stdout {}

/// An output that writes to `stderr`.
pub struct Stderr {
    writer: BufWriter<std::io::Stderr>,
}

impl Default for Stderr {
    fn default() -> Self {
        Self::new()
    }
}

impl Stderr {
    pub fn new() -> Self {
        Self {
            writer: BufWriter::new(std::io::stderr()),
        }
    }
}

impl Write for Stderr {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.writer.flush()
    }
}

impl Output for Stderr {}

/// A file output which rotates the live log to a backup path once it exceeds
/// the configured maximum size. Rotation is checked on flush.
pub struct File {
    active: PathBuf,
    backup: PathBuf,
    max_size: u64,
    writer: BufWriter<std::fs::File>,
}

impl File {
    pub fn new<T: AsRef<Path>>(active: T, backup: T, max_size: u64) -> Result<Self, Error> {
        let file = std::fs::File::create(active.as_ref())?;
        Ok(Self {
            active: active.as_ref().to_owned(),
            backup: backup.as_ref().to_owned(),
            max_size,
            writer: BufWriter::new(file),
        })
    }

    fn rotate(&mut self) -> Result<(), Error> {
        if self.writer.get_ref().metadata()?.len() >= self.max_size {
            std::fs::rename(&self.active, &self.backup)?;
            self.writer = BufWriter::new(std::fs::File::create(&self.active)?);
        }
        Ok(())
    }
}

impl Write for File {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.writer.flush()?;
        self.rotate()
    }
}

impl Output for File {}
