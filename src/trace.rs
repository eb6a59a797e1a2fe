//! Append-only record of the register values sent to the chip.
//!
//! The file starts with a `:comment` line, followed by one `address,value`
//! line per register byte, both in decimal.

use log::error;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct RegisterTrace {
    path: PathBuf,
    writer: BufWriter<File>,
    enabled: bool,
}

impl RegisterTrace {
    /// Create (or truncate) `path` and write the comment line
    pub fn create(path: impl AsRef<Path>, comment: &str) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::create(&path)?;
        writeln!(file, ":{}", comment)?;
        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            enabled: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record `data` as consecutive registers starting at `address`.
    ///
    /// A failing trace never fails the register transaction, it is only logged.
    pub fn record(&mut self, address: u8, data: &[u8]) {
        if !self.enabled {
            return;
        }
        let result = data
            .iter()
            .enumerate()
            .try_for_each(|(i, value)| writeln!(self.writer, "{},{}", address as usize + i, value))
            .and_then(|_| self.writer.flush());
        if let Err(e) = result {
            error!("Register trace {}: {}", self.path.display(), e);
        }
    }
}
