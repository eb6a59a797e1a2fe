use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::acquisition::{BackendKind, RunParams};
use crate::error::ConfigError;
use crate::protocol::{PrePost, RegOp, Transaction};

/// Firmware console verbosity applied on connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardLogLevel {
    pub raw: u8,
    pub cmd: u8,
}

impl Default for BoardLogLevel {
    fn default() -> Self {
        Self { raw: 0, cmd: 2 }
    }
}

/// Slow control configuration.
/// Configs are serializable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: String,
    pub baud_rate: u32,
    /// Keep DTR low so opening the port does not reboot the DUE
    pub auto_reset_disabled: bool,
    pub timeout_ms: u64,
    pub reg_op: RegOp,
    pub pre_post: PrePost,
    pub board_log: BoardLogLevel,
    pub trace_path: Option<PathBuf>,
    pub trace_comment: String,
    pub backend: BackendKind,
    pub run: RunParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: String::from("/dev/ttyACM0"),
            baud_rate: 57_600,
            auto_reset_disabled: false,
            timeout_ms: 1000,
            reg_op: RegOp::Chk,
            pre_post: PrePost::None,
            board_log: BoardLogLevel::default(),
            trace_path: None,
            trace_comment: String::new(),
            backend: BackendKind::Emulated,
            run: RunParams::default(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write this configuration as YAML
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.reg_op, self.pre_post)
    }
}
