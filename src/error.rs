use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::catalog::{AccessMode, RegisterBank};

/// Local argument checks. These never reach the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{bank:?} holds {expected} bytes but {actual} were given")]
    SizeMismatch {
        bank: RegisterBank,
        expected: usize,
        actual: usize,
    },
    #[error("Encoded frame of {size} bytes exceeds the board buffer of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },
    #[error("Expected response of {size} bytes exceeds the board buffer of {max} bytes")]
    ResponseTooLarge { size: usize, max: usize },
    #[error("No register bank with id {0}")]
    UnknownBank(u8),
    #[error("{bank:?} is {access:?}, operation refused")]
    AccessDenied {
        bank: RegisterBank,
        access: AccessMode,
    },
    #[error("Board returned {actual} bytes, {expected} were requested")]
    ResponseLength { expected: usize, actual: usize },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failure to open the link to the board
#[derive(Debug, Error)]
#[error("Could not connect to {port}: {reason}")]
pub struct ConnectError {
    pub port: String,
    pub reason: String,
}

/// Failure to release the link to the board
#[derive(Debug, Error)]
#[error("Could not disconnect from the board: {0}")]
pub struct DisconnectError(pub String);

/// Link-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Board did not answer within {0:?}")]
    NoResponse(Duration),
    #[error("Board did not answer (status -3)")]
    NoResponseReported,
    #[error("Transport error: {0}")]
    Io(String),
    #[error("Malformed frame from board: {0}")]
    Malformed(String),
}

/// Errors reported by the firmware in the status byte
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Board reported a software error")]
    RemoteSoftware,
    #[error("Board reported an I2C bus error")]
    I2cBus,
    #[error("Board returned unknown status {0}")]
    UnknownStatus(i8),
    #[error("Board reported {0} mismatches although no readback was requested")]
    UnexpectedMismatchCount(u8),
}

/// Failures while loading or writing the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file {0} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config file IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ScError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Disconnect(#[from] DisconnectError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Readback differs from written value on {count} registers")]
    VerifyMismatch { count: u8 },
    #[error("Board is not connected")]
    NotConnected,
    #[error("Board is already connected")]
    AlreadyConnected,
}

impl ScError {
    /// Integer code in the convention of the board firmware: `> 0` mismatch
    /// count, `-1` software error, `-2` I2C error, `-3` no answer.
    pub fn code(&self) -> i32 {
        match self {
            ScError::VerifyMismatch { count } => *count as i32,
            ScError::Protocol(ProtocolError::I2cBus) => -2,
            ScError::Transport(TransportError::NoResponse(_) | TransportError::NoResponseReported) => -3,
            ScError::Protocol(ProtocolError::UnknownStatus(code)) => *code as i32,
            _ => -1,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ScError::Validation(_))
    }
}
