//! Command vocabulary shared with the I2C master firmware.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ScError, TransportError};

/// Command identifiers, sent as the sysex command byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetLog = 0,
    GetStatus = 1,
    SetWrReg = 2,
    GetRdReg = 3,
    SetWrDef = 4,
    WrAllReg = 5,
    RdAllReg = 6,
    CtrlHwSig = 7,
    TestI2cRegs = 8,
    ActivateOutputs = 9,
    DeactivateOutputs = 10,
    WrRegLowLevel = 11,
    RdRegLowLevel = 12,
}

impl Command {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        use Command::*;
        [
            SetLog,
            GetStatus,
            SetWrReg,
            GetRdReg,
            SetWrDef,
            WrAllReg,
            RdAllReg,
            CtrlHwSig,
            TestI2cRegs,
            ActivateOutputs,
            DeactivateOutputs,
            WrRegLowLevel,
            RdRegLowLevel,
        ]
        .get(id as usize)
        .copied()
    }
}

/// Where a register operation lands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegOp {
    /// Firmware RAM image only, no I2C access
    #[serde(rename = "SW")]
    Sw = 0,
    /// Image and chip
    #[serde(rename = "HW")]
    Hw = 1,
    /// Image and chip, then read back and compare
    #[default]
    #[serde(rename = "CHK")]
    Chk = 2,
}

impl RegOp {
    pub fn label(self) -> &'static str {
        match self {
            RegOp::Sw => "SW",
            RegOp::Hw => "HW",
            RegOp::Chk => "CHECK",
        }
    }
}

/// Wrapper the firmware applies around a register transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "op", content = "param", rename_all = "snake_case")]
pub enum PrePost {
    #[default]
    None,
    /// Reset I2C for the given number of ms before the operation
    PreReset(u8),
    /// Repeat the operation until it succeeds, at most this many times
    PostRetry(u8),
}

impl PrePost {
    /// `(op, param)` bytes as sent on the wire
    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            PrePost::None => [0, 0],
            PrePost::PreReset(ms) => [1, ms],
            PrePost::PostRetry(max) => [2, max],
        }
    }

    pub fn from_bytes(op: u8, param: u8) -> Option<Self> {
        match op {
            0 => Some(PrePost::None),
            1 => Some(PrePost::PreReset(param)),
            2 => Some(PrePost::PostRetry(param)),
            _ => None,
        }
    }
}

/// Operation mode and pre/post wrapper of one register transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transaction {
    pub op: RegOp,
    pub pre_post: PrePost,
}

impl Transaction {
    pub fn new(op: RegOp, pre_post: PrePost) -> Self {
        Self { op, pre_post }
    }

    /// `[op, prePostOp, prePostParam]`
    pub fn header(&self) -> [u8; 3] {
        let [pp_op, pp_param] = self.pre_post.to_bytes();
        [self.op as u8, pp_op, pp_param]
    }
}

/// How `SET_WR_DEF` fills the registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultFill {
    /// Values from the chip documentation, hardcoded in the firmware
    Doc,
    /// The same byte everywhere
    Value(u8),
}

impl DefaultFill {
    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            DefaultFill::Doc => [0, 0],
            DefaultFill::Value(v) => [1, v],
        }
    }
}

/// Sub-commands of `CTRL_HW_SIG`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwSignalCommand {
    SetAll = 0,
    SetReset = 1,
    SetResetI2c = 2,
    SetStart = 3,
    SetTestMode = 4,
    PulseReset = 5,
    PulseResetI2c = 6,
    PulseStart = 7,
    GetPrintStates = 8,
}

impl HwSignalCommand {
    pub fn from_id(id: u8) -> Option<Self> {
        use HwSignalCommand::*;
        [
            SetAll,
            SetReset,
            SetResetI2c,
            SetStart,
            SetTestMode,
            PulseReset,
            PulseResetI2c,
            PulseStart,
            GetPrintStates,
        ]
        .get(id as usize)
        .copied()
    }

    pub fn is_pulse(self) -> bool {
        matches!(
            self,
            HwSignalCommand::PulseReset | HwSignalCommand::PulseResetI2c | HwSignalCommand::PulseStart
        )
    }
}

/// Levels of the four steering lines. Bit order matches the `GET_PRINT_ST` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalLevels {
    pub reset: bool,
    pub reset_i2c: bool,
    pub start: bool,
    pub test_mode: bool,
}

impl SignalLevels {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            reset: bits & 0x01 != 0,
            reset_i2c: bits & 0x02 != 0,
            start: bits & 0x04 != 0,
            test_mode: bits & 0x08 != 0,
        }
    }

    pub fn to_bits(self) -> u8 {
        (self.reset as u8) | (self.reset_i2c as u8) << 1 | (self.start as u8) << 2 | (self.test_mode as u8) << 3
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [self.reset as u8, self.reset_i2c as u8, self.start as u8, self.test_mode as u8]
    }
}

/// Classified status byte of a firmware reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// Registers whose readback differed from the written value
    Mismatches(u8),
    SoftwareError,
    I2cError,
    NoAnswer,
    Unknown(i8),
}

impl Status {
    pub const SOFTWARE_ERROR: i8 = -1;
    pub const I2C_ERROR: i8 = -2;
    pub const NO_ANSWER: i8 = -3;

    pub fn from_code(code: i8) -> Self {
        match code {
            0 => Status::Ok,
            n if n > 0 => Status::Mismatches(n as u8),
            Self::SOFTWARE_ERROR => Status::SoftwareError,
            Self::I2C_ERROR => Status::I2cError,
            Self::NO_ANSWER => Status::NoAnswer,
            n => Status::Unknown(n),
        }
    }

    pub fn code(self) -> i8 {
        match self {
            Status::Ok => 0,
            Status::Mismatches(n) => n as i8,
            Status::SoftwareError => Self::SOFTWARE_ERROR,
            Status::I2cError => Self::I2C_ERROR,
            Status::NoAnswer => Self::NO_ANSWER,
            Status::Unknown(n) => n,
        }
    }

    /// Negative codes as errors, positive codes passed through
    pub fn non_negative(self) -> Result<u8, ScError> {
        match self {
            Status::Ok => Ok(0),
            Status::Mismatches(n) => Ok(n),
            Status::SoftwareError => Err(ProtocolError::RemoteSoftware.into()),
            Status::I2cError => Err(ProtocolError::I2cBus.into()),
            Status::NoAnswer => Err(TransportError::NoResponseReported.into()),
            Status::Unknown(n) => Err(ProtocolError::UnknownStatus(n).into()),
        }
    }

    /// Outcome of a write-type command. Mismatch counts only make sense after a
    /// readback, so they are rejected for other modes.
    pub fn into_write_result(self, op: RegOp) -> Result<(), ScError> {
        match self.non_negative()? {
            0 => Ok(()),
            count if op == RegOp::Chk => Err(ScError::VerifyMismatch { count }),
            count => Err(ProtocolError::UnexpectedMismatchCount(count).into()),
        }
    }
}
