//! Register banks of the PICMIC0 chip as seen by the I2C master.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ValidationError;

/// Who may touch a bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    NotAvailable = 0,
    WriteOnly = 1,
    ReadOnly = 2,
    ReadWrite = 3,
}

impl AccessMode {
    pub fn can_write(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }

    pub fn can_read(self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }
}

/// A contiguous group of chip registers handled as one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegisterBank {
    GlbCmd = 0,
    PixSeq = 1,
    VpulseSw = 2,
    TestSCtrl = 3,
    DacVal = 4,
    DacSw = 5,
    DataEmul = 6,
    PixConfRow = 7,
    ConfCol = 8,
    ConfData = 9,
}

struct BankInfo {
    address: u8,
    size: usize,
    access: AccessMode,
    mnemonic: &'static str,
    name: &'static str,
}

const CATALOG: [BankInfo; 10] = [
    BankInfo { address: 0x01, size: 1, access: AccessMode::ReadWrite, mnemonic: "GLB_CMD", name: "Global command" },
    BankInfo { address: 0x02, size: 24, access: AccessMode::ReadWrite, mnemonic: "PIX_SEQ", name: "Pixel sequence" },
    BankInfo { address: 0x1E, size: 7, access: AccessMode::ReadWrite, mnemonic: "VPULSE_SW", name: "Vpulse switch" },
    BankInfo { address: 0x25, size: 1, access: AccessMode::ReadWrite, mnemonic: "TEST_S_CTRL", name: "Test structure control" },
    BankInfo { address: 0x26, size: 5, access: AccessMode::ReadWrite, mnemonic: "DAC_VAL", name: "DAC values" },
    BankInfo { address: 0x2B, size: 3, access: AccessMode::ReadWrite, mnemonic: "DAC_SW", name: "DAC switches" },
    BankInfo { address: 0x3C, size: 1, access: AccessMode::ReadWrite, mnemonic: "DATA_EMUL", name: "Data emulation" },
    BankInfo { address: 0x3D, size: 1, access: AccessMode::ReadWrite, mnemonic: "PIX_CONF_ROW", name: "Pixel config row" },
    BankInfo { address: 0x3E, size: 1, access: AccessMode::ReadWrite, mnemonic: "CONF_COL", name: "Pixel config col" },
    BankInfo { address: 0x3F, size: 1, access: AccessMode::ReadWrite, mnemonic: "CONF_DATA", name: "Pixel config data" },
];

impl RegisterBank {
    /// All banks in catalog order
    pub const ALL: [RegisterBank; 10] = [
        RegisterBank::GlbCmd,
        RegisterBank::PixSeq,
        RegisterBank::VpulseSw,
        RegisterBank::TestSCtrl,
        RegisterBank::DacVal,
        RegisterBank::DacSw,
        RegisterBank::DataEmul,
        RegisterBank::PixConfRow,
        RegisterBank::ConfCol,
        RegisterBank::ConfData,
    ];

    /// Largest bank, in bytes
    pub const MAX_SIZE: usize = 24;

    pub fn from_id(id: u8) -> Result<Self, ValidationError> {
        Self::ALL
            .get(id as usize)
            .copied()
            .ok_or(ValidationError::UnknownBank(id))
    }

    /// Bank and offset holding a chip register address
    pub fn containing(address: u8) -> Option<(Self, usize)> {
        Self::ALL.into_iter().find_map(|bank| {
            let start = bank.address();
            let offset = address.checked_sub(start)? as usize;
            (offset < bank.size()).then_some((bank, offset))
        })
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    fn info(self) -> &'static BankInfo {
        &CATALOG[self as usize]
    }

    pub fn address(self) -> u8 {
        self.info().address
    }

    pub fn size(self) -> usize {
        self.info().size
    }

    pub fn access(self) -> AccessMode {
        self.info().access
    }

    /// Register bank name as written in the chip documentation, e.g. `DAC_VAL`
    pub fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Reject payloads whose length differs from the bank size
    pub fn check_len(self, len: usize) -> Result<(), ValidationError> {
        if len == self.size() {
            Ok(())
        } else {
            Err(ValidationError::SizeMismatch {
                bank: self,
                expected: self.size(),
                actual: len,
            })
        }
    }
}

/// Parses a bank id or mnemonic, case-insensitive
impl FromStr for RegisterBank {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<u8>() {
            return Self::from_id(id);
        }
        Self::ALL
            .into_iter()
            .find(|bank| bank.mnemonic().eq_ignore_ascii_case(s))
            .ok_or_else(|| ValidationError::InvalidArgument(format!("unknown register bank {}", s)))
    }
}
