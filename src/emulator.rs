//! In-memory stand-in for the DUE I2C master and the chip behind it.
//!
//! [`EmulatedBoard`] implements [`SysexTransport`] and answers every command
//! the way the firmware does: it keeps a register RAM image, a chip register
//! space and the pixel matrix addressed through `PIX_CONF_ROW`, `CONF_COL`
//! and `CONF_DATA`. Faults can be injected to exercise error paths.

use log::debug;
use std::collections::VecDeque;
use std::convert::Infallible;

use crate::catalog::RegisterBank;
use crate::codec::{decode_7_to_8, encode_8_to_7};
use crate::fields::{MATRIX_COLS, MATRIX_ROWS, PixelConfigCol, PixelConfigRow};
use crate::protocol::{Command, HwSignalCommand, SignalLevels, Status};
use crate::transport::SysexTransport;

const CHIP_SPACE: usize = 64;
const CONF_DATA_ADDR: usize = 0x3F;

pub struct EmulatedBoard {
    ram: [u8; CHIP_SPACE],
    chip: [u8; CHIP_SPACE],
    /// Bits forced high on every chip write, per address
    stuck_high: [u8; CHIP_SPACE],
    matrix: Box<[[u8; MATRIX_COLS]; MATRIX_ROWS]>,
    signals: SignalLevels,
    pulses: Vec<(HwSignalCommand, u16)>,
    outputs_active: bool,
    log_level: (u8, u8),
    injected: VecDeque<i8>,
    silent: bool,
    requests: Vec<(u8, Vec<u8>)>,
    pending: Option<Vec<u8>>,
}

impl Default for EmulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedBoard {
    pub fn new() -> Self {
        Self {
            ram: [0; CHIP_SPACE],
            chip: [0; CHIP_SPACE],
            stuck_high: [0; CHIP_SPACE],
            matrix: Box::new([[0; MATRIX_COLS]; MATRIX_ROWS]),
            signals: SignalLevels::default(),
            pulses: Vec::new(),
            outputs_active: false,
            log_level: (0, 0),
            injected: VecDeque::new(),
            silent: false,
            requests: Vec::new(),
            pending: None,
        }
    }

    /// Answer the next requests with these status codes instead of executing them
    pub fn inject_status(&mut self, status: i8) {
        self.injected.push_back(status);
    }

    /// Stop (or resume) answering
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Force `mask` high in the chip register at `address`
    pub fn set_stuck_bits(&mut self, address: u8, mask: u8) {
        if let Some(bits) = self.stuck_high.get_mut(address as usize) {
            *bits = mask;
        }
    }

    /// Chip register content of a bank
    pub fn chip_bank(&self, bank: RegisterBank) -> &[u8] {
        let start = bank.address() as usize;
        &self.chip[start..start + bank.size()]
    }

    /// Firmware RAM image of a bank
    pub fn ram_bank(&self, bank: RegisterBank) -> &[u8] {
        let start = bank.address() as usize;
        &self.ram[start..start + bank.size()]
    }

    pub fn pixel(&self, row: usize, col: usize) -> u8 {
        self.matrix[row][col]
    }

    pub fn signals(&self) -> SignalLevels {
        self.signals
    }

    pub fn pulses(&self) -> &[(HwSignalCommand, u16)] {
        &self.pulses
    }

    pub fn outputs_active(&self) -> bool {
        self.outputs_active
    }

    pub fn log_level(&self) -> (u8, u8) {
        self.log_level
    }

    /// Received requests as `(command, payload)`, size bytes stripped
    pub fn requests(&self) -> &[(u8, Vec<u8>)] {
        &self.requests
    }

    fn selected_rows(&self) -> Vec<usize> {
        let row = PixelConfigRow(self.chip[RegisterBank::PixConfRow.address() as usize]);
        if row.sel_all_row() == 1 {
            (0..MATRIX_ROWS).collect()
        } else {
            vec![row.sel_row() as usize]
        }
    }

    fn selected_cols(&self) -> Vec<usize> {
        let col = PixelConfigCol(self.chip[RegisterBank::ConfCol.address() as usize]);
        match col.sel_desel_all_col() {
            1 => (0..MATRIX_COLS).collect(),
            2 => Vec::new(),
            _ if (col.sel_col() as usize) < MATRIX_COLS => vec![col.sel_col() as usize],
            _ => Vec::new(),
        }
    }

    fn write_chip(&mut self, address: usize, value: u8) {
        let value = value | self.stuck_high[address];
        self.chip[address] = value;
        if address == CONF_DATA_ADDR {
            for row in self.selected_rows() {
                for col in self.selected_cols() {
                    self.matrix[row][col] = value;
                }
            }
        }
    }

    fn read_chip(&self, address: usize) -> u8 {
        if address == CONF_DATA_ADDR {
            let rows = self.selected_rows();
            let cols = self.selected_cols();
            if let ([row], [col]) = (&rows[..], &cols[..]) {
                return self.matrix[*row][*col];
            }
        }
        self.chip[address]
    }

    /// Addresses `start..start + len`, or `None` past the chip space
    fn span(start: usize, len: usize) -> Option<std::ops::Range<usize>> {
        (start + len <= CHIP_SPACE).then_some(start..start + len)
    }

    fn mismatches(&self, range: std::ops::Range<usize>) -> usize {
        range.filter(|&a| self.read_chip(a) != self.ram[a]).count()
    }

    fn clamp_count(count: usize) -> i8 {
        count.min(i8::MAX as usize) as i8
    }

    /// Write `data` at `start` in RAM, and to the chip unless `op` is SW
    fn write_range(&mut self, start: usize, op: u8, data: &[u8]) -> i8 {
        let Some(range) = Self::span(start, data.len()) else {
            return Status::SOFTWARE_ERROR;
        };
        self.ram[range.clone()].copy_from_slice(data);
        if op == 0 {
            return 0;
        }
        for (addr, &value) in range.clone().zip(data) {
            self.write_chip(addr, value);
        }
        if op == 2 { Self::clamp_count(self.mismatches(range)) } else { 0 }
    }

    fn read_range(&self, start: usize, op: u8, len: usize) -> (i8, Vec<u8>) {
        let Some(range) = Self::span(start, len) else {
            return (Status::SOFTWARE_ERROR, Vec::new());
        };
        match op {
            0 => (0, self.ram[range].to_vec()),
            1 => (0, range.map(|a| self.read_chip(a)).collect()),
            2 => (
                Self::clamp_count(self.mismatches(range.clone())),
                range.map(|a| self.read_chip(a)).collect(),
            ),
            _ => (Status::SOFTWARE_ERROR, Vec::new()),
        }
    }

    fn all_bank_ranges() -> impl Iterator<Item = std::ops::Range<usize>> {
        RegisterBank::ALL.into_iter().map(|b| {
            let start = b.address() as usize;
            start..start + b.size()
        })
    }

    fn execute(&mut self, command: Command, payload: &[u8]) -> (i8, Vec<u8>) {
        const ERR: (i8, Vec<u8>) = (Status::SOFTWARE_ERROR, Vec::new());
        match (command, payload) {
            (Command::SetLog, &[raw, cmd]) => {
                self.log_level = (raw, cmd);
                (0, Vec::new())
            }
            (Command::GetStatus, [_]) => (0, vec![0, 0]),
            (Command::SetWrReg, &[id, op, _, _, len, ref data @ ..]) => {
                match RegisterBank::from_id(id) {
                    Ok(bank) if bank.size() == len as usize && data.len() == len as usize => {
                        (self.write_range(bank.address() as usize, op, data), Vec::new())
                    }
                    _ => ERR,
                }
            }
            (Command::GetRdReg, &[id, op, _, _, size]) => match RegisterBank::from_id(id) {
                Ok(bank) if bank.size() == size as usize => self.read_range(bank.address() as usize, op, bank.size()),
                _ => ERR,
            },
            (Command::WrRegLowLevel, &[addr, op, _, _, len, ref data @ ..]) if data.len() == len as usize => {
                (self.write_range(addr as usize, op, data), Vec::new())
            }
            (Command::RdRegLowLevel, &[addr, op, _, _, size]) => self.read_range(addr as usize, op, size as usize),
            (Command::SetWrDef, &[op, mode, value]) => {
                let value = match mode {
                    0 => 0,
                    1 => value,
                    _ => return ERR,
                };
                let mut count = 0;
                for range in Self::all_bank_ranges() {
                    let data = vec![value; range.len()];
                    count += self.write_range(range.start, op, &data) as usize;
                }
                (Self::clamp_count(count), Vec::new())
            }
            (Command::WrAllReg, &[op]) => {
                let mut count = 0;
                for range in Self::all_bank_ranges() {
                    let data = self.ram[range.clone()].to_vec();
                    count += self.write_range(range.start, op, &data) as usize;
                }
                (Self::clamp_count(count), Vec::new())
            }
            (Command::RdAllReg, &[op]) => {
                if op == 2 {
                    let count = Self::all_bank_ranges().map(|r| self.mismatches(r)).sum();
                    (Self::clamp_count(count), Vec::new())
                } else {
                    (0, Vec::new())
                }
            }
            (Command::CtrlHwSig, &[cmd, reset, reset_i2c, start, test_mode, w_lo, w_hi]) => {
                let width = u16::from_le_bytes([w_lo, w_hi]);
                let levels = SignalLevels {
                    reset: reset != 0,
                    reset_i2c: reset_i2c != 0,
                    start: start != 0,
                    test_mode: test_mode != 0,
                };
                match HwSignalCommand::from_id(cmd) {
                    Some(HwSignalCommand::SetAll) => self.signals = levels,
                    Some(HwSignalCommand::SetReset) => self.signals.reset = levels.reset,
                    Some(HwSignalCommand::SetResetI2c) => self.signals.reset_i2c = levels.reset_i2c,
                    Some(HwSignalCommand::SetStart) => self.signals.start = levels.start,
                    Some(HwSignalCommand::SetTestMode) => self.signals.test_mode = levels.test_mode,
                    Some(pulse) if pulse.is_pulse() => self.pulses.push((pulse, width)),
                    Some(_) => return (self.signals.to_bits() as i8, Vec::new()),
                    None => return ERR,
                }
                (0, Vec::new())
            }
            (Command::TestI2cRegs, &[id, it_lo, it_hi]) => {
                let Ok(bank) = RegisterBank::from_id(id) else {
                    return ERR;
                };
                let start = bank.address() as usize;
                let saved = self.ram[start..start + bank.size()].to_vec();
                let mut errors = 0;
                for it in 0..u16::from_le_bytes([it_lo, it_hi]) {
                    let pattern: Vec<u8> = (0..bank.size()).map(|i| (it as usize + i) as u8).collect();
                    errors += self.write_range(start, 2, &pattern) as usize;
                }
                self.write_range(start, 1, &saved);
                (Self::clamp_count(errors), Vec::new())
            }
            (Command::ActivateOutputs, [_]) => {
                self.outputs_active = true;
                (0, Vec::new())
            }
            (Command::DeactivateOutputs, [_]) => {
                self.outputs_active = false;
                (0, Vec::new())
            }
            _ => ERR,
        }
    }

    fn handle(&mut self, command: u8, frame: &[u8]) -> Vec<u8> {
        let frame = decode_7_to_8(frame);
        let (status, data) = match (Command::from_id(command), frame.get(2..)) {
            (Some(command), Some(payload)) => {
                self.requests.push((command.id(), payload.to_vec()));
                match self.injected.pop_front() {
                    Some(status) => (status, Vec::new()),
                    None => self.execute(command, payload),
                }
            }
            _ => (Status::SOFTWARE_ERROR, Vec::new()),
        };
        debug!("Emulated board: cmd {} status {} data {:02X?}", command, status, data);
        let mut reply = vec![status as u8];
        reply.extend_from_slice(&data);
        encode_8_to_7(&reply)
    }
}

impl SysexTransport for EmulatedBoard {
    type Error = Infallible;

    fn send_sysex(&mut self, command: u8, data: &[u8]) -> Result<(), Self::Error> {
        let reply = self.handle(command, data);
        self.pending = (!self.silent).then_some(reply);
        Ok(())
    }

    fn recv_sysex(&mut self, _timeout_ms: u32) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.pending.take())
    }

    fn clear_input(&mut self) -> Result<(), Self::Error> {
        self.pending = None;
        Ok(())
    }
}
