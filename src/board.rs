//! High level slow control of one PICMIC0 chip.
//!
//! [`PicmicBoard`] owns the link to the I2C master while connected, applies the
//! global operation mode and pre/post setting to every bank transaction and
//! logs one status line per operation.

use log::{error, info, warn};
use std::path::Path;
use std::time::Duration;

use crate::catalog::RegisterBank;
use crate::config::{BoardLogLevel, Config};
use crate::engine::{BoardStatus, RegisterEngine};
use crate::error::{ScError, ValidationError};
use crate::fields::{
    GlobalCommand, MATRIX_COLS, MATRIX_ROWS, PixelConfigCol, PixelConfigData, PixelConfigRow, PixelSequence,
    TestStructureControl,
};
use crate::image::RegisterImage;
use crate::protocol::{DefaultFill, HwSignalCommand, PrePost, RegOp, SignalLevels, Transaction};
use crate::session::Session;
use crate::trace::RegisterTrace;
use crate::transport::SysexTransport;

/// Outcome of [`PicmicBoard::transmission_test`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransmissionReport {
    pub iterations: u32,
    /// Failed register transactions, retries included
    pub link_errors: u32,
    /// Readbacks that differ from the written value
    pub compare_errors: u32,
}

impl TransmissionReport {
    pub fn is_clean(&self) -> bool {
        self.link_errors == 0 && self.compare_errors == 0
    }
}

impl std::fmt::Display for TransmissionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_clean() {
            write!(f, "Test without errors for {} transmissions", self.iterations)
        } else {
            write!(
                f,
                "Test with errors, total err nb: {}, comp errors: {} for {} transmissions",
                self.link_errors, self.compare_errors, self.iterations
            )
        }
    }
}

pub struct PicmicBoard<T: SysexTransport> {
    engine: Option<RegisterEngine<T>>,
    tx: Transaction,
    board_log: BoardLogLevel,
    timeout: Duration,
    /// Trace handed to the engine on the next connect
    trace: Option<RegisterTrace>,
    last_status: String,
}

impl<T: SysexTransport> Default for PicmicBoard<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SysexTransport> PicmicBoard<T> {
    /// Bytes per low-level write when splitting the pixel sequencer bank
    const PIX_SEQ_CHUNK: usize = 12;

    pub fn new() -> Self {
        Self {
            engine: None,
            tx: Transaction::default(),
            board_log: BoardLogLevel::default(),
            timeout: Session::<T>::DEFAULT_TIMEOUT,
            trace: None,
            last_status: String::new(),
        }
    }

    /// Board set up from the configuration, register trace included
    pub fn from_config(config: &Config) -> Result<Self, ScError> {
        let mut board = Self::new();
        board.tx = config.transaction();
        board.board_log = config.board_log;
        board.timeout = config.timeout();
        if let Some(path) = &config.trace_path {
            board
                .set_register_trace(path, &config.trace_comment)
                .map_err(|e| ValidationError::InvalidArgument(format!("register trace {}: {}", path.display(), e)))?;
        }
        Ok(board)
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_some()
    }

    /// Take over `transport` and initialise the board: firmware log level,
    /// outputs enabled, all steering lines low.
    ///
    /// The link stays up when an initialisation step fails, the first failure
    /// is returned.
    pub fn connect(&mut self, transport: T) -> Result<(), ScError> {
        if self.is_connected() {
            error!("Command rejected => board is ALREADY connected");
            return Err(ScError::AlreadyConnected);
        }

        let mut engine = RegisterEngine::new(Session::new(transport).with_timeout(self.timeout));
        engine.set_trace(self.trace.take());
        self.engine = Some(engine);
        info!("I2C master board is connected");

        let log = self.board_log;
        let log_result = self.engine_mut()?.set_log(log.raw, log.cmd);
        let log_result = self.report("Set board log level", log_result);
        let outputs_result = self.engine_mut()?.activate_outputs(RegOp::Sw);
        let outputs_result = self.report("Activate outputs", outputs_result);
        let signals_result = self
            .engine_mut()?
            .control_hardware_signal(HwSignalCommand::SetAll, SignalLevels::default(), 0);
        let signals_result = self.report("RST cleared", signals_result);

        log_result.and(outputs_result).and(signals_result.map(|_| ()))
    }

    /// Disable the outputs, close the link and hand the transport back
    pub fn disconnect(&mut self) -> Result<T, ScError> {
        let mut engine = self.engine.take().ok_or(ScError::NotConnected)?;
        if let Err(e) = engine.deactivate_outputs(RegOp::Sw) {
            warn!("Deactivate outputs failed: {}", e);
        }
        self.trace = engine.take_trace();
        let transport = engine.into_session().close()?;
        info!("I2C master board is disconnected");
        Ok(transport)
    }

    pub fn engine(&self) -> Result<&RegisterEngine<T>, ScError> {
        self.engine.as_ref().ok_or(ScError::NotConnected)
    }

    pub fn engine_mut(&mut self) -> Result<&mut RegisterEngine<T>, ScError> {
        self.engine.as_mut().ok_or(ScError::NotConnected)
    }

    /// Register values as last seen by the host
    pub fn image(&self) -> Result<&RegisterImage, ScError> {
        Ok(self.engine()?.image())
    }

    /// Status line of the last operation
    pub fn last_status(&self) -> &str {
        &self.last_status
    }

    fn report<R>(&mut self, what: &str, result: Result<R, ScError>) -> Result<R, ScError> {
        match &result {
            Ok(_) => {
                self.last_status = format!("{}, Reg op = {} - OK", what, self.tx.op.label());
                info!("{}", self.last_status);
            }
            Err(e) => {
                self.last_status = format!("{}, Reg op = {} - Error = {}: {}", what, self.tx.op.label(), e.code(), e);
                error!("{}", self.last_status);
            }
        }
        result
    }

    // Settings

    pub fn set_operation_mode(&mut self, op: RegOp) {
        self.tx.op = op;
        info!("Register operation mode set to {}", op.label());
    }

    pub fn operation_mode(&self) -> RegOp {
        self.tx.op
    }

    pub fn set_pre_post(&mut self, pre_post: PrePost) {
        self.tx.pre_post = pre_post;
        info!("Pre/post operation set to {:?}", pre_post);
    }

    pub fn pre_post(&self) -> PrePost {
        self.tx.pre_post
    }

    pub fn transaction(&self) -> Transaction {
        self.tx
    }

    /// Firmware console verbosity, sent right away when connected
    pub fn set_board_log_level(&mut self, raw: u8, cmd: u8) -> Result<(), ScError> {
        self.board_log = BoardLogLevel { raw, cmd };
        if self.is_connected() {
            let result = self.engine_mut()?.set_log(raw, cmd);
            self.report("Set board log level", result)?;
        }
        Ok(())
    }

    /// Record every register value sent to the chip in `path`
    pub fn set_register_trace(&mut self, path: impl AsRef<Path>, comment: &str) -> std::io::Result<()> {
        let trace = RegisterTrace::create(path, comment)?;
        match self.engine.as_mut() {
            Some(engine) => engine.set_trace(Some(trace)),
            None => self.trace = Some(trace),
        }
        Ok(())
    }

    pub fn enable_register_trace(&mut self, enabled: bool) {
        let trace = match self.engine.as_mut() {
            Some(engine) => engine.trace_mut(),
            None => self.trace.as_mut(),
        };
        match trace {
            Some(trace) => trace.set_enabled(enabled),
            None => warn!("No register trace file set"),
        }
    }

    // Banks

    /// Write a whole bank with the current operation mode
    pub fn write_bank(&mut self, bank: RegisterBank, data: &[u8]) -> Result<(), ScError> {
        let tx = self.tx;
        let result = self.engine_mut().and_then(|e| e.set_write_register(bank, tx, data));
        self.report(&format!("Write {}", bank.name()), result)
    }

    /// Read a whole bank with the current operation mode
    pub fn read_bank(&mut self, bank: RegisterBank) -> Result<Vec<u8>, ScError> {
        let tx = self.tx;
        let result = self.engine_mut().and_then(|e| e.get_read_register(bank, tx));
        if let Ok(data) = &result {
            info!("Read values hex = {:02X?}", data);
        }
        self.report(&format!("Read {}", bank.name()), result)
    }

    fn read_array<const N: usize>(&mut self, bank: RegisterBank) -> Result<[u8; N], ScError> {
        let data = self.read_bank(bank)?;
        data.as_slice().try_into().map_err(|_| {
            ValidationError::SizeMismatch {
                bank,
                expected: N,
                actual: data.len(),
            }
            .into()
        })
    }

    fn read_byte(&mut self, bank: RegisterBank) -> Result<u8, ScError> {
        self.read_array::<1>(bank).map(|[b]| b)
    }

    pub fn set_global_command(&mut self, value: GlobalCommand) -> Result<(), ScError> {
        self.write_bank(RegisterBank::GlbCmd, &[value.bits()])
    }

    pub fn get_global_command(&mut self) -> Result<GlobalCommand, ScError> {
        self.read_byte(RegisterBank::GlbCmd).map(GlobalCommand)
    }

    /// The 24 bytes do not fit one `SET_WR_REG` frame, so the bank is sent as
    /// two low-level writes.
    pub fn set_pixel_sequence(&mut self, seq: &PixelSequence) -> Result<(), ScError> {
        let base = RegisterBank::PixSeq.address();
        for (i, chunk) in seq.as_bytes().chunks(Self::PIX_SEQ_CHUNK).enumerate() {
            let address = base + (i * Self::PIX_SEQ_CHUNK) as u8;
            self.write_one_register(address, chunk)?;
        }
        Ok(())
    }

    pub fn get_pixel_sequence(&mut self) -> Result<PixelSequence, ScError> {
        self.read_array::<24>(RegisterBank::PixSeq).map(PixelSequence)
    }

    pub fn set_vpulse_switches(&mut self, values: &[u8; 7]) -> Result<(), ScError> {
        self.write_bank(RegisterBank::VpulseSw, values)
    }

    pub fn get_vpulse_switches(&mut self) -> Result<[u8; 7], ScError> {
        self.read_array(RegisterBank::VpulseSw)
    }

    pub fn set_test_structure_control(&mut self, value: TestStructureControl) -> Result<(), ScError> {
        self.write_bank(RegisterBank::TestSCtrl, &[value.bits()])
    }

    pub fn get_test_structure_control(&mut self) -> Result<TestStructureControl, ScError> {
        self.read_byte(RegisterBank::TestSCtrl).map(TestStructureControl)
    }

    pub fn set_dac_values(&mut self, values: &[u8; 5]) -> Result<(), ScError> {
        self.write_bank(RegisterBank::DacVal, values)
    }

    pub fn get_dac_values(&mut self) -> Result<[u8; 5], ScError> {
        self.read_array(RegisterBank::DacVal)
    }

    pub fn set_dac_switches(&mut self, values: &[u8; 3]) -> Result<(), ScError> {
        self.write_bank(RegisterBank::DacSw, values)
    }

    pub fn get_dac_switches(&mut self) -> Result<[u8; 3], ScError> {
        self.read_array(RegisterBank::DacSw)
    }

    pub fn set_data_emulation(&mut self, value: u8) -> Result<(), ScError> {
        self.write_bank(RegisterBank::DataEmul, &[value])
    }

    pub fn get_data_emulation(&mut self) -> Result<u8, ScError> {
        self.read_byte(RegisterBank::DataEmul)
    }

    pub fn set_pixel_row(&mut self, value: PixelConfigRow) -> Result<(), ScError> {
        self.write_bank(RegisterBank::PixConfRow, &[value.bits()])
    }

    pub fn get_pixel_row(&mut self) -> Result<PixelConfigRow, ScError> {
        self.read_byte(RegisterBank::PixConfRow).map(PixelConfigRow)
    }

    pub fn set_pixel_col(&mut self, value: PixelConfigCol) -> Result<(), ScError> {
        self.write_bank(RegisterBank::ConfCol, &[value.bits()])
    }

    pub fn get_pixel_col(&mut self) -> Result<PixelConfigCol, ScError> {
        self.read_byte(RegisterBank::ConfCol).map(PixelConfigCol)
    }

    pub fn set_pixel_data(&mut self, value: PixelConfigData) -> Result<(), ScError> {
        self.write_bank(RegisterBank::ConfData, &[value.bits()])
    }

    pub fn get_pixel_data(&mut self) -> Result<PixelConfigData, ScError> {
        self.read_byte(RegisterBank::ConfData).map(PixelConfigData)
    }

    /// Write `data` at a raw chip address
    pub fn write_one_register(&mut self, address: u8, data: &[u8]) -> Result<(), ScError> {
        let tx = self.tx;
        let result = self
            .engine_mut()
            .and_then(|e| e.write_register_low_level(address, tx, data));
        self.report(&format!("Write register 0x{:02X}", address), result)
    }

    pub fn read_one_register(&mut self, address: u8, size: usize) -> Result<Vec<u8>, ScError> {
        let tx = self.tx;
        let result = self
            .engine_mut()
            .and_then(|e| e.read_register_low_level(address, tx, size));
        self.report(&format!("Read register 0x{:02X}", address), result)
    }

    // Bulk operations

    pub fn write_doc_defaults(&mut self) -> Result<(), ScError> {
        let tx = self.tx;
        let result = self
            .engine_mut()
            .and_then(|e| e.set_default_all_registers(tx, DefaultFill::Doc));
        self.report("Write doc defaults in all registers", result)
    }

    pub fn write_value_in_all_registers(&mut self, value: u8) -> Result<(), ScError> {
        let tx = self.tx;
        let result = self
            .engine_mut()
            .and_then(|e| e.set_default_all_registers(tx, DefaultFill::Value(value)));
        self.report(&format!("Write 0x{:02X} in all registers", value), result)
    }

    pub fn send_image_to_all_registers(&mut self) -> Result<(), ScError> {
        let tx = self.tx;
        let result = self.engine_mut().and_then(|e| e.write_all_registers(tx));
        self.report("Send RAM image to all registers", result)
    }

    pub fn read_all_registers_to_image(&mut self) -> Result<(), ScError> {
        let tx = self.tx;
        let result = self.engine_mut().and_then(|e| e.read_all_registers(tx));
        self.report("Read all registers to RAM image", result)
    }

    pub fn test_register_bank(&mut self, bank: RegisterBank, iterations: u16) -> Result<(), ScError> {
        let result = self
            .engine_mut()
            .and_then(|e| e.test_register_bank(bank, iterations));
        self.report(&format!("Test {} x{}", bank.name(), iterations), result)
    }

    pub fn get_status(&mut self) -> Result<BoardStatus, ScError> {
        let result = self.engine_mut().and_then(|e| e.get_status());
        self.report("Get status", result)
    }

    // Pixel matrix

    fn check_pixel(row: u8, col: u8) -> Result<(), ValidationError> {
        if (row as usize) < MATRIX_ROWS && (col as usize) < MATRIX_COLS {
            Ok(())
        } else {
            Err(ValidationError::InvalidArgument(format!("no pixel at row {} col {}", row, col)))
        }
    }

    /// Select one pixel, write its configuration, deselect all columns
    pub fn write_pixel(&mut self, row: u8, col: u8, value: PixelConfigData) -> Result<(), ScError> {
        Self::check_pixel(row, col)?;
        self.set_pixel_row(PixelConfigRow::row(row))?;
        self.set_pixel_col(PixelConfigCol::col(col))?;
        self.set_pixel_data(value)?;
        self.set_pixel_col(PixelConfigCol::deselect_all())
    }

    /// Select one pixel and read its configuration back from the chip.
    ///
    /// The read is done in `HW` mode: the pixel content is not the last value
    /// written to `CONF_DATA`, so a `CHK` comparison would be meaningless.
    pub fn read_pixel(&mut self, row: u8, col: u8) -> Result<PixelConfigData, ScError> {
        Self::check_pixel(row, col)?;
        self.set_pixel_row(PixelConfigRow::row(row))?;
        self.set_pixel_col(PixelConfigCol::col(col))?;

        let tx = Transaction::new(RegOp::Hw, self.tx.pre_post);
        let result = self
            .engine_mut()
            .and_then(|e| e.get_read_register(RegisterBank::ConfData, tx));
        let data = self.report(&format!("Read pixel row {} col {}", row, col), result);

        let deselect = self.set_pixel_col(PixelConfigCol::deselect_all());
        let value = data?;
        deselect?;
        Ok(PixelConfigData(value[0]))
    }

    /// Write `value` into every pixel of the matrix
    pub fn reset_pixel_matrix(&mut self, value: PixelConfigData) -> Result<(), ScError> {
        self.set_pixel_col(PixelConfigCol::select_all())?;
        self.set_pixel_row(PixelConfigRow::all())?;
        self.set_pixel_data(value)?;
        self.set_pixel_col(PixelConfigCol::deselect_all())
    }

    /// Stress the I2C link by writing and reading back `CONF_COL`.
    ///
    /// A transfer the board completed counts as sent, even when its `CHK`
    /// readback differed. Only failed transfers are retried, once. Link failures
    /// and readback differences are counted, not returned. A step counts at most
    /// one readback difference.
    pub fn transmission_test(&mut self, iterations: u32) -> Result<TransmissionReport, ScError> {
        self.engine()?;
        let tx = self.tx;
        let mut report = TransmissionReport {
            iterations,
            ..Default::default()
        };

        for i in 0..iterations {
            let value = (i % 255) as u8;
            let engine = self.engine_mut()?;
            let mut differs = false;
            match engine.set_write_register(RegisterBank::ConfCol, tx, &[value]) {
                Ok(()) => {}
                Err(ScError::VerifyMismatch { .. }) => differs = true,
                Err(e) => {
                    error!("Write col:{} - {}", value, e);
                    report.link_errors += 1;
                    match engine.set_write_register(RegisterBank::ConfCol, tx, &[value]) {
                        Ok(()) => {}
                        Err(ScError::VerifyMismatch { .. }) => differs = true,
                        Err(e) => {
                            error!("Second try / Write col:{} - {}", value, e);
                            report.link_errors += 1;
                        }
                    }
                }
            }
            match engine.get_read_register(RegisterBank::ConfCol, tx) {
                Ok(read) if read == [value] => {}
                Ok(read) => {
                    error!("Step {}/{} written value:{} / readback value:{:?}", i, iterations, value, read);
                    differs = true;
                }
                Err(ScError::VerifyMismatch { .. }) => {
                    error!("Step {}/{} written value:{} / readback differs", i, iterations, value);
                    differs = true;
                }
                Err(e) => {
                    error!("Step {}/{} read failed: {}", i, iterations, e);
                    report.link_errors += 1;
                }
            }
            if differs {
                report.compare_errors += 1;
            }
        }

        match self.set_pixel_col(PixelConfigCol::deselect_all()) {
            Ok(()) => {}
            Err(ScError::VerifyMismatch { .. }) => report.compare_errors += 1,
            Err(e) => {
                error!("Deselect all columns failed: {}", e);
                report.link_errors += 1;
            }
        }

        if report.is_clean() {
            info!("{}", report);
        } else {
            error!("{}", report);
        }
        self.last_status = report.to_string();
        Ok(report)
    }

    // Steering signals

    fn hw_signal(&mut self, what: &str, cmd: HwSignalCommand, levels: SignalLevels, width_us: u16) -> Result<u8, ScError> {
        let result = self
            .engine_mut()
            .and_then(|e| e.control_hardware_signal(cmd, levels, width_us));
        self.report(what, result)
    }

    pub fn set_reset(&mut self, level: bool) -> Result<(), ScError> {
        let levels = SignalLevels {
            reset: level,
            ..Default::default()
        };
        self.hw_signal(&format!("Set RST to {}", level as u8), HwSignalCommand::SetReset, levels, 0)
            .map(|_| ())
    }

    pub fn set_reset_i2c(&mut self, level: bool) -> Result<(), ScError> {
        let levels = SignalLevels {
            reset_i2c: level,
            ..Default::default()
        };
        self.hw_signal(&format!("Set RST_I2C to {}", level as u8), HwSignalCommand::SetResetI2c, levels, 0)
            .map(|_| ())
    }

    pub fn set_start(&mut self, level: bool) -> Result<(), ScError> {
        let levels = SignalLevels {
            start: level,
            ..Default::default()
        };
        self.hw_signal(&format!("Set START to {}", level as u8), HwSignalCommand::SetStart, levels, 0)
            .map(|_| ())
    }

    pub fn set_test_mode(&mut self, level: bool) -> Result<(), ScError> {
        let levels = SignalLevels {
            test_mode: level,
            ..Default::default()
        };
        self.hw_signal(&format!("Set TESTMODE to {}", level as u8), HwSignalCommand::SetTestMode, levels, 0)
            .map(|_| ())
    }

    /// Drive every steering line at once
    pub fn set_all_signals(&mut self, levels: SignalLevels) -> Result<(), ScError> {
        self.hw_signal("Set all signals", HwSignalCommand::SetAll, levels, 0)
            .map(|_| ())
    }

    pub fn pulse_reset(&mut self, width_us: u16) -> Result<(), ScError> {
        self.hw_signal(&format!("Pulse RST {} us", width_us), HwSignalCommand::PulseReset, SignalLevels::default(), width_us)
            .map(|_| ())
    }

    pub fn pulse_reset_i2c(&mut self, width_us: u16) -> Result<(), ScError> {
        self.hw_signal(
            &format!("Pulse RST_I2C {} us", width_us),
            HwSignalCommand::PulseResetI2c,
            SignalLevels::default(),
            width_us,
        )
        .map(|_| ())
    }

    pub fn pulse_start(&mut self, width_us: u16) -> Result<(), ScError> {
        self.hw_signal(&format!("Pulse START {} us", width_us), HwSignalCommand::PulseStart, SignalLevels::default(), width_us)
            .map(|_| ())
    }

    pub fn read_signal_states(&mut self) -> Result<SignalLevels, ScError> {
        let bits = self.hw_signal("Read steering signals", HwSignalCommand::GetPrintStates, SignalLevels::default(), 0)?;
        let levels = SignalLevels::from_bits(bits);
        info!(
            "RST = {}, RST_I2C = {}, START = {}, TESTMODE = {}",
            levels.reset as u8, levels.reset_i2c as u8, levels.start as u8, levels.test_mode as u8
        );
        Ok(levels)
    }
}
