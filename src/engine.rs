//! Register transaction verbs of the I2C master firmware.
//!
//! Every verb validates its arguments against the register catalog, builds the
//! command payload, runs one request/response exchange over the [`Session`] and
//! classifies the returned status byte. Nothing is retried on the host side.

use log::warn;

use crate::catalog::RegisterBank;
use crate::error::{ScError, ValidationError};
use crate::image::RegisterImage;
use crate::protocol::{Command, DefaultFill, HwSignalCommand, RegOp, SignalLevels, Status, Transaction};
use crate::session::{Reply, Session};
use crate::trace::RegisterTrace;
use crate::transport::SysexTransport;

/// Software and hardware status words reported by `GET_STATUS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardStatus {
    pub software: i8,
    pub hardware: i8,
}

pub struct RegisterEngine<T: SysexTransport> {
    session: Session<T>,
    image: RegisterImage,
    trace: Option<RegisterTrace>,
}

impl<T: SysexTransport> RegisterEngine<T> {
    pub fn new(session: Session<T>) -> Self {
        Self {
            session,
            image: RegisterImage::default(),
            trace: None,
        }
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    pub fn into_session(self) -> Session<T> {
        self.session
    }

    /// Register values as last seen by the host
    pub fn image(&self) -> &RegisterImage {
        &self.image
    }

    pub fn set_trace(&mut self, trace: Option<RegisterTrace>) {
        self.trace = trace;
    }

    pub fn trace_mut(&mut self) -> Option<&mut RegisterTrace> {
        self.trace.as_mut()
    }

    pub fn take_trace(&mut self) -> Option<RegisterTrace> {
        self.trace.take()
    }

    fn transact(&mut self, command: Command, payload: &[u8], expected_response: usize) -> Result<Reply, ScError> {
        self.session.send_frame(command, payload, expected_response)
    }

    fn trace(&mut self, op: RegOp, address: u8, data: &[u8]) {
        if op == RegOp::Sw {
            return;
        }
        if let Some(trace) = self.trace.as_mut() {
            trace.record(address, data);
        }
    }

    fn check_write_access(bank: RegisterBank) -> Result<(), ValidationError> {
        if bank.access().can_write() {
            Ok(())
        } else {
            Err(ValidationError::AccessDenied {
                bank,
                access: bank.access(),
            })
        }
    }

    fn check_read_access(bank: RegisterBank) -> Result<(), ValidationError> {
        if bank.access().can_read() {
            Ok(())
        } else {
            Err(ValidationError::AccessDenied {
                bank,
                access: bank.access(),
            })
        }
    }

    /// `SET_WR_REG`: write a whole bank.
    ///
    /// The length of `data` must be the bank size, otherwise nothing is sent.
    pub fn set_write_register(&mut self, bank: RegisterBank, tx: Transaction, data: &[u8]) -> Result<(), ScError> {
        Self::check_write_access(bank)?;
        bank.check_len(data.len())?;

        let mut payload = Vec::with_capacity(5 + data.len());
        payload.push(bank.id());
        payload.extend_from_slice(&tx.header());
        payload.push(data.len() as u8);
        payload.extend_from_slice(data);

        let reply = self.transact(Command::SetWrReg, &payload, 0)?;
        let result = Status::from_code(reply.status).into_write_result(tx.op);
        if matches!(result, Ok(()) | Err(ScError::VerifyMismatch { .. })) {
            self.image.record_write(bank, data);
            self.trace(tx.op, bank.address(), data);
        }
        result
    }

    /// `GET_RD_REG`: read a whole bank.
    ///
    /// `SW` reads the firmware image, `HW` reads the chip, `CHK` also compares
    /// with the last written value. A reply whose length is not the bank size
    /// is rejected even when the status is 0.
    pub fn get_read_register(&mut self, bank: RegisterBank, tx: Transaction) -> Result<Vec<u8>, ScError> {
        Self::check_read_access(bank)?;

        let mut payload = Vec::with_capacity(5);
        payload.push(bank.id());
        payload.extend_from_slice(&tx.header());
        payload.push(bank.size() as u8);

        let reply = self.transact(Command::GetRdReg, &payload, bank.size())?;
        Status::from_code(reply.status).into_write_result(tx.op)?;
        bank.check_len(reply.data.len())?;

        self.image.record_read(bank, &reply.data);
        Ok(reply.data)
    }

    /// `WR_REG_LOW_LEVEL`: write `data` at a raw chip address, bypassing the
    /// catalog. Only the frame limit applies.
    pub fn write_register_low_level(&mut self, address: u8, tx: Transaction, data: &[u8]) -> Result<(), ScError> {
        if data.is_empty() {
            return Err(ValidationError::InvalidArgument("no data to write".into()).into());
        }

        let mut payload = Vec::with_capacity(5 + data.len());
        payload.push(address);
        payload.extend_from_slice(&tx.header());
        payload.push(data.len() as u8);
        payload.extend_from_slice(data);

        let reply = self.transact(Command::WrRegLowLevel, &payload, 0)?;
        let result = Status::from_code(reply.status).into_write_result(tx.op);
        if matches!(result, Ok(()) | Err(ScError::VerifyMismatch { .. })) {
            self.image.record_write_at(address, data);
            self.trace(tx.op, address, data);
        }
        result
    }

    /// `RD_REG_LOW_LEVEL`: read `size` bytes from a raw chip address
    pub fn read_register_low_level(&mut self, address: u8, tx: Transaction, size: usize) -> Result<Vec<u8>, ScError> {
        if size == 0 || size > u8::MAX as usize {
            return Err(ValidationError::InvalidArgument(format!("cannot read {} registers", size)).into());
        }

        let mut payload = Vec::with_capacity(5);
        payload.push(address);
        payload.extend_from_slice(&tx.header());
        payload.push(size as u8);

        let reply = self.transact(Command::RdRegLowLevel, &payload, size)?;
        Status::from_code(reply.status).into_write_result(tx.op)?;
        if reply.data.len() != size {
            return Err(ValidationError::ResponseLength {
                expected: size,
                actual: reply.data.len(),
            }
            .into());
        }
        Ok(reply.data)
    }

    /// `SET_WR_DEF`: load defaults into every register. The firmware takes
    /// `[op, mode, value]` only, the pre/post setting of `tx` is not sent.
    pub fn set_default_all_registers(&mut self, tx: Transaction, fill: DefaultFill) -> Result<(), ScError> {
        let [mode, value] = fill.to_bytes();
        let payload = [tx.op as u8, mode, value];

        let reply = self.transact(Command::SetWrDef, &payload, 0)?;
        Status::from_code(reply.status).into_write_result(tx.op)?;

        // documented defaults are all zero in the host image
        let value = match fill {
            DefaultFill::Doc => 0,
            DefaultFill::Value(v) => v,
        };
        self.image.fill_written(value);
        for bank in RegisterBank::ALL {
            let data = vec![value; bank.size()];
            self.trace(tx.op, bank.address(), &data);
        }
        Ok(())
    }

    /// `WR_ALL_REG`: push the firmware register image to the chip
    pub fn write_all_registers(&mut self, tx: Transaction) -> Result<(), ScError> {
        let reply = self.transact(Command::WrAllReg, &[tx.op as u8], 0)?;
        Status::from_code(reply.status).into_write_result(tx.op)?;

        for bank in RegisterBank::ALL {
            let data = self.image.written(bank).to_vec();
            self.trace(tx.op, bank.address(), &data);
        }
        Ok(())
    }

    /// `RD_ALL_REG`: refresh the firmware image from the chip. In `CHK` mode
    /// the firmware compares against its write image and reports divergence.
    pub fn read_all_registers(&mut self, tx: Transaction) -> Result<(), ScError> {
        let reply = self.transact(Command::RdAllReg, &[tx.op as u8], 0)?;
        Status::from_code(reply.status).into_write_result(tx.op)
    }

    /// `CTRL_HW_SIG`: drive or pulse the steering lines.
    ///
    /// Returns the non-negative status. For
    /// [`HwSignalCommand::GetPrintStates`] it carries the line levels in bits 0..3.
    pub fn control_hardware_signal(
        &mut self,
        cmd: HwSignalCommand,
        levels: SignalLevels,
        pulse_width_us: u16,
    ) -> Result<u8, ScError> {
        let mut payload = Vec::with_capacity(7);
        payload.push(cmd as u8);
        payload.extend_from_slice(&levels.to_bytes());
        payload.extend_from_slice(&pulse_width_us.to_le_bytes());

        let reply = self.transact(Command::CtrlHwSig, &payload, 0)?;
        Status::from_code(reply.status).non_negative()
    }

    /// `TEST_I2C_REGS`: let the firmware write/read/compare a bank `iterations` times
    pub fn test_register_bank(&mut self, bank: RegisterBank, iterations: u16) -> Result<(), ScError> {
        let [lo, hi] = iterations.to_le_bytes();
        let reply = self.transact(Command::TestI2cRegs, &[bank.id(), lo, hi], 0)?;
        Status::from_code(reply.status).into_write_result(RegOp::Chk)
    }

    /// `SET_LOG`: firmware console verbosity. `raw` logs request/answer buffers,
    /// `cmd` is 0 (off), 1 (names) or 2 (names, data and results).
    pub fn set_log(&mut self, raw: u8, cmd: u8) -> Result<(), ScError> {
        if raw > 1 || cmd > 2 {
            return Err(ValidationError::InvalidArgument(format!("log level raw={} cmd={}", raw, cmd)).into());
        }
        let reply = self.transact(Command::SetLog, &[raw, cmd], 0)?;
        Status::from_code(reply.status).into_write_result(RegOp::Sw)
    }

    /// `GET_STATUS`
    pub fn get_status(&mut self) -> Result<BoardStatus, ScError> {
        let reply = self.transact(Command::GetStatus, &[0], 2)?;
        Status::from_code(reply.status).into_write_result(RegOp::Sw)?;
        match reply.data[..] {
            [software, hardware] => Ok(BoardStatus {
                software: software as i8,
                hardware: hardware as i8,
            }),
            _ => Err(ValidationError::ResponseLength {
                expected: 2,
                actual: reply.data.len(),
            }
            .into()),
        }
    }

    /// `ACTIVATE_OUTPUTS`: enable the board drivers towards the chip
    pub fn activate_outputs(&mut self, op: RegOp) -> Result<(), ScError> {
        let reply = self.transact(Command::ActivateOutputs, &[op as u8], 0)?;
        Status::from_code(reply.status).into_write_result(op)
    }

    /// `DEACTIVATE_OUTPUTS`
    pub fn deactivate_outputs(&mut self, op: RegOp) -> Result<(), ScError> {
        let reply = self.transact(Command::DeactivateOutputs, &[op as u8], 0)?;
        let result = Status::from_code(reply.status).into_write_result(op);
        if result.is_err() {
            warn!("Outputs may still be driven");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProtocolError, TransportError};
    use crate::mock::MockTransport;
    use crate::protocol::PrePost;

    fn engine(transport: MockTransport) -> RegisterEngine<MockTransport> {
        RegisterEngine::new(Session::new(transport))
    }

    fn chk() -> Transaction {
        Transaction::new(RegOp::Chk, PrePost::None)
    }

    fn requests(engine: &RegisterEngine<MockTransport>) -> Vec<(u8, u16, Vec<u8>)> {
        engine.session().transport().requests()
    }

    // ===================
    // set_write_register tests
    // ===================

    #[test]
    fn test_write_payload() {
        let mut engine = engine(MockTransport::new().ok(1));
        let tx = Transaction::new(RegOp::Hw, PrePost::PostRetry(3));
        engine.set_write_register(RegisterBank::DacSw, tx, &[1, 2, 3]).unwrap();
        assert_eq!(requests(&engine), [(2, 0, vec![5, 1, 2, 3, 3, 1, 2, 3])]);
        assert_eq!(engine.image().written(RegisterBank::DacSw), [1, 2, 3]);
    }

    #[test]
    fn test_write_wrong_size_is_not_sent() {
        let mut engine = engine(MockTransport::new().ok(1));
        for len in [23, 25] {
            let err = engine
                .set_write_register(RegisterBank::PixSeq, chk(), &vec![0; len])
                .unwrap_err();
            assert!(matches!(
                err,
                ScError::Validation(ValidationError::SizeMismatch { expected: 24, .. })
            ));
        }
        assert_eq!(engine.session().transport().sent_count(), 0);
    }

    #[test]
    fn test_write_pixel_sequence_exceeds_frame() {
        let mut engine = engine(MockTransport::new().ok(1));
        let err = engine
            .set_write_register(RegisterBank::PixSeq, chk(), &[0; 24])
            .unwrap_err();
        assert!(matches!(
            err,
            ScError::Validation(ValidationError::FrameTooLarge { size: 62, max: 60 })
        ));
        assert_eq!(engine.session().transport().sent_count(), 0);
    }

    #[test]
    fn test_write_i2c_error_vs_no_answer() {
        let mut engine = engine(MockTransport::new().reply(-2, &[]).silent());
        let i2c = engine
            .set_write_register(RegisterBank::GlbCmd, chk(), &[0x08])
            .unwrap_err();
        let silent = engine
            .set_write_register(RegisterBank::GlbCmd, chk(), &[0x08])
            .unwrap_err();
        assert!(matches!(i2c, ScError::Protocol(ProtocolError::I2cBus)));
        assert!(matches!(silent, ScError::Transport(TransportError::NoResponse(_))));
        assert_ne!(i2c.code(), silent.code());
    }

    #[test]
    fn test_write_firmware_no_answer_code() {
        let mut engine = engine(MockTransport::new().reply(-3, &[]));
        let err = engine
            .set_write_register(RegisterBank::GlbCmd, chk(), &[0x08])
            .unwrap_err();
        assert!(matches!(err, ScError::Transport(TransportError::NoResponse(_))));
    }

    #[test]
    fn test_write_verify_mismatch() {
        let mut engine = engine(MockTransport::new().reply(2, &[]));
        let err = engine
            .set_write_register(RegisterBank::DacVal, chk(), &[1, 2, 3, 4, 5])
            .unwrap_err();
        assert!(matches!(err, ScError::VerifyMismatch { count: 2 }));
        assert_eq!(err.code(), 2);
    }

    #[test]
    fn test_write_remote_software_error() {
        let mut engine = engine(MockTransport::new().reply(-1, &[]));
        let err = engine
            .set_write_register(RegisterBank::GlbCmd, chk(), &[0x08])
            .unwrap_err();
        assert!(matches!(err, ScError::Protocol(ProtocolError::RemoteSoftware)));
        assert_eq!(engine.image().written(RegisterBank::GlbCmd), [0]);
    }

    // ===================
    // get_read_register tests
    // ===================

    #[test]
    fn test_read_payload_and_data() {
        let mut engine = engine(MockTransport::new().reply(0, &[9, 8, 7, 6, 5]));
        let data = engine.get_read_register(RegisterBank::DacVal, chk()).unwrap();
        assert_eq!(data, [9, 8, 7, 6, 5]);
        assert_eq!(requests(&engine), [(3, 5, vec![4, 2, 0, 0, 5])]);
        assert_eq!(engine.image().read(RegisterBank::DacVal), [9, 8, 7, 6, 5]);
    }

    #[test]
    fn test_read_short_reply_is_size_mismatch() {
        let mut engine = engine(MockTransport::new().reply(0, &[9, 8]));
        let err = engine.get_read_register(RegisterBank::DacVal, chk()).unwrap_err();
        assert!(matches!(
            err,
            ScError::Validation(ValidationError::SizeMismatch { expected: 5, actual: 2, .. })
        ));
    }

    #[test]
    fn test_read_pixel_sequence_fits() {
        let mut engine = engine(MockTransport::new().reply(0, &[0x33; 24]));
        let data = engine.get_read_register(RegisterBank::PixSeq, chk()).unwrap();
        assert_eq!(data.len(), 24);
    }

    // ===================
    // bulk and control tests
    // ===================

    #[test]
    fn test_default_fill_payload() {
        let mut engine = engine(MockTransport::new().ok(2));
        let tx = Transaction::new(RegOp::Hw, PrePost::None);
        engine.set_default_all_registers(tx, DefaultFill::Value(0xA5)).unwrap();
        engine.set_default_all_registers(tx, DefaultFill::Doc).unwrap();
        let reqs = requests(&engine);
        assert_eq!(reqs[0], (4, 0, vec![1, 1, 0xA5]));
        assert_eq!(reqs[1], (4, 0, vec![1, 0, 0]));
    }

    #[test]
    fn test_default_fill_updates_image() {
        let mut engine = engine(MockTransport::new().ok(1));
        engine
            .set_default_all_registers(chk(), DefaultFill::Value(0x11))
            .unwrap();
        assert_eq!(engine.image().written(RegisterBank::DacSw), [0x11; 3]);
    }

    #[test]
    fn test_write_and_read_all_payloads() {
        let mut engine = engine(MockTransport::new().ok(2));
        engine.write_all_registers(Transaction::new(RegOp::Hw, PrePost::PreReset(4))).unwrap();
        engine.read_all_registers(chk()).unwrap();
        // only the operation mode goes on the wire
        assert_eq!(requests(&engine), [(5, 0, vec![1]), (6, 0, vec![2])]);
    }

    #[test]
    fn test_read_all_divergence() {
        let mut engine = engine(MockTransport::new().reply(3, &[]));
        assert!(matches!(
            engine.read_all_registers(chk()),
            Err(ScError::VerifyMismatch { count: 3 })
        ));
    }

    #[test]
    fn test_hw_signal_payload() {
        let mut engine = engine(MockTransport::new().ok(1));
        let levels = SignalLevels {
            reset: true,
            start: true,
            ..Default::default()
        };
        engine
            .control_hardware_signal(HwSignalCommand::PulseStart, levels, 300)
            .unwrap();
        assert_eq!(requests(&engine), [(7, 0, vec![7, 1, 0, 1, 0, 0x2C, 0x01])]);
    }

    #[test]
    fn test_hw_signal_small_width_has_high_byte() {
        let mut engine = engine(MockTransport::new().ok(1));
        engine
            .control_hardware_signal(HwSignalCommand::PulseReset, SignalLevels::default(), 255)
            .unwrap();
        assert_eq!(requests(&engine)[0].2, [5, 0, 0, 0, 0, 0xFF, 0x00]);
    }

    #[test]
    fn test_hw_signal_states_in_status() {
        let mut engine = engine(MockTransport::new().reply(0b0101, &[]));
        let bits = engine
            .control_hardware_signal(HwSignalCommand::GetPrintStates, SignalLevels::default(), 0)
            .unwrap();
        assert_eq!(SignalLevels::from_bits(bits), SignalLevels { reset: true, start: true, ..Default::default() });
    }

    #[test]
    fn test_test_register_bank_payload() {
        let mut engine = engine(MockTransport::new().ok(1).reply(4, &[]));
        engine.test_register_bank(RegisterBank::DacVal, 1000).unwrap();
        assert_eq!(requests(&engine), [(8, 0, vec![4, 0xE8, 0x03])]);
        assert!(matches!(
            engine.test_register_bank(RegisterBank::DacVal, 1),
            Err(ScError::VerifyMismatch { count: 4 })
        ));
    }

    #[test]
    fn test_get_status() {
        let mut engine = engine(MockTransport::new().reply(0, &[0, 0xFE]));
        let status = engine.get_status().unwrap();
        assert_eq!(status, BoardStatus { software: 0, hardware: -2 });
        assert_eq!(requests(&engine), [(1, 2, vec![0])]);
    }

    #[test]
    fn test_set_log_range() {
        let mut engine = engine(MockTransport::new().ok(1));
        engine.set_log(0, 2).unwrap();
        assert!(engine.set_log(2, 0).unwrap_err().is_validation());
        assert_eq!(requests(&engine), [(0, 0, vec![0, 2])]);
    }

    #[test]
    fn test_outputs() {
        let mut engine = engine(MockTransport::new().ok(2));
        engine.activate_outputs(RegOp::Sw).unwrap();
        engine.deactivate_outputs(RegOp::Sw).unwrap();
        assert_eq!(requests(&engine), [(9, 0, vec![0]), (10, 0, vec![0])]);
    }

    #[test]
    fn test_positive_status_outside_check_mode() {
        let mut engine = engine(MockTransport::new().reply(1, &[]));
        assert!(matches!(
            engine.activate_outputs(RegOp::Hw),
            Err(ScError::Protocol(ProtocolError::UnexpectedMismatchCount(1)))
        ));
    }

    // ===================
    // low level tests
    // ===================

    #[test]
    fn test_low_level_write_and_read() {
        let mut engine = engine(MockTransport::new().ok(1).reply(0, &[0x12, 0x34]));
        engine.write_register_low_level(0x27, chk(), &[0x12, 0x34]).unwrap();
        let data = engine.read_register_low_level(0x27, chk(), 2).unwrap();
        assert_eq!(data, [0x12, 0x34]);
        assert_eq!(
            requests(&engine),
            [(11, 0, vec![0x27, 2, 0, 0, 2, 0x12, 0x34]), (12, 2, vec![0x27, 2, 0, 0, 2])]
        );
        assert_eq!(engine.image().written(RegisterBank::DacVal), [0, 0x12, 0x34, 0, 0]);
    }

    #[test]
    fn test_low_level_read_length() {
        let mut engine = engine(MockTransport::new().reply(0, &[1]));
        assert!(matches!(
            engine.read_register_low_level(0x27, chk(), 2),
            Err(ScError::Validation(ValidationError::ResponseLength { expected: 2, actual: 1 }))
        ));
        assert!(engine.read_register_low_level(0x27, chk(), 0).unwrap_err().is_validation());
        assert!(engine.write_register_low_level(0x27, chk(), &[]).unwrap_err().is_validation());
    }
}
