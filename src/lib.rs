//! Slow control of PICMIC0 pixel chips through an Arduino DUE I2C master
//! running a Firmata sysex firmware.
//!
//! # Features
//!
//! - `serial` - Serial port transport for desktop using the serialport crate
//! - `cli` - The `picmic-sc` console binary
//!
//! # Example
//!
//! ```ignore
//! use picmic_sc::{PicmicBoard, SerialTransport, fields::GlobalCommand};
//!
//! let transport = SerialTransport::open("/dev/ttyACM0", false)?;
//! let mut board = PicmicBoard::new();
//! board.connect(transport)?;
//!
//! board.set_global_command(GlobalCommand::default().with_start_seq(1))?;
//! println!("DACs: {:?}", board.get_dac_values()?);
//! ```

mod board;
mod catalog;
mod codec;
mod engine;
mod error;
mod image;
mod protocol;
mod session;
mod trace;
mod transport;

pub mod acquisition;
pub mod config;
pub mod emulator;
pub mod fields;

#[cfg(feature = "serial")]
mod serial;

#[cfg(test)]
mod mock;

// Re-exports
pub use board::{PicmicBoard, TransmissionReport};
pub use catalog::{AccessMode, RegisterBank};
pub use codec::{decode_7_to_8, encode_8_to_7, to_signed};
pub use config::Config;
pub use emulator::EmulatedBoard;
pub use engine::{BoardStatus, RegisterEngine};
pub use error::{
    ConfigError, ConnectError, DisconnectError, ProtocolError, ScError, TransportError, ValidationError,
};
pub use image::RegisterImage;
pub use protocol::{Command, DefaultFill, HwSignalCommand, PrePost, RegOp, SignalLevels, Status, Transaction};
pub use session::{MAX_FIRMATA_CMD_BUFF_SZ, Reply, Session};
pub use trace::RegisterTrace;
pub use transport::SysexTransport;

#[cfg(feature = "serial")]
pub use serial::{FirmwareInfo, SerialTransport};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{GlobalCommand, PixelConfigData, PixelSequence};

    /// Transport whose link is broken
    struct DummyTransport;

    impl SysexTransport for DummyTransport {
        type Error = std::io::Error;

        fn send_sysex(&mut self, _command: u8, _data: &[u8]) -> Result<(), Self::Error> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"))
        }

        fn recv_sysex(&mut self, _timeout_ms: u32) -> Result<Option<Vec<u8>>, Self::Error> {
            Ok(None)
        }

        fn clear_input(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    fn connected_board() -> PicmicBoard<EmulatedBoard> {
        let mut board = PicmicBoard::new();
        board.connect(EmulatedBoard::new()).unwrap();
        board
    }

    fn emulator(board: &PicmicBoard<EmulatedBoard>) -> &EmulatedBoard {
        board.engine().unwrap().session().transport()
    }

    // ===================
    // register engine tests
    // ===================

    #[test]
    fn test_check_write_then_read_global_command() {
        let mut engine = RegisterEngine::new(Session::new(EmulatedBoard::new()));
        let tx = Transaction::new(RegOp::Chk, PrePost::None);

        engine.set_write_register(RegisterBank::GlbCmd, tx, &[0x08]).unwrap();
        let data = engine.get_read_register(RegisterBank::GlbCmd, tx).unwrap();
        assert_eq!(data, [0x08]);
    }

    #[test]
    fn test_all_banks_round_trip() {
        let mut engine = RegisterEngine::new(Session::new(EmulatedBoard::new()));
        let tx = Transaction::new(RegOp::Hw, PrePost::None);

        for bank in RegisterBank::ALL {
            if bank == RegisterBank::PixSeq || bank == RegisterBank::ConfData {
                continue;
            }
            let data: Vec<u8> = (0..bank.size()).map(|i| bank.id() * 16 + i as u8).collect();
            engine.set_write_register(bank, tx, &data).unwrap();
            assert_eq!(engine.get_read_register(bank, tx).unwrap(), data);
        }
        assert!(engine.image().diverging_banks().is_empty());
    }

    #[test]
    fn test_broken_link_is_transport_error() {
        let mut engine = RegisterEngine::new(Session::new(DummyTransport));
        let err = engine.get_status().unwrap_err();
        assert!(matches!(err, ScError::Transport(TransportError::Io(_))));
    }

    #[test]
    fn test_i2c_error_and_silence_from_board() {
        let mut engine = RegisterEngine::new(Session::new(EmulatedBoard::new()));
        let tx = Transaction::default();

        engine.session_mut().transport_mut().inject_status(-2);
        let i2c = engine.set_write_register(RegisterBank::GlbCmd, tx, &[1]).unwrap_err();

        engine.session_mut().transport_mut().set_silent(true);
        let silent = engine.set_write_register(RegisterBank::GlbCmd, tx, &[1]).unwrap_err();

        assert_eq!(i2c.code(), -2);
        assert_eq!(silent.code(), -3);
    }

    #[test]
    fn test_stuck_bit_reported_in_check_mode_only() {
        let mut board = EmulatedBoard::new();
        board.set_stuck_bits(RegisterBank::DataEmul.address(), 0x01);
        let mut engine = RegisterEngine::new(Session::new(board));

        let hw = Transaction::new(RegOp::Hw, PrePost::None);
        engine.set_write_register(RegisterBank::DataEmul, hw, &[0x10]).unwrap();

        let chk = Transaction::new(RegOp::Chk, PrePost::None);
        assert!(matches!(
            engine.set_write_register(RegisterBank::DataEmul, chk, &[0x10]),
            Err(ScError::VerifyMismatch { count: 1 })
        ));
    }

    #[test]
    fn test_register_trace_records_chip_writes() {
        let path = std::env::temp_dir().join(format!("picmic_sc_{}_lib_trace.txt", std::process::id()));
        let mut engine = RegisterEngine::new(Session::new(EmulatedBoard::new()));
        engine.set_trace(Some(RegisterTrace::create(&path, "bias scan").unwrap()));

        let sw = Transaction::new(RegOp::Sw, PrePost::None);
        let hw = Transaction::new(RegOp::Hw, PrePost::None);
        engine.set_write_register(RegisterBank::GlbCmd, sw, &[0x01]).unwrap();
        engine.set_write_register(RegisterBank::DacSw, hw, &[7, 8, 9]).unwrap();
        drop(engine);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, ":bias scan\n43,7\n44,8\n45,9\n");
        std::fs::remove_file(&path).unwrap();
    }

    // ===================
    // board lifecycle tests
    // ===================

    #[test]
    fn test_connect_initialises_board() {
        let board = connected_board();
        let emu = emulator(&board);
        assert!(emu.outputs_active());
        assert_eq!(emu.log_level(), (0, 2));
        assert_eq!(emu.signals(), SignalLevels::default());

        let commands: Vec<u8> = emu.requests().iter().map(|(cmd, _)| *cmd).collect();
        assert_eq!(commands, [0, 9, 7]);
    }

    #[test]
    fn test_second_connect_rejected() {
        let mut board = connected_board();
        assert!(matches!(
            board.connect(EmulatedBoard::new()),
            Err(ScError::AlreadyConnected)
        ));
    }

    #[test]
    fn test_disconnect_deactivates_outputs() {
        let mut board = connected_board();
        let emu = board.disconnect().unwrap();
        assert!(!emu.outputs_active());
        assert!(!board.is_connected());
        assert!(matches!(board.disconnect(), Err(ScError::NotConnected)));
    }

    #[test]
    fn test_commands_while_disconnected() {
        let mut board: PicmicBoard<EmulatedBoard> = PicmicBoard::new();
        assert!(matches!(board.get_dac_values(), Err(ScError::NotConnected)));
        assert!(matches!(board.pulse_start(10), Err(ScError::NotConnected)));
        assert!(matches!(board.transmission_test(3), Err(ScError::NotConnected)));
        assert!(board.last_status().contains("Error = -1"));
    }

    #[test]
    fn test_connect_over_broken_link() {
        let mut board = PicmicBoard::new();
        let err = board.connect(DummyTransport).unwrap_err();
        assert!(matches!(err, ScError::Transport(TransportError::Io(_))));
        assert!(board.is_connected());
    }

    // ===================
    // board register tests
    // ===================

    #[test]
    fn test_board_bank_accessors() {
        let mut board = connected_board();
        board.set_dac_values(&[10, 20, 30, 40, 50]).unwrap();
        board.set_dac_switches(&[1, 0, 1]).unwrap();
        board.set_vpulse_switches(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
        board.set_data_emulation(0x5A).unwrap();
        board.set_global_command(GlobalCommand::default().with_rst_fr_cnt(1)).unwrap();

        assert_eq!(board.get_dac_values().unwrap(), [10, 20, 30, 40, 50]);
        assert_eq!(board.get_dac_switches().unwrap(), [1, 0, 1]);
        assert_eq!(board.get_vpulse_switches().unwrap(), [1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(board.get_data_emulation().unwrap(), 0x5A);
        assert_eq!(board.get_global_command().unwrap().rst_fr_cnt(), 1);
        assert!(board.last_status().ends_with("OK"));
    }

    #[test]
    fn test_board_pixel_sequence_split() {
        let mut board = connected_board();
        let mut seq = PixelSequence::default();
        seq.set_word(PixelSequence::MAX_FRAME, 1000);
        seq.set_word(PixelSequence::MARKER_2, 0xBEEF);

        board.set_pixel_sequence(&seq).unwrap();
        assert_eq!(emulator(&board).chip_bank(RegisterBank::PixSeq), seq.as_bytes());
        assert_eq!(board.get_pixel_sequence().unwrap(), seq);
        assert_eq!(board.image().unwrap().written(RegisterBank::PixSeq), seq.as_bytes());
    }

    #[test]
    fn test_board_operation_mode_in_requests() {
        let mut board = connected_board();
        board.set_operation_mode(RegOp::Sw);
        board.set_pre_post(PrePost::PreReset(5));
        board.set_data_emulation(3).unwrap();

        let (cmd, payload) = emulator(&board).requests().last().unwrap().clone();
        assert_eq!(cmd, Command::SetWrReg.id());
        assert_eq!(payload, [6, 0, 1, 5, 1, 3]);
        assert_eq!(emulator(&board).chip_bank(RegisterBank::DataEmul), [0]);
    }

    #[test]
    fn test_board_bulk_operations() {
        let mut board = connected_board();
        board.write_value_in_all_registers(0x22).unwrap();
        assert_eq!(emulator(&board).chip_bank(RegisterBank::DacVal), [0x22; 5]);

        board.write_doc_defaults().unwrap();
        assert_eq!(emulator(&board).chip_bank(RegisterBank::DacVal), [0; 5]);

        board.set_operation_mode(RegOp::Sw);
        board.set_dac_switches(&[4, 5, 6]).unwrap();
        board.set_operation_mode(RegOp::Chk);
        assert!(matches!(
            board.read_all_registers_to_image(),
            Err(ScError::VerifyMismatch { count: 3 })
        ));
        board.send_image_to_all_registers().unwrap();
        board.read_all_registers_to_image().unwrap();
        assert_eq!(emulator(&board).chip_bank(RegisterBank::DacSw), [4, 5, 6]);
    }

    #[test]
    fn test_board_low_level_register() {
        let mut board = connected_board();
        board.write_one_register(0x2C, &[0x99]).unwrap();
        assert_eq!(board.read_one_register(0x2B, 3).unwrap(), [0, 0x99, 0]);
    }

    #[test]
    fn test_board_status() {
        let mut board = connected_board();
        let status = board.get_status().unwrap();
        assert_eq!(status, BoardStatus { software: 0, hardware: 0 });
    }

    // ===================
    // pixel matrix tests
    // ===================

    #[test]
    fn test_write_and_read_pixel() {
        let mut board = connected_board();
        let value = PixelConfigData::default().with_i_adj(6).with_sw1(1);
        board.write_pixel(100, 50, value).unwrap();

        assert_eq!(emulator(&board).pixel(100, 50), value.bits());
        assert_eq!(emulator(&board).pixel(100, 49), 0);
        assert_eq!(board.read_pixel(100, 50).unwrap(), value);
        assert_eq!(board.read_pixel(0, 0).unwrap(), PixelConfigData(0));
        assert_eq!(emulator(&board).chip_bank(RegisterBank::ConfCol), [0x80]);
    }

    #[test]
    fn test_pixel_out_of_matrix() {
        let mut board = connected_board();
        let sent = emulator(&board).requests().len();
        assert!(board.write_pixel(128, 0, PixelConfigData(1)).unwrap_err().is_validation());
        assert!(board.read_pixel(0, 54).unwrap_err().is_validation());
        assert_eq!(emulator(&board).requests().len(), sent);
    }

    #[test]
    fn test_reset_pixel_matrix() {
        let mut board = connected_board();
        board.write_pixel(3, 3, PixelConfigData(0x01)).unwrap();
        board.reset_pixel_matrix(PixelConfigData(0x80)).unwrap();

        let emu = emulator(&board);
        assert_eq!(emu.pixel(3, 3), 0x80);
        assert_eq!(emu.pixel(127, 53), 0x80);
        assert_eq!(emu.chip_bank(RegisterBank::ConfCol), [0x80]);
    }

    #[test]
    fn test_transmission_test_clean() {
        let mut board = connected_board();
        let report = board.transmission_test(300).unwrap();
        assert_eq!(
            report,
            TransmissionReport {
                iterations: 300,
                link_errors: 0,
                compare_errors: 0
            }
        );
        assert_eq!(board.last_status(), "Test without errors for 300 transmissions");
    }

    #[test]
    fn test_transmission_test_stuck_bit() {
        let mut emu = EmulatedBoard::new();
        emu.set_stuck_bits(RegisterBank::ConfCol.address(), 0x01);
        let mut board = PicmicBoard::new();
        board.connect(emu).unwrap();
        board.set_operation_mode(RegOp::Hw);

        let report = board.transmission_test(4).unwrap();
        // values 0 and 2 read back as 1 and 3
        assert_eq!(report.compare_errors, 2);
        assert_eq!(report.link_errors, 0);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_transmission_test_check_mismatch_is_not_a_link_error() {
        let mut emu = EmulatedBoard::new();
        emu.set_stuck_bits(RegisterBank::ConfCol.address(), 0x01);
        let mut board = PicmicBoard::new();
        board.connect(emu).unwrap();
        assert_eq!(board.operation_mode(), RegOp::Chk);

        let report = board.transmission_test(4).unwrap();
        assert_eq!(report.link_errors, 0);
        // values 0 and 2, then the final deselect 0x80
        assert_eq!(report.compare_errors, 3);

        // completed writes are not retried: one write and one read per step
        let conf_col_writes = emulator(&board)
            .requests()
            .iter()
            .filter(|(cmd, payload)| *cmd == Command::SetWrReg.id() && payload[0] == RegisterBank::ConfCol.id())
            .count();
        assert_eq!(conf_col_writes, 5);
    }

    // ===================
    // steering signal tests
    // ===================

    #[test]
    fn test_steering_signals() {
        let mut board = connected_board();
        board.set_reset(true).unwrap();
        board.set_test_mode(true).unwrap();
        board.set_start(true).unwrap();
        board.set_start(false).unwrap();
        let levels = board.read_signal_states().unwrap();
        assert_eq!(
            levels,
            SignalLevels {
                reset: true,
                reset_i2c: false,
                start: false,
                test_mode: true
            }
        );
    }

    #[test]
    fn test_pulses() {
        let mut board = connected_board();
        board.pulse_reset(100).unwrap();
        board.pulse_reset_i2c(255).unwrap();
        board.pulse_start(1000).unwrap();
        assert_eq!(
            emulator(&board).pulses(),
            [
                (HwSignalCommand::PulseReset, 100),
                (HwSignalCommand::PulseResetI2c, 255),
                (HwSignalCommand::PulseStart, 1000)
            ]
        );
    }

    #[test]
    fn test_register_bank_self_test() {
        let mut board = connected_board();
        board.test_register_bank(RegisterBank::DacVal, 20).unwrap();

        let mut emu = EmulatedBoard::new();
        emu.set_stuck_bits(RegisterBank::DacVal.address(), 0x80);
        let mut board = PicmicBoard::new();
        board.connect(emu).unwrap();
        assert!(matches!(
            board.test_register_bank(RegisterBank::DacVal, 3),
            Err(ScError::VerifyMismatch { count: 3 })
        ));
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            reg_op: RegOp::Hw,
            pre_post: PrePost::PostRetry(2),
            ..Default::default()
        };
        let board: PicmicBoard<EmulatedBoard> = PicmicBoard::from_config(&config).unwrap();
        assert_eq!(board.transaction(), Transaction::new(RegOp::Hw, PrePost::PostRetry(2)));
    }
}
