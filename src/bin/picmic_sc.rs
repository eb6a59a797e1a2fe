use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use simplelog::{ColorChoice, LevelFilter, TermLogger, TerminalMode};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use picmic_sc::acquisition::run_acquisition;
use picmic_sc::config::Config;
use picmic_sc::fields::PixelConfigData;
use picmic_sc::{EmulatedBoard, PicmicBoard, RegOp, RegisterBank, ScError, SerialTransport, SysexTransport, ValidationError};

/// Slow control of a PICMIC0 chip through the DUE I2C master board.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Serial port, overrides the configuration
    #[arg(short, long)]
    port: Option<String>,
    /// Register operation mode, overrides the configuration
    #[arg(short, long, value_enum)]
    op: Option<OpArg>,
    /// Use the in-memory emulated board instead of a serial port
    #[arg(long)]
    emulate: bool,
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List the serial ports of this machine
    Ports,
    /// Make a template configuration yaml file
    New { path: PathBuf },
    /// Firmware status words
    Status,
    /// Write a whole register bank, given by id or name (e.g. DAC_VAL)
    Write {
        bank: RegisterBank,
        #[arg(value_parser = parse_byte, required = true)]
        values: Vec<u8>,
    },
    /// Read a whole register bank
    Read { bank: RegisterBank },
    /// Write bytes at a raw chip address
    WriteRaw {
        #[arg(value_parser = parse_byte)]
        address: u8,
        #[arg(value_parser = parse_byte, required = true)]
        values: Vec<u8>,
    },
    /// Read bytes from a raw chip address
    ReadRaw {
        #[arg(value_parser = parse_byte)]
        address: u8,
        #[arg(default_value_t = 1)]
        size: usize,
    },
    /// Load the documented defaults into every register
    Defaults,
    /// Write one value into every register
    Fill {
        #[arg(value_parser = parse_byte)]
        value: u8,
    },
    /// Send the firmware register image to the chip
    WriteAll,
    /// Read every register back into the firmware image
    ReadAll,
    /// Drive one steering line
    Signal {
        line: Line,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        level: u8,
    },
    /// Pulse one steering line
    Pulse { line: Line, width_us: u16 },
    /// Print the steering line levels
    Signals,
    /// Let the firmware write and compare a bank repeatedly
    TestBank {
        bank: RegisterBank,
        #[arg(default_value_t = 100)]
        iterations: u16,
    },
    /// Write one configuration into every pixel
    ResetMatrix {
        #[arg(value_parser = parse_byte, default_value = "0")]
        value: u8,
    },
    /// Read a pixel configuration, or write it when a value is given
    Pixel {
        row: u8,
        col: u8,
        #[arg(value_parser = parse_byte)]
        value: Option<u8>,
    },
    /// Write and read back CONF_COL to check the I2C link
    LinkTest {
        #[arg(default_value_t = 1000)]
        iterations: u32,
    },
    /// Run a frame acquisition with the configured backend
    Acquire {
        /// Keep the samples and print the first frame
        #[arg(long)]
        keep_data: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OpArg {
    Sw,
    Hw,
    Chk,
}

impl From<OpArg> for RegOp {
    fn from(op: OpArg) -> Self {
        match op {
            OpArg::Sw => RegOp::Sw,
            OpArg::Hw => RegOp::Hw,
            OpArg::Chk => RegOp::Chk,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Line {
    Rst,
    RstI2c,
    Start,
    TestMode,
}

/// Decimal or `0x` prefixed hex byte
fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{}: {}", s, e))
}

fn execute<T: SysexTransport>(board: &mut PicmicBoard<T>, command: &Cmd) -> Result<(), ScError> {
    match command {
        Cmd::Status => {
            let status = board.get_status()?;
            println!("software: {}, hardware: {}", status.software, status.hardware);
        }
        Cmd::Write { bank, values } => board.write_bank(*bank, values)?,
        Cmd::Read { bank } => {
            let data = board.read_bank(*bank)?;
            println!("{}: {:02X?}", bank.mnemonic(), data);
        }
        Cmd::WriteRaw { address, values } => board.write_one_register(*address, values)?,
        Cmd::ReadRaw { address, size } => {
            let data = board.read_one_register(*address, *size)?;
            println!("0x{:02X}: {:02X?}", address, data);
        }
        Cmd::Defaults => board.write_doc_defaults()?,
        Cmd::Fill { value } => board.write_value_in_all_registers(*value)?,
        Cmd::WriteAll => board.send_image_to_all_registers()?,
        Cmd::ReadAll => board.read_all_registers_to_image()?,
        Cmd::Signal { line, level } => {
            let level = *level != 0;
            match line {
                Line::Rst => board.set_reset(level)?,
                Line::RstI2c => board.set_reset_i2c(level)?,
                Line::Start => board.set_start(level)?,
                Line::TestMode => board.set_test_mode(level)?,
            }
        }
        Cmd::Pulse { line, width_us } => match line {
            Line::Rst => board.pulse_reset(*width_us)?,
            Line::RstI2c => board.pulse_reset_i2c(*width_us)?,
            Line::Start => board.pulse_start(*width_us)?,
            Line::TestMode => {
                return Err(ValidationError::InvalidArgument("TESTMODE cannot be pulsed".into()).into());
            }
        },
        Cmd::Signals => {
            let levels = board.read_signal_states()?;
            println!(
                "RST = {}, RST_I2C = {}, START = {}, TESTMODE = {}",
                levels.reset as u8, levels.reset_i2c as u8, levels.start as u8, levels.test_mode as u8
            );
        }
        Cmd::TestBank { bank, iterations } => board.test_register_bank(*bank, *iterations)?,
        Cmd::ResetMatrix { value } => board.reset_pixel_matrix(PixelConfigData(*value))?,
        Cmd::Pixel {
            row,
            col,
            value: Some(value),
        } => board.write_pixel(*row, *col, PixelConfigData(*value))?,
        Cmd::Pixel { row, col, value: None } => {
            let value = board.read_pixel(*row, *col)?;
            println!("pixel ({}, {}) = 0x{:02X}", row, col, value.bits());
        }
        Cmd::LinkTest { iterations } => {
            let report = board.transmission_test(*iterations)?;
            println!("{}", report);
        }
        // handled without a board
        Cmd::Ports | Cmd::New { .. } | Cmd::Acquire { .. } => {}
    }
    Ok(())
}

/// Connect, run one command and disconnect, even when the command failed
fn with_board<T: SysexTransport>(config: &Config, transport: T, command: &Cmd) -> Result<(), Box<dyn Error>> {
    let mut board = PicmicBoard::from_config(config)?;
    let result = board.connect(transport).and_then(|_| execute(&mut board, command));
    let disconnected = board.disconnect();
    result?;
    disconnected?;
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match &cli.command {
        Cmd::Ports => {
            for port in SerialTransport::available_ports()? {
                println!("{}", port);
            }
            return Ok(());
        }
        Cmd::New { path } => {
            info!("Making a template config at {}...", path.display());
            Config::default().write_config_file(path)?;
            info!("Done.");
            return Ok(());
        }
        _ => {}
    }

    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading config from {}...", path.display());
            Config::read_config_file(path)?
        }
        None => Config::default(),
    };
    if let Some(port) = &cli.port {
        config.port = port.clone();
    }
    if let Some(op) = cli.op {
        config.reg_op = op.into();
    }

    if let Cmd::Acquire { keep_data } = &cli.command {
        let mut backend = config.backend.create();
        let summary = run_acquisition(backend.as_mut(), &config.run, *keep_data)?;
        println!(
            "{} acquisitions, {} valid samples",
            summary.valid_samples.len(),
            summary.total_valid_samples()
        );
        if let Some(frame) = summary.data.get(..config.run.frame_length) {
            println!("first frame: {:?}", frame);
        }
        return Ok(());
    }

    if cli.emulate {
        info!("Using the emulated board");
        with_board(&config, EmulatedBoard::new(), &cli.command)
    } else {
        let transport = SerialTransport::open_with_baud(&config.port, config.baud_rate, config.auto_reset_disabled)?;
        with_board(&config, transport, &cli.command)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(e) = TermLogger::init(level, simplelog::Config::default(), TerminalMode::Mixed, ColorChoice::Auto) {
        eprintln!("Could not create logging: {}", e);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
