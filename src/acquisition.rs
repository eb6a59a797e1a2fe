//! Frame acquisition runs.
//!
//! A run is split into `total_frames / frames_per_acq` acquisitions that are
//! polled one after another from an [`AcquisitionBackend`]. Backends are picked
//! through [`BackendKind`] in the configuration.

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest acquisition the sample buffer can hold, in 16-bit samples
pub const MAX_DATA_BUFFER_SIZE: usize = 10_000_000;

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Acquisition of {size} samples exceeds the buffer size of {max}")]
    BufferTooLarge { size: usize, max: usize },
    #[error("Invalid run parameters: {0}")]
    InvalidParams(String),
    #[error("No run started")]
    NotRunning,
    #[error("Acquisition backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataRate {
    #[default]
    Sdr,
    Ddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingEdge {
    #[default]
    Falling,
    Rising,
    RisingDelayed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunParams {
    pub clock_rate_hz: f64,
    pub data_rate: DataRate,
    pub sampling_edge: SamplingEdge,
    /// Frame size in clock counts
    pub frame_length: usize,
    pub frames_per_acq: usize,
    pub total_frames: usize,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            clock_rate_hz: 20_000_000.0,
            data_rate: DataRate::Sdr,
            sampling_edge: SamplingEdge::Falling,
            frame_length: 16_500,
            frames_per_acq: 100,
            total_frames: 1000,
        }
    }
}

impl RunParams {
    pub fn acquisitions(&self) -> usize {
        self.total_frames.checked_div(self.frames_per_acq).unwrap_or(0)
    }

    pub fn samples_per_acq(&self) -> usize {
        self.frames_per_acq.saturating_mul(self.frame_length)
    }

    pub fn validate(&self) -> Result<(), AcquisitionError> {
        if self.frame_length == 0 || self.frames_per_acq == 0 {
            return Err(AcquisitionError::InvalidParams(
                "frame length and frames per acquisition must be positive".into(),
            ));
        }
        if self.clock_rate_hz <= 0.0 {
            return Err(AcquisitionError::InvalidParams(format!("clock rate {}", self.clock_rate_hz)));
        }
        let size = self.samples_per_acq();
        if size > MAX_DATA_BUFFER_SIZE {
            return Err(AcquisitionError::BufferTooLarge {
                size,
                max: MAX_DATA_BUFFER_SIZE,
            });
        }
        Ok(())
    }
}

/// One polled acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub valid_samples: usize,
    pub data: Vec<u16>,
}

/// Source of acquired frames
pub trait AcquisitionBackend {
    fn start_run(&mut self, params: &RunParams) -> Result<(), AcquisitionError>;

    /// Block until the next acquisition is available
    fn read_acquisition(&mut self) -> Result<Acquisition, AcquisitionError>;

    fn stop_run(&mut self) -> Result<(), AcquisitionError>;
}

/// Backend choice in the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Emulated,
    #[serde(rename = "none")]
    Null,
}

impl BackendKind {
    pub fn create(self) -> Box<dyn AcquisitionBackend> {
        match self {
            BackendKind::Emulated => Box::new(EmulatedAcquisition::default()),
            BackendKind::Null => Box::new(NullAcquisition::default()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Valid sample count of each acquisition
    pub valid_samples: Vec<usize>,
    /// Concatenated data, empty unless requested
    pub data: Vec<u16>,
}

impl RunSummary {
    pub fn total_valid_samples(&self) -> usize {
        self.valid_samples.iter().sum()
    }
}

/// Run a complete acquisition and stop the backend, even on failure
pub fn run_acquisition<B: AcquisitionBackend + ?Sized>(
    backend: &mut B,
    params: &RunParams,
    keep_data: bool,
) -> Result<RunSummary, AcquisitionError> {
    params.validate()?;
    let count = params.acquisitions();
    backend.start_run(params)?;
    info!("Run started: {} acquisitions of {} frames", count, params.frames_per_acq);

    let mut summary = RunSummary::default();
    let polled: Result<(), AcquisitionError> = (0..count).try_for_each(|i| {
        let acq = backend.read_acquisition()?;
        debug!("Acq No:{} out of {}: {} valid samples", i, count, acq.valid_samples);
        summary.valid_samples.push(acq.valid_samples);
        if keep_data {
            summary.data.extend_from_slice(&acq.data);
        }
        Ok(())
    });

    let stopped = backend.stop_run();
    if let Err(e) = &polled {
        error!("Run aborted: {}", e);
    }
    polled?;
    stopped?;
    info!("Run finished: {} valid samples", summary.total_valid_samples());
    Ok(summary)
}

/// Produces deterministic frames without hardware
#[derive(Debug, Default)]
pub struct EmulatedAcquisition {
    params: Option<RunParams>,
    next_frame: usize,
}

impl AcquisitionBackend for EmulatedAcquisition {
    fn start_run(&mut self, params: &RunParams) -> Result<(), AcquisitionError> {
        self.params = Some(params.clone());
        self.next_frame = 0;
        Ok(())
    }

    fn read_acquisition(&mut self) -> Result<Acquisition, AcquisitionError> {
        let params = self.params.as_ref().ok_or(AcquisitionError::NotRunning)?;
        let mut data = Vec::with_capacity(params.samples_per_acq());
        for frame in self.next_frame..self.next_frame + params.frames_per_acq {
            // frame counter in the first sample, then a ramp
            data.push(frame as u16);
            data.extend((1..params.frame_length).map(|i| (i % 0x1000) as u16));
        }
        self.next_frame += params.frames_per_acq;
        Ok(Acquisition {
            valid_samples: data.len(),
            data,
        })
    }

    fn stop_run(&mut self) -> Result<(), AcquisitionError> {
        self.params.take().map(|_| ()).ok_or(AcquisitionError::NotRunning)
    }
}

/// Accepts runs and returns no samples
#[derive(Debug, Default)]
pub struct NullAcquisition {
    running: bool,
}

impl AcquisitionBackend for NullAcquisition {
    fn start_run(&mut self, _params: &RunParams) -> Result<(), AcquisitionError> {
        self.running = true;
        Ok(())
    }

    fn read_acquisition(&mut self) -> Result<Acquisition, AcquisitionError> {
        if !self.running {
            return Err(AcquisitionError::NotRunning);
        }
        Ok(Acquisition {
            valid_samples: 0,
            data: Vec::new(),
        })
    }

    fn stop_run(&mut self) -> Result<(), AcquisitionError> {
        self.running = false;
        Ok(())
    }
}
