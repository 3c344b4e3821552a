//! Measurement parameters and the persisted measurement record

use crate::audio::signal::SignalType;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Inputs of one measurement; never changed once a measurement starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureParameters {
    /// Input device name (`None` = system default)
    pub input_device: Option<String>,
    /// Output device name (`None` = system default)
    pub output_device: Option<String>,
    /// Logical output channel the stimulus is played on
    pub output_channel: usize,
    pub signal_type: SignalType,
    /// Stimulus duration in seconds
    pub duration: f64,
    pub sample_rate: u32,
    /// Gain applied to the captured signal, in dB
    pub input_gain: f64,
    /// Gain applied to the stimulus, in dB
    pub output_gain: f64,
}

impl Default for CaptureParameters {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            output_channel: 0,
            signal_type: SignalType::LogSweep,
            duration: 10.0,
            sample_rate: crate::DEFAULT_SAMPLE_RATE,
            input_gain: 0.0,
            output_gain: 0.0,
        }
    }
}

impl CaptureParameters {
    /// Reject values no measurement could run with
    pub fn validate(&self) -> Result<()> {
        if !(8000..=384000).contains(&self.sample_rate) {
            return Err(Error::InvalidParameters(format!(
                "unsupported sample rate {}",
                self.sample_rate
            )));
        }
        if !self.duration.is_finite() || self.duration <= 0.0 || self.duration > 120.0 {
            return Err(Error::InvalidParameters(format!(
                "duration {} s outside (0, 120]",
                self.duration
            )));
        }
        Ok(())
    }
}

/// How the raw response is reduced to the stored curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Smoothing octave fraction `N` (1/N octave)
    pub octave_fraction: f64,
    /// Number of log-spaced output points
    pub resolution: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            octave_fraction: crate::DEFAULT_OCTAVE_FRACTION,
            resolution: 200,
        }
    }
}

impl AnalysisSettings {
    /// Fewest points a log grid can have (both band edges)
    pub const MIN_RESOLUTION: usize = 2;

    pub fn validate(&self) -> Result<()> {
        if self.resolution < Self::MIN_RESOLUTION {
            return Err(Error::InvalidParameters(format!(
                "resolution {} below {} points",
                self.resolution,
                Self::MIN_RESOLUTION
            )));
        }
        if !self.octave_fraction.is_finite() || self.octave_fraction <= 0.0 {
            return Err(Error::InvalidParameters(format!(
                "octave fraction {} must be positive",
                self.octave_fraction
            )));
        }
        Ok(())
    }
}

/// Analyzed result of one measurement
///
/// All curve arrays have the length of `frequencies`; phase arrays are
/// present together or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub device_name: String,
    pub signal_type: SignalType,
    pub duration: f64,
    pub sample_rate: u32,
    pub output_channel: usize,
    pub frequencies: Vec<f64>,
    pub raw_magnitude: Vec<f64>,
    pub smoothed_magnitude: Vec<f64>,
    #[serde(default)]
    pub raw_phase: Option<Vec<f64>>,
    #[serde(default)]
    pub smoothed_phase: Option<Vec<f64>>,
}

/// Curve arrays of a record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Curves {
    pub frequencies: Vec<f64>,
    pub raw_magnitude: Vec<f64>,
    pub smoothed_magnitude: Vec<f64>,
    pub raw_phase: Option<Vec<f64>>,
    pub smoothed_phase: Option<Vec<f64>>,
}

impl CaptureRecord {
    /// Build an unsaved record (empty id) stamped now
    ///
    /// # Panics
    /// Panics if the curve arrays differ in length.
    pub fn new(name: impl Into<String>, params: &CaptureParameters, device_name: &str, curves: Curves) -> Self {
        let record = Self {
            id: String::new(),
            name: name.into(),
            timestamp: Utc::now(),
            device_name: device_name.to_string(),
            signal_type: params.signal_type,
            duration: params.duration,
            sample_rate: params.sample_rate,
            output_channel: params.output_channel,
            frequencies: curves.frequencies,
            raw_magnitude: curves.raw_magnitude,
            smoothed_magnitude: curves.smoothed_magnitude,
            raw_phase: curves.raw_phase,
            smoothed_phase: curves.smoothed_phase,
        };
        assert!(
            record.check_lengths().is_ok(),
            "capture record curves must share one length"
        );
        record
    }

    /// Number of frequency points
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    pub fn has_phase(&self) -> bool {
        self.raw_phase.is_some() && self.smoothed_phase.is_some()
    }

    /// Verify the array-length invariant (used on deserialized data)
    pub fn check_lengths(&self) -> Result<()> {
        let n = self.frequencies.len();
        let phase_ok = match (&self.raw_phase, &self.smoothed_phase) {
            (Some(r), Some(s)) => r.len() == n && s.len() == n,
            (None, None) => true,
            _ => false,
        };
        if self.raw_magnitude.len() != n || self.smoothed_magnitude.len() != n || !phase_ok {
            return Err(Error::AnalysisFailed(format!(
                "record '{}' has mismatched curve lengths",
                self.name
            )));
        }
        if self.frequencies.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::AnalysisFailed(format!(
                "record '{}' frequencies are not strictly increasing",
                self.name
            )));
        }
        Ok(())
    }

    /// Write the curves as CSV
    pub fn write_csv<W: Write>(&self, mut out: W) -> Result<()> {
        if self.has_phase() {
            writeln!(out, "frequency_hz,raw_db,smoothed_db,raw_phase_deg,smoothed_phase_deg")?;
        } else {
            writeln!(out, "frequency_hz,raw_db,smoothed_db")?;
        }
        for i in 0..self.len() {
            write!(
                out,
                "{:.3},{:.3},{:.3}",
                self.frequencies[i], self.raw_magnitude[i], self.smoothed_magnitude[i]
            )?;
            if let (Some(rp), Some(sp)) = (&self.raw_phase, &self.smoothed_phase) {
                write!(out, ",{:.2},{:.2}", rp[i], sp[i])?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}
