//! Parametric filters and the ordered filter chain
//!
//! A [`FilterParam`] is the serializable description of one band. The engine
//! turns a list of them into a [`FilterChain`]: one [`FilterNode`] per band,
//! each holding a biquad state per audio channel. Chains are immutable once
//! built; changing the EQ means building a new chain and swapping it in.

use crate::error::{Error, Result};
use crate::math::linear_to_db;
use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Highest Q accepted for any band
pub const MAX_Q: f64 = 100.0;

/// Largest boost/cut accepted for any band, in dB
pub const MAX_GAIN_DB: f64 = 30.0;

/// Filter response shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    #[default]
    Peaking,
    LowShelf,
    HighShelf,
    LowPass,
    HighPass,
}

impl FilterKind {
    /// Whether the gain parameter affects this kind
    pub fn uses_gain(self) -> bool {
        matches!(self, Self::Peaking | Self::LowShelf | Self::HighShelf)
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Peaking => "peaking",
            Self::LowShelf => "lowshelf",
            Self::HighShelf => "highshelf",
            Self::LowPass => "lowpass",
            Self::HighPass => "highpass",
        };
        f.write_str(name)
    }
}

impl FromStr for FilterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "peaking" | "peak" | "pk" | "bell" => Ok(Self::Peaking),
            "lowshelf" | "ls" => Ok(Self::LowShelf),
            "highshelf" | "hs" => Ok(Self::HighShelf),
            "lowpass" | "lp" => Ok(Self::LowPass),
            "highpass" | "hp" => Ok(Self::HighPass),
            other => Err(Error::InvalidFilter(format!("unknown filter kind '{other}'"))),
        }
    }
}

/// One parametric EQ band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterParam {
    /// Center/corner frequency in Hz
    pub frequency: f64,
    /// Quality factor
    pub q: f64,
    /// Gain in dB (ignored by low/high-pass)
    pub gain: f64,
    #[serde(default)]
    pub kind: FilterKind,
}

impl FilterParam {
    /// Peaking band
    pub fn peaking(frequency: f64, q: f64, gain: f64) -> Self {
        Self {
            frequency,
            q,
            gain,
            kind: FilterKind::Peaking,
        }
    }

    /// Check the band can be realised at `sample_rate`
    pub fn validate(&self, sample_rate: u32) -> Result<()> {
        let nyquist = sample_rate as f64 / 2.0;
        if !self.frequency.is_finite() || self.frequency <= 0.0 || self.frequency >= nyquist {
            return Err(Error::InvalidFilter(format!(
                "frequency {} Hz must be between 0 and {} Hz",
                self.frequency, nyquist
            )));
        }
        if !self.q.is_finite() || self.q <= 0.0 || self.q > MAX_Q {
            return Err(Error::InvalidFilter(format!(
                "Q {} must be in (0, {}]",
                self.q, MAX_Q
            )));
        }
        if !self.gain.is_finite() || self.gain.abs() > MAX_GAIN_DB {
            return Err(Error::InvalidFilter(format!(
                "gain {} dB exceeds ±{} dB",
                self.gain, MAX_GAIN_DB
            )));
        }
        Ok(())
    }

    /// Biquad coefficients for this band at `sample_rate`
    pub fn coefficients(&self, sample_rate: u32) -> Result<Coefficients<f32>> {
        self.validate(sample_rate)?;

        let fs = (sample_rate as f32).hz();
        let f0 = (self.frequency as f32).hz();
        let q = self.q as f32;
        let gain = self.gain as f32;
        let kind = match self.kind {
            FilterKind::Peaking => Type::PeakingEQ(gain),
            FilterKind::LowShelf => Type::LowShelf(gain),
            FilterKind::HighShelf => Type::HighShelf(gain),
            FilterKind::LowPass => Type::LowPass,
            FilterKind::HighPass => Type::HighPass,
        };

        Coefficients::<f32>::from_params(kind, fs, f0, q).map_err(|e| {
            Error::InvalidFilter(format!(
                "cannot design {} at {} Hz: {:?}",
                self.kind, self.frequency, e
            ))
        })
    }

    /// Magnitude response of this band at `frequency`, in dB
    pub fn response_db(&self, frequency: f64, sample_rate: u32) -> Result<f64> {
        let coeffs = self.coefficients(sample_rate)?;
        Ok(magnitude_db(&coeffs, frequency, sample_rate))
    }
}

impl fmt::Display for FilterParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.1} Hz Q={:.2} {:+.1} dB",
            self.kind, self.frequency, self.q, self.gain
        )
    }
}

/// Parses `frequency,q,gain[,kind]`
impl FromStr for FilterParam {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if !(3..=4).contains(&parts.len()) {
            return Err(Error::InvalidFilter(format!(
                "expected 'frequency,q,gain[,kind]', got '{s}'"
            )));
        }
        let number = |field: &str, raw: &str| -> Result<f64> {
            raw.parse::<f64>()
                .map_err(|_| Error::InvalidFilter(format!("invalid {field} '{raw}'")))
        };
        let kind = match parts.get(3) {
            Some(k) => k.parse()?,
            None => FilterKind::Peaking,
        };
        Ok(Self {
            frequency: number("frequency", parts[0])?,
            q: number("q", parts[1])?,
            gain: number("gain", parts[2])?,
            kind,
        })
    }
}

/// |H(e^jw)| of one biquad, in dB
fn magnitude_db(c: &Coefficients<f32>, frequency: f64, sample_rate: u32) -> f64 {
    let w = 2.0 * PI * frequency / sample_rate as f64;
    let z1 = Complex::new(w.cos(), -w.sin());
    let z2 = z1 * z1;
    let num = Complex::new(c.b0 as f64, 0.0) + z1 * c.b1 as f64 + z2 * c.b2 as f64;
    let den = Complex::new(1.0, 0.0) + z1 * c.a1 as f64 + z2 * c.a2 as f64;
    linear_to_db((num / den).norm())
}

/// Combined magnitude response of a filter set, in dB per frequency
pub fn chain_response_db(
    filters: &[FilterParam],
    frequencies: &[f64],
    sample_rate: u32,
) -> Result<Vec<f64>> {
    let coeffs = filters
        .iter()
        .map(|f| f.coefficients(sample_rate))
        .collect::<Result<Vec<_>>>()?;

    Ok(frequencies
        .iter()
        .map(|&freq| {
            coeffs
                .iter()
                .map(|c| magnitude_db(c, freq, sample_rate))
                .sum()
        })
        .collect())
}

/// One band instantiated for a fixed channel count
pub struct FilterNode {
    param: FilterParam,
    states: Vec<DirectForm2Transposed<f32>>,
}

impl FilterNode {
    pub fn new(param: FilterParam, sample_rate: u32, channels: usize) -> Result<Self> {
        let coeffs = param.coefficients(sample_rate)?;
        Ok(Self {
            param,
            states: (0..channels)
                .map(|_| DirectForm2Transposed::<f32>::new(coeffs))
                .collect(),
        })
    }

    pub fn param(&self) -> &FilterParam {
        &self.param
    }

    /// Filter one interleaved frame in place
    #[inline]
    fn process_frame(&mut self, frame: &mut [f32]) {
        for (sample, state) in frame.iter_mut().zip(self.states.iter_mut()) {
            *sample = state.run(*sample);
        }
    }
}

/// Ordered, owned list of filter nodes applied in series
#[derive(Default)]
pub struct FilterChain {
    nodes: Vec<FilterNode>,
}

impl FilterChain {
    /// Chain that passes audio through unchanged
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a chain from parameters, validating every band
    pub fn build(params: &[FilterParam], sample_rate: u32, channels: usize) -> Result<Self> {
        let nodes = params
            .iter()
            .map(|p| FilterNode::new(*p, sample_rate, channels))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { nodes })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Parameters of the active bands, in processing order
    pub fn params(&self) -> Vec<FilterParam> {
        self.nodes.iter().map(|n| *n.param()).collect()
    }

    /// Run one interleaved frame through every node
    #[inline]
    pub fn process_frame(&mut self, frame: &mut [f32]) {
        for node in &mut self.nodes {
            node.process_frame(frame);
        }
    }

    /// Run an interleaved buffer through the chain
    pub fn process_interleaved(&mut self, buffer: &mut [f32], channels: usize) {
        if self.nodes.is_empty() || channels == 0 {
            return;
        }
        for frame in buffer.chunks_mut(channels) {
            self.process_frame(frame);
        }
    }
}
