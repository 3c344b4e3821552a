//! Measurement stimulus generation
//!
//! Produces the known test signal played during a measurement:
//! - Logarithmic sine sweep (default)
//! - White noise
//! - Pink noise (-3 dB/octave)
//! - Maximum length sequence (MLS)
//!
//! Every stimulus is faded in/out with a raised cosine and followed by a
//! silence tail so the capture also covers the device round-trip latency.
//! Noise stimuli are seeded and therefore reproducible.

use crate::math::db_to_linear;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Base peak amplitude (-6 dBFS to leave headroom)
pub const BASE_AMPLITUDE: f32 = 0.5;

/// Default silence appended after the stimulus
pub const DEFAULT_TAIL_SECS: f64 = 0.25;

/// Longest fade applied at each end of the stimulus
const MAX_FADE_SECS: f64 = 0.01;

/// Order of the MLS used as stimulus (32767 samples per period)
const MLS_ORDER: u32 = 15;

/// Kind of measurement stimulus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    #[default]
    LogSweep,
    WhiteNoise,
    PinkNoise,
    Mls,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LogSweep => "log_sweep",
            Self::WhiteNoise => "white_noise",
            Self::PinkNoise => "pink_noise",
            Self::Mls => "mls",
        };
        f.write_str(name)
    }
}

impl FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sweep" | "log_sweep" | "logsweep" => Ok(Self::LogSweep),
            "white" | "white_noise" => Ok(Self::WhiteNoise),
            "pink" | "pink_noise" => Ok(Self::PinkNoise),
            "mls" => Ok(Self::Mls),
            other => Err(format!("unknown signal type '{other}'")),
        }
    }
}

/// Stimulus generator for one sample rate
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    sample_rate: u32,
    amplitude: f32,
    seed: u64,
    tail_secs: f64,
}

impl SignalGenerator {
    /// Create a generator at unity output gain
    ///
    /// # Example
    /// ```
    /// use roomeq_core::audio::signal::{SignalGenerator, SignalType};
    ///
    /// let gen = SignalGenerator::new(48000);
    /// let sweep = gen.generate(SignalType::LogSweep, 1.0);
    /// assert_eq!(sweep.len(), 48000 + 12000);
    /// ```
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            amplitude: BASE_AMPLITUDE,
            seed: 0x5EED,
            tail_secs: DEFAULT_TAIL_SECS,
        }
    }

    /// Scale the stimulus by an output gain in dB (peak clamped to full scale)
    pub fn with_output_gain_db(mut self, gain_db: f64) -> Self {
        self.amplitude = (BASE_AMPLITUDE as f64 * db_to_linear(gain_db)).min(1.0) as f32;
        self
    }

    /// Seed for the noise stimuli
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Length of the silence appended after the stimulus
    pub fn with_tail_secs(mut self, tail_secs: f64) -> Self {
        self.tail_secs = tail_secs.max(0.0);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    pub fn tail_secs(&self) -> f64 {
        self.tail_secs
    }

    /// Frequency span covered by the sweep
    pub fn sweep_range(&self) -> (f64, f64) {
        let top = (0.45 * self.sample_rate as f64).min(crate::MAX_FREQUENCY_HZ);
        (crate::MIN_FREQUENCY_HZ, top)
    }

    /// Number of stimulus samples (excluding the tail) for `duration_secs`
    pub fn stimulus_len(&self, duration_secs: f64) -> usize {
        (duration_secs.max(0.0) * self.sample_rate as f64).round() as usize
    }

    /// Number of silent tail samples
    pub fn tail_len(&self) -> usize {
        (self.tail_secs * self.sample_rate as f64).round() as usize
    }

    /// Generate the stimulus followed by the silence tail
    pub fn generate(&self, signal: SignalType, duration_secs: f64) -> Vec<f32> {
        let n = self.stimulus_len(duration_secs);
        let mut samples = match signal {
            SignalType::LogSweep => self.log_sweep(n),
            SignalType::WhiteNoise => self.white_noise(n),
            SignalType::PinkNoise => normalize_peak(pink_filter(self.white_noise(n))),
            SignalType::Mls => mls_fill(n),
        };

        for s in &mut samples {
            *s *= self.amplitude;
        }
        self.apply_fades(&mut samples);
        samples.resize(n + self.tail_len(), 0.0);
        samples
    }

    /// Unit-amplitude exponential sine sweep
    fn log_sweep(&self, n: usize) -> Vec<f32> {
        if n == 0 {
            return Vec::new();
        }
        let (f0, f1) = self.sweep_range();
        let fs = self.sample_rate as f64;
        let duration = n as f64 / fs;
        let k = (f1 / f0).ln() / duration;
        let coefficient = 2.0 * PI * f0 / k;

        (0..n)
            .map(|i| {
                let t = i as f64 / fs;
                (coefficient * ((k * t).exp() - 1.0)).sin() as f32
            })
            .collect()
    }

    /// Uniform white noise in [-1, 1]
    fn white_noise(&self, n: usize) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        (0..n).map(|_| rng.gen_range(-1.0f32..=1.0)).collect()
    }

    /// Raised-cosine fade in and out
    fn apply_fades(&self, samples: &mut [f32]) {
        let fade = ((MAX_FADE_SECS * self.sample_rate as f64) as usize).min(samples.len() / 4);
        if fade == 0 {
            return;
        }
        let len = samples.len();
        for i in 0..fade {
            let w = (0.5 - 0.5 * (PI * i as f64 / fade as f64).cos()) as f32;
            samples[i] *= w;
            samples[len - 1 - i] *= w;
        }
    }
}

/// Paul Kellett's refined pink noise filter
fn pink_filter(white: Vec<f32>) -> Vec<f32> {
    let (mut b0, mut b1, mut b2, mut b3, mut b4, mut b5, mut b6) =
        (0.0f32, 0.0f32, 0.0f32, 0.0f32, 0.0f32, 0.0f32, 0.0f32);
    white
        .into_iter()
        .map(|w| {
            b0 = 0.99886 * b0 + w * 0.0555179;
            b1 = 0.99332 * b1 + w * 0.0750759;
            b2 = 0.96900 * b2 + w * 0.1538520;
            b3 = 0.86650 * b3 + w * 0.3104856;
            b4 = 0.55000 * b4 + w * 0.5329522;
            b5 = -0.7616 * b5 - w * 0.0168980;
            let pink = b0 + b1 + b2 + b3 + b4 + b5 + b6 + w * 0.5362;
            b6 = w * 0.115926;
            pink
        })
        .collect()
}

fn normalize_peak(mut samples: Vec<f32>) -> Vec<f32> {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak > 0.0 {
        for s in &mut samples {
            *s /= peak;
        }
    }
    samples
}

/// One period of a bipolar MLS generated with a Galois LFSR
pub fn mls_sequence(order: u32) -> Vec<f32> {
    assert!((2..=15).contains(&order), "Order must be between 2 and 15");

    // Primitive polynomial tap masks (Xilinx XAPP052)
    let mask: u32 = match order {
        2 => 0x3,
        3 => 0x6,
        4 => 0xC,
        5 => 0x14,
        6 => 0x30,
        7 => 0x60,
        8 => 0xB8,
        9 => 0x110,
        10 => 0x240,
        11 => 0x500,
        12 => 0xE08,
        13 => 0x1C80,
        14 => 0x3802,
        _ => 0x6000,
    };

    let length = (1usize << order) - 1;
    let mut lfsr: u32 = 1;
    let mut sequence = Vec::with_capacity(length);
    for _ in 0..length {
        let bit = lfsr & 1;
        sequence.push(if bit == 1 { 1.0 } else { -1.0 });
        lfsr >>= 1;
        if bit == 1 {
            lfsr ^= mask;
        }
    }
    sequence
}

/// `n` samples of the stimulus MLS, repeating the period as needed
fn mls_fill(n: usize) -> Vec<f32> {
    let period = mls_sequence(MLS_ORDER);
    period.iter().copied().cycle().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variance(x: &[f32]) -> f64 {
        let mean = x.iter().map(|&v| v as f64).sum::<f64>() / x.len() as f64;
        x.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / x.len() as f64
    }

    #[test]
    fn test_length_includes_tail() {
        let gen = SignalGenerator::new(48000);
        for signal in [
            SignalType::LogSweep,
            SignalType::WhiteNoise,
            SignalType::PinkNoise,
            SignalType::Mls,
        ] {
            let s = gen.generate(signal, 0.5);
            assert_eq!(s.len(), 24000 + 12000, "{signal}");
            assert!(s[24000..].iter().all(|&v| v == 0.0), "{signal} tail not silent");
        }
    }

    #[test]
    fn test_peak_respects_amplitude() {
        let gen = SignalGenerator::new(48000).with_output_gain_db(-6.0);
        let expected = BASE_AMPLITUDE * 10f32.powf(-6.0 / 20.0);
        assert!((gen.amplitude() - expected).abs() < 1e-6);
        for signal in [SignalType::LogSweep, SignalType::PinkNoise, SignalType::Mls] {
            let peak = gen
                .generate(signal, 0.2)
                .iter()
                .fold(0.0f32, |m, s| m.max(s.abs()));
            assert!(peak <= expected + 1e-6, "{signal}: {peak}");
            assert!(peak > expected * 0.5, "{signal}: {peak}");
        }
    }

    #[test]
    fn test_gain_clamps_to_full_scale() {
        let gen = SignalGenerator::new(48000).with_output_gain_db(20.0);
        assert_eq!(gen.amplitude(), 1.0);
    }

    #[test]
    fn test_fades_start_and_end_quiet() {
        let s = SignalGenerator::new(48000)
            .with_tail_secs(0.0)
            .generate(SignalType::WhiteNoise, 0.1);
        assert_eq!(s[0], 0.0);
        assert!(s[s.len() - 1].abs() < 0.01);
    }

    #[test]
    fn test_noise_is_reproducible_per_seed() {
        let a = SignalGenerator::new(48000).with_seed(7).generate(SignalType::WhiteNoise, 0.05);
        let b = SignalGenerator::new(48000).with_seed(7).generate(SignalType::WhiteNoise, 0.05);
        let c = SignalGenerator::new(48000).with_seed(8).generate(SignalType::WhiteNoise, 0.05);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_pink_has_less_high_frequency_energy_than_white() {
        let gen = SignalGenerator::new(48000).with_tail_secs(0.0);
        let ratio = |x: Vec<f32>| {
            let diff: Vec<f32> = x.windows(2).map(|w| w[1] - w[0]).collect();
            variance(&diff) / variance(&x)
        };
        let white = ratio(gen.generate(SignalType::WhiteNoise, 1.0));
        let pink = ratio(gen.generate(SignalType::PinkNoise, 1.0));
        // White noise differences carry twice the variance; pink far less
        assert!(white > 1.8, "white {white}");
        assert!(pink < white / 2.0, "pink {pink} white {white}");
    }

    #[test]
    fn test_sweep_range_tracks_nyquist() {
        assert_eq!(SignalGenerator::new(48000).sweep_range(), (20.0, 20000.0));
        let (_, top) = SignalGenerator::new(32000).sweep_range();
        assert!((top - 14400.0).abs() < 1e-9);
    }

    #[test]
    fn test_mls_period_and_balance() {
        let seq = mls_sequence(10);
        assert_eq!(seq.len(), 1023);
        assert!(seq.iter().all(|&s| s == 1.0 || s == -1.0));
        // A maximal-length sequence has one more +1 than -1
        let sum: f32 = seq.iter().sum();
        assert_eq!(sum, 1.0);
    }

    #[test]
    #[should_panic]
    fn test_mls_order_too_high() {
        mls_sequence(16);
    }

    #[test]
    fn test_signal_type_parse() {
        assert_eq!("sweep".parse::<SignalType>().unwrap(), SignalType::LogSweep);
        assert_eq!("PINK".parse::<SignalType>().unwrap(), SignalType::PinkNoise);
        assert!("chirp".parse::<SignalType>().is_err());
    }
}
