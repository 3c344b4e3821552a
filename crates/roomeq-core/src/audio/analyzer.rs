//! Transfer-function analysis of a captured stimulus
//!
//! Given the stimulus that was played and the buffer that was recorded, the
//! analyzer:
//! 1. Rejects silent captures (RMS below [`SILENCE_GATE_DBFS`])
//! 2. Estimates the round-trip lag by FFT cross-correlation
//! 3. Aligns the recording, applies a Hann window to both buffers
//! 4. Computes H(f) = Rec(f) / Ref(f) and the cross-spectrum phase
//!
//! Bins where the stimulus carries no energy (more than
//! [`EXCLUSION_FLOOR_DB`] below its spectral peak) are dropped, so the raw
//! response only contains frequencies that were actually excited.

use crate::error::{Error, Result};
use crate::math::{linear_to_db, rms_dbfs};
use rustfft::{num_complex::Complex, FftPlanner};

/// Captures quieter than this are treated as silence
pub const SILENCE_GATE_DBFS: f64 = -90.0;

/// Reference bins this far below the reference peak are excluded
pub const EXCLUSION_FLOOR_DB: f64 = -80.0;

/// Longest round-trip latency searched for
const MAX_LAG_SECS: f64 = 0.5;

/// Unsmoothed response on the FFT bin grid
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    /// Bin frequencies in Hz (strictly increasing)
    pub frequencies: Vec<f64>,
    /// |H(f)| in dB
    pub magnitude_db: Vec<f64>,
    /// arg H(f) in degrees, wrapped to [-180, 180]
    pub phase_deg: Vec<f64>,
    /// Estimated round-trip latency removed before analysis
    pub lag_samples: usize,
}

impl RawResponse {
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    pub fn lag_ms(&self, sample_rate: u32) -> f64 {
        self.lag_samples as f64 / sample_rate as f64 * 1000.0
    }
}

/// FFT-based response analyzer
pub struct ResponseAnalyzer {
    sample_rate: u32,
    planner: FftPlanner<f64>,
}

impl ResponseAnalyzer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            planner: FftPlanner::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Lag (in samples) at which `recorded` best matches `reference`
    pub fn estimate_lag(&mut self, reference: &[f32], recorded: &[f32]) -> usize {
        if reference.is_empty() || recorded.is_empty() {
            return 0;
        }
        let fft_size = (reference.len() + recorded.len()).next_power_of_two();

        let mut rec = to_complex(recorded, fft_size);
        let mut refc = to_complex(reference, fft_size);
        let fft = self.planner.plan_fft_forward(fft_size);
        fft.process(&mut rec);
        fft.process(&mut refc);

        // Multiply with conjugate of reference for correlation
        for (r, c) in rec.iter_mut().zip(&refc) {
            *r *= c.conj();
        }
        let ifft = self.planner.plan_fft_inverse(fft_size);
        ifft.process(&mut rec);

        let max_lag = ((MAX_LAG_SECS * self.sample_rate as f64) as usize)
            .min(recorded.len().saturating_sub(1));

        let mut best = 0;
        let mut best_val = f64::MIN;
        for (lag, c) in rec.iter().take(max_lag + 1).enumerate() {
            let v = c.re.abs();
            if v > best_val {
                best_val = v;
                best = lag;
            }
        }
        best
    }

    /// Compute the raw transfer function of the measured system
    pub fn analyze(&mut self, reference: &[f32], recorded: &[f32]) -> Result<RawResponse> {
        if reference.is_empty() {
            return Err(Error::AnalysisFailed("empty stimulus".to_string()));
        }
        let level = rms_dbfs(recorded);
        if recorded.is_empty() || level < SILENCE_GATE_DBFS {
            return Err(Error::AnalysisFailed(format!(
                "captured signal too quiet ({level:.1} dBFS); check input routing and gain"
            )));
        }
        if rms_dbfs(reference) < SILENCE_GATE_DBFS {
            return Err(Error::AnalysisFailed("stimulus is silent".to_string()));
        }

        let lag = self.estimate_lag(reference, recorded);
        tracing::debug!(lag_samples = lag, level_dbfs = level, "Aligned capture");

        let n = reference.len();
        let aligned: Vec<f32> = recorded
            .iter()
            .skip(lag)
            .copied()
            .chain(std::iter::repeat(0.0))
            .take(n)
            .collect();

        let fft_size = n.next_power_of_two();
        let window = hann(n);
        let mut ref_spec = windowed_complex(reference, &window, fft_size);
        let mut rec_spec = windowed_complex(&aligned, &window, fft_size);
        let fft = self.planner.plan_fft_forward(fft_size);
        fft.process(&mut ref_spec);
        fft.process(&mut rec_spec);

        let half = fft_size / 2;
        let ref_peak = ref_spec[1..half]
            .iter()
            .map(|c| c.norm())
            .fold(0.0f64, f64::max);
        let floor = ref_peak * 10f64.powf(EXCLUSION_FLOOR_DB / 20.0);
        let bin_hz = self.sample_rate as f64 / fft_size as f64;

        let mut out = RawResponse {
            lag_samples: lag,
            ..Default::default()
        };
        for k in 1..half {
            let r = ref_spec[k];
            let r_mag = r.norm();
            if r_mag <= floor || r_mag == 0.0 {
                continue;
            }
            let y = rec_spec[k];
            let cross = y * r.conj();
            out.frequencies.push(k as f64 * bin_hz);
            out.magnitude_db.push(linear_to_db(y.norm() / r_mag));
            out.phase_deg.push(cross.arg().to_degrees());
        }

        if out.is_empty() {
            return Err(Error::AnalysisFailed(
                "stimulus has no usable spectral content".to_string(),
            ));
        }
        Ok(out)
    }
}

fn to_complex(samples: &[f32], size: usize) -> Vec<Complex<f64>> {
    samples
        .iter()
        .map(|&x| Complex::new(x as f64, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(size)
        .collect()
}

fn windowed_complex(samples: &[f32], window: &[f64], size: usize) -> Vec<Complex<f64>> {
    samples
        .iter()
        .zip(window)
        .map(|(&x, &w)| Complex::new(x as f64 * w, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(size)
        .collect()
}

/// Periodic Hann window of length `n`
fn hann(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / n as f64).cos())
        .collect()
}
