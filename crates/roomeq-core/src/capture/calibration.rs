//! Microphone/measurement-chain calibration curves
//!
//! File format: one `frequency magnitude_db` pair per line, separated by
//! commas, tabs or spaces. Blank lines, `#` comments and lines whose first
//! token is not a number (headers) are skipped.

use crate::error::{Error, Result};
use crate::math::interp_log_freq;
use std::path::Path;

/// Correction curve subtracted from measurements
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationCurve {
    frequencies: Vec<f64>,
    magnitudes: Vec<f64>,
}

impl CalibrationCurve {
    /// Build from points; sorts by frequency and drops duplicate frequencies
    pub fn from_points(mut points: Vec<(f64, f64)>) -> Result<Self> {
        points.retain(|(f, m)| f.is_finite() && m.is_finite() && *f > 0.0);
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        points.dedup_by(|b, a| a.0 == b.0);

        if points.len() < 2 {
            return Err(Error::Calibration(format!(
                "need at least 2 points, found {}",
                points.len()
            )));
        }
        let (frequencies, magnitudes) = points.into_iter().unzip();
        Ok(Self {
            frequencies,
            magnitudes,
        })
    }

    /// Parse calibration text
    pub fn parse(text: &str) -> Result<Self> {
        let mut points = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line
                .split(|c: char| c == ',' || c == '\t' || c == ' ' || c == ';')
                .filter(|t| !t.is_empty());

            let Some(freq) = tokens.next().and_then(|t| t.parse::<f64>().ok()) else {
                tracing::debug!(line = line_no + 1, "Skipping calibration header line");
                continue;
            };
            let mag = tokens
                .next()
                .and_then(|t| t.parse::<f64>().ok())
                .ok_or_else(|| {
                    Error::Calibration(format!("line {}: missing magnitude", line_no + 1))
                })?;
            points.push((freq, mag));
        }
        Self::from_points(points)
    }

    /// Load and parse a calibration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let curve = Self::parse(&text)?;
        tracing::info!(
            path = %path.display(),
            points = curve.len(),
            "Calibration loaded"
        );
        Ok(curve)
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn magnitudes(&self) -> &[f64] {
        &self.magnitudes
    }

    /// Correction in dB at `frequency` (clamped outside the covered range)
    pub fn correction_at(&self, frequency: f64) -> f64 {
        interp_log_freq(&self.frequencies, &self.magnitudes, frequency)
    }

    /// Subtract the curve from a magnitude array on `grid`
    ///
    /// # Panics
    /// Panics if `grid` and `magnitudes` differ in length.
    pub fn apply(&self, grid: &[f64], magnitudes: &mut [f64]) {
        assert_eq!(grid.len(), magnitudes.len(), "grid/magnitude length mismatch");
        for (m, &f) in magnitudes.iter_mut().zip(grid) {
            *m -= self.correction_at(f);
        }
    }
}
