//! Signal math shared by the measurement pipeline and the EQ engine
//!
//! Pure functions only: no I/O, no state. Array arguments that must line up
//! (frequencies vs. values) are checked with assertions, since a mismatch
//! here means a caller upstream broke an invariant.

/// Linear amplitude below which dB conversion is floored (-240 dB)
const LINEAR_FLOOR: f64 = 1e-12;

/// Convert decibels to linear amplitude (`10^(dB/20)`)
#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Convert linear amplitude to decibels (`20*log10(x)`), floored at -240 dB
#[inline]
pub fn linear_to_db(linear: f64) -> f64 {
    20.0 * linear.max(LINEAR_FLOOR).log10()
}

/// RMS level of a sample buffer (0.0 for an empty buffer)
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// RMS level of a sample buffer in dBFS
pub fn rms_dbfs(samples: &[f32]) -> f64 {
    linear_to_db(rms(samples))
}

/// Frequency bounds of an octave-fractional window centred on `center`
///
/// For fraction `N` the window is `[f / 2^(1/(2N)), f * 2^(1/(2N))]`,
/// i.e. `1/N` octave wide in total.
pub fn octave_window(center: f64, fraction: f64) -> (f64, f64) {
    assert!(fraction > 0.0, "octave fraction must be positive");
    let half_width = 2f64.powf(1.0 / (2.0 * fraction));
    (center / half_width, center * half_width)
}

/// Logarithmically spaced frequency grid from `start` to `end` inclusive
pub fn log_frequency_grid(start: f64, end: f64, points: usize) -> Vec<f64> {
    assert!(start > 0.0 && end > start, "grid bounds must satisfy 0 < start < end");
    assert!(points >= 2, "a grid needs at least two points");

    let log_start = start.ln();
    let log_end = end.ln();
    let step = (log_end - log_start) / (points - 1) as f64;
    (0..points)
        .map(|i| {
            if i == 0 {
                start
            } else if i == points - 1 {
                end
            } else {
                (log_start + step * i as f64).exp()
            }
        })
        .collect()
}

/// Linear interpolation on a log-frequency axis
///
/// `freqs` must be strictly increasing. Values outside the covered range
/// clamp to the first/last value.
pub fn interp_log_freq(freqs: &[f64], values: &[f64], at: f64) -> f64 {
    assert_eq!(freqs.len(), values.len(), "frequency/value length mismatch");
    assert!(!freqs.is_empty(), "cannot interpolate an empty curve");

    let last = freqs.len() - 1;
    if at <= freqs[0] {
        return values[0];
    }
    if at >= freqs[last] {
        return values[last];
    }

    let idx = freqs.partition_point(|&f| f < at);
    if freqs[idx] == at {
        return values[idx];
    }
    let (f0, f1) = (freqs[idx - 1], freqs[idx]);
    let (v0, v1) = (values[idx - 1], values[idx]);
    let t = (at.ln() - f0.ln()) / (f1.ln() - f0.ln());
    v0 + t * (v1 - v0)
}

/// Interpolate a curve onto several target frequencies
pub fn interp_log_freq_many(freqs: &[f64], values: &[f64], targets: &[f64]) -> Vec<f64> {
    targets
        .iter()
        .map(|&f| interp_log_freq(freqs, values, f))
        .collect()
}

/// Octave-fractional smoothing of a dB curve
///
/// For every target frequency `f`, averages (in dB) all input points whose
/// frequency lies in [`octave_window`]`(f, fraction)`. When the window holds
/// no input point (very narrow windows, sparse data) the curve is
/// interpolated at `f` instead, so the result converges to the input as the
/// fraction grows.
pub fn smooth_octave(freqs: &[f64], values: &[f64], targets: &[f64], fraction: f64) -> Vec<f64> {
    assert_eq!(freqs.len(), values.len(), "frequency/value length mismatch");
    assert!(!freqs.is_empty(), "cannot smooth an empty curve");

    // Prefix sums make every window mean O(1) after the two binary searches
    let mut prefix = Vec::with_capacity(values.len() + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for &v in values {
        acc += v;
        prefix.push(acc);
    }

    targets
        .iter()
        .map(|&f| {
            let (lo, hi) = octave_window(f, fraction);
            let start = freqs.partition_point(|&x| x < lo);
            let end = freqs.partition_point(|&x| x <= hi);
            if end > start {
                (prefix[end] - prefix[start]) / (end - start) as f64
            } else {
                interp_log_freq(freqs, values, f)
            }
        })
        .collect()
}

/// Smooth a curve onto its own frequency grid
pub fn smooth_curve(freqs: &[f64], values: &[f64], fraction: f64) -> Vec<f64> {
    smooth_octave(freqs, values, freqs, fraction)
}

/// Wrap a phase in degrees into [-180, 180)
#[inline]
pub fn wrap_phase_deg(phase: f64) -> f64 {
    (phase + 180.0).rem_euclid(360.0) - 180.0
}

/// Remove ±360° jumps between consecutive phase values
pub fn unwrap_phase_deg(phase: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(phase.len());
    let mut offset = 0.0;
    let mut prev: Option<f64> = None;

    for &p in phase {
        if let Some(prev_raw) = prev {
            let delta = p - prev_raw;
            if delta > 180.0 {
                offset -= 360.0 * ((delta + 180.0) / 360.0).floor();
            } else if delta < -180.0 {
                offset += 360.0 * ((-delta + 180.0) / 360.0).floor();
            }
        }
        out.push(p + offset);
        prev = Some(p);
    }
    out
}

/// Octave-fractional smoothing of a phase curve in degrees
///
/// The phase is unwrapped before averaging and re-wrapped afterwards so a
/// window straddling the ±180° boundary does not average to zero.
pub fn smooth_phase_octave(
    freqs: &[f64],
    phase_deg: &[f64],
    targets: &[f64],
    fraction: f64,
) -> Vec<f64> {
    let unwrapped = unwrap_phase_deg(phase_deg);
    smooth_octave(freqs, &unwrapped, targets, fraction)
        .into_iter()
        .map(wrap_phase_deg)
        .collect()
}
