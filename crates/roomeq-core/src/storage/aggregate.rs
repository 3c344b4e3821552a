//! "Sum of all" and "average of all" views over stored records

use crate::capture::params::CaptureRecord;
use crate::math::{db_to_linear, linear_to_db};
use serde::{Deserialize, Serialize};

/// How records are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateMode {
    /// Linear amplitude sum, reported in dB
    Sum,
    /// Arithmetic mean of the dB values
    Average,
}

impl std::fmt::Display for AggregateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sum => write!(f, "Sum of all"),
            Self::Average => write!(f, "Average of all"),
        }
    }
}

/// Derived record; never stored
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateView {
    pub mode: AggregateMode,
    pub record: CaptureRecord,
    /// Ids of the records that contributed
    pub included: Vec<String>,
    /// Records left out because their grid length differs from the first
    pub skipped: usize,
    /// Included records whose grid spans other band edges than the first
    pub edge_mismatches: usize,
}

fn band_edges(r: &CaptureRecord) -> (Option<f64>, Option<f64>) {
    (r.frequencies.first().copied(), r.frequencies.last().copied())
}

/// Combine the smoothed curves of `records`
///
/// The first record fixes the frequency grid; records with another grid
/// length are skipped and counted. Records of equal length whose grid spans
/// other band edges are still combined bin by bin, but counted and logged.
/// Raw magnitudes are combined the same way; phase is dropped. Returns
/// `None` for an empty input.
pub fn aggregate(records: &[CaptureRecord], mode: AggregateMode) -> Option<AggregateView> {
    let first = records.first()?;
    let n = first.len();

    let (usable, rejected): (Vec<&CaptureRecord>, Vec<&CaptureRecord>) =
        records.iter().partition(|r| r.len() == n);
    for r in &rejected {
        tracing::warn!(
            id = %r.id,
            points = r.len(),
            expected = n,
            "Record grid differs, skipped from aggregate"
        );
    }

    let expected = band_edges(first);
    let mut edge_mismatches = 0;
    for &r in &usable {
        let found = band_edges(r);
        if found == expected {
            continue;
        }
        edge_mismatches += 1;
        tracing::warn!(
            id = %r.id,
            edges = ?found,
            expected = ?expected,
            "Record grid spans other frequencies, combined bin by bin"
        );
    }

    let combine = |pick: fn(&CaptureRecord) -> &[f64]| -> Vec<f64> {
        (0..n)
            .map(|i| match mode {
                AggregateMode::Sum => {
                    linear_to_db(usable.iter().map(|r| db_to_linear(pick(r)[i])).sum())
                }
                AggregateMode::Average => {
                    usable.iter().map(|r| pick(r)[i]).sum::<f64>() / usable.len() as f64
                }
            })
            .collect()
    };

    let mut record = first.clone();
    record.id = String::new();
    record.name = mode.to_string();
    record.raw_magnitude = combine(|r| r.raw_magnitude.as_slice());
    record.smoothed_magnitude = combine(|r| r.smoothed_magnitude.as_slice());
    record.raw_phase = None;
    record.smoothed_phase = None;

    Some(AggregateView {
        mode,
        record,
        included: usable.iter().map(|r| r.id.clone()).collect(),
        skipped: rejected.len(),
        edge_mismatches,
    })
}
