//! Request/response boundary for the external EQ optimizer
//!
//! The search algorithm itself lives outside this crate. These types carry a
//! measured curve out and a set of parametric filters back in, and
//! [`EqExport`] is the payload handed to preset formatters.

use crate::audio::filters::{FilterKind, FilterParam};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Inclusive bounds for one optimized parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Frequency/magnitude curve sent to or returned from the optimizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    pub frequencies: Vec<f64>,
    pub magnitudes: Vec<f64>,
}

/// Optimization request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerRequest {
    pub curve: Curve,
    pub num_filters: usize,
    pub frequency_bounds: Bounds,
    pub gain_bounds: Bounds,
    pub q_bounds: Bounds,
    /// Algorithm identifier understood by the optimizer service
    pub algorithm: String,
}

impl OptimizerRequest {
    /// Request with the usual bounds for room correction
    pub fn new(curve: Curve, num_filters: usize) -> Self {
        Self {
            curve,
            num_filters,
            frequency_bounds: Bounds::new(crate::MIN_FREQUENCY_HZ, crate::MAX_FREQUENCY_HZ),
            gain_bounds: Bounds::new(-12.0, 6.0),
            q_bounds: Bounds::new(0.5, 10.0),
            algorithm: "de".to_string(),
        }
    }
}

/// Optimization response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizerResponse {
    pub success: bool,
    /// Flat `(frequency, q, gain)` triples
    #[serde(default)]
    pub filter_params: Vec<f64>,
    #[serde(default)]
    pub preference_score_before: Option<f64>,
    #[serde(default)]
    pub preference_score_after: Option<f64>,
    #[serde(default)]
    pub curves: Vec<Curve>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl OptimizerResponse {
    /// Convert the flat parameter array into peaking filters
    pub fn into_filters(self) -> Result<Vec<FilterParam>> {
        if !self.success {
            return Err(Error::InvalidFilter(
                self.error_message
                    .unwrap_or_else(|| "optimizer reported failure".to_string()),
            ));
        }
        if self.filter_params.len() % 3 != 0 {
            return Err(Error::InvalidFilter(format!(
                "expected (frequency, q, gain) triples, got {} values",
                self.filter_params.len()
            )));
        }
        Ok(self
            .filter_params
            .chunks_exact(3)
            .map(|t| FilterParam {
                frequency: t[0],
                q: t[1],
                gain: t[2],
                kind: FilterKind::Peaking,
            })
            .collect())
    }
}

/// Anything that can turn a request into a response
///
/// A single call per request; callers do not retry automatically.
pub trait Optimizer {
    fn optimize(&self, request: &OptimizerRequest) -> Result<OptimizerResponse>;
}

/// Final filter set plus the sample rate it was designed for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqExport {
    pub filters: Vec<FilterParam>,
    pub sample_rate: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triples_become_peaking_filters() {
        let resp = OptimizerResponse {
            success: true,
            filter_params: vec![100.0, 2.0, -4.0, 2500.0, 1.0, 3.0],
            ..Default::default()
        };
        let filters = resp.into_filters().unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[1].frequency, 2500.0);
        assert_eq!(filters[1].gain, 3.0);
        assert_eq!(filters[0].kind, FilterKind::Peaking);
    }

    #[test]
    fn test_ragged_params_rejected() {
        let resp = OptimizerResponse {
            success: true,
            filter_params: vec![100.0, 2.0],
            ..Default::default()
        };
        assert!(matches!(resp.into_filters(), Err(Error::InvalidFilter(_))));
    }

    #[test]
    fn test_failure_carries_message() {
        let resp = OptimizerResponse {
            success: false,
            error_message: Some("did not converge".into()),
            ..Default::default()
        };
        let err = resp.into_filters().unwrap_err();
        assert!(err.to_string().contains("did not converge"));
    }

    #[test]
    fn test_response_deserializes_with_missing_fields() {
        let resp: OptimizerResponse =
            serde_json::from_str(r#"{"success": true, "filter_params": [1000, 1, 2]}"#).unwrap();
        assert_eq!(resp.into_filters().unwrap().len(), 1);
    }
}
