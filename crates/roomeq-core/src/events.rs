//! Progress events emitted by long-running operations
//!
//! Measurement and optimization progress arrives from several producers in
//! slightly different JSON shapes. [`ProgressEvent::parse`] is the single
//! place those shapes are recognised; everything downstream matches on the
//! enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Started,
    Completed,
    Failed,
}

impl StageStatus {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "started" | "start" | "running" | "in_progress" => Some(Self::Started),
            "completed" | "complete" | "done" | "success" => Some(Self::Completed),
            "failed" | "error" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Progress of a measurement or optimization run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A named pipeline stage changed status
    Stage {
        name: String,
        status: StageStatus,
        detail: Option<String>,
    },
    /// One iteration of an iterative optimizer
    Sample {
        iteration: usize,
        fitness: f64,
        convergence: f64,
    },
}

impl ProgressEvent {
    /// Stage event without detail text
    pub fn stage(name: impl Into<String>, status: StageStatus) -> Self {
        Self::Stage {
            name: name.into(),
            status,
            detail: None,
        }
    }

    /// Parse a loosely-typed progress payload
    ///
    /// Recognised shapes:
    /// - `{"iteration", "fitness", "convergence"?}` → [`ProgressEvent::Sample`]
    /// - `{"stage", "status", "detail"|"message"?}` → [`ProgressEvent::Stage`]
    ///
    /// Returns `None` for anything else.
    pub fn parse(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        if let (Some(iteration), Some(fitness)) = (
            obj.get("iteration").and_then(Value::as_u64),
            obj.get("fitness").and_then(Value::as_f64),
        ) {
            let convergence = obj
                .get("convergence")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            return Some(Self::Sample {
                iteration: iteration as usize,
                fitness,
                convergence,
            });
        }

        let name = obj
            .get("stage")
            .or_else(|| obj.get("name"))
            .and_then(Value::as_str)?;
        let status = obj
            .get("status")
            .and_then(Value::as_str)
            .and_then(StageStatus::parse)?;
        let detail = obj
            .get("detail")
            .or_else(|| obj.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Self::Stage {
            name: name.to_string(),
            status,
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_sample() {
        let ev = ProgressEvent::parse(&json!({
            "iteration": 12,
            "fitness": 0.75,
            "convergence": 0.01,
            "params": [1000.0, 1.0, 3.0]
        }));
        assert_eq!(
            ev,
            Some(ProgressEvent::Sample {
                iteration: 12,
                fitness: 0.75,
                convergence: 0.01
            })
        );
    }

    #[test]
    fn test_parse_sample_without_convergence() {
        let ev = ProgressEvent::parse(&json!({"iteration": 3, "fitness": 2.5}));
        assert!(matches!(
            ev,
            Some(ProgressEvent::Sample { convergence, .. }) if convergence == 0.0
        ));
    }

    #[test]
    fn test_parse_stage_with_message() {
        let ev = ProgressEvent::parse(&json!({
            "stage": "analyzing",
            "status": "done",
            "message": "200 points"
        }));
        assert_eq!(
            ev,
            Some(ProgressEvent::Stage {
                name: "analyzing".into(),
                status: StageStatus::Completed,
                detail: Some("200 points".into()),
            })
        );
    }

    #[test]
    fn test_parse_rejects_unknown_shapes() {
        assert_eq!(ProgressEvent::parse(&json!({"foo": 1})), None);
        assert_eq!(ProgressEvent::parse(&json!("started")), None);
        assert_eq!(
            ProgressEvent::parse(&json!({"stage": "x", "status": "weird"})),
            None
        );
    }
}
