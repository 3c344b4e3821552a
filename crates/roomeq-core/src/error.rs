//! Error taxonomy shared by the engine, the measurement pipeline and storage

use thiserror::Error;

/// Errors surfaced by roomeq-core operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to decode audio: {0}")]
    DecodeFailed(String),

    #[error("No audio loaded")]
    NoAudioLoaded,

    #[error("Audio device unavailable: {message}")]
    DeviceUnavailable { message: String, hint: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String, hint: String },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid routing: {0}")]
    InvalidRouting(String),

    #[error("Channel {physical} out of range (device has {channel_count} channels)")]
    OutOfRange { physical: usize, channel_count: usize },

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Measurement cancelled")]
    Cancelled,

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Operation '{operation}' not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Seek position {position:.3}s outside 0..={duration:.3}s")]
    SeekOutOfBounds { position: f64, duration: f64 },

    #[error("Device conflict on {device}: channels {channels:?} already in use")]
    DeviceConflict { device: String, channels: Vec<u16> },

    #[error("Invalid calibration data: {0}")]
    Calibration(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for roomeq-core operations
pub type Result<T> = std::result::Result<T, Error>;

const DEVICE_HINT: &str =
    "Check that the device is connected and not in exclusive use by another application, then refresh the device list.";
const PERMISSION_HINT: &str =
    "Grant microphone access to this application in the system privacy settings and retry.";

impl Error {
    /// Device error with the standard remediation hint
    pub fn device_unavailable(message: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            message: message.into(),
            hint: DEVICE_HINT.to_string(),
        }
    }

    /// Permission error with the standard remediation hint
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
            hint: PERMISSION_HINT.to_string(),
        }
    }

    /// Actionable remediation text for device and permission failures
    pub fn remediation(&self) -> Option<&str> {
        match self {
            Self::DeviceUnavailable { hint, .. } | Self::PermissionDenied { hint, .. } => {
                Some(hint.as_str())
            }
            _ => None,
        }
    }

    /// Whether this error should be escalated to the user as a failure
    ///
    /// Cancellation is a normal terminal state, and a missing record is only
    /// reported where the caller explicitly asked for it.
    pub fn is_user_failure(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remediation_only_for_device_kinds() {
        assert!(Error::device_unavailable("gone").remediation().is_some());
        assert!(Error::permission_denied("mic").remediation().is_some());
        assert!(Error::NoAudioLoaded.remediation().is_none());
        assert!(Error::InvalidParameters("rate".into()).remediation().is_none());
    }

    #[test]
    fn test_cancelled_is_not_a_failure() {
        assert!(!Error::Cancelled.is_user_failure());
        assert!(Error::AnalysisFailed("silence".into()).is_user_failure());
    }

    #[test]
    fn test_out_of_range_message() {
        let err = Error::OutOfRange {
            physical: 4,
            channel_count: 2,
        };
        assert_eq!(
            err.to_string(),
            "Channel 4 out of range (device has 2 channels)"
        );
    }
}
