//! Roomeq Core - playback/EQ engine, measurement pipeline and capture storage
//!
//! This library measures the frequency/phase response of a playback device
//! with a generated test signal, and auditions candidate parametric EQ
//! settings against program audio with gapless filter updates.
//!
//! Both halves share the same substrate: decoded audio flows through a
//! routed, filtered render graph, and both use the numeric toolbox in
//! [`math`] (octave smoothing, dB conversions, log-frequency interpolation).

pub mod audio;
pub mod capture;
pub mod controller;
pub mod error;
pub mod events;
pub mod math;
pub mod optimizer;
pub mod storage;

pub use audio::{
    engine::{AudioGraphEngine, PlaybackState},
    filters::{FilterKind, FilterParam},
    handle::PlayerHandle,
    signal::{SignalGenerator, SignalType},
};
pub use capture::{
    backend::{CaptureBackend, CpalCaptureBackend},
    calibration::CalibrationCurve,
    cancel::CancelToken,
    loopback::LoopbackBackend,
    orchestrator::{CaptureOrchestrator, CaptureState},
    params::{AnalysisSettings, CaptureParameters, CaptureRecord},
    routing::{CaptureRouting, RoutingMatrix},
};
pub use controller::{CaptureController, CaptureView, PlayerController, ViewSelection};
pub use error::{Error, Result};
pub use events::ProgressEvent;
pub use storage::{
    aggregate::{AggregateMode, AggregateView},
    store::CaptureStorage,
};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default sample rate for measurements
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default octave fraction for smoothing (1/3 octave)
pub const DEFAULT_OCTAVE_FRACTION: f64 = 3.0;

/// Lowest frequency reported in a measurement
pub const MIN_FREQUENCY_HZ: f64 = 20.0;

/// Highest frequency reported in a measurement (clamped to Nyquist)
pub const MAX_FREQUENCY_HZ: f64 = 20000.0;
