//! Roomeq - room response measurement and parametric EQ audition
//!
//! This library re-exports the playback engine, measurement pipeline,
//! signal math and capture storage from `roomeq-core`, and adds the
//! persistent application configuration used by the `roomeq` binary.

pub mod config;

pub use roomeq_core::audio;
pub use roomeq_core::capture;
pub use roomeq_core::controller;
pub use roomeq_core::events;
pub use roomeq_core::math;
pub use roomeq_core::optimizer;
pub use roomeq_core::storage;

pub use roomeq_core::{
    AggregateMode, AggregateView, AnalysisSettings, AudioGraphEngine, CalibrationCurve,
    CancelToken, CaptureBackend, CaptureController, CaptureOrchestrator, CaptureParameters,
    CaptureRecord, CaptureRouting, CaptureState, CaptureStorage, CaptureView, CpalCaptureBackend,
    Error, FilterKind, FilterParam, LoopbackBackend, PlaybackState, PlayerController,
    PlayerHandle, ProgressEvent, Result, RoutingMatrix, SignalGenerator, SignalType,
    ViewSelection,
};
pub use roomeq_core::{
    BUILD_DATE, DEFAULT_OCTAVE_FRACTION, DEFAULT_SAMPLE_RATE, MAX_FREQUENCY_HZ, MIN_FREQUENCY_HZ,
    VERSION,
};
