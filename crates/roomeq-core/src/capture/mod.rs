//! Measurement pipeline
//!
//! - Parameters and the stored record ([`params`])
//! - Channel routing per device role ([`routing`])
//! - Microphone calibration ([`calibration`])
//! - Synchronized play/record backends ([`backend`], [`loopback`])
//! - Cancellation ([`cancel`]) and the measurement state machine ([`orchestrator`])

pub mod backend;
pub mod calibration;
pub mod cancel;
pub mod loopback;
pub mod orchestrator;
pub mod params;
pub mod routing;
