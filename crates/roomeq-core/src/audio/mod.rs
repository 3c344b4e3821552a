//! Audio processing module
//!
//! This module contains all audio-related functionality including:
//! - Device enumeration ([`device`])
//! - Whole-file decoding ([`decoder`])
//! - Parametric filters and chains ([`filters`])
//! - The shared render graph and output clocks ([`graph`], [`output`])
//! - The playback engine and its thread handle ([`engine`], [`handle`])
//! - Measurement stimulus generation ([`signal`])
//! - Transfer-function analysis ([`analyzer`])
//! - Channel claims and polling helpers ([`lease`], [`poller`])

pub mod analyzer;
pub mod decoder;
pub mod device;
pub mod engine;
pub mod filters;
pub mod graph;
pub mod handle;
pub mod lease;
pub mod output;
pub mod poller;
pub mod signal;
