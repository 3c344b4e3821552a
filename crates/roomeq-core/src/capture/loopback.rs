//! Simulated device pair that "records" what it plays
//!
//! Used by tests and the CLI `--loopback` mode. The recording is the
//! stimulus delayed by a fixed latency, scaled and optionally passed
//! through a filter chain, so a measurement recovers that chain's response.

use crate::audio::filters::{FilterChain, FilterParam};
use crate::capture::backend::{ActiveCapture, CaptureBackend, CapturePlan};
use crate::error::{Error, Result};
use crate::math::db_to_linear;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Loopback backend with a configurable simulated room
#[derive(Debug, Clone)]
pub struct LoopbackBackend {
    device_name: String,
    input_channels: usize,
    output_channels: usize,
    latency_samples: usize,
    gain_db: f64,
    filters: Vec<FilterParam>,
    silent: bool,
    open_handles: Arc<AtomicUsize>,
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self {
            device_name: "loopback".to_string(),
            input_channels: 2,
            output_channels: 2,
            latency_samples: 480,
            gain_db: 0.0,
            filters: Vec::new(),
            silent: false,
            open_handles: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_channels(mut self, input: usize, output: usize) -> Self {
        self.input_channels = input;
        self.output_channels = output;
        self
    }

    pub fn with_latency(mut self, samples: usize) -> Self {
        self.latency_samples = samples;
        self
    }

    pub fn with_gain_db(mut self, gain_db: f64) -> Self {
        self.gain_db = gain_db;
        self
    }

    /// Filters the simulated path applies to the stimulus
    pub fn with_filters(mut self, filters: Vec<FilterParam>) -> Self {
        self.filters = filters;
        self
    }

    /// Record nothing, as with an unplugged microphone
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Number of captures currently holding the simulated devices
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Shared counter for observing handle release after the backend moved
    pub fn handle_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.open_handles)
    }

    fn render(&self, plan: &CapturePlan) -> Result<Vec<f32>> {
        let len = plan.stimulus.len() + self.latency_samples;
        if self.silent {
            return Ok(vec![0.0; len]);
        }
        let mut recording = vec![0.0f32; len];
        recording[self.latency_samples..].copy_from_slice(&plan.stimulus);

        if !self.filters.is_empty() {
            let mut chain = FilterChain::build(&self.filters, plan.sample_rate, 1)?;
            chain.process_interleaved(&mut recording, 1);
        }
        let gain = db_to_linear(self.gain_db) as f32;
        for s in &mut recording {
            *s *= gain;
        }
        Ok(recording)
    }
}

impl CaptureBackend for LoopbackBackend {
    fn input_device_name(&self) -> String {
        self.device_name.clone()
    }

    fn output_device_name(&self) -> String {
        self.device_name.clone()
    }

    fn channel_counts(&self) -> Result<(usize, usize)> {
        Ok((self.input_channels, self.output_channels))
    }

    fn begin(&mut self, plan: CapturePlan) -> Result<Box<dyn ActiveCapture>> {
        if plan.input_channel >= self.input_channels {
            return Err(Error::InvalidRouting(format!(
                "input channel {} not on {}",
                plan.input_channel, self.device_name
            )));
        }
        if let Some(&ch) = plan.output_channels.iter().find(|&&c| c >= self.output_channels) {
            return Err(Error::InvalidRouting(format!(
                "output channel {ch} not on {}",
                self.device_name
            )));
        }
        let recording = self.render(&plan)?;
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(device = %self.device_name, samples = recording.len(), "Loopback capture started");
        Ok(Box::new(LoopbackCapture {
            recording,
            handles: Arc::clone(&self.open_handles),
        }))
    }
}

struct LoopbackCapture {
    recording: Vec<f32>,
    handles: Arc<AtomicUsize>,
}

impl ActiveCapture for LoopbackCapture {
    fn finish(mut self: Box<Self>) -> Result<Vec<f32>> {
        Ok(std::mem::take(&mut self.recording))
    }

    fn abort(self: Box<Self>) {}
}

impl Drop for LoopbackCapture {
    fn drop(&mut self) {
        self.handles.fetch_sub(1, Ordering::SeqCst);
    }
}
