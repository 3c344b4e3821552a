//! Synchronized play-and-record backends
//!
//! A [`CaptureBackend`] starts stimulus playback and response recording
//! from one synchronization point and hands back an [`ActiveCapture`] that
//! is either finished (returning the recording) or aborted. Dropping an
//! active capture releases its device handles.

use crate::audio::device::{self, DeviceRole};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Extra recording capacity beyond the stimulus, in seconds
const RECORD_HEADROOM_SECS: usize = 2;

/// What to play and where to record
#[derive(Debug, Clone)]
pub struct CapturePlan {
    /// Mono stimulus including its silence tail
    pub stimulus: Arc<Vec<f32>>,
    pub sample_rate: u32,
    /// Physical output channels that receive the stimulus
    pub output_channels: Vec<usize>,
    /// Physical input channel that is recorded
    pub input_channel: usize,
}

/// A measurement in progress
pub trait ActiveCapture {
    /// Stop both directions and return the recorded samples
    fn finish(self: Box<Self>) -> Result<Vec<f32>>;

    /// Stop both directions and discard the recording
    fn abort(self: Box<Self>);
}

/// Device pair able to run a synchronized capture
pub trait CaptureBackend {
    fn input_device_name(&self) -> String;

    fn output_device_name(&self) -> String;

    /// `(input, output)` channel counts of the devices
    fn channel_counts(&self) -> Result<(usize, usize)>;

    /// Start playback and recording together
    fn begin(&mut self, plan: CapturePlan) -> Result<Box<dyn ActiveCapture>>;
}

/// Backend on real cpal devices
pub struct CpalCaptureBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalCaptureBackend {
    /// Devices by name; `None` selects the system default
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }
}

fn input_error(device: &str, e: impl std::fmt::Display) -> Error {
    let message = format!("{device}: {e}");
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("not authorized") || lower.contains("denied") {
        Error::permission_denied(message)
    } else {
        Error::device_unavailable(message)
    }
}

impl CaptureBackend for CpalCaptureBackend {
    fn input_device_name(&self) -> String {
        device::find_device(self.input_device.as_deref(), DeviceRole::Input)
            .map(|d| device::name_of(&d))
            .unwrap_or_else(|_| self.input_device.clone().unwrap_or_default())
    }

    fn output_device_name(&self) -> String {
        device::find_device(self.output_device.as_deref(), DeviceRole::Output)
            .map(|d| device::name_of(&d))
            .unwrap_or_else(|_| self.output_device.clone().unwrap_or_default())
    }

    fn channel_counts(&self) -> Result<(usize, usize)> {
        let input = device::find_device(self.input_device.as_deref(), DeviceRole::Input)?;
        let output = device::find_device(self.output_device.as_deref(), DeviceRole::Output)?;
        let inputs = input
            .default_input_config()
            .map(|c| c.channels() as usize)
            .map_err(|e| input_error(&device::name_of(&input), e))?;
        let outputs = output
            .default_output_config()
            .map(|c| c.channels() as usize)
            .map_err(|e| Error::device_unavailable(format!("{}: {}", device::name_of(&output), e)))?;
        Ok((inputs, outputs))
    }

    fn begin(&mut self, plan: CapturePlan) -> Result<Box<dyn ActiveCapture>> {
        let input = device::find_device(self.input_device.as_deref(), DeviceRole::Input)?;
        let output = device::find_device(self.output_device.as_deref(), DeviceRole::Output)?;
        let in_name = device::name_of(&input);
        let out_name = device::name_of(&output);
        let (in_channels, out_channels) = self.channel_counts()?;

        let rate = SampleRate(plan.sample_rate);
        let output_config = StreamConfig {
            channels: out_channels as u16,
            sample_rate: rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let input_config = StreamConfig {
            channels: in_channels as u16,
            sample_rate: rate,
            buffer_size: cpal::BufferSize::Default,
        };

        // Both callbacks stay idle until `armed` flips: the single sync point
        let armed = Arc::new(AtomicBool::new(false));
        let capacity = plan.stimulus.len() + RECORD_HEADROOM_SECS * plan.sample_rate as usize;
        let (mut producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let overflow = Arc::new(AtomicUsize::new(0));

        let out_armed = Arc::clone(&armed);
        let stimulus = Arc::clone(&plan.stimulus);
        let routed = plan.output_channels.clone();
        let mut position = 0usize;
        let output_stream = output
            .build_output_stream(
                &output_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    data.fill(0.0);
                    if !out_armed.load(Ordering::Acquire) {
                        return;
                    }
                    for frame in data.chunks_mut(out_channels) {
                        let sample = stimulus.get(position).copied().unwrap_or(0.0);
                        position += 1;
                        for &ch in &routed {
                            if let Some(slot) = frame.get_mut(ch) {
                                *slot = sample;
                            }
                        }
                    }
                },
                move |err| {
                    tracing::error!("Output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| Error::device_unavailable(format!("{out_name}: {e}")))?;

        let in_armed = Arc::clone(&armed);
        let in_overflow = Arc::clone(&overflow);
        let input_channel = plan.input_channel;
        let input_stream = input
            .build_input_stream(
                &input_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !in_armed.load(Ordering::Acquire) {
                        return;
                    }
                    for frame in data.chunks(in_channels) {
                        let sample = frame.get(input_channel).copied().unwrap_or(0.0);
                        if producer.try_push(sample).is_err() {
                            in_overflow.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                },
                move |err| {
                    tracing::error!("Input stream error: {}", err);
                },
                None,
            )
            .map_err(|e| input_error(&in_name, e))?;

        output_stream
            .play()
            .map_err(|e| Error::device_unavailable(format!("{out_name}: {e}")))?;
        input_stream.play().map_err(|e| input_error(&in_name, e))?;
        armed.store(true, Ordering::Release);

        tracing::info!(
            input = %in_name,
            output = %out_name,
            sample_rate = plan.sample_rate,
            stimulus_samples = plan.stimulus.len(),
            "Capture started"
        );

        Ok(Box::new(CpalActiveCapture {
            input: Some(input_stream),
            output: Some(output_stream),
            armed,
            consumer,
            overflow,
        }))
    }
}

struct CpalActiveCapture {
    input: Option<Stream>,
    output: Option<Stream>,
    armed: Arc<AtomicBool>,
    consumer: ringbuf::HeapCons<f32>,
    overflow: Arc<AtomicUsize>,
}

impl CpalActiveCapture {
    fn halt(&mut self) {
        self.armed.store(false, Ordering::Release);
        self.output = None;
        self.input = None;
    }
}

impl ActiveCapture for CpalActiveCapture {
    fn finish(mut self: Box<Self>) -> Result<Vec<f32>> {
        self.halt();
        let mut recording = vec![0.0f32; self.consumer.occupied_len()];
        let read = self.consumer.pop_slice(&mut recording);
        recording.truncate(read);

        let dropped = self.overflow.load(Ordering::Relaxed);
        if dropped > 0 {
            tracing::warn!(dropped, "Capture buffer overflowed");
        }
        tracing::info!(samples = recording.len(), "Capture finished");
        Ok(recording)
    }

    fn abort(mut self: Box<Self>) {
        self.halt();
        tracing::info!("Capture aborted, devices released");
    }
}

impl Drop for CpalActiveCapture {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_errors_are_classified() {
        let e = input_error("Mic", "Permission denied by the system");
        assert!(matches!(e, Error::PermissionDenied { .. }));
        let e = input_error("Mic", "device disconnected");
        assert!(matches!(e, Error::DeviceUnavailable { .. }));
    }

    #[test]
    fn test_unknown_device_fails_to_begin() {
        let mut backend = CpalCaptureBackend::new(
            Some("no-such-input-device".into()),
            Some("no-such-output-device".into()),
        );
        let plan = CapturePlan {
            stimulus: Arc::new(vec![0.0; 16]),
            sample_rate: 48000,
            output_channels: vec![0],
            input_channel: 0,
        };
        assert!(backend.begin(plan).is_err());
        assert_eq!(backend.output_device_name(), "no-such-output-device");
    }
}
