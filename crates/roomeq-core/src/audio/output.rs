//! Output clocks that pull samples from a [`RenderGraph`]
//!
//! [`CpalOutput`] drives the graph from a real device callback.
//! [`OfflineOutput`] is driven by hand through its [`OfflineClock`], which is
//! how the engine is exercised without audio hardware.

use crate::audio::device::{self, DeviceRole};
use crate::audio::graph::SharedGraph;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A clock that renders a shared graph to some sink
///
/// Implementations need not be `Send`; the engine keeps its output on the
/// thread that created it.
pub trait AudioOutput {
    /// Display name of the device behind this output
    fn device_name(&self) -> &str;

    /// Channel count the graph must render
    fn channels(&self) -> usize;

    /// Start pulling from `graph` at `sample_rate`; the clock runs afterwards
    fn open(&mut self, graph: SharedGraph, sample_rate: u32) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Stop the clock without releasing the device
    fn suspend(&mut self) -> Result<()>;

    /// Restart a suspended clock
    fn resume(&mut self) -> Result<()>;

    /// Release the device
    fn close(&mut self);
}

/// Output on a cpal device
pub struct CpalOutput {
    device: Device,
    name: String,
    channels: usize,
    stream: Option<Stream>,
}

impl CpalOutput {
    /// Output on the named device, or the default output device
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = device::find_device(device_name, DeviceRole::Output)?;
        let name = device::name_of(&device);
        let channels = device
            .default_output_config()
            .map(|c| c.channels() as usize)
            .map_err(|e| Error::device_unavailable(format!("{name}: {e}")))?;
        Ok(Self {
            device,
            name,
            channels,
            stream: None,
        })
    }
}

impl AudioOutput for CpalOutput {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn open(&mut self, graph: SharedGraph, sample_rate: u32) -> Result<()> {
        self.close();

        let config = StreamConfig {
            channels: self.channels as u16,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let callback_graph = Arc::clone(&graph);
        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Never block the audio thread; a contended lock costs one buffer of silence
                    match callback_graph.try_lock() {
                        Ok(mut g) => g.render(data),
                        Err(_) => data.fill(0.0),
                    }
                },
                move |err| {
                    tracing::error!("Output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| Error::device_unavailable(format!("{}: {}", self.name, e)))?;

        stream
            .play()
            .map_err(|e| Error::device_unavailable(format!("{}: {}", self.name, e)))?;

        tracing::info!(
            device = %self.name,
            sample_rate,
            channels = self.channels,
            "Output stream opened"
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn suspend(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            // Not every host supports pausing; the graph is silent while suspended regardless
            if let Err(e) = stream.pause() {
                tracing::debug!("Stream pause not supported: {}", e);
            }
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        match &self.stream {
            Some(stream) => stream
                .play()
                .map_err(|e| Error::device_unavailable(format!("{}: {}", self.name, e))),
            None => Err(Error::device_unavailable(format!(
                "{}: output not open",
                self.name
            ))),
        }
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!(device = %self.name, "Output stream closed");
        }
    }
}

/// State shared between an [`OfflineOutput`] and its [`OfflineClock`]
#[derive(Default)]
struct OfflineShared {
    graph: Mutex<Option<SharedGraph>>,
    running: AtomicBool,
    frames_rendered: AtomicU64,
    failing_resumes: AtomicUsize,
    sample_rate: AtomicU64,
}

/// Output without hardware, advanced explicitly through [`OfflineClock`]
pub struct OfflineOutput {
    name: String,
    channels: usize,
    shared: Arc<OfflineShared>,
}

/// Driver side of an [`OfflineOutput`]
#[derive(Clone)]
pub struct OfflineClock {
    channels: usize,
    shared: Arc<OfflineShared>,
}

impl OfflineOutput {
    /// Create an offline output and the clock that drives it
    pub fn new(channels: usize) -> (Self, OfflineClock) {
        let shared = Arc::new(OfflineShared::default());
        let channels = channels.max(1);
        (
            Self {
                name: "offline".to_string(),
                channels,
                shared: Arc::clone(&shared),
            },
            OfflineClock { channels, shared },
        )
    }
}

impl AudioOutput for OfflineOutput {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn open(&mut self, graph: SharedGraph, sample_rate: u32) -> Result<()> {
        if let Ok(mut slot) = self.shared.graph.lock() {
            *slot = Some(graph);
        }
        self.shared
            .sample_rate
            .store(sample_rate as u64, Ordering::Relaxed);
        self.shared.running.store(true, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared
            .graph
            .lock()
            .map(|g| g.is_some())
            .unwrap_or(false)
    }

    fn suspend(&mut self) -> Result<()> {
        self.shared.running.store(false, Ordering::Release);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let failing = self.shared.failing_resumes.load(Ordering::Acquire);
        if failing > 0 {
            self.shared
                .failing_resumes
                .store(failing - 1, Ordering::Release);
            return Err(Error::device_unavailable("output clock suspended by host"));
        }
        self.shared.running.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Ok(mut slot) = self.shared.graph.lock() {
            *slot = None;
        }
    }
}

impl OfflineClock {
    /// Render `frames` frames; returns interleaved output samples
    ///
    /// A closed or suspended output yields silence and does not advance the graph.
    pub fn advance(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; frames * self.channels];
        if !self.shared.running.load(Ordering::Acquire) {
            return out;
        }
        let graph = match self.shared.graph.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        if let Some(graph) = graph {
            if let Ok(mut g) = graph.lock() {
                g.render(&mut out);
            }
            self.shared
                .frames_rendered
                .fetch_add(frames as u64, Ordering::Relaxed);
        }
        out
    }

    /// Render `secs` seconds at the sample rate the output was opened with
    pub fn advance_secs(&self, secs: f64) -> Vec<f32> {
        let rate = self.shared.sample_rate.load(Ordering::Relaxed) as f64;
        self.advance((secs * rate).round() as usize)
    }

    /// Make the next `count` resume attempts fail
    pub fn fail_next_resumes(&self, count: usize) {
        self.shared.failing_resumes.store(count, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Total frames rendered while running
    pub fn frames_rendered(&self) -> u64 {
        self.shared.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::DecodedAudio;
    use crate::audio::filters::FilterChain;
    use crate::audio::graph::{RenderGraph, SourceNode};

    #[test]
    fn test_offline_clock_renders_only_while_running() {
        let (mut output, clock) = OfflineOutput::new(1);
        let graph = RenderGraph::shared(1);
        {
            let mut g = graph.lock().unwrap();
            let audio = Arc::new(DecodedAudio::from_interleaved(vec![0.5; 100], 1000, 1));
            g.rebuild(Some(SourceNode::new(audio, 0)), FilterChain::empty());
            g.set_suspended(false);
        }

        assert!(clock.advance(10).iter().all(|&s| s == 0.0));
        output.open(Arc::clone(&graph), 1000).unwrap();
        assert!(clock.advance(10).iter().all(|&s| s == 0.5));

        output.suspend().unwrap();
        assert!(clock.advance(10).iter().all(|&s| s == 0.0));
        assert_eq!(graph.lock().unwrap().position_frames(), Some(10));
        assert_eq!(clock.frames_rendered(), 10);
    }

    #[test]
    fn test_failing_resumes_are_consumed() {
        let (mut output, clock) = OfflineOutput::new(2);
        output.open(RenderGraph::shared(2), 48000).unwrap();
        output.suspend().unwrap();
        clock.fail_next_resumes(1);
        assert!(output.resume().is_err());
        assert!(output.resume().is_ok());
        assert!(clock.is_running());
    }
}
