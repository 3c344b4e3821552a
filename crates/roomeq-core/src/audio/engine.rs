//! Playback engine with a live, reconfigurable EQ chain
//!
//! State machine:
//!
//! ```text
//! Idle → Loading → Ready → Playing ⇄ Paused
//!                    ↑________stop______|
//! ```
//!
//! `Seeking` is a transient sub-state of `Playing`/`Paused`. Any failing
//! operation may move to `Error`, from which only `stop()` and `load()`
//! recover.
//!
//! ## Filter updates
//!
//! While `Playing` the output clock is running and the chain is swapped in
//! place. While `Paused` the clock is suspended and the graph refuses to be
//! reconnected, so the engine replaces the whole source + chain at the saved
//! offset under the graph lock and leaves it suspended: the paused state
//! stays silent but already carries the new filters when resumed.
//!
//! The engine is not `Send` (device streams are pinned to their thread);
//! use [`crate::audio::handle::PlayerHandle`] to drive it from elsewhere.

use crate::audio::decoder::{self, DecodedAudio};
use crate::audio::filters::{FilterChain, FilterParam};
use crate::audio::graph::{RenderGraph, SharedGraph, SourceNode};
use crate::audio::lease::{DeviceLeases, Lease};
use crate::audio::output::AudioOutput;
use crate::error::{Error, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, MutexGuard};

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    /// Nothing loaded
    Idle,
    /// Decoding a source
    Loading,
    /// Loaded and stopped
    Ready,
    /// Output clock running
    Playing,
    /// Output clock suspended at a recorded offset
    Paused,
    /// Repositioning (transient)
    Seeking,
    /// Unrecoverable until stop/load
    Error,
}

/// Snapshot of the engine for status displays
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: PlaybackState,
    pub position_secs: f64,
    pub duration_secs: f64,
    pub filters: Vec<FilterParam>,
    pub filters_enabled: bool,
    pub last_error: Option<String>,
}

/// Decoded-audio player with a parametric filter chain
pub struct AudioGraphEngine {
    state: PlaybackState,
    audio: Option<Arc<DecodedAudio>>,
    graph: SharedGraph,
    output: Box<dyn AudioOutput>,
    filters: Vec<FilterParam>,
    enabled: bool,
    /// Offset in frames while not playing (paused position or start position)
    offset_frames: usize,
    leases: DeviceLeases,
    lease: Option<Lease>,
    last_error: Option<String>,
}

impl AudioGraphEngine {
    /// Create an engine rendering to `output`
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        let graph = RenderGraph::shared(output.channels());
        Self {
            state: PlaybackState::Idle,
            audio: None,
            graph,
            output,
            filters: Vec::new(),
            enabled: true,
            offset_frames: 0,
            leases: DeviceLeases::new(),
            lease: None,
            last_error: None,
        }
    }

    /// Share channel claims with other sessions (e.g. a capture orchestrator)
    pub fn with_leases(mut self, leases: DeviceLeases) -> Self {
        self.leases = leases;
        self
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn filters(&self) -> &[FilterParam] {
        &self.filters
    }

    pub fn filters_enabled(&self) -> bool {
        self.enabled
    }

    pub fn device_name(&self) -> &str {
        self.output.device_name()
    }

    /// Duration of the loaded audio, 0 when nothing is loaded
    pub fn duration_secs(&self) -> f64 {
        self.audio.as_ref().map(|a| a.duration_secs()).unwrap_or(0.0)
    }

    fn sample_rate(&self) -> u32 {
        self.audio
            .as_ref()
            .map(|a| a.sample_rate())
            .unwrap_or(crate::DEFAULT_SAMPLE_RATE)
    }

    fn lock_graph(&self) -> MutexGuard<'_, RenderGraph> {
        // The render path never panics while holding the lock; recover the data if it did
        self.graph.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Current playback offset in frames
    fn position_frames(&self) -> usize {
        match self.state {
            PlaybackState::Playing => self
                .lock_graph()
                .position_frames()
                .unwrap_or(self.offset_frames),
            _ => self.offset_frames,
        }
    }

    /// Current playback offset in seconds
    pub fn position(&self) -> f64 {
        self.position_frames() as f64 / self.sample_rate() as f64
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state,
            position_secs: self.position(),
            duration_secs: self.duration_secs(),
            filters: self.filters.clone(),
            filters_enabled: self.enabled,
            last_error: self.last_error.clone(),
        }
    }

    /// Enter `Error`, releasing the device; returns the error for propagation
    fn fail(&mut self, err: Error) -> Error {
        tracing::error!(error = %err, from = ?self.state, "Playback engine failed");
        self.last_error = Some(err.to_string());
        self.state = PlaybackState::Error;
        self.lock_graph().set_suspended(true);
        self.output.close();
        self.lease = None;
        err
    }

    fn require_not_error(&self, operation: &'static str) -> Result<()> {
        if self.state == PlaybackState::Error {
            return Err(Error::InvalidState {
                operation,
                state: format!("{:?}", self.state),
            });
        }
        Ok(())
    }

    fn build_chain(&self) -> Result<FilterChain> {
        match (&self.audio, self.enabled) {
            (Some(audio), true) => {
                FilterChain::build(&self.filters, audio.sample_rate(), audio.channels())
            }
            _ => Ok(FilterChain::empty()),
        }
    }

    fn new_source(&self, start_frame: usize) -> Option<SourceNode> {
        self.audio
            .as_ref()
            .map(|a| SourceNode::new(Arc::clone(a), start_frame))
    }

    /// Decode and load a file; replaces any loaded audio
    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.begin_load();
        match decoder::decode_file(path) {
            Ok(audio) => {
                self.finish_load(audio);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Load already-decoded audio
    pub fn load_decoded(&mut self, audio: DecodedAudio) {
        self.begin_load();
        self.finish_load(audio);
    }

    fn begin_load(&mut self) {
        self.state = PlaybackState::Loading;
        self.lock_graph().rebuild(None, FilterChain::empty());
        self.output.close();
        self.lease = None;
        self.audio = None;
        self.offset_frames = 0;
    }

    fn finish_load(&mut self, audio: DecodedAudio) {
        tracing::info!(
            sample_rate = audio.sample_rate(),
            channels = audio.channels(),
            duration_secs = audio.duration_secs(),
            "Audio loaded"
        );
        self.audio = Some(Arc::new(audio));
        self.last_error = None;
        self.state = PlaybackState::Ready;
    }

    /// Start or continue playback
    pub fn play(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Idle | PlaybackState::Loading => Err(Error::NoAudioLoaded),
            PlaybackState::Playing => Ok(()),
            PlaybackState::Paused => self.resume(),
            PlaybackState::Ready => self.start_from(self.offset_frames),
            PlaybackState::Seeking | PlaybackState::Error => Err(Error::InvalidState {
                operation: "play",
                state: format!("{:?}", self.state),
            }),
        }
    }

    fn start_from(&mut self, frame: usize) -> Result<()> {
        let chain = self.build_chain()?;

        if self.lease.is_none() {
            let channels = 0..self.output.channels() as u16;
            self.lease = Some(self.leases.claim(self.output.device_name(), channels)?);
        }

        {
            let source = self.new_source(frame);
            let mut graph = self.lock_graph();
            graph.rebuild(source, chain);
            graph.set_suspended(true);
        }

        if self.output.is_open() {
            self.resume_clock()?;
        } else {
            let sample_rate = self.sample_rate();
            if let Err(e) = self.output.open(Arc::clone(&self.graph), sample_rate) {
                return Err(self.fail(e));
            }
            self.lock_graph().set_suspended(false);
        }

        self.state = PlaybackState::Playing;
        tracing::info!(offset_secs = self.position(), "Playback started");
        Ok(())
    }

    /// Restart the output clock, retrying once on a transient refusal
    fn resume_clock(&mut self) -> Result<()> {
        if let Err(first) = self.output.resume() {
            tracing::warn!(error = %first, "Output clock refused to resume, retrying");
            if let Err(e) = self.output.resume() {
                return Err(self.fail(e));
            }
        }
        self.lock_graph().set_suspended(false);
        Ok(())
    }

    /// Suspend the clock and record the exact source offset
    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Paused => return Ok(()),
            PlaybackState::Playing => {}
            PlaybackState::Idle => return Err(Error::NoAudioLoaded),
            other => {
                return Err(Error::InvalidState {
                    operation: "pause",
                    state: format!("{other:?}"),
                })
            }
        }

        let offset = {
            let mut graph = self.lock_graph();
            graph.set_suspended(true);
            graph.position_frames().unwrap_or(0)
        };
        self.offset_frames = offset;
        if let Err(e) = self.output.suspend() {
            return Err(self.fail(e));
        }

        self.state = PlaybackState::Paused;
        tracing::info!(offset_secs = self.position(), "Playback paused");
        Ok(())
    }

    /// Resume from the recorded offset
    pub fn resume(&mut self) -> Result<()> {
        if self.state != PlaybackState::Paused {
            return Err(Error::InvalidState {
                operation: "resume",
                state: format!("{:?}", self.state),
            });
        }
        self.resume_clock()?;
        self.state = PlaybackState::Playing;
        tracing::info!(offset_secs = self.position(), "Playback resumed");
        Ok(())
    }

    /// Halt output, drop the source and rewind to 0
    pub fn stop(&mut self) -> Result<()> {
        {
            let mut graph = self.lock_graph();
            graph.set_suspended(true);
            graph.rebuild(None, FilterChain::empty());
        }
        if self.output.is_open() {
            if let Err(e) = self.output.suspend() {
                tracing::warn!(error = %e, "Output did not suspend cleanly, closing");
                self.output.close();
            }
        }
        self.lease = None;
        self.offset_frames = 0;
        self.state = if self.audio.is_some() {
            PlaybackState::Ready
        } else {
            PlaybackState::Idle
        };
        tracing::info!(state = ?self.state, "Playback stopped");
        Ok(())
    }

    /// Move to `seconds` without changing the play/pause state
    pub fn seek(&mut self, seconds: f64) -> Result<()> {
        self.require_not_error("seek")?;
        let Some(audio) = self.audio.clone() else {
            return Err(Error::NoAudioLoaded);
        };
        let duration = audio.duration_secs();
        if !(0.0..=duration).contains(&seconds) {
            return Err(Error::SeekOutOfBounds {
                position: seconds,
                duration,
            });
        }

        let frame = ((seconds * audio.sample_rate() as f64).round() as usize).min(audio.frames());
        let resume_state = self.state;
        self.state = PlaybackState::Seeking;
        tracing::debug!(seconds, ?resume_state, "Seeking");

        match resume_state {
            PlaybackState::Playing | PlaybackState::Paused => {
                let chain = match self.build_chain() {
                    Ok(chain) => chain,
                    Err(e) => {
                        self.state = resume_state;
                        return Err(e);
                    }
                };
                let source = self.new_source(frame);
                self.lock_graph().rebuild(source, chain);
            }
            _ => {}
        }

        self.offset_frames = frame;
        self.state = resume_state;
        Ok(())
    }

    /// Replace the active filter set
    pub fn set_filters(&mut self, params: Vec<FilterParam>) -> Result<()> {
        self.require_not_error("set filters")?;
        let sample_rate = self.sample_rate();
        for p in &params {
            p.validate(sample_rate)?;
        }
        self.filters = params;
        tracing::info!(bands = self.filters.len(), state = ?self.state, "Filters updated");
        self.apply_chain()
    }

    /// Include or bypass the filter chain
    pub fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        self.require_not_error("toggle filters")?;
        self.enabled = enabled;
        tracing::info!(enabled, state = ?self.state, "Filter bypass toggled");
        self.apply_chain()
    }

    fn apply_chain(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Playing => {
                let chain = self.build_chain()?;
                self.lock_graph().reconnect_chain(chain)
            }
            PlaybackState::Paused => {
                // The suspended graph cannot be reconnected: rebuild source + chain at the
                // recorded offset and keep it suspended
                let chain = self.build_chain()?;
                let source = self.new_source(self.offset_frames);
                let mut graph = self.lock_graph();
                graph.rebuild(source, chain);
                graph.set_suspended(true);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Detect the end of the source; a finished source returns to `Ready`
    pub fn refresh(&mut self) -> PlaybackState {
        if self.state == PlaybackState::Playing && self.lock_graph().is_finished() {
            tracing::info!("Playback reached end of source");
            let _ = self.stop();
        }
        self.state
    }
}

impl Drop for AudioGraphEngine {
    fn drop(&mut self) {
        self.output.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::{OfflineClock, OfflineOutput};
    use approx::assert_relative_eq;

    const SR: u32 = 48000;

    fn tone(freq: f64, secs: f64) -> DecodedAudio {
        let n = (secs * SR as f64) as usize;
        let samples = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / SR as f64).sin() as f32 * 0.25)
            .collect();
        DecodedAudio::from_interleaved(samples, SR, 1)
    }

    fn engine() -> (AudioGraphEngine, OfflineClock) {
        let (output, clock) = OfflineOutput::new(1);
        (AudioGraphEngine::new(Box::new(output)), clock)
    }

    #[test]
    fn test_play_requires_audio() {
        let (mut engine, _clock) = engine();
        assert!(matches!(engine.play(), Err(Error::NoAudioLoaded)));
        assert_eq!(engine.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_pause_records_render_offset() {
        let (mut engine, clock) = engine();
        engine.load_decoded(tone(440.0, 2.0));
        engine.play().unwrap();
        clock.advance(12000);
        engine.pause().unwrap();
        assert_eq!(engine.state(), PlaybackState::Paused);
        assert_relative_eq!(engine.position(), 0.25, epsilon = 1e-9);

        // A suspended clock does not move the offset
        clock.advance(12000);
        assert_relative_eq!(engine.position(), 0.25, epsilon = 1e-9);

        engine.resume().unwrap();
        clock.advance(12000);
        assert_relative_eq!(engine.position(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_set_filters_while_playing_keeps_offset() {
        let (mut engine, clock) = engine();
        engine.load_decoded(tone(1000.0, 1.0));
        engine.play().unwrap();
        clock.advance(4800);
        engine
            .set_filters(vec![FilterParam::peaking(1000.0, 1.0, 6.0)])
            .unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert_relative_eq!(engine.position(), 0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_set_filters_while_paused_stays_paused_and_silent() {
        let (mut engine, clock) = engine();
        engine.load_decoded(tone(1000.0, 1.0));
        engine.play().unwrap();
        clock.advance(9600);
        engine.pause().unwrap();

        engine
            .set_filters(vec![FilterParam::peaking(1000.0, 1.0, 6.0)])
            .unwrap();
        engine.set_enabled(false).unwrap();
        engine.set_enabled(true).unwrap();

        assert_eq!(engine.state(), PlaybackState::Paused);
        assert_relative_eq!(engine.position(), 0.2, epsilon = 1e-9);
        assert!(clock.advance(4800).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_invalid_filter_rejected_without_state_change() {
        let (mut engine, _clock) = engine();
        engine.load_decoded(tone(1000.0, 1.0));
        let err = engine
            .set_filters(vec![FilterParam::peaking(30000.0, 1.0, 3.0)])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
        assert!(engine.filters().is_empty());
        assert_eq!(engine.state(), PlaybackState::Ready);
    }

    #[test]
    fn test_stop_rewinds_to_ready() {
        let (mut engine, clock) = engine();
        engine.load_decoded(tone(440.0, 1.0));
        engine.play().unwrap();
        clock.advance(4800);
        engine.stop().unwrap();
        assert_eq!(engine.state(), PlaybackState::Ready);
        assert_eq!(engine.position(), 0.0);
        assert!(clock.advance(480).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_seek_bounds_and_state() {
        let (mut engine, clock) = engine();
        engine.load_decoded(tone(440.0, 1.0));
        assert!(matches!(
            engine.seek(1.5),
            Err(Error::SeekOutOfBounds { .. })
        ));
        assert!(engine.seek(-0.1).is_err());

        // Seek while ready sets the start offset
        engine.seek(0.5).unwrap();
        assert_eq!(engine.state(), PlaybackState::Ready);
        engine.play().unwrap();
        clock.advance(2400);
        assert_relative_eq!(engine.position(), 0.55, epsilon = 1e-9);

        // Seek while paused moves the offset silently
        engine.pause().unwrap();
        engine.seek(0.1).unwrap();
        assert_eq!(engine.state(), PlaybackState::Paused);
        assert_relative_eq!(engine.position(), 0.1, epsilon = 1e-9);
        assert!(clock.advance(480).iter().all(|&s| s == 0.0));

        // Seek while playing keeps playing
        engine.resume().unwrap();
        engine.seek(0.9).unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert_relative_eq!(engine.position(), 0.9, epsilon = 1e-9);
    }

    #[test]
    fn test_resume_retries_once() {
        let (mut engine, clock) = engine();
        engine.load_decoded(tone(440.0, 1.0));
        engine.play().unwrap();
        engine.pause().unwrap();

        clock.fail_next_resumes(1);
        engine.resume().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_resume_fails_after_second_refusal() {
        let (mut engine, clock) = engine();
        engine.load_decoded(tone(440.0, 1.0));
        engine.play().unwrap();
        engine.pause().unwrap();

        clock.fail_next_resumes(2);
        let err = engine.resume().unwrap_err();
        assert!(err.remediation().is_some());
        assert_eq!(engine.state(), PlaybackState::Error);
        assert!(engine.last_error().is_some());

        // Only stop/load recover
        assert!(engine.play().is_err());
        assert!(engine.set_enabled(false).is_err());
        engine.stop().unwrap();
        assert_eq!(engine.state(), PlaybackState::Ready);
        engine.play().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);
    }

    #[test]
    fn test_decode_failure_enters_error() {
        let (mut engine, _clock) = engine();
        let err = engine.load(Path::new("/nonexistent/audio.flac")).unwrap_err();
        assert!(matches!(err, Error::DecodeFailed(_)));
        assert_eq!(engine.state(), PlaybackState::Error);
        engine.stop().unwrap();
        assert_eq!(engine.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_end_of_source_returns_to_ready() {
        let (mut engine, clock) = engine();
        engine.load_decoded(tone(440.0, 0.1));
        engine.play().unwrap();
        clock.advance(4800);
        assert_eq!(engine.refresh(), PlaybackState::Ready);
        assert_eq!(engine.position(), 0.0);
    }

    #[test]
    fn test_playback_claims_output_channels() {
        let leases = DeviceLeases::new();
        let (output, _clock) = OfflineOutput::new(2);
        let mut engine = AudioGraphEngine::new(Box::new(output)).with_leases(leases.clone());
        engine.load_decoded(tone(440.0, 1.0));
        engine.play().unwrap();
        assert!(leases.claim("offline", [1]).is_err());
        engine.stop().unwrap();
        assert!(leases.claim("offline", [1]).is_ok());
    }
}
