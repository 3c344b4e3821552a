//! One full measurement cycle: configure, play/record, analyze, persist

use crate::audio::analyzer::ResponseAnalyzer;
use crate::audio::lease::{DeviceLeases, Lease};
use crate::audio::signal::SignalGenerator;
use crate::capture::backend::{CaptureBackend, CapturePlan};
use crate::capture::calibration::CalibrationCurve;
use crate::capture::cancel::CancelToken;
use crate::capture::params::{AnalysisSettings, CaptureParameters, CaptureRecord, Curves};
use crate::capture::routing::CaptureRouting;
use crate::error::{Error, Result};
use crate::events::{ProgressEvent, StageStatus};
use crate::math::{
    db_to_linear, interp_log_freq_many, log_frequency_grid, smooth_octave, smooth_phase_octave,
    unwrap_phase_deg, wrap_phase_deg,
};
use crate::storage::store::CaptureStorage;
use crossbeam_channel::Sender;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Slack added to the timed wait so the tail is fully recorded
const WAIT_MARGIN: Duration = Duration::from_millis(100);

/// Measurement lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    Idle,
    Configuring,
    Measuring,
    Analyzing,
    Done,
    Cancelled,
    Error,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Runs measurements against one capture backend and stores the results
///
/// `measure` takes `&mut self`, so an orchestrator never has two
/// measurements in flight.
pub struct CaptureOrchestrator {
    backend: Box<dyn CaptureBackend>,
    storage: CaptureStorage,
    leases: DeviceLeases,
    calibration: Option<CalibrationCurve>,
    settings: AnalysisSettings,
    progress: Option<Sender<ProgressEvent>>,
    state: CaptureState,
    last_error: Option<String>,
}

impl CaptureOrchestrator {
    pub fn new(backend: Box<dyn CaptureBackend>, storage: CaptureStorage) -> Self {
        Self {
            backend,
            storage,
            leases: DeviceLeases::new(),
            calibration: None,
            settings: AnalysisSettings::default(),
            progress: None,
            state: CaptureState::Idle,
            last_error: None,
        }
    }

    /// Share channel claims with a playback engine
    pub fn with_leases(mut self, leases: DeviceLeases) -> Self {
        self.leases = leases;
        self
    }

    pub fn with_settings(mut self, settings: AnalysisSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Send stage events to `tx`
    pub fn with_progress(mut self, tx: Sender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn settings(&self) -> AnalysisSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: AnalysisSettings) {
        self.settings = settings;
    }

    pub fn calibration(&self) -> Option<&CalibrationCurve> {
        self.calibration.as_ref()
    }

    /// Replace the active calibration curve
    pub fn set_calibration(&mut self, curve: CalibrationCurve) {
        tracing::info!(points = curve.len(), "Calibration set");
        self.calibration = Some(curve);
    }

    pub fn clear_calibration(&mut self) {
        self.calibration = None;
    }

    pub fn storage(&self) -> &CaptureStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut CaptureStorage {
        &mut self.storage
    }

    /// `(input, output)` channel counts of the backend's devices
    pub fn channel_counts(&self) -> Result<(usize, usize)> {
        self.backend.channel_counts()
    }

    fn emit(&self, stage: &str, status: StageStatus, detail: Option<String>) {
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(ProgressEvent::Stage {
                name: stage.to_string(),
                status,
                detail,
            });
        }
    }

    fn enter(&mut self, state: CaptureState) {
        tracing::debug!(from = ?self.state, to = ?state, "Capture state");
        self.state = state;
    }

    /// Run a measurement and persist the analyzed record
    ///
    /// Returns [`Error::Cancelled`] when `cancel` fires before analysis; in
    /// that case nothing is stored and the devices are released.
    pub fn measure(
        &mut self,
        params: &CaptureParameters,
        routing: &CaptureRouting,
        cancel: &CancelToken,
    ) -> Result<CaptureRecord> {
        self.last_error = None;
        let result = self.run(params, routing, cancel);
        match &result {
            Ok(record) => {
                self.enter(CaptureState::Done);
                self.emit("measure", StageStatus::Completed, Some(record.id.clone()));
                tracing::info!(id = %record.id, name = %record.name, "Measurement stored");
            }
            Err(Error::Cancelled) => {
                self.enter(CaptureState::Cancelled);
                self.emit("measure", StageStatus::Failed, Some("cancelled".to_string()));
                tracing::info!("Measurement cancelled");
            }
            Err(e) => {
                self.enter(CaptureState::Error);
                self.last_error = Some(e.to_string());
                self.emit("measure", StageStatus::Failed, Some(e.to_string()));
                tracing::warn!(error = %e, "Measurement failed");
            }
        }
        result
    }

    fn run(
        &mut self,
        params: &CaptureParameters,
        routing: &CaptureRouting,
        cancel: &CancelToken,
    ) -> Result<CaptureRecord> {
        self.enter(CaptureState::Configuring);
        self.emit("configure", StageStatus::Started, None);
        params.validate()?;
        self.settings.validate()?;

        let (in_channels, out_channels) = self.backend.channel_counts()?;
        routing.input.validate_against(in_channels)?;
        routing.output.validate_against(out_channels)?;
        let out_physical = routing
            .output
            .get_assignment(params.output_channel)
            .ok_or_else(|| {
                Error::InvalidRouting(format!(
                    "output channel {} is not routed ({} logical channels)",
                    params.output_channel,
                    routing.output.channel_count()
                ))
            })?;
        let in_physical = routing.input.get_assignment(0).ok_or_else(|| {
            Error::InvalidRouting("input routing has no channels".to_string())
        })?;

        let output_name = self.backend.output_device_name();
        let input_name = self.backend.input_device_name();
        let _leases = self.claim(&output_name, out_physical, &input_name, in_physical)?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let generator =
            SignalGenerator::new(params.sample_rate).with_output_gain_db(params.output_gain);
        let stimulus = Arc::new(generator.generate(params.signal_type, params.duration));
        self.emit("configure", StageStatus::Completed, None);

        self.enter(CaptureState::Measuring);
        self.emit("measure", StageStatus::Started, None);
        tracing::info!(
            signal = %params.signal_type,
            duration = params.duration,
            sample_rate = params.sample_rate,
            output = %output_name,
            output_channel = out_physical,
            input = %input_name,
            input_channel = in_physical,
            "Measurement started"
        );

        let active = self.backend.begin(CapturePlan {
            stimulus: Arc::clone(&stimulus),
            sample_rate: params.sample_rate,
            output_channels: vec![out_physical],
            input_channel: in_physical,
        })?;

        let wait = Duration::from_secs_f64(stimulus.len() as f64 / params.sample_rate as f64)
            + WAIT_MARGIN;
        if cancel.wait_timeout(wait) {
            active.abort();
            return Err(Error::Cancelled);
        }
        let mut recording = active.finish()?;

        self.enter(CaptureState::Analyzing);
        self.emit("analyze", StageStatus::Started, None);
        let input_gain = db_to_linear(params.input_gain) as f32;
        if input_gain != 1.0 {
            for s in &mut recording {
                *s *= input_gain;
            }
        }
        let curves = self.analyze(params.sample_rate, &stimulus, &recording)?;
        self.emit("analyze", StageStatus::Completed, None);

        let name = format!("Measurement {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
        let record = CaptureRecord::new(name, params, &output_name, curves);
        self.storage.save(record)
    }

    fn claim(
        &self,
        output: &str,
        out_channel: usize,
        input: &str,
        in_channel: usize,
    ) -> Result<(Lease, Lease)> {
        let out = self.leases.claim(output, [out_channel as u16])?;
        // Input channels live in their own namespace on duplex devices
        let inp = self
            .leases
            .claim(&format!("{input}#input"), [in_channel as u16])?;
        Ok((out, inp))
    }

    /// Reduce a recording to smoothed, calibrated curves on the log grid
    fn analyze(&self, sample_rate: u32, stimulus: &[f32], recording: &[f32]) -> Result<Curves> {
        let raw = ResponseAnalyzer::new(sample_rate).analyze(stimulus, recording)?;
        if raw.is_empty() {
            return Err(Error::AnalysisFailed(
                "no excited frequency bins in the capture".to_string(),
            ));
        }

        let top = crate::MAX_FREQUENCY_HZ.min(sample_rate as f64 / 2.0);
        let grid = log_frequency_grid(crate::MIN_FREQUENCY_HZ, top, self.settings.resolution);
        let fraction = self.settings.octave_fraction;

        let mut raw_magnitude = interp_log_freq_many(&raw.frequencies, &raw.magnitude_db, &grid);
        let mut smoothed_magnitude =
            smooth_octave(&raw.frequencies, &raw.magnitude_db, &grid, fraction);

        let unwrapped = unwrap_phase_deg(&raw.phase_deg);
        let raw_phase = interp_log_freq_many(&raw.frequencies, &unwrapped, &grid)
            .into_iter()
            .map(wrap_phase_deg)
            .collect();
        let smoothed_phase = smooth_phase_octave(&raw.frequencies, &raw.phase_deg, &grid, fraction);

        if let Some(cal) = &self.calibration {
            cal.apply(&grid, &mut raw_magnitude);
            cal.apply(&grid, &mut smoothed_magnitude);
        }

        tracing::debug!(
            bins = raw.len(),
            points = grid.len(),
            lag_ms = raw.lag_ms(sample_rate),
            "Response analyzed"
        );

        Ok(Curves {
            frequencies: grid,
            raw_magnitude,
            smoothed_magnitude,
            raw_phase: Some(raw_phase),
            smoothed_phase: Some(smoothed_phase),
        })
    }
}
