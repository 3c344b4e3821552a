//! Session-level policy on top of the engine and the orchestrator
//!
//! [`PlayerController`] owns the EQ edit/toggle state and the position
//! poller of the current playback session. [`CaptureController`] owns the
//! routing tables and which record (or aggregate) is being viewed.

use crate::audio::engine::{EngineStatus, PlaybackState};
use crate::audio::filters::FilterParam;
use crate::audio::handle::PlayerHandle;
use crate::audio::poller::{PeriodicTask, DEFAULT_POLL_INTERVAL};
use crate::capture::cancel::CancelToken;
use crate::capture::orchestrator::CaptureOrchestrator;
use crate::capture::params::{CaptureParameters, CaptureRecord};
use crate::capture::routing::CaptureRouting;
use crate::error::{Error, Result};
use crate::optimizer::{Curve, Optimizer, OptimizerRequest, OptimizerResponse};
use crate::storage::aggregate::{aggregate, AggregateMode, AggregateView};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Playback session controller
pub struct PlayerController {
    handle: PlayerHandle,
    filters: Vec<FilterParam>,
    enabled: bool,
    poll_interval: Duration,
    poller: Option<PeriodicTask>,
    status_tx: Arc<watch::Sender<Option<EngineStatus>>>,
}

impl PlayerController {
    pub fn new(handle: PlayerHandle) -> Self {
        let (status_tx, _) = watch::channel(None);
        Self {
            handle,
            filters: Vec::new(),
            enabled: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poller: None,
            status_tx: Arc::new(status_tx),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn handle(&self) -> &PlayerHandle {
        &self.handle
    }

    /// Latest polled engine status
    pub fn subscribe(&self) -> watch::Receiver<Option<EngineStatus>> {
        self.status_tx.subscribe()
    }

    pub fn filters(&self) -> &[FilterParam] {
        &self.filters
    }

    pub fn eq_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|p| !p.is_finished())
    }

    /// Load a new source; ends the previous session's poller
    pub async fn load(&mut self, path: impl Into<PathBuf>) -> anyhow::Result<()> {
        self.stop_polling();
        self.handle.load(path).await
    }

    pub async fn play(&mut self) -> anyhow::Result<()> {
        self.handle.play().await?;
        self.start_polling();
        Ok(())
    }

    pub async fn pause(&self) -> anyhow::Result<()> {
        self.handle.pause().await
    }

    pub async fn resume(&self) -> anyhow::Result<()> {
        self.handle.resume().await
    }

    pub async fn seek(&self, seconds: f64) -> anyhow::Result<()> {
        self.handle.seek(seconds).await
    }

    pub async fn stop(&mut self) -> anyhow::Result<()> {
        self.stop_polling();
        self.handle.stop().await?;
        let status = self.handle.status().await?;
        self.status_tx.send_replace(Some(status));
        Ok(())
    }

    /// Replace the whole filter set
    ///
    /// Safe in any playback state; a paused engine rebuilds silently.
    pub async fn set_filters(&mut self, filters: Vec<FilterParam>) -> anyhow::Result<()> {
        self.handle.set_filters(filters.clone()).await?;
        self.filters = filters;
        Ok(())
    }

    pub async fn add_filter(&mut self, filter: FilterParam) -> anyhow::Result<()> {
        let mut next = self.filters.clone();
        next.push(filter);
        self.set_filters(next).await
    }

    /// Change one band in place
    pub async fn edit_filter(&mut self, index: usize, filter: FilterParam) -> anyhow::Result<()> {
        let mut next = self.filters.clone();
        let slot = next.get_mut(index).ok_or_else(|| {
            Error::InvalidFilter(format!("no filter at index {index}"))
        })?;
        *slot = filter;
        self.set_filters(next).await
    }

    pub async fn remove_filter(&mut self, index: usize) -> anyhow::Result<()> {
        if index >= self.filters.len() {
            return Err(Error::InvalidFilter(format!("no filter at index {index}")).into());
        }
        let mut next = self.filters.clone();
        next.remove(index);
        self.set_filters(next).await
    }

    /// Bypass or re-enable the EQ; returns the new setting
    pub async fn toggle_eq(&mut self) -> anyhow::Result<bool> {
        let enabled = !self.enabled;
        self.handle.set_enabled(enabled).await?;
        self.enabled = enabled;
        tracing::info!(enabled, "EQ toggled");
        Ok(enabled)
    }

    /// Apply the filters proposed by an optimizer
    pub async fn apply_optimizer_response(
        &mut self,
        response: OptimizerResponse,
    ) -> anyhow::Result<()> {
        let filters = response.into_filters()?;
        self.set_filters(filters).await
    }

    fn start_polling(&mut self) {
        // Replacing the task drops, and so aborts, the previous one
        let handle = self.handle.clone();
        let tx = Arc::clone(&self.status_tx);
        self.poller = Some(PeriodicTask::spawn(self.poll_interval, move || {
            let handle = handle.clone();
            let tx = Arc::clone(&tx);
            async move {
                match handle.status().await {
                    Ok(status) => {
                        let live = matches!(
                            status.state,
                            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Seeking
                        );
                        tx.send_replace(Some(status));
                        live
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Status poll failed, stopping poller");
                        false
                    }
                }
            }
        }));
    }

    fn stop_polling(&mut self) {
        if let Some(task) = self.poller.take() {
            task.cancel();
        }
    }
}

/// What the capture view shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewSelection {
    Single(String),
    Aggregate(AggregateMode),
}

/// Resolved content of the capture view
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureView {
    Record(CaptureRecord),
    Aggregate(AggregateView),
}

impl CaptureView {
    pub fn record(&self) -> &CaptureRecord {
        match self {
            Self::Record(r) => r,
            Self::Aggregate(v) => &v.record,
        }
    }

    /// Records left out of an aggregate
    pub fn skipped(&self) -> usize {
        match self {
            Self::Record(_) => 0,
            Self::Aggregate(v) => v.skipped,
        }
    }
}

/// Measurement session controller
pub struct CaptureController {
    orchestrator: CaptureOrchestrator,
    routing: CaptureRouting,
    selection: Option<ViewSelection>,
}

impl CaptureController {
    /// Identity routing sized to the backend's devices
    pub fn new(orchestrator: CaptureOrchestrator) -> Result<Self> {
        let (inputs, outputs) = orchestrator.channel_counts()?;
        Ok(Self {
            orchestrator,
            routing: CaptureRouting::identity(inputs, outputs),
            selection: None,
        })
    }

    pub fn orchestrator(&self) -> &CaptureOrchestrator {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut CaptureOrchestrator {
        &mut self.orchestrator
    }

    pub fn routing(&self) -> &CaptureRouting {
        &self.routing
    }

    pub fn routing_mut(&mut self) -> &mut CaptureRouting {
        &mut self.routing
    }

    /// Resize routing after the devices changed
    pub fn refresh_devices(&mut self) -> Result<()> {
        let (inputs, outputs) = self.orchestrator.channel_counts()?;
        self.routing.input.update_channel_count(inputs);
        self.routing.output.update_channel_count(outputs);
        Ok(())
    }

    /// Measure and select the new record
    pub fn measure(&mut self, params: &CaptureParameters, cancel: &CancelToken) -> Result<CaptureRecord> {
        let record = self.orchestrator.measure(params, &self.routing, cancel)?;
        self.selection = Some(ViewSelection::Single(record.id.clone()));
        Ok(record)
    }

    pub fn selection(&self) -> Option<&ViewSelection> {
        self.selection.as_ref()
    }

    pub fn select(&mut self, selection: ViewSelection) -> Result<()> {
        if let ViewSelection::Single(id) = &selection {
            if self.orchestrator.storage().get(id).is_none() {
                return Err(Error::NotFound(id.clone()));
            }
        }
        self.selection = Some(selection);
        Ok(())
    }

    /// Resolve the selection against the store
    pub fn view(&self) -> Option<CaptureView> {
        let records = self.orchestrator.storage().list();
        match self.selection.as_ref()? {
            ViewSelection::Single(id) => self
                .orchestrator
                .storage()
                .get(id)
                .cloned()
                .map(CaptureView::Record),
            ViewSelection::Aggregate(mode) => {
                let view = aggregate(records, *mode)?;
                if view.skipped > 0 {
                    tracing::warn!(
                        skipped = view.skipped,
                        included = view.included.len(),
                        "Aggregate left out records with a different grid"
                    );
                }
                Some(CaptureView::Aggregate(view))
            }
        }
    }

    pub fn rename(&mut self, id: &str, name: &str) -> Result<()> {
        self.orchestrator.storage_mut().rename(id, name)
    }

    /// Delete a record, clearing the selection if it was shown
    pub fn delete(&mut self, id: &str) -> Result<()> {
        self.orchestrator.storage_mut().delete(id)?;
        if self.selection == Some(ViewSelection::Single(id.to_string())) {
            self.selection = None;
        }
        Ok(())
    }

    /// Ask `optimizer` for filters correcting the viewed curve
    pub fn optimize_view(
        &self,
        optimizer: &dyn Optimizer,
        num_filters: usize,
    ) -> Result<Vec<FilterParam>> {
        let view = self
            .view()
            .ok_or_else(|| Error::NotFound("no capture selected".to_string()))?;
        let record = view.record();
        let request = OptimizerRequest::new(
            Curve {
                frequencies: record.frequencies.clone(),
                magnitudes: record.smoothed_magnitude.clone(),
            },
            num_filters,
        );
        let response = optimizer.optimize(&request)?;
        if let Some(score) = response.preference_score_after {
            tracing::info!(score, "Optimizer finished");
        }
        response.into_filters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::DecodedAudio;
    use crate::audio::output::{AudioOutput, OfflineOutput};
    use crate::capture::loopback::LoopbackBackend;
    use crate::storage::store::CaptureStorage;

    fn controller() -> CaptureController {
        let orch = CaptureOrchestrator::new(Box::new(LoopbackBackend::new()), CaptureStorage::in_memory());
        CaptureController::new(orch).unwrap()
    }

    fn params() -> CaptureParameters {
        CaptureParameters {
            duration: 0.3,
            ..Default::default()
        }
    }

    #[test]
    fn test_measure_selects_new_record() {
        let mut c = controller();
        let rec = c.measure(&params(), &CancelToken::new()).unwrap();
        assert_eq!(c.selection(), Some(&ViewSelection::Single(rec.id.clone())));
        assert_eq!(c.view().unwrap().record().id, rec.id);
    }

    #[test]
    fn test_aggregate_view_reports_skipped() {
        let mut c = controller();
        c.measure(&params(), &CancelToken::new()).unwrap();
        let mut odd = c.measure(&params(), &CancelToken::new()).unwrap();
        odd.id = String::new();
        odd.frequencies.truncate(10);
        odd.raw_magnitude.truncate(10);
        odd.smoothed_magnitude.truncate(10);
        odd.raw_phase = None;
        odd.smoothed_phase = None;
        c.orchestrator_mut().storage_mut().save(odd).unwrap();

        c.select(ViewSelection::Aggregate(AggregateMode::Average)).unwrap();
        let view = c.view().unwrap();
        assert_eq!(view.skipped(), 1);
        assert_eq!(view.record().name, "Average of all");
    }

    #[test]
    fn test_delete_clears_selection() {
        let mut c = controller();
        let rec = c.measure(&params(), &CancelToken::new()).unwrap();
        c.delete(&rec.id).unwrap();
        assert!(c.selection().is_none());
        assert!(matches!(c.select(ViewSelection::Single(rec.id)), Err(Error::NotFound(_))));
    }

    struct FixedOptimizer;

    impl Optimizer for FixedOptimizer {
        fn optimize(&self, request: &OptimizerRequest) -> Result<OptimizerResponse> {
            assert_eq!(request.num_filters, 1);
            Ok(OptimizerResponse {
                success: true,
                filter_params: vec![1000.0, 2.0, -3.0],
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_optimize_view_returns_filters() {
        let mut c = controller();
        assert!(c.optimize_view(&FixedOptimizer, 1).is_err());
        c.measure(&params(), &CancelToken::new()).unwrap();
        let filters = c.optimize_view(&FixedOptimizer, 1).unwrap();
        assert_eq!(filters, vec![FilterParam::peaking(1000.0, 2.0, -3.0)]);
    }

    #[test]
    fn test_routing_follows_device_resize() {
        let mut c = controller();
        c.routing_mut().output.set_assignment(0, 1).unwrap();
        c.refresh_devices().unwrap();
        assert_eq!(c.routing().output.assignments(), &[1, 1]);
    }

    fn player() -> PlayerController {
        let (output, _clock) = OfflineOutput::new(1);
        let handle =
            PlayerHandle::spawn(move || Ok(Box::new(output) as Box<dyn AudioOutput>)).unwrap();
        PlayerController::new(handle).with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_poller_follows_session() {
        let mut p = player();
        p.handle()
            .load_decoded(DecodedAudio::from_interleaved(vec![0.1; 48000], 48000, 1))
            .await
            .unwrap();
        let mut rx = p.subscribe();

        p.play().await.unwrap();
        assert!(p.is_polling());
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().as_ref().map(|s| s.state),
            Some(PlaybackState::Playing)
        );

        p.stop().await.unwrap();
        assert!(!p.is_polling());
        assert_eq!(
            rx.borrow().as_ref().map(|s| s.state),
            Some(PlaybackState::Ready)
        );
    }

    #[tokio::test]
    async fn test_eq_edits_and_toggle() {
        let mut p = player();
        p.add_filter(FilterParam::peaking(1000.0, 1.0, 6.0)).await.unwrap();
        p.edit_filter(0, FilterParam::peaking(2000.0, 1.0, 3.0)).await.unwrap();
        assert!(p.edit_filter(4, FilterParam::peaking(100.0, 1.0, 1.0)).await.is_err());
        assert_eq!(p.filters()[0].frequency, 2000.0);

        assert!(!p.toggle_eq().await.unwrap());
        let status = p.handle().status().await.unwrap();
        assert!(!status.filters_enabled);
        assert_eq!(status.filters.len(), 1);

        let bad = FilterParam::peaking(1000.0, -1.0, 0.0);
        assert!(p.add_filter(bad).await.is_err());
        assert_eq!(p.filters().len(), 1);

        p.remove_filter(0).await.unwrap();
        assert!(p.filters().is_empty());
    }
}
