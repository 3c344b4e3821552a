//! E2E tests for the measurement pipeline
//!
//! Uses the simulated loopback device pair: the recorded signal is the
//! stimulus delayed and optionally filtered, so the measured response is
//! known in advance.

use roomeq::audio::device;
use roomeq::audio::filters::chain_response_db;
use roomeq::audio::lease::DeviceLeases;
use roomeq::audio::output::OfflineOutput;
use roomeq::math::interp_log_freq;
use roomeq::{
    AudioGraphEngine, CancelToken, CaptureOrchestrator, CaptureParameters, CaptureRouting,
    CaptureState, CaptureStorage, Error, FilterParam, LoopbackBackend, SignalType,
};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

fn params(duration: f64) -> CaptureParameters {
    CaptureParameters {
        duration,
        ..Default::default()
    }
}

#[test]
fn test_cancel_during_sweep_stores_nothing_and_releases_devices() {
    let backend = LoopbackBackend::new();
    let handles = backend.handle_counter();
    let dir = tempfile::tempdir().unwrap();
    let storage = CaptureStorage::open(dir.path()).unwrap();
    let mut orch = CaptureOrchestrator::new(Box::new(backend), storage);

    let cancel = CancelToken::new();
    let remote = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        remote.cancel();
    });

    let start = Instant::now();
    let result = orch.measure(&params(10.0), &CaptureRouting::identity(2, 2), &cancel);
    canceller.join().unwrap();

    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(orch.state(), CaptureState::Cancelled);
    assert!(orch.storage().list().is_empty());
    assert_eq!(handles.load(Ordering::SeqCst), 0);

    // Nothing reached the disk either
    let reopened = CaptureStorage::open(dir.path()).unwrap();
    assert!(reopened.is_empty());

    // Device enumeration still works (may be empty on machines without audio)
    let _ = device::list_devices();
}

#[test]
fn test_measured_response_matches_simulated_eq() {
    let room = vec![
        FilterParam::peaking(200.0, 2.0, -6.0),
        FilterParam::peaking(3000.0, 1.0, 4.0),
    ];
    let backend = LoopbackBackend::new().with_filters(room.clone());
    let mut orch = CaptureOrchestrator::new(Box::new(backend), CaptureStorage::in_memory());

    let record = orch
        .measure(&params(2.0), &CaptureRouting::identity(2, 2), &CancelToken::new())
        .unwrap();
    assert_eq!(orch.state(), CaptureState::Done);
    record.check_lengths().unwrap();
    assert_eq!(record.frequencies.first().copied(), Some(20.0));
    assert_eq!(record.frequencies.last().copied(), Some(20000.0));

    let probes = [200.0, 1000.0, 3000.0];
    let expected = chain_response_db(&room, &probes, 48000).unwrap();
    for (f, want) in probes.iter().zip(expected) {
        let got = interp_log_freq(&record.frequencies, &record.raw_magnitude, *f);
        assert!((got - want).abs() < 1.5, "{f} Hz: measured {got}, expected {want}");
    }
}

#[test]
fn test_noise_stimuli_share_the_pipeline() {
    for signal in [SignalType::WhiteNoise, SignalType::PinkNoise, SignalType::Mls] {
        let mut orch =
            CaptureOrchestrator::new(Box::new(LoopbackBackend::new()), CaptureStorage::in_memory());
        let p = CaptureParameters {
            signal_type: signal,
            ..params(1.0)
        };
        let record = orch
            .measure(&p, &CaptureRouting::identity(2, 2), &CancelToken::new())
            .unwrap();
        assert_eq!(record.signal_type, signal);
        let at_1k = interp_log_freq(&record.frequencies, &record.smoothed_magnitude, 1000.0);
        assert!(at_1k.abs() < 1.0, "{signal}: {at_1k} dB at 1 kHz");
    }
}

#[test]
fn test_gains_shift_the_measured_level() {
    let mut orch = CaptureOrchestrator::new(
        Box::new(LoopbackBackend::new().with_gain_db(-20.0)),
        CaptureStorage::in_memory(),
    );
    let p = CaptureParameters {
        input_gain: 8.0,
        output_gain: -3.0,
        ..params(1.0)
    };
    let record = orch
        .measure(&p, &CaptureRouting::identity(2, 2), &CancelToken::new())
        .unwrap();
    // Output gain scales the reference too; only path and input gain remain
    let at_1k = interp_log_freq(&record.frequencies, &record.smoothed_magnitude, 1000.0);
    assert!((at_1k + 12.0).abs() < 1.0, "{at_1k}");
}

#[test]
fn test_capture_conflicts_with_playback_on_same_channels() {
    let leases = DeviceLeases::new();
    let (output, clock) = OfflineOutput::new(2);
    let mut engine = AudioGraphEngine::new(Box::new(output)).with_leases(leases.clone());
    engine.load_decoded(roomeq::audio::decoder::DecodedAudio::from_interleaved(
        vec![0.0; 96000],
        48000,
        2,
    ));
    engine.play().unwrap();
    clock.advance(480);

    let backend = LoopbackBackend::new().with_device_name("offline");
    let mut orch = CaptureOrchestrator::new(Box::new(backend), CaptureStorage::in_memory())
        .with_leases(leases.clone());
    let result = orch.measure(&params(0.5), &CaptureRouting::identity(2, 2), &CancelToken::new());
    assert!(matches!(result, Err(Error::DeviceConflict { .. })));
    assert_eq!(orch.state(), CaptureState::Error);

    engine.stop().unwrap();
    orch.measure(&params(0.5), &CaptureRouting::identity(2, 2), &CancelToken::new())
        .unwrap();
}

#[test]
fn test_out_of_range_routing_fails_before_playing() {
    let backend = LoopbackBackend::new().with_channels(2, 2);
    let handles = backend.handle_counter();
    let mut orch = CaptureOrchestrator::new(Box::new(backend), CaptureStorage::in_memory());
    let mut routing = CaptureRouting::identity(4, 2);
    routing.input.set_assignment(0, 3).unwrap();

    let result = orch.measure(&params(0.5), &routing, &CancelToken::new());
    assert!(matches!(result, Err(Error::InvalidRouting(_))));
    assert_eq!(handles.load(Ordering::SeqCst), 0);
}
