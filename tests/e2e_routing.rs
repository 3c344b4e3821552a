//! E2E tests for channel routing

use roomeq::{
    CancelToken, CaptureController, CaptureOrchestrator, CaptureParameters, CaptureStorage, Error,
    LoopbackBackend, RoutingMatrix,
};

#[test]
fn test_out_of_range_assignment_never_mutates() {
    let mut matrix = RoutingMatrix::create(8);
    matrix.set_assignment(2, 7).unwrap();
    let snapshot = matrix.clone();

    for physical in [8, 9, 64, usize::MAX] {
        let err = matrix.set_assignment(2, physical).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { channel_count: 8, .. }));
    }
    assert_eq!(matrix, snapshot);
}

#[test]
fn test_identical_call_sequences_give_identical_tables() {
    let build = || {
        let mut m = RoutingMatrix::create(2);
        m.update_channel_count(6);
        m.set_assignment(5, 0).unwrap();
        m.set_assignment(0, 5).unwrap();
        m.update_channel_count(4);
        m
    };
    let a = build();
    assert_eq!(a, build());
    assert_eq!(a.assignments(), &[0, 1, 2, 3]);
}

#[test]
fn test_controller_routes_stimulus_to_assigned_channel() {
    let backend = LoopbackBackend::new().with_channels(1, 4);
    let orch = CaptureOrchestrator::new(Box::new(backend), CaptureStorage::in_memory());
    let mut controller = CaptureController::new(orch).unwrap();
    assert_eq!(controller.routing().output.channel_count(), 4);
    assert_eq!(controller.routing().input.channel_count(), 1);

    controller.routing_mut().output.set_assignment(1, 3).unwrap();
    let params = CaptureParameters {
        output_channel: 1,
        duration: 0.5,
        ..Default::default()
    };
    let record = controller.measure(&params, &CancelToken::new()).unwrap();
    assert_eq!(record.output_channel, 1);
}

#[test]
fn test_routing_table_larger_than_device_is_rejected() {
    let backend = LoopbackBackend::new().with_channels(2, 2);
    let orch = CaptureOrchestrator::new(Box::new(backend), CaptureStorage::in_memory());
    let mut controller = CaptureController::new(orch).unwrap();

    controller.routing_mut().output.update_channel_count(4);
    controller.routing_mut().output.set_assignment(0, 3).unwrap();
    let params = CaptureParameters {
        duration: 0.5,
        ..Default::default()
    };
    assert!(matches!(
        controller.measure(&params, &CancelToken::new()),
        Err(Error::InvalidRouting(_))
    ));

    // Re-syncing with the device clamps the table back into range
    controller.refresh_devices().unwrap();
    controller.measure(&params, &CancelToken::new()).unwrap();
}
