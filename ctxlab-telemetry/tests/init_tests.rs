use ctxlab_telemetry::{TelemetryError, init_json, init_telemetry};

// One test per binary: the subscriber is process-global.
#[test]
fn second_initialisation_is_an_error_not_a_panic() {
    init_telemetry("init-test").expect("first initialisation succeeds");
    tracing::info!(attempt = 1, "subscriber installed");

    let err = init_json("init-test").unwrap_err();
    assert!(matches!(err, TelemetryError::AlreadyInitialized(_)));
    assert!(init_telemetry("init-test").is_err());
}
