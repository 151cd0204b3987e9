use crate::infra::*;
use portico_services::error::SessionError;
use portico_services::transport::PeerTransport;
use std::time::Instant;

/// Establishing the same identity twice replaces the first session: the old
/// connection is torn down and exactly one session remains.
#[test]
fn establish_twice_replaces_the_session() {
    let hub = Hub::new();
    let gw = gateway(&hub);

    gw.registry.establish("dev-a", "pw").unwrap();
    gw.registry.establish("dev-a", "pw").unwrap();

    assert!(gw.registry.is_connected("dev-a"));
    assert_eq!(gw.registry.connection_list().len(), 1);

    let opened = gw.factory.opened();
    assert_eq!(opened.len(), 2);
    assert!(!opened[0].is_connected(), "first connection disconnected");
    assert!(opened[1].is_connected());

    gw.registry.terminate_all();
}

/// A destination that is not on the roster refuses the send outright; the
/// caller gets the answer immediately and never sits in a correlation wait.
#[test]
fn send_to_peer_outside_the_roster_fails_fast() {
    let hub = Hub::new();
    let gw = gateway(&hub);
    gw.registry.establish("dev-a", "pw").unwrap();
    let session = gw.registry.session("dev-a").unwrap();

    let started = Instant::now();
    let result = session.remote_property("dev-b", "temp", Default::default());
    assert_eq!(
        result,
        Err(SessionError::UnreachablePeer("dev-b".to_string()))
    );
    assert!(
        started.elapsed() < std::time::Duration::from_millis(500),
        "refusal must not wait out a response timeout"
    );

    gw.registry.terminate_all();
}

/// Full request/response round trip between two gateways on the hub.
#[test]
fn property_read_round_trips_between_gateways() {
    let hub = Hub::new();
    let gw_a = gateway(&hub);
    let gw_b = gateway(&hub);

    gw_a.registry.establish("dev-a", "pw-a").unwrap();
    gw_b.registry.establish("dev-b", "pw-b").unwrap();

    let session = gw_a.registry.session("dev-a").unwrap();
    let response = session
        .remote_property("dev-b", "temp", Default::default())
        .expect("response within the timeout");

    assert!(!response.error);
    assert_eq!(response.source_oid, "dev-b");
    assert_eq!(response.destination_oid, "dev-a");
    let body: serde_json::Value = serde_json::from_str(response.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["pid"], "temp");
    assert_eq!(gw_b.adapter.calls("get_property"), 1);
    assert_eq!(gw_a.adapter.calls("get_property"), 0);

    gw_a.registry.terminate_all();
    gw_b.registry.terminate_all();
}

/// The remote adapter failing turns into an error response for the caller,
/// not a timeout and not a crash of the remote session.
#[test]
fn remote_adapter_failure_surfaces_as_error_response() {
    let hub = Hub::new();
    let gw_a = gateway(&hub);
    let gw_b = gateway(&hub);

    gw_a.registry.establish("dev-a", "pw").unwrap();
    gw_b.registry.establish("dev-b", "pw").unwrap();
    gw_b.adapter.start_failing();

    let session = gw_a.registry.session("dev-a").unwrap();
    let response = session
        .remote_property("dev-b", "temp", Default::default())
        .expect("an error response still arrives");
    assert!(response.error);
    assert_eq!(response.status_code, 503);

    // the remote session survived and keeps serving
    assert!(gw_b.registry.is_connected("dev-b"));

    gw_a.registry.terminate_all();
    gw_b.registry.terminate_all();
}

/// Credentials are checked per inbound call against the stored secret.
#[test]
fn credential_verification_against_the_directory() {
    let hub = Hub::new();
    let gw = gateway(&hub);
    gw.registry.establish("dev-a", "pw").unwrap();

    assert!(gw.registry.verify_credential("dev-a", "pw"));
    assert!(!gw.registry.verify_credential("dev-a", "other"));
    assert!(!gw.registry.verify_credential("dev-b", "pw"));

    gw.registry.terminate_all();
}

/// Terminating without destroying keeps the directory entry around for a
/// later reconnect.
#[test]
fn terminate_without_destroy_allows_reestablish() {
    let hub = Hub::new();
    let gw = gateway(&hub);
    gw.registry.establish("dev-a", "pw").unwrap();

    gw.registry.terminate("dev-a", false);
    assert!(!gw.registry.is_connected("dev-a"));
    assert_eq!(gw.registry.connection_list().len(), 1);

    gw.registry.establish("dev-a", "pw").unwrap();
    assert!(gw.registry.is_connected("dev-a"));

    gw.registry.terminate_all();
    assert!(gw.registry.connection_list().is_empty());
}
