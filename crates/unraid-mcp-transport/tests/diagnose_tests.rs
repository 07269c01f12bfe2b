//! Diagnostic probe tests.

mod common;

use std::time::Duration;

use common::{MockServer, Script};
use unraid_mcp_transport::{
    DiagnosticProbe, ErrorKind, NetworkFailure, Transport, TransportConfig, WireProtocol,
};

#[tokio::test]
async fn test_probe_reports_event() {
    let server = MockServer::start(Script::default()).await;
    let config = server.config().api_key("secret-key").build().unwrap();
    let probe = DiagnosticProbe::new(&config).unwrap();

    let report = probe.run().await;

    assert!(report.reachable, "{report}");
    assert!(report.acknowledged);
    assert!(report.received_event);
    assert_eq!(report.protocol, Some(WireProtocol::TransportWs));
    assert!(report.error.is_none());
    assert!(report.elapsed < probe.bound());

    // The probe cleans up after itself.
    assert_eq!(server.subscribed_ids(0), vec!["diagnose".to_string()]);
    assert_eq!(server.frames_of(0, "complete").len(), 1);
}

#[tokio::test]
async fn test_quiet_subscription_is_still_reachable() {
    let server = MockServer::start(Script {
        tick: None,
        ..Script::default()
    })
    .await;
    let config = server
        .config()
        .probe_window(Duration::from_millis(300))
        .build()
        .unwrap();

    let report = DiagnosticProbe::new(&config).unwrap().run().await;

    assert!(report.reachable);
    assert!(!report.received_event);
    assert!(report.detail.contains("accepted"));
}

#[tokio::test]
async fn test_rejected_probe_is_graphql_error() {
    let server = MockServer::start(Script::default()).await;
    let config = server.config().build().unwrap();

    let report = DiagnosticProbe::new(&config)
        .unwrap()
        .document("subscription { bogus }")
        .run()
        .await;

    assert!(!report.reachable);
    assert!(report.acknowledged);
    assert_eq!(report.error.map(|e| e.kind()), Some(ErrorKind::GraphQL));
}

#[tokio::test]
async fn test_missing_ack_times_out_within_bound() {
    let server = MockServer::start(Script {
        ack: false,
        ..Script::default()
    })
    .await;
    let config = server
        .config()
        .handshake_timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    let probe = DiagnosticProbe::new(&config).unwrap();

    let report = probe.run().await;

    assert!(!report.reachable);
    assert!(!report.acknowledged);
    assert_eq!(report.protocol, Some(WireProtocol::TransportWs));
    assert_eq!(
        report.error.as_ref().map(|e| e.kind()),
        Some(ErrorKind::HandshakeTimeout)
    );
    assert!(report.elapsed >= Duration::from_secs(1));
    assert!(report.elapsed < probe.bound());
}

#[tokio::test]
async fn test_nothing_listening_is_unreachable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = TransportConfig::builder(format!("http://127.0.0.1:{port}/graphql"))
        .build()
        .unwrap();
    let report = DiagnosticProbe::new(&config).unwrap().run().await;

    assert!(!report.reachable);
    assert_eq!(
        report.error.map(|e| e.kind()),
        Some(ErrorKind::Network(NetworkFailure::Unreachable))
    );
}

#[tokio::test]
async fn test_transport_diagnose_is_independent_of_manager() {
    let server = MockServer::start(Script::default()).await;
    let transport = Transport::new(server.config().build().unwrap()).unwrap();

    let report = transport
        .diagnose_with(
            "subscription { notificationAdded { id } }",
            Duration::from_secs(1),
        )
        .await;

    assert!(report.reachable);
    // The probe's connection is not the manager's; the manager stays idle.
    assert!(transport.status().subscriptions.is_empty());
    assert_eq!(server.connections(), 1);

    transport.shutdown().await;
}
