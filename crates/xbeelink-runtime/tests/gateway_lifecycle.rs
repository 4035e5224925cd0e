//! Integration tests for discovery, the connection lifecycle, and the relay
//! channel, driving the full runtime over the scripted mock radio.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use xbeelink_core::transport::mock::{LinkScript, MockCall, MockRadio};
use xbeelink_core::{
    ConnectionState, GatewayConfig, GatewayError, GatewayEvent, PeripheralId, PriorityLevel,
    RelayInterface,
};
use xbeelink_runtime::{GatewayHandle, GatewayRuntime};

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

async fn start_gateway(
    config: GatewayConfig,
) -> (GatewayHandle, MockRadio, mpsc::Receiver<GatewayEvent>) {
    let radio = MockRadio::new();
    let mut runtime = GatewayRuntime::new(Box::new(radio.clone()), config).unwrap();
    let gateway = runtime.handle();
    runtime.start().unwrap();
    let events = gateway.subscribe().await;
    (gateway, radio, events)
}

fn id(address: &str) -> PeripheralId {
    PeripheralId::new(address).unwrap()
}

async fn next_event(events: &mut mpsc::Receiver<GatewayEvent>) -> GatewayEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for gateway event")
        .expect("gateway event stream closed")
}

/// Assert the next events are exactly the given state changes for `identity`
async fn expect_states(
    events: &mut mpsc::Receiver<GatewayEvent>,
    identity: &PeripheralId,
    expected: &[(&str, &str)],
) {
    for (expected_old, expected_new) in expected {
        match next_event(events).await {
            GatewayEvent::ConnectionStateChanged {
                identity: event_identity,
                old_state,
                new_state,
            } => {
                assert_eq!(&event_identity, identity);
                assert_eq!(old_state.name(), *expected_old);
                assert_eq!(new_state.name(), *expected_new);
            }
            other => panic!("expected state change, got {other:?}"),
        }
    }
}

/// Discover a peripheral and consume its `PeripheralDiscovered` event
async fn discover(
    radio: &MockRadio,
    events: &mut mpsc::Receiver<GatewayEvent>,
    address: &str,
    name: &str,
) {
    radio.discover(address, Some(name), -42).await.unwrap();
    match next_event(events).await {
        GatewayEvent::PeripheralDiscovered { record } => {
            assert_eq!(record.identity.as_str(), address);
        }
        other => panic!("expected discovery, got {other:?}"),
    }
}

// ----------------------------------------------------------------------------
// Discovery
// ----------------------------------------------------------------------------

#[tokio::test]
async fn discovery_is_deduplicated_and_filtered() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;

    gateway.start_discovery().await.unwrap();
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;

    let snapshot = gateway.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].identity.as_str(), "A1:B2");
    assert_eq!(snapshot[0].display_name, "XBee-04");
    assert_eq!(snapshot[0].connection_state, ConnectionState::Disconnected);

    // Same identity under a different name: idempotent, no event.
    radio
        .discover("A1:B2", Some("XBee-renamed"), -42)
        .await
        .unwrap();
    // A peripheral that fails the filter never appears.
    radio.discover("C3:D4", Some("FitnessTracker"), -60).await.unwrap();
    // A nameless peripheral gets the sentinel, which fails the default filter.
    radio.discover("E5:F6", None, -70).await.unwrap();

    gateway.stop_discovery().await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        GatewayEvent::DiscoveryStopped
    ));

    let snapshot = gateway.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].display_name, "XBee-04");

    let calls = radio.calls();
    assert!(matches!(calls[0], MockCall::StartScan));
    assert!(matches!(calls[1], MockCall::StopScan));
}

#[tokio::test]
async fn rediscovery_refreshes_signal_strength() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;

    let mut catalog = gateway.watch_catalog();
    radio.discover("A1:B2", Some("XBee-04"), -80).await.unwrap();
    timeout(Duration::from_secs(2), catalog.changed())
        .await
        .expect("catalog update timed out")
        .unwrap();
    assert_eq!(catalog.borrow()[0].signal_strength, -80);
}

// ----------------------------------------------------------------------------
// Connection Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn credentialed_connect_walks_the_full_lifecycle() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let identity = id("A1:B2");
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;

    gateway.connect(&identity, Some("1234")).await.unwrap();
    expect_states(
        &mut events,
        &identity,
        &[
            ("Disconnected", "Connecting"),
            ("Connecting", "Authenticating"),
            ("Authenticating", "Connected"),
        ],
    )
    .await;
    assert_eq!(gateway.connected_peripherals().to_vec(), vec![identity.clone()]);
    assert!(radio.open_links().contains(&identity));

    gateway.disconnect(&identity).await.unwrap();
    expect_states(
        &mut events,
        &identity,
        &[
            ("Connected", "Disconnecting"),
            ("Disconnecting", "Disconnected"),
        ],
    )
    .await;
    assert!(gateway.connected_peripherals().is_empty());
    assert!(radio.open_links().is_empty());
}

#[tokio::test]
async fn credential_less_connect_skips_authentication() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let identity = id("A1:B2");
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;

    gateway.connect(&identity, None).await.unwrap();
    expect_states(
        &mut events,
        &identity,
        &[
            ("Disconnected", "Connecting"),
            ("Connecting", "Connected"),
        ],
    )
    .await;
}

#[tokio::test]
async fn connect_failure_parks_the_link_in_failed_until_reset() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let identity = id("A1:B2");
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;

    radio.script_link(identity.clone(), LinkScript::AuthFailure);
    let err = gateway.connect(&identity, Some("wrong")).await.unwrap_err();
    assert!(matches!(err, GatewayError::Transport(_)));
    expect_states(
        &mut events,
        &identity,
        &[("Disconnected", "Connecting"), ("Connecting", "Failed")],
    )
    .await;

    // The next attempt resets the failed link and proceeds.
    radio.script_link(identity.clone(), LinkScript::Open);
    gateway.connect(&identity, Some("1234")).await.unwrap();
    expect_states(
        &mut events,
        &identity,
        &[
            ("Failed", "Disconnected"),
            ("Disconnected", "Connecting"),
            ("Connecting", "Authenticating"),
            ("Authenticating", "Connected"),
        ],
    )
    .await;
}

#[tokio::test]
async fn concurrent_mutations_are_rejected_not_queued() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let identity = id("A1:B2");
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;

    radio.script_link(identity.clone(), LinkScript::Hang);
    let hung_gateway = gateway.clone();
    let hung_identity = identity.clone();
    let hung = tokio::spawn(async move { hung_gateway.connect(&hung_identity, None).await });

    // Wait until the first connect is observably in flight.
    expect_states(&mut events, &identity, &[("Disconnected", "Connecting")]).await;

    let err = gateway.connect(&identity, None).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidStateTransition { .. }));
    let err = gateway.disconnect(&identity).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidStateTransition { .. }));

    hung.abort();
}

#[tokio::test]
async fn connect_from_connected_is_an_invalid_transition() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let identity = id("A1:B2");
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;
    gateway.connect(&identity, None).await.unwrap();

    let err = gateway.connect(&identity, None).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn connect_requires_a_cataloged_peripheral() {
    let (gateway, _radio, _events) = start_gateway(GatewayConfig::default()).await;
    let err = gateway.connect(&id("FF:FF"), None).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidArgument { .. }));
}

#[tokio::test]
async fn disconnect_from_disconnected_is_rejected() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let identity = id("A1:B2");
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;

    let err = gateway.disconnect(&identity).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn unsolicited_link_closure_disconnects_the_link() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let identity = id("A1:B2");
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;
    gateway.connect(&identity, None).await.unwrap();
    expect_states(
        &mut events,
        &identity,
        &[
            ("Disconnected", "Connecting"),
            ("Connecting", "Connected"),
        ],
    )
    .await;

    radio
        .close_unsolicited(identity.clone(), Some("supervision timeout"))
        .await
        .unwrap();
    expect_states(&mut events, &identity, &[("Connected", "Disconnected")]).await;
    assert!(gateway.connected_peripherals().is_empty());
}

#[tokio::test]
async fn peripherals_connect_independently() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;
    discover(&radio, &mut events, "C3:D4", "XBee-07").await;

    let first = gateway.clone();
    let second = gateway.clone();
    let results = futures::future::join_all([
        tokio::spawn(async move { first.connect(&id("A1:B2"), None).await }),
        tokio::spawn(async move { second.connect(&id("C3:D4"), Some("1234")).await }),
    ])
    .await;
    for result in results {
        result.unwrap().unwrap();
    }

    let mut connected: Vec<_> = gateway
        .connected_peripherals()
        .into_iter()
        .map(|p| p.to_string())
        .collect();
    connected.sort();
    assert_eq!(connected, vec!["A1:B2".to_string(), "C3:D4".to_string()]);
}

// ----------------------------------------------------------------------------
// Priority Hints
// ----------------------------------------------------------------------------

#[tokio::test]
async fn priority_hint_is_forwarded_while_connected() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let identity = id("A1:B2");
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;
    gateway.connect(&identity, None).await.unwrap();

    gateway
        .request_priority(&identity, PriorityLevel::High)
        .await
        .unwrap();

    // Fire-and-forget: poll until the actor has forwarded the hint.
    let forwarded = async {
        loop {
            let seen = radio.calls().iter().any(|c| {
                matches!(
                    c,
                    MockCall::RequestPriority {
                        level: PriorityLevel::High,
                        ..
                    }
                )
            });
            if seen {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    timeout(Duration::from_secs(2), forwarded)
        .await
        .expect("priority hint never reached the transport");
}

#[tokio::test]
async fn priority_hint_requires_a_connected_link() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let identity = id("A1:B2");
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;

    let err = gateway
        .request_priority(&identity, PriorityLevel::High)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn auto_priority_fires_after_connect() {
    let config = GatewayConfig::default().with_auto_priority(PriorityLevel::High);
    let (gateway, radio, mut events) = start_gateway(config).await;
    let identity = id("A1:B2");
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;

    gateway.connect(&identity, Some("1234")).await.unwrap();
    assert!(radio.calls().iter().any(|c| matches!(
        c,
        MockCall::RequestPriority {
            level: PriorityLevel::High,
            ..
        }
    )));
}

// ----------------------------------------------------------------------------
// Relay Channel
// ----------------------------------------------------------------------------

#[tokio::test]
async fn relay_send_requires_connected_and_touches_no_transport() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let identity = id("A1:B2");
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;

    let err = gateway
        .send_data(&identity, RelayInterface::Serial, vec![0x50])
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotConnected { .. }));
    assert!(radio.written_frames(&identity).is_empty());
}

#[tokio::test]
async fn relay_send_writes_a_tagged_frame() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let identity = id("A1:B2");
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;
    gateway.connect(&identity, None).await.unwrap();

    gateway
        .send_data(&identity, RelayInterface::Serial, vec![0x50, 0x50])
        .await
        .unwrap();
    gateway
        .send_data(&identity, RelayInterface::ScriptRuntime, vec![0x01])
        .await
        .unwrap();

    let frames = radio.written_frames(&identity);
    assert_eq!(frames, vec![vec![0x00, 0x50, 0x50], vec![0x02, 0x01]]);
}

#[tokio::test]
async fn relay_send_rejects_empty_payloads() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let identity = id("A1:B2");
    discover(&radio, &mut events, "A1:B2", "XBee-04").await;
    gateway.connect(&identity, None).await.unwrap();

    let err = gateway
        .send_data(&identity, RelayInterface::Serial, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidArgument { .. }));
}

#[tokio::test]
async fn inbound_relay_frames_arrive_in_transport_order() {
    let (_gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let identity = id("A1:B2");

    for (interface, payload) in [
        (RelayInterface::Serial, vec![1]),
        (RelayInterface::RadioLocal, vec![2]),
        (RelayInterface::ScriptRuntime, vec![3]),
    ] {
        radio
            .receive_relay(identity.clone(), interface, payload)
            .await
            .unwrap();
    }

    for (expected_interface, expected_payload) in [
        (RelayInterface::Serial, vec![1u8]),
        (RelayInterface::RadioLocal, vec![2]),
        (RelayInterface::ScriptRuntime, vec![3]),
    ] {
        match next_event(&mut events).await {
            GatewayEvent::DataRelayReceived {
                identity: event_identity,
                interface,
                bytes,
            } => {
                assert_eq!(event_identity, identity);
                assert_eq!(interface, expected_interface);
                assert_eq!(bytes, expected_payload);
            }
            other => panic!("expected relay event, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn undecodable_inbound_frames_are_dropped() {
    let (_gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let identity = id("A1:B2");

    // Unknown interface tag, then a well-formed frame.
    radio
        .receive_raw(identity.clone(), vec![0x07, 0x01])
        .await
        .unwrap();
    radio
        .receive_relay(identity.clone(), RelayInterface::Serial, vec![9])
        .await
        .unwrap();

    match next_event(&mut events).await {
        GatewayEvent::DataRelayReceived { interface, bytes, .. } => {
            assert_eq!(interface, RelayInterface::Serial);
            assert_eq!(bytes, vec![9]);
        }
        other => panic!("expected the well-formed frame, got {other:?}"),
    }
}

#[tokio::test]
async fn every_subscriber_observes_the_same_ordered_stream() {
    let (gateway, radio, mut events) = start_gateway(GatewayConfig::default()).await;
    let mut second = gateway.subscribe().await;

    discover(&radio, &mut events, "A1:B2", "XBee-04").await;
    gateway.stop_discovery().await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        GatewayEvent::DiscoveryStopped
    ));

    assert!(matches!(
        next_event(&mut second).await,
        GatewayEvent::PeripheralDiscovered { .. }
    ));
    assert!(matches!(
        next_event(&mut second).await,
        GatewayEvent::DiscoveryStopped
    ));
}
