/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

mod support;

use integration_test_utils::{
    cloud_client_uuri, init_logging, vehicle_method_uuri, vehicle_topic_uuri, BusCall,
    InMemoryBus, RecordingListener,
};
use support::{cloud_config, connected_pair, text_payload, wait_for_state, WAIT};
use up_rust::{UMessage, UMessageBuilder, UPayloadFormat, UUri};
use up_transport_someip::{ConnectionState, ErrorKind, SomeipBridge};

fn publish(topic: &UUri, payload: &str) -> UMessage {
    UMessageBuilder::publish(topic.clone())
        .build_with_payload(payload.to_string(), UPayloadFormat::UPAYLOAD_FORMAT_TEXT)
        .expect("publish should build")
}

#[tokio::test(flavor = "multi_thread")]
async fn subscriptions_survive_a_runtime_restart() {
    let pair = connected_pair().await;
    let topic = vehicle_topic_uuri(0x0042, 0x8001);
    let listener = RecordingListener::new();
    pair.cloud
        .register_listener(&topic, None, listener.clone())
        .await
        .expect("subscription");
    pair.vehicle
        .send(publish(&topic, "before"))
        .await
        .expect("publish before restart");
    assert_eq!(listener.wait_for(1, WAIT).await.len(), 1);

    pair.bus.stop_routing();
    wait_for_state(&pair.vehicle, ConnectionState::Disconnected).await;
    wait_for_state(&pair.cloud, ConnectionState::Disconnected).await;
    let err = pair
        .vehicle
        .send(publish(&topic, "during"))
        .await
        .expect_err("nothing is sent while disconnected");
    assert_eq!(err.kind(), ErrorKind::NotConnected);

    pair.bus.clear_calls();
    pair.bus.start_routing();
    pair.vehicle
        .wait_until_connected(WAIT)
        .await
        .expect("vehicle reconnects");
    pair.cloud
        .wait_until_connected(WAIT)
        .await
        .expect("cloud reconnects");
    pair.bus.settle().await;

    assert!(pair
        .bus
        .calls("vehicle")
        .contains(&BusCall::OfferEvent(0x0042, 1, 0x8001)));
    assert!(pair
        .bus
        .calls("cloud")
        .contains(&BusCall::Subscribe(0x0042, 1, 0x8001)));

    pair.vehicle
        .send(publish(&topic, "after"))
        .await
        .expect("publish after restart");
    let received = listener.wait_for(2, WAIT).await;
    let payloads: Vec<String> = received.iter().map(text_payload).collect();
    assert_eq!(payloads, vec!["before".to_string(), "after".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn method_offers_are_replayed() {
    let pair = connected_pair().await;
    let method = vehicle_method_uuri(0x0100, 0x0001);
    let service = support::EchoService::new(pair.vehicle.clone());
    pair.vehicle
        .register_listener(&UUri::any(), Some(&method), service.clone())
        .await
        .expect("method handler");
    assert!(pair.bus.is_offered(0x0100, 1));

    pair.bus.stop_routing();
    wait_for_state(&pair.vehicle, ConnectionState::Disconnected).await;
    assert!(!pair.bus.is_offered(0x0100, 1));

    pair.bus.start_routing();
    pair.vehicle
        .wait_until_connected(WAIT)
        .await
        .expect("vehicle reconnects");
    pair.cloud
        .wait_until_connected(WAIT)
        .await
        .expect("cloud reconnects");
    pair.bus.settle().await;
    assert!(pair.bus.is_offered(0x0100, 1));

    let request = UMessageBuilder::request(method, cloud_client_uuri(0x0200), 1000)
        .build_with_payload("again".to_string(), UPayloadFormat::UPAYLOAD_FORMAT_TEXT)
        .expect("request should build");
    let response = pair
        .cloud
        .invoke(request, None)
        .await
        .expect("service answers after the restart");
    assert_eq!(text_payload(&response), "again");
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_requests_fail_when_the_connection_drops() {
    let pair = connected_pair().await;
    let method = vehicle_method_uuri(0x0101, 0x0001);
    let silent = RecordingListener::new();
    pair.vehicle
        .register_listener(&UUri::any(), Some(&method), silent.clone())
        .await
        .expect("method handler");
    pair.bus.settle().await;

    let cloud = pair.cloud.clone();
    let request = UMessageBuilder::request(method, cloud_client_uuri(0x0200), 10_000)
        .build()
        .expect("request should build");
    let call = tokio::spawn(async move { cloud.invoke(request, None).await });
    assert_eq!(silent.wait_for(1, WAIT).await.len(), 1);

    pair.bus.stop_routing();
    let outcome = tokio::time::timeout(WAIT, call)
        .await
        .expect("the call should end with the connection")
        .expect("call task should not panic");
    assert_eq!(
        outcome.expect_err("no response after disconnect").kind(),
        ErrorKind::Closed
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn registrations_made_while_disconnected_are_applied_on_connect() {
    init_logging();
    let bus = InMemoryBus::new();
    bus.stop_routing();
    let cloud = SomeipBridge::new("cloud", cloud_config(), bus.runtime("cloud"))
        .expect("bridge should start");

    let err = cloud.open().expect_err("routing manager is down");
    assert_eq!(err.kind(), ErrorKind::NotConnected);
    assert_ne!(cloud.connection_state(), ConnectionState::Connected);

    let topic = vehicle_topic_uuri(0x0042, 0x8001);
    cloud
        .register_listener(&topic, None, RecordingListener::new())
        .await
        .expect("registration is recorded while disconnected");
    assert!(!bus.is_subscribed("cloud", 0x0042, 1, 0x8001));

    bus.start_routing();
    cloud
        .wait_until_connected(WAIT)
        .await
        .expect("background reconnect succeeds");
    bus.settle().await;
    assert!(bus.is_subscribed("cloud", 0x0042, 1, 0x8001));
    cloud.close();
}
