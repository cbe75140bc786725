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
    cloud_client_uuri, vehicle_topic_uuri, PanickingListener, RecordingListener,
};
use std::sync::Arc;
use std::time::Duration;
use support::{connected_pair, text_payload, WAIT};
use up_rust::{UListener, UMessage, UMessageBuilder, UPayloadFormat, UUri};

fn publish(topic: &UUri, payload: &str) -> UMessage {
    UMessageBuilder::publish(topic.clone())
        .build_with_payload(payload.to_string(), UPayloadFormat::UPAYLOAD_FORMAT_TEXT)
        .expect("publish should build")
}

#[tokio::test(flavor = "multi_thread")]
async fn every_subscriber_receives_each_event_once_in_order() {
    let pair = connected_pair().await;
    let topic = vehicle_topic_uuri(0x0042, 0x8001);
    let first = RecordingListener::new();
    let second = RecordingListener::new();
    for listener in [&first, &second] {
        pair.cloud
            .register_listener(&topic, None, listener.clone())
            .await
            .expect("subscription should be accepted");
    }
    pair.bus.settle().await;

    for sequence in 0..20 {
        pair.vehicle
            .send(publish(&topic, &sequence.to_string()))
            .await
            .expect("publish should be sent");
    }

    let expected: Vec<String> = (0..20).map(|sequence| sequence.to_string()).collect();
    for listener in [&first, &second] {
        let received = listener.wait_for(20, WAIT).await;
        let payloads: Vec<String> = received.iter().map(text_payload).collect();
        assert_eq!(payloads, expected);
        assert!(received
            .iter()
            .all(|message| message.attributes.source.as_ref() == Some(&topic)));
    }

    pair.bus.settle().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(first.count(), 20);
    assert_eq!(second.count(), 20);
}

#[tokio::test(flavor = "multi_thread")]
async fn bus_subscription_follows_the_first_and_last_listener() {
    let pair = connected_pair().await;
    let topic = vehicle_topic_uuri(0x0042, 0x8002);
    let staying = RecordingListener::new();
    let leaving = RecordingListener::new();

    pair.cloud
        .register_listener(&topic, None, staying.clone())
        .await
        .expect("first listener");
    pair.cloud
        .register_listener(&topic, None, leaving.clone())
        .await
        .expect("second listener");
    assert!(pair.bus.is_subscribed("cloud", 0x0042, 1, 0x8002));

    pair.cloud
        .unregister_listener(&topic, None, leaving.clone())
        .await
        .expect("unregister second listener");
    assert!(pair.bus.is_subscribed("cloud", 0x0042, 1, 0x8002));

    pair.vehicle
        .send(publish(&topic, "after"))
        .await
        .expect("publish should be sent");
    assert_eq!(staying.wait_for(1, WAIT).await.len(), 1);
    pair.bus.settle().await;
    assert_eq!(leaving.count(), 0);

    pair.cloud
        .unregister_listener(&topic, None, staying.clone())
        .await
        .expect("unregister last listener");
    assert!(!pair.bus.is_subscribed("cloud", 0x0042, 1, 0x8002));
}

#[tokio::test(flavor = "multi_thread")]
async fn local_subscribers_receive_local_publications() {
    let pair = connected_pair().await;
    let topic = vehicle_topic_uuri(0x0043, 0x8001);
    let local = RecordingListener::new();

    pair.vehicle
        .register_listener(&topic, None, local.clone())
        .await
        .expect("local subscription");
    pair.vehicle
        .send(publish(&topic, "loopback"))
        .await
        .expect("publish should be sent");

    let received = local.wait_for(1, WAIT).await;
    assert_eq!(received.len(), 1);
    assert_eq!(text_payload(&received[0]), "loopback");
    pair.bus.settle().await;
    assert_eq!(local.count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn topics_without_authority_are_local_topics() {
    let pair = connected_pair().await;
    let topic = vehicle_topic_uuri(0x0047, 0x8001);
    let unqualified = UUri {
        authority_name: String::new(),
        ..topic.clone()
    };
    let local = RecordingListener::new();
    let remote = RecordingListener::new();

    pair.vehicle
        .register_listener(&unqualified, None, local.clone())
        .await
        .expect("local subscription");
    pair.cloud
        .register_listener(&topic, None, remote.clone())
        .await
        .expect("remote subscription");
    pair.bus.settle().await;

    pair.vehicle
        .send(publish(&unqualified, "unqualified"))
        .await
        .expect("publish should be sent");

    let received = local.wait_for(1, WAIT).await;
    assert_eq!(received.len(), 1);
    assert_eq!(text_payload(&received[0]), "unqualified");
    let received = remote.wait_for(1, WAIT).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].attributes.source.as_ref(), Some(&topic));
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_listener_does_not_starve_the_others() {
    let pair = connected_pair().await;
    let topic = vehicle_topic_uuri(0x0044, 0x8001);
    let mut failures = pair.cloud.listener_failures();
    let panicking = PanickingListener::new();
    let recording = RecordingListener::new();

    pair.cloud
        .register_listener(&topic, None, panicking.clone())
        .await
        .expect("panicking listener");
    pair.cloud
        .register_listener(&topic, None, recording.clone())
        .await
        .expect("recording listener");
    pair.bus.settle().await;

    for sequence in 0..3 {
        pair.vehicle
            .send(publish(&topic, &sequence.to_string()))
            .await
            .expect("publish should be sent");
    }

    assert_eq!(recording.wait_for(3, WAIT).await.len(), 3);
    for _ in 0..3 {
        let failure = tokio::time::timeout(WAIT, failures.recv())
            .await
            .expect("failure should be reported")
            .expect("failure channel open");
        assert_eq!(failure.reason, "listener exploded");
    }
    assert_eq!(panicking.calls(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn subscription_acknowledgements_are_tracked() {
    let pair = connected_pair().await;
    let accepted_topic = vehicle_topic_uuri(0x0045, 0x8001);
    let rejected_topic = vehicle_topic_uuri(0x0046, 0x8001);
    let listener = RecordingListener::new();

    pair.cloud
        .register_listener(&accepted_topic, None, listener.clone())
        .await
        .expect("subscription");
    assert_eq!(
        pair.cloud
            .subscription_status(&accepted_topic)
            .expect("valid topic"),
        None
    );
    pair.vehicle
        .send(publish(&accepted_topic, "offer"))
        .await
        .expect("publish should be sent");
    pair.bus.settle().await;
    assert_eq!(
        pair.cloud
            .subscription_status(&accepted_topic)
            .expect("valid topic"),
        Some(true)
    );

    pair.bus.set_accept_subscriptions(false);
    pair.cloud
        .register_listener(&rejected_topic, None, listener.clone())
        .await
        .expect("subscription is kept even if the offerer rejects it later");
    pair.vehicle
        .send(publish(&rejected_topic, "offer"))
        .await
        .expect("publish should be sent");
    pair.bus.settle().await;
    assert_eq!(
        pair.cloud
            .subscription_status(&rejected_topic)
            .expect("valid topic"),
        Some(false)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn notifications_reach_the_destination_entity() {
    let pair = connected_pair().await;
    let destination = cloud_client_uuri(0x0200);
    let origin = vehicle_topic_uuri(0x0047, 0x8001);
    let inbox = RecordingListener::new();
    let any_source = UUri::any();

    pair.cloud
        .register_listener(&any_source, Some(&destination), inbox.clone())
        .await
        .expect("sink listener");
    pair.bus.settle().await;

    let notification = UMessageBuilder::notification(origin.clone(), destination.clone())
        .build_with_payload("door open".to_string(), UPayloadFormat::UPAYLOAD_FORMAT_TEXT)
        .expect("notification should build");
    pair.vehicle
        .send(notification)
        .await
        .expect("notification should be sent");

    let received = inbox.wait_for(1, WAIT).await;
    assert_eq!(received.len(), 1);
    assert_eq!(text_payload(&received[0]), "door open");
    assert_eq!(received[0].attributes.source.as_ref(), Some(&origin));
    assert_eq!(received[0].attributes.sink.as_ref(), Some(&destination));

    let listener: Arc<dyn UListener> = inbox;
    pair.cloud
        .unregister_listener(&any_source, Some(&destination), listener)
        .await
        .expect("sink listener removed");
    assert!(!pair.bus.is_offered(0x0200, 1));
}
