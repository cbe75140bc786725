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

use futures::future::join_all;
use integration_test_utils::{
    cloud_client_uuri, vehicle_method_uuri, vehicle_topic_uuri, RecordingListener,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{connected_pair, text_payload, BlockingListener, EchoService, WAIT};
use up_rust::{UCode, UMessage, UMessageBuilder, UMessageType, UPayloadFormat, UUri, UUID};
use up_transport_someip::ErrorKind;

fn request(method: &UUri, reply_to: &UUri, ttl: u32, payload: &str) -> UMessage {
    UMessageBuilder::request(method.clone(), reply_to.clone(), ttl)
        .build_with_payload(payload.to_string(), UPayloadFormat::UPAYLOAD_FORMAT_TEXT)
        .expect("request should build")
}

#[tokio::test(flavor = "multi_thread")]
async fn invoke_returns_the_matching_response() {
    let pair = connected_pair().await;
    let method = vehicle_method_uuri(0x0100, 0x0007);
    let service = EchoService::new(pair.vehicle.clone());
    pair.vehicle
        .register_listener(&UUri::any(), Some(&method), service.clone())
        .await
        .expect("method handler");
    pair.bus.settle().await;

    let request = request(&method, &cloud_client_uuri(0x0200), 1000, "ping");
    let request_id = request.attributes.id.clone();
    let response = pair
        .cloud
        .invoke(request, None)
        .await
        .expect("response should arrive");

    assert_eq!(text_payload(&response), "ping");
    assert_eq!(response.attributes.reqid, request_id);
    assert_eq!(
        response.attributes.type_.enum_value_or_default(),
        UMessageType::UMESSAGE_TYPE_RESPONSE
    );
    assert_eq!(service.handled(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_requests_are_correlated() {
    let pair = connected_pair().await;
    let method = vehicle_method_uuri(0x0101, 0x0001);
    let service = EchoService::new(pair.vehicle.clone());
    pair.vehicle
        .register_listener(&UUri::any(), Some(&method), service.clone())
        .await
        .expect("method handler");
    pair.bus.settle().await;

    let reply_to = cloud_client_uuri(0x0200);
    let calls = (0..16).map(|index| {
        let cloud = pair.cloud.clone();
        let request = request(&method, &reply_to, 2000, &format!("call-{index}"));
        async move { (index, cloud.invoke(request, None).await) }
    });

    for (index, outcome) in join_all(calls).await {
        let response = outcome.expect("every call should be answered");
        assert_eq!(text_payload(&response), format!("call-{index}"));
    }
    assert_eq!(service.handled(), 16);
}

#[tokio::test(flavor = "multi_thread")]
async fn unanswered_request_times_out() {
    let pair = connected_pair().await;
    let method = vehicle_method_uuri(0x0102, 0x0001);
    let silent = RecordingListener::new();
    pair.vehicle
        .register_listener(&UUri::any(), Some(&method), silent.clone())
        .await
        .expect("method handler");
    pair.bus.settle().await;

    let started = Instant::now();
    let err = pair
        .cloud
        .invoke(
            request(&method, &cloud_client_uuri(0x0200), 5000, "ignored"),
            Some(Duration::from_millis(200)),
        )
        .await
        .expect_err("nobody answers");

    assert_eq!(err.kind(), ErrorKind::RpcTimeout);
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(silent.wait_for(1, WAIT).await.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn blocked_listener_does_not_delay_request_timeouts() {
    let pair = connected_pair().await;
    let topic = vehicle_topic_uuri(0x0046, 0x8001);
    let method = vehicle_method_uuri(0x0108, 0x0001);
    let blocking = BlockingListener::new(Duration::from_millis(1500));
    let silent = RecordingListener::new();
    pair.cloud
        .register_listener(&topic, None, blocking.clone())
        .await
        .expect("subscription");
    pair.vehicle
        .register_listener(&UUri::any(), Some(&method), silent.clone())
        .await
        .expect("method handler");
    pair.bus.settle().await;

    let publication = UMessageBuilder::publish(topic.clone())
        .build_with_payload("hold".to_string(), UPayloadFormat::UPAYLOAD_FORMAT_TEXT)
        .expect("publish should build");
    pair.vehicle
        .send(publication)
        .await
        .expect("publish should be sent");
    tokio::time::timeout(WAIT, blocking.entered())
        .await
        .expect("listener should be running");

    let started = Instant::now();
    let err = pair
        .cloud
        .invoke(
            request(&method, &cloud_client_uuri(0x0200), 5000, "ignored"),
            Some(Duration::from_millis(100)),
        )
        .await
        .expect_err("nobody answers");

    assert_eq!(err.kind(), ErrorKind::RpcTimeout);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn unbounded_invoke_timeout_is_accepted() {
    let pair = connected_pair().await;
    let method = vehicle_method_uuri(0x0109, 0x0001);
    let service = EchoService::new(pair.vehicle.clone());
    pair.vehicle
        .register_listener(&UUri::any(), Some(&method), service.clone())
        .await
        .expect("method handler");
    pair.bus.settle().await;

    let response = pair
        .cloud
        .invoke(
            request(&method, &cloud_client_uuri(0x0200), 1000, "forever"),
            Some(Duration::MAX),
        )
        .await
        .expect("response should arrive");

    assert_eq!(text_payload(&response), "forever");
}

#[tokio::test(flavor = "multi_thread")]
async fn request_to_a_stopped_service_fails_fast() {
    let pair = connected_pair().await;
    let method = vehicle_method_uuri(0x0103, 0x0001);
    let service = EchoService::new(pair.vehicle.clone());
    let mut availability = pair
        .cloud
        .watch_availability(&method)
        .expect("availability watch");

    pair.vehicle
        .register_listener(&UUri::any(), Some(&method), service.clone())
        .await
        .expect("method handler");
    let offered = tokio::time::timeout(WAIT, availability.next())
        .await
        .expect("offer should be reported");
    assert_eq!(offered, Some(true));
    assert!(pair.cloud.is_available(&method).expect("valid URI"));

    pair.vehicle
        .unregister_listener(&UUri::any(), Some(&method), service.clone())
        .await
        .expect("method handler removed");
    let stopped = tokio::time::timeout(WAIT, availability.next())
        .await
        .expect("stop should be reported");
    assert_eq!(stopped, Some(false));

    let started = Instant::now();
    let err = pair
        .cloud
        .invoke(
            request(&method, &cloud_client_uuri(0x0200), 5000, "ping"),
            None,
        )
        .await
        .expect_err("service is stopped");
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test(flavor = "multi_thread")]
async fn sent_request_is_answered_to_the_reply_to_listener() {
    let pair = connected_pair().await;
    let method = vehicle_method_uuri(0x0104, 0x0001);
    let reply_to = cloud_client_uuri(0x0200);
    let service = EchoService::new(pair.vehicle.clone());
    let inbox = RecordingListener::new();

    pair.vehicle
        .register_listener(&UUri::any(), Some(&method), service.clone())
        .await
        .expect("method handler");
    pair.cloud
        .register_listener(&method, Some(&reply_to), inbox.clone())
        .await
        .expect("response listener");
    pair.bus.settle().await;

    let request = request(&method, &reply_to, 1000, "hello");
    let request_id = request.attributes.id.clone();
    pair.cloud.send(request).await.expect("request should be sent");

    let received = inbox.wait_for(1, WAIT).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].attributes.reqid, request_id);
    assert_eq!(text_payload(&received[0]), "hello");
}

#[tokio::test(flavor = "multi_thread")]
async fn sent_request_without_answer_reports_deadline_exceeded() {
    let pair = connected_pair().await;
    let method = vehicle_method_uuri(0x0105, 0x0001);
    let reply_to = cloud_client_uuri(0x0201);
    let silent = RecordingListener::new();
    let inbox = RecordingListener::new();

    pair.vehicle
        .register_listener(&UUri::any(), Some(&method), silent.clone())
        .await
        .expect("method handler");
    pair.cloud
        .register_listener(&method, Some(&reply_to), inbox.clone())
        .await
        .expect("response listener");
    pair.bus.settle().await;

    let request = request(&method, &reply_to, 200, "hello");
    let request_id = request.attributes.id.clone();
    pair.cloud.send(request).await.expect("request should be sent");

    let received = inbox.wait_for(1, WAIT).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].attributes.reqid, request_id);
    assert_eq!(
        received[0]
            .attributes
            .commstatus
            .map(|code| code.enum_value_or_default()),
        Some(UCode::DEADLINE_EXCEEDED)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn response_to_an_unknown_request_is_not_found() {
    let pair = connected_pair().await;
    let request = request(
        &vehicle_method_uuri(0x0106, 0x0001),
        &cloud_client_uuri(0x0200),
        1000,
        "never received",
    );
    let mut orphan = UMessageBuilder::response_for_request(&request.attributes)
        .build()
        .expect("response should build");
    orphan.attributes.mut_or_insert_default().reqid = Some(UUID::build()).into();

    let err = pair
        .vehicle
        .send(orphan)
        .await
        .expect_err("no such request");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test(flavor = "multi_thread")]
async fn error_responses_keep_their_status() {
    let pair = connected_pair().await;
    let method = vehicle_method_uuri(0x0107, 0x0001);
    let failing = Arc::new(support::FailingService::new(pair.vehicle.clone()));
    pair.vehicle
        .register_listener(&UUri::any(), Some(&method), failing)
        .await
        .expect("method handler");
    pair.bus.settle().await;

    let response = pair
        .cloud
        .invoke(request(&method, &cloud_client_uuri(0x0200), 1000, "x"), None)
        .await
        .expect("error response is still a response");
    assert_eq!(
        response
            .attributes
            .commstatus
            .map(|code| code.enum_value_or_default()),
        Some(UCode::PERMISSION_DENIED)
    );
}
