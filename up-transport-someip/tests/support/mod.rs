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

#![allow(dead_code)]

use async_trait::async_trait;
use integration_test_utils::{cloud_authority, init_logging, vehicle_authority, InMemoryBus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use up_rust::{UCode, UListener, UMessage, UMessageBuilder};
use up_transport_someip::{BridgeConfig, ConnectionState, ReconnectPolicy, SomeipBridge};

pub const WAIT: Duration = Duration::from_secs(2);

pub fn config(local: String, remote: String) -> BridgeConfig {
    BridgeConfig::new(local, remote)
        .with_default_rpc_timeout(Duration::from_millis(500))
        .with_reconnect(ReconnectPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
            None,
        ))
}

pub fn vehicle_config() -> BridgeConfig {
    config(vehicle_authority(), cloud_authority())
}

pub fn cloud_config() -> BridgeConfig {
    config(cloud_authority(), vehicle_authority())
}

/// Two bridges on one bus: the vehicle side and the cloud side.
pub struct BridgePair {
    pub bus: Arc<InMemoryBus>,
    pub vehicle: SomeipBridge,
    pub cloud: SomeipBridge,
}

pub async fn connected_pair() -> BridgePair {
    init_logging();
    let bus = InMemoryBus::new();
    let vehicle = SomeipBridge::new("vehicle", vehicle_config(), bus.runtime("vehicle"))
        .expect("vehicle bridge should start");
    let cloud = SomeipBridge::new("cloud", cloud_config(), bus.runtime("cloud"))
        .expect("cloud bridge should start");

    vehicle.open().expect("vehicle bridge should open");
    cloud.open().expect("cloud bridge should open");
    vehicle
        .wait_until_connected(WAIT)
        .await
        .expect("vehicle bridge should connect");
    cloud
        .wait_until_connected(WAIT)
        .await
        .expect("cloud bridge should connect");
    bus.settle().await;

    BridgePair {
        bus,
        vehicle,
        cloud,
    }
}

pub async fn wait_for_state(bridge: &SomeipBridge, expected: ConnectionState) {
    let mut states = bridge.watch_connection_state();
    tokio::time::timeout(WAIT, states.wait_for(|state| *state == expected))
        .await
        .expect("connection state should change in time")
        .expect("state channel should stay open");
}

pub fn text_payload(message: &UMessage) -> String {
    message
        .payload
        .as_ref()
        .map(|payload| String::from_utf8_lossy(payload).to_string())
        .unwrap_or_default()
}

/// Answers every request with its own payload.
pub struct EchoService {
    bridge: SomeipBridge,
    handled: AtomicUsize,
}

impl EchoService {
    pub fn new(bridge: SomeipBridge) -> Arc<Self> {
        Arc::new(Self {
            bridge,
            handled: AtomicUsize::new(0),
        })
    }

    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UListener for EchoService {
    async fn on_receive(&self, request: UMessage) {
        self.handled.fetch_add(1, Ordering::SeqCst);
        let response = UMessageBuilder::response_for_request(&request.attributes)
            .build_with_payload(
                request.payload.clone().unwrap_or_default(),
                request.attributes.payload_format.enum_value_or_default(),
            )
            .expect("response should build");
        self.bridge
            .send(response)
            .await
            .expect("response should be sent");
    }
}

/// Answers every request with `PERMISSION_DENIED`.
pub struct FailingService {
    bridge: SomeipBridge,
}

impl FailingService {
    pub fn new(bridge: SomeipBridge) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl UListener for FailingService {
    async fn on_receive(&self, request: UMessage) {
        let response = UMessageBuilder::response_for_request(&request.attributes)
            .with_comm_status(UCode::PERMISSION_DENIED)
            .build()
            .expect("response should build");
        self.bridge
            .send(response)
            .await
            .expect("response should be sent");
    }
}

/// Holds its calling thread for `hold` on every message.
pub struct BlockingListener {
    hold: Duration,
    entered: Notify,
}

impl BlockingListener {
    pub fn new(hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            hold,
            entered: Notify::new(),
        })
    }

    pub async fn entered(&self) {
        self.entered.notified().await;
    }
}

#[async_trait]
impl UListener for BlockingListener {
    async fn on_receive(&self, _message: UMessage) {
        self.entered.notify_one();
        std::thread::sleep(self.hold);
    }
}
