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

//! [`UTransport`] implementation of the bridge.

use super::SomeipBridge;
use async_trait::async_trait;
use std::sync::Arc;
use up_rust::{UCode, UListener, UMessage, UStatus, UTransport, UUri};

#[async_trait]
impl UTransport for SomeipBridge {
    async fn send(&self, message: UMessage) -> Result<(), UStatus> {
        SomeipBridge::send(self, message)
            .await
            .map_err(UStatus::from)
    }

    async fn receive(
        &self,
        _source_filter: &UUri,
        _sink_filter: Option<&UUri>,
    ) -> Result<UMessage, UStatus> {
        Err(UStatus::fail_with_code(
            UCode::UNIMPLEMENTED,
            "pull-style receive is not supported, register a listener instead",
        ))
    }

    async fn register_listener(
        &self,
        source_filter: &UUri,
        sink_filter: Option<&UUri>,
        listener: Arc<dyn UListener>,
    ) -> Result<(), UStatus> {
        SomeipBridge::register_listener(self, source_filter, sink_filter, listener)
            .await
            .map_err(UStatus::from)
    }

    async fn unregister_listener(
        &self,
        source_filter: &UUri,
        sink_filter: Option<&UUri>,
        listener: Arc<dyn UListener>,
    ) -> Result<(), UStatus> {
        SomeipBridge::unregister_listener(self, source_filter, sink_filter, listener)
            .await
            .map_err(UStatus::from)
    }
}
