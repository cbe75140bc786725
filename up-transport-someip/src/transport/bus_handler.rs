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

//! Runtime callbacks: connection state, availability and inbound traffic.
//!
//! Callbacks arrive on runtime threads. Nothing here calls a listener: inbound messages are
//! decoded, their addresses rewritten to this side's view and handed to the dispatch loop.
//! Responses are the exception; they only resolve a pending request.

use super::{BridgeInner, COMPONENT};
use crate::bus::{
    BusEventHandler, BusMessage, BusMessageKind, BusState, EventgroupId, InstanceId, MemberId,
    ServiceId,
};
use crate::codec::{self, DecodedFrame};
use crate::control_plane::session::StateTransition;
use crate::data_plane::inbound_dispatch::DispatchTarget;
use crate::data_plane::inbound_requests::InboundRequestContext;
use crate::data_plane::rpc_correlator::RpcError;
use crate::mapping::{BusAddress, EntityKey};
use crate::observability::{events, fields};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use up_rust::{UMessageType, UUID};

pub(crate) struct BusHandler {
    bridge: Weak<BridgeInner>,
}

impl BusHandler {
    pub(super) fn new(bridge: Weak<BridgeInner>) -> Self {
        Self { bridge }
    }
}

impl BusEventHandler for BusHandler {
    fn on_state(&self, state: BusState) {
        let Some(bridge) = self.bridge.upgrade() else {
            return;
        };
        if bridge.session.on_state(state) == StateTransition::Lost {
            bridge.correlator.fail_all(RpcError::Closed);
            bridge.session.schedule_reconnect();
        }
    }

    fn on_message(&self, message: BusMessage) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.route_inbound(message);
        }
    }

    fn on_availability(&self, service: ServiceId, instance: InstanceId, available: bool) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.session.on_availability(service, instance, available);
        }
    }

    fn on_subscription_status(
        &self,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
        event: MemberId,
        accepted: bool,
    ) {
        if let Some(bridge) = self.bridge.upgrade() {
            bridge
                .session
                .on_subscription_status(service, instance, eventgroup, event, accepted);
        }
    }
}

impl BridgeInner {
    fn route_inbound(self: &Arc<Self>, message: BusMessage) {
        let address = BusAddress::new(
            message.service,
            message.instance,
            message.member,
            message.interface_version,
        );
        debug!(
            event = events::DISPATCH_RECEIVE,
            component = COMPONENT,
            bridge = %self.name,
            address = %address,
            kind = ?message.kind,
            client = message.client,
            session = message.session,
            payload_len = message.payload.len(),
            "bus message received"
        );

        match message.kind {
            BusMessageKind::Notification => self.on_event(address, &message),
            BusMessageKind::Request => self.on_request(address, &message),
            BusMessageKind::RequestNoReturn => self.on_notification(address, &message),
            BusMessageKind::Response | BusMessageKind::Error => self.on_response(&message),
        }
    }

    fn decode_or_log(
        &self,
        address: &BusAddress,
        message: &BusMessage,
        expected: UMessageType,
        known_source: Option<&up_rust::UUri>,
    ) -> Option<DecodedFrame> {
        match codec::decode(&message.payload, address.is_event, known_source) {
            Ok(frame) => {
                let message_type = frame
                    .message
                    .attributes
                    .as_ref()
                    .map(|attributes| attributes.type_.enum_value_or_default());
                if message_type == Some(expected) {
                    return Some(frame);
                }
                warn!(
                    event = events::DISPATCH_DECODE_FAILED,
                    component = COMPONENT,
                    address = %address,
                    kind = ?message.kind,
                    msg_type = %fields::format_message_type(&frame.message),
                    "frame type does not match the bus message kind, dropping"
                );
                None
            }
            Err(err) => {
                warn!(
                    event = events::DISPATCH_DECODE_FAILED,
                    component = COMPONENT,
                    address = %address,
                    kind = ?message.kind,
                    err = %err,
                    "undecodable frame, dropping"
                );
                None
            }
        }
    }

    fn map_or_log(&self, address: &BusAddress) -> Option<up_rust::UUri> {
        match self.mapper.to_uri(address) {
            Ok(uri) => Some(uri),
            Err(err) => {
                warn!(
                    event = events::DISPATCH_MAPPING_FAILED,
                    component = COMPONENT,
                    address = %address,
                    err = %err,
                    "bus address has no uProtocol counterpart, dropping"
                );
                None
            }
        }
    }

    fn on_event(&self, topic: BusAddress, message: &BusMessage) {
        if !topic.is_event {
            warn!(
                event = events::DISPATCH_MAPPING_FAILED,
                component = COMPONENT,
                address = %topic,
                "notification for a method id, dropping"
            );
            return;
        }
        let Some(source) = self.map_or_log(&topic) else {
            return;
        };
        let Some(frame) = self.decode_or_log(
            &topic,
            message,
            UMessageType::UMESSAGE_TYPE_PUBLISH,
            Some(&source),
        ) else {
            return;
        };
        self.dispatch
            .enqueue(DispatchTarget::Topic(topic), frame.message);
    }

    fn on_request(&self, method: BusAddress, message: &BusMessage) {
        let Some(sink) = self.map_or_log(&method) else {
            return;
        };
        let Some(frame) =
            self.decode_or_log(&method, message, UMessageType::UMESSAGE_TYPE_REQUEST, None)
        else {
            return;
        };
        let Some(correlation) = frame.correlation else {
            warn!(
                event = events::DISPATCH_DECODE_FAILED,
                component = COMPONENT,
                address = %method,
                "request without correlation id, dropping"
            );
            return;
        };

        let mut request = frame.message;
        let Some(attributes) = request.attributes.as_mut() else {
            return;
        };
        if attributes.id.is_none() {
            attributes.id = Some(UUID::build()).into();
        }
        attributes.sink = Some(sink).into();
        let request_id = attributes.id.as_ref().cloned().unwrap_or_default();
        let ttl = attributes.ttl;

        self.inbound_requests.insert(
            &request_id,
            ttl,
            InboundRequestContext::new(method, message.client, message.session, correlation),
        );
        self.dispatch.enqueue(DispatchTarget::Method(method), request);
    }

    fn on_notification(&self, address: BusAddress, message: &BusMessage) {
        let entity = address.entity();
        let Some(destination) = self.map_or_log(&entity) else {
            return;
        };
        let Some(frame) = self.decode_or_log(
            &address,
            message,
            UMessageType::UMESSAGE_TYPE_NOTIFICATION,
            None,
        ) else {
            return;
        };

        let mut notification = frame.message;
        let key = EntityKey::with_default_authority(&destination, self.config.local_authority());
        if let Some(attributes) = notification.attributes.as_mut() {
            attributes.sink = Some(destination).into();
        }
        self.dispatch
            .enqueue(DispatchTarget::Sink(key), notification);
    }

    fn on_response(&self, message: &BusMessage) {
        let address = BusAddress::new(
            message.service,
            message.instance,
            message.member,
            message.interface_version,
        );
        let Some(frame) = self.decode_or_log(
            &address,
            message,
            UMessageType::UMESSAGE_TYPE_RESPONSE,
            None,
        ) else {
            return;
        };
        if let Some(correlation) = frame.correlation {
            self.correlator.complete(correlation, frame.message);
        }
    }
}
