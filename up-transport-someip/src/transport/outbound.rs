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

//! Routing of outbound uProtocol messages onto the bus.

use super::{BridgeInner, COMPONENT};
use crate::bus::{BusMessage, BusMessageKind};
use crate::codec;
use crate::control_plane::availability::AvailabilityState;
use crate::data_plane::inbound_dispatch::DispatchTarget;
use crate::data_plane::rpc_correlator::{PendingResponse, RpcError};
use crate::error::{BridgeError, ErrorKind};
use crate::mapping::{BusAddress, EntityKey};
use crate::observability::{events, fields};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use up_rust::{UAttributes, UCode, UMessage, UMessageBuilder, UMessageType, UUri};

fn attributes_of(message: &UMessage) -> Result<&UAttributes, BridgeError> {
    message.attributes.as_ref().ok_or_else(|| {
        BridgeError::new(ErrorKind::SerializationError, "message has no attributes")
    })
}

fn message_type_of(attributes: &UAttributes) -> Result<UMessageType, BridgeError> {
    match attributes.type_.enum_value() {
        Ok(UMessageType::UMESSAGE_TYPE_UNSPECIFIED) | Err(_) => Err(BridgeError::new(
            ErrorKind::SerializationError,
            format!("unsupported message type {}", attributes.type_.value()),
        )),
        Ok(message_type) => Ok(message_type),
    }
}

fn required<'a>(uri: Option<&'a UUri>, what: &str) -> Result<&'a UUri, BridgeError> {
    uri.ok_or_else(|| BridgeError::new(ErrorKind::MappingError, format!("{what} is missing")))
}

fn bus_message(address: &BusAddress, kind: BusMessageKind, payload: Bytes) -> BusMessage {
    BusMessage {
        service: address.service,
        instance: address.instance,
        member: address.member,
        interface_version: address.major_version,
        kind,
        client: 0,
        session: 0,
        payload,
    }
}

/// Builds the response handed to the requester when no real response will arrive.
fn failed_response(request: &UAttributes, error: &RpcError) -> Option<UMessage> {
    let code = match error {
        RpcError::Timeout => UCode::DEADLINE_EXCEEDED,
        RpcError::Closed => UCode::CANCELLED,
    };
    match UMessageBuilder::response_for_request(request)
        .with_comm_status(code)
        .build()
    {
        Ok(response) => Some(response),
        Err(err) => {
            warn!(
                event = events::BRIDGE_SEND_FAILED,
                component = COMPONENT,
                msg_id = %fields::format_attributes_message_id(Some(request)),
                err = %err,
                "cannot build failure response for request"
            );
            None
        }
    }
}

impl BridgeInner {
    pub(super) fn send(self: &Arc<Self>, message: &UMessage) -> Result<(), BridgeError> {
        self.ensure_open()?;
        let attributes = attributes_of(message)?;
        let message_type = message_type_of(attributes)?;

        debug!(
            event = events::BRIDGE_SEND,
            component = COMPONENT,
            bridge = %self.name,
            msg_id = %fields::format_message_id(message),
            msg_type = ?message_type,
            src = %fields::format_source_uri(message),
            sink = %fields::format_sink_uri(message),
            "sending message"
        );

        match message_type {
            UMessageType::UMESSAGE_TYPE_PUBLISH => self.publish(message, attributes),
            UMessageType::UMESSAGE_TYPE_NOTIFICATION => self.notify(message, attributes),
            UMessageType::UMESSAGE_TYPE_REQUEST => self.request(message, attributes),
            UMessageType::UMESSAGE_TYPE_RESPONSE => self.respond(message, attributes),
            UMessageType::UMESSAGE_TYPE_UNSPECIFIED => Err(BridgeError::new(
                ErrorKind::SerializationError,
                "message type is unspecified",
            )),
        }
    }

    fn require_local(&self, uri: &UUri, what: &str) -> Result<(), BridgeError> {
        if uri.authority_name == self.config.remote_authority() {
            return Err(BridgeError::new(
                ErrorKind::MappingError,
                format!("{what} {} is not a local entity", fields::format_uri(uri)),
            ));
        }
        Ok(())
    }

    fn publish(&self, message: &UMessage, attributes: &UAttributes) -> Result<(), BridgeError> {
        let source = required(attributes.source.as_ref(), "publish source")?;
        self.require_local(source, "publish source")?;
        let topic = self.bus_address_of(source)?;
        if !topic.is_event {
            return Err(BridgeError::new(
                ErrorKind::MappingError,
                format!("publish source {} is not a topic", fields::format_uri(source)),
            ));
        }
        self.ensure_topic_offered(source, &topic)?;

        let payload = codec::encode(message, None)?;
        self.session
            .send(bus_message(&topic, BusMessageKind::Notification, payload))?;

        // The runtime does not hand an application its own events back.
        if self.tables.topics.contains(&topic) {
            self.dispatch
                .enqueue(DispatchTarget::Topic(topic), message.clone());
        }
        Ok(())
    }

    /// Offers the service and event behind a local topic the first time it is published.
    fn ensure_topic_offered(&self, source: &UUri, topic: &BusAddress) -> Result<(), BridgeError> {
        if self.session.is_event_offered(topic) {
            return Ok(());
        }
        let entity = self.local_entity_uri(source);
        self.mapper.register_local_uri(&entity)?;
        self.offer_claimed(&topic.entity(), &entity)?;
        self.session.offer_event(topic)
    }

    fn notify(&self, message: &UMessage, attributes: &UAttributes) -> Result<(), BridgeError> {
        let origin = required(attributes.source.as_ref(), "notification origin")?;
        let destination = required(attributes.sink.as_ref(), "notification destination")?;
        self.bus_address_of(origin)?;
        let target = self.bus_address_of(destination)?;
        if !target.is_entity() {
            return Err(BridgeError::new(
                ErrorKind::MappingError,
                format!(
                    "notification destination {} is not an entity",
                    fields::format_uri(destination)
                ),
            ));
        }

        if destination.authority_name != self.config.remote_authority() {
            let key =
                EntityKey::with_default_authority(destination, self.config.local_authority());
            if self.tables.sinks.contains(&key) {
                self.dispatch
                    .enqueue(DispatchTarget::Sink(key), message.clone());
                return Ok(());
            }
        }

        self.session.request_service(&target)?;
        let payload = codec::encode(message, None)?;
        self.session
            .send(bus_message(&target, BusMessageKind::RequestNoReturn, payload))
    }

    /// Sends a request whose outcome is delivered to the sink listeners of its reply-to
    /// entity: the response, or a synthesized failure response on timeout or disconnect.
    fn request(
        self: &Arc<Self>,
        message: &UMessage,
        attributes: &UAttributes,
    ) -> Result<(), BridgeError> {
        let pending = self.start_request(message, None)?;
        let reply_to = required(attributes.source.as_ref(), "request reply-to address")?;
        let reply_to = EntityKey::with_default_authority(reply_to, self.config.local_authority());
        let request_attributes = attributes.clone();
        let bridge = Arc::downgrade(self);

        self.timer_runtime.handle().spawn(async move {
            let outcome = pending.await;
            let Some(bridge) = bridge.upgrade() else {
                return;
            };
            let response = match outcome {
                Ok(response) => response,
                Err(err) => match failed_response(&request_attributes, &err) {
                    Some(response) => response,
                    None => return,
                },
            };
            bridge
                .dispatch
                .enqueue(DispatchTarget::Sink(reply_to), response);
        });
        Ok(())
    }

    /// Sends `message` as a request and returns its pending response.
    ///
    /// A request to a service instance known to be stopped fails at once with
    /// [`ErrorKind::Unavailable`]; an instance of unknown availability is tried.
    pub(super) fn start_request(
        &self,
        message: &UMessage,
        timeout: Option<Duration>,
    ) -> Result<PendingResponse, BridgeError> {
        self.ensure_open()?;
        let attributes = attributes_of(message)?;
        if message_type_of(attributes)? != UMessageType::UMESSAGE_TYPE_REQUEST {
            return Err(BridgeError::new(
                ErrorKind::SerializationError,
                "only request messages can be invoked",
            ));
        }
        required(attributes.source.as_ref(), "request reply-to address")?;
        let sink = required(attributes.sink.as_ref(), "request method")?;
        let method = self.bus_address_of(sink)?;
        if !method.is_method() {
            return Err(BridgeError::new(
                ErrorKind::MappingError,
                format!("request sink {} is not a method", fields::format_uri(sink)),
            ));
        }

        let availability = self
            .session
            .availability()
            .state(method.service, method.instance);
        if availability == AvailabilityState::Stopped {
            return Err(BridgeError::new(
                ErrorKind::Unavailable,
                format!("service instance of {method} is not offered"),
            ));
        }
        self.session.request_service(&method)?;

        let timeout = timeout
            .or_else(|| {
                attributes
                    .ttl
                    .filter(|ttl| *ttl > 0)
                    .map(|ttl| Duration::from_millis(ttl.into()))
            })
            .unwrap_or_else(|| self.config.default_rpc_timeout());

        let (_, pending) = self.correlator.send_request(timeout, |correlation| {
            let payload = codec::encode(message, Some(correlation))?;
            self.session
                .send(bus_message(&method, BusMessageKind::Request, payload))
        })?;
        Ok(pending)
    }

    /// Answers an inbound request, found by the response's request id.
    fn respond(&self, message: &UMessage, attributes: &UAttributes) -> Result<(), BridgeError> {
        let request_id = attributes.reqid.as_ref().ok_or_else(|| {
            BridgeError::new(ErrorKind::SerializationError, "response has no request id")
        })?;
        let context = self.inbound_requests.take(request_id).ok_or_else(|| {
            BridgeError::new(
                ErrorKind::NotFound,
                format!(
                    "no pending inbound request {}",
                    request_id.to_hyphenated_string()
                ),
            )
        })?;

        let payload = codec::encode(message, Some(context.correlation))?;
        let failed = attributes
            .commstatus
            .is_some_and(|code| code.enum_value() != Ok(UCode::OK));
        let kind = if failed {
            BusMessageKind::Error
        } else {
            BusMessageKind::Response
        };

        self.session.send(BusMessage {
            client: context.client,
            session: context.session,
            ..bus_message(&context.method, kind, payload)
        })
    }
}
