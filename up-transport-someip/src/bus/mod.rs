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

//! Boundary towards the SOME/IP runtime.
//!
//! The bridge never talks to the network itself. A [`BusRuntime`] implementation wraps the
//! actual SOME/IP stack (an application handle of the local routing manager) and the bridge
//! registers one [`BusEventHandler`] with it on connect. All calls on [`BusRuntime`] are
//! expected to be non-blocking: messages are queued by the runtime and sent asynchronously.
//!
//! Callbacks on [`BusEventHandler`] may be invoked from any runtime thread, including from
//! within a [`BusRuntime`] call made by the bridge.

use bytes::Bytes;
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type ServiceId = u16;
pub type InstanceId = u16;
pub type MemberId = u16;
pub type EventgroupId = u16;
pub type ClientId = u16;
pub type SessionId = u16;
pub type MajorVersion = u8;

/// Registration state reported by the runtime for the bridge's application.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BusState {
    Registered,
    Deregistered,
}

/// Kind of a message on the bus, following the SOME/IP message type field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BusMessageKind {
    Request,
    RequestNoReturn,
    Notification,
    Response,
    Error,
}

/// A single message handed to or received from the runtime.
///
/// For outbound requests the runtime assigns `client` and `session`; the values set by the
/// bridge are ignored. For outbound responses the bridge copies them from the request it
/// answers so the runtime can route the response back.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BusMessage {
    pub service: ServiceId,
    pub instance: InstanceId,
    pub member: MemberId,
    pub interface_version: MajorVersion,
    pub kind: BusMessageKind,
    pub client: ClientId,
    pub session: SessionId,
    pub payload: Bytes,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BusErrorKind {
    /// The local routing manager cannot be reached.
    Unreachable,
    /// The runtime refused the call for the given arguments.
    Rejected,
}

/// Failure reported synchronously by a [`BusRuntime`] call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BusError {
    kind: BusErrorKind,
    message: String,
}

impl BusError {
    pub fn new(kind: BusErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::new(BusErrorKind::Unreachable, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(BusErrorKind::Rejected, message)
    }

    pub fn kind(&self) -> BusErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for BusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for BusError {}

/// Callbacks the runtime invokes on the bridge.
pub trait BusEventHandler: Send + Sync {
    fn on_state(&self, state: BusState);

    fn on_message(&self, message: BusMessage);

    fn on_availability(&self, service: ServiceId, instance: InstanceId, available: bool);

    /// Acknowledgement from the remote offerer for a previously issued event subscription.
    fn on_subscription_status(
        &self,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
        event: MemberId,
        accepted: bool,
    );
}

/// Operations the bridge needs from the SOME/IP runtime.
///
/// One event per eventgroup is assumed: the bridge subscribes eventgroup `n` to receive
/// event `n`.
pub trait BusRuntime: Send + Sync {
    /// Starts (or restarts) the application and installs `handler`.
    ///
    /// Success means the request was accepted; registration is confirmed later through
    /// [`BusEventHandler::on_state`].
    fn connect(&self, handler: Arc<dyn BusEventHandler>) -> Result<(), BusError>;

    fn disconnect(&self);

    fn offer_service(
        &self,
        service: ServiceId,
        instance: InstanceId,
        major: MajorVersion,
    ) -> Result<(), BusError>;

    fn stop_offer_service(
        &self,
        service: ServiceId,
        instance: InstanceId,
        major: MajorVersion,
    ) -> Result<(), BusError>;

    fn offer_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: MemberId,
        eventgroup: EventgroupId,
    ) -> Result<(), BusError>;

    fn stop_offer_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: MemberId,
    ) -> Result<(), BusError>;

    fn request_service(&self, service: ServiceId, instance: InstanceId) -> Result<(), BusError>;

    fn release_service(&self, service: ServiceId, instance: InstanceId) -> Result<(), BusError>;

    fn subscribe_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
        event: MemberId,
    ) -> Result<(), BusError>;

    fn unsubscribe_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
        event: MemberId,
    ) -> Result<(), BusError>;

    fn send_message(&self, message: BusMessage) -> Result<(), BusError>;
}
