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

//! Delivery of inbound messages to local listeners.
//!
//! Bus callbacks only enqueue; a single loop on the bridge runtime calls the listeners, one
//! delivery at a time and in registration order. A panicking listener is contained and
//! reported on the listener-failure channel.

use crate::data_plane::listener_registry::ListenerRegistry;
use crate::mapping::{BusAddress, EntityKey};
use crate::observability::{events, fields};
use futures::FutureExt;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn, Level};
use up_rust::UMessage;

const COMPONENT: &str = "inbound_dispatch";

/// Listener tables shared by the facade, which writes them, and the dispatch loop.
pub(crate) struct ListenerTables {
    /// Event subscriptions keyed by topic address.
    pub(crate) topics: ListenerRegistry<BusAddress>,
    /// Request handlers of local services keyed by method address.
    pub(crate) methods: ListenerRegistry<BusAddress>,
    /// Receivers of responses and notifications keyed by the local entity.
    pub(crate) sinks: ListenerRegistry<EntityKey>,
}

impl ListenerTables {
    pub(crate) fn new() -> Self {
        Self {
            topics: ListenerRegistry::new("topics"),
            methods: ListenerRegistry::new("methods"),
            sinks: ListenerRegistry::new("sinks"),
        }
    }

    fn listeners(&self, target: &DispatchTarget) -> Vec<Arc<dyn up_rust::UListener>> {
        match target {
            DispatchTarget::Topic(topic) => self.topics.listeners(topic),
            DispatchTarget::Method(method) => self.methods.listeners(method),
            DispatchTarget::Sink(entity) => self.sinks.listeners(entity),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum DispatchTarget {
    Topic(BusAddress),
    Method(BusAddress),
    Sink(EntityKey),
}

impl Display for DispatchTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DispatchTarget::Topic(topic) => write!(f, "topic {topic}"),
            DispatchTarget::Method(method) => write!(f, "method {method}"),
            DispatchTarget::Sink(entity) => write!(f, "sink {entity:?}"),
        }
    }
}

pub(crate) struct Delivery {
    pub(crate) target: DispatchTarget,
    pub(crate) message: UMessage,
}

/// A listener that panicked while handling a message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListenerFailure {
    pub target: String,
    pub message_id: String,
    pub reason: String,
}

#[derive(Clone)]
pub(crate) struct DispatchQueue {
    sender: mpsc::UnboundedSender<Delivery>,
}

impl DispatchQueue {
    /// Spawns the dispatch loop on `handle`. The loop ends when every queue handle is dropped.
    pub(crate) fn spawn(
        handle: &Handle,
        tables: Arc<ListenerTables>,
        failures: broadcast::Sender<ListenerFailure>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        handle.spawn(dispatch_loop(receiver, tables, failures));
        Self { sender }
    }

    pub(crate) fn enqueue(&self, target: DispatchTarget, message: UMessage) {
        if let Err(rejected) = self.sender.send(Delivery { target, message }) {
            warn!(
                event = events::DISPATCH_QUEUE_CLOSED,
                component = COMPONENT,
                target = %rejected.0.target,
                msg_id = %fields::format_message_id(&rejected.0.message),
                "dispatch loop stopped, dropping message"
            );
        }
    }
}

async fn dispatch_loop(
    mut receiver: mpsc::UnboundedReceiver<Delivery>,
    tables: Arc<ListenerTables>,
    failures: broadcast::Sender<ListenerFailure>,
) {
    while let Some(delivery) = receiver.recv().await {
        deliver(&tables, &failures, delivery).await;
    }
    debug!(
        event = events::DISPATCH_QUEUE_CLOSED,
        component = COMPONENT,
        "dispatch loop finished"
    );
}

async fn deliver(
    tables: &ListenerTables,
    failures: &broadcast::Sender<ListenerFailure>,
    delivery: Delivery,
) {
    let Delivery { target, message } = delivery;
    let listeners = tables.listeners(&target);

    if listeners.is_empty() {
        let method_without_handler = matches!(target, DispatchTarget::Method(_));
        if method_without_handler {
            warn!(
                event = events::DISPATCH_NO_LISTENER,
                component = COMPONENT,
                target = %target,
                msg_id = %fields::format_message_id(&message),
                "request for a method without handler, caller will time out"
            );
        } else {
            debug!(
                event = events::DISPATCH_NO_LISTENER,
                component = COMPONENT,
                target = %target,
                msg_id = %fields::format_message_id(&message),
                "no listener left for message"
            );
        }
        return;
    }

    if tracing::enabled!(Level::DEBUG) {
        debug!(
            event = events::DISPATCH_RECEIVE,
            component = COMPONENT,
            target = %target,
            msg_id = %fields::format_message_id(&message),
            msg_type = %fields::format_message_type(&message),
            src = %fields::format_source_uri(&message),
            sink = %fields::format_sink_uri(&message),
            listeners = listeners.len(),
            "delivering message"
        );
    }

    for listener in listeners {
        let outcome = AssertUnwindSafe(listener.on_receive(message.clone()))
            .catch_unwind()
            .await;
        if let Err(payload) = outcome {
            let failure = ListenerFailure {
                target: target.to_string(),
                message_id: fields::format_message_id(&message),
                reason: fields::format_panic_payload(payload.as_ref()),
            };
            warn!(
                event = events::DISPATCH_LISTENER_PANIC,
                component = COMPONENT,
                target = %failure.target,
                msg_id = %failure.message_id,
                reason = %failure.reason,
                "listener panicked, continuing with the next one"
            );
            // Nobody observing failures is fine.
            let _ = failures.send(failure);
        }
    }
}
