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

//! Connection to the bus runtime and everything that has to survive a runtime restart.
//!
//! The session owns the only [`BusRuntime`] handle. Offers, offered events, service requests
//! and event subscriptions are recorded here whether or not the runtime is registered, and the
//! complete record is replayed each time the runtime (re)registers the bridge. Messages are
//! traffic, not state: [`SessionManager::send`] fails fast while the runtime is not registered.

use crate::bus::{
    BusEventHandler, BusMessage, BusRuntime, BusState, EventgroupId, InstanceId, MajorVersion,
    MemberId, ServiceId,
};
use crate::config::ReconnectPolicy;
use crate::control_plane::availability::AvailabilityTracker;
use crate::error::BridgeError;
use crate::mapping::BusAddress;
use crate::observability::events;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "session";

/// Registration state of the bridge with the bus runtime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What a runtime state callback meant for the rest of the bridge.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum StateTransition {
    Established,
    Lost,
    Unchanged,
}

type ServiceKey = (ServiceId, InstanceId);
type EventKey = (ServiceId, InstanceId, MemberId);
type SubscriptionKey = (ServiceId, InstanceId, EventgroupId);

struct OfferRecord {
    major: MajorVersion,
    ref_count: usize,
}

pub(crate) struct SessionManager {
    runtime: Arc<dyn BusRuntime>,
    handle: Handle,
    reconnect_policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    availability: AvailabilityTracker,
    handler: Mutex<Option<Arc<dyn BusEventHandler>>>,
    offers: Mutex<HashMap<ServiceKey, OfferRecord>>,
    offered_events: Mutex<HashSet<EventKey>>,
    requested_services: Mutex<HashSet<ServiceKey>>,
    subscriptions: Mutex<HashSet<SubscriptionKey>>,
    subscription_acks: Mutex<HashMap<SubscriptionKey, bool>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionManager {
    pub(crate) fn new(
        runtime: Arc<dyn BusRuntime>,
        handle: Handle,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            runtime,
            handle,
            reconnect_policy,
            state,
            availability: AvailabilityTracker::new(),
            handler: Mutex::new(None),
            offers: Mutex::new(HashMap::new()),
            offered_events: Mutex::new(HashSet::new()),
            requested_services: Mutex::new(HashSet::new()),
            subscriptions: Mutex::new(HashSet::new()),
            subscription_acks: Mutex::new(HashMap::new()),
            reconnect_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn availability(&self) -> &AvailabilityTracker {
        &self.availability
    }

    fn set_state(&self, new_state: ConnectionState) -> ConnectionState {
        let previous = self.state.send_replace(new_state);
        if previous != new_state {
            info!(
                event = events::SESSION_STATE_CHANGE,
                component = COMPONENT,
                from = ?previous,
                to = ?new_state,
                "connection state changed"
            );
        }
        previous
    }

    /// Starts the runtime application. Registration is confirmed through [`Self::on_state`].
    pub(crate) fn connect(&self, handler: Arc<dyn BusEventHandler>) -> Result<(), BridgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::closed());
        }
        *lock(&self.handler) = Some(handler.clone());
        self.set_state(ConnectionState::Connecting);

        if let Err(err) = self.runtime.connect(handler) {
            // A registration callback delivered during `connect` wins over the failure.
            if self.state() != ConnectionState::Connected {
                self.set_state(ConnectionState::Disconnected);
            }
            warn!(
                event = events::SESSION_CONNECT_FAILED,
                component = COMPONENT,
                err = %err,
                "bus runtime refused connect"
            );
            return Err(err.into());
        }
        Ok(())
    }

    /// Waits until the runtime registered the bridge, or `timeout` elapsed.
    pub(crate) async fn wait_until_connected(&self, timeout: Duration) -> Result<(), BridgeError> {
        let mut receiver = self.state.subscribe();
        let outcome = tokio::time::timeout(
            timeout,
            receiver.wait_for(|state| *state == ConnectionState::Connected),
        )
        .await
        .map(|registered| registered.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(BridgeError::closed()),
            Err(_) => Err(BridgeError::not_connected()),
        }
    }

    pub(crate) fn on_state(&self, state: BusState) -> StateTransition {
        if self.closed.load(Ordering::Acquire) {
            return StateTransition::Unchanged;
        }
        match state {
            BusState::Registered => {
                if self.set_state(ConnectionState::Connected) == ConnectionState::Connected {
                    return StateTransition::Unchanged;
                }
                self.replay();
                StateTransition::Established
            }
            BusState::Deregistered => {
                if self.set_state(ConnectionState::Disconnected) == ConnectionState::Disconnected {
                    return StateTransition::Unchanged;
                }
                StateTransition::Lost
            }
        }
    }

    pub(crate) fn on_availability(
        &self,
        service: ServiceId,
        instance: InstanceId,
        available: bool,
    ) {
        self.availability.update(service, instance, available);
    }

    pub(crate) fn on_subscription_status(
        &self,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
        event: MemberId,
        accepted: bool,
    ) {
        let key = (service, instance, eventgroup);
        if !lock(&self.subscriptions).contains(&key) {
            debug!(
                event = events::SESSION_SUBSCRIPTION_STATUS,
                component = COMPONENT,
                service = format_args!("{service:04X}"),
                instance = format_args!("{instance:04X}"),
                eventgroup = format_args!("{eventgroup:04X}"),
                accepted,
                "status for a subscription that is no longer active"
            );
            return;
        }
        lock(&self.subscription_acks).insert(key, accepted);
        if accepted {
            debug!(
                event = events::SESSION_SUBSCRIPTION_STATUS,
                component = COMPONENT,
                service = format_args!("{service:04X}"),
                instance = format_args!("{instance:04X}"),
                eventgroup = format_args!("{eventgroup:04X}"),
                member = format_args!("{event:04X}"),
                "subscription accepted"
            );
        } else {
            warn!(
                event = events::SESSION_SUBSCRIPTION_STATUS,
                component = COMPONENT,
                service = format_args!("{service:04X}"),
                instance = format_args!("{instance:04X}"),
                eventgroup = format_args!("{eventgroup:04X}"),
                member = format_args!("{event:04X}"),
                "subscription rejected by the offering side, kept for replay"
            );
        }
    }

    /// Last acknowledgement received for the subscription of `topic`, if any.
    pub(crate) fn subscription_status(&self, topic: &BusAddress) -> Option<bool> {
        lock(&self.subscription_acks)
            .get(&(topic.service, topic.instance, topic.member))
            .copied()
    }

    fn record_bus_failure(&self, call: &'static str, address: &BusAddress, err: &BridgeError) {
        warn!(
            event = events::SESSION_BUS_CALL_FAILED,
            component = COMPONENT,
            call,
            address = %address,
            err = %err,
            "bus runtime call failed"
        );
    }

    /// Offers the service of `entity`. Offers are reference counted per service instance.
    pub(crate) fn offer_service(&self, entity: &BusAddress) -> Result<(), BridgeError> {
        let mut offers = lock(&self.offers);
        let record = offers.entry(entity.service_key()).or_insert(OfferRecord {
            major: entity.major_version,
            ref_count: 0,
        });
        record.ref_count += 1;
        if record.ref_count > 1 {
            return Ok(());
        }

        debug!(
            event = events::SESSION_OFFER,
            component = COMPONENT,
            address = %entity.entity(),
            deferred = !self.is_connected(),
            "offering service"
        );
        if self.is_connected() {
            if let Err(err) =
                self.runtime
                    .offer_service(entity.service, entity.instance, entity.major_version)
            {
                let err = BridgeError::from(err);
                self.record_bus_failure("offer_service", entity, &err);
                offers.remove(&entity.service_key());
                return Err(err);
            }
        }
        Ok(())
    }

    pub(crate) fn is_service_offered(&self, entity: &BusAddress) -> bool {
        lock(&self.offers).contains_key(&entity.service_key())
    }

    /// Drops one offer reference. Returns `true` when the service is no longer offered.
    pub(crate) fn stop_offer_service(&self, entity: &BusAddress) -> bool {
        let mut offers = lock(&self.offers);
        let Some(record) = offers.get_mut(&entity.service_key()) else {
            return false;
        };
        record.ref_count -= 1;
        if record.ref_count > 0 {
            return false;
        }
        let major = record.major;
        offers.remove(&entity.service_key());

        let events: Vec<EventKey> = {
            let mut offered_events = lock(&self.offered_events);
            let events = offered_events
                .iter()
                .filter(|(service, instance, _)| (*service, *instance) == entity.service_key())
                .copied()
                .collect();
            offered_events.retain(|(service, instance, _)| {
                (*service, *instance) != entity.service_key()
            });
            events
        };

        debug!(
            event = events::SESSION_STOP_OFFER,
            component = COMPONENT,
            address = %entity.entity(),
            events = events.len(),
            "stopping service offer"
        );
        if self.is_connected() {
            for (service, instance, event) in events {
                if let Err(err) = self.runtime.stop_offer_event(service, instance, event) {
                    self.record_bus_failure(
                        "stop_offer_event",
                        &entity.with_member(event),
                        &err.into(),
                    );
                }
            }
            if let Err(err) = self
                .runtime
                .stop_offer_service(entity.service, entity.instance, major)
            {
                self.record_bus_failure("stop_offer_service", entity, &err.into());
            }
        }
        true
    }

    /// Offers the event at `topic`. The service must be offered as well. Idempotent.
    pub(crate) fn offer_event(&self, topic: &BusAddress) -> Result<(), BridgeError> {
        let key = (topic.service, topic.instance, topic.member);
        let mut offered_events = lock(&self.offered_events);
        if !offered_events.insert(key) {
            return Ok(());
        }

        debug!(
            event = events::SESSION_OFFER_EVENT,
            component = COMPONENT,
            address = %topic,
            deferred = !self.is_connected(),
            "offering event"
        );
        if self.is_connected() {
            if let Err(err) =
                self.runtime
                    .offer_event(topic.service, topic.instance, topic.member, topic.member)
            {
                let err = BridgeError::from(err);
                self.record_bus_failure("offer_event", topic, &err);
                offered_events.remove(&key);
                return Err(err);
            }
        }
        Ok(())
    }

    pub(crate) fn is_event_offered(&self, topic: &BusAddress) -> bool {
        lock(&self.offered_events).contains(&(topic.service, topic.instance, topic.member))
    }

    /// Asks the runtime to discover the given remote service instance. Idempotent.
    pub(crate) fn request_service(&self, entity: &BusAddress) -> Result<(), BridgeError> {
        let mut requested = lock(&self.requested_services);
        if !requested.insert(entity.service_key()) {
            return Ok(());
        }

        debug!(
            event = events::SESSION_REQUEST_SERVICE,
            component = COMPONENT,
            address = %entity.entity(),
            deferred = !self.is_connected(),
            "requesting service"
        );
        if self.is_connected() {
            if let Err(err) = self.runtime.request_service(entity.service, entity.instance) {
                let err = BridgeError::from(err);
                self.record_bus_failure("request_service", entity, &err);
                requested.remove(&entity.service_key());
                return Err(err);
            }
        }
        Ok(())
    }

    pub(crate) fn subscribe(&self, topic: &BusAddress) -> Result<(), BridgeError> {
        self.request_service(topic)?;

        let key = (topic.service, topic.instance, topic.member);
        let mut subscriptions = lock(&self.subscriptions);
        if !subscriptions.insert(key) {
            return Ok(());
        }

        debug!(
            event = events::SESSION_SUBSCRIBE,
            component = COMPONENT,
            address = %topic,
            deferred = !self.is_connected(),
            "subscribing event"
        );
        if self.is_connected() {
            if let Err(err) = self.runtime.subscribe_event(
                topic.service,
                topic.instance,
                topic.member,
                topic.member,
            ) {
                let err = BridgeError::from(err);
                self.record_bus_failure("subscribe_event", topic, &err);
                subscriptions.remove(&key);
                return Err(err);
            }
        }
        Ok(())
    }

    pub(crate) fn unsubscribe(&self, topic: &BusAddress) {
        let key = (topic.service, topic.instance, topic.member);
        let mut subscriptions = lock(&self.subscriptions);
        if !subscriptions.remove(&key) {
            return;
        }
        lock(&self.subscription_acks).remove(&key);

        debug!(
            event = events::SESSION_UNSUBSCRIBE,
            component = COMPONENT,
            address = %topic,
            "unsubscribing event"
        );
        if self.is_connected() {
            if let Err(err) = self.runtime.unsubscribe_event(
                topic.service,
                topic.instance,
                topic.member,
                topic.member,
            ) {
                self.record_bus_failure("unsubscribe_event", topic, &err.into());
            }
        }
    }

    /// Hands a message to the runtime. Fails fast unless the runtime registered the bridge.
    pub(crate) fn send(&self, message: BusMessage) -> Result<(), BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::not_connected());
        }
        self.runtime.send_message(message).map_err(BridgeError::from)
    }

    /// Re-issues every recorded offer, service request and subscription.
    ///
    /// Each table stays locked while its entries are re-issued so a concurrent removal is
    /// either replayed-then-removed or not replayed at all.
    fn replay(&self) {
        info!(
            event = events::SESSION_REPLAY_START,
            component = COMPONENT,
            "replaying offers, requests and subscriptions"
        );
        let mut failures = 0usize;

        {
            let offers = lock(&self.offers);
            for ((service, instance), record) in offers.iter() {
                if let Err(err) = self.runtime.offer_service(*service, *instance, record.major) {
                    failures += 1;
                    self.record_replay_failure("offer_service", *service, *instance, &err);
                }
            }
        }
        {
            let offered_events = lock(&self.offered_events);
            for (service, instance, event) in offered_events.iter() {
                if let Err(err) = self.runtime.offer_event(*service, *instance, *event, *event) {
                    failures += 1;
                    self.record_replay_failure("offer_event", *service, *instance, &err);
                }
            }
        }
        {
            let requested = lock(&self.requested_services);
            for (service, instance) in requested.iter() {
                if let Err(err) = self.runtime.request_service(*service, *instance) {
                    failures += 1;
                    self.record_replay_failure("request_service", *service, *instance, &err);
                }
            }
        }
        {
            let subscriptions = lock(&self.subscriptions);
            lock(&self.subscription_acks).clear();
            for (service, instance, eventgroup) in subscriptions.iter() {
                if let Err(err) =
                    self.runtime
                        .subscribe_event(*service, *instance, *eventgroup, *eventgroup)
                {
                    failures += 1;
                    self.record_replay_failure("subscribe_event", *service, *instance, &err);
                }
            }
        }

        if failures == 0 {
            info!(
                event = events::SESSION_REPLAY_OK,
                component = COMPONENT,
                "replay complete"
            );
        } else {
            warn!(
                event = events::SESSION_REPLAY_FAILED,
                component = COMPONENT,
                failures,
                "replay finished with failures"
            );
        }
    }

    fn record_replay_failure(
        &self,
        call: &'static str,
        service: ServiceId,
        instance: InstanceId,
        err: &crate::bus::BusError,
    ) {
        warn!(
            event = events::SESSION_REPLAY_FAILED,
            component = COMPONENT,
            call,
            service = format_args!("{service:04X}"),
            instance = format_args!("{instance:04X}"),
            err = %err,
            "replay call failed"
        );
    }

    /// Starts the reconnect loop unless one is already running.
    pub(crate) fn schedule_reconnect(self: &Arc<Self>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut task = lock(&self.reconnect_task);
        if task.as_ref().is_some_and(|running| !running.is_finished()) {
            return;
        }
        let session = Arc::downgrade(self);
        *task = Some(self.handle.spawn(reconnect_loop(session)));
    }

    fn record_withdraw_failure(
        &self,
        call: &'static str,
        service: ServiceId,
        instance: InstanceId,
        err: &crate::bus::BusError,
    ) {
        warn!(
            event = events::SESSION_BUS_CALL_FAILED,
            component = COMPONENT,
            call,
            service = format_args!("{service:04X}"),
            instance = format_args!("{instance:04X}"),
            err = %err,
            "withdrawal during shutdown failed"
        );
    }

    /// Withdraws everything from the bus, disconnects and refuses any further registration.
    ///
    /// Returns how many withdrawals the runtime refused.
    pub(crate) fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::AcqRel) {
            return 0;
        }
        if let Some(task) = lock(&self.reconnect_task).take() {
            task.abort();
        }

        let connected = self.is_connected();
        let subscriptions: Vec<SubscriptionKey> = lock(&self.subscriptions).drain().collect();
        let events: Vec<EventKey> = lock(&self.offered_events).drain().collect();
        let offers: Vec<(ServiceKey, MajorVersion)> = lock(&self.offers)
            .drain()
            .map(|(key, record)| (key, record.major))
            .collect();
        let requested: Vec<ServiceKey> = lock(&self.requested_services).drain().collect();
        lock(&self.subscription_acks).clear();

        let mut failures = 0usize;
        if connected {
            for (service, instance, eventgroup) in subscriptions {
                if let Err(err) =
                    self.runtime
                        .unsubscribe_event(service, instance, eventgroup, eventgroup)
                {
                    failures += 1;
                    self.record_withdraw_failure("unsubscribe_event", service, instance, &err);
                }
            }
            for (service, instance, event) in events {
                if let Err(err) = self.runtime.stop_offer_event(service, instance, event) {
                    failures += 1;
                    self.record_withdraw_failure("stop_offer_event", service, instance, &err);
                }
            }
            for ((service, instance), major) in offers {
                if let Err(err) = self.runtime.stop_offer_service(service, instance, major) {
                    failures += 1;
                    self.record_withdraw_failure("stop_offer_service", service, instance, &err);
                }
            }
            for (service, instance) in requested {
                debug!(
                    event = events::SESSION_RELEASE_SERVICE,
                    component = COMPONENT,
                    service = format_args!("{service:04X}"),
                    instance = format_args!("{instance:04X}"),
                    "releasing service"
                );
                if let Err(err) = self.runtime.release_service(service, instance) {
                    failures += 1;
                    self.record_withdraw_failure("release_service", service, instance, &err);
                }
            }
        }
        self.runtime.disconnect();
        lock(&self.handler).take();
        self.availability.clear();
        self.set_state(ConnectionState::Disconnected);
        failures
    }
}

async fn reconnect_loop(session: Weak<SessionManager>) {
    let mut attempt = 0u32;
    loop {
        let Some(current) = session.upgrade() else {
            return;
        };
        if current.closed.load(Ordering::Acquire) || current.is_connected() {
            return;
        }
        if !current.reconnect_policy.allows_attempt(attempt) {
            error!(
                event = events::SESSION_RECONNECT_EXHAUSTED,
                component = COMPONENT,
                attempts = attempt,
                "giving up on reconnecting to the bus runtime"
            );
            return;
        }
        let delay = current.reconnect_policy.delay_for_attempt(attempt);
        drop(current);

        tokio::time::sleep(delay).await;

        let Some(current) = session.upgrade() else {
            return;
        };
        if current.closed.load(Ordering::Acquire) || current.is_connected() {
            return;
        }
        let Some(handler) = lock(&current.handler).clone() else {
            return;
        };

        info!(
            event = events::SESSION_RECONNECT_ATTEMPT,
            component = COMPONENT,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnecting to the bus runtime"
        );
        if current.connect(handler).is_ok() {
            let next_delay = current.reconnect_policy.delay_for_attempt(attempt + 1);
            let mut receiver = current.watch_state();
            drop(current);
            let registered = tokio::time::timeout(
                next_delay,
                receiver.wait_for(|state| *state == ConnectionState::Connected),
            )
            .await
            .is_ok_and(|registered| registered.is_ok());
            if registered {
                return;
            }
        }
        attempt = attempt.saturating_add(1);
    }
}
