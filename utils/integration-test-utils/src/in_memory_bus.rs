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

//! In-memory bus runtime.
//!
//! Several applications share one [`InMemoryBus`]; each gets its own [`MockBusRuntime`].
//! Like a real routing manager the bus calls back from its own thread, one callback at a
//! time and in the order the triggering calls were made. The routing manager can be stopped
//! and started to exercise reconnect handling.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tokio::sync::oneshot;
use tracing::debug;
use up_transport_someip::bus::{
    BusError, BusEventHandler, BusMessage, BusMessageKind, BusRuntime, BusState, ClientId,
    EventgroupId, InstanceId, MajorVersion, MemberId, ServiceId, SessionId,
};

type Job = Box<dyn FnOnce() + Send>;
type ServiceKey = (ServiceId, InstanceId);
type EventKey = (ServiceId, InstanceId, MemberId);

/// A runtime call as seen by the bus.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BusCall {
    Connect,
    Disconnect,
    OfferService(ServiceId, InstanceId, MajorVersion),
    StopOfferService(ServiceId, InstanceId),
    OfferEvent(ServiceId, InstanceId, MemberId),
    StopOfferEvent(ServiceId, InstanceId, MemberId),
    RequestService(ServiceId, InstanceId),
    ReleaseService(ServiceId, InstanceId),
    Subscribe(ServiceId, InstanceId, EventgroupId),
    Unsubscribe(ServiceId, InstanceId, EventgroupId),
    Send(BusMessageKind, ServiceId, InstanceId, MemberId),
}

#[derive(Default)]
struct Application {
    client: ClientId,
    handler: Option<Arc<dyn BusEventHandler>>,
    registered: bool,
    offers: HashMap<ServiceKey, MajorVersion>,
    events: HashSet<EventKey>,
    requested: HashSet<ServiceKey>,
    subscriptions: HashSet<EventKey>,
    calls: Vec<BusCall>,
}

impl Application {
    fn forget_everything(&mut self) {
        self.registered = false;
        self.offers.clear();
        self.events.clear();
        self.requested.clear();
        self.subscriptions.clear();
    }
}

struct BusTable {
    routing_up: bool,
    accept_subscriptions: bool,
    next_client: ClientId,
    next_session: SessionId,
    applications: HashMap<String, Application>,
    pending_responses: HashMap<(ClientId, SessionId), String>,
}

impl BusTable {
    fn application(&mut self, name: &str) -> &mut Application {
        let next_client = &mut self.next_client;
        self.applications
            .entry(name.to_string())
            .or_insert_with(|| {
                *next_client = next_client.wrapping_add(1).max(1);
                Application {
                    client: *next_client,
                    ..Default::default()
                }
            })
    }

    fn record(&mut self, name: &str, call: BusCall) {
        self.application(name).calls.push(call);
    }

    fn registered(&mut self, name: &str) -> Result<&mut Application, BusError> {
        let routing_up = self.routing_up;
        let application = self.application(name);
        if !routing_up || !application.registered {
            return Err(BusError::unreachable(format!(
                "application {name} is not registered"
            )));
        }
        Ok(application)
    }

    fn offerer(&self, key: ServiceKey) -> Option<&str> {
        self.applications
            .iter()
            .find(|(_, application)| {
                application.registered && application.offers.contains_key(&key)
            })
            .map(|(name, _)| name.as_str())
    }

    fn handler_of(&self, name: &str) -> Option<Arc<dyn BusEventHandler>> {
        self.applications
            .get(name)
            .filter(|application| application.registered)
            .and_then(|application| application.handler.clone())
    }

    /// Handlers of registered applications other than `except` matching `filter`.
    fn handlers_where(
        &self,
        except: &str,
        filter: impl Fn(&Application) -> bool,
    ) -> Vec<Arc<dyn BusEventHandler>> {
        self.applications
            .iter()
            .filter(|(name, application)| {
                name.as_str() != except && application.registered && filter(application)
            })
            .filter_map(|(_, application)| application.handler.clone())
            .collect()
    }

    fn next_session(&mut self) -> SessionId {
        self.next_session = self.next_session.wrapping_add(1).max(1);
        self.next_session
    }
}

/// A shared in-memory SOME/IP routing manager.
pub struct InMemoryBus {
    table: Mutex<BusTable>,
    jobs: Mutex<mpsc::Sender<Job>>,
}

impl InMemoryBus {
    pub fn new() -> Arc<Self> {
        let (jobs, receiver) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("in-memory-bus".to_string())
            .spawn(move || {
                for job in receiver {
                    job();
                }
            })
            .expect("bus callback thread should start");

        Arc::new(Self {
            table: Mutex::new(BusTable {
                routing_up: true,
                accept_subscriptions: true,
                next_client: 0,
                next_session: 0,
                applications: HashMap::new(),
                pending_responses: HashMap::new(),
            }),
            jobs: Mutex::new(jobs),
        })
    }

    /// Runtime for the application `name`.
    pub fn runtime(self: &Arc<Self>, name: &str) -> Arc<MockBusRuntime> {
        self.lock().application(name);
        Arc::new(MockBusRuntime {
            bus: self.clone(),
            application: name.to_string(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BusTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, job: impl FnOnce() + Send + 'static) {
        let _ = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(Box::new(job));
    }

    fn notify_availability(
        &self,
        handlers: Vec<Arc<dyn BusEventHandler>>,
        (service, instance): ServiceKey,
        available: bool,
    ) {
        for handler in handlers {
            self.enqueue(move || handler.on_availability(service, instance, available));
        }
    }

    fn deliver(&self, handler: Arc<dyn BusEventHandler>, message: BusMessage) {
        self.enqueue(move || handler.on_message(message));
    }

    /// Waits until every callback triggered so far has been delivered.
    pub async fn settle(&self) {
        let (done, finished) = oneshot::channel();
        self.enqueue(move || {
            let _ = done.send(());
        });
        let _ = finished.await;
    }

    /// Crashes the routing manager: every application is deregistered and forgotten.
    pub fn stop_routing(&self) {
        let mut table = self.lock();
        table.routing_up = false;
        table.pending_responses.clear();
        let mut handlers = Vec::new();
        for application in table.applications.values_mut() {
            if application.registered {
                if let Some(handler) = application.handler.clone() {
                    handlers.push(handler);
                }
            }
            application.forget_everything();
        }
        for handler in handlers {
            self.enqueue(move || handler.on_state(BusState::Deregistered));
        }
    }

    /// Brings the routing manager back. Applications have to connect again.
    pub fn start_routing(&self) {
        self.lock().routing_up = true;
    }

    pub fn set_accept_subscriptions(&self, accept: bool) {
        self.lock().accept_subscriptions = accept;
    }

    pub fn is_registered(&self, name: &str) -> bool {
        let table = self.lock();
        table.routing_up
            && table
                .applications
                .get(name)
                .is_some_and(|application| application.registered)
    }

    pub fn is_offered(&self, service: ServiceId, instance: InstanceId) -> bool {
        self.lock().offerer((service, instance)).is_some()
    }

    pub fn is_subscribed(
        &self,
        name: &str,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
    ) -> bool {
        self.lock().applications.get(name).is_some_and(|application| {
            application
                .subscriptions
                .contains(&(service, instance, eventgroup))
        })
    }

    /// Every runtime call made by `name`, oldest first.
    pub fn calls(&self, name: &str) -> Vec<BusCall> {
        self.lock()
            .applications
            .get(name)
            .map(|application| application.calls.clone())
            .unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        for application in self.lock().applications.values_mut() {
            application.calls.clear();
        }
    }

    /// Hands `message` to the application `name` as if another application had sent it.
    pub fn inject(&self, name: &str, message: BusMessage) {
        let handler = self.lock().handler_of(name);
        if let Some(handler) = handler {
            self.deliver(handler, message);
        }
    }

    fn connect(&self, name: &str, handler: Arc<dyn BusEventHandler>) -> Result<(), BusError> {
        let mut table = self.lock();
        table.record(name, BusCall::Connect);
        if !table.routing_up {
            return Err(BusError::unreachable("routing manager is down"));
        }
        let application = table.application(name);
        application.handler = Some(handler.clone());
        application.registered = true;
        self.enqueue(move || handler.on_state(BusState::Registered));
        Ok(())
    }

    fn disconnect(&self, name: &str) {
        let mut table = self.lock();
        table.record(name, BusCall::Disconnect);
        let application = table.application(name);
        let withdrawn: Vec<ServiceKey> = application.offers.keys().copied().collect();
        application.forget_everything();
        application.handler = None;

        for key in withdrawn {
            if table.offerer(key).is_none() {
                let handlers =
                    table.handlers_where(name, |application| application.requested.contains(&key));
                self.notify_availability(handlers, key, false);
            }
        }
    }

    fn offer_service(
        &self,
        name: &str,
        service: ServiceId,
        instance: InstanceId,
        major: MajorVersion,
    ) -> Result<(), BusError> {
        let key = (service, instance);
        let mut table = self.lock();
        table.record(name, BusCall::OfferService(service, instance, major));
        let newly_offered = table.offerer(key).is_none();
        table.registered(name)?.offers.insert(key, major);

        if newly_offered {
            let handlers =
                table.handlers_where(name, |application| application.requested.contains(&key));
            self.notify_availability(handlers, key, true);
        }
        Ok(())
    }

    fn stop_offer_service(
        &self,
        name: &str,
        service: ServiceId,
        instance: InstanceId,
    ) -> Result<(), BusError> {
        let key = (service, instance);
        let mut table = self.lock();
        table.record(name, BusCall::StopOfferService(service, instance));
        let application = table.registered(name)?;
        application.offers.remove(&key);
        application
            .events
            .retain(|(event_service, event_instance, _)| (*event_service, *event_instance) != key);

        if table.offerer(key).is_none() {
            let handlers =
                table.handlers_where(name, |application| application.requested.contains(&key));
            self.notify_availability(handlers, key, false);
        }
        Ok(())
    }

    fn offer_event(
        &self,
        name: &str,
        service: ServiceId,
        instance: InstanceId,
        event: MemberId,
    ) -> Result<(), BusError> {
        let mut table = self.lock();
        table.record(name, BusCall::OfferEvent(service, instance, event));
        table
            .registered(name)?
            .events
            .insert((service, instance, event));

        let accepted = table.accept_subscriptions;
        let subscribers = table.handlers_where(name, |application| {
            application.subscriptions.contains(&(service, instance, event))
        });
        for handler in subscribers {
            self.enqueue(move || {
                handler.on_subscription_status(service, instance, event, event, accepted)
            });
        }
        Ok(())
    }

    fn stop_offer_event(
        &self,
        name: &str,
        service: ServiceId,
        instance: InstanceId,
        event: MemberId,
    ) -> Result<(), BusError> {
        let mut table = self.lock();
        table.record(name, BusCall::StopOfferEvent(service, instance, event));
        table
            .registered(name)?
            .events
            .remove(&(service, instance, event));
        Ok(())
    }

    fn request_service(
        &self,
        name: &str,
        service: ServiceId,
        instance: InstanceId,
    ) -> Result<(), BusError> {
        let key = (service, instance);
        let mut table = self.lock();
        table.record(name, BusCall::RequestService(service, instance));
        table.registered(name)?.requested.insert(key);

        let offered = table.offerer(key).is_some();
        if let (true, Some(handler)) = (offered, table.handler_of(name)) {
            self.notify_availability(vec![handler], key, true);
        }
        Ok(())
    }

    fn release_service(
        &self,
        name: &str,
        service: ServiceId,
        instance: InstanceId,
    ) -> Result<(), BusError> {
        let mut table = self.lock();
        table.record(name, BusCall::ReleaseService(service, instance));
        table.registered(name)?.requested.remove(&(service, instance));
        Ok(())
    }

    fn subscribe_event(
        &self,
        name: &str,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
        event: MemberId,
    ) -> Result<(), BusError> {
        let mut table = self.lock();
        table.record(name, BusCall::Subscribe(service, instance, eventgroup));
        table
            .registered(name)?
            .subscriptions
            .insert((service, instance, eventgroup));

        let event_offered = table.applications.values().any(|application| {
            application.registered && application.events.contains(&(service, instance, event))
        });
        let accepted = table.accept_subscriptions;
        if let (true, Some(handler)) = (event_offered, table.handler_of(name)) {
            self.enqueue(move || {
                handler.on_subscription_status(service, instance, eventgroup, event, accepted)
            });
        }
        Ok(())
    }

    fn unsubscribe_event(
        &self,
        name: &str,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
    ) -> Result<(), BusError> {
        let mut table = self.lock();
        table.record(name, BusCall::Unsubscribe(service, instance, eventgroup));
        table
            .registered(name)?
            .subscriptions
            .remove(&(service, instance, eventgroup));
        Ok(())
    }

    fn send_message(&self, name: &str, mut message: BusMessage) -> Result<(), BusError> {
        let mut table = self.lock();
        table.record(
            name,
            BusCall::Send(
                message.kind,
                message.service,
                message.instance,
                message.member,
            ),
        );
        let client = table.registered(name)?.client;
        let key = (message.service, message.instance);

        match message.kind {
            BusMessageKind::Notification => {
                let event = (message.service, message.instance, message.member);
                let subscribers = table
                    .handlers_where(name, |application| application.subscriptions.contains(&event));
                for handler in subscribers {
                    self.deliver(handler, message.clone());
                }
            }
            BusMessageKind::Request | BusMessageKind::RequestNoReturn => {
                message.client = client;
                message.session = table.next_session();
                let Some(offerer) = table.offerer(key).map(str::to_string) else {
                    debug!(
                        service = message.service,
                        instance = message.instance,
                        "no application offers the service, dropping request"
                    );
                    return Ok(());
                };
                if message.kind == BusMessageKind::Request {
                    table
                        .pending_responses
                        .insert((message.client, message.session), name.to_string());
                }
                if let Some(handler) = table.handler_of(&offerer) {
                    self.deliver(handler, message);
                }
            }
            BusMessageKind::Response | BusMessageKind::Error => {
                let caller = table
                    .pending_responses
                    .remove(&(message.client, message.session));
                if let Some(handler) = caller.and_then(|caller| table.handler_of(&caller)) {
                    self.deliver(handler, message);
                }
            }
        }
        Ok(())
    }
}

/// The view of one application on an [`InMemoryBus`].
pub struct MockBusRuntime {
    bus: Arc<InMemoryBus>,
    application: String,
}

impl MockBusRuntime {
    pub fn application(&self) -> &str {
        &self.application
    }
}

impl BusRuntime for MockBusRuntime {
    fn connect(&self, handler: Arc<dyn BusEventHandler>) -> Result<(), BusError> {
        self.bus.connect(&self.application, handler)
    }

    fn disconnect(&self) {
        self.bus.disconnect(&self.application);
    }

    fn offer_service(
        &self,
        service: ServiceId,
        instance: InstanceId,
        major: MajorVersion,
    ) -> Result<(), BusError> {
        self.bus
            .offer_service(&self.application, service, instance, major)
    }

    fn stop_offer_service(
        &self,
        service: ServiceId,
        instance: InstanceId,
        _major: MajorVersion,
    ) -> Result<(), BusError> {
        self.bus
            .stop_offer_service(&self.application, service, instance)
    }

    fn offer_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: MemberId,
        _eventgroup: EventgroupId,
    ) -> Result<(), BusError> {
        self.bus
            .offer_event(&self.application, service, instance, event)
    }

    fn stop_offer_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: MemberId,
    ) -> Result<(), BusError> {
        self.bus
            .stop_offer_event(&self.application, service, instance, event)
    }

    fn request_service(&self, service: ServiceId, instance: InstanceId) -> Result<(), BusError> {
        self.bus
            .request_service(&self.application, service, instance)
    }

    fn release_service(&self, service: ServiceId, instance: InstanceId) -> Result<(), BusError> {
        self.bus
            .release_service(&self.application, service, instance)
    }

    fn subscribe_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
        event: MemberId,
    ) -> Result<(), BusError> {
        self.bus
            .subscribe_event(&self.application, service, instance, eventgroup, event)
    }

    fn unsubscribe_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        eventgroup: EventgroupId,
        _event: MemberId,
    ) -> Result<(), BusError> {
        self.bus
            .unsubscribe_event(&self.application, service, instance, eventgroup)
    }

    fn send_message(&self, message: BusMessage) -> Result<(), BusError> {
        self.bus.send_message(&self.application, message)
    }
}
