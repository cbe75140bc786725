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

//! The bridge facade: lifecycle, outbound routing and listener registration.

mod bus_handler;
mod outbound;
mod utransport;

use crate::bus::BusRuntime;
use crate::config::BridgeConfig;
use crate::control_plane::availability::{AvailabilityState, AvailabilityWatch};
use crate::control_plane::session::{ConnectionState, SessionManager};
use crate::data_plane::inbound_dispatch::{DispatchQueue, ListenerFailure, ListenerTables};
use crate::data_plane::inbound_requests::InboundRequestTable;
use crate::data_plane::rpc_correlator::{RpcCorrelator, RpcError};
use crate::error::{BridgeError, ErrorKind};
use crate::mapping::{entity_uri, BusAddress, EntityKey, IdentifierMapper};
use crate::observability::{events, fields};
use crate::runtime::bridge_runtime::BridgeRuntime;
use bus_handler::BusHandler;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use up_rust::{UListener, UMessage, UUri};

const COMPONENT: &str = "someip_bridge";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Lifecycle {
    Created,
    Open,
    Closed,
}

pub(crate) struct BridgeInner {
    name: String,
    config: BridgeConfig,
    mapper: IdentifierMapper,
    session: Arc<SessionManager>,
    tables: Arc<ListenerTables>,
    correlator: RpcCorrelator,
    inbound_requests: InboundRequestTable,
    dispatch: DispatchQueue,
    failures: broadcast::Sender<ListenerFailure>,
    lifecycle: Mutex<Lifecycle>,
    /// Runs the dispatch loop, and with it every listener call.
    dispatch_runtime: BridgeRuntime,
    /// Runs RPC deadlines, request completions and reconnects, away from listener calls.
    timer_runtime: BridgeRuntime,
}

/// uProtocol transport on top of a SOME/IP runtime.
///
/// Cloning is cheap and every clone drives the same bridge. The bridge is closed when
/// [`SomeipBridge::close`] is called or the last clone is dropped.
#[derive(Clone)]
pub struct SomeipBridge {
    inner: Arc<BridgeInner>,
}

/// How a listener registration is interpreted, decided from its filters.
#[derive(Clone, Debug, Eq, PartialEq)]
enum ListenerKind {
    /// Events published on a topic.
    Topic(BusAddress),
    /// Requests for a method of a local service.
    Method(BusAddress),
    /// Responses and notifications addressed to a local entity.
    Sink(BusAddress, EntityKey),
}

impl SomeipBridge {
    /// Creates a bridge over `runtime`. Nothing is sent to the runtime before [`Self::open`].
    pub fn new(
        name: &str,
        config: BridgeConfig,
        runtime: Arc<dyn BusRuntime>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;

        let dispatch_runtime = BridgeRuntime::spawn(&format!("someip-dispatch-{name}"))?;
        let timer_runtime = BridgeRuntime::spawn(&format!("someip-timers-{name}"))?;
        let timers = timer_runtime.handle().clone();
        let (failures, _) = broadcast::channel(config.listener_failure_capacity);
        let tables = Arc::new(ListenerTables::new());

        let inner = BridgeInner {
            name: name.to_string(),
            mapper: IdentifierMapper::new(config.local_authority(), config.remote_authority()),
            session: Arc::new(SessionManager::new(
                runtime,
                timers.clone(),
                config.reconnect().clone(),
            )),
            dispatch: DispatchQueue::spawn(
                dispatch_runtime.handle(),
                tables.clone(),
                failures.clone(),
            ),
            tables,
            correlator: RpcCorrelator::new(timers),
            inbound_requests: InboundRequestTable::new(config.default_rpc_timeout()),
            failures,
            lifecycle: Mutex::new(Lifecycle::Created),
            dispatch_runtime,
            timer_runtime,
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Offers the configured local services and connects to the runtime.
    ///
    /// If the runtime cannot be reached the error is returned and the bridge keeps trying to
    /// connect in the background with the configured backoff.
    pub fn open(&self) -> Result<(), BridgeError> {
        {
            let mut lifecycle = self.inner.lock_lifecycle();
            match *lifecycle {
                Lifecycle::Created => *lifecycle = Lifecycle::Open,
                Lifecycle::Open => return Ok(()),
                Lifecycle::Closed => return Err(BridgeError::closed()),
            }
        }

        self.inner.offer_configured_services()?;

        let handler = Arc::new(BusHandler::new(Arc::downgrade(&self.inner)));
        if let Err(err) = self.inner.session.connect(handler) {
            warn!(
                event = events::BRIDGE_OPEN,
                component = COMPONENT,
                bridge = %self.inner.name,
                err = %err,
                "bus runtime unreachable, reconnecting in the background"
            );
            self.inner.session.schedule_reconnect();
            return Err(err);
        }

        info!(
            event = events::BRIDGE_OPEN,
            component = COMPONENT,
            bridge = %self.inner.name,
            local_authority = self.inner.config.local_authority(),
            remote_authority = self.inner.config.remote_authority(),
            "bridge opened"
        );
        Ok(())
    }

    /// Withdraws everything from the bus and fails outstanding requests with `Closed`.
    /// Closing is final.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.session.state()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.session.watch_state()
    }

    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), BridgeError> {
        self.inner.session.wait_until_connected(timeout).await
    }

    /// Panics raised by listeners while handling messages.
    pub fn listener_failures(&self) -> broadcast::Receiver<ListenerFailure> {
        self.inner.failures.subscribe()
    }

    /// Whether the remote service instance of `uri` is currently offered.
    pub fn is_available(&self, uri: &UUri) -> Result<bool, BridgeError> {
        let address = self.inner.bus_address_of(uri)?;
        Ok(self
            .inner
            .session
            .availability()
            .is_available(address.service, address.instance))
    }

    pub fn availability_state(&self, uri: &UUri) -> Result<AvailabilityState, BridgeError> {
        let address = self.inner.bus_address_of(uri)?;
        Ok(self
            .inner
            .session
            .availability()
            .state(address.service, address.instance))
    }

    /// Last subscription acknowledgement from the offering side of topic `uri`.
    ///
    /// `None` until the offerer answered, or when no listener is registered for the topic.
    pub fn subscription_status(&self, uri: &UUri) -> Result<Option<bool>, BridgeError> {
        let topic = self.inner.bus_address_of(uri)?;
        Ok(self.inner.session.subscription_status(&topic))
    }

    /// Watches availability changes of the service instance of `uri`, requesting the
    /// service from the runtime so changes get reported.
    pub fn watch_availability(&self, uri: &UUri) -> Result<AvailabilityWatch, BridgeError> {
        self.inner.ensure_usable()?;
        let address = self.inner.bus_address_of(uri)?;
        let watch = self
            .inner
            .session
            .availability()
            .watch(address.service, address.instance);
        self.inner.session.request_service(&address)?;
        Ok(watch)
    }

    /// Sends a message according to its type; see the crate documentation for the routing.
    pub async fn send(&self, message: UMessage) -> Result<(), BridgeError> {
        let result = self.inner.send(&message);
        if let Err(err) = result.as_ref() {
            debug!(
                event = events::BRIDGE_SEND_FAILED,
                component = COMPONENT,
                bridge = %self.inner.name,
                msg_id = %fields::format_message_id(&message),
                msg_type = %fields::format_message_type(&message),
                sink = %fields::format_sink_uri(&message),
                err = %err,
                "send failed"
            );
        }
        result
    }

    /// Sends a request and waits for its response.
    ///
    /// `timeout` overrides the ttl of the request, which in turn overrides the configured
    /// default. A response carrying an error status is still returned as `Ok`.
    pub async fn invoke(
        &self,
        request: UMessage,
        timeout: Option<Duration>,
    ) -> Result<UMessage, BridgeError> {
        let pending = self.inner.start_request(&request, timeout)?;
        pending.await.map_err(BridgeError::from)
    }

    /// Registers `listener`.
    ///
    /// * no sink filter: events published on the topic `source_filter`;
    /// * a sink filter naming a method: requests to that method of a local service, which
    ///   is offered on the bus while it has listeners;
    /// * a sink filter naming a local entity (resource 0): responses to requests sent by that
    ///   entity and notifications addressed to it.
    ///
    /// Only the topic registration matches on `source_filter`.
    pub async fn register_listener(
        &self,
        source_filter: &UUri,
        sink_filter: Option<&UUri>,
        listener: Arc<dyn UListener>,
    ) -> Result<(), BridgeError> {
        self.inner.ensure_usable()?;
        let kind = self.inner.classify(source_filter, sink_filter)?;
        self.inner.add_listener(kind.clone(), sink_filter, listener)?;
        debug!(
            event = events::BRIDGE_REGISTER_LISTENER,
            component = COMPONENT,
            bridge = %self.inner.name,
            source_filter = %fields::format_uri(source_filter),
            sink_filter = %fields::format_optional_uri(sink_filter),
            kind = ?kind,
            "listener registered"
        );
        Ok(())
    }

    pub async fn unregister_listener(
        &self,
        source_filter: &UUri,
        sink_filter: Option<&UUri>,
        listener: Arc<dyn UListener>,
    ) -> Result<(), BridgeError> {
        self.inner.ensure_usable()?;
        let kind = self.inner.classify(source_filter, sink_filter)?;
        self.inner.remove_listener(&kind, sink_filter, &listener)?;
        debug!(
            event = events::BRIDGE_UNREGISTER_LISTENER,
            component = COMPONENT,
            bridge = %self.inner.name,
            source_filter = %fields::format_uri(source_filter),
            sink_filter = %fields::format_optional_uri(sink_filter),
            kind = ?kind,
            "listener unregistered"
        );
        Ok(())
    }
}

impl BridgeInner {
    fn lock_lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registrations are accepted before `open`, traffic only afterwards.
    fn ensure_usable(&self) -> Result<(), BridgeError> {
        match *self.lock_lifecycle() {
            Lifecycle::Closed => Err(BridgeError::closed()),
            Lifecycle::Created | Lifecycle::Open => Ok(()),
        }
    }

    fn ensure_open(&self) -> Result<(), BridgeError> {
        match *self.lock_lifecycle() {
            Lifecycle::Open => Ok(()),
            Lifecycle::Created => Err(BridgeError::new(
                ErrorKind::NotConnected,
                "bridge has not been opened",
            )),
            Lifecycle::Closed => Err(BridgeError::closed()),
        }
    }

    fn offer_configured_services(&self) -> Result<(), BridgeError> {
        for service in self.config.local_services() {
            let uri = UUri {
                authority_name: self.config.local_authority().to_string(),
                ue_id: service.ue_id,
                ue_version_major: service.ue_version_major.into(),
                resource_id: 0,
                ..Default::default()
            };
            let entity = self.mapper.register_local_uri(&uri)?;
            self.session.offer_service(&entity)?;
            for event in &service.events {
                let topic = entity.with_member(*event);
                if !topic.is_event {
                    return Err(BridgeError::new(
                        ErrorKind::MappingError,
                        format!("configured event {event:04X} of {entity} is not an event id"),
                    ));
                }
                self.session.offer_event(&topic)?;
            }
        }
        Ok(())
    }

    fn classify(
        &self,
        source_filter: &UUri,
        sink_filter: Option<&UUri>,
    ) -> Result<ListenerKind, BridgeError> {
        let Some(sink) = sink_filter else {
            let topic = self.bus_address_of(source_filter)?;
            if !topic.is_event {
                return Err(BridgeError::new(
                    ErrorKind::MappingError,
                    format!(
                        "source filter {} is not a topic",
                        fields::format_uri(source_filter)
                    ),
                ));
            }
            return Ok(ListenerKind::Topic(topic));
        };

        let address = self.bus_address_of(sink)?;
        if address.is_method() {
            return Ok(ListenerKind::Method(address));
        }
        if address.is_entity() {
            if sink.authority_name == self.config.remote_authority() {
                return Err(BridgeError::new(
                    ErrorKind::MappingError,
                    format!(
                        "sink filter {} is not a local entity",
                        fields::format_uri(sink)
                    ),
                ));
            }
            let key = EntityKey::with_default_authority(sink, self.config.local_authority());
            return Ok(ListenerKind::Sink(address, key));
        }
        Err(BridgeError::new(
            ErrorKind::MappingError,
            format!("sink filter {} is a topic", fields::format_uri(sink)),
        ))
    }

    fn add_listener(
        &self,
        kind: ListenerKind,
        sink_filter: Option<&UUri>,
        listener: Arc<dyn UListener>,
    ) -> Result<(), BridgeError> {
        match kind {
            ListenerKind::Topic(topic) => {
                self.tables
                    .topics
                    .add(topic, listener, || self.session.subscribe(&topic))?;
            }
            ListenerKind::Method(method) => {
                let entity = self.claim_local_entity(sink_filter)?;
                self.tables.methods.add(method, listener, || {
                    self.offer_claimed(&method.entity(), &entity)
                })?;
            }
            ListenerKind::Sink(address, key) => {
                let entity = self.claim_local_entity(sink_filter)?;
                self.tables
                    .sinks
                    .add(key, listener, || self.offer_claimed(&address, &entity))?;
            }
        }
        Ok(())
    }

    fn remove_listener(
        &self,
        kind: &ListenerKind,
        sink_filter: Option<&UUri>,
        listener: &Arc<dyn UListener>,
    ) -> Result<(), BridgeError> {
        match kind {
            ListenerKind::Topic(topic) => {
                self.tables
                    .topics
                    .remove(topic, listener, || self.session.unsubscribe(topic))?;
            }
            ListenerKind::Method(method) => {
                self.tables.methods.remove(method, listener, || {
                    self.withdraw_claimed(&method.entity(), sink_filter)
                })?;
            }
            ListenerKind::Sink(address, key) => {
                self.tables.sinks.remove(key, listener, || {
                    self.withdraw_claimed(address, sink_filter)
                })?;
            }
        }
        Ok(())
    }

    /// Maps a caller-supplied URI, reading an empty authority as the local one.
    fn bus_address_of(&self, uri: &UUri) -> Result<BusAddress, BridgeError> {
        let uri = self.mapper.with_local_authority(uri);
        Ok(self.mapper.to_bus_address(&uri)?)
    }

    /// Entity of `uri` with the local authority filled in.
    fn local_entity_uri(&self, uri: &UUri) -> UUri {
        entity_uri(&self.mapper.with_local_authority(uri))
    }

    fn claim_local_entity(&self, sink_filter: Option<&UUri>) -> Result<UUri, BridgeError> {
        let sink = sink_filter.ok_or_else(|| {
            BridgeError::new(ErrorKind::MappingError, "registration needs a sink filter")
        })?;
        let entity = self.local_entity_uri(sink);
        self.mapper.register_local_uri(&entity)?;
        Ok(entity)
    }

    /// Offers `service` for a freshly claimed entity, dropping the claim if the offer fails
    /// and nothing else offers the service.
    fn offer_claimed(&self, service: &BusAddress, entity: &UUri) -> Result<(), BridgeError> {
        self.session.offer_service(service).map_err(|err| {
            if !self.session.is_service_offered(service) {
                let _ = self.mapper.unregister_local_uri(entity);
            }
            err
        })
    }

    fn withdraw_claimed(&self, service: &BusAddress, sink_filter: Option<&UUri>) {
        let withdrawn = self.session.stop_offer_service(service);
        if let (true, Some(sink)) = (withdrawn, sink_filter) {
            let _ = self.mapper.unregister_local_uri(&self.local_entity_uri(sink));
        }
    }

    fn close(&self) {
        {
            let mut lifecycle = self.lock_lifecycle();
            if *lifecycle == Lifecycle::Closed {
                return;
            }
            *lifecycle = Lifecycle::Closed;
        }

        let failed = self.correlator.fail_all(RpcError::Closed);
        let topics = self.tables.topics.drain().len();
        self.tables.methods.drain();
        self.tables.sinks.drain();
        self.inbound_requests.clear();
        let withdraw_failures = self.session.shutdown();
        self.mapper.clear();
        self.timer_runtime.shutdown();
        self.dispatch_runtime.shutdown();

        info!(
            event = events::BRIDGE_CLOSE,
            component = COMPONENT,
            bridge = %self.name,
            failed_requests = failed,
            withdraw_failures,
            topics,
            "bridge closed"
        );
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        self.close();
    }
}
