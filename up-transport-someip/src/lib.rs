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

//! # up-transport-someip
//!
//! `up-transport-someip` carries uProtocol messages over a SOME/IP-style service bus.
//!
//! uProtocol entities are addressed by URI and talk through publish/subscribe, notifications
//! and request/response. On the bus the same entities are numeric service instances with
//! methods and events. [`SomeipBridge`] maps one onto the other and implements
//! [`up_rust::UTransport`], so uEntities use the bus like any other transport.
//!
//! The bus runtime itself sits behind the [`bus::BusRuntime`] trait. The bridge records every
//! offer, service request and subscription it makes and replays them whenever the runtime
//! registers it again, so a runtime restart is invisible to registered listeners.
//!
//! ## Routing
//!
//! | uProtocol message | bus message                                      |
//! |-------------------|--------------------------------------------------|
//! | `PUBLISH`         | event notification on the topic's event id       |
//! | `NOTIFICATION`    | fire-and-forget request to the destination entity |
//! | `REQUEST`         | request, answered through the pending-request table |
//! | `RESPONSE`        | response or error to the original caller         |
//!
//! ## Publish and subscribe
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use integration_test_utils::{InMemoryBus, RecordingListener};
//! use up_rust::{UMessageBuilder, UPayloadFormat, UUri};
//! use up_transport_someip::{BridgeConfig, SomeipBridge};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let bus = InMemoryBus::new();
//! let vehicle = SomeipBridge::new(
//!     "vehicle",
//!     BridgeConfig::new("vehicle", "cloud"),
//!     bus.runtime("vehicle"),
//! )
//! .unwrap();
//! let cloud = SomeipBridge::new(
//!     "cloud",
//!     BridgeConfig::new("cloud", "vehicle"),
//!     bus.runtime("cloud"),
//! )
//! .unwrap();
//! vehicle.open().unwrap();
//! cloud.open().unwrap();
//! vehicle.wait_until_connected(Duration::from_secs(1)).await.unwrap();
//! cloud.wait_until_connected(Duration::from_secs(1)).await.unwrap();
//!
//! let speed = UUri::try_from_parts("vehicle", 0x0042, 1, 0x8001).unwrap();
//! let listener = RecordingListener::new();
//! cloud
//!     .register_listener(&speed, None, listener.clone())
//!     .await
//!     .unwrap();
//! bus.settle().await;
//!
//! let update = UMessageBuilder::publish(speed)
//!     .build_with_payload("42", UPayloadFormat::UPAYLOAD_FORMAT_TEXT)
//!     .unwrap();
//! vehicle.send(update).await.unwrap();
//!
//! let received = listener.wait_for(1, Duration::from_secs(1)).await;
//! assert_eq!(received.len(), 1);
//! vehicle.close();
//! cloud.close();
//! # });
//! ```

pub mod bus;
pub mod codec;
pub mod config;
pub use config::{BridgeConfig, ConfigError, LocalServiceConfig, ReconnectPolicy};
mod control_plane;
pub use control_plane::availability::{AvailabilityState, AvailabilityWatch};
pub use control_plane::session::ConnectionState;
mod data_plane;
pub use data_plane::inbound_dispatch::ListenerFailure;
pub use data_plane::rpc_correlator::RpcError;
pub mod error;
pub use error::{BridgeError, ErrorKind};
pub mod mapping;
pub use mapping::{BusAddress, IdentifierMapper, MappingError, DEFAULT_INSTANCE};
mod observability;
mod runtime;
mod transport;
pub use transport::SomeipBridge;
