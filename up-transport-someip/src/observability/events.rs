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

//! Canonical structured event names used across the bridge.

// Identifier mapping.
pub const MAPPING_LOCAL_REGISTER: &str = "mapping_local_register";
pub const MAPPING_LOCAL_UNREGISTER: &str = "mapping_local_unregister";

// Session lifecycle and bus calls.
pub const SESSION_STATE_CHANGE: &str = "session_state_change";
pub const SESSION_CONNECT_FAILED: &str = "session_connect_failed";
pub const SESSION_RECONNECT_ATTEMPT: &str = "session_reconnect_attempt";
pub const SESSION_RECONNECT_EXHAUSTED: &str = "session_reconnect_exhausted";
pub const SESSION_REPLAY_START: &str = "session_replay_start";
pub const SESSION_REPLAY_OK: &str = "session_replay_ok";
pub const SESSION_REPLAY_FAILED: &str = "session_replay_failed";
pub const SESSION_OFFER: &str = "session_offer";
pub const SESSION_STOP_OFFER: &str = "session_stop_offer";
pub const SESSION_OFFER_EVENT: &str = "session_offer_event";
pub const SESSION_REQUEST_SERVICE: &str = "session_request_service";
pub const SESSION_RELEASE_SERVICE: &str = "session_release_service";
pub const SESSION_SUBSCRIBE: &str = "session_subscribe";
pub const SESSION_UNSUBSCRIBE: &str = "session_unsubscribe";
pub const SESSION_SUBSCRIPTION_STATUS: &str = "session_subscription_status";
pub const SESSION_BUS_CALL_FAILED: &str = "session_bus_call_failed";

// Availability.
pub const AVAILABILITY_CHANGE: &str = "availability_change";

// Listener registries.
pub const REGISTRY_ADD: &str = "registry_add";
pub const REGISTRY_ADD_ROLLBACK: &str = "registry_add_rollback";
pub const REGISTRY_REMOVE: &str = "registry_remove";
pub const REGISTRY_REMOVE_NOT_FOUND: &str = "registry_remove_not_found";

// RPC correlation.
pub const RPC_REGISTER: &str = "rpc_register";
pub const RPC_COMPLETE: &str = "rpc_complete";
pub const RPC_TIMEOUT: &str = "rpc_timeout";
pub const RPC_SEND_FAILED: &str = "rpc_send_failed";
pub const RPC_LATE_RESPONSE: &str = "rpc_late_response";
pub const RPC_FLUSH: &str = "rpc_flush";

// Inbound requests awaiting a local response.
pub const INBOUND_REQUEST_STORED: &str = "inbound_request_stored";
pub const INBOUND_REQUEST_EXPIRED: &str = "inbound_request_expired";
pub const INBOUND_REQUEST_UNKNOWN: &str = "inbound_request_unknown";

// Inbound dispatch.
pub const DISPATCH_RECEIVE: &str = "dispatch_receive";
pub const DISPATCH_DECODE_FAILED: &str = "dispatch_decode_failed";
pub const DISPATCH_MAPPING_FAILED: &str = "dispatch_mapping_failed";
pub const DISPATCH_NO_LISTENER: &str = "dispatch_no_listener";
pub const DISPATCH_LISTENER_PANIC: &str = "dispatch_listener_panic";
pub const DISPATCH_QUEUE_CLOSED: &str = "dispatch_queue_closed";

// Facade.
pub const BRIDGE_OPEN: &str = "bridge_open";
pub const BRIDGE_CLOSE: &str = "bridge_close";
pub const BRIDGE_SEND: &str = "bridge_send";
pub const BRIDGE_SEND_FAILED: &str = "bridge_send_failed";
pub const BRIDGE_REGISTER_LISTENER: &str = "bridge_register_listener";
pub const BRIDGE_UNREGISTER_LISTENER: &str = "bridge_unregister_listener";

// Bridge runtime thread.
pub const RUNTIME_SPAWN_START: &str = "runtime_spawn_start";
pub const RUNTIME_SPAWN_OK: &str = "runtime_spawn_ok";
pub const RUNTIME_SPAWN_FAILED: &str = "runtime_spawn_failed";
pub const RUNTIME_STOP: &str = "runtime_stop";
