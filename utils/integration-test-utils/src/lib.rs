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

//! Test doubles shared by the bridge's integration tests: an in-memory bus runtime that
//! can be crashed and restarted, recording listeners and URI helpers.

mod in_memory_bus;
pub use in_memory_bus::{BusCall, InMemoryBus, MockBusRuntime};
mod integration_test_listeners;
pub use integration_test_listeners::{PanickingListener, RecordingListener};
mod integration_test_uuris;
pub use integration_test_uuris::{
    cloud_authority, cloud_client_uuri, vehicle_authority, vehicle_client_uuri,
    vehicle_method_uuri, vehicle_topic_uuri,
};
mod logging;
pub use logging::init_logging;
