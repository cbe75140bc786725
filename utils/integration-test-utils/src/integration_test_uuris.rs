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

use up_rust::UUri;

pub fn vehicle_authority() -> String {
    "vehicle".to_string()
}

pub fn cloud_authority() -> String {
    "cloud".to_string()
}

fn uuri(authority: String, ue_id: u32, resource_id: u32) -> UUri {
    UUri {
        authority_name: authority,
        ue_id,
        ue_version_major: 1,
        resource_id,
        ..Default::default()
    }
}

/// Topic `event` of the vehicle-side entity `ue_id`.
pub fn vehicle_topic_uuri(ue_id: u32, event: u16) -> UUri {
    uuri(vehicle_authority(), ue_id, event.into())
}

pub fn vehicle_method_uuri(ue_id: u32, method: u16) -> UUri {
    uuri(vehicle_authority(), ue_id, method.into())
}

pub fn vehicle_client_uuri(ue_id: u32) -> UUri {
    uuri(vehicle_authority(), ue_id, 0)
}

pub fn cloud_client_uuri(ue_id: u32) -> UUri {
    uuri(cloud_authority(), ue_id, 0)
}
