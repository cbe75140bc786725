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

//! Hashable projection of a uEntity used to key reply and notification sinks.

use up_rust::UUri;

/// The entity part of a URI: authority, full `ue_id` and major version. The resource is dropped
/// so every reply addressed to the entity lands under one key.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) struct EntityKey {
    authority_name: String,
    ue_id: u32,
    ue_version_major: u8,
}

impl EntityKey {
    /// Projects `uri`, treating an empty authority as `default_authority`.
    pub(crate) fn with_default_authority(uri: &UUri, default_authority: &str) -> Self {
        let authority_name = if uri.authority_name.is_empty() {
            default_authority.to_string()
        } else {
            uri.authority_name.clone()
        };
        Self {
            authority_name,
            ue_id: uri.ue_id,
            ue_version_major: uri.uentity_major_version(),
        }
    }
}

impl From<&UUri> for EntityKey {
    fn from(uri: &UUri) -> Self {
        Self {
            authority_name: uri.authority_name.clone(),
            ue_id: uri.ue_id,
            ue_version_major: uri.uentity_major_version(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EntityKey;
    use up_rust::UUri;

    fn uri(authority: &str, resource_id: u32) -> UUri {
        UUri {
            authority_name: authority.to_string(),
            ue_id: 0x0002_0100,
            ue_version_major: 0x01,
            resource_id,
            ..Default::default()
        }
    }

    #[test]
    fn resources_of_one_entity_share_a_key() {
        assert_eq!(
            EntityKey::from(&uri("vehicle-a", 0)),
            EntityKey::from(&uri("vehicle-a", 0x8001))
        );
    }

    #[test]
    fn empty_authority_takes_the_default() {
        assert_eq!(
            EntityKey::with_default_authority(&uri("", 0), "vehicle-a"),
            EntityKey::from(&uri("vehicle-a", 0))
        );
        assert_ne!(
            EntityKey::with_default_authority(&uri("vehicle-b", 0), "vehicle-a"),
            EntityKey::from(&uri("vehicle-a", 0))
        );
    }
}
