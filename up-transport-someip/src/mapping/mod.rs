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

//! Translation between uProtocol URIs and SOME/IP addresses.
//!
//! Layout of a supported URI:
//!
//! | URI part           | bus field     | constraint                                         |
//! |--------------------|---------------|----------------------------------------------------|
//! | `authority_name`   | -             | the local or the remote authority                  |
//! | `ue_id & 0xFFFF`   | service id    | not `0x0000`, not `0xFFFF`                         |
//! | `ue_id >> 16`      | instance id   | `0` means [`DEFAULT_INSTANCE`]; not `0x0001`/`0xFFFF` |
//! | `ue_version_major` | major version | at most `0xFE`                                     |
//! | `resource_id`      | member id     | at most `0xFFFE`; `>= 0x8000` is an event          |
//!
//! Every supported URI has exactly one spelling.
//! An empty authority has to be resolved with [`IdentifierMapper::with_local_authority`]
//! first. Resource `0` addresses the uEntity itself and is used for reply and notification
//! sinks.

mod entity_key;

pub(crate) use entity_key::EntityKey;

use crate::bus::{InstanceId, MajorVersion, MemberId, ServiceId};
use crate::observability::events;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use up_rust::UUri;

const COMPONENT: &str = "identifier_mapper";

/// Instance used when the URI does not carry one.
pub const DEFAULT_INSTANCE: InstanceId = 0x0001;
/// First member id treated as an event.
pub const FIRST_EVENT_ID: MemberId = 0x8000;

const WILDCARD_ID: u16 = 0xFFFF;
const WILDCARD_MAJOR: u32 = 0xFF;
const WILDCARD_AUTHORITY: &str = "*";

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BusAddress {
    pub service: ServiceId,
    pub instance: InstanceId,
    pub member: MemberId,
    pub major_version: MajorVersion,
    pub is_event: bool,
}

impl BusAddress {
    pub fn new(
        service: ServiceId,
        instance: InstanceId,
        member: MemberId,
        major_version: MajorVersion,
    ) -> Self {
        Self {
            service,
            instance,
            member,
            major_version,
            is_event: member >= FIRST_EVENT_ID,
        }
    }

    /// The address of the entity this member belongs to.
    pub fn entity(&self) -> Self {
        self.with_member(0)
    }

    pub fn with_member(&self, member: MemberId) -> Self {
        Self::new(self.service, self.instance, member, self.major_version)
    }

    pub fn service_key(&self) -> (ServiceId, InstanceId) {
        (self.service, self.instance)
    }

    pub fn is_entity(&self) -> bool {
        self.member == 0
    }

    pub fn is_method(&self) -> bool {
        !self.is_event && self.member != 0
    }
}

impl Display for BusAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04X}.{:04X}.{:04X} v{}",
            self.service, self.instance, self.member, self.major_version
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MappingError {
    UnsupportedShape(String),
    /// More than one local uEntity claims the same service instance.
    AmbiguousInstance {
        service: ServiceId,
        instance: InstanceId,
    },
}

impl Display for MappingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MappingError::UnsupportedShape(reason) => write!(f, "unsupported address: {reason}"),
            MappingError::AmbiguousInstance { service, instance } => write!(
                f,
                "service {service:04X} instance {instance:04X} is claimed by more than one \
                 local entity"
            ),
        }
    }
}

impl Error for MappingError {}

fn unsupported(reason: impl Into<String>) -> MappingError {
    MappingError::UnsupportedShape(reason.into())
}

/// Bidirectional URI/address mapping with a registry of locally claimed entities.
pub struct IdentifierMapper {
    local_authority: String,
    remote_authority: String,
    local_entities: Mutex<HashMap<(ServiceId, InstanceId), Vec<UUri>>>,
}

impl IdentifierMapper {
    pub fn new(local_authority: impl Into<String>, remote_authority: impl Into<String>) -> Self {
        Self {
            local_authority: local_authority.into(),
            remote_authority: remote_authority.into(),
            local_entities: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_authority(&self) -> &str {
        &self.local_authority
    }

    pub fn remote_authority(&self) -> &str {
        &self.remote_authority
    }

    pub fn to_bus_address(&self, uri: &UUri) -> Result<BusAddress, MappingError> {
        self.check_authority(&uri.authority_name)?;

        let service = (uri.ue_id & 0xFFFF) as u16;
        if service == 0 || service == WILDCARD_ID {
            return Err(unsupported(format!(
                "service id {service:04X} of {} is reserved",
                uri.to_uri(false)
            )));
        }

        let instance = match (uri.ue_id >> 16) as u16 {
            0 => DEFAULT_INSTANCE,
            DEFAULT_INSTANCE => {
                return Err(unsupported(format!(
                    "default instance spelled out in {}, omit it",
                    uri.to_uri(false)
                )))
            }
            WILDCARD_ID => {
                return Err(unsupported(format!(
                    "wildcard instance in {}",
                    uri.to_uri(false)
                )))
            }
            instance => instance,
        };

        if uri.ue_version_major >= WILDCARD_MAJOR {
            return Err(unsupported(format!(
                "major version {:X} of {}",
                uri.ue_version_major,
                uri.to_uri(false)
            )));
        }

        if uri.resource_id >= u32::from(WILDCARD_ID) {
            return Err(unsupported(format!(
                "resource id {:X} of {}",
                uri.resource_id,
                uri.to_uri(false)
            )));
        }

        Ok(BusAddress::new(
            service,
            instance,
            uri.resource_id as u16,
            uri.ue_version_major as u8,
        ))
    }

    /// Resolves a bus address back to a URI.
    ///
    /// Locally claimed entities resolve to the URI they were registered with, everything else
    /// to the remote authority with the default instance omitted.
    pub fn to_uri(&self, address: &BusAddress) -> Result<UUri, MappingError> {
        if address.service == 0 || address.service == WILDCARD_ID {
            return Err(unsupported(format!("service id {:04X}", address.service)));
        }
        if address.instance == 0 || address.instance == WILDCARD_ID {
            return Err(unsupported(format!("instance id {:04X}", address.instance)));
        }
        if address.member == WILDCARD_ID {
            return Err(unsupported("wildcard member id"));
        }
        if u32::from(address.major_version) >= WILDCARD_MAJOR {
            return Err(unsupported("wildcard major version"));
        }
        if address.is_event != (address.member >= FIRST_EVENT_ID) {
            return Err(unsupported(format!(
                "member {:04X} does not match its event flag",
                address.member
            )));
        }

        let entities = self
            .local_entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match entities.get(&address.service_key()).map(Vec::as_slice) {
            Some([entity]) => Ok(UUri {
                resource_id: u32::from(address.member),
                ..entity.clone()
            }),
            Some([_, _, ..]) => Err(MappingError::AmbiguousInstance {
                service: address.service,
                instance: address.instance,
            }),
            _ => Ok(UUri {
                authority_name: self.remote_authority.clone(),
                ue_id: canonical_ue_id(address.service, address.instance),
                ue_version_major: u32::from(address.major_version),
                resource_id: u32::from(address.member),
                ..Default::default()
            }),
        }
    }

    /// Claims the entity of `uri` for this process. Registering the same entity twice is a no-op.
    pub fn register_local_uri(&self, uri: &UUri) -> Result<BusAddress, MappingError> {
        let address = self.to_bus_address(uri)?;
        let entity = entity_uri(uri);

        let mut entities = self
            .local_entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let claims = entities.entry(address.service_key()).or_default();
        if !claims.contains(&entity) {
            debug!(
                event = events::MAPPING_LOCAL_REGISTER,
                component = COMPONENT,
                uri = %entity.to_uri(false),
                address = %address.entity(),
                claims = claims.len() + 1,
                "claimed local entity"
            );
            claims.push(entity);
        }
        Ok(address)
    }

    /// Releases a claim made by [`Self::register_local_uri`]. Unknown entities are ignored.
    pub fn unregister_local_uri(&self, uri: &UUri) -> Result<(), MappingError> {
        let address = self.to_bus_address(uri)?;
        let entity = entity_uri(uri);

        let mut entities = self
            .local_entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(claims) = entities.get_mut(&address.service_key()) {
            claims.retain(|claimed| claimed != &entity);
            if claims.is_empty() {
                entities.remove(&address.service_key());
            }
            debug!(
                event = events::MAPPING_LOCAL_UNREGISTER,
                component = COMPONENT,
                uri = %entity.to_uri(false),
                "released local entity"
            );
        }
        Ok(())
    }

    pub fn is_local(&self, address: &BusAddress) -> bool {
        self.local_entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&address.service_key())
    }

    pub(crate) fn clear(&self) {
        self.local_entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// `uri` with an empty authority replaced by the local one.
    pub fn with_local_authority(&self, uri: &UUri) -> UUri {
        let mut uri = uri.clone();
        if uri.authority_name.is_empty() {
            uri.authority_name = self.local_authority.clone();
        }
        uri
    }

    fn check_authority(&self, authority: &str) -> Result<(), MappingError> {
        if authority == self.local_authority || authority == self.remote_authority {
            return Ok(());
        }
        if authority.is_empty() {
            return Err(unsupported("empty authority"));
        }
        if authority == WILDCARD_AUTHORITY {
            return Err(unsupported("wildcard authority"));
        }
        Err(unsupported(format!(
            "authority {authority} is neither {} nor {}",
            self.local_authority, self.remote_authority
        )))
    }
}

/// The uEntity part of a URI, with the resource cleared.
pub(crate) fn entity_uri(uri: &UUri) -> UUri {
    UUri {
        resource_id: 0,
        ..uri.clone()
    }
}

fn canonical_ue_id(service: ServiceId, instance: InstanceId) -> u32 {
    if instance == DEFAULT_INSTANCE {
        u32::from(service)
    } else {
        (u32::from(instance) << 16) | u32::from(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(authority: &str, ue_id: u32, major: u32, resource: u32) -> UUri {
        UUri {
            authority_name: authority.to_string(),
            ue_id,
            ue_version_major: major,
            resource_id: resource,
            ..Default::default()
        }
    }

    fn mapper() -> IdentifierMapper {
        IdentifierMapper::new("vehicle-a", "someip")
    }

    #[test]
    fn remote_uris_round_trip() {
        let mapper = mapper();
        let supported = [
            uri("someip", 0x1234, 1, 0x8001),
            uri("someip", 0x1234, 1, 0x0007),
            uri("someip", 0x1234, 0, 0),
            uri("someip", 0x0003_1234, 2, 0xFFFE),
            uri("someip", 0x7FFF_0001, 0xFE, 0x7FFF),
            uri("someip", 0x0002_1234, 1, 0x0007),
        ];

        for original in supported {
            let address = mapper
                .to_bus_address(&original)
                .expect("supported URI should map");
            let back = mapper.to_uri(&address).expect("address should map back");
            assert_eq!(back, original, "round trip of {}", original.to_uri(false));
        }
    }

    #[test]
    fn bit_layout_follows_service_instance_member() {
        let address = mapper()
            .to_bus_address(&uri("someip", 0x0005_1234, 3, 0x8002))
            .expect("URI should map");

        assert_eq!(
            address,
            BusAddress {
                service: 0x1234,
                instance: 0x0005,
                member: 0x8002,
                major_version: 3,
                is_event: true,
            }
        );
        assert!(!address.is_method());
    }

    #[test]
    fn default_instance_has_a_single_spelling() {
        let mapper = mapper();
        let omitted = mapper
            .to_bus_address(&uri("someip", 0x1234, 1, 1))
            .expect("URI should map");
        assert_eq!(omitted.instance, DEFAULT_INSTANCE);

        assert!(matches!(
            mapper.to_bus_address(&uri("someip", 0x0001_1234, 1, 7)),
            Err(MappingError::UnsupportedShape(_))
        ));
    }

    #[test]
    fn empty_authority_is_filled_in_before_mapping() {
        let mapper = mapper();
        let implicit = uri("", 0x1234, 1, 7);

        assert!(matches!(
            mapper.to_bus_address(&implicit),
            Err(MappingError::UnsupportedShape(_))
        ));

        let local = mapper.with_local_authority(&implicit);
        assert_eq!(local.authority_name, "vehicle-a");
        mapper.register_local_uri(&local).expect("register");
        let address = mapper.to_bus_address(&local).expect("URI should map");
        assert_eq!(mapper.to_uri(&address), Ok(local));
    }

    #[test]
    fn registered_local_entity_resolves_to_its_own_uri() {
        let mapper = mapper();
        let local = uri("vehicle-a", 0x0002_4321, 1, 0);
        mapper
            .register_local_uri(&local)
            .expect("local URI should register");

        let method = uri("vehicle-a", 0x0002_4321, 1, 0x0010);
        let address = mapper.to_bus_address(&method).expect("URI should map");
        assert!(mapper.is_local(&address));
        assert_eq!(mapper.to_uri(&address).expect("should map back"), method);
    }

    #[test]
    fn registration_is_idempotent() {
        let mapper = mapper();
        let local = uri("vehicle-a", 0x4321, 1, 0x8001);

        mapper.register_local_uri(&local).expect("first register");
        mapper.register_local_uri(&local).expect("second register");

        let address = mapper.to_bus_address(&local).expect("URI should map");
        assert_eq!(mapper.to_uri(&address), Ok(local.clone()));

        mapper.unregister_local_uri(&local).expect("unregister");
        mapper.unregister_local_uri(&local).expect("second unregister");
        assert!(!mapper.is_local(&address));
        assert_eq!(
            mapper
                .to_uri(&address)
                .expect("should map back")
                .authority_name,
            "someip"
        );
    }

    #[test]
    fn two_claims_on_one_instance_are_ambiguous() {
        let mapper = mapper();
        mapper
            .register_local_uri(&uri("vehicle-a", 0x4321, 1, 0))
            .expect("register");
        mapper
            .register_local_uri(&uri("vehicle-a", 0x4321, 2, 0))
            .expect("register");

        let address = mapper
            .to_bus_address(&uri("vehicle-a", 0x4321, 1, 0x8001))
            .expect("URI should map");
        assert_eq!(
            mapper.to_uri(&address),
            Err(MappingError::AmbiguousInstance {
                service: 0x4321,
                instance: DEFAULT_INSTANCE
            })
        );
    }

    #[test]
    fn unsupported_shapes_fail_explicitly() {
        let mapper = mapper();
        let rejected = [
            uri("*", 0x1234, 1, 1),
            uri("", 0x1234, 1, 1),
            uri("someip", 0x0001_1234, 1, 7),
            uri("other-vehicle", 0x1234, 1, 1),
            uri("someip", 0x0000, 1, 1),
            uri("someip", 0xFFFF, 1, 1),
            uri("someip", 0xFFFF_1234, 1, 1),
            uri("someip", 0x1234, 0xFF, 1),
            uri("someip", 0x1234, 0x100, 1),
            uri("someip", 0x1234, 1, 0xFFFF),
            uri("someip", 0x1234, 1, 0x1_0001),
        ];

        for candidate in rejected {
            assert!(
                matches!(
                    mapper.to_bus_address(&candidate),
                    Err(MappingError::UnsupportedShape(_))
                ),
                "{} should be rejected",
                candidate.to_uri(false)
            );
        }
    }

    #[test]
    fn inconsistent_event_flag_is_rejected() {
        let address = BusAddress {
            is_event: true,
            ..BusAddress::new(0x1234, 1, 0x0001, 1)
        };
        assert!(matches!(
            mapper().to_uri(&address),
            Err(MappingError::UnsupportedShape(_))
        ));
    }
}
