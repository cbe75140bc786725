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

//! Reference-counted listener sets.
//!
//! Each key holds an ordered set of listeners. The bus-side action attached to a key runs
//! exactly when its set goes from empty to non-empty and back, and runs while the table is
//! locked so transitions of one key are applied to the bus in the order they happened.

use crate::error::{BridgeError, ErrorKind};
use crate::observability::events;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use up_rust::UListener;

const COMPONENT: &str = "listener_registry";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Registration {
    /// The set was empty and the activation succeeded.
    First,
    Additional,
    /// The listener was already registered for this key.
    AlreadyRegistered,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Removal {
    /// The set became empty and was deactivated.
    Last,
    Remaining,
}

pub(crate) struct ListenerRegistry<K> {
    name: &'static str,
    entries: Mutex<HashMap<K, Vec<Arc<dyn UListener>>>>,
}

impl<K> ListenerRegistry<K>
where
    K: Clone + Debug + Eq + Hash,
{
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Adds `listener` under `key`; `activate` runs if this is the first listener for `key`.
    ///
    /// A failed activation leaves the registry as it was before the call.
    pub(crate) fn add<F>(
        &self,
        key: K,
        listener: Arc<dyn UListener>,
        activate: F,
    ) -> Result<Registration, BridgeError>
    where
        F: FnOnce() -> Result<(), BridgeError>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let listeners = entries.entry(key.clone()).or_default();

        if listeners
            .iter()
            .any(|registered| Arc::ptr_eq(registered, &listener))
        {
            return Ok(Registration::AlreadyRegistered);
        }

        if !listeners.is_empty() {
            listeners.push(listener);
            debug!(
                event = events::REGISTRY_ADD,
                component = COMPONENT,
                registry = self.name,
                key = ?key,
                ref_count = listeners.len(),
                "listener added"
            );
            return Ok(Registration::Additional);
        }

        if let Err(err) = activate() {
            entries.remove(&key);
            warn!(
                event = events::REGISTRY_ADD_ROLLBACK,
                component = COMPONENT,
                registry = self.name,
                key = ?key,
                err = %err,
                "activation failed, registration rolled back"
            );
            return Err(err);
        }

        entries.entry(key.clone()).or_default().push(listener);
        debug!(
            event = events::REGISTRY_ADD,
            component = COMPONENT,
            registry = self.name,
            key = ?key,
            ref_count = 1,
            "first listener added"
        );
        Ok(Registration::First)
    }

    /// Removes `listener` from `key`; `deactivate` runs if it was the last one.
    pub(crate) fn remove<F>(
        &self,
        key: &K,
        listener: &Arc<dyn UListener>,
        deactivate: F,
    ) -> Result<Removal, BridgeError>
    where
        F: FnOnce(),
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let position = entries.get(key).and_then(|listeners| {
            listeners
                .iter()
                .position(|registered| Arc::ptr_eq(registered, listener))
        });

        let (Some(position), Some(listeners)) = (position, entries.get_mut(key)) else {
            debug!(
                event = events::REGISTRY_REMOVE_NOT_FOUND,
                component = COMPONENT,
                registry = self.name,
                key = ?key,
                "listener not registered"
            );
            return Err(BridgeError::new(
                ErrorKind::NotFound,
                format!("listener not registered for {key:?}"),
            ));
        };

        listeners.remove(position);
        let remaining = listeners.len();
        debug!(
            event = events::REGISTRY_REMOVE,
            component = COMPONENT,
            registry = self.name,
            key = ?key,
            ref_count = remaining,
            "listener removed"
        );
        if remaining > 0 {
            return Ok(Removal::Remaining);
        }

        entries.remove(key);
        deactivate();
        Ok(Removal::Last)
    }

    /// Snapshot of the listeners for `key` in registration order.
    pub(crate) fn listeners(&self, key: &K) -> Vec<Arc<dyn UListener>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Empties the registry and returns the keys that had listeners.
    pub(crate) fn drain(&self) -> Vec<K> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(key, _)| key)
            .collect()
    }
}
