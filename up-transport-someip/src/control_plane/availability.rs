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

//! Offer state of remote service instances as reported by the bus.

use crate::bus::{InstanceId, ServiceId};
use crate::observability::events;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};

const COMPONENT: &str = "availability";

const WATCH_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AvailabilityState {
    Unknown,
    Offered,
    Stopped,
}

struct AvailabilityRecord {
    state: AvailabilityState,
    changes: broadcast::Sender<bool>,
}

impl AvailabilityRecord {
    fn new() -> Self {
        let (changes, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            state: AvailabilityState::Unknown,
            changes,
        }
    }
}

/// Availability table. Records are created lazily on first lookup and only the session writes.
pub(crate) struct AvailabilityTracker {
    records: Mutex<HashMap<(ServiceId, InstanceId), AvailabilityRecord>>,
}

impl AvailabilityTracker {
    pub(crate) fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn state(&self, service: ServiceId, instance: InstanceId) -> AvailabilityState {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((service, instance))
            .or_insert_with(AvailabilityRecord::new)
            .state
    }

    pub(crate) fn is_available(&self, service: ServiceId, instance: InstanceId) -> bool {
        self.state(service, instance) == AvailabilityState::Offered
    }

    pub(crate) fn watch(&self, service: ServiceId, instance: InstanceId) -> AvailabilityWatch {
        let receiver = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((service, instance))
            .or_insert_with(AvailabilityRecord::new)
            .changes
            .subscribe();
        AvailabilityWatch { receiver }
    }

    /// Applies an availability callback. Repeated reports of the same state are not re-broadcast.
    pub(crate) fn update(&self, service: ServiceId, instance: InstanceId, available: bool) {
        let new_state = if available {
            AvailabilityState::Offered
        } else {
            AvailabilityState::Stopped
        };

        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .entry((service, instance))
            .or_insert_with(AvailabilityRecord::new);
        if record.state == new_state {
            debug!(
                event = events::AVAILABILITY_CHANGE,
                component = COMPONENT,
                service = format_args!("{service:04X}"),
                instance = format_args!("{instance:04X}"),
                available,
                "availability unchanged"
            );
            return;
        }
        record.state = new_state;
        // No watcher is not an error.
        let _ = record.changes.send(available);

        info!(
            event = events::AVAILABILITY_CHANGE,
            component = COMPONENT,
            service = format_args!("{service:04X}"),
            instance = format_args!("{instance:04X}"),
            available,
            "service availability changed"
        );
    }

    /// Drops every record; open watches end.
    pub(crate) fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Stream of availability changes for one service instance.
///
/// Ends once the bridge closes. Register a new watch to observe again.
pub struct AvailabilityWatch {
    receiver: broadcast::Receiver<bool>,
}

impl AvailabilityWatch {
    /// Next change, or `None` when the watch ended. Changes missed by a slow reader are skipped.
    pub async fn next(&mut self) -> Option<bool> {
        loop {
            match self.receiver.recv().await {
                Ok(available) => return Some(available),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
