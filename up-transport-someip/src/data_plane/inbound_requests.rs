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

//! Bus context of requests handed to local services, kept until they are answered.

use crate::bus::{ClientId, SessionId};
use crate::codec::CorrelationId;
use crate::mapping::BusAddress;
use crate::observability::events;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;
use up_rust::UUID;

const COMPONENT: &str = "inbound_requests";

/// Everything needed to route a response back to the remote caller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct InboundRequestContext {
    pub(crate) method: BusAddress,
    pub(crate) client: ClientId,
    pub(crate) session: SessionId,
    pub(crate) correlation: CorrelationId,
    expires_at: Instant,
}

impl InboundRequestContext {
    pub(crate) fn new(
        method: BusAddress,
        client: ClientId,
        session: SessionId,
        correlation: CorrelationId,
    ) -> Self {
        Self {
            method,
            client,
            session,
            correlation,
            expires_at: Instant::now(),
        }
    }
}

fn key(request_id: &UUID) -> (u64, u64) {
    (request_id.msb, request_id.lsb)
}

pub(crate) struct InboundRequestTable {
    default_ttl: Duration,
    entries: Mutex<HashMap<(u64, u64), InboundRequestContext>>,
}

impl InboundRequestTable {
    pub(crate) fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stores `context` under the request's message id for the request's ttl.
    ///
    /// A missing or zero ttl falls back to the default RPC timeout. Expired entries are purged
    /// on every insert.
    pub(crate) fn insert(
        &self,
        request_id: &UUID,
        ttl_ms: Option<u32>,
        mut context: InboundRequestContext,
    ) {
        let now = Instant::now();
        let ttl = ttl_ms
            .filter(|ttl| *ttl > 0)
            .map(|ttl| Duration::from_millis(ttl.into()))
            .unwrap_or(self.default_ttl);
        context.expires_at = now + ttl;

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, stored| stored.expires_at > now);
        let purged = before - entries.len();
        if purged > 0 {
            debug!(
                event = events::INBOUND_REQUEST_EXPIRED,
                component = COMPONENT,
                purged,
                "purged unanswered requests"
            );
        }

        debug!(
            event = events::INBOUND_REQUEST_STORED,
            component = COMPONENT,
            request_id = %request_id.to_hyphenated_string(),
            method = %context.method,
            correlation_id = context.correlation,
            ttl_ms = ttl.as_millis() as u64,
            "stored inbound request"
        );
        entries.insert(key(request_id), context);
    }

    /// Removes and returns the context for `request_id` if it has not expired.
    pub(crate) fn take(&self, request_id: &UUID) -> Option<InboundRequestContext> {
        let context = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key(request_id));

        match context {
            Some(context) if context.expires_at > Instant::now() => Some(context),
            Some(_) => {
                debug!(
                    event = events::INBOUND_REQUEST_EXPIRED,
                    component = COMPONENT,
                    request_id = %request_id.to_hyphenated_string(),
                    "response arrived after the request expired"
                );
                None
            }
            None => {
                debug!(
                    event = events::INBOUND_REQUEST_UNKNOWN,
                    component = COMPONENT,
                    request_id = %request_id.to_hyphenated_string(),
                    "no inbound request with this id"
                );
                None
            }
        }
    }

    pub(crate) fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
