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

//! Pending outbound requests and their deadlines.
//!
//! An entry leaves the pending table exactly once, whichever comes first of the response,
//! its deadline timer or a flush. Removal from the table under its lock is what decides the
//! winner; the losers find nothing and do nothing.

use crate::codec::CorrelationId;
use crate::error::BridgeError;
use crate::observability::events;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use up_rust::UMessage;

const COMPONENT: &str = "rpc_correlator";

/// Longest deadline a request is given; larger timeouts are clamped to it.
pub(crate) const MAX_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RpcError {
    Timeout,
    Closed,
}

impl Display for RpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Timeout => write!(f, "no response before the deadline"),
            RpcError::Closed => {
                write!(f, "request abandoned because the bridge disconnected or closed")
            }
        }
    }
}

impl Error for RpcError {}

struct PendingRequest {
    deadline: Instant,
    completion: oneshot::Sender<Result<UMessage, RpcError>>,
    timer: Option<JoinHandle<()>>,
}

type PendingTable = Arc<Mutex<HashMap<CorrelationId, PendingRequest>>>;

/// Resolves once the request completed, timed out or was flushed.
pub struct PendingResponse {
    receiver: oneshot::Receiver<Result<UMessage, RpcError>>,
}

impl Future for PendingResponse {
    type Output = Result<UMessage, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(RpcError::Closed)))
    }
}

pub(crate) struct RpcCorrelator {
    next_id: AtomicU64,
    pending: PendingTable,
    timers: Handle,
}

impl RpcCorrelator {
    pub(crate) fn new(timers: Handle) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            timers,
        }
    }

    /// Allocates a correlation id and arms its deadline timer.
    pub(crate) fn register(&self, timeout: Duration) -> (CorrelationId, PendingResponse) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timeout = timeout.min(MAX_TIMEOUT);
        let deadline = Instant::now() + timeout;
        let (completion, receiver) = oneshot::channel();

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.insert(
            id,
            PendingRequest {
                deadline,
                completion,
                timer: None,
            },
        );
        // Armed under the lock: the timer cannot observe the table before its entry exists.
        let timer = self.timers.spawn(expire_at(self.pending.clone(), id, deadline));
        if let Some(request) = pending.get_mut(&id) {
            request.timer = Some(timer);
        }
        drop(pending);

        debug!(
            event = events::RPC_REGISTER,
            component = COMPONENT,
            correlation_id = id,
            timeout_ms = timeout.as_millis() as u64,
            "pending request registered"
        );
        (id, PendingResponse { receiver })
    }

    /// Registers a request and hands it to `send`. A send failure resolves nothing and
    /// leaves no entry behind; the returned error keeps the kind reported by `send`.
    pub(crate) fn send_request<F>(
        &self,
        timeout: Duration,
        send: F,
    ) -> Result<(CorrelationId, PendingResponse), BridgeError>
    where
        F: FnOnce(CorrelationId) -> Result<(), BridgeError>,
    {
        let (id, response) = self.register(timeout);
        if let Err(err) = send(id) {
            self.abandon(id);
            warn!(
                event = events::RPC_SEND_FAILED,
                component = COMPONENT,
                correlation_id = id,
                err = %err,
                "request send failed"
            );
            let reason = format!("request could not be sent: {}", err.message());
            return Err(BridgeError::new(err.kind(), reason));
        }
        Ok((id, response))
    }

    fn take(&self, id: CorrelationId) -> Option<PendingRequest> {
        let request = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)?;
        if let Some(timer) = request.timer.as_ref() {
            timer.abort();
        }
        Some(request)
    }

    fn abandon(&self, id: CorrelationId) {
        self.take(id);
    }

    /// Delivers a response. Unknown or already resolved ids are dropped.
    pub(crate) fn complete(&self, id: CorrelationId, response: UMessage) -> bool {
        let Some(request) = self.take(id) else {
            debug!(
                event = events::RPC_LATE_RESPONSE,
                component = COMPONENT,
                correlation_id = id,
                "dropping response without pending request"
            );
            return false;
        };

        let late_by = Instant::now().saturating_duration_since(request.deadline);
        debug!(
            event = events::RPC_COMPLETE,
            component = COMPONENT,
            correlation_id = id,
            past_deadline_ms = late_by.as_millis() as u64,
            "pending request completed"
        );
        // The caller may have stopped waiting.
        let _ = request.completion.send(Ok(response));
        true
    }

    /// Resolves every pending request with `error`.
    pub(crate) fn fail_all(&self, error: RpcError) -> usize {
        let drained: Vec<(CorrelationId, PendingRequest)> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        let count = drained.len();

        for (_, request) in drained {
            if let Some(timer) = request.timer.as_ref() {
                timer.abort();
            }
            let _ = request.completion.send(Err(error.clone()));
        }
        if count > 0 {
            debug!(
                event = events::RPC_FLUSH,
                component = COMPONENT,
                count,
                err = %error,
                "pending requests flushed"
            );
        }
        count
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

async fn expire_at(pending: PendingTable, id: CorrelationId, deadline: Instant) {
    tokio::time::sleep_until(deadline).await;

    let expired = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);
    if let Some(request) = expired {
        debug!(
            event = events::RPC_TIMEOUT,
            component = COMPONENT,
            correlation_id = id,
            "pending request timed out"
        );
        let _ = request.completion.send(Err(RpcError::Timeout));
    }
}
