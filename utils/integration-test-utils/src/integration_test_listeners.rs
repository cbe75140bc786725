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

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use up_rust::{UListener, UMessage};

/// Stores every message it receives.
#[derive(Default)]
pub struct RecordingListener {
    messages: Mutex<Vec<UMessage>>,
    received: Notify,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<UMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Waits until at least `count` messages arrived or `timeout` elapsed, then returns
    /// what was received.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<UMessage> {
        let deadline = Instant::now() + timeout;
        while self.count() < count {
            if tokio::time::timeout_at(deadline, self.received.notified())
                .await
                .is_err()
            {
                break;
            }
        }
        self.messages()
    }
}

#[async_trait]
impl UListener for RecordingListener {
    async fn on_receive(&self, msg: UMessage) {
        debug!("recording listener received: {:?}", msg.attributes.id);
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg);
        self.received.notify_one();
    }
}

/// Panics on every message it receives.
#[derive(Default)]
pub struct PanickingListener {
    calls: AtomicUsize,
}

impl PanickingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UListener for PanickingListener {
    async fn on_receive(&self, _msg: UMessage) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("listener exploded");
    }
}
