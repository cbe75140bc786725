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

//! Dedicated thread running a current-thread Tokio runtime.
//!
//! Bus callbacks arrive on threads the bridge does not own and callers may use any executor,
//! so the bridge brings its own runtimes instead of relying on an ambient one. Each bridge runs
//! two: one for listener dispatch and one for RPC deadlines and reconnects. Listener calls never
//! run on the timer thread.

use crate::error::{BridgeError, ErrorKind};
use crate::observability::events;
use std::sync::{mpsc, Mutex, PoisonError};
use std::thread;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::{debug, warn};

const COMPONENT: &str = "bridge_runtime";

pub(crate) struct BridgeRuntime {
    handle: Handle,
    thread_name: String,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl BridgeRuntime {
    /// Spawns the runtime thread and waits until its runtime is up.
    pub(crate) fn spawn(thread_name: &str) -> Result<Self, BridgeError> {
        debug!(
            event = events::RUNTIME_SPAWN_START,
            component = COMPONENT,
            thread = thread_name,
            "spawning bridge runtime"
        );

        let (handle_tx, handle_rx) = mpsc::channel::<Result<Handle, String>>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let spawn_result = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = handle_tx.send(Err(err.to_string()));
                        return;
                    }
                };
                if handle_tx.send(Ok(runtime.handle().clone())).is_err() {
                    return;
                }
                // Either a shutdown request or the sender being dropped stops the runtime.
                let _ = runtime.block_on(shutdown_rx);
            });

        let spawn_failed = |reason: String| {
            warn!(
                event = events::RUNTIME_SPAWN_FAILED,
                component = COMPONENT,
                thread = thread_name,
                reason = %reason,
                "unable to start bridge runtime"
            );
            BridgeError::new(
                ErrorKind::NotConnected,
                format!("bridge runtime unavailable: {reason}"),
            )
        };

        if let Err(err) = spawn_result {
            return Err(spawn_failed(err.to_string()));
        }

        let handle = match handle_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(reason)) => return Err(spawn_failed(reason)),
            Err(_) => return Err(spawn_failed("runtime thread exited".to_string())),
        };

        debug!(
            event = events::RUNTIME_SPAWN_OK,
            component = COMPONENT,
            thread = thread_name,
            "bridge runtime running"
        );

        Ok(Self {
            handle,
            thread_name: thread_name.to_string(),
            shutdown: Mutex::new(Some(shutdown_tx)),
        })
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Stops the runtime; tasks still pending on it are dropped. Further calls are no-ops.
    pub(crate) fn shutdown(&self) {
        let sender = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
            debug!(
                event = events::RUNTIME_STOP,
                component = COMPONENT,
                thread = %self.thread_name,
                "bridge runtime stopped"
            );
        }
    }
}

impl Drop for BridgeRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
