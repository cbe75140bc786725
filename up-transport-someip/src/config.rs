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

//! Bridge configuration, loadable from a JSON5 file.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

const DEFAULT_RPC_TIMEOUT_MS: u64 = 1000;
const DEFAULT_LISTENER_FAILURE_CAPACITY: usize = 64;
const DEFAULT_RECONNECT_INITIAL_DELAY_MS: u64 = 100;
const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 5000;

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    pub(crate) local_authority: String,
    pub(crate) remote_authority: String,
    #[serde(default = "default_rpc_timeout_ms")]
    pub(crate) default_rpc_timeout_ms: u64,
    #[serde(default = "default_listener_failure_capacity")]
    pub(crate) listener_failure_capacity: usize,
    #[serde(default)]
    pub(crate) reconnect: ReconnectPolicy,
    #[serde(default)]
    pub(crate) local_services: Vec<LocalServiceConfig>,
}

/// Backoff applied between reconnect attempts after the runtime deregistered the bridge.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReconnectPolicy {
    #[serde(default = "default_reconnect_initial_delay_ms")]
    pub(crate) initial_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub(crate) max_delay_ms: u64,
    /// `None` retries forever.
    #[serde(default)]
    pub(crate) max_attempts: Option<u32>,
}

/// A local uEntity whose service is offered as soon as the bridge opens.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LocalServiceConfig {
    pub(crate) ue_id: u32,
    pub(crate) ue_version_major: u8,
    #[serde(default)]
    pub(crate) events: Vec<u16>,
}

fn default_rpc_timeout_ms() -> u64 {
    DEFAULT_RPC_TIMEOUT_MS
}

fn default_listener_failure_capacity() -> usize {
    DEFAULT_LISTENER_FAILURE_CAPACITY
}

fn default_reconnect_initial_delay_ms() -> u64 {
    DEFAULT_RECONNECT_INITIAL_DELAY_MS
}

fn default_reconnect_max_delay_ms() -> u64 {
    DEFAULT_RECONNECT_MAX_DELAY_MS
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    EmptyAuthority(&'static str),
    SameAuthority(String),
    ZeroRpcTimeout,
    ZeroListenerFailureCapacity,
    InvalidBackoff { initial_ms: u64, max_ms: u64 },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyAuthority(which) => write!(f, "{which} must not be empty"),
            ConfigError::SameAuthority(authority) => write!(
                f,
                "local and remote authority must differ, both are {authority}"
            ),
            ConfigError::ZeroRpcTimeout => write!(f, "default_rpc_timeout_ms must be positive"),
            ConfigError::ZeroListenerFailureCapacity => {
                write!(f, "listener_failure_capacity must be positive")
            }
            ConfigError::InvalidBackoff { initial_ms, max_ms } => write!(
                f,
                "reconnect initial_delay_ms ({initial_ms}) exceeds max_delay_ms ({max_ms})"
            ),
        }
    }
}

impl Error for ConfigError {}

impl BridgeConfig {
    pub fn new(local_authority: impl Into<String>, remote_authority: impl Into<String>) -> Self {
        Self {
            local_authority: local_authority.into(),
            remote_authority: remote_authority.into(),
            default_rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            listener_failure_capacity: DEFAULT_LISTENER_FAILURE_CAPACITY,
            reconnect: ReconnectPolicy::default(),
            local_services: Vec::new(),
        }
    }

    /// Reads and validates a JSON5 configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let config_contents = std::fs::read_to_string(path)?;
        Self::from_json5(&config_contents)
    }

    pub fn from_json5(contents: &str) -> Result<Self, Box<dyn Error>> {
        let config: BridgeConfig = json5::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_default_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.default_rpc_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_listener_failure_capacity(mut self, capacity: usize) -> Self {
        self.listener_failure_capacity = capacity;
        self
    }

    pub fn with_local_service(mut self, service: LocalServiceConfig) -> Self {
        self.local_services.push(service);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local_authority.is_empty() {
            return Err(ConfigError::EmptyAuthority("local_authority"));
        }
        if self.remote_authority.is_empty() {
            return Err(ConfigError::EmptyAuthority("remote_authority"));
        }
        if self.local_authority == self.remote_authority {
            return Err(ConfigError::SameAuthority(self.local_authority.clone()));
        }
        if self.default_rpc_timeout_ms == 0 {
            return Err(ConfigError::ZeroRpcTimeout);
        }
        if self.listener_failure_capacity == 0 {
            return Err(ConfigError::ZeroListenerFailureCapacity);
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(ConfigError::InvalidBackoff {
                initial_ms: self.reconnect.initial_delay_ms,
                max_ms: self.reconnect.max_delay_ms,
            });
        }
        Ok(())
    }

    pub fn local_authority(&self) -> &str {
        &self.local_authority
    }

    pub fn remote_authority(&self) -> &str {
        &self.remote_authority
    }

    pub fn default_rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.default_rpc_timeout_ms)
    }

    pub fn reconnect(&self) -> &ReconnectPolicy {
        &self.reconnect
    }

    pub fn local_services(&self) -> &[LocalServiceConfig] {
        &self.local_services
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_RECONNECT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            initial_delay_ms: u64::try_from(initial_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::try_from(max_delay.as_millis()).unwrap_or(u64::MAX),
            max_attempts,
        }
    }

    /// Delay before the given attempt, counting from 0: doubles per attempt, capped at the maximum.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        let delay_ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

impl LocalServiceConfig {
    pub fn new(ue_id: u32, ue_version_major: u8, events: Vec<u16>) -> Self {
        Self {
            ue_id,
            ue_version_major,
            events,
        }
    }
}
