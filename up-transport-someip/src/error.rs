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

//! Caller-facing error type of the bridge.

use crate::bus::{BusError, BusErrorKind};
use crate::codec::EncodeError;
use crate::config::ConfigError;
use crate::data_plane::rpc_correlator::RpcError;
use crate::mapping::MappingError;
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};
use up_rust::{UCode, UStatus};

/// Classification of a failed bridge operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The bus runtime is not registered; retry once the bridge reports `Connected`.
    NotConnected,
    /// The addressed remote entity is known to be stopped.
    Unavailable,
    MappingError,
    SerializationError,
    RpcTimeout,
    /// The bridge was closed, or the connection was lost while a request was in flight.
    Closed,
    /// Unregistering a listener that is not registered, or answering an unknown request.
    NotFound,
    InvalidConfiguration,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BridgeError {
    kind: ErrorKind,
    message: String,
}

impl BridgeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn not_connected() -> Self {
        Self::new(ErrorKind::NotConnected, "bus runtime is not connected")
    }

    pub(crate) fn closed() -> Self {
        Self::new(ErrorKind::Closed, "bridge is closed")
    }
}

impl Display for BridgeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for BridgeError {}

impl From<MappingError> for BridgeError {
    fn from(err: MappingError) -> Self {
        Self::new(ErrorKind::MappingError, err.to_string())
    }
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::InvalidConfiguration, err.to_string())
    }
}

impl From<EncodeError> for BridgeError {
    fn from(err: EncodeError) -> Self {
        Self::new(ErrorKind::SerializationError, err.to_string())
    }
}

impl From<RpcError> for BridgeError {
    fn from(err: RpcError) -> Self {
        let kind = match err {
            RpcError::Timeout => ErrorKind::RpcTimeout,
            RpcError::Closed => ErrorKind::Closed,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<BusError> for BridgeError {
    fn from(err: BusError) -> Self {
        let kind = match err.kind() {
            BusErrorKind::Unreachable => ErrorKind::NotConnected,
            BusErrorKind::Rejected => ErrorKind::Unavailable,
        };
        Self::new(kind, err.message())
    }
}

impl From<BridgeError> for UStatus {
    fn from(err: BridgeError) -> Self {
        let code = match err.kind {
            ErrorKind::NotConnected | ErrorKind::Unavailable => UCode::UNAVAILABLE,
            ErrorKind::MappingError
            | ErrorKind::SerializationError
            | ErrorKind::InvalidConfiguration => UCode::INVALID_ARGUMENT,
            ErrorKind::RpcTimeout => UCode::DEADLINE_EXCEEDED,
            ErrorKind::Closed => UCode::CANCELLED,
            ErrorKind::NotFound => UCode::NOT_FOUND,
        };
        UStatus::fail_with_code(code, err.to_string())
    }
}
