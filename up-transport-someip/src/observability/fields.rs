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

//! Value-format helpers for structured log fields.

use up_rust::{UAttributes, UMessage, UUri};

pub const NONE: &str = "none";

pub fn format_uri(uri: &UUri) -> String {
    uri.to_uri(false).trim_start_matches("//").to_string()
}

pub fn format_optional_uri(uri: Option<&UUri>) -> String {
    uri.map(format_uri).unwrap_or_else(|| NONE.to_string())
}

pub fn format_message_id(message: &UMessage) -> String {
    format_attributes_message_id(message.attributes.as_ref())
}

pub fn format_message_type(message: &UMessage) -> String {
    message
        .attributes
        .as_ref()
        .map(|attributes| format!("{:?}", attributes.type_.enum_value_or_default()))
        .unwrap_or_else(|| "UMESSAGE_TYPE_UNSPECIFIED".to_string())
}

pub fn format_source_uri(message: &UMessage) -> String {
    format_optional_uri(
        message
            .attributes
            .as_ref()
            .and_then(|attributes| attributes.source.as_ref()),
    )
}

pub fn format_sink_uri(message: &UMessage) -> String {
    format_optional_uri(
        message
            .attributes
            .as_ref()
            .and_then(|attributes| attributes.sink.as_ref()),
    )
}

pub fn format_attributes_message_id(attributes: Option<&UAttributes>) -> String {
    attributes
        .and_then(|attrs| attrs.id.as_ref())
        .map(|id| id.to_hyphenated_string())
        .unwrap_or_else(|| NONE.to_string())
}

/// Renders a panic payload caught from a listener.
pub fn format_panic_payload(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
