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

//! Wire framing of uProtocol messages inside SOME/IP payloads.
//!
//! SOME/IP only carries numeric addressing, so the uProtocol attributes travel in a header
//! in front of the application payload. All integers are big-endian.
//!
//! ```text
//! u8   header version (1)
//! u8   message type
//! u8   payload format
//! u8   priority
//! u8   presence flags
//! u32  ttl                     if FLAG_TTL
//! u64  correlation id          if FLAG_CORRELATION
//! 16B  message id (msb, lsb)   if FLAG_ID
//! 16B  request id (msb, lsb)   if FLAG_REQID
//! i32  commstatus              if FLAG_COMMSTATUS
//! uri  source                  if FLAG_SOURCE
//! uri  sink                    if FLAG_SINK
//! u32  payload length, then the payload bytes   if FLAG_PAYLOAD
//!
//! uri = u8 authority length, authority (UTF-8), u32 ue_id, u8 major, u16 resource
//! ```
//!
//! Event frames omit the source: it is the topic the event was published on and is
//! recovered from the bus address on the receiving side.

mod reader;

use crate::codec::reader::FrameReader;
use bytes::{BufMut, Bytes, BytesMut};
use protobuf::{Enum, EnumOrUnknown};
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};
use up_rust::{
    UAttributes, UCode, UMessage, UMessageType, UPayloadFormat, UPriority, UUri, UUID,
};

/// Bridge-assigned identifier linking a bus request to its response.
pub type CorrelationId = u64;

pub const HEADER_VERSION: u8 = 1;

const FLAG_ID: u8 = 0x01;
const FLAG_SOURCE: u8 = 0x02;
const FLAG_SINK: u8 = 0x04;
const FLAG_TTL: u8 = 0x08;
const FLAG_CORRELATION: u8 = 0x10;
const FLAG_REQID: u8 = 0x20;
const FLAG_COMMSTATUS: u8 = 0x40;
const FLAG_PAYLOAD: u8 = 0x80;

const FIXED_HEADER_LEN: usize = 5;
const URI_FIXED_LEN: usize = 1 + 4 + 1 + 2;
const UUID_LEN: usize = 16;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EncodeError {
    MissingAttributes,
    UnknownMessageType(i32),
    UnsupportedPayloadFormat(i32),
    UnknownPriority(i32),
    /// Only REQUEST and RESPONSE frames carry a correlation id.
    CorrelationMismatch(UMessageType),
    AuthorityTooLong(usize),
    FieldOutOfRange { field: &'static str, value: u32 },
    PayloadTooLarge(usize),
}

impl Display for EncodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::MissingAttributes => write!(f, "message has no attributes"),
            EncodeError::UnknownMessageType(value) => write!(f, "unknown message type {value}"),
            EncodeError::UnsupportedPayloadFormat(value) => {
                write!(f, "payload format {value} cannot be carried over the bus")
            }
            EncodeError::UnknownPriority(value) => write!(f, "unknown priority {value}"),
            EncodeError::CorrelationMismatch(message_type) => write!(
                f,
                "correlation id presence does not match message type {message_type:?}"
            ),
            EncodeError::AuthorityTooLong(len) => {
                write!(f, "authority of {len} bytes exceeds 255 bytes")
            }
            EncodeError::FieldOutOfRange { field, value } => {
                write!(f, "{field} {value:#X} is out of range")
            }
            EncodeError::PayloadTooLarge(len) => write!(f, "payload of {len} bytes is too large"),
        }
    }
}

impl Error for EncodeError {}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DecodeError {
    Truncated { needed: usize, available: usize },
    UnsupportedVersion(u8),
    UnknownMessageType(u8),
    FormatMismatch(u8),
    UnknownPriority(u8),
    InvalidAuthority,
    MissingSource,
    MissingCorrelation(UMessageType),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { needed, available } => write!(
                f,
                "frame truncated: needed {needed} bytes, {available} available"
            ),
            DecodeError::UnsupportedVersion(version) => {
                write!(f, "unsupported header version {version}")
            }
            DecodeError::UnknownMessageType(value) => write!(f, "unknown message type {value}"),
            DecodeError::FormatMismatch(value) => write!(f, "unknown payload format {value}"),
            DecodeError::UnknownPriority(value) => write!(f, "unknown priority {value}"),
            DecodeError::InvalidAuthority => write!(f, "authority is not valid UTF-8"),
            DecodeError::MissingSource => write!(f, "frame carries no source"),
            DecodeError::MissingCorrelation(message_type) => {
                write!(f, "{message_type:?} frame carries no correlation id")
            }
        }
    }
}

impl Error for DecodeError {}

/// A decoded frame together with the bridge correlation id it carried.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    pub correlation: Option<CorrelationId>,
    pub message: UMessage,
}

fn requires_correlation(message_type: UMessageType) -> bool {
    matches!(
        message_type,
        UMessageType::UMESSAGE_TYPE_REQUEST | UMessageType::UMESSAGE_TYPE_RESPONSE
    )
}

fn carries_source(message_type: UMessageType) -> bool {
    message_type != UMessageType::UMESSAGE_TYPE_PUBLISH
}

fn enum_byte<E: Enum>(
    value: &EnumOrUnknown<E>,
    to_error: fn(i32) -> EncodeError,
) -> Result<u8, EncodeError> {
    let raw = value.value();
    match value.enum_value() {
        Ok(_) => u8::try_from(raw).map_err(|_| to_error(raw)),
        Err(raw) => Err(to_error(raw)),
    }
}

pub fn encode(
    message: &UMessage,
    correlation: Option<CorrelationId>,
) -> Result<Bytes, EncodeError> {
    let attributes = message
        .attributes
        .as_ref()
        .ok_or(EncodeError::MissingAttributes)?;

    let message_type = attributes
        .type_
        .enum_value()
        .map_err(EncodeError::UnknownMessageType)?;
    if message_type == UMessageType::UMESSAGE_TYPE_UNSPECIFIED {
        return Err(EncodeError::UnknownMessageType(message_type.value()));
    }
    if requires_correlation(message_type) != correlation.is_some() {
        return Err(EncodeError::CorrelationMismatch(message_type));
    }

    let format = enum_byte(
        &attributes.payload_format,
        EncodeError::UnsupportedPayloadFormat,
    )?;
    if attributes.payload_format.enum_value() == Ok(UPayloadFormat::UPAYLOAD_FORMAT_SHM) {
        return Err(EncodeError::UnsupportedPayloadFormat(format.into()));
    }
    let priority = enum_byte(&attributes.priority, EncodeError::UnknownPriority)?;

    let source = attributes
        .source
        .as_ref()
        .filter(|_| carries_source(message_type));
    let sink = attributes.sink.as_ref();
    let commstatus = attributes.commstatus.as_ref().map(EnumOrUnknown::value);

    let mut flags = 0u8;
    let mut set = |flag: u8, present: bool| {
        if present {
            flags |= flag;
        }
    };
    set(FLAG_ID, attributes.id.is_some());
    set(FLAG_SOURCE, source.is_some());
    set(FLAG_SINK, sink.is_some());
    set(FLAG_TTL, attributes.ttl.is_some());
    set(FLAG_CORRELATION, correlation.is_some());
    set(FLAG_REQID, attributes.reqid.is_some());
    set(FLAG_COMMSTATUS, commstatus.is_some());
    set(FLAG_PAYLOAD, message.payload.is_some());

    let payload_len = message.payload.as_ref().map_or(0, Bytes::len);
    let mut frame = BytesMut::with_capacity(FIXED_HEADER_LEN + 64 + payload_len);
    frame.put_u8(HEADER_VERSION);
    frame.put_u8(message_type.value() as u8);
    frame.put_u8(format);
    frame.put_u8(priority);
    frame.put_u8(flags);

    if let Some(ttl) = attributes.ttl {
        frame.put_u32(ttl);
    }
    if let Some(correlation) = correlation {
        frame.put_u64(correlation);
    }
    if let Some(id) = attributes.id.as_ref() {
        put_uuid(&mut frame, id);
    }
    if let Some(reqid) = attributes.reqid.as_ref() {
        put_uuid(&mut frame, reqid);
    }
    if let Some(commstatus) = commstatus {
        frame.put_i32(commstatus);
    }
    if let Some(source) = source {
        put_uri(&mut frame, source)?;
    }
    if let Some(sink) = sink {
        put_uri(&mut frame, sink)?;
    }
    if let Some(payload) = message.payload.as_ref() {
        let len =
            u32::try_from(payload.len()).map_err(|_| EncodeError::PayloadTooLarge(payload.len()))?;
        frame.put_u32(len);
        frame.put_slice(payload);
    }

    Ok(frame.freeze())
}

fn put_uuid(frame: &mut BytesMut, id: &UUID) {
    frame.put_u64(id.msb);
    frame.put_u64(id.lsb);
}

fn put_uri(frame: &mut BytesMut, uri: &UUri) -> Result<(), EncodeError> {
    let authority = uri.authority_name.as_bytes();
    let authority_len =
        u8::try_from(authority.len()).map_err(|_| EncodeError::AuthorityTooLong(authority.len()))?;
    let major = u8::try_from(uri.ue_version_major).map_err(|_| EncodeError::FieldOutOfRange {
        field: "ue_version_major",
        value: uri.ue_version_major,
    })?;
    let resource = u16::try_from(uri.resource_id).map_err(|_| EncodeError::FieldOutOfRange {
        field: "resource_id",
        value: uri.resource_id,
    })?;

    frame.reserve(URI_FIXED_LEN + authority.len());
    frame.put_u8(authority_len);
    frame.put_slice(authority);
    frame.put_u32(uri.ue_id);
    frame.put_u8(major);
    frame.put_u16(resource);
    Ok(())
}

/// Decodes a frame received on the bus.
///
/// `known_source` is the URI of the bus address an event arrived on; it becomes the source of
/// frames that elide it. Bytes after the declared payload are ignored.
pub fn decode(
    frame: &[u8],
    is_event: bool,
    known_source: Option<&UUri>,
) -> Result<DecodedFrame, DecodeError> {
    let mut reader = FrameReader::new(frame);

    let version = reader.u8()?;
    if version != HEADER_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let type_byte = reader.u8()?;
    let message_type = UMessageType::from_i32(type_byte.into())
        .filter(|message_type| *message_type != UMessageType::UMESSAGE_TYPE_UNSPECIFIED)
        .ok_or(DecodeError::UnknownMessageType(type_byte))?;
    let format_byte = reader.u8()?;
    let payload_format = UPayloadFormat::from_i32(format_byte.into())
        .filter(|format| *format != UPayloadFormat::UPAYLOAD_FORMAT_SHM)
        .ok_or(DecodeError::FormatMismatch(format_byte))?;
    let priority_byte = reader.u8()?;
    let priority = UPriority::from_i32(priority_byte.into())
        .ok_or(DecodeError::UnknownPriority(priority_byte))?;
    let flags = reader.u8()?;
    let has = |flag: u8| flags & flag != 0;

    let ttl = if has(FLAG_TTL) {
        Some(reader.u32()?)
    } else {
        None
    };
    let correlation = if has(FLAG_CORRELATION) {
        Some(reader.u64()?)
    } else {
        None
    };
    if requires_correlation(message_type) && correlation.is_none() {
        return Err(DecodeError::MissingCorrelation(message_type));
    }
    let id = if has(FLAG_ID) {
        Some(read_uuid(&mut reader)?)
    } else {
        None
    };
    let reqid = if has(FLAG_REQID) {
        Some(read_uuid(&mut reader)?)
    } else {
        None
    };
    let commstatus = if has(FLAG_COMMSTATUS) {
        Some(EnumOrUnknown::<UCode>::from_i32(reader.i32()?))
    } else {
        None
    };
    let source = if has(FLAG_SOURCE) {
        Some(read_uri(&mut reader)?)
    } else if is_event || !carries_source(message_type) {
        Some(known_source.cloned().ok_or(DecodeError::MissingSource)?)
    } else {
        return Err(DecodeError::MissingSource);
    };
    let sink = if has(FLAG_SINK) {
        Some(read_uri(&mut reader)?)
    } else {
        None
    };
    let payload = if has(FLAG_PAYLOAD) {
        let len = reader.u32()? as usize;
        Some(Bytes::copy_from_slice(reader.take(len)?))
    } else {
        None
    };

    let attributes = UAttributes {
        id: id.into(),
        type_: message_type.into(),
        source: source.into(),
        sink: sink.into(),
        priority: priority.into(),
        ttl,
        reqid: reqid.into(),
        commstatus,
        payload_format: payload_format.into(),
        ..Default::default()
    };

    Ok(DecodedFrame {
        correlation,
        message: UMessage {
            attributes: Some(attributes).into(),
            payload,
            ..Default::default()
        },
    })
}

fn read_uuid(reader: &mut FrameReader<'_>) -> Result<UUID, DecodeError> {
    let msb = reader.u64()?;
    let lsb = reader.u64()?;
    Ok(UUID {
        msb,
        lsb,
        ..Default::default()
    })
}

fn read_uri(reader: &mut FrameReader<'_>) -> Result<UUri, DecodeError> {
    let authority_len = reader.u8()? as usize;
    let authority = std::str::from_utf8(reader.take(authority_len)?)
        .map_err(|_| DecodeError::InvalidAuthority)?;
    let ue_id = reader.u32()?;
    let major = reader.u8()?;
    let resource = reader.u16()?;
    Ok(UUri {
        authority_name: authority.to_string(),
        ue_id,
        ue_version_major: major.into(),
        resource_id: resource.into(),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use up_rust::UMessageBuilder;

    fn topic() -> UUri {
        UUri::try_from_parts("vehicle-a", 0x1234, 0x1, 0x8001).expect("topic should build")
    }

    fn method() -> UUri {
        UUri::try_from_parts("someip", 0x0002_4321, 0x2, 0x0007).expect("method should build")
    }

    fn reply_to() -> UUri {
        UUri::try_from_parts("vehicle-a", 0x0100, 0x1, 0x0000).expect("reply URI should build")
    }

    #[test]
    fn publish_round_trips_with_source_from_the_topic_address() {
        let message = UMessageBuilder::publish(topic())
            .build_with_payload("23.5", UPayloadFormat::UPAYLOAD_FORMAT_TEXT)
            .expect("publish should build");

        let frame = encode(&message, None).expect("publish should encode");
        let decoded = decode(&frame, true, Some(&topic())).expect("frame should decode");

        assert_eq!(decoded.correlation, None);
        assert_eq!(decoded.message, message);
    }

    #[test]
    fn publish_frame_elides_the_source() {
        let message = UMessageBuilder::publish(topic())
            .build_with_payload("23.5", UPayloadFormat::UPAYLOAD_FORMAT_TEXT)
            .expect("publish should build");

        let frame = encode(&message, None).expect("publish should encode");
        assert_eq!(frame[4] & FLAG_SOURCE, 0);
        assert_eq!(
            decode(&frame, true, None),
            Err(DecodeError::MissingSource)
        );
    }

    #[test]
    fn request_and_response_round_trip_with_correlation() {
        let request = UMessageBuilder::request(method(), reply_to(), 500)
            .with_priority(UPriority::UPRIORITY_CS5)
            .build_with_payload(vec![1u8, 2, 3], UPayloadFormat::UPAYLOAD_FORMAT_RAW)
            .expect("request should build");
        let frame = encode(&request, Some(7)).expect("request should encode");
        let decoded = decode(&frame, false, None).expect("request should decode");
        assert_eq!(decoded.correlation, Some(7));
        assert_eq!(decoded.message, request);

        let request_attributes = request.attributes.as_ref().expect("request attributes");
        let response = UMessageBuilder::response_for_request(request_attributes)
            .with_comm_status(UCode::NOT_FOUND)
            .build()
            .expect("response should build");
        let frame = encode(&response, Some(u64::MAX)).expect("response should encode");
        let decoded = decode(&frame, false, None).expect("response should decode");
        assert_eq!(decoded.correlation, Some(u64::MAX));
        assert_eq!(decoded.message, response);
    }

    #[test]
    fn correlation_must_match_message_type() {
        let publish = UMessageBuilder::publish(topic())
            .build()
            .expect("publish should build");
        assert_eq!(
            encode(&publish, Some(1)),
            Err(EncodeError::CorrelationMismatch(
                UMessageType::UMESSAGE_TYPE_PUBLISH
            ))
        );

        let request = UMessageBuilder::request(method(), reply_to(), 500)
            .build()
            .expect("request should build");
        assert_eq!(
            encode(&request, None),
            Err(EncodeError::CorrelationMismatch(
                UMessageType::UMESSAGE_TYPE_REQUEST
            ))
        );
    }

    #[test]
    fn every_prefix_of_a_frame_is_truncated() {
        let request = UMessageBuilder::request(method(), reply_to(), 500)
            .build_with_payload("ping", UPayloadFormat::UPAYLOAD_FORMAT_TEXT)
            .expect("request should build");
        let frame = encode(&request, Some(3)).expect("request should encode");

        for len in 0..frame.len() {
            match decode(&frame[..len], false, None) {
                Err(DecodeError::Truncated { needed, available }) => {
                    assert_eq!(available, len);
                    assert!(needed > len);
                }
                other => panic!("prefix of {len} bytes decoded to {other:?}"),
            }
        }
    }

    #[test]
    fn trailing_bytes_after_the_payload_are_ignored() {
        let message = UMessageBuilder::publish(topic())
            .build_with_payload("on", UPayloadFormat::UPAYLOAD_FORMAT_TEXT)
            .expect("publish should build");
        let mut frame = encode(&message, None).expect("publish should encode").to_vec();
        frame.extend_from_slice(&[0xAA; 32]);

        let decoded = decode(&frame, true, Some(&topic())).expect("frame should decode");
        assert_eq!(decoded.message.payload, Some(Bytes::from_static(b"on")));
    }

    #[test]
    fn unknown_payload_format_is_a_format_mismatch() {
        let message = UMessageBuilder::publish(topic())
            .build_with_payload("on", UPayloadFormat::UPAYLOAD_FORMAT_TEXT)
            .expect("publish should build");
        let mut frame = encode(&message, None).expect("publish should encode").to_vec();
        frame[2] = 0x7F;

        assert_eq!(
            decode(&frame, true, Some(&topic())),
            Err(DecodeError::FormatMismatch(0x7F))
        );
    }

    #[test]
    fn shared_memory_payloads_are_not_encoded() {
        let message = UMessageBuilder::publish(topic())
            .build_with_payload(vec![0u8; 4], UPayloadFormat::UPAYLOAD_FORMAT_SHM)
            .expect("publish should build");

        assert!(matches!(
            encode(&message, None),
            Err(EncodeError::UnsupportedPayloadFormat(_))
        ));
    }

    #[test]
    fn header_version_is_checked() {
        let message = UMessageBuilder::publish(topic())
            .build()
            .expect("publish should build");
        let mut frame = encode(&message, None).expect("publish should encode").to_vec();
        frame[0] = 9;

        assert_eq!(
            decode(&frame, true, Some(&topic())),
            Err(DecodeError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn oversized_authority_is_rejected() {
        let mut sink = reply_to();
        sink.authority_name = "a".repeat(256);
        let message = UMessage {
            attributes: Some(UAttributes {
                type_: UMessageType::UMESSAGE_TYPE_NOTIFICATION.into(),
                source: Some(topic()).into(),
                sink: Some(sink).into(),
                ..Default::default()
            })
            .into(),
            ..Default::default()
        };

        assert_eq!(encode(&message, None), Err(EncodeError::AuthorityTooLong(256)));
    }
}
