// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! The MQTT 5.0 property table.
//!
//! Properties are held as inline optional fields rather than a
//! heterogeneous list: presence is `Option::is_some`, missing-vs-zero is
//! explicit, and encode/decode are straight-line code. The two repeatable
//! properties (User Property, Subscription Identifier) are vectors with
//! order preserved.

use std::convert::TryFrom;

use byteorder::{BigEndian, WriteBytesExt};

use crate::data_types::{BinaryData, StringData, StringPairData};
use crate::topic::PubTopic;
use crate::{ByteArray, DecodeError, EncodeError, QoS, VarInt};

/// Property identifier byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyId {
    /// Byte. PUBLISH, Will Properties.
    PayloadFormatIndicator = 0x01,

    /// Four Byte Integer. PUBLISH, Will Properties.
    MessageExpiryInterval = 0x02,

    /// UTF-8 Encoded String. PUBLISH, Will Properties.
    ContentType = 0x03,

    /// UTF-8 Encoded String. PUBLISH, Will Properties.
    ResponseTopic = 0x08,

    /// Binary Data. PUBLISH, Will Properties.
    CorrelationData = 0x09,

    /// Variable Byte Integer. PUBLISH, SUBSCRIBE. May appear multiple
    /// times in a PUBLISH; zero is a Protocol Error.
    SubscriptionIdentifier = 0x0b,

    /// Four Byte Integer. CONNECT, CONNACK, DISCONNECT.
    SessionExpiryInterval = 0x11,

    /// UTF-8 Encoded String. CONNACK.
    AssignedClientIdentifier = 0x12,

    /// Two Byte Integer. CONNACK. If present the Client MUST use this
    /// value instead of the Keep Alive it sent on CONNECT [MQTT-3.2.2-21].
    ServerKeepAlive = 0x13,

    /// UTF-8 Encoded String. CONNECT, CONNACK, AUTH.
    AuthenticationMethod = 0x15,

    /// Binary Data. CONNECT, CONNACK, AUTH. Protocol Error without an
    /// Authentication Method.
    AuthenticationData = 0x16,

    /// Byte, 0 or 1. CONNECT.
    RequestProblemInformation = 0x17,

    /// Four Byte Integer. Will Properties.
    WillDelayInterval = 0x18,

    /// Byte, 0 or 1. CONNECT.
    RequestResponseInformation = 0x19,

    /// UTF-8 Encoded String. CONNACK.
    ResponseInformation = 0x1a,

    /// UTF-8 Encoded String. CONNACK, DISCONNECT.
    ServerReference = 0x1c,

    /// UTF-8 Encoded String. All acknowledgement packets.
    ReasonString = 0x1f,

    /// Two Byte Integer. CONNECT, CONNACK. Zero is a Protocol Error;
    /// absent defaults to 65,535.
    ReceiveMaximum = 0x21,

    /// Two Byte Integer. CONNECT, CONNACK. Absent defaults to 0.
    TopicAliasMaximum = 0x22,

    /// Two Byte Integer. PUBLISH. Zero is a Protocol Error.
    TopicAlias = 0x23,

    /// Byte, 0 or 1. CONNACK. Absent means QoS 2 is supported.
    MaximumQoS = 0x24,

    /// Byte, 0 or 1. CONNACK. Absent means retained messages are supported.
    RetainAvailable = 0x25,

    /// UTF-8 String Pair. Every packet that carries properties; may
    /// repeat, order is preserved.
    UserProperty = 0x26,

    /// Four Byte Integer. CONNECT, CONNACK. Zero is a Protocol Error.
    MaximumPacketSize = 0x27,

    /// Byte, 0 or 1. CONNACK.
    WildcardSubscriptionAvailable = 0x28,

    /// Byte, 0 or 1. CONNACK.
    SubscriptionIdentifierAvailable = 0x29,

    /// Byte, 0 or 1. CONNACK.
    SharedSubscriptionAvailable = 0x2a,
}

impl PropertyId {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for PropertyId {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, DecodeError> {
        match v {
            0x01 => Ok(Self::PayloadFormatIndicator),
            0x02 => Ok(Self::MessageExpiryInterval),
            0x03 => Ok(Self::ContentType),
            0x08 => Ok(Self::ResponseTopic),
            0x09 => Ok(Self::CorrelationData),
            0x0b => Ok(Self::SubscriptionIdentifier),
            0x11 => Ok(Self::SessionExpiryInterval),
            0x12 => Ok(Self::AssignedClientIdentifier),
            0x13 => Ok(Self::ServerKeepAlive),
            0x15 => Ok(Self::AuthenticationMethod),
            0x16 => Ok(Self::AuthenticationData),
            0x17 => Ok(Self::RequestProblemInformation),
            0x18 => Ok(Self::WillDelayInterval),
            0x19 => Ok(Self::RequestResponseInformation),
            0x1a => Ok(Self::ResponseInformation),
            0x1c => Ok(Self::ServerReference),
            0x1f => Ok(Self::ReasonString),
            0x21 => Ok(Self::ReceiveMaximum),
            0x22 => Ok(Self::TopicAliasMaximum),
            0x23 => Ok(Self::TopicAlias),
            0x24 => Ok(Self::MaximumQoS),
            0x25 => Ok(Self::RetainAvailable),
            0x26 => Ok(Self::UserProperty),
            0x27 => Ok(Self::MaximumPacketSize),
            0x28 => Ok(Self::WildcardSubscriptionAvailable),
            0x29 => Ok(Self::SubscriptionIdentifierAvailable),
            0x2a => Ok(Self::SharedSubscriptionAvailable),
            _ => Err(DecodeError::InvalidPropertyType),
        }
    }
}

/// Default Receive Maximum when the property is absent.
pub const DEFAULT_RECEIVE_MAXIMUM: u16 = u16::MAX;

/// Default Topic Alias Maximum when the property is absent.
pub const DEFAULT_TOPIC_ALIAS_MAXIMUM: u16 = 0;

/// Property bag of one packet.
///
/// A field that is `None` (or an empty vector) is absent from the wire.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Properties {
    pub payload_format_indicator: Option<bool>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<StringData>,
    pub response_topic: Option<PubTopic>,
    pub correlation_data: Option<BinaryData>,
    pub subscription_identifiers: Vec<u32>,
    pub session_expiry_interval: Option<u32>,
    pub assigned_client_identifier: Option<StringData>,
    pub server_keep_alive: Option<u16>,
    pub authentication_method: Option<StringData>,
    pub authentication_data: Option<BinaryData>,
    pub request_problem_information: Option<bool>,
    pub will_delay_interval: Option<u32>,
    pub request_response_information: Option<bool>,
    pub response_information: Option<StringData>,
    pub server_reference: Option<StringData>,
    pub reason_string: Option<StringData>,
    pub receive_maximum: Option<u16>,
    pub topic_alias_maximum: Option<u16>,
    pub topic_alias: Option<u16>,
    pub maximum_qos: Option<QoS>,
    pub retain_available: Option<bool>,
    pub user_properties: Vec<StringPairData>,
    pub maximum_packet_size: Option<u32>,
    pub wildcard_subscription_available: Option<bool>,
    pub subscription_identifier_available: Option<bool>,
    pub shared_subscription_available: Option<bool>,
}

fn decode_bool(ba: &mut ByteArray) -> Result<bool, DecodeError> {
    match ba.read_byte()? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(DecodeError::InvalidPropertyValue),
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T) -> Result<(), DecodeError> {
    // It is a Protocol Error to include most properties more than once.
    if slot.is_some() {
        return Err(DecodeError::InvalidPropertyValue);
    }
    *slot = Some(value);
    Ok(())
}

impl Properties {
    /// Create an empty property bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no property is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Byte length of the encoded property values, excluding the length
    /// prefix.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn payload_bytes(&self) -> usize {
        let id = PropertyId::bytes();
        let mut len = 0;
        if self.payload_format_indicator.is_some() {
            len += id + 1;
        }
        if self.message_expiry_interval.is_some() {
            len += id + 4;
        }
        if let Some(v) = &self.content_type {
            len += id + v.bytes();
        }
        if let Some(v) = &self.response_topic {
            len += id + v.bytes();
        }
        if let Some(v) = &self.correlation_data {
            len += id + v.bytes();
        }
        for sub_id in &self.subscription_identifiers {
            // Subscription ids are validated non-zero, always in VBI range.
            if let Ok(v) = VarInt::from(*sub_id as usize) {
                len += id + v.bytes();
            }
        }
        if self.session_expiry_interval.is_some() {
            len += id + 4;
        }
        if let Some(v) = &self.assigned_client_identifier {
            len += id + v.bytes();
        }
        if self.server_keep_alive.is_some() {
            len += id + 2;
        }
        if let Some(v) = &self.authentication_method {
            len += id + v.bytes();
        }
        if let Some(v) = &self.authentication_data {
            len += id + v.bytes();
        }
        if self.request_problem_information.is_some() {
            len += id + 1;
        }
        if self.will_delay_interval.is_some() {
            len += id + 4;
        }
        if self.request_response_information.is_some() {
            len += id + 1;
        }
        if let Some(v) = &self.response_information {
            len += id + v.bytes();
        }
        if let Some(v) = &self.server_reference {
            len += id + v.bytes();
        }
        if let Some(v) = &self.reason_string {
            len += id + v.bytes();
        }
        if self.receive_maximum.is_some() {
            len += id + 2;
        }
        if self.topic_alias_maximum.is_some() {
            len += id + 2;
        }
        if self.topic_alias.is_some() {
            len += id + 2;
        }
        if self.maximum_qos.is_some() {
            len += id + 1;
        }
        if self.retain_available.is_some() {
            len += id + 1;
        }
        for pair in &self.user_properties {
            len += id + pair.bytes();
        }
        if self.maximum_packet_size.is_some() {
            len += id + 4;
        }
        if self.wildcard_subscription_available.is_some() {
            len += id + 1;
        }
        if self.subscription_identifier_available.is_some() {
            len += id + 1;
        }
        if self.shared_subscription_available.is_some() {
            len += id + 1;
        }
        len
    }

    /// Byte length in packet, including the VBI length prefix.
    ///
    /// # Panics
    ///
    /// Panics if the payload exceeds the VBI maximum; the per-field 64 KiB
    /// limits keep real bags far below it.
    #[must_use]
    pub fn bytes(&self) -> usize {
        let payload = self.payload_bytes();
        VarInt::from(payload).unwrap().bytes() + payload
    }

    /// Parse a property bag off the cursor, checking every id against
    /// `allowed`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPropertyType` for an unknown id or one outside
    /// `allowed`; `InvalidPropertyValue` for duplicates and out-of-range
    /// values.
    #[allow(clippy::too_many_lines)]
    pub fn decode(ba: &mut ByteArray, allowed: &[PropertyId]) -> Result<Self, DecodeError> {
        // A packet ending right before an optional property block carries
        // an empty bag.
        if ba.remaining_bytes() == 0 {
            return Ok(Self::new());
        }
        let prop_len = VarInt::decode(ba)?.value();
        let end = ba.offset() + prop_len;
        let mut props = Self::new();

        while ba.offset() < end {
            let id_byte = ba.read_byte()?;
            let id = PropertyId::try_from(id_byte)?;
            if !allowed.contains(&id) {
                log::error!("property: id {id:?} not allowed on this packet");
                return Err(DecodeError::InvalidPropertyType);
            }
            match id {
                PropertyId::PayloadFormatIndicator => {
                    let v = decode_bool(ba)?;
                    set_once(&mut props.payload_format_indicator, v)?;
                }
                PropertyId::MessageExpiryInterval => {
                    let v = ba.read_u32()?;
                    set_once(&mut props.message_expiry_interval, v)?;
                }
                PropertyId::ContentType => {
                    let v = StringData::decode(ba)?;
                    set_once(&mut props.content_type, v)?;
                }
                PropertyId::ResponseTopic => {
                    let v = PubTopic::decode(ba)?;
                    set_once(&mut props.response_topic, v)?;
                }
                PropertyId::CorrelationData => {
                    let v = BinaryData::decode(ba)?;
                    set_once(&mut props.correlation_data, v)?;
                }
                PropertyId::SubscriptionIdentifier => {
                    let v = VarInt::decode(ba)?;
                    if v.value() == 0 {
                        return Err(DecodeError::InvalidPropertyValue);
                    }
                    #[allow(clippy::cast_possible_truncation)]
                    props.subscription_identifiers.push(v.value() as u32);
                }
                PropertyId::SessionExpiryInterval => {
                    let v = ba.read_u32()?;
                    set_once(&mut props.session_expiry_interval, v)?;
                }
                PropertyId::AssignedClientIdentifier => {
                    let v = StringData::decode(ba)?;
                    set_once(&mut props.assigned_client_identifier, v)?;
                }
                PropertyId::ServerKeepAlive => {
                    let v = ba.read_u16()?;
                    set_once(&mut props.server_keep_alive, v)?;
                }
                PropertyId::AuthenticationMethod => {
                    let v = StringData::decode(ba)?;
                    set_once(&mut props.authentication_method, v)?;
                }
                PropertyId::AuthenticationData => {
                    let v = BinaryData::decode(ba)?;
                    set_once(&mut props.authentication_data, v)?;
                }
                PropertyId::RequestProblemInformation => {
                    let v = decode_bool(ba)?;
                    set_once(&mut props.request_problem_information, v)?;
                }
                PropertyId::WillDelayInterval => {
                    let v = ba.read_u32()?;
                    set_once(&mut props.will_delay_interval, v)?;
                }
                PropertyId::RequestResponseInformation => {
                    let v = decode_bool(ba)?;
                    set_once(&mut props.request_response_information, v)?;
                }
                PropertyId::ResponseInformation => {
                    let v = StringData::decode(ba)?;
                    set_once(&mut props.response_information, v)?;
                }
                PropertyId::ServerReference => {
                    let v = StringData::decode(ba)?;
                    set_once(&mut props.server_reference, v)?;
                }
                PropertyId::ReasonString => {
                    let v = StringData::decode(ba)?;
                    set_once(&mut props.reason_string, v)?;
                }
                PropertyId::ReceiveMaximum => {
                    let v = ba.read_u16()?;
                    if v == 0 {
                        return Err(DecodeError::InvalidPropertyValue);
                    }
                    set_once(&mut props.receive_maximum, v)?;
                }
                PropertyId::TopicAliasMaximum => {
                    let v = ba.read_u16()?;
                    set_once(&mut props.topic_alias_maximum, v)?;
                }
                PropertyId::TopicAlias => {
                    let v = ba.read_u16()?;
                    set_once(&mut props.topic_alias, v)?;
                }
                PropertyId::MaximumQoS => {
                    let qos = QoS::decode(ba)?;
                    if qos == QoS::ExactOnce {
                        return Err(DecodeError::InvalidPropertyValue);
                    }
                    set_once(&mut props.maximum_qos, qos)?;
                }
                PropertyId::RetainAvailable => {
                    let v = decode_bool(ba)?;
                    set_once(&mut props.retain_available, v)?;
                }
                PropertyId::UserProperty => {
                    let pair = StringPairData::decode(ba)?;
                    props.user_properties.push(pair);
                }
                PropertyId::MaximumPacketSize => {
                    let v = ba.read_u32()?;
                    if v == 0 {
                        return Err(DecodeError::InvalidPropertyValue);
                    }
                    set_once(&mut props.maximum_packet_size, v)?;
                }
                PropertyId::WildcardSubscriptionAvailable => {
                    let v = decode_bool(ba)?;
                    set_once(&mut props.wildcard_subscription_available, v)?;
                }
                PropertyId::SubscriptionIdentifierAvailable => {
                    let v = decode_bool(ba)?;
                    set_once(&mut props.subscription_identifier_available, v)?;
                }
                PropertyId::SharedSubscriptionAvailable => {
                    let v = decode_bool(ba)?;
                    set_once(&mut props.shared_subscription_available, v)?;
                }
            }
        }

        if ba.offset() != end {
            return Err(DecodeError::InvalidRemainingLength);
        }
        Ok(props)
    }

    /// Append the VBI length prefix and all present properties to `buf`.
    ///
    /// Fields are written in id order; the type system guarantees no
    /// unknown id can appear here.
    ///
    /// # Errors
    ///
    /// Returns error if a repeatable property holds an out-of-range value.
    #[allow(clippy::too_many_lines)]
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let payload = self.payload_bytes();
        let prefix = VarInt::from(payload)?;
        let mut n = prefix.encode(buf)?;
        n += payload;

        if let Some(v) = self.payload_format_indicator {
            buf.push(PropertyId::PayloadFormatIndicator as u8);
            buf.push(u8::from(v));
        }
        if let Some(v) = self.message_expiry_interval {
            buf.push(PropertyId::MessageExpiryInterval as u8);
            buf.write_u32::<BigEndian>(v)?;
        }
        if let Some(v) = &self.content_type {
            buf.push(PropertyId::ContentType as u8);
            v.encode(buf)?;
        }
        if let Some(v) = &self.response_topic {
            buf.push(PropertyId::ResponseTopic as u8);
            v.encode(buf)?;
        }
        if let Some(v) = &self.correlation_data {
            buf.push(PropertyId::CorrelationData as u8);
            v.encode(buf)?;
        }
        for sub_id in &self.subscription_identifiers {
            buf.push(PropertyId::SubscriptionIdentifier as u8);
            VarInt::from(*sub_id as usize)?.encode(buf)?;
        }
        if let Some(v) = self.session_expiry_interval {
            buf.push(PropertyId::SessionExpiryInterval as u8);
            buf.write_u32::<BigEndian>(v)?;
        }
        if let Some(v) = &self.assigned_client_identifier {
            buf.push(PropertyId::AssignedClientIdentifier as u8);
            v.encode(buf)?;
        }
        if let Some(v) = self.server_keep_alive {
            buf.push(PropertyId::ServerKeepAlive as u8);
            buf.write_u16::<BigEndian>(v)?;
        }
        if let Some(v) = &self.authentication_method {
            buf.push(PropertyId::AuthenticationMethod as u8);
            v.encode(buf)?;
        }
        if let Some(v) = &self.authentication_data {
            buf.push(PropertyId::AuthenticationData as u8);
            v.encode(buf)?;
        }
        if let Some(v) = self.request_problem_information {
            buf.push(PropertyId::RequestProblemInformation as u8);
            buf.push(u8::from(v));
        }
        if let Some(v) = self.will_delay_interval {
            buf.push(PropertyId::WillDelayInterval as u8);
            buf.write_u32::<BigEndian>(v)?;
        }
        if let Some(v) = self.request_response_information {
            buf.push(PropertyId::RequestResponseInformation as u8);
            buf.push(u8::from(v));
        }
        if let Some(v) = &self.response_information {
            buf.push(PropertyId::ResponseInformation as u8);
            v.encode(buf)?;
        }
        if let Some(v) = &self.server_reference {
            buf.push(PropertyId::ServerReference as u8);
            v.encode(buf)?;
        }
        if let Some(v) = &self.reason_string {
            buf.push(PropertyId::ReasonString as u8);
            v.encode(buf)?;
        }
        if let Some(v) = self.receive_maximum {
            buf.push(PropertyId::ReceiveMaximum as u8);
            buf.write_u16::<BigEndian>(v)?;
        }
        if let Some(v) = self.topic_alias_maximum {
            buf.push(PropertyId::TopicAliasMaximum as u8);
            buf.write_u16::<BigEndian>(v)?;
        }
        if let Some(v) = self.topic_alias {
            buf.push(PropertyId::TopicAlias as u8);
            buf.write_u16::<BigEndian>(v)?;
        }
        if let Some(v) = self.maximum_qos {
            buf.push(PropertyId::MaximumQoS as u8);
            buf.push(v as u8);
        }
        if let Some(v) = self.retain_available {
            buf.push(PropertyId::RetainAvailable as u8);
            buf.push(u8::from(v));
        }
        for pair in &self.user_properties {
            buf.push(PropertyId::UserProperty as u8);
            pair.encode(buf)?;
        }
        if let Some(v) = self.maximum_packet_size {
            buf.push(PropertyId::MaximumPacketSize as u8);
            buf.write_u32::<BigEndian>(v)?;
        }
        if let Some(v) = self.wildcard_subscription_available {
            buf.push(PropertyId::WildcardSubscriptionAvailable as u8);
            buf.push(u8::from(v));
        }
        if let Some(v) = self.subscription_identifier_available {
            buf.push(PropertyId::SubscriptionIdentifierAvailable as u8);
            buf.push(u8::from(v));
        }
        if let Some(v) = self.shared_subscription_available {
            buf.push(PropertyId::SharedSubscriptionAvailable as u8);
            buf.push(u8::from(v));
        }

        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_ALLOWED: &[PropertyId] = &[
        PropertyId::SessionExpiryInterval,
        PropertyId::ReceiveMaximum,
        PropertyId::UserProperty,
        PropertyId::SubscriptionIdentifier,
    ];

    #[test]
    fn test_empty_round_trip() {
        let props = Properties::new();
        let mut buf = Vec::new();
        assert_eq!(props.encode(&mut buf).unwrap(), 1);
        assert_eq!(buf, [0x00]);
        let mut ba = ByteArray::new(&buf);
        assert_eq!(Properties::decode(&mut ba, TEST_ALLOWED).unwrap(), props);
    }

    #[test]
    fn test_round_trip() {
        let mut props = Properties::new();
        props.session_expiry_interval = Some(300);
        props.receive_maximum = Some(16);
        props
            .user_properties
            .push(StringPairData::from("a", "1").unwrap());
        props
            .user_properties
            .push(StringPairData::from("a", "2").unwrap());
        props.subscription_identifiers.push(7);

        let mut buf = Vec::new();
        let n = props.encode(&mut buf).unwrap();
        assert_eq!(n, buf.len());
        assert_eq!(n, props.bytes());

        let mut ba = ByteArray::new(&buf);
        let decoded = Properties::decode(&mut ba, TEST_ALLOWED).unwrap();
        assert_eq!(decoded, props);
        // Repeated user properties keep their order.
        assert_eq!(decoded.user_properties[0].value(), "1");
        assert_eq!(decoded.user_properties[1].value(), "2");
    }

    #[test]
    fn test_disallowed_id() {
        let mut props = Properties::new();
        props.topic_alias = Some(4);
        let mut buf = Vec::new();
        props.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba, TEST_ALLOWED),
            Err(DecodeError::InvalidPropertyType)
        );
    }

    #[test]
    fn test_unknown_id_rejected() {
        // Length 2, id 0x7f with one value byte.
        let buf = [0x02, 0x7f, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba, TEST_ALLOWED),
            Err(DecodeError::InvalidPropertyType)
        );
    }

    #[test]
    fn test_duplicate_rejected() {
        // SessionExpiryInterval twice.
        let buf = [
            0x0a, 0x11, 0x00, 0x00, 0x00, 0x01, 0x11, 0x00, 0x00, 0x00, 0x02,
        ];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba, TEST_ALLOWED),
            Err(DecodeError::InvalidPropertyValue)
        );
    }

    #[test]
    fn test_zero_receive_maximum_rejected() {
        let buf = [0x03, 0x21, 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba, TEST_ALLOWED),
            Err(DecodeError::InvalidPropertyValue)
        );
    }
}
