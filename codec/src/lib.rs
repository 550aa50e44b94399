// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Wire codec for MQTT 3.1.1 and 5.0.
//!
//! Pure and stateless: packet structs with level-aware `encode`/`decode`,
//! plus [`framing`] for moving whole packets over an async byte stream.
//! Nothing here tracks connection state; that is the client's job.

mod ack;
mod auth;
mod base;
mod byte_array;
mod connect;
mod connect_ack;
mod data_types;
mod disconnect;
mod error;
pub mod framing;
mod header;
mod packet;
mod ping;
mod property;
mod publish;
mod reason_code;
mod subscribe;
mod subscribe_ack;
pub mod topic;
mod unsubscribe;
mod unsubscribe_ack;
pub mod utils;
mod var_int;

pub use ack::{
    PublishAckPacket, PublishCompletePacket, PublishReceivedPacket, PublishReleasePacket,
    PUBLISH_ACK_PROPERTIES, PUBLISH_ACK_REASONS, PUBLISH_RELEASE_REASONS,
};
pub use auth::{AuthPacket, AUTH_PROPERTIES, AUTH_REASONS};
pub use base::{
    DecodePacket, EncodePacket, PacketId, ProtocolLevel, QoS, PROTOCOL_NAME, PROTOCOL_NAME_V31,
};
pub use byte_array::ByteArray;
pub use connect::{ConnectPacket, Will, CONNECT_PROPERTIES, CONNECT_WILL_PROPERTIES};
pub use connect_ack::{ConnectAckPacket, CONNECT_ACK_PROPERTIES, CONNECT_ACK_REASONS};
pub use data_types::{BinaryData, StringData, StringPairData};
pub use disconnect::{DisconnectPacket, DISCONNECT_PROPERTIES, DISCONNECT_REASONS};
pub use error::{DecodeError, EncodeError};
pub use header::{FixedHeader, PacketType};
pub use packet::Packet;
pub use ping::{PingRequestPacket, PingResponsePacket};
pub use property::{
    Properties, PropertyId, DEFAULT_RECEIVE_MAXIMUM, DEFAULT_TOPIC_ALIAS_MAXIMUM,
};
pub use publish::{PublishPacket, PUBLISH_PROPERTIES};
pub use reason_code::ReasonCode;
pub use subscribe::{
    RetainHandling, SubscribePacket, SubscribeTopic, SubscriptionOptions, SUBSCRIBE_PROPERTIES,
};
pub use subscribe_ack::{SubscribeAckPacket, SUBSCRIBE_ACK_PROPERTIES, SUBSCRIBE_ACK_REASONS};
pub use topic::{PubTopic, SubTopic, TopicFilter};
pub use unsubscribe::{UnsubscribePacket, UNSUBSCRIBE_PROPERTIES};
pub use unsubscribe_ack::{
    UnsubscribeAckPacket, UNSUBSCRIBE_ACK_PROPERTIES, UNSUBSCRIBE_ACK_REASONS,
};
pub use var_int::{VarInt, VarIntError, VAR_INT_MAX};
