// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::sync::Arc;

use codec::{Properties, PublishPacket, QoS};

use crate::error::Error;
use crate::session::ServerCapabilities;

/// An application message delivered to a subscription handler.
#[derive(Clone, Debug)]
pub struct Message {
    /// Topic the message was published on, with any topic alias already
    /// resolved back to the full string.
    pub topic: String,

    pub payload: Vec<u8>,

    pub qos: QoS,

    pub retain: bool,

    pub dup: bool,

    /// 5.0 metadata of the publish; empty on a 3.1.1 connection.
    pub properties: Properties,
}

impl Message {
    pub(crate) fn from_packet(packet: PublishPacket, topic: String) -> Self {
        let qos = packet.qos();
        let retain = packet.retain();
        let dup = packet.dup();
        let (_, properties, payload) = packet.into_parts();
        Self {
            topic,
            payload,
            qos,
            retain,
            dup,
            properties,
        }
    }
}

/// Callback invoked with each message routed to a subscription. Runs on
/// the dispatch task, never on the reader, so a slow handler cannot stall
/// packet ingress.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Fired once, on the first successful CONNACK of the session.
pub type ConnectHandler = Arc<dyn Fn() + Send + Sync>;

/// Fired on every successful CONNACK, including reconnects.
pub type ConnectionUpHandler = Arc<dyn Fn(&ServerCapabilities) + Send + Sync>;

/// Fired when an established connection is lost for any reason.
pub type ConnectionLostHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Handler driving an enhanced authentication exchange: receives each
/// inbound AUTH packet and may return the next AUTH packet to send. The
/// exchange semantics are owned entirely by the application.
pub type AuthHandler =
    Arc<dyn Fn(&codec::AuthPacket) -> Option<codec::AuthPacket> + Send + Sync>;
