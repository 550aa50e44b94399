// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Inflight tables of the QoS 1 and QoS 2 delivery protocols.
//!
//! A packet id lives in at most one table at a time: the outbound table
//! holds our unacknowledged publications, the inbound set holds QoS 2
//! packet ids we have seen but whose PUBREL has not arrived yet. Both are
//! mirrored to the session store on every mutation; the store is the
//! source of truth for resumption.

use std::collections::{BTreeMap, BTreeSet};

use codec::{PacketId, PublishPacket};
use tokio::time::Instant;

use crate::store::{StoredPublication, StoredQos2Id};
use crate::token::Token;

/// Delivery phase of an outbound QoS>0 publication.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublicationState {
    /// Accepted while offline, not yet written to any transport.
    Pending,

    /// QoS 1 PUBLISH written, awaiting PUBACK.
    AwaitAck,

    /// QoS 2 PUBLISH written, awaiting PUBREC.
    AwaitReceived,

    /// PUBREL written, awaiting PUBCOMP.
    ReleaseSent,
}

impl PublicationState {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::AwaitAck => 1,
            Self::AwaitReceived => 2,
            Self::ReleaseSent => 3,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Pending),
            1 => Some(Self::AwaitAck),
            2 => Some(Self::AwaitReceived),
            3 => Some(Self::ReleaseSent),
            _ => None,
        }
    }
}

/// One outbound publication awaiting its final acknowledgement.
pub(crate) struct OutboundPublication {
    pub packet: PublishPacket,
    pub state: PublicationState,
    pub sent_at: Option<Instant>,

    /// Absent for publications restored from the store; their callers are
    /// long gone.
    pub token: Option<Token>,
}

/// Both inflight tables of one session.
///
/// Keyed maps are ordered so retransmission on reconnect replays in a
/// stable id order.
pub(crate) struct InflightTables {
    outbound: BTreeMap<u16, OutboundPublication>,
    inbound_qos2: BTreeSet<u16>,
}

impl InflightTables {
    pub fn new() -> Self {
        Self {
            outbound: BTreeMap::new(),
            inbound_qos2: BTreeSet::new(),
        }
    }

    pub fn insert_outbound(&mut self, id: PacketId, publication: OutboundPublication) {
        self.outbound.insert(id.value(), publication);
    }

    pub fn remove_outbound(&mut self, id: PacketId) -> Option<OutboundPublication> {
        self.outbound.remove(&id.value())
    }

    pub fn outbound_mut(&mut self, id: PacketId) -> Option<&mut OutboundPublication> {
        self.outbound.get_mut(&id.value())
    }

    pub fn contains_outbound(&self, id: PacketId) -> bool {
        self.outbound.contains_key(&id.value())
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    pub fn outbound_ids(&self) -> Vec<PacketId> {
        self.outbound.keys().copied().map(PacketId::new).collect()
    }

    /// Drain every outbound token, for failing them on teardown.
    pub fn take_outbound_tokens(&mut self) -> Vec<Token> {
        self.outbound
            .values_mut()
            .filter_map(|publication| publication.token.take())
            .collect()
    }

    pub fn insert_inbound_qos2(&mut self, id: PacketId) {
        self.inbound_qos2.insert(id.value());
    }

    /// Remove is idempotent; PUBREL may be retransmitted.
    pub fn remove_inbound_qos2(&mut self, id: PacketId) -> bool {
        self.inbound_qos2.remove(&id.value())
    }

    pub fn contains_inbound_qos2(&self, id: PacketId) -> bool {
        self.inbound_qos2.contains(&id.value())
    }

    pub fn inbound_qos2_len(&self) -> usize {
        self.inbound_qos2.len()
    }

    pub fn clear(&mut self) {
        self.outbound.clear();
        self.inbound_qos2.clear();
    }

    /// Forget inbound QoS 2 ids after the server reported a fresh session.
    pub fn clear_inbound(&mut self) {
        self.inbound_qos2.clear();
    }

    /// Snapshot the outbound table in store form.
    pub fn outbound_records(&self) -> Vec<StoredPublication> {
        self.outbound
            .values()
            .map(|publication| StoredPublication {
                packet: publication.packet.clone(),
                state: publication.state,
            })
            .collect()
    }

    /// Snapshot the inbound QoS 2 set in store form.
    pub fn inbound_records(&self) -> Vec<StoredQos2Id> {
        self.inbound_qos2.iter().copied().collect()
    }

    /// Merge records loaded from the store, keeping any live entries.
    pub fn restore(&mut self, outbound: Vec<StoredPublication>, inbound: Vec<StoredQos2Id>) {
        for record in outbound {
            let id = record.packet.packet_id().value();
            self.outbound.entry(id).or_insert(OutboundPublication {
                packet: record.packet,
                state: record.state,
                sent_at: None,
                token: None,
            });
        }
        for id in inbound {
            self.inbound_qos2.insert(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;

    fn publication(id: u16, state: PublicationState) -> OutboundPublication {
        let mut packet = PublishPacket::new("t", QoS::AtLeastOnce, b"x").unwrap();
        packet.set_packet_id(PacketId::new(id));
        OutboundPublication {
            packet,
            state,
            sent_at: None,
            token: None,
        }
    }

    #[test]
    fn test_outbound_lifecycle() {
        let mut tables = InflightTables::new();
        let id = PacketId::new(4);
        tables.insert_outbound(id, publication(4, PublicationState::AwaitAck));
        assert!(tables.contains_outbound(id));
        assert_eq!(tables.outbound_len(), 1);

        let removed = tables.remove_outbound(id).unwrap();
        assert_eq!(removed.state, PublicationState::AwaitAck);
        assert!(!tables.contains_outbound(id));
    }

    #[test]
    fn test_inbound_remove_is_idempotent() {
        let mut tables = InflightTables::new();
        let id = PacketId::new(9);
        tables.insert_inbound_qos2(id);
        assert!(tables.remove_inbound_qos2(id));
        assert!(!tables.remove_inbound_qos2(id));
    }

    #[test]
    fn test_restore_keeps_live_entries(){
        let mut tables = InflightTables::new();
        tables.insert_outbound(PacketId::new(1), publication(1, PublicationState::AwaitAck));

        let stored = vec![
            StoredPublication {
                packet: {
                    let mut p = PublishPacket::new("old", QoS::ExactOnce, b"y").unwrap();
                    p.set_packet_id(PacketId::new(1));
                    p
                },
                state: PublicationState::ReleaseSent,
            },
            StoredPublication {
                packet: {
                    let mut p = PublishPacket::new("old", QoS::ExactOnce, b"z").unwrap();
                    p.set_packet_id(PacketId::new(2));
                    p
                },
                state: PublicationState::AwaitReceived,
            },
        ];
        tables.restore(stored, vec![7]);

        // Live entry 1 wins over the stored copy; 2 is restored.
        assert_eq!(
            tables.outbound_mut(PacketId::new(1)).unwrap().state,
            PublicationState::AwaitAck
        );
        assert_eq!(
            tables.outbound_mut(PacketId::new(2)).unwrap().state,
            PublicationState::AwaitReceived
        );
        assert!(tables.contains_inbound_qos2(PacketId::new(7)));
    }
}
