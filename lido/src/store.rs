// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Durable persistence of session state.
//!
//! Three record sets survive a process restart: outbound publications
//! with their QoS phase, inbound QoS 2 packet ids, and persistent
//! subscriptions. The file-backed store keeps one directory per client
//! id with one log per record set; saves rewrite a temporary file and
//! rename it into place, loads tolerate a truncated tail.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use codec::{
    ByteArray, EncodePacket, Packet, ProtocolLevel, PublishPacket, SubTopic, SubscriptionOptions,
};

use crate::error::{Error, ErrorKind};
use crate::inflight::PublicationState;

/// Version byte stamped on every record.
const RECORD_VERSION: u8 = 1;

const OUTBOUND_LOG: &str = "outbound.log";
const INBOUND_LOG: &str = "inbound_qos2.log";
const SUBS_LOG: &str = "subs.log";

/// Outbound publication as persisted: the full packet plus its phase.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredPublication {
    pub packet: PublishPacket,
    pub state: PublicationState,
}

/// Inbound QoS 2 packet id as persisted.
pub type StoredQos2Id = u16;

/// Persistent subscription as persisted. Handlers cannot be stored; a
/// restored subscription delivers through the default publish handler
/// until re-registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredSubscription {
    pub filter: String,
    pub options: SubscriptionOptions,
    pub subscription_id: Option<u32>,
}

/// Everything a store holds for one client id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PersistedSession {
    pub outbound: Vec<StoredPublication>,
    pub inbound_qos2: Vec<StoredQos2Id>,
    pub subscriptions: Vec<StoredSubscription>,
}

impl PersistedSession {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.inbound_qos2.is_empty() && self.subscriptions.is_empty()
    }
}

/// Durable backend for inflight publications and persistent
/// subscriptions.
///
/// Accessed only from the session engine; implementations do not need
/// interior locking.
pub trait SessionStore: Send {
    /// Bind the store to `client_id`. Called once the id is known, which
    /// for a server-assigned id is after CONNACK.
    fn open(&mut self, client_id: &str) -> Result<(), Error>;

    /// Load everything persisted for the bound client id.
    fn load(&mut self) -> Result<PersistedSession, Error>;

    fn save_outbound(&mut self, records: &[StoredPublication]) -> Result<(), Error>;

    fn save_inbound_qos2(&mut self, ids: &[StoredQos2Id]) -> Result<(), Error>;

    fn save_subscriptions(&mut self, subs: &[StoredSubscription]) -> Result<(), Error>;

    /// Drop all persisted state for the bound client id.
    fn clear(&mut self) -> Result<(), Error>;
}

/// Store that keeps session state in memory only. The default; state does
/// not survive the process.
#[derive(Default)]
pub struct MemoryStore {
    session: PersistedSession,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn open(&mut self, _client_id: &str) -> Result<(), Error> {
        Ok(())
    }

    fn load(&mut self) -> Result<PersistedSession, Error> {
        Ok(self.session.clone())
    }

    fn save_outbound(&mut self, records: &[StoredPublication]) -> Result<(), Error> {
        self.session.outbound = records.to_vec();
        Ok(())
    }

    fn save_inbound_qos2(&mut self, ids: &[StoredQos2Id]) -> Result<(), Error> {
        self.session.inbound_qos2 = ids.to_vec();
        Ok(())
    }

    fn save_subscriptions(&mut self, subs: &[StoredSubscription]) -> Result<(), Error> {
        self.session.subscriptions = subs.to_vec();
        Ok(())
    }

    fn clear(&mut self) -> Result<(), Error> {
        self.session = PersistedSession::default();
        Ok(())
    }
}

fn store_error(context: &str, err: &dyn std::fmt::Display) -> Error {
    Error::from_string(ErrorKind::StoreError, format!("{context}: {err}"))
}

/// File-backed session store: one directory per client id holding
/// `outbound.log`, `inbound_qos2.log` and `subs.log`.
///
/// Each record is `[version u8][length u32 BE][payload]`. A save writes
/// the whole log to a `.tmp` sibling and renames it over the old file, so
/// a crash leaves either the old or the new log, never a mix.
pub struct FileStore {
    root: PathBuf,
    dir: Option<PathBuf>,
}

impl FileStore {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            dir: None,
        }
    }

    fn dir(&self) -> Result<&Path, Error> {
        self.dir
            .as_deref()
            .ok_or_else(|| Error::new(ErrorKind::StoreError, "Store not opened"))
    }

    fn write_log(&self, name: &str, records: &[Vec<u8>]) -> Result<(), Error> {
        let dir = self.dir()?;
        let tmp = dir.join(format!("{name}.tmp"));
        let path = dir.join(name);

        let mut file = fs::File::create(&tmp).map_err(|err| store_error("create log", &err))?;
        for record in records {
            file.write_u8(RECORD_VERSION)
                .map_err(|err| store_error("write record", &err))?;
            #[allow(clippy::cast_possible_truncation)]
            file.write_u32::<BigEndian>(record.len() as u32)
                .map_err(|err| store_error("write record", &err))?;
            file.write_all(record)
                .map_err(|err| store_error("write record", &err))?;
        }
        file.sync_all().map_err(|err| store_error("sync log", &err))?;
        fs::rename(&tmp, &path).map_err(|err| store_error("rename log", &err))?;
        Ok(())
    }

    /// Read all complete records of `name`; a truncated tail is dropped
    /// with a warning, which is the compaction step on reload.
    fn read_log(&self, name: &str) -> Result<Vec<Vec<u8>>, Error> {
        let path = self.dir()?.join(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(store_error("read log", &err)),
        };

        let mut records = Vec::new();
        let mut cursor = bytes.as_slice();
        loop {
            let version = match cursor.read_u8() {
                Ok(version) => version,
                Err(_) => break,
            };
            if version != RECORD_VERSION {
                log::warn!("store: unknown record version {version} in {name}, stopping");
                break;
            }
            let Ok(len) = cursor.read_u32::<BigEndian>() else {
                log::warn!("store: truncated record header in {name}, dropping tail");
                break;
            };
            let len = len as usize;
            if cursor.len() < len {
                log::warn!("store: truncated record body in {name}, dropping tail");
                break;
            }
            let mut payload = vec![0u8; len];
            if cursor.read_exact(&mut payload).is_err() {
                break;
            }
            records.push(payload);
        }
        Ok(records)
    }
}

fn encode_publication(record: &StoredPublication) -> Result<Vec<u8>, Error> {
    let mut payload = vec![record.state.to_byte()];
    // The packet body reuses the wire codec at the 5.0 level so stored
    // properties survive a restart.
    record
        .packet
        .encode(&mut payload, ProtocolLevel::V5)
        .map_err(|err| store_error("encode publication", &err))?;
    Ok(payload)
}

fn decode_publication(payload: &[u8]) -> Option<StoredPublication> {
    let (state_byte, packet_bytes) = payload.split_first()?;
    let state = PublicationState::from_byte(*state_byte)?;
    let packet = match Packet::decode(packet_bytes, ProtocolLevel::V5) {
        Ok(Packet::Publish(packet)) => packet,
        _ => return None,
    };
    Some(StoredPublication { packet, state })
}

fn encode_subscription(record: &StoredSubscription) -> Result<Vec<u8>, Error> {
    let mut payload = Vec::new();
    let filter = SubTopic::new(&record.filter)
        .map_err(|err| store_error("encode subscription", &format!("{err:?}")))?;
    filter
        .encode(&mut payload)
        .map_err(|err| store_error("encode subscription", &err))?;
    payload.push(record.options.qos as u8);
    payload.push(u8::from(record.options.no_local));
    payload.push(u8::from(record.options.retain_as_published));
    payload.push(record.options.retain_handling as u8);
    match record.subscription_id {
        Some(id) => {
            payload.push(1);
            payload
                .write_u32::<BigEndian>(id)
                .map_err(|err| store_error("encode subscription", &err))?;
        }
        None => payload.push(0),
    }
    Ok(payload)
}

fn decode_subscription(payload: &[u8]) -> Option<StoredSubscription> {
    use std::convert::TryFrom;

    let mut ba = ByteArray::new(payload);
    let filter = SubTopic::decode(&mut ba).ok()?;
    let qos = codec::QoS::try_from(ba.read_byte().ok()?).ok()?;
    let no_local = ba.read_byte().ok()? != 0;
    let retain_as_published = ba.read_byte().ok()? != 0;
    let retain_handling = codec::RetainHandling::try_from(ba.read_byte().ok()?).ok()?;
    let subscription_id = if ba.read_byte().ok()? != 0 {
        Some(ba.read_u32().ok()?)
    } else {
        None
    };
    Some(StoredSubscription {
        filter: filter.as_ref().to_string(),
        options: SubscriptionOptions {
            qos,
            no_local,
            retain_as_published,
            retain_handling,
        },
        subscription_id,
    })
}

impl SessionStore for FileStore {
    fn open(&mut self, client_id: &str) -> Result<(), Error> {
        let dir = self.root.join(client_id);
        fs::create_dir_all(&dir).map_err(|err| store_error("create store dir", &err))?;
        self.dir = Some(dir);
        Ok(())
    }

    fn load(&mut self) -> Result<PersistedSession, Error> {
        let mut session = PersistedSession::default();
        for payload in self.read_log(OUTBOUND_LOG)? {
            match decode_publication(&payload) {
                Some(record) => session.outbound.push(record),
                None => log::warn!("store: dropping undecodable publication record"),
            }
        }
        for payload in self.read_log(INBOUND_LOG)? {
            let mut ba = ByteArray::new(&payload);
            match ba.read_u16() {
                Ok(id) => session.inbound_qos2.push(id),
                Err(_) => log::warn!("store: dropping undecodable qos2 id record"),
            }
        }
        for payload in self.read_log(SUBS_LOG)? {
            match decode_subscription(&payload) {
                Some(record) => session.subscriptions.push(record),
                None => log::warn!("store: dropping undecodable subscription record"),
            }
        }
        Ok(session)
    }

    fn save_outbound(&mut self, records: &[StoredPublication]) -> Result<(), Error> {
        let encoded = records
            .iter()
            .map(encode_publication)
            .collect::<Result<Vec<_>, _>>()?;
        self.write_log(OUTBOUND_LOG, &encoded)
    }

    fn save_inbound_qos2(&mut self, ids: &[StoredQos2Id]) -> Result<(), Error> {
        let encoded = ids
            .iter()
            .map(|id| id.to_be_bytes().to_vec())
            .collect::<Vec<_>>();
        self.write_log(INBOUND_LOG, &encoded)
    }

    fn save_subscriptions(&mut self, subs: &[StoredSubscription]) -> Result<(), Error> {
        let encoded = subs
            .iter()
            .map(encode_subscription)
            .collect::<Result<Vec<_>, _>>()?;
        self.write_log(SUBS_LOG, &encoded)
    }

    fn clear(&mut self) -> Result<(), Error> {
        let dir = self.dir()?;
        for name in [OUTBOUND_LOG, INBOUND_LOG, SUBS_LOG] {
            match fs::remove_file(dir.join(name)) {
                Ok(()) => (),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
                Err(err) => return Err(store_error("clear log", &err)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::{PacketId, QoS};

    fn temp_store() -> (FileStore, PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "lido-store-test-{}",
            codec::utils::random_string(10)
        ));
        (FileStore::new(&root), root)
    }

    fn sample_session() -> PersistedSession {
        let mut packet = PublishPacket::new("s/1", QoS::AtLeastOnce, b"offline").unwrap();
        packet.set_packet_id(PacketId::new(3));
        packet.properties_mut().message_expiry_interval = Some(30);
        PersistedSession {
            outbound: vec![StoredPublication {
                packet,
                state: PublicationState::AwaitAck,
            }],
            inbound_qos2: vec![7, 9],
            subscriptions: vec![StoredSubscription {
                filter: "s/1".to_string(),
                options: SubscriptionOptions::with_qos(QoS::AtLeastOnce),
                subscription_id: Some(12),
            }],
        }
    }

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        store.open("c1").unwrap();
        let session = sample_session();
        store.save_outbound(&session.outbound).unwrap();
        store.save_inbound_qos2(&session.inbound_qos2).unwrap();
        store.save_subscriptions(&session.subscriptions).unwrap();
        assert_eq!(store.load().unwrap(), session);

        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_round_trip() {
        let (mut store, root) = temp_store();
        store.open("c1").unwrap();
        let session = sample_session();
        store.save_outbound(&session.outbound).unwrap();
        store.save_inbound_qos2(&session.inbound_qos2).unwrap();
        store.save_subscriptions(&session.subscriptions).unwrap();

        // A fresh handle over the same directory sees the same state.
        let mut reopened = FileStore::new(&root);
        reopened.open("c1").unwrap();
        assert_eq!(reopened.load().unwrap(), session);

        reopened.clear().unwrap();
        assert!(reopened.load().unwrap().is_empty());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_file_store_isolates_client_ids() {
        let (mut store, root) = temp_store();
        store.open("c1").unwrap();
        store
            .save_inbound_qos2(&sample_session().inbound_qos2)
            .unwrap();

        let mut other = FileStore::new(&root);
        other.open("c2").unwrap();
        assert!(other.load().unwrap().is_empty());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_truncated_tail_is_dropped() {
        let (mut store, root) = temp_store();
        store.open("c1").unwrap();
        store
            .save_inbound_qos2(&sample_session().inbound_qos2)
            .unwrap();

        // Corrupt the log with half a record.
        let path = root.join("c1").join(INBOUND_LOG);
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[RECORD_VERSION, 0x00]);
        fs::write(&path, bytes).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.inbound_qos2, vec![7, 9]);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_unopened_store_fails() {
        let (mut store, _root) = temp_store();
        assert_eq!(
            store.load().unwrap_err().kind(),
            &ErrorKind::StoreError
        );
    }
}
