// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! The session engine: CONNECT/CONNACK negotiation, the reader/writer
//! loop, acknowledgement routing, session resumption and the reconnect
//! scheduler.
//!
//! Per connection there are three tasks. The reader task owns the read
//! half of the transport and feeds parsed packets into a channel. This
//! engine task owns the write half, the session state and all tables;
//! it multiplexes incoming packets, application commands and keep-alive
//! deadlines through one `select!` loop, so acknowledgements are
//! processed strictly in arrival order and the transport only ever has a
//! single writer. Handler invocation happens on a third task, the
//! dispatcher, so a slow handler cannot stall packet ingress.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use codec::{
    framing, ConnectAckPacket, ConnectPacket, DecodeError, EncodePacket, Packet, PacketId,
    PingRequestPacket, Properties, ProtocolLevel, PubTopic, PublishAckPacket,
    PublishCompletePacket, PublishPacket, PublishReceivedPacket, PublishReleasePacket, QoS,
    ReasonCode, StringData, StringPairData, SubscribePacket, SubscribeTopic, UnsubscribePacket,
    DEFAULT_RECEIVE_MAXIMUM,
};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::alias::{OutboundAlias, TopicAliasManager};
use crate::client::PublishOptions;
use crate::connect_options::ConnectOptions;
use crate::error::{Error, ErrorKind};
use crate::flow::FlowController;
use crate::inflight::{InflightTables, OutboundPublication, PublicationState};
use crate::message::{Message, MessageHandler};
use crate::packet_id::PacketIdAllocator;
use crate::pinger::{KeepAlivePinger, PingAction};
use crate::stream::Stream;
use crate::subscription::{SubscribeFilter, SubscriptionRegistry};
use crate::store::SessionStore;
use crate::token::{Token, TokenKind};

/// Broker capabilities snapshotted from CONNACK, immutable for the
/// lifetime of the connection. Absent 5.0 properties fall back to the
/// protocol defaults, which also covers 3.1.1 connections.
#[derive(Clone, Debug)]
pub struct ServerCapabilities {
    pub max_packet_size: Option<u32>,
    pub receive_maximum: u16,
    pub maximum_qos: QoS,
    pub retain_available: bool,
    pub wildcard_subscription_available: bool,
    pub subscription_identifier_available: bool,
    pub shared_subscription_available: bool,
    pub topic_alias_maximum: u16,
    pub server_keep_alive: Option<u16>,
    pub assigned_client_id: Option<String>,
    pub session_expiry_interval: Option<u32>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            max_packet_size: None,
            receive_maximum: DEFAULT_RECEIVE_MAXIMUM,
            maximum_qos: QoS::ExactOnce,
            retain_available: true,
            wildcard_subscription_available: true,
            subscription_identifier_available: true,
            shared_subscription_available: true,
            topic_alias_maximum: 0,
            server_keep_alive: None,
            assigned_client_id: None,
            session_expiry_interval: None,
        }
    }
}

impl ServerCapabilities {
    fn from_ack(ack: &ConnectAckPacket) -> Self {
        let props = ack.properties();
        Self {
            max_packet_size: props.maximum_packet_size,
            receive_maximum: props.receive_maximum.unwrap_or(DEFAULT_RECEIVE_MAXIMUM),
            maximum_qos: props.maximum_qos.unwrap_or(QoS::ExactOnce),
            retain_available: props.retain_available.unwrap_or(true),
            wildcard_subscription_available: props
                .wildcard_subscription_available
                .unwrap_or(true),
            subscription_identifier_available: props
                .subscription_identifier_available
                .unwrap_or(true),
            shared_subscription_available: props.shared_subscription_available.unwrap_or(true),
            topic_alias_maximum: props.topic_alias_maximum.unwrap_or(0),
            server_keep_alive: props.server_keep_alive,
            assigned_client_id: props
                .assigned_client_identifier
                .as_ref()
                .map(|id| id.as_ref().to_string()),
            session_expiry_interval: props.session_expiry_interval,
        }
    }
}

/// Connection lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Application commands crossing from `AsyncClient` into the engine.
pub(crate) enum Command {
    Publish {
        topic: String,
        payload: Vec<u8>,
        options: PublishOptions,
        token: Token,
    },
    Subscribe {
        filters: Vec<SubscribeFilter>,
        subscription_id: Option<u32>,
        token: Token,
    },
    Unsubscribe {
        filters: Vec<String>,
        token: Token,
    },
    Disconnect {
        deadline: Duration,
        token: Token,
    },
}

/// One routed publish headed for the dispatcher task.
pub(crate) struct DispatchItem {
    pub message: Message,
    pub handlers: Vec<MessageHandler>,
}

/// Invokes handlers sequentially, preserving wire arrival order per
/// subscription while keeping the reader free.
pub(crate) fn spawn_dispatcher(
    mut rx: mpsc::UnboundedReceiver<DispatchItem>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            for handler in &item.handlers {
                handler(&item.message);
            }
        }
    })
}

fn spawn_reader(
    mut read_half: ReadHalf<Stream>,
    level: ProtocolLevel,
    max_incoming: usize,
    tx: mpsc::UnboundedSender<Result<Packet, DecodeError>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match framing::read_packet(&mut read_half, level, max_incoming).await {
                Ok(packet) => {
                    log::trace!("reader: got {:?}", packet.packet_type());
                    if tx.send(Ok(packet)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err));
                    break;
                }
            }
        }
    })
}

struct PendingSubscribe {
    filters: Vec<String>,
    token: Token,
}

struct PendingUnsubscribe {
    filters: Vec<String>,
    token: Token,
}

enum ConnectedExit {
    Closed,
    Lost(Error),
}

pub(crate) struct SessionEngine {
    options: ConnectOptions,
    level: ProtocolLevel,
    client_id: String,
    state: SessionState,

    store: Box<dyn SessionStore>,
    store_loaded: bool,
    registry: SubscriptionRegistry,
    tables: InflightTables,
    allocator: PacketIdAllocator,
    aliases: TopicAliasManager,
    flow: Arc<FlowController>,
    pinger: KeepAlivePinger,
    caps: ServerCapabilities,

    cmd_rx: Option<mpsc::UnboundedReceiver<Command>>,
    dispatch_tx: mpsc::UnboundedSender<DispatchItem>,
    packet_rx: Option<mpsc::UnboundedReceiver<Result<Packet, DecodeError>>>,
    writer: Option<WriteHalf<Stream>>,
    reader_handle: Option<JoinHandle<()>>,

    sub_pending: HashMap<u16, PendingSubscribe>,
    unsub_pending: HashMap<u16, PendingUnsubscribe>,

    connected_once: bool,
}

impl SessionEngine {
    pub(crate) fn new(
        options: ConnectOptions,
        store: Box<dyn SessionStore>,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        dispatch_tx: mpsc::UnboundedSender<DispatchItem>,
        flow: Arc<FlowController>,
    ) -> Self {
        let level = options.protocol_level();
        // 3.1.1 has no server-assigned ids; make a local one for an empty
        // client id. On 5.0 an empty id asks the server to assign.
        let client_id = if options.client_id().is_empty() && !level.is_v5() {
            codec::utils::random_string(12)
        } else {
            options.client_id().to_string()
        };
        Self {
            options,
            level,
            client_id,
            state: SessionState::Disconnected,
            store,
            store_loaded: false,
            registry: SubscriptionRegistry::new(),
            tables: InflightTables::new(),
            allocator: PacketIdAllocator::new(),
            aliases: TopicAliasManager::new(),
            flow,
            pinger: KeepAlivePinger::new(),
            caps: ServerCapabilities::default(),
            cmd_rx: Some(cmd_rx),
            dispatch_tx,
            packet_rx: None,
            writer: None,
            reader_handle: None,
            sub_pending: HashMap::new(),
            unsub_pending: HashMap::new(),
            connected_once: false,
        }
    }

    /// Open the transport, negotiate CONNECT/CONNACK, resume session
    /// state, and start the reader.
    pub(crate) async fn connect(&mut self) -> Result<(), Error> {
        self.state = SessionState::Connecting;
        let mut stream = Stream::connect(&self.options).await?;

        let connect_packet = self.build_connect_packet()?;
        framing::write_packet(&mut stream, &Packet::Connect(connect_packet), self.level)
            .await
            .map_err(Error::from)?;

        let connack = tokio::time::timeout(
            self.options.connect_timeout(),
            framing::read_packet(&mut stream, self.level, self.options.max_incoming_packet()),
        )
        .await
        .map_err(|_| Error::new(ErrorKind::TransportError, "Timed out waiting for CONNACK"))?
        .map_err(Error::from)?;
        let Packet::ConnectAck(ack) = connack else {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "First packet from server is not CONNACK",
            ));
        };

        if ack.reason_code() != ReasonCode::Success {
            return Err(Error::from_string(
                ErrorKind::ConnectionRefused(ack.reason_code()),
                format!("Broker refused connection: {:?}", ack.reason_code()),
            ));
        }
        let session_present = ack.session_present();
        self.caps = ServerCapabilities::from_ack(&ack);
        if let Some(assigned) = &self.caps.assigned_client_id {
            log::info!("session: server assigned client id {assigned}");
            self.client_id = assigned.clone();
        }
        if self.client_id.is_empty() {
            // Server accepted an empty id without assigning one.
            self.client_id = codec::utils::random_string(12);
        }

        self.store.open(&self.client_id)?;
        if !self.store_loaded {
            if self.options.clean_session() {
                self.store.clear()?;
            } else {
                let persisted = self.store.load()?;
                if !persisted.is_empty() {
                    log::info!(
                        "session: restored {} publications, {} qos2 ids, {} subscriptions",
                        persisted.outbound.len(),
                        persisted.inbound_qos2.len(),
                        persisted.subscriptions.len()
                    );
                }
                self.tables.restore(persisted.outbound, persisted.inbound_qos2);
                self.registry.restore(persisted.subscriptions);
                self.flow.restore(self.tables.outbound_len());
            }
            self.store_loaded = true;
        }

        self.flow
            .set_peer_limits(self.caps.receive_maximum, self.caps.max_packet_size);
        self.aliases
            .reset(self.caps.topic_alias_maximum, self.options.topic_alias_maximum());
        let keep_alive = self
            .caps
            .server_keep_alive
            .map_or(self.options.keep_alive(), |secs| {
                Duration::from_secs(secs.into())
            });
        self.pinger.reset(keep_alive);

        let (read_half, write_half) = tokio::io::split(stream);
        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        self.reader_handle = Some(spawn_reader(
            read_half,
            self.level,
            self.options.max_incoming_packet(),
            packet_tx,
        ));
        self.writer = Some(write_half);
        self.packet_rx = Some(packet_rx);

        let session_fresh = !session_present || self.options.clean_session();
        if session_fresh {
            // The server holds no state for us; inbound QoS 2 ids from the
            // previous incarnation are void.
            self.tables.clear_inbound();
            self.persist_inbound();
            self.resubscribe().await?;
        } else if self.options.resubscribe_on_reconnect() {
            self.resubscribe().await?;
        }
        self.retransmit().await?;

        self.state = SessionState::Connected;
        if !self.connected_once {
            self.connected_once = true;
            if let Some(hook) = self.options.on_connect() {
                hook();
            }
        }
        if let Some(hook) = self.options.on_connection_up() {
            hook(&self.caps);
        }
        log::info!(
            "session: connected as {} (session_present: {session_present})",
            self.client_id
        );
        Ok(())
    }

    fn build_connect_packet(&self) -> Result<ConnectPacket, Error> {
        let mut packet = ConnectPacket::new(&self.client_id).map_err(Error::from)?;
        packet.set_protocol_level(self.level);
        packet.set_clean_session(self.options.clean_session());
        #[allow(clippy::cast_possible_truncation)]
        packet.set_keep_alive(self.options.keep_alive().as_secs().min(u64::from(u16::MAX)) as u16);
        if let Some(will) = self.options.will() {
            packet.set_will(Some(will.clone()));
        }
        if let Some(creds) = self.options.credentials() {
            packet
                .set_credentials(&creds.username, creds.password.as_deref())
                .map_err(Error::from)?;
        }
        if self.level.is_v5() {
            let props = packet.properties_mut();
            props.session_expiry_interval = self.options.session_expiry_interval();
            if self.options.receive_maximum() != DEFAULT_RECEIVE_MAXIMUM {
                props.receive_maximum = Some(self.options.receive_maximum());
            }
            if self.options.max_incoming_packet() > 0 {
                #[allow(clippy::cast_possible_truncation)]
                let limit = self.options.max_incoming_packet().min(u32::MAX as usize) as u32;
                props.maximum_packet_size = Some(limit);
            }
            if self.options.topic_alias_maximum() > 0 {
                props.topic_alias_maximum = Some(self.options.topic_alias_maximum());
            }
        }
        Ok(packet)
    }

    /// Engine main loop. Runs until the user disconnects or the
    /// connection dies without a reconnect path.
    pub(crate) async fn run(mut self) {
        loop {
            match self.run_connected().await {
                ConnectedExit::Closed => break,
                ConnectedExit::Lost(err) => {
                    log::warn!("session: connection lost in state {:?}: {err}", self.state);
                    self.teardown_transport().await;
                    if let Some(hook) = self.options.on_connection_lost() {
                        hook(&err);
                    }
                    if self.options.auto_reconnect() && Self::is_retriable(&err) {
                        self.state = SessionState::Reconnecting;
                        if !self.reconnect_loop().await {
                            break;
                        }
                    } else {
                        self.fail_pending(&Error::from_string(
                            ErrorKind::ConnectionAborted,
                            format!("Connection aborted: {err}"),
                        ));
                        self.state = SessionState::Disconnected;
                        break;
                    }
                }
            }
        }
        log::info!("session: engine stopped for {}", self.client_id);
    }

    async fn run_connected(&mut self) -> ConnectedExit {
        let Some(mut cmd_rx) = self.cmd_rx.take() else {
            return ConnectedExit::Closed;
        };
        let Some(mut packet_rx) = self.packet_rx.take() else {
            self.cmd_rx = Some(cmd_rx);
            return ConnectedExit::Lost(Error::new(ErrorKind::NotConnected, "No transport"));
        };

        let exit = loop {
            let deadline = self.pinger.next_deadline();
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => futures::future::pending().await,
                }
            };

            tokio::select! {
                maybe_packet = packet_rx.recv() => match maybe_packet {
                    Some(Ok(packet)) => {
                        if let Err(err) = self.handle_packet(packet).await {
                            break ConnectedExit::Lost(err);
                        }
                    }
                    Some(Err(decode_err)) => break ConnectedExit::Lost(Error::from(decode_err)),
                    None => {
                        break ConnectedExit::Lost(Error::new(
                            ErrorKind::TransportError,
                            "Transport closed by peer",
                        ));
                    }
                },
                maybe_cmd = cmd_rx.recv() => match maybe_cmd {
                    Some(Command::Publish { topic, payload, options, token }) => {
                        if let Err(err) = self.handle_publish(&topic, &payload, &options, token).await {
                            break ConnectedExit::Lost(err);
                        }
                    }
                    Some(Command::Subscribe { filters, subscription_id, token }) => {
                        if let Err(err) = self.handle_subscribe(filters, subscription_id, token).await {
                            break ConnectedExit::Lost(err);
                        }
                    }
                    Some(Command::Unsubscribe { filters, token }) => {
                        if let Err(err) = self.handle_unsubscribe(filters, token).await {
                            break ConnectedExit::Lost(err);
                        }
                    }
                    Some(Command::Disconnect { deadline, token }) => {
                        self.graceful_disconnect(deadline, token).await;
                        break ConnectedExit::Closed;
                    }
                    None => {
                        // Every client handle dropped; leave cleanly.
                        self.graceful_disconnect(
                            Duration::from_secs(5),
                            Token::new(TokenKind::Disconnect),
                        )
                        .await;
                        break ConnectedExit::Closed;
                    }
                },
                () = timer => {
                    match self.pinger.check(Instant::now()) {
                        PingAction::Timeout => {
                            break ConnectedExit::Lost(Error::new(
                                ErrorKind::KeepAliveTimeout,
                                "No traffic within 1.5 keep-alive intervals",
                            ));
                        }
                        PingAction::SendPing => {
                            let ping = Packet::PingRequest(PingRequestPacket::new());
                            if let Err(err) = self.send_packet(ping).await {
                                break ConnectedExit::Lost(err);
                            }
                        }
                        PingAction::Idle => (),
                    }
                }
            }
        };

        self.cmd_rx = Some(cmd_rx);
        exit
    }

    /// Exponential backoff with ±20% jitter: 1, 2, 4, ... seconds capped
    /// at 60. Returns true once reconnected, false when the session ends.
    async fn reconnect_loop(&mut self) -> bool {
        let Some(mut cmd_rx) = self.cmd_rx.take() else {
            return false;
        };
        let mut attempt: u32 = 0;
        let reconnected = loop {
            let base = (1u64 << attempt.min(6)).min(60);
            let jitter = 0.8 + rand::random::<f64>() * 0.4;
            #[allow(clippy::cast_precision_loss)]
            let delay = Duration::from_secs_f64(base as f64 * jitter);
            log::info!(
                "session: reconnect attempt {} in {:.1}s",
                attempt + 1,
                delay.as_secs_f64()
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    match self.connect().await {
                        Ok(()) => break true,
                        Err(err) => {
                            if let ErrorKind::ConnectionRefused(reason) = err.kind() {
                                if !Self::is_retriable_refusal(*reason) {
                                    log::error!("session: giving up reconnect: {err}");
                                    self.fail_pending(&err);
                                    self.state = SessionState::Closed;
                                    break false;
                                }
                            }
                            log::warn!("session: reconnect failed: {err}");
                            attempt += 1;
                        }
                    }
                }
                maybe_cmd = cmd_rx.recv() => match maybe_cmd {
                    Some(Command::Disconnect { token, .. }) => {
                        self.fail_pending(&Error::new(
                            ErrorKind::SessionClosed,
                            "Session closed while reconnecting",
                        ));
                        token.complete(Vec::new());
                        self.state = SessionState::Closed;
                        break false;
                    }
                    Some(cmd) => self.handle_command_offline(cmd),
                    None => {
                        self.state = SessionState::Closed;
                        break false;
                    }
                }
            }
        };
        self.cmd_rx = Some(cmd_rx);
        reconnected
    }

    /// Commands arriving while the session is offline. QoS>0 publishes
    /// become pending work delivered after reconnection; everything else
    /// needs a live connection and fails fast.
    fn handle_command_offline(&mut self, cmd: Command) {
        match cmd {
            Command::Publish {
                topic,
                payload,
                options,
                token,
            } => {
                if options.qos == QoS::AtMostOnce {
                    token.fail(Error::new(
                        ErrorKind::NotConnected,
                        "QoS 0 publish while offline",
                    ));
                    return;
                }
                match self.build_publish_packet(&topic, &payload, &options, false) {
                    Ok(mut packet) => match self.allocate_id() {
                        Ok(id) => {
                            packet.set_packet_id(id);
                            self.tables.insert_outbound(
                                id,
                                OutboundPublication {
                                    packet,
                                    state: PublicationState::Pending,
                                    sent_at: None,
                                    token: Some(token),
                                },
                            );
                            self.persist_outbound();
                        }
                        Err(err) => {
                            token.fail(err);
                            self.flow.release();
                        }
                    },
                    Err(err) => {
                        token.fail(err);
                        self.flow.release();
                    }
                }
            }
            Command::Subscribe { token, .. } | Command::Unsubscribe { token, .. } => {
                token.fail(Error::new(
                    ErrorKind::NotConnected,
                    "Operation needs an active connection",
                ));
            }
            Command::Disconnect { token, .. } => {
                // The reconnect loop handles disconnects; reaching here
                // means the loop is gone.
                token.complete(Vec::new());
            }
        }
    }

    fn is_retriable(err: &Error) -> bool {
        match err.kind() {
            ErrorKind::TransportError
            | ErrorKind::KeepAliveTimeout
            | ErrorKind::ProtocolError
            | ErrorKind::FlowControlError => true,
            ErrorKind::ServerReasonCode(reason) => !matches!(
                reason,
                ReasonCode::NotAuthorized
                    | ReasonCode::Banned
                    | ReasonCode::SessionTakenOver
                    | ReasonCode::AdministrativeAction
                    | ReasonCode::UseAnotherServer
                    | ReasonCode::ServerMoved
            ),
            _ => false,
        }
    }

    fn is_retriable_refusal(reason: ReasonCode) -> bool {
        matches!(
            reason,
            ReasonCode::ServerUnavailable
                | ReasonCode::ServerBusy
                | ReasonCode::ConnectionRateExceeded
                | ReasonCode::QuotaExceeded
                | ReasonCode::UnspecifiedError
        )
    }

    async fn teardown_transport(&mut self) {
        if let Some(handle) = self.reader_handle.take() {
            handle.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.packet_rx = None;
        // Alias maps never survive a network connection.
        self.aliases.clear();
    }

    fn fail_pending(&mut self, err: &Error) {
        for token in self.tables.take_outbound_tokens() {
            token.fail(err.clone());
        }
        for (_, pending) in self.sub_pending.drain() {
            pending.token.fail(err.clone());
        }
        for (_, pending) in self.unsub_pending.drain() {
            pending.token.fail(err.clone());
        }
        self.flow.reset();
    }

    async fn graceful_disconnect(&mut self, deadline: Duration, token: Token) {
        log::info!("session: disconnecting");
        self.state = SessionState::Closed;

        let mut packet = codec::DisconnectPacket::new();
        if self.level.is_v5() && self.options.clean_session() {
            packet.properties_mut().session_expiry_interval = Some(0);
        }
        let graceful = async {
            let _ = self.send_packet(Packet::Disconnect(packet)).await;
            if let Some(writer) = self.writer.as_mut() {
                let _ = writer.shutdown().await;
            }
        };
        if tokio::time::timeout(deadline, graceful).await.is_err() {
            log::warn!("session: graceful disconnect timed out, force closing");
        }

        self.teardown_transport().await;
        self.fail_pending(&Error::new(
            ErrorKind::SessionClosed,
            "Session closed by disconnect",
        ));
        if self.options.clean_session() {
            // The broker drops the session on a clean disconnect; the
            // local mirror follows.
            self.tables.clear();
            if let Err(err) = self.store.clear() {
                log::error!("session: failed to clear store: {err}");
            }
        }
        token.complete(Vec::new());
    }

    /// Serialize, enforce the peer's maximum packet size, and write.
    async fn send_packet(&mut self, packet: Packet) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(256);
        packet.encode(&mut buf, self.level).map_err(Error::from)?;
        self.flow.check_size(buf.len())?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::NotConnected, "No transport"))?;
        writer.write_all(&buf).await?;
        self.pinger.on_send();
        Ok(())
    }

    fn allocate_id(&mut self) -> Result<PacketId, Error> {
        let tables = &self.tables;
        let sub_pending = &self.sub_pending;
        let unsub_pending = &self.unsub_pending;
        let in_use = move |id: PacketId| {
            tables.contains_outbound(id)
                || sub_pending.contains_key(&id.value())
                || unsub_pending.contains_key(&id.value())
        };
        self.allocator.allocate(&in_use)
    }

    fn persist_outbound(&mut self) {
        let records = self.tables.outbound_records();
        if let Err(err) = self.store.save_outbound(&records) {
            log::error!("session: failed to persist outbound table: {err}");
        }
    }

    fn persist_inbound(&mut self) {
        let records = self.tables.inbound_records();
        if let Err(err) = self.store.save_inbound_qos2(&records) {
            log::error!("session: failed to persist inbound qos2 set: {err}");
        }
    }

    fn persist_subscriptions(&mut self) {
        let records = self.registry.persistent_records();
        if let Err(err) = self.store.save_subscriptions(&records) {
            log::error!("session: failed to persist subscriptions: {err}");
        }
    }

    /// Re-send SUBSCRIBE for every persistent subscription, one packet
    /// per filter so differing subscription identifiers survive.
    async fn resubscribe(&mut self) -> Result<(), Error> {
        let records: Vec<_> = self
            .registry
            .iter()
            .filter(|sub| sub.is_persistent())
            .map(|sub| (sub.filter().to_string(), sub.options(), sub.subscription_id()))
            .collect();
        for (filter, options, subscription_id) in records {
            log::info!("session: restoring subscription to {filter}");
            let id = self.allocate_id()?;
            let topic = SubscribeTopic::new(&filter, options).map_err(Error::from)?;
            let mut packet = SubscribePacket::with_topics(id, vec![topic]);
            if let Some(sub_id) = subscription_id {
                if self.level.is_v5() {
                    packet.properties_mut().subscription_identifiers.push(sub_id);
                }
            }
            self.sub_pending.insert(
                id.value(),
                PendingSubscribe {
                    filters: vec![filter],
                    token: Token::new(TokenKind::Subscribe),
                },
            );
            self.send_packet(Packet::Subscribe(packet)).await?;
        }
        Ok(())
    }

    /// Replay inflight work after (re)connection: pending publications go
    /// out fresh, unacknowledged ones with the DUP flag, and publications
    /// whose PUBREL was already sent continue the handshake with PUBREL.
    async fn retransmit(&mut self) -> Result<(), Error> {
        let ids = self.tables.outbound_ids();
        for id in &ids {
            let packet = {
                let Some(entry) = self.tables.outbound_mut(*id) else {
                    continue;
                };
                match entry.state {
                    PublicationState::Pending => {
                        entry.state = if entry.packet.qos() == QoS::AtLeastOnce {
                            PublicationState::AwaitAck
                        } else {
                            PublicationState::AwaitReceived
                        };
                        entry.sent_at = Some(Instant::now());
                        Packet::Publish(entry.packet.clone())
                    }
                    PublicationState::AwaitAck | PublicationState::AwaitReceived => {
                        let mut dup = entry.packet.clone();
                        let _ = dup.set_dup(true);
                        entry.sent_at = Some(Instant::now());
                        Packet::Publish(dup)
                    }
                    PublicationState::ReleaseSent => {
                        Packet::PublishRelease(PublishReleasePacket::new(*id))
                    }
                }
            };
            self.send_packet(packet).await?;
        }
        if !ids.is_empty() {
            log::info!("session: retransmitted {} inflight publications", ids.len());
            self.persist_outbound();
        }
        Ok(())
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<(), Error> {
        self.pinger.on_recv();
        match packet {
            Packet::Publish(publish) => self.on_inbound_publish(publish).await,
            Packet::PublishAck(ack) => {
                self.on_puback(&ack);
                Ok(())
            }
            Packet::PublishReceived(rec) => self.on_pubrec(&rec).await,
            Packet::PublishRelease(rel) => self.on_pubrel(&rel).await,
            Packet::PublishComplete(comp) => {
                self.on_pubcomp(&comp);
                Ok(())
            }
            Packet::SubscribeAck(ack) => self.on_suback(&ack),
            Packet::UnsubscribeAck(ack) => {
                self.on_unsuback(&ack);
                Ok(())
            }
            Packet::PingResponse(_) => {
                log::trace!("session: pingresp");
                Ok(())
            }
            Packet::Disconnect(disconnect) => Err(Error::from_string(
                ErrorKind::ServerReasonCode(disconnect.reason_code()),
                format!("Server disconnected: {:?}", disconnect.reason_code()),
            )),
            Packet::Auth(auth) => self.on_auth(auth).await,
            other => Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("Unexpected {:?} from server", other.packet_type()),
            )),
        }
    }

    async fn on_inbound_publish(&mut self, publish: PublishPacket) -> Result<(), Error> {
        let topic = match self.resolve_topic(&publish) {
            Ok(topic) => topic,
            Err(err) => {
                // A broken alias is answered with DISCONNECT before the
                // connection is torn down.
                let disconnect =
                    codec::DisconnectPacket::with_reason(ReasonCode::TopicAliasInvalid)
                        .unwrap_or_default();
                let _ = self.send_packet(Packet::Disconnect(disconnect)).await;
                return Err(err);
            }
        };

        match publish.qos() {
            QoS::AtMostOnce => {
                self.dispatch(publish, topic);
                Ok(())
            }
            QoS::AtLeastOnce => {
                let id = publish.packet_id();
                self.dispatch(publish, topic);
                self.send_packet(Packet::PublishAck(PublishAckPacket::new(id)))
                    .await
            }
            QoS::ExactOnce => {
                let id = publish.packet_id();
                if self.tables.contains_inbound_qos2(id) {
                    // Redelivery of an id we already hold: acknowledge
                    // again without re-dispatching.
                    log::debug!("session: duplicate qos2 publish {id}");
                } else {
                    if self.tables.inbound_qos2_len()
                        >= usize::from(self.options.receive_maximum())
                    {
                        let disconnect = codec::DisconnectPacket::with_reason(
                            ReasonCode::ReceiveMaximumExceeded,
                        )
                        .unwrap_or_default();
                        let _ = self.send_packet(Packet::Disconnect(disconnect)).await;
                        return Err(Error::new(
                            ErrorKind::FlowControlError,
                            "Peer exceeded our receive maximum",
                        ));
                    }
                    self.tables.insert_inbound_qos2(id);
                    self.persist_inbound();
                    self.dispatch(publish, topic);
                }
                self.send_packet(Packet::PublishReceived(PublishReceivedPacket::new(id)))
                    .await
            }
        }
    }

    fn resolve_topic(&mut self, publish: &PublishPacket) -> Result<String, Error> {
        if let Some(alias) = publish.properties().topic_alias {
            return self.aliases.resolve_inbound(alias, publish.topic());
        }
        if publish.topic().is_empty() {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "Publish with empty topic and no alias",
            ));
        }
        Ok(publish.topic().to_string())
    }

    fn dispatch(&mut self, publish: PublishPacket, topic: String) {
        let matched = self.registry.matches(&topic);
        let mut handlers: Vec<MessageHandler> = Vec::new();
        let mut wants_default = matched.is_empty();
        for subscription in &matched {
            match subscription.handler() {
                Some(handler) => handlers.push(handler),
                // A subscription without a handler delivers through the
                // default publish handler.
                None => wants_default = true,
            }
        }
        if wants_default {
            if let Some(handler) = self.options.default_publish_handler() {
                handlers.push(handler);
            }
        }
        if handlers.is_empty() {
            log::debug!("session: no handler for publish on {topic}, dropping");
            return;
        }
        let message = Message::from_packet(publish, topic);
        let _ = self.dispatch_tx.send(DispatchItem { message, handlers });
    }

    fn on_puback(&mut self, ack: &PublishAckPacket) {
        let id = ack.packet_id();
        match self.tables.remove_outbound(id) {
            Some(entry) => {
                self.persist_outbound();
                self.flow.release();
                if let Some(token) = entry.token {
                    if ack.reason_code().is_error() {
                        token.fail(Error::from_string(
                            ErrorKind::ServerReasonCode(ack.reason_code()),
                            format!("Publish rejected: {:?}", ack.reason_code()),
                        ));
                    } else {
                        token.complete(Vec::new());
                    }
                }
            }
            // A cancelled or long-completed operation; late acks are fine.
            None => log::warn!("session: PUBACK {id} matches no inflight publication"),
        }
    }

    async fn on_pubrec(&mut self, rec: &PublishReceivedPacket) -> Result<(), Error> {
        let id = rec.packet_id();
        if rec.reason_code().is_error() {
            if let Some(entry) = self.tables.remove_outbound(id) {
                self.persist_outbound();
                self.flow.release();
                if let Some(token) = entry.token {
                    token.fail(Error::from_string(
                        ErrorKind::ServerReasonCode(rec.reason_code()),
                        format!("Publish rejected: {:?}", rec.reason_code()),
                    ));
                }
            }
            return Ok(());
        }

        if let Some(entry) = self.tables.outbound_mut(id) {
            entry.state = PublicationState::ReleaseSent;
            self.persist_outbound();
            self.send_packet(Packet::PublishRelease(PublishReleasePacket::new(id)))
                .await
        } else {
            log::warn!("session: PUBREC {id} matches no inflight publication");
            if self.level.is_v5() {
                let release = PublishReleasePacket::with_reason(
                    id,
                    ReasonCode::PacketIdentifierNotFound,
                )
                .map_err(Error::from)?;
                self.send_packet(Packet::PublishRelease(release)).await?;
            }
            Ok(())
        }
    }

    async fn on_pubrel(&mut self, rel: &PublishReleasePacket) -> Result<(), Error> {
        let id = rel.packet_id();
        if self.tables.remove_inbound_qos2(id) {
            self.persist_inbound();
        }
        // PUBCOMP is sent regardless; PUBREL may be a retransmission.
        self.send_packet(Packet::PublishComplete(PublishCompletePacket::new(id)))
            .await
    }

    fn on_pubcomp(&mut self, comp: &PublishCompletePacket) {
        let id = comp.packet_id();
        match self.tables.remove_outbound(id) {
            Some(entry) => {
                self.persist_outbound();
                self.flow.release();
                if let Some(token) = entry.token {
                    token.complete(Vec::new());
                }
            }
            None => log::warn!("session: PUBCOMP {id} matches no inflight publication"),
        }
    }

    fn on_suback(&mut self, ack: &codec::SubscribeAckPacket) -> Result<(), Error> {
        let id = ack.packet_id();
        let Some(pending) = self.sub_pending.remove(&id.value()) else {
            // A SUBACK for a cancelled subscribe leaves an orphaned
            // subscription on the broker; nothing to do here.
            log::warn!("session: SUBACK {id} matches no pending subscribe");
            return Ok(());
        };
        if ack.reasons().len() != pending.filters.len() {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "SUBACK reason count does not match filter count",
            ));
        }
        for (filter, reason) in pending.filters.iter().zip(ack.reasons()) {
            if reason.is_error() {
                log::warn!("session: subscription to {filter} failed: {reason:?}");
                self.registry.remove(filter);
            } else {
                self.registry.confirm(filter, *reason);
            }
        }
        self.persist_subscriptions();
        // Per-filter failures are reported through the reason list; the
        // operation itself completes.
        pending.token.complete(ack.reasons().to_vec());
        Ok(())
    }

    fn on_unsuback(&mut self, ack: &codec::UnsubscribeAckPacket) {
        let id = ack.packet_id();
        let Some(pending) = self.unsub_pending.remove(&id.value()) else {
            log::warn!("session: UNSUBACK {id} matches no pending unsubscribe");
            return;
        };
        for (index, filter) in pending.filters.iter().enumerate() {
            // 3.1.1 carries no reasons: every filter is removed.
            let failed = ack
                .reasons()
                .get(index)
                .is_some_and(|reason| reason.is_error());
            if failed {
                log::warn!(
                    "session: unsubscribe of {filter} failed: {:?}",
                    ack.reasons()[index]
                );
            } else {
                self.registry.remove(filter);
            }
        }
        self.persist_subscriptions();
        pending.token.complete(ack.reasons().to_vec());
    }

    async fn on_auth(&mut self, auth: codec::AuthPacket) -> Result<(), Error> {
        match self.options.auth_handler() {
            Some(handler) => {
                if let Some(reply) = handler(&auth) {
                    self.send_packet(Packet::Auth(reply)).await?;
                }
                Ok(())
            }
            None => {
                log::warn!("session: AUTH received but no auth handler is configured");
                Ok(())
            }
        }
    }

    fn build_publish_packet(
        &mut self,
        topic: &str,
        payload: &[u8],
        options: &PublishOptions,
        allow_alias: bool,
    ) -> Result<PublishPacket, Error> {
        let mut props = Properties::new();
        if self.level.is_v5() {
            if let Some(content_type) = &options.content_type {
                props.content_type = Some(StringData::from(content_type).map_err(|err| {
                    Error::from_string(
                        ErrorKind::ValidationError,
                        format!("Invalid content type: {err:?}"),
                    )
                })?);
            }
            if let Some(response_topic) = &options.response_topic {
                props.response_topic = Some(PubTopic::new(response_topic).map_err(Error::from)?);
            }
            if let Some(data) = &options.correlation_data {
                props.correlation_data = Some(codec::BinaryData::from(data).map_err(|err| {
                    Error::from_string(
                        ErrorKind::ValidationError,
                        format!("Correlation data too large: {err:?}"),
                    )
                })?);
            }
            for (name, value) in &options.user_properties {
                props
                    .user_properties
                    .push(StringPairData::from(name, value).map_err(|err| {
                        Error::from_string(
                            ErrorKind::ValidationError,
                            format!("Invalid user property: {err:?}"),
                        )
                    })?);
            }
            props.message_expiry_interval = options.message_expiry_interval;
            props.payload_format_indicator = options.payload_format_utf8;
        }

        let mut use_alias_only = false;
        if allow_alias && options.use_alias && self.level.is_v5() {
            match self.aliases.outbound_alias(topic) {
                OutboundAlias::Assign(alias) => props.topic_alias = Some(alias),
                OutboundAlias::Reuse(alias) => {
                    props.topic_alias = Some(alias);
                    use_alias_only = true;
                }
                OutboundAlias::Unavailable => (),
            }
        }

        let mut packet = if use_alias_only {
            PublishPacket::with_alias_only(options.qos, payload)
        } else {
            PublishPacket::new(topic, options.qos, payload).map_err(Error::from)?
        };
        packet.set_retain(options.retain);
        *packet.properties_mut() = props;
        Ok(packet)
    }

    async fn handle_publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        options: &PublishOptions,
        token: Token,
    ) -> Result<(), Error> {
        let quota_held = options.qos != QoS::AtMostOnce;
        let fail = |this: &mut Self, token: Token, err: Error| {
            token.fail(err);
            if quota_held {
                this.flow.release();
            }
        };

        if options.qos > self.caps.maximum_qos {
            fail(
                self,
                token,
                Error::from_string(
                    ErrorKind::ValidationError,
                    format!("Broker supports at most QoS {:?}", self.caps.maximum_qos),
                ),
            );
            return Ok(());
        }
        if options.retain && !self.caps.retain_available {
            fail(
                self,
                token,
                Error::new(ErrorKind::ValidationError, "Broker does not support retain"),
            );
            return Ok(());
        }

        let mut packet = match self.build_publish_packet(topic, payload, options, true) {
            Ok(packet) => packet,
            Err(err) => {
                fail(self, token, err);
                return Ok(());
            }
        };

        if options.qos == QoS::AtMostOnce {
            match self.send_packet(Packet::Publish(packet)).await {
                Ok(()) => {
                    token.complete(Vec::new());
                    Ok(())
                }
                Err(err) => {
                    token.fail(err.clone());
                    Err(err)
                }
            }
        } else {
            let id = match self.allocate_id() {
                Ok(id) => id,
                Err(err) => {
                    fail(self, token, err);
                    return Ok(());
                }
            };
            packet.set_packet_id(id);

            let state = if options.qos == QoS::AtLeastOnce {
                PublicationState::AwaitAck
            } else {
                PublicationState::AwaitReceived
            };
            self.tables.insert_outbound(
                id,
                OutboundPublication {
                    packet: packet.clone(),
                    state,
                    sent_at: Some(Instant::now()),
                    token: Some(token),
                },
            );
            self.persist_outbound();
            // A write failure leaves the entry inflight; it is
            // retransmitted with the DUP flag after reconnection.
            self.send_packet(Packet::Publish(packet)).await
        }
    }

    async fn handle_subscribe(
        &mut self,
        filters: Vec<SubscribeFilter>,
        subscription_id: Option<u32>,
        token: Token,
    ) -> Result<(), Error> {
        if subscription_id.is_some() && !self.caps.subscription_identifier_available {
            token.fail(Error::new(
                ErrorKind::ValidationError,
                "Broker does not support subscription identifiers",
            ));
            return Ok(());
        }

        let mut topics = Vec::with_capacity(filters.len());
        for filter in &filters {
            match SubscribeTopic::new(&filter.filter, filter.options) {
                Ok(topic) => topics.push(topic),
                Err(err) => {
                    token.fail(Error::from(err));
                    return Ok(());
                }
            }
        }
        let id = match self.allocate_id() {
            Ok(id) => id,
            Err(err) => {
                token.fail(err);
                return Ok(());
            }
        };

        let mut packet = SubscribePacket::with_topics(id, topics);
        if let Some(sub_id) = subscription_id {
            if self.level.is_v5() {
                packet.properties_mut().subscription_identifiers.push(sub_id);
            }
        }

        for filter in &filters {
            if let Err(err) = self.registry.upsert(
                &filter.filter,
                filter.options,
                subscription_id,
                filter.handler.clone(),
                filter.persistent,
            ) {
                token.fail(err);
                return Ok(());
            }
        }
        self.sub_pending.insert(
            id.value(),
            PendingSubscribe {
                filters: filters.iter().map(|f| f.filter.clone()).collect(),
                token,
            },
        );
        self.send_packet(Packet::Subscribe(packet)).await
    }

    async fn handle_unsubscribe(
        &mut self,
        filters: Vec<String>,
        token: Token,
    ) -> Result<(), Error> {
        let id = match self.allocate_id() {
            Ok(id) => id,
            Err(err) => {
                token.fail(err);
                return Ok(());
            }
        };
        let filter_refs: Vec<&str> = filters.iter().map(String::as_str).collect();
        let packet = match UnsubscribePacket::with_filters(id, &filter_refs) {
            Ok(packet) => packet,
            Err(err) => {
                token.fail(Error::from(err));
                return Ok(());
            }
        };
        self.unsub_pending
            .insert(id.value(), PendingUnsubscribe { filters, token });
        self.send_packet(Packet::Unsubscribe(packet)).await
    }
}
