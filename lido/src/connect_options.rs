// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use codec::{ProtocolLevel, Will, DEFAULT_RECEIVE_MAXIMUM, DEFAULT_TOPIC_ALIAS_MAXIMUM};

use crate::error::{Error, ErrorKind};
use crate::message::{
    AuthHandler, ConnectHandler, ConnectionLostHandler, ConnectionUpHandler, MessageHandler,
};

/// Transport scheme of the server address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    /// `tcp://host:port`
    Tcp,

    /// `tls://host:port`
    Tls,
}

/// How the TLS peer certificate is validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TlsType {
    /// Signed by a public root CA, validated against the webpki root set.
    CaSigned,

    /// Self-signed; the root CA certificate is loaded from a PEM file.
    SelfSigned { root_ca_pem: PathBuf },
}

/// Durable backend used for inflight publications and persistent
/// subscriptions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreConfig {
    /// Keep session state in memory only; it does not survive the process.
    Memory,

    /// File-backed store rooted at the given directory, one subdirectory
    /// per client id.
    File { root: PathBuf },
}

/// Username/password credentials of the CONNECT packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<Vec<u8>>,
}

/// Connection options, with defaults matching a plain local broker.
///
/// ```
/// use lido::ConnectOptions;
/// let mut options = ConnectOptions::new("tcp://localhost:1883").unwrap();
/// options.set_client_id("sensor-7").set_keep_alive(std::time::Duration::from_secs(30));
/// ```
#[derive(Clone)]
pub struct ConnectOptions {
    transport: Transport,
    host: String,
    port: u16,
    tls_type: TlsType,

    client_id: String,
    protocol_level: ProtocolLevel,
    clean_session: bool,
    keep_alive: Duration,
    connect_timeout: Duration,
    session_expiry_interval: Option<u32>,
    will: Option<Will>,
    credentials: Option<Credentials>,
    auto_reconnect: bool,
    resubscribe_on_reconnect: bool,

    max_topic_length: Option<usize>,
    max_payload_size: Option<usize>,
    max_incoming_packet: usize,
    receive_maximum: u16,
    topic_alias_maximum: u16,

    store: StoreConfig,

    default_publish_handler: Option<MessageHandler>,
    on_connect: Option<ConnectHandler>,
    on_connection_up: Option<ConnectionUpHandler>,
    on_connection_lost: Option<ConnectionLostHandler>,
    auth_handler: Option<AuthHandler>,
}

fn parse_server_uri(uri: &str) -> Result<(Transport, String, u16), Error> {
    let (transport, rest) = if let Some(rest) = uri.strip_prefix("tcp://") {
        (Transport::Tcp, rest)
    } else if let Some(rest) = uri.strip_prefix("tls://") {
        (Transport::Tls, rest)
    } else {
        return Err(Error::from_string(
            ErrorKind::ConfigError,
            format!("Unsupported server uri scheme: {uri}"),
        ));
    };

    let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
        Error::from_string(ErrorKind::ConfigError, format!("Missing port in uri: {uri}"))
    })?;
    if host.is_empty() {
        return Err(Error::from_string(
            ErrorKind::ConfigError,
            format!("Missing host in uri: {uri}"),
        ));
    }
    let port = port.parse::<u16>().map_err(|_| {
        Error::from_string(ErrorKind::ConfigError, format!("Invalid port in uri: {uri}"))
    })?;
    Ok((transport, host.to_string(), port))
}

impl ConnectOptions {
    /// Parse a `tcp://host:port` or `tls://host:port` server address.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` on any other form.
    pub fn new(uri: &str) -> Result<Self, Error> {
        let (transport, host, port) = parse_server_uri(uri)?;
        Ok(Self {
            transport,
            host,
            port,
            tls_type: TlsType::CaSigned,
            client_id: String::new(),
            protocol_level: ProtocolLevel::V5,
            clean_session: true,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            session_expiry_interval: None,
            will: None,
            credentials: None,
            auto_reconnect: false,
            resubscribe_on_reconnect: false,
            max_topic_length: None,
            max_payload_size: None,
            max_incoming_packet: 0,
            receive_maximum: DEFAULT_RECEIVE_MAXIMUM,
            topic_alias_maximum: DEFAULT_TOPIC_ALIAS_MAXIMUM,
            store: StoreConfig::Memory,
            default_publish_handler: None,
            on_connect: None,
            on_connection_up: None,
            on_connection_lost: None,
            auth_handler: None,
        })
    }

    #[must_use]
    pub const fn transport(&self) -> Transport {
        self.transport
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn set_tls_type(&mut self, tls_type: TlsType) -> &mut Self {
        self.tls_type = tls_type;
        self
    }

    #[must_use]
    pub const fn tls_type(&self) -> &TlsType {
        &self.tls_type
    }

    /// An empty client id asks a 5.0 server to assign one; on 3.1.1 a
    /// random local id is generated at dial time.
    pub fn set_client_id(&mut self, client_id: &str) -> &mut Self {
        self.client_id = client_id.to_string();
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// `ProtocolLevel::V311` speaks 3.1.1, `ProtocolLevel::V5` 5.0.
    pub fn set_protocol_level(&mut self, level: ProtocolLevel) -> &mut Self {
        self.protocol_level = level;
        self
    }

    #[must_use]
    pub const fn protocol_level(&self) -> ProtocolLevel {
        self.protocol_level
    }

    /// With `clean` false the broker resumes a persistent session, and this
    /// client restores inflight work from its session store.
    pub fn set_clean_session(&mut self, clean: bool) -> &mut Self {
        self.clean_session = clean;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    /// Zero disables keep-alive pinging entirely.
    pub fn set_keep_alive(&mut self, keep_alive: Duration) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// 5.0 only: how long the broker keeps the session after disconnect.
    pub fn set_session_expiry_interval(&mut self, seconds: Option<u32>) -> &mut Self {
        self.session_expiry_interval = seconds;
        self
    }

    #[must_use]
    pub const fn session_expiry_interval(&self) -> Option<u32> {
        self.session_expiry_interval
    }

    pub fn set_will(&mut self, will: Option<Will>) -> &mut Self {
        self.will = will;
        self
    }

    #[must_use]
    pub const fn will(&self) -> Option<&Will> {
        self.will.as_ref()
    }

    pub fn set_credentials(&mut self, username: &str, password: Option<&[u8]>) -> &mut Self {
        self.credentials = Some(Credentials {
            username: username.to_string(),
            password: password.map(<[u8]>::to_vec),
        });
        self
    }

    #[must_use]
    pub const fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn set_auto_reconnect(&mut self, enable: bool) -> &mut Self {
        self.auto_reconnect = enable;
        self
    }

    #[must_use]
    pub const fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    /// Re-send persistent subscriptions on every reconnect, even when the
    /// broker claims the session survived. Guards against brokers that
    /// report `session_present` but lost the subscription state.
    pub fn set_resubscribe_on_reconnect(&mut self, enable: bool) -> &mut Self {
        self.resubscribe_on_reconnect = enable;
        self
    }

    #[must_use]
    pub const fn resubscribe_on_reconnect(&self) -> bool {
        self.resubscribe_on_reconnect
    }

    pub fn set_max_topic_length(&mut self, limit: Option<usize>) -> &mut Self {
        self.max_topic_length = limit;
        self
    }

    #[must_use]
    pub const fn max_topic_length(&self) -> Option<usize> {
        self.max_topic_length
    }

    pub fn set_max_payload_size(&mut self, limit: Option<usize>) -> &mut Self {
        self.max_payload_size = limit;
        self
    }

    #[must_use]
    pub const fn max_payload_size(&self) -> Option<usize> {
        self.max_payload_size
    }

    /// Inbound packets larger than this are dropped and the connection is
    /// closed. Zero means unbounded.
    pub fn set_max_incoming_packet(&mut self, limit: usize) -> &mut Self {
        self.max_incoming_packet = limit;
        self
    }

    #[must_use]
    pub const fn max_incoming_packet(&self) -> usize {
        self.max_incoming_packet
    }

    /// Advertised to the peer; also bounds local inbound QoS>0 work.
    pub fn set_receive_maximum(&mut self, maximum: u16) -> &mut Self {
        self.receive_maximum = maximum;
        self
    }

    #[must_use]
    pub const fn receive_maximum(&self) -> u16 {
        self.receive_maximum
    }

    /// Advertised to the peer; non-zero enables inbound topic aliases.
    pub fn set_topic_alias_maximum(&mut self, maximum: u16) -> &mut Self {
        self.topic_alias_maximum = maximum;
        self
    }

    #[must_use]
    pub const fn topic_alias_maximum(&self) -> u16 {
        self.topic_alias_maximum
    }

    pub fn set_store(&mut self, store: StoreConfig) -> &mut Self {
        self.store = store;
        self
    }

    #[must_use]
    pub const fn store(&self) -> &StoreConfig {
        &self.store
    }

    /// Fallback handler for publishes no subscription matches.
    pub fn set_default_publish_handler(&mut self, handler: Option<MessageHandler>) -> &mut Self {
        self.default_publish_handler = handler;
        self
    }

    #[must_use]
    pub fn default_publish_handler(&self) -> Option<MessageHandler> {
        self.default_publish_handler.clone()
    }

    pub fn set_on_connect(&mut self, handler: Option<ConnectHandler>) -> &mut Self {
        self.on_connect = handler;
        self
    }

    #[must_use]
    pub fn on_connect(&self) -> Option<ConnectHandler> {
        self.on_connect.clone()
    }

    pub fn set_on_connection_up(&mut self, handler: Option<ConnectionUpHandler>) -> &mut Self {
        self.on_connection_up = handler;
        self
    }

    #[must_use]
    pub fn on_connection_up(&self) -> Option<ConnectionUpHandler> {
        self.on_connection_up.clone()
    }

    pub fn set_on_connection_lost(&mut self, handler: Option<ConnectionLostHandler>) -> &mut Self {
        self.on_connection_lost = handler;
        self
    }

    #[must_use]
    pub fn on_connection_lost(&self) -> Option<ConnectionLostHandler> {
        self.on_connection_lost.clone()
    }

    pub fn set_auth_handler(&mut self, handler: Option<AuthHandler>) -> &mut Self {
        self.auth_handler = handler;
        self
    }

    #[must_use]
    pub fn auth_handler(&self) -> Option<AuthHandler> {
        self.auth_handler.clone()
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("transport", &self.transport)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("protocol_level", &self.protocol_level)
            .field("clean_session", &self.clean_session)
            .field("keep_alive", &self.keep_alive)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("receive_maximum", &self.receive_maximum)
            .field("topic_alias_maximum", &self.topic_alias_maximum)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_uri() {
        let options = ConnectOptions::new("tcp://broker.local:1883").unwrap();
        assert_eq!(options.transport(), Transport::Tcp);
        assert_eq!(options.host(), "broker.local");
        assert_eq!(options.port(), 1883);
    }

    #[test]
    fn test_parse_tls_uri() {
        let options = ConnectOptions::new("tls://broker.local:8883").unwrap();
        assert_eq!(options.transport(), Transport::Tls);
    }

    #[test]
    fn test_bad_uris_rejected() {
        assert!(ConnectOptions::new("ws://broker.local:80").is_err());
        assert!(ConnectOptions::new("tcp://broker.local").is_err());
        assert!(ConnectOptions::new("tcp://:1883").is_err());
        assert!(ConnectOptions::new("tcp://broker.local:notaport").is_err());
    }

    #[test]
    fn test_defaults_match_spec() {
        let options = ConnectOptions::new("tcp://localhost:1883").unwrap();
        assert!(options.client_id().is_empty());
        assert_eq!(options.protocol_level(), ProtocolLevel::V5);
        assert!(options.clean_session());
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(!options.auto_reconnect());
        assert_eq!(options.receive_maximum(), u16::MAX);
        assert_eq!(options.topic_alias_maximum(), 0);
        assert_eq!(options.max_incoming_packet(), 0);
    }
}
