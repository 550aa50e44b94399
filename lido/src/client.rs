// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::sync::Arc;
use std::time::Duration;

use codec::{topic, ProtocolLevel, QoS};
use tokio::sync::mpsc;

use crate::connect_options::{ConnectOptions, StoreConfig};
use crate::error::{Error, ErrorKind};
use crate::flow::FlowController;
use crate::session::{spawn_dispatcher, Command, SessionEngine};
use crate::store::{FileStore, MemoryStore, SessionStore};
use crate::subscription::SubscribeFilter;
use crate::token::{Cancellation, Token, TokenKind};

/// Per-publish options.
#[derive(Clone, Debug, Default)]
pub struct PublishOptions {
    pub qos: QoS,

    pub retain: bool,

    /// Substitute a topic alias for the topic string once the peer has
    /// advertised alias capacity. 5.0 only; silently ignored otherwise.
    pub use_alias: bool,

    pub content_type: Option<String>,

    pub response_topic: Option<String>,

    pub correlation_data: Option<Vec<u8>>,

    pub user_properties: Vec<(String, String)>,

    pub message_expiry_interval: Option<u32>,

    /// `Some(true)` marks the payload as UTF-8 character data.
    pub payload_format_utf8: Option<bool>,
}

impl PublishOptions {
    /// Shorthand for plain QoS-only options.
    #[must_use]
    pub fn with_qos(qos: QoS) -> Self {
        Self {
            qos,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub fn use_alias(mut self) -> Self {
        self.use_alias = true;
        self
    }
}

struct ClientLimits {
    max_topic_length: Option<usize>,
    max_payload_size: Option<usize>,
}

/// Asynchronous MQTT client handle.
///
/// Cheap to clone; all clones talk to the same session engine. Every
/// operation returns a [`Token`] that resolves when the matching
/// acknowledgement arrives.
#[derive(Clone)]
pub struct AsyncClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    flow: Arc<FlowController>,
    limits: Arc<ClientLimits>,
    level: ProtocolLevel,
}

impl AsyncClient {
    /// Connect to the broker named by `options` and start the session.
    ///
    /// Resolves once CONNACK has been processed, so a refused connection
    /// surfaces here as `ConnectionRefused`.
    ///
    /// # Errors
    ///
    /// Returns error if the transport cannot be opened, the broker
    /// refuses the connection, or the session store fails.
    pub async fn dial(options: ConnectOptions) -> Result<Self, Error> {
        let store: Box<dyn SessionStore> = match options.store() {
            StoreConfig::Memory => Box::new(MemoryStore::new()),
            StoreConfig::File { root } => Box::new(FileStore::new(root)),
        };
        Self::dial_with_store(options, store).await
    }

    /// Like [`AsyncClient::dial`] with a caller-provided session store.
    ///
    /// # Errors
    ///
    /// Same as [`AsyncClient::dial`].
    pub async fn dial_with_store(
        options: ConnectOptions,
        store: Box<dyn SessionStore>,
    ) -> Result<Self, Error> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let flow = Arc::new(FlowController::new());
        let limits = Arc::new(ClientLimits {
            max_topic_length: options.max_topic_length(),
            max_payload_size: options.max_payload_size(),
        });
        let level = options.protocol_level();

        let mut engine = SessionEngine::new(options, store, cmd_rx, dispatch_tx, Arc::clone(&flow));
        engine.connect().await?;
        spawn_dispatcher(dispatch_rx);
        tokio::spawn(engine.run());

        Ok(Self {
            cmd_tx,
            flow,
            limits,
            level,
        })
    }

    fn validate_publish(&self, topic: &str, payload: &[u8]) -> Result<(), Error> {
        topic::validate_pub_topic(topic)?;
        if let Some(limit) = self.limits.max_topic_length {
            if topic.len() > limit {
                return Err(Error::from_string(
                    ErrorKind::ValidationError,
                    format!("Topic of {} bytes exceeds limit {limit}", topic.len()),
                ));
            }
        }
        if let Some(limit) = self.limits.max_payload_size {
            if payload.len() > limit {
                return Err(Error::from_string(
                    ErrorKind::ValidationError,
                    format!("Payload of {} bytes exceeds limit {limit}", payload.len()),
                ));
            }
        }
        Ok(())
    }

    /// Publish `payload` on `topic`.
    ///
    /// For QoS 1 and 2 this waits for an outbound quota slot when the
    /// peer's Receive Maximum is saturated; `cancel` unblocks that wait.
    /// The returned token resolves on PUBACK (QoS 1), PUBCOMP (QoS 2), or
    /// as soon as the packet is queued (QoS 0).
    ///
    /// # Errors
    ///
    /// Returns error on failed client-side validation, cancellation, or a
    /// closed session; nothing has been sent in any of these cases.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        options: PublishOptions,
        cancel: Cancellation,
    ) -> Result<Token, Error> {
        self.validate_publish(topic, payload)?;

        let quota_held = options.qos != QoS::AtMostOnce;
        if quota_held {
            self.flow.acquire(&cancel).await?;
        } else if cancel.is_cancelled() {
            return Err(Error::new(ErrorKind::OperationCancelled, "Cancelled"));
        }

        let token = Token::new(TokenKind::Publish);
        let command = Command::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            options,
            token: token.clone(),
        };
        if self.cmd_tx.send(command).is_err() {
            if quota_held {
                self.flow.release();
            }
            return Err(Error::new(ErrorKind::SessionClosed, "Session is closed"));
        }
        Ok(token)
    }

    /// Subscribe to one or more topic filters in a single SUBSCRIBE
    /// packet, optionally tagged with a 5.0 subscription identifier.
    ///
    /// The token's [`Token::granted`] carries one reason code per filter,
    /// in order; a per-filter failure (0x80 and above) does not fail the
    /// operation as a whole.
    ///
    /// # Errors
    ///
    /// Returns error on an empty or invalid filter list, cancellation, or
    /// a closed session.
    pub async fn subscribe(
        &self,
        filters: Vec<SubscribeFilter>,
        subscription_id: Option<u32>,
        cancel: Cancellation,
    ) -> Result<Token, Error> {
        if filters.is_empty() {
            return Err(Error::new(
                ErrorKind::ValidationError,
                "Subscribe needs at least one filter",
            ));
        }
        for filter in &filters {
            topic::validate_sub_topic(&filter.filter)?;
        }
        if let Some(0) = subscription_id {
            return Err(Error::new(
                ErrorKind::ValidationError,
                "Subscription identifier zero is reserved",
            ));
        }
        if subscription_id.is_some() && !self.level.is_v5() {
            return Err(Error::new(
                ErrorKind::ValidationError,
                "Subscription identifiers need MQTT 5.0",
            ));
        }
        if cancel.is_cancelled() {
            return Err(Error::new(ErrorKind::OperationCancelled, "Cancelled"));
        }

        let token = Token::new(TokenKind::Subscribe);
        let command = Command::Subscribe {
            filters,
            subscription_id,
            token: token.clone(),
        };
        if self.cmd_tx.send(command).is_err() {
            return Err(Error::new(ErrorKind::SessionClosed, "Session is closed"));
        }
        Ok(token)
    }

    /// Remove one or more subscriptions.
    ///
    /// # Errors
    ///
    /// Returns error on an empty or invalid filter list, cancellation, or
    /// a closed session.
    pub async fn unsubscribe(
        &self,
        filters: Vec<String>,
        cancel: Cancellation,
    ) -> Result<Token, Error> {
        if filters.is_empty() {
            return Err(Error::new(
                ErrorKind::ValidationError,
                "Unsubscribe needs at least one filter",
            ));
        }
        for filter in &filters {
            topic::validate_sub_topic(filter)?;
        }
        if cancel.is_cancelled() {
            return Err(Error::new(ErrorKind::OperationCancelled, "Cancelled"));
        }

        let token = Token::new(TokenKind::Unsubscribe);
        let command = Command::Unsubscribe {
            filters,
            token: token.clone(),
        };
        if self.cmd_tx.send(command).is_err() {
            return Err(Error::new(ErrorKind::SessionClosed, "Session is closed"));
        }
        Ok(token)
    }

    /// Gracefully close the session: send DISCONNECT, drain the write
    /// side, and release the transport. After `deadline` the graceful
    /// path is abandoned and the transport force-closed.
    ///
    /// # Errors
    ///
    /// Returns `SessionClosed` if the session already ended.
    pub async fn disconnect(&self, deadline: Duration) -> Result<(), Error> {
        let token = Token::new(TokenKind::Disconnect);
        let command = Command::Disconnect {
            deadline,
            token: token.clone(),
        };
        if self.cmd_tx.send(command).is_err() {
            return Err(Error::new(ErrorKind::SessionClosed, "Session is closed"));
        }
        token.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_options_builder() {
        let options = PublishOptions::with_qos(QoS::AtLeastOnce)
            .retain(true)
            .use_alias();
        assert_eq!(options.qos, QoS::AtLeastOnce);
        assert!(options.retain);
        assert!(options.use_alias);
        assert!(options.content_type.is_none());
    }
}
