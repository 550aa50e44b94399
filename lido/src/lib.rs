// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Asynchronous MQTT 3.1.1 / 5.0 client.
//!
//! ```no_run
//! use lido::{AsyncClient, Cancellation, ConnectOptions, PublishOptions, SubscribeFilter};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lido::Error> {
//!     let mut options = ConnectOptions::new("tcp://localhost:1883")?;
//!     options.set_client_id("example");
//!     let client = AsyncClient::dial(options).await?;
//!
//!     let filter = SubscribeFilter::new(
//!         "greeting/#",
//!         codec::QoS::AtLeastOnce,
//!         Some(Arc::new(|msg| println!("{}: {:?}", msg.topic, msg.payload))),
//!     );
//!     client
//!         .subscribe(vec![filter], None, Cancellation::none())
//!         .await?
//!         .wait()
//!         .await?;
//!
//!     let token = client
//!         .publish(
//!             "greeting/hello",
//!             b"hi",
//!             PublishOptions::with_qos(codec::QoS::AtLeastOnce),
//!             Cancellation::none(),
//!         )
//!         .await?;
//!     token.wait().await?;
//!     client.disconnect(std::time::Duration::from_secs(5)).await
//! }
//! ```

mod alias;
mod client;
mod connect_options;
mod error;
mod flow;
mod inflight;
mod message;
mod packet_id;
mod pinger;
mod session;
mod store;
mod stream;
mod subscription;
mod token;

pub use client::{AsyncClient, PublishOptions};
pub use connect_options::{ConnectOptions, Credentials, StoreConfig, TlsType, Transport};
pub use error::{Error, ErrorKind};
pub use inflight::PublicationState;
pub use message::{
    AuthHandler, ConnectHandler, ConnectionLostHandler, ConnectionUpHandler, Message,
    MessageHandler,
};
pub use session::ServerCapabilities;
pub use store::{
    FileStore, MemoryStore, PersistedSession, SessionStore, StoredPublication, StoredQos2Id,
    StoredSubscription,
};
pub use subscription::SubscribeFilter;
pub use token::{Cancellation, Token, TokenKind};

// The wire codec is part of the public API surface: packet types, QoS,
// protocol level, properties and reason codes all come from there.
pub use codec;
