// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Subscribe to a topic and publish a few messages to it.
//!
//! Run a broker on localhost:1883 first, then:
//! `cargo run --example pubsub`

use std::sync::Arc;
use std::time::Duration;

use codec::QoS;
use lido::{AsyncClient, Cancellation, ConnectOptions, PublishOptions, SubscribeFilter};

#[tokio::main]
async fn main() -> Result<(), lido::Error> {
    env_logger::init();

    let mut options = ConnectOptions::new("tcp://127.0.0.1:1883")?;
    options
        .set_client_id("lido-pubsub-example")
        .set_keep_alive(Duration::from_secs(30))
        .set_auto_reconnect(true);

    let client = AsyncClient::dial(options).await?;
    log::info!("connected");

    let filter = SubscribeFilter::new(
        "lido/example/#",
        QoS::AtLeastOnce,
        Some(Arc::new(|msg| {
            println!(
                "got [{}] {}",
                msg.topic,
                String::from_utf8_lossy(&msg.payload)
            );
        })),
    );
    let token = client
        .subscribe(vec![filter], None, Cancellation::none())
        .await?;
    token.wait().await?;
    log::info!("subscribed: {:?}", token.granted());

    for i in 0..5 {
        let payload = format!("msg-{i}");
        let token = client
            .publish(
                "lido/example/counter",
                payload.as_bytes(),
                PublishOptions::with_qos(QoS::AtLeastOnce),
                Cancellation::with_deadline(Duration::from_secs(10)),
            )
            .await?;
        token.wait().await?;
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    client.disconnect(Duration::from_secs(5)).await
}
