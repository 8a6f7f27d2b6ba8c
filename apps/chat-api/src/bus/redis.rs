use std::time::Duration;

use ::redis::aio::{ConnectionManager, ConnectionManagerConfig};
use ::redis::{AsyncCommands, Client, Msg};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::{BusError, BusMessage, BusSubscription, MessageBus, SUBSCRIPTION_BUFFER};

const RESUBSCRIBE_BACKOFF_MIN: Duration = Duration::from_millis(250);
const RESUBSCRIBE_BACKOFF_MAX: Duration = Duration::from_secs(10);
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis-backed bus: `PUBLISH` for outgoing payloads, `PSUBSCRIBE` for the
/// inbound pattern subscription.
pub struct RedisBus {
    client: Client,
    conn: ConnectionManager,
}

impl RedisBus {
    pub async fn connect(redis_url: &str) -> Result<Self, BusError> {
        let client = Client::open(redis_url)?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(CONNECTION_TIMEOUT)
            .set_response_timeout(RESPONSE_TIMEOUT);
        let conn = ConnectionManager::new_with_config(client.clone(), config).await?;
        tracing::info!("redis bus connected");
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(topic, payload).await?;
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<BusSubscription, BusError> {
        // The first subscription is made inline so a bad URL or an unreachable
        // server fails startup instead of a background task.
        let stream = open_pattern_stream(&self.client, pattern).await?;
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(pump(self.client.clone(), pattern.to_string(), stream, sender));
        Ok(receiver)
    }
}

async fn open_pattern_stream(
    client: &Client,
    pattern: &str,
) -> Result<BoxStream<'static, Msg>, BusError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(pattern).await?;
    tracing::info!(%pattern, "redis pattern subscription established");
    Ok(pubsub.into_on_message().boxed())
}

/// Copy messages from Redis into the subscription channel, re-subscribing
/// whenever the connection drops. Ends once the receiving side is dropped.
async fn pump(
    client: Client,
    pattern: String,
    mut stream: BoxStream<'static, Msg>,
    sender: mpsc::Sender<BusMessage>,
) {
    loop {
        while let Some(msg) = stream.next().await {
            let topic = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(%topic, error = %e, "undecodable redis payload dropped");
                    continue;
                }
            };
            if sender.send(BusMessage { topic, payload }).await.is_err() {
                tracing::debug!(%pattern, "redis subscription receiver dropped");
                return;
            }
        }

        if sender.is_closed() {
            return;
        }
        tracing::warn!(%pattern, "redis pattern subscription lost; resubscribing");

        let mut backoff = RESUBSCRIBE_BACKOFF_MIN;
        stream = loop {
            tokio::time::sleep(backoff).await;
            if sender.is_closed() {
                return;
            }
            match open_pattern_stream(&client, &pattern).await {
                Ok(s) => break s,
                Err(e) => {
                    backoff = (backoff * 2).min(RESUBSCRIBE_BACKOFF_MAX);
                    tracing::warn!(
                        %pattern,
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "redis resubscribe failed"
                    );
                }
            }
        };
    }
}
