//! NATS JetStream adapters for the profile subscriptions and post
//! notifications.

use std::time::Duration;

use async_nats::jetstream::{
    self, AckKind,
    consumer::{AckPolicy, PullConsumer},
    stream::Stream,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{info, warn};

use crate::application::{
    consumer::{BrokerError, ConsumerKind, Delivery, MessageSource, Settlement},
    events::{NotificationPublisher, PostCreatedMessage, PublishError},
};
use crate::config::NatsSettings;
use crate::infra::error::InfraError;

#[derive(Clone)]
pub struct NatsBroker {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    settings: NatsSettings,
}

impl NatsBroker {
    pub async fn connect(settings: &NatsSettings) -> Result<Self, InfraError> {
        let client = async_nats::connect(settings.url.as_str())
            .await
            .map_err(|err| InfraError::broker(format!("failed to connect to nats: {err}")))?;
        let jetstream = jetstream::new(client.clone());
        info!(url = %settings.url, "connected to nats");
        Ok(Self {
            client,
            jetstream,
            settings: settings.clone(),
        })
    }

    async fn ensure_stream(&self) -> Result<Stream, InfraError> {
        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: self.settings.profile_updates_stream.clone(),
                subjects: vec![
                    self.settings.profile_updates_subject.clone(),
                    self.settings.users_created_subject.clone(),
                ],
                ..Default::default()
            })
            .await
            .map_err(|err| InfraError::broker(format!("failed to create stream: {err}")))
    }

    /// Durable pull source for one subscription.
    pub async fn source(&self, kind: ConsumerKind) -> Result<JetStreamSource, InfraError> {
        let stream = self.ensure_stream().await?;
        let (suffix, subject) = match kind {
            ConsumerKind::ProfileUpdates => ("updates", &self.settings.profile_updates_subject),
            ConsumerKind::UserCreated => ("created", &self.settings.users_created_subject),
        };
        let durable = format!("{}-{suffix}", self.settings.consumer_name);

        let consumer = stream
            .get_or_create_consumer(
                &durable,
                jetstream::consumer::pull::Config {
                    durable_name: Some(durable.clone()),
                    ack_policy: AckPolicy::Explicit,
                    filter_subject: subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|err| InfraError::broker(format!("failed to create consumer: {err}")))?;

        info!(consumer = %durable, subject = %subject, "using jetstream consumer");
        Ok(JetStreamSource {
            consumer,
            batch: self.settings.fetch_batch,
            expires: self.settings.fetch_expires,
        })
    }

    pub fn publisher(&self) -> NatsPublisher {
        NatsPublisher {
            client: self.client.clone(),
            subject: self.settings.post_created_subject.clone(),
        }
    }
}

pub struct JetStreamSource {
    consumer: PullConsumer,
    batch: usize,
    expires: Duration,
}

#[async_trait]
impl MessageSource for JetStreamSource {
    /// Waiting pull: the server holds the request open until `expires`
    /// when the stream is idle.
    async fn next_batch(&self) -> Result<Vec<Box<dyn Delivery>>, BrokerError> {
        let mut messages = self
            .consumer
            .batch()
            .max_messages(self.batch)
            .expires(self.expires)
            .messages()
            .await
            .map_err(|err| BrokerError::new("fetch", err))?;

        let mut batch: Vec<Box<dyn Delivery>> = Vec::new();
        while let Some(message) = messages.next().await {
            match message {
                Ok(message) => batch.push(Box::new(JetStreamDelivery { message })),
                Err(err) => warn!(error = %err, "error receiving message"),
            }
        }
        Ok(batch)
    }
}

struct JetStreamDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn settle(&self, settlement: Settlement) -> Result<(), BrokerError> {
        let result = match settlement {
            Settlement::Ack => self.message.ack().await,
            Settlement::Term => self.message.ack_with(AckKind::Term).await,
            Settlement::Requeue => self.message.ack_with(AckKind::Nak(None)).await,
        };
        result.map_err(|err| BrokerError::new(settlement.as_str(), err))
    }
}

/// Core NATS publisher for post-created notifications.
#[derive(Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
    subject: String,
}

#[async_trait]
impl NotificationPublisher for NatsPublisher {
    async fn publish_post_created(&self, message: &PostCreatedMessage) -> Result<(), PublishError> {
        let failed = |err: &dyn std::fmt::Display| PublishError {
            subject: self.subject.clone(),
            message: err.to_string(),
        };
        let payload = post_created_payload(message).map_err(|err| failed(&err))?;
        self.client
            .publish(self.subject.clone(), payload)
            .await
            .map_err(|err| failed(&err))
    }
}

/// JSON body consumed by the notification service.
fn post_created_payload(message: &PostCreatedMessage) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(message).map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use time::macros::datetime;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn post_created_payload_uses_notification_field_names() {
        let user_id = Uuid::new_v4();
        let message = PostCreatedMessage {
            post_id: 42,
            user_id,
            post_title: "Launch day".to_string(),
            created_at: datetime!(2024-05-01 12:30:00 UTC),
        };

        let payload = post_created_payload(&message).expect("encode");
        let json: Value = serde_json::from_slice(&payload).expect("json");

        assert_eq!(json["post_id"], 42);
        assert_eq!(json["user_id"], user_id.to_string());
        assert_eq!(json["post_title"], "Launch day");
        assert_eq!(json["created_at"], "2024-05-01T12:30:00Z");
        assert_eq!(json.as_object().expect("object").len(), 4);
    }
}
