//! Async hand-off for deferred (promotional and bulk) traffic.
//!
//! Deferred requests never reach a vendor from here; they are wrapped in a
//! [`RequestEnvelope`] and published to an [`EventStream`] for a downstream
//! consumer to pick up.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sms_core::{DispatchError, Request};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

/// Request as published to the event stream, otherwise unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub envelope_id: Uuid,
    pub topic: String,
    pub request: Request,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("no consumer attached to topic {0}")]
    NoSubscribers(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RequestEnvelope {
    /// Wire form for streams that carry bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, PublishError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[async_trait]
pub trait EventStream: Send + Sync {
    async fn publish(&self, envelope: &RequestEnvelope) -> Result<(), PublishError>;
}

/// In-process event stream backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastStream {
    sender: broadcast::Sender<RequestEnvelope>,
}

impl BroadcastStream {
    /// Create a stream with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RequestEnvelope> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastStream {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl EventStream for BroadcastStream {
    async fn publish(&self, envelope: &RequestEnvelope) -> Result<(), PublishError> {
        // a hand-off nobody receives is lost, so report it
        self.sender
            .send(envelope.clone())
            .map(|_| ())
            .map_err(|_| PublishError::NoSubscribers(envelope.topic.clone()))
    }
}

#[derive(Clone)]
pub struct AsyncHandoff {
    stream: Arc<dyn EventStream>,
    topic: String,
}

impl AsyncHandoff {
    pub fn new(stream: Arc<dyn EventStream>, topic: impl Into<String>) -> Self {
        Self {
            stream,
            topic: topic.into(),
        }
    }

    /// Publish `request` exactly once and return the envelope id.
    pub async fn forward(&self, request: Request) -> Result<Uuid, DispatchError> {
        let envelope = RequestEnvelope {
            envelope_id: Uuid::new_v4(),
            topic: self.topic.clone(),
            request,
            published_at: OffsetDateTime::now_utc(),
        };
        self.stream
            .publish(&envelope)
            .await
            .map_err(|e| DispatchError::Handoff(e.to_string()))?;
        info!(
            topic = %self.topic,
            envelope_id = %envelope.envelope_id,
            priority = envelope.request.priority.as_u8(),
            "request handed off"
        );
        Ok(envelope.envelope_id)
    }
}
