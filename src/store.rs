//! Persistence contract for requests and their outcomes.
//!
//! [`MemoryStore`] is the in-process implementation used by tests, the demo
//! and hosts that do not need durability. Each write takes the lock once, so
//! a write is all-or-nothing with respect to concurrent readers.

use async_trait::async_trait;
use sms_core::{fallback_id, Outcome, Request, Status};
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown communication id {0}")]
    UnknownCommunication(String),
    #[error("communication {communication_id} is already {current:?}, refusing {requested:?} outcome")]
    StatusConflict {
        communication_id: String,
        current: Status,
        requested: Status,
    },
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Identifiers assigned when a request row is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRequest {
    pub request_id: i64,
    pub communication_id: String,
}

/// One keyed outcome write.
#[derive(Debug, Clone)]
pub struct OutcomeUpdate {
    pub status: Status,
    pub outcome: Outcome,
    pub updated_at: OffsetDateTime,
}

/// A stored request together with its outcome, if one was reconciled.
#[derive(Debug, Clone)]
pub struct StoredRequest {
    pub request: Request,
    pub outcome: Option<Outcome>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Persist a pending request and assign its identifiers.
    async fn create_request(&self, request: &Request) -> Result<CreatedRequest, StoreError>;

    /// Record `update` against the request keyed by `communication_id`.
    ///
    /// Overwrites any previous outcome for the key. The status only leaves
    /// `pending` once; an outcome whose status disagrees with a terminal row
    /// is rejected with [`StoreError::StatusConflict`] and the row is left as is.
    async fn update_outcome(
        &self,
        communication_id: &str,
        update: OutcomeUpdate,
    ) -> Result<(), StoreError>;

    async fn get(&self, communication_id: &str) -> Result<Option<StoredRequest>, StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    last_request_id: i64,
    rows: HashMap<String, StoredRequest>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.rows.is_empty()
    }

    /// Requests still waiting for an outcome, for external sweepers.
    pub async fn pending(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .rows
            .iter()
            .filter(|(_, row)| row.request.status == Status::Pending)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn create_request(&self, request: &Request) -> Result<CreatedRequest, StoreError> {
        let mut inner = self.inner.write().await;
        inner.last_request_id += 1;
        let created = CreatedRequest {
            request_id: inner.last_request_id,
            communication_id: fallback_id(),
        };

        let mut row = request.clone();
        row.request_id = Some(created.request_id);
        row.communication_id = Some(created.communication_id.clone());
        row.status = Status::Pending;
        let now = OffsetDateTime::now_utc();
        inner.rows.insert(
            created.communication_id.clone(),
            StoredRequest {
                request: row,
                outcome: None,
                created_at: now,
                updated_at: now,
            },
        );
        debug!(
            request_id = created.request_id,
            communication_id = %created.communication_id,
            "request stored"
        );
        Ok(created)
    }

    async fn update_outcome(
        &self,
        communication_id: &str,
        update: OutcomeUpdate,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let row = inner
            .rows
            .get_mut(communication_id)
            .ok_or_else(|| StoreError::UnknownCommunication(communication_id.to_string()))?;

        let current = row.request.status;
        if current.is_terminal() && current != update.status {
            warn!(
                communication_id,
                ?current,
                requested = ?update.status,
                "conflicting outcome for terminal request"
            );
            return Err(StoreError::StatusConflict {
                communication_id: communication_id.to_string(),
                current,
                requested: update.status,
            });
        }
        row.request.status = update.status;
        row.outcome = Some(update.outcome);
        row.updated_at = update.updated_at;
        Ok(())
    }

    async fn get(&self, communication_id: &str) -> Result<Option<StoredRequest>, StoreError> {
        Ok(self.inner.read().await.rows.get(communication_id).cloned())
    }
}
