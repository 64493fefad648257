use sms_core::{DispatchError, Outcome};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info};

use crate::store::{OutcomeUpdate, RequestStore};

/// Writes vendor outcomes back onto previously stored requests.
///
/// Each call is a single keyed update, independent of whatever write created
/// the request. Calling it again for the same communication id overwrites.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn RequestStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self { store }
    }

    pub async fn reconcile(
        &self,
        communication_id: &str,
        outcome: &Outcome,
    ) -> Result<(), DispatchError> {
        let update = OutcomeUpdate {
            status: outcome.status(),
            outcome: outcome.clone(),
            updated_at: OffsetDateTime::now_utc(),
        };
        let status = update.status;

        self.store
            .update_outcome(communication_id, update)
            .await
            .map_err(|e| {
                error!(communication_id, error = %e, "reconciliation failed");
                DispatchError::Reconciliation {
                    communication_id: communication_id.to_string(),
                    reason: e.to_string(),
                    outcome: Box::new(outcome.clone()),
                }
            })?;

        info!(
            communication_id,
            ?status,
            response_code = %outcome.response_code,
            reference_id = %outcome.reference_id,
            "outcome reconciled"
        );
        Ok(())
    }
}
