//! Notification recorder/dispatcher.
//!
//! Exactly one durable record per dedup key; push is best-effort. A failed
//! push leaves the record `delivered = false` so the in-app notification
//! center still shows it and the redelivery sweep can retry it later.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use super::error::{within, MonitorError};
use super::traits::{PushGateway, Store};
use super::types::RecordOutcome;
use crate::config::RedeliveryConfig;
use crate::models::{DedupKey, NotificationKind, NotificationRecord, Patient};

pub struct NotificationRecorder {
    store: Arc<dyn Store>,
    push: Arc<dyn PushGateway>,
    store_timeout: Duration,
}

impl NotificationRecorder {
    pub fn new(store: Arc<dyn Store>, push: Arc<dyn PushGateway>, store_timeout: Duration) -> Self {
        Self {
            store,
            push,
            store_timeout,
        }
    }

    /// Persist (if absent) and try to push one notification.
    ///
    /// Returns the existing record untouched when the dedup key is already
    /// taken: no second write, no second push.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_and_deliver(
        &self,
        patient: &Patient,
        kind: NotificationKind,
        source_ref: &str,
        due_at: DateTime<Utc>,
        title: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, MonitorError> {
        let key = DedupKey::for_patient(patient, kind, source_ref, due_at);

        if let Some(existing) =
            within(self.store_timeout, self.store.find_notification_by_dedup_key(&key)).await?
        {
            tracing::debug!(patient_id = %patient.id, dedup_key = %key, "Notification already recorded, skipping");
            return Ok(RecordOutcome {
                delivered: existing.delivered,
                record: existing,
                created: false,
            });
        }

        let draft = NotificationRecord::new(key.clone(), due_at, title, body, now);
        let mut record = within(self.store_timeout, self.store.create_notification(&draft)).await?;

        if record.id != draft.id {
            // Another writer created the same occurrence between lookup and insert.
            tracing::debug!(patient_id = %patient.id, dedup_key = %key, "Lost create race, keeping existing record");
            return Ok(RecordOutcome {
                delivered: record.delivered,
                record,
                created: false,
            });
        }

        tracing::info!(
            patient_id = %patient.id,
            kind = kind.as_str(),
            source_ref,
            notification_id = %record.id,
            "Notification recorded"
        );

        let delivered = self.deliver(patient, &record).await;
        record.delivered = delivered;

        Ok(RecordOutcome {
            record,
            created: true,
            delivered,
        })
    }

    /// Push one record and flip its delivered flag on success. Never fails:
    /// every error is logged and reported as `false`.
    async fn deliver(&self, patient: &Patient, record: &NotificationRecord) -> bool {
        let Some(destination) = &patient.destination else {
            tracing::debug!(patient_id = %patient.id, "Patient has no push destination");
            return false;
        };

        let data = json!({
            "notification_id": record.id.to_string(),
            "kind": record.kind.as_str(),
            "source_ref": record.source_ref,
            "due_at": record.due_at.to_rfc3339(),
        });

        if let Err(e) = self
            .push
            .send_to_destination(destination, &record.title, &record.body, &data)
            .await
        {
            tracing::warn!(
                patient_id = %patient.id,
                notification_id = %record.id,
                error = %e,
                "Push delivery failed, record kept for later"
            );
            return false;
        }

        match within(self.store_timeout, self.store.mark_delivered(&record.id)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    notification_id = %record.id,
                    error = %e,
                    "Pushed but failed to mark delivered"
                );
                false
            }
        }
    }

    /// Retry push for undelivered records created at least `min_age` ago and
    /// due within the last `max_age`. Returns how many were delivered.
    pub async fn redeliver_pending(
        &self,
        now: DateTime<Utc>,
        policy: &RedeliveryConfig,
    ) -> Result<u32, MonitorError> {
        if !self.push.is_configured() {
            return Ok(0);
        }

        let created_before = now - policy.min_age();
        let due_after = now - policy.max_age();
        let pending = within(
            self.store_timeout,
            self.store
                .undelivered_notifications(created_before, due_after, policy.batch_limit),
        )
        .await?;

        let mut delivered = 0;
        for record in &pending {
            let patient = match within(self.store_timeout, self.store.find_patient(&record.patient_id)).await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(patient_id = %record.patient_id, error = %e, "Redelivery patient lookup failed");
                    continue;
                }
            };

            if self.deliver(&patient, record).await {
                delivered += 1;
            }
        }

        if !pending.is_empty() {
            tracing::info!(pending = pending.len(), delivered, "Redelivery sweep finished");
        }
        Ok(delivered)
    }
}
