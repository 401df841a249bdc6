//! Trait definitions at the engine's seams.
//!
//! - Store: the durable record store (patients, schedules, vitals, notifications)
//! - PushGateway: best-effort push transport
//! - TextGenProvider: one entry of the composer's provider chain
//! - VitalAnalyzer: readings → alert candidates

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use super::error::MonitorError;
use super::types::HealthAnalysis;
use crate::models::*;

/// Query/write contract for the external record store.
///
/// Implementations own their indexing and retry quirks; the engine only
/// sees these calls.
#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap reachability check used by `start()`.
    async fn health_check(&self) -> Result<(), MonitorError>;

    async fn active_patients(&self) -> Result<Vec<Patient>, MonitorError>;

    async fn find_patient(&self, patient_id: &str) -> Result<Option<Patient>, MonitorError>;

    async fn recent_vitals(&self, patient_id: &str) -> Result<Vec<VitalReading>, MonitorError>;

    async fn active_medication_schedules(
        &self,
        patient_id: &str,
    ) -> Result<Vec<MedicationScheduleEntry>, MonitorError>;

    /// Events whose date lies in `[start, end]` (inclusive), for all patients.
    async fn calendar_events_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CalendarEventEntry>, MonitorError>;

    async fn find_notification_by_dedup_key(
        &self,
        key: &DedupKey,
    ) -> Result<Option<NotificationRecord>, MonitorError>;

    /// Create-if-absent. Returns the record that owns the dedup key, which is
    /// the existing one when another writer got there first.
    async fn create_notification(
        &self,
        record: &NotificationRecord,
    ) -> Result<NotificationRecord, MonitorError>;

    async fn mark_delivered(&self, record_id: &uuid::Uuid) -> Result<(), MonitorError>;

    /// Undelivered records created before `created_before` and due no earlier
    /// than `due_after`, oldest first. Only records whose patient is active and
    /// has a push destination are returned.
    async fn undelivered_notifications(
        &self,
        created_before: DateTime<Utc>,
        due_after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>, MonitorError>;
}

/// Push transport. Failures come back as `Err` and are handled by the recorder.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// False when sends can never succeed, so retries are pointless.
    fn is_configured(&self) -> bool {
        true
    }

    async fn send_to_destination(
        &self,
        destination: &PushDestination,
        title: &str,
        body: &str,
        data: &Value,
    ) -> Result<(), MonitorError>;
}

/// A text-generation service in the composer's provider chain.
#[async_trait]
pub trait TextGenProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Per-call time budget; the composer enforces it around `generate`.
    fn timeout(&self) -> Duration;

    /// Longest response (characters) the composer keeps from this provider.
    fn max_response_len(&self) -> usize;

    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, MonitorError>;
}

/// Turns vital readings into alert candidates and recommendations.
pub trait VitalAnalyzer: Send + Sync {
    fn analyze(&self, readings: &[VitalReading]) -> HealthAnalysis;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify traits are object-safe (can be used as `dyn Trait`)
    #[test]
    fn traits_are_object_safe() {
        fn _assert_store(_: &dyn Store) {}
        fn _assert_push(_: &dyn PushGateway) {}
        fn _assert_provider(_: &dyn TextGenProvider) {}
        fn _assert_analyzer(_: &dyn VitalAnalyzer) {}
    }
}
