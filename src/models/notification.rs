use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::patient::Patient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Alert,
    Medication,
    Event,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Alert => "alert",
            NotificationKind::Medication => "medication",
            NotificationKind::Event => "event",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "alert" => Some(NotificationKind::Alert),
            "medication" => Some(NotificationKind::Medication),
            "event" => Some(NotificationKind::Event),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of one due occurrence. At most one record exists per key.
///
/// `due_day` is the calendar day on the patient's own clock, so a patient west
/// of UTC keeps one key for an evening occurrence that falls on the next UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub patient_id: String,
    pub kind: NotificationKind,
    pub source_ref: String,
    pub due_day: NaiveDate,
}

impl DedupKey {
    pub fn new(patient_id: &str, kind: NotificationKind, source_ref: &str, due_day: NaiveDate) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            kind,
            source_ref: source_ref.to_string(),
            due_day,
        }
    }

    /// Key for an occurrence due at `due_at`, bucketed on the patient's local day.
    pub fn for_patient(
        patient: &Patient,
        kind: NotificationKind,
        source_ref: &str,
        due_at: DateTime<Utc>,
    ) -> Self {
        let due_day = due_at.with_timezone(&patient.utc_offset()).date_naive();
        Self::new(&patient.id, kind, source_ref, due_day)
    }

    /// Stable string form stored in the unique `dedup_key` column.
    pub fn as_storage_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.patient_id,
            self.kind.as_str(),
            self.source_ref,
            self.due_day.format("%Y-%m-%d")
        )
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_storage_key())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub patient_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub source_ref: String,
    pub due_at: DateTime<Utc>,
    /// Patient-local day the occurrence belongs to.
    pub due_day: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub delivered: bool,
    pub read: bool,
}

impl NotificationRecord {
    /// A fresh, undelivered, unread record for the occurrence named by `key`.
    pub fn new(key: DedupKey, due_at: DateTime<Utc>, title: &str, body: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id: key.patient_id,
            kind: key.kind,
            title: title.to_string(),
            body: body.to_string(),
            source_ref: key.source_ref,
            due_at,
            due_day: key.due_day,
            created_at,
            delivered: false,
            read: false,
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(&self.patient_id, self.kind, &self.source_ref, self.due_day)
    }
}
