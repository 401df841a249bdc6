//! Core types flowing through one tick:
//! readings/schedules → candidates → composed text → notification records.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use super::rules::Severity;
use crate::models::{
    CalendarEventEntry, MedicationScheduleEntry, MetricKind, NotificationKind, NotificationRecord,
    Patient, TimeOfDay,
};

// ═══════════════════════════════════════════
// Analyzer output
// ═══════════════════════════════════════════

/// One fired rule for one reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub patient_id: String,
    pub rule_id: String,
    pub metric: MetricKind,
    pub value: f64,
    pub severity: Severity,
    pub message: String,
    pub action: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: String,
    /// Highest severity among the alerts suggesting this action.
    pub severity: Severity,
    pub advice: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthAnalysis {
    pub alerts: Vec<AlertCandidate>,
    pub recommendations: Vec<Recommendation>,
}

// ═══════════════════════════════════════════
// Scanner output
// ═══════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct DueMedication {
    pub patient: Patient,
    pub medication: MedicationScheduleEntry,
    pub scheduled: TimeOfDay,
    pub dose_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DueEvent {
    pub patient: Patient,
    pub event: CalendarEventEntry,
    pub event_time: DateTime<Utc>,
}

// ═══════════════════════════════════════════
// Notification candidate (input to composer + recorder)
// ═══════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum NotificationCandidate {
    Alert { patient: Patient, alert: AlertCandidate },
    Medication(DueMedication),
    Event(DueEvent),
}

impl NotificationCandidate {
    pub fn patient(&self) -> &Patient {
        match self {
            NotificationCandidate::Alert { patient, .. } => patient,
            NotificationCandidate::Medication(m) => &m.patient,
            NotificationCandidate::Event(e) => &e.patient,
        }
    }

    pub fn kind(&self) -> NotificationKind {
        match self {
            NotificationCandidate::Alert { .. } => NotificationKind::Alert,
            NotificationCandidate::Medication(_) => NotificationKind::Medication,
            NotificationCandidate::Event(_) => NotificationKind::Event,
        }
    }

    /// Reference to the thing that made this candidate due. Medication doses
    /// include the scheduled time so each daily dose is its own occurrence.
    pub fn source_ref(&self) -> String {
        match self {
            NotificationCandidate::Alert { alert, .. } => alert.rule_id.clone(),
            NotificationCandidate::Medication(m) => {
                format!("{}@{}", m.medication.medication_id, m.scheduled)
            }
            NotificationCandidate::Event(e) => e.event.id.clone(),
        }
    }

    pub fn due_at(&self) -> DateTime<Utc> {
        match self {
            NotificationCandidate::Alert { alert, .. } => alert.recorded_at,
            NotificationCandidate::Medication(m) => m.dose_time,
            NotificationCandidate::Event(e) => e.event_time,
        }
    }

    /// Due time as the patient reads it on their own clock.
    pub fn local_due_at(&self) -> DateTime<FixedOffset> {
        self.due_at().with_timezone(&self.patient().utc_offset())
    }
}

// ═══════════════════════════════════════════
// Composer output
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextOrigin {
    Provider(String),
    Template,
}

#[derive(Debug, Clone)]
pub struct ComposedNotification {
    pub title: String,
    pub body: String,
    pub origin: TextOrigin,
}

// ═══════════════════════════════════════════
// Recorder output
// ═══════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub record: NotificationRecord,
    /// `false` when the dedup key already had a record.
    pub created: bool,
    pub delivered: bool,
}

// ═══════════════════════════════════════════
// Tick accounting
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub patients: u32,
    pub patients_failed: u32,
    pub alerts: u32,
    pub medications_due: u32,
    pub events_due: u32,
    pub created: u32,
    pub duplicates: u32,
    pub delivered: u32,
    pub candidates_failed: u32,
    pub redelivered: u32,
}

impl TickSummary {
    pub fn absorb(&mut self, other: &TickSummary) {
        self.patients += other.patients;
        self.patients_failed += other.patients_failed;
        self.alerts += other.alerts;
        self.medications_due += other.medications_due;
        self.events_due += other.events_due;
        self.created += other.created;
        self.duplicates += other.duplicates;
        self.delivered += other.delivered;
        self.candidates_failed += other.candidates_failed;
        self.redelivered += other.redelivered;
    }
}

/// Lifetime counters for one engine instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub timer_fires: u64,
    pub ticks_started: u64,
    pub ticks_skipped: u64,
    pub ticks_completed: u64,
}
