//! Test doubles and fixtures shared by the monitor tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use super::error::MonitorError;
use super::rules::Severity;
use super::traits::{PushGateway, Store, TextGenProvider};
use super::types::*;
use crate::db::SqliteStore;
use crate::models::*;

// ═══════════════════════════════════════════
// Providers
// ═══════════════════════════════════════════

#[derive(Clone)]
enum Behavior {
    Reply(String),
    Fail,
    Hang,
    Slow(Duration, String),
}

/// Scripted text-generation provider. Clones share the call counter.
#[derive(Clone)]
pub struct MockProvider {
    name: String,
    behavior: Behavior,
    timeout: Duration,
    max_len: usize,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockProvider {
    fn build(name: &str, behavior: Behavior, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            timeout,
            max_len: 220,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn ok(name: &str, reply: &str) -> Self {
        Self::build(name, Behavior::Reply(reply.to_string()), Duration::from_secs(5))
    }

    pub fn failing(name: &str) -> Self {
        Self::build(name, Behavior::Fail, Duration::from_secs(5))
    }

    /// Never answers; only the composer's timeout ends the call.
    pub fn hanging(name: &str, timeout: Duration) -> Self {
        Self::build(name, Behavior::Hang, timeout)
    }

    /// Answers after `delay`, well within a generous timeout.
    pub fn slow(name: &str, delay: Duration, reply: &str) -> Self {
        Self::build(name, Behavior::Slow(delay, reply.to_string()), delay * 10)
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of `generate` calls observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn max_response_len(&self) -> usize {
        self.max_len
    }

    async fn generate(&self, _prompt: &str, _timeout: Duration) -> Result<String, MonitorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        let result = match &self.behavior {
            Behavior::Reply(text) => Ok(text.clone()),
            Behavior::Fail => Err(MonitorError::provider(&self.name, "scripted failure")),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok("too late".to_string())
            }
            Behavior::Slow(delay, text) => {
                tokio::time::sleep(*delay).await;
                Ok(text.clone())
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn chain(providers: &[&MockProvider]) -> Vec<Arc<dyn TextGenProvider>> {
    providers
        .iter()
        .map(|p| Arc::new((*p).clone()) as Arc<dyn TextGenProvider>)
        .collect()
}

// ═══════════════════════════════════════════
// Push
// ═══════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SentPush {
    pub destination: PushDestination,
    pub title: String,
    pub body: String,
    pub data: Value,
}

/// Records every send; optionally fails them all.
#[derive(Clone, Default)]
pub struct RecordingPushGateway {
    sent: Arc<Mutex<Vec<SentPush>>>,
    attempts: Arc<AtomicUsize>,
    failing: Arc<std::sync::atomic::AtomicBool>,
}

impl RecordingPushGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let gw = Self::default();
        gw.set_failing(true);
        gw
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentPush> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushGateway for RecordingPushGateway {
    async fn send_to_destination(
        &self,
        destination: &PushDestination,
        title: &str,
        body: &str,
        data: &Value,
    ) -> Result<(), MonitorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(MonitorError::Push("gateway unavailable".into()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentPush {
                destination: destination.clone(),
                title: title.to_string(),
                body: body.to_string(),
                data: data.clone(),
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════
// Store with injected faults
// ═══════════════════════════════════════════

/// Delegates to an in-memory SQLite store, failing selected calls.
pub struct FaultyStore {
    pub inner: SqliteStore,
    pub fail_vitals_for: HashSet<String>,
    pub fail_health_check: bool,
}

impl FaultyStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            fail_vitals_for: HashSet::new(),
            fail_health_check: false,
        }
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn health_check(&self) -> Result<(), MonitorError> {
        if self.fail_health_check {
            return Err(MonitorError::Store("store unreachable".into()));
        }
        self.inner.health_check().await
    }

    async fn active_patients(&self) -> Result<Vec<Patient>, MonitorError> {
        self.inner.active_patients().await
    }

    async fn find_patient(&self, patient_id: &str) -> Result<Option<Patient>, MonitorError> {
        self.inner.find_patient(patient_id).await
    }

    async fn recent_vitals(&self, patient_id: &str) -> Result<Vec<VitalReading>, MonitorError> {
        if self.fail_vitals_for.contains(patient_id) {
            return Err(MonitorError::Store(format!("vitals query failed for {patient_id}")));
        }
        self.inner.recent_vitals(patient_id).await
    }

    async fn active_medication_schedules(
        &self,
        patient_id: &str,
    ) -> Result<Vec<MedicationScheduleEntry>, MonitorError> {
        self.inner.active_medication_schedules(patient_id).await
    }

    async fn calendar_events_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CalendarEventEntry>, MonitorError> {
        self.inner.calendar_events_in_range(start, end).await
    }

    async fn find_notification_by_dedup_key(
        &self,
        key: &DedupKey,
    ) -> Result<Option<NotificationRecord>, MonitorError> {
        self.inner.find_notification_by_dedup_key(key).await
    }

    async fn create_notification(
        &self,
        record: &NotificationRecord,
    ) -> Result<NotificationRecord, MonitorError> {
        self.inner.create_notification(record).await
    }

    async fn mark_delivered(&self, record_id: &uuid::Uuid) -> Result<(), MonitorError> {
        self.inner.mark_delivered(record_id).await
    }

    async fn undelivered_notifications(
        &self,
        created_before: DateTime<Utc>,
        due_after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>, MonitorError> {
        self.inner
            .undelivered_notifications(created_before, due_after, limit)
            .await
    }
}

// ═══════════════════════════════════════════
// Fixtures
// ═══════════════════════════════════════════

/// 2026-03-01 at `h:m` UTC.
pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap()
}

pub fn test_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

pub fn test_patient(id: &str) -> Patient {
    Patient {
        id: id.to_string(),
        display_name: Some(format!("Patient {id}")),
        destination: Some(PushDestination::Topic(format!("patient-{id}"))),
        timezone: None,
    }
}

pub fn test_schedule(patient_id: &str, medication_id: &str, times: &[&str]) -> MedicationScheduleEntry {
    MedicationScheduleEntry {
        medication_id: medication_id.to_string(),
        patient_id: patient_id.to_string(),
        medication_name: "Metformin".to_string(),
        dosage: Some("500 mg".to_string()),
        times: times.iter().map(|t| t.to_string()).collect(),
        advance_minutes: None,
        active: true,
    }
}

pub fn test_event(patient_id: &str, event_id: &str, time: &str) -> CalendarEventEntry {
    CalendarEventEntry {
        id: event_id.to_string(),
        patient_id: patient_id.to_string(),
        date: test_day(),
        time: time.to_string(),
        title: "Cardiology follow-up".to_string(),
        event_type: "appointment".to_string(),
        advance_minutes: None,
    }
}

pub fn test_reading(patient_id: &str, metric: MetricKind, value: f64, recorded_at: DateTime<Utc>) -> VitalReading {
    VitalReading {
        patient_id: patient_id.to_string(),
        metric,
        value,
        recorded_at,
    }
}

pub fn medication_candidate(time: &str) -> NotificationCandidate {
    let scheduled = TimeOfDay::parse(time).unwrap();
    NotificationCandidate::Medication(DueMedication {
        patient: test_patient("p1"),
        medication: test_schedule("p1", "med-1", &[time]),
        scheduled,
        dose_time: at(scheduled.hour(), scheduled.minute()),
    })
}

pub fn event_candidate(time: &str) -> NotificationCandidate {
    let t = TimeOfDay::parse(time).unwrap();
    NotificationCandidate::Event(DueEvent {
        patient: test_patient("p1"),
        event: test_event("p1", "ev-1", time),
        event_time: at(t.hour(), t.minute()),
    })
}

pub fn alert_candidate(heart_rate: f64) -> NotificationCandidate {
    NotificationCandidate::Alert {
        patient: test_patient("p1"),
        alert: AlertCandidate {
            patient_id: "p1".to_string(),
            rule_id: "hr-high".to_string(),
            metric: MetricKind::HeartRate,
            value: heart_rate,
            severity: Severity::High,
            message: format!("Heart rate of {heart_rate} bpm is above 120 bpm."),
            action: "recheck_reading".to_string(),
            recorded_at: at(9, 0),
        },
    }
}
