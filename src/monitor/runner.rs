//! TickRunner: one pass of scan → analyze → compose → record over every patient.
//!
//! Patients run concurrently, bounded by a semaphore. Within one patient the
//! candidates are handled one after another. Failures are contained at the
//! smallest unit: a patient whose store reads fail is counted and skipped, a
//! candidate whose record write fails is counted and skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::Semaphore;

use super::composer::NotificationComposer;
use super::error::{within, MonitorError};
use super::recorder::NotificationRecorder;
use super::scanner::DueItemScanner;
use super::traits::{Store, VitalAnalyzer};
use super::types::*;
use crate::config::{EngineConfig, RedeliveryConfig};
use crate::models::{CalendarEventEntry, DedupKey, Patient};

pub struct TickRunner {
    store: Arc<dyn Store>,
    analyzer: Arc<dyn VitalAnalyzer>,
    scanner: DueItemScanner,
    composer: NotificationComposer,
    recorder: NotificationRecorder,
    max_concurrency: usize,
    store_timeout: Duration,
    redelivery: RedeliveryConfig,
}

impl TickRunner {
    pub fn new(
        store: Arc<dyn Store>,
        analyzer: Arc<dyn VitalAnalyzer>,
        composer: NotificationComposer,
        recorder: NotificationRecorder,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            analyzer,
            scanner: DueItemScanner::new(config.advance_window_minutes, config.store_timeout()),
            composer,
            recorder,
            max_concurrency: config.max_concurrency.max(1),
            store_timeout: config.store_timeout(),
            redelivery: config.redelivery.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Run one full tick at `now`. Only a failure to list patients fails the
    /// tick as a whole.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<TickSummary, MonitorError> {
        let started = Instant::now();
        let patients = within(self.store_timeout, self.store.active_patients()).await?;

        let events = match self.scanner.events_around(self.store.as_ref(), now).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load calendar events, continuing without them");
                Vec::new()
            }
        };
        let events_by_patient = group_by_patient(events);

        let semaphore = Semaphore::new(self.max_concurrency);
        let results = join_all(patients.iter().map(|patient| {
            let semaphore = &semaphore;
            let events = events_by_patient
                .get(patient.id.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            async move {
                // The semaphore is never closed, so the permit is always granted.
                let _permit = semaphore.acquire().await.ok();
                (patient, self.run_patient(patient, events, now).await)
            }
        }))
        .await;

        let mut summary = TickSummary::default();
        for (patient, result) in results {
            match result {
                Ok(patient_summary) => summary.absorb(&patient_summary),
                Err(e) => {
                    summary.patients += 1;
                    summary.patients_failed += 1;
                    tracing::warn!(patient_id = %patient.id, error = %e, "Patient skipped this tick");
                }
            }
        }

        if self.redelivery.enabled {
            match self.recorder.redeliver_pending(now, &self.redelivery).await {
                Ok(count) => summary.redelivered = count,
                Err(e) => tracing::warn!(error = %e, "Redelivery sweep failed"),
            }
        }

        tracing::info!(
            patients = summary.patients,
            patients_failed = summary.patients_failed,
            alerts = summary.alerts,
            medications_due = summary.medications_due,
            events_due = summary.events_due,
            created = summary.created,
            duplicates = summary.duplicates,
            delivered = summary.delivered,
            redelivered = summary.redelivered,
            duration_ms = started.elapsed().as_millis() as u64,
            "Tick complete"
        );

        Ok(summary)
    }

    async fn run_patient(
        &self,
        patient: &Patient,
        events: &[CalendarEventEntry],
        now: DateTime<Utc>,
    ) -> Result<TickSummary, MonitorError> {
        let readings = within(self.store_timeout, self.store.recent_vitals(&patient.id)).await?;
        let analysis = self.analyzer.analyze(&readings);

        let window = self.scanner.default_window_minutes();
        let medications = self
            .scanner
            .patient_due_medications(self.store.as_ref(), patient, now, window)
            .await?;
        let due_events = DueItemScanner::due_events(patient, events, now, window);

        let mut summary = TickSummary {
            patients: 1,
            alerts: analysis.alerts.len() as u32,
            medications_due: medications.len() as u32,
            events_due: due_events.len() as u32,
            ..TickSummary::default()
        };

        let candidates = analysis
            .alerts
            .into_iter()
            .map(|alert| NotificationCandidate::Alert {
                patient: patient.clone(),
                alert,
            })
            .chain(medications.into_iter().map(NotificationCandidate::Medication))
            .chain(due_events.into_iter().map(NotificationCandidate::Event));

        for candidate in candidates {
            match self.process_candidate(&candidate, now).await {
                Ok(outcome) if outcome.created => {
                    summary.created += 1;
                    if outcome.delivered {
                        summary.delivered += 1;
                    }
                }
                Ok(_) => summary.duplicates += 1,
                Err(e) => {
                    summary.candidates_failed += 1;
                    tracing::warn!(
                        patient_id = %patient.id,
                        kind = candidate.kind().as_str(),
                        source_ref = %candidate.source_ref(),
                        error = %e,
                        "Failed to record notification"
                    );
                }
            }
        }

        Ok(summary)
    }

    /// Compose then record one candidate. Text is only composed when the
    /// occurrence has no record yet, so duplicates never reach a provider.
    async fn process_candidate(
        &self,
        candidate: &NotificationCandidate,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, MonitorError> {
        let patient = candidate.patient();
        let kind = candidate.kind();
        let source_ref = candidate.source_ref();
        let due_at = candidate.due_at();

        let key = DedupKey::for_patient(patient, kind, &source_ref, due_at);
        if let Some(existing) =
            within(self.store_timeout, self.store.find_notification_by_dedup_key(&key)).await?
        {
            return Ok(RecordOutcome {
                delivered: existing.delivered,
                record: existing,
                created: false,
            });
        }

        let composed = self.composer.compose(candidate).await;
        self.recorder
            .record_and_deliver(patient, kind, &source_ref, due_at, &composed.title, &composed.body, now)
            .await
    }
}

fn group_by_patient(events: Vec<CalendarEventEntry>) -> HashMap<String, Vec<CalendarEventEntry>> {
    let mut grouped: HashMap<String, Vec<CalendarEventEntry>> = HashMap::new();
    for event in events {
        grouped.entry(event.patient_id.clone()).or_default().push(event);
    }
    grouped
}
