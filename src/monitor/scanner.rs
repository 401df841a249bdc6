//! Due-item scanner: which doses and calendar events fall inside the advance window.
//!
//! A scheduled item is due iff `0 <= scheduled - now <= window`, both bounds
//! inclusive. Daily dose times are combined with the patient-local date of
//! `now` only: a time that has already passed is never rolled over to
//! tomorrow and never reported late.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};

use super::error::{within, MonitorError};
use super::traits::Store;
use super::types::{DueEvent, DueMedication};
use crate::models::{CalendarEventEntry, MedicationScheduleEntry, Patient, TimeOfDay};

/// `true` when `target` lies in `[now, now + window_minutes]`.
pub fn is_due(now: DateTime<Utc>, target: DateTime<Utc>, window_minutes: u32) -> bool {
    let diff = target - now;
    diff >= Duration::zero() && diff <= Duration::minutes(i64::from(window_minutes))
}

/// Combine a patient-local date and time of day into a UTC instant.
fn local_to_utc(offset: &FixedOffset, date: NaiveDate, time: TimeOfDay) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&date.and_time(time.to_naive_time()))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

pub struct DueItemScanner {
    default_window_minutes: u32,
    store_timeout: std::time::Duration,
}

impl DueItemScanner {
    pub fn new(default_window_minutes: u32, store_timeout: std::time::Duration) -> Self {
        Self {
            default_window_minutes,
            store_timeout,
        }
    }

    pub fn default_window_minutes(&self) -> u32 {
        self.default_window_minutes
    }

    /// Doses from `schedules` that are due for `patient` at `now`. An entry's
    /// own advance window wins over `window_minutes`.
    pub fn due_medications(
        patient: &Patient,
        schedules: &[MedicationScheduleEntry],
        now: DateTime<Utc>,
        window_minutes: u32,
    ) -> Vec<DueMedication> {
        let offset = patient.utc_offset();
        let today = now.with_timezone(&offset).date_naive();
        let mut due = Vec::new();

        for entry in schedules.iter().filter(|e| e.active && e.patient_id == patient.id) {
            let window = entry.advance_minutes.unwrap_or(window_minutes);

            for raw in &entry.times {
                let Some(time) = TimeOfDay::parse(raw) else {
                    tracing::warn!(
                        patient_id = %patient.id,
                        medication_id = %entry.medication_id,
                        time = %raw,
                        "Skipping malformed schedule time"
                    );
                    continue;
                };

                let Some(dose_time) = local_to_utc(&offset, today, time) else {
                    continue;
                };

                if is_due(now, dose_time, window) {
                    due.push(DueMedication {
                        patient: patient.clone(),
                        medication: entry.clone(),
                        scheduled: time,
                        dose_time,
                    });
                }
            }
        }

        due
    }

    /// Events from `events` that are due for `patient` at `now`. Only events
    /// dated on the patient-local calendar day of `now` are considered.
    pub fn due_events(
        patient: &Patient,
        events: &[CalendarEventEntry],
        now: DateTime<Utc>,
        window_minutes: u32,
    ) -> Vec<DueEvent> {
        let offset = patient.utc_offset();
        let today = now.with_timezone(&offset).date_naive();
        let mut due = Vec::new();

        for event in events
            .iter()
            .filter(|e| e.patient_id == patient.id && e.date == today)
        {
            let Some(time) = TimeOfDay::parse(&event.time) else {
                tracing::warn!(
                    patient_id = %patient.id,
                    event_id = %event.id,
                    time = %event.time,
                    "Skipping calendar event with malformed time"
                );
                continue;
            };

            let Some(event_time) = local_to_utc(&offset, event.date, time) else {
                continue;
            };

            let window = event.advance_minutes.unwrap_or(window_minutes);
            if is_due(now, event_time, window) {
                due.push(DueEvent {
                    patient: patient.clone(),
                    event: event.clone(),
                    event_time,
                });
            }
        }

        due
    }

    /// UTC date range wide enough to contain "today" for any fixed offset.
    pub fn event_query_range(now: DateTime<Utc>) -> (NaiveDate, NaiveDate) {
        let today = now.date_naive();
        (
            today.pred_opt().unwrap_or(today),
            today.succ_opt().unwrap_or(today),
        )
    }

    // ═══════════════════════════════════════════
    // Store-backed scans
    // ═══════════════════════════════════════════

    /// Load one patient's active schedules and return the doses due at `now`.
    pub async fn patient_due_medications(
        &self,
        store: &dyn Store,
        patient: &Patient,
        now: DateTime<Utc>,
        window_minutes: u32,
    ) -> Result<Vec<DueMedication>, MonitorError> {
        let schedules =
            within(self.store_timeout, store.active_medication_schedules(&patient.id)).await?;
        Ok(Self::due_medications(patient, &schedules, now, window_minutes))
    }

    /// Calendar events for every patient around `now`; filter per patient with
    /// [`DueItemScanner::due_events`].
    pub async fn events_around(
        &self,
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> Result<Vec<CalendarEventEntry>, MonitorError> {
        let (start, end) = Self::event_query_range(now);
        within(self.store_timeout, store.calendar_events_in_range(start, end)).await
    }

    /// Scan every active patient's medication schedules. A patient whose
    /// schedules cannot be loaded is logged and skipped.
    pub async fn find_due_medications(
        &self,
        store: &dyn Store,
        now: DateTime<Utc>,
        window_minutes: u32,
    ) -> Result<Vec<DueMedication>, MonitorError> {
        let patients = within(self.store_timeout, store.active_patients()).await?;
        let mut due = Vec::new();

        for patient in &patients {
            match self.patient_due_medications(store, patient, now, window_minutes).await {
                Ok(found) => due.extend(found),
                Err(e) => {
                    tracing::warn!(patient_id = %patient.id, error = %e, "Failed to load medication schedules");
                }
            }
        }

        Ok(due)
    }

    /// Scan calendar events for every active patient.
    pub async fn find_due_events(
        &self,
        store: &dyn Store,
        now: DateTime<Utc>,
        window_minutes: u32,
    ) -> Result<Vec<DueEvent>, MonitorError> {
        let patients = within(self.store_timeout, store.active_patients()).await?;
        let events = self.events_around(store, now).await?;

        Ok(patients
            .iter()
            .flat_map(|p| Self::due_events(p, &events, now, window_minutes))
            .collect())
    }
}
