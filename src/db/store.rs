//! SQLite-backed `Store`.
//!
//! One connection behind a mutex. Every `Store` call runs on tokio's blocking
//! pool, so a caller's timeout can give up on a call that is stuck waiting for
//! the lock. Timestamps are stored as RFC 3339 UTC text with second precision so
//! string comparison orders them correctly.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{open_database, open_memory_database, DatabaseError};
use crate::models::*;
use crate::monitor::error::MonitorError;
use crate::monitor::traits::Store;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_ts(field: &str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::invalid(field, raw))
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| DatabaseError::invalid(field, raw))
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::wrap(open_database(path)?))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::wrap(open_memory_database()?))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// How long SQLite waits on a lock held by another process before failing.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), DatabaseError> {
        self.conn()?.busy_timeout(timeout)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Run `work` against the connection on the blocking pool.
    async fn blocking<T, F>(&self, work: F) -> Result<T, MonitorError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DatabaseError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
            work(&*guard)
        })
        .await
        .map_err(|e| MonitorError::Store(format!("store task failed: {e}")))?;
        Ok(result?)
    }

    // ═══════════════════════════════════════════
    // Writers used by the surrounding application (and tests)
    // ═══════════════════════════════════════════

    pub fn upsert_patient(&self, patient: &Patient) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO patients (id, display_name, destination_kind, destination_value, timezone, active)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                destination_kind = excluded.destination_kind,
                destination_value = excluded.destination_value,
                timezone = excluded.timezone",
            params![
                patient.id,
                patient.display_name,
                patient.destination.as_ref().map(|d| d.kind_str()),
                patient.destination.as_ref().map(|d| d.value().to_string()),
                patient.timezone,
            ],
        )?;
        Ok(())
    }

    pub fn set_patient_active(&self, patient_id: &str, active: bool) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE patients SET active = ?2 WHERE id = ?1",
            params![patient_id, active as i32],
        )?;
        Ok(())
    }

    pub fn insert_vital(&self, reading: &VitalReading) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO vital_readings (patient_id, metric, value, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                reading.patient_id,
                reading.metric.as_str(),
                reading.value,
                ts(reading.recorded_at),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_medication_schedule(&self, entry: &MedicationScheduleEntry) -> Result<(), DatabaseError> {
        let times = serde_json::to_string(&entry.times)
            .map_err(|e| DatabaseError::invalid("times", e.to_string()))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO medication_schedules
             (medication_id, patient_id, medication_name, dosage, times, advance_minutes, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(medication_id) DO UPDATE SET
                patient_id = excluded.patient_id,
                medication_name = excluded.medication_name,
                dosage = excluded.dosage,
                times = excluded.times,
                advance_minutes = excluded.advance_minutes,
                active = excluded.active",
            params![
                entry.medication_id,
                entry.patient_id,
                entry.medication_name,
                entry.dosage,
                times,
                entry.advance_minutes,
                entry.active as i32,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_calendar_event(&self, event: &CalendarEventEntry) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO calendar_events (id, patient_id, date, time, title, event_type, advance_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                patient_id = excluded.patient_id,
                date = excluded.date,
                time = excluded.time,
                title = excluded.title,
                event_type = excluded.event_type,
                advance_minutes = excluded.advance_minutes",
            params![
                event.id,
                event.patient_id,
                day(event.date),
                event.time,
                event.title,
                event.event_type,
                event.advance_minutes,
            ],
        )?;
        Ok(())
    }

    /// Mark a notification as read by the in-app center.
    pub fn mark_read(&self, record_id: &Uuid) -> Result<(), DatabaseError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE notifications SET read = 1 WHERE id = ?1",
            params![record_id.to_string()],
        )?;
        Ok(())
    }

    /// Newest first, for the in-app notification center.
    pub fn notifications_for_patient(&self, patient_id: &str) -> Result<Vec<NotificationRecord>, DatabaseError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{NOTIFICATION_COLUMNS} WHERE n.patient_id = ?1 ORDER BY n.created_at DESC"
        ))?;
        let rows = stmt.query_map(params![patient_id], notification_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(notification_from_row(row?)?);
        }
        Ok(records)
    }

    pub fn notification_count(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM notifications", [], |row| row.get(0))?)
    }
}

// ═══════════════════════════════════════════
// Query bodies run on the blocking pool
// ═══════════════════════════════════════════

fn query_patients(
    conn: &Connection,
    filter: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Patient>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, display_name, destination_kind, destination_value, timezone
         FROM patients {filter} ORDER BY id"
    ))?;
    let rows = stmt.query_map(args, |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;

    let mut patients = Vec::new();
    for row in rows {
        let (id, display_name, kind, value, timezone) = row?;
        let destination = match (kind, value) {
            (Some(kind), Some(value)) => Some(
                PushDestination::from_parts(&kind, &value)
                    .ok_or_else(|| DatabaseError::invalid("destination_kind", kind))?,
            ),
            _ => None,
        };
        patients.push(Patient {
            id,
            display_name,
            destination,
            timezone,
        });
    }
    Ok(patients)
}

fn query_recent_vitals(conn: &Connection, patient_id: &str) -> Result<Vec<VitalReading>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT metric, value, recorded_at FROM vital_readings v
         WHERE patient_id = ?1
           AND id = (SELECT id FROM vital_readings w
                     WHERE w.patient_id = v.patient_id AND w.metric = v.metric
                     ORDER BY w.recorded_at DESC, w.id DESC LIMIT 1)
         ORDER BY recorded_at, metric",
    )?;
    let rows = stmt.query_map(params![patient_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, f64>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut readings = Vec::new();
    for row in rows {
        let (metric, value, recorded_at) = row?;
        let Some(metric) = MetricKind::from_str(&metric) else {
            tracing::warn!(patient_id, metric = %metric, "Skipping reading with unknown metric");
            continue;
        };
        readings.push(VitalReading {
            patient_id: patient_id.to_string(),
            metric,
            value,
            recorded_at: parse_ts("recorded_at", &recorded_at)?,
        });
    }
    Ok(readings)
}

fn query_schedules(
    conn: &Connection,
    patient_id: &str,
) -> Result<Vec<MedicationScheduleEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT medication_id, patient_id, medication_name, dosage, times, advance_minutes
         FROM medication_schedules WHERE patient_id = ?1 AND active = 1
         ORDER BY medication_id",
    )?;
    let rows = stmt.query_map(params![patient_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<u32>>(5)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (medication_id, patient_id, medication_name, dosage, times, advance_minutes) = row?;
        let times: Vec<String> =
            serde_json::from_str(&times).map_err(|_| DatabaseError::invalid("times", times))?;
        entries.push(MedicationScheduleEntry {
            medication_id,
            patient_id,
            medication_name,
            dosage,
            times,
            advance_minutes,
            active: true,
        });
    }
    Ok(entries)
}

fn query_events(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<CalendarEventEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, date, time, title, event_type, advance_minutes
         FROM calendar_events WHERE date >= ?1 AND date <= ?2
         ORDER BY date, time",
    )?;
    let rows = stmt.query_map(params![day(start), day(end)], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, Option<u32>>(6)?,
        ))
    })?;

    let mut events = Vec::new();
    for row in rows {
        let (id, patient_id, date, time, title, event_type, advance_minutes) = row?;
        events.push(CalendarEventEntry {
            id,
            patient_id,
            date: parse_date("date", &date)?,
            time,
            title,
            event_type,
            advance_minutes,
        });
    }
    Ok(events)
}

fn query_by_dedup_key(conn: &Connection, key: &str) -> Result<Option<NotificationRecord>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("{NOTIFICATION_COLUMNS} WHERE n.dedup_key = ?1"),
            params![key],
            notification_row,
        )
        .optional()?;
    row.map(notification_from_row).transpose()
}

fn insert_if_absent(
    conn: &Connection,
    record: &NotificationRecord,
) -> Result<NotificationRecord, DatabaseError> {
    let key = record.dedup_key().as_storage_key();
    conn.execute(
        "INSERT INTO notifications
         (id, patient_id, kind, title, body, source_ref, due_at, due_day, created_at, delivered, read, dedup_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(dedup_key) DO NOTHING",
        params![
            record.id.to_string(),
            record.patient_id,
            record.kind.as_str(),
            record.title,
            record.body,
            record.source_ref,
            ts(record.due_at),
            day(record.due_day),
            ts(record.created_at),
            record.delivered as i32,
            record.read as i32,
            key,
        ],
    )?;

    query_by_dedup_key(conn, &key)?
        .ok_or_else(|| DatabaseError::invalid("dedup_key", key))
}

/// Records a push could still reach: the patient is active and has a destination.
fn query_undelivered(
    conn: &Connection,
    created_before: DateTime<Utc>,
    due_after: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<NotificationRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{NOTIFICATION_COLUMNS}
         JOIN patients p ON p.id = n.patient_id
         WHERE n.delivered = 0 AND n.created_at <= ?1 AND n.due_at >= ?2
           AND p.active = 1
           AND p.destination_kind IS NOT NULL AND p.destination_value IS NOT NULL
         ORDER BY n.created_at LIMIT ?3"
    ))?;
    let rows = stmt.query_map(params![ts(created_before), ts(due_after), limit], notification_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(notification_from_row(row?)?);
    }
    Ok(records)
}

// ═══════════════════════════════════════════
// Notification row mapping
// ═══════════════════════════════════════════

const NOTIFICATION_COLUMNS: &str =
    "SELECT n.id, n.patient_id, n.kind, n.title, n.body, n.source_ref, n.due_at, n.due_day,
            n.created_at, n.delivered, n.read
     FROM notifications n";

struct NotificationRow {
    id: String,
    patient_id: String,
    kind: String,
    title: String,
    body: String,
    source_ref: String,
    due_at: String,
    due_day: String,
    created_at: String,
    delivered: bool,
    read: bool,
}

fn notification_row(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        kind: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        source_ref: row.get(5)?,
        due_at: row.get(6)?,
        due_day: row.get(7)?,
        created_at: row.get(8)?,
        delivered: row.get::<_, i32>(9)? != 0,
        read: row.get::<_, i32>(10)? != 0,
    })
}

fn notification_from_row(row: NotificationRow) -> Result<NotificationRecord, DatabaseError> {
    Ok(NotificationRecord {
        id: Uuid::parse_str(&row.id).map_err(|_| DatabaseError::invalid("id", &row.id))?,
        kind: NotificationKind::from_str(&row.kind).ok_or_else(|| DatabaseError::invalid("kind", &row.kind))?,
        due_at: parse_ts("due_at", &row.due_at)?,
        due_day: parse_date("due_day", &row.due_day)?,
        created_at: parse_ts("created_at", &row.created_at)?,
        patient_id: row.patient_id,
        title: row.title,
        body: row.body,
        source_ref: row.source_ref,
        delivered: row.delivered,
        read: row.read,
    })
}

// ═══════════════════════════════════════════
// Store impl
// ═══════════════════════════════════════════

#[async_trait]
impl Store for SqliteStore {
    async fn health_check(&self) -> Result<(), MonitorError> {
        self.blocking(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    async fn active_patients(&self) -> Result<Vec<Patient>, MonitorError> {
        self.blocking(|conn| query_patients(conn, "WHERE active = 1", &[])).await
    }

    async fn find_patient(&self, patient_id: &str) -> Result<Option<Patient>, MonitorError> {
        let patient_id = patient_id.to_string();
        self.blocking(move |conn| {
            Ok(query_patients(conn, "WHERE id = ?1", &[&patient_id])?.into_iter().next())
        })
        .await
    }

    async fn recent_vitals(&self, patient_id: &str) -> Result<Vec<VitalReading>, MonitorError> {
        let patient_id = patient_id.to_string();
        self.blocking(move |conn| query_recent_vitals(conn, &patient_id)).await
    }

    async fn active_medication_schedules(
        &self,
        patient_id: &str,
    ) -> Result<Vec<MedicationScheduleEntry>, MonitorError> {
        let patient_id = patient_id.to_string();
        self.blocking(move |conn| query_schedules(conn, &patient_id)).await
    }

    async fn calendar_events_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CalendarEventEntry>, MonitorError> {
        self.blocking(move |conn| query_events(conn, start, end)).await
    }

    async fn find_notification_by_dedup_key(
        &self,
        key: &DedupKey,
    ) -> Result<Option<NotificationRecord>, MonitorError> {
        let key = key.as_storage_key();
        self.blocking(move |conn| query_by_dedup_key(conn, &key)).await
    }

    async fn create_notification(
        &self,
        record: &NotificationRecord,
    ) -> Result<NotificationRecord, MonitorError> {
        let record = record.clone();
        self.blocking(move |conn| insert_if_absent(conn, &record)).await
    }

    async fn mark_delivered(&self, record_id: &Uuid) -> Result<(), MonitorError> {
        let id = record_id.to_string();
        let updated = self
            .blocking(move |conn| {
                Ok(conn.execute("UPDATE notifications SET delivered = 1 WHERE id = ?1", params![id])?)
            })
            .await?;
        if updated == 0 {
            return Err(MonitorError::Store(format!("notification {record_id} not found")));
        }
        Ok(())
    }

    async fn undelivered_notifications(
        &self,
        created_before: DateTime<Utc>,
        due_after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>, MonitorError> {
        self.blocking(move |conn| query_undelivered(conn, created_before, due_after, limit))
            .await
    }
}
