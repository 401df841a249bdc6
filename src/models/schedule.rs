use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// A wall-clock time of day in `HH:MM` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    /// Parse `H:MM` or `HH:MM`. Seconds are not accepted.
    pub fn parse(s: &str) -> Option<Self> {
        let (h, m) = s.trim().split_once(':')?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return None;
        }
        if !h.chars().chain(m.chars()).all(|c| c.is_ascii_digit()) {
            return None;
        }
        Self::new(h.parse().ok()?, m.parse().ok()?)
    }

    pub fn hour(self) -> u32 {
        self.hour
    }

    pub fn minute(self) -> u32 {
        self.minute
    }

    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// A medication's recurring daily dose schedule.
///
/// `times` are kept as raw strings: a malformed entry is skipped by the
/// scanner rather than rejecting the whole schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationScheduleEntry {
    pub medication_id: String,
    pub patient_id: String,
    pub medication_name: String,
    pub dosage: Option<String>,
    pub times: Vec<String>,
    /// Overrides the global advance window (minutes) for this medication.
    pub advance_minutes: Option<u32>,
    pub active: bool,
}

/// A one-off calendar event (appointment, lab visit, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEventEntry {
    pub id: String,
    pub patient_id: String,
    pub date: NaiveDate,
    pub time: String,
    pub title: String,
    pub event_type: String,
    pub advance_minutes: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_times() {
        assert_eq!(TimeOfDay::parse("09:00"), TimeOfDay::new(9, 0));
        assert_eq!(TimeOfDay::parse("9:05"), TimeOfDay::new(9, 5));
        assert_eq!(TimeOfDay::parse(" 23:59 "), TimeOfDay::new(23, 59));
    }

    #[test]
    fn rejects_malformed_times() {
        for bad in ["24:00", "12:60", "1200", "12:5", "ab:cd", "", "12:00:00", "-1:00"] {
            assert!(TimeOfDay::parse(bad).is_none(), "{bad} should not parse");
        }
    }

    #[test]
    fn displays_zero_padded() {
        assert_eq!(TimeOfDay::new(7, 3).unwrap().to_string(), "07:03");
    }
}
