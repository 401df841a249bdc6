use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of vital measurement a reading carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    HeartRate,
    BloodPressureSystolic,
    BloodPressureDiastolic,
    BloodGlucose,
    OxygenSaturation,
    Temperature,
    RespiratoryRate,
    Weight,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::HeartRate => "heart_rate",
            MetricKind::BloodPressureSystolic => "blood_pressure_systolic",
            MetricKind::BloodPressureDiastolic => "blood_pressure_diastolic",
            MetricKind::BloodGlucose => "blood_glucose",
            MetricKind::OxygenSaturation => "oxygen_saturation",
            MetricKind::Temperature => "temperature",
            MetricKind::RespiratoryRate => "respiratory_rate",
            MetricKind::Weight => "weight",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "heart_rate" => Some(MetricKind::HeartRate),
            "blood_pressure_systolic" => Some(MetricKind::BloodPressureSystolic),
            "blood_pressure_diastolic" => Some(MetricKind::BloodPressureDiastolic),
            "blood_glucose" => Some(MetricKind::BloodGlucose),
            "oxygen_saturation" => Some(MetricKind::OxygenSaturation),
            "temperature" => Some(MetricKind::Temperature),
            "respiratory_rate" => Some(MetricKind::RespiratoryRate),
            "weight" => Some(MetricKind::Weight),
            _ => None,
        }
    }

    /// Human label used in notification text.
    pub fn label(self) -> &'static str {
        match self {
            MetricKind::HeartRate => "Heart rate",
            MetricKind::BloodPressureSystolic => "Systolic blood pressure",
            MetricKind::BloodPressureDiastolic => "Diastolic blood pressure",
            MetricKind::BloodGlucose => "Blood glucose",
            MetricKind::OxygenSaturation => "Oxygen saturation",
            MetricKind::Temperature => "Temperature",
            MetricKind::RespiratoryRate => "Respiratory rate",
            MetricKind::Weight => "Weight",
        }
    }

    pub fn default_unit(self) -> &'static str {
        match self {
            MetricKind::HeartRate => "bpm",
            MetricKind::BloodPressureSystolic | MetricKind::BloodPressureDiastolic => "mmHg",
            MetricKind::BloodGlucose => "mg/dL",
            MetricKind::OxygenSaturation => "%",
            MetricKind::Temperature => "°C",
            MetricKind::RespiratoryRate => "breaths/min",
            MetricKind::Weight => "kg",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single vital measurement supplied by the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VitalReading {
    pub patient_id: String,
    pub metric: MetricKind,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}
