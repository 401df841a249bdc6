//! Alert rule table.
//!
//! Rules are static data: which metric, which comparison, how severe, and
//! what to say. The engine does not judge clinical correctness of the
//! thresholds; deployments replace the built-in table through config.

use serde::{Deserialize, Serialize};

use super::error::MonitorError;
use crate::models::MetricKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Urgent,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Urgent => "urgent",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Urgent => "Urgent",
        }
    }
}

/// Comparison applied to a reading's value. Range bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Comparator {
    Above { threshold: f64 },
    Below { threshold: f64 },
    /// Fires when the value leaves `[low, high]`.
    Outside { low: f64, high: f64 },
    /// Fires when the value lies within `[low, high]`.
    Between { low: f64, high: f64 },
}

impl Comparator {
    pub fn holds(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match *self {
            Comparator::Above { threshold } => value > threshold,
            Comparator::Below { threshold } => value < threshold,
            Comparator::Outside { low, high } => value < low || value > high,
            Comparator::Between { low, high } => value >= low && value <= high,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub metric: MetricKind,
    pub comparator: Comparator,
    pub severity: Severity,
    /// Supports `{value}`, `{threshold}`, `{low}`, `{high}`, `{unit}` and `{metric}`.
    pub message: String,
    /// Suggested action tag, e.g. `contact_provider`.
    pub action: String,
}

impl AlertRule {
    pub fn matches(&self, metric: MetricKind, value: f64) -> bool {
        self.metric == metric && self.comparator.holds(value)
    }

    /// Render the message template for a given reading value.
    pub fn render(&self, value: f64) -> String {
        let (threshold, low, high) = match self.comparator {
            Comparator::Above { threshold } | Comparator::Below { threshold } => {
                (Some(threshold), None, None)
            }
            Comparator::Outside { low, high } | Comparator::Between { low, high } => {
                (None, Some(low), Some(high))
            }
        };

        let mut out = self
            .message
            .replace("{value}", &format_number(value))
            .replace("{unit}", self.metric.default_unit())
            .replace("{metric}", self.metric.label());
        if let Some(t) = threshold {
            out = out.replace("{threshold}", &format_number(t));
        }
        if let Some(l) = low {
            out = out.replace("{low}", &format_number(l));
        }
        if let Some(h) = high {
            out = out.replace("{high}", &format_number(h));
        }
        out
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.id.trim().is_empty() {
            return Err(MonitorError::Config("alert rule id must not be empty".into()));
        }
        if self.message.trim().is_empty() {
            return Err(MonitorError::Config(format!("alert rule '{}' has no message", self.id)));
        }
        match self.comparator {
            Comparator::Outside { low, high } | Comparator::Between { low, high } if low > high => {
                Err(MonitorError::Config(format!(
                    "alert rule '{}' has low ({low}) above high ({high})",
                    self.id
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Integers print without a fractional part; everything else keeps one decimal.
fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v:.1}")
    }
}

fn rule(
    id: &str,
    metric: MetricKind,
    comparator: Comparator,
    severity: Severity,
    message: &str,
    action: &str,
) -> AlertRule {
    AlertRule {
        id: id.to_string(),
        metric,
        comparator,
        severity,
        message: message.to_string(),
        action: action.to_string(),
    }
}

/// Built-in rule table used when the configuration supplies none.
#[rustfmt::skip]
pub fn default_rules() -> Vec<AlertRule> {
    use Comparator::*;
    use MetricKind::*;
    use Severity::*;

    vec![
        rule("hr-high", HeartRate, Above { threshold: 120.0 }, High,
             "{metric} of {value} {unit} is above {threshold} {unit}.", "recheck_reading"),
        rule("hr-very-high", HeartRate, Above { threshold: 150.0 }, Urgent,
             "{metric} of {value} {unit} is dangerously high.", "seek_emergency_care"),
        rule("hr-low", HeartRate, Below { threshold: 50.0 }, Medium,
             "{metric} of {value} {unit} is below {threshold} {unit}.", "recheck_reading"),
        rule("bp-sys-high", BloodPressureSystolic, Above { threshold: 140.0 }, Medium,
             "{metric} of {value} {unit} is above {threshold} {unit}.", "contact_provider"),
        rule("bp-sys-crisis", BloodPressureSystolic, Above { threshold: 180.0 }, Urgent,
             "{metric} of {value} {unit} is in the crisis range.", "seek_emergency_care"),
        rule("bp-sys-low", BloodPressureSystolic, Below { threshold: 90.0 }, Medium,
             "{metric} of {value} {unit} is below {threshold} {unit}.", "hydrate_and_rest"),
        rule("bp-dia-high", BloodPressureDiastolic, Above { threshold: 90.0 }, Medium,
             "{metric} of {value} {unit} is above {threshold} {unit}.", "contact_provider"),
        rule("bp-dia-crisis", BloodPressureDiastolic, Above { threshold: 120.0 }, Urgent,
             "{metric} of {value} {unit} is in the crisis range.", "seek_emergency_care"),
        rule("glucose-out-of-range", BloodGlucose, Outside { low: 70.0, high: 180.0 }, High,
             "{metric} of {value} {unit} is outside {low}-{high} {unit}.", "contact_provider"),
        rule("spo2-low", OxygenSaturation, Below { threshold: 92.0 }, High,
             "{metric} of {value}{unit} is below {threshold}{unit}.", "contact_provider"),
        rule("spo2-critical", OxygenSaturation, Below { threshold: 88.0 }, Urgent,
             "{metric} of {value}{unit} is critically low.", "seek_emergency_care"),
        rule("temp-fever", Temperature, Between { low: 38.0, high: 39.4 }, Medium,
             "{metric} of {value} {unit} indicates a fever.", "hydrate_and_rest"),
        rule("temp-high-fever", Temperature, Above { threshold: 39.4 }, High,
             "{metric} of {value} {unit} is a high fever.", "contact_provider"),
        rule("resp-out-of-range", RespiratoryRate, Outside { low: 10.0, high: 24.0 }, High,
             "{metric} of {value} {unit} is outside {low}-{high} {unit}.", "contact_provider"),
    ]
}

/// Advice shown for an action tag. Unknown tags get generic advice.
pub fn action_advice(action: &str) -> &'static str {
    match action {
        "seek_emergency_care" => "Seek emergency care now or call your local emergency number.",
        "contact_provider" => "Contact your care team today to discuss this reading.",
        "recheck_reading" => "Rest for five minutes and take the measurement again.",
        "hydrate_and_rest" => "Drink fluids, rest, and keep monitoring.",
        _ => "Keep monitoring and share this reading with your care team.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparators_respect_bounds() {
        assert!(Comparator::Above { threshold: 100.0 }.holds(100.5));
        assert!(!Comparator::Above { threshold: 100.0 }.holds(100.0));
        assert!(Comparator::Below { threshold: 90.0 }.holds(89.9));
        assert!(!Comparator::Below { threshold: 90.0 }.holds(90.0));

        let outside = Comparator::Outside { low: 70.0, high: 180.0 };
        assert!(outside.holds(69.0));
        assert!(outside.holds(181.0));
        assert!(!outside.holds(70.0));
        assert!(!outside.holds(180.0));

        let between = Comparator::Between { low: 38.0, high: 39.4 };
        assert!(between.holds(38.0));
        assert!(between.holds(39.4));
        assert!(!between.holds(39.5));
    }

    #[test]
    fn nan_never_fires() {
        assert!(!Comparator::Above { threshold: 0.0 }.holds(f64::NAN));
        assert!(!Comparator::Outside { low: 0.0, high: 1.0 }.holds(f64::NAN));
    }

    #[test]
    #[rustfmt::skip]
    fn renders_template_placeholders() {
        let r = rule("x", MetricKind::HeartRate, Comparator::Above { threshold: 120.0 }, Severity::High,
                     "{metric} of {value} {unit} is above {threshold} {unit}.", "recheck_reading");
        assert_eq!(r.render(131.0), "Heart rate of 131 bpm is above 120 bpm.");

        let g = rule("g", MetricKind::BloodGlucose, Comparator::Outside { low: 70.0, high: 180.0 }, Severity::High,
                     "{value} outside {low}-{high}", "contact_provider");
        assert_eq!(g.render(65.5), "65.5 outside 70-180");
    }

    #[test]
    fn severity_orders_low_to_urgent() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Urgent);
    }

    #[test]
    fn default_rules_are_valid_and_unique() {
        let rules = default_rules();
        let mut ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), rules.len());
        for r in &rules {
            r.validate().unwrap();
        }
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let r = rule("bad", MetricKind::BloodGlucose, Comparator::Between { low: 200.0, high: 100.0 },
                     Severity::Low, "m", "a");
        assert!(r.validate().is_err());
    }

    #[test]
    fn rule_deserializes_from_config_json() {
        let r: AlertRule = serde_json::from_str(
            r#"{"id": "hr", "metric": "heart_rate", "comparator": {"op": "above", "threshold": 110},
                "severity": "urgent", "message": "HR {value}", "action": "contact_provider"}"#,
        )
        .unwrap();
        assert_eq!(r.severity, Severity::Urgent);
        assert!(r.matches(MetricKind::HeartRate, 111.0));
        assert!(!r.matches(MetricKind::BloodGlucose, 111.0));
    }
}
