//! Health trend analyzer: judges each vital reading against the rule table.
//!
//! Stateless and per-reading: no aggregation across readings. Every rule
//! that matches a reading produces its own alert (no first-match-wins).

use std::collections::HashMap;

use super::rules::{action_advice, default_rules, AlertRule, Severity};
use super::traits::VitalAnalyzer;
use super::types::*;
use crate::models::VitalReading;

/// Rule-table analyzer. No LLM calls.
pub struct RuleBasedAnalyzer {
    rules: Vec<AlertRule>,
}

impl RuleBasedAnalyzer {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self { rules }
    }

    pub fn with_default_rules() -> Self {
        Self::new(default_rules())
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }
}

impl Default for RuleBasedAnalyzer {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

impl VitalAnalyzer for RuleBasedAnalyzer {
    fn analyze(&self, readings: &[VitalReading]) -> HealthAnalysis {
        let mut alerts = Vec::new();

        for reading in readings {
            for rule in self.rules.iter().filter(|r| r.matches(reading.metric, reading.value)) {
                alerts.push(AlertCandidate {
                    patient_id: reading.patient_id.clone(),
                    rule_id: rule.id.clone(),
                    metric: reading.metric,
                    value: reading.value,
                    severity: rule.severity,
                    message: rule.render(reading.value),
                    action: rule.action.clone(),
                    recorded_at: reading.recorded_at,
                });
            }
        }

        let recommendations = build_recommendations(&alerts);

        if !alerts.is_empty() {
            tracing::debug!(
                readings = readings.len(),
                alerts = alerts.len(),
                "Vital readings triggered alerts"
            );
        }

        HealthAnalysis {
            alerts,
            recommendations,
        }
    }
}

/// One recommendation per distinct action tag, most severe first.
/// Ties keep the order in which the action first appeared.
fn build_recommendations(alerts: &[AlertCandidate]) -> Vec<Recommendation> {
    let mut by_action: HashMap<&str, (usize, Severity)> = HashMap::new();

    for (idx, alert) in alerts.iter().enumerate() {
        by_action
            .entry(alert.action.as_str())
            .and_modify(|(_, sev)| *sev = (*sev).max(alert.severity))
            .or_insert((idx, alert.severity));
    }

    let mut ordered: Vec<(&str, usize, Severity)> = by_action
        .into_iter()
        .map(|(action, (first_seen, severity))| (action, first_seen, severity))
        .collect();
    ordered.sort_by(|a, b| b.2.cmp(&a.2).then(a.1.cmp(&b.1)));

    ordered
        .into_iter()
        .map(|(action, _, severity)| Recommendation {
            action: action.to_string(),
            severity,
            advice: action_advice(action).to_string(),
        })
        .collect()
}
