//! Notification composer: title + body text for a candidate.
//!
//! Walks the ordered provider chain; the first provider that answers in time
//! with usable text wins. Errors, timeouts and empty answers fall through to
//! the next provider, and an exhausted (or empty) chain yields the
//! deterministic template. `compose` never fails, and its latency is bounded
//! by the sum of the provider timeouts.

use std::sync::Arc;

use super::rules::action_advice;
use super::traits::TextGenProvider;
use super::types::*;

/// Default cap on notification body length (characters).
pub const DEFAULT_BODY_MAX_LEN: usize = 220;

pub struct NotificationComposer {
    providers: Vec<Arc<dyn TextGenProvider>>,
    body_max_len: usize,
}

impl NotificationComposer {
    pub fn new(providers: Vec<Arc<dyn TextGenProvider>>, body_max_len: usize) -> Self {
        Self {
            providers,
            body_max_len: body_max_len.max(1),
        }
    }

    /// Composer with no providers: always renders the template.
    pub fn template_only(body_max_len: usize) -> Self {
        Self::new(Vec::new(), body_max_len)
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub async fn compose(&self, candidate: &NotificationCandidate) -> ComposedNotification {
        let title = build_title(candidate);
        let fallback = truncate_chars(&build_template(candidate), self.body_max_len);

        if self.providers.is_empty() {
            return ComposedNotification {
                title,
                body: fallback,
                origin: TextOrigin::Template,
            };
        }

        let prompt = build_prompt(candidate, self.body_max_len);

        for provider in &self.providers {
            let budget = provider.timeout();
            let limit = provider.max_response_len().min(self.body_max_len);

            match tokio::time::timeout(budget, provider.generate(&prompt, budget)).await {
                Ok(Ok(raw)) => match sanitize_response(&raw, limit) {
                    Some(body) => {
                        tracing::debug!(
                            provider = provider.name(),
                            kind = candidate.kind().as_str(),
                            "Composed notification text"
                        );
                        return ComposedNotification {
                            title,
                            body,
                            origin: TextOrigin::Provider(provider.name().to_string()),
                        };
                    }
                    None => {
                        tracing::warn!(provider = provider.name(), "Provider returned empty text, trying next");
                    }
                },
                Ok(Err(e)) => {
                    tracing::warn!(provider = provider.name(), error = %e, "Provider failed, trying next");
                }
                Err(_) => {
                    tracing::warn!(
                        provider = provider.name(),
                        timeout_ms = budget.as_millis() as u64,
                        "Provider timed out, trying next"
                    );
                }
            }
        }

        tracing::debug!(kind = candidate.kind().as_str(), "Provider chain exhausted, using template");
        ComposedNotification {
            title,
            body: fallback,
            origin: TextOrigin::Template,
        }
    }
}

// ═══════════════════════════════════════════
// Text building
// ═══════════════════════════════════════════

pub fn build_title(candidate: &NotificationCandidate) -> String {
    match candidate {
        NotificationCandidate::Alert { alert, .. } => format!("{} health alert", alert.severity.label()),
        NotificationCandidate::Medication(_) => "Medication reminder".to_string(),
        NotificationCandidate::Event(e) => format!("Upcoming {}", e.event.event_type.replace('_', " ")),
    }
}

/// Deterministic fallback body. Always non-empty.
pub fn build_template(candidate: &NotificationCandidate) -> String {
    let due = candidate.local_due_at().format("%H:%M");

    match candidate {
        NotificationCandidate::Alert { alert, .. } => {
            format!("{} {}", alert.message, action_advice(&alert.action))
        }
        NotificationCandidate::Medication(m) => match m.medication.dosage.as_deref() {
            Some(dosage) if !dosage.trim().is_empty() => format!(
                "Time to take {} ({}) at {due}.",
                m.medication.medication_name,
                dosage.trim()
            ),
            _ => format!("Time to take {} at {due}.", m.medication.medication_name),
        },
        NotificationCandidate::Event(e) => format!("{} starts at {due} today.", e.event.title),
    }
}

/// Instruction sent to text-generation providers.
pub fn build_prompt(candidate: &NotificationCandidate, max_len: usize) -> String {
    let due = candidate.local_due_at().format("%H:%M");

    let context = match candidate {
        NotificationCandidate::Alert { alert, .. } => format!(
            "A {} severity health alert was raised: {} Suggested action: {}. Reading taken at {due}.",
            alert.severity.as_str(),
            alert.message,
            action_advice(&alert.action)
        ),
        NotificationCandidate::Medication(m) => format!(
            "The patient should take {}{} at {due}.",
            m.medication.medication_name,
            m.medication
                .dosage
                .as_deref()
                .map(|d| format!(" ({d})"))
                .unwrap_or_default()
        ),
        NotificationCandidate::Event(e) => format!(
            "The patient has a {} \"{}\" today at {due}.",
            e.event.event_type.replace('_', " "),
            e.event.title
        ),
    };

    format!(
        "Write a short, friendly push notification for a patient. \
         Use at most {max_len} characters, no greeting, no emojis, no markdown. \
         Keep the time exactly as given. Reply with the notification text only.\n\n{context}"
    )
}

/// Trim, unwrap quotes, collapse whitespace and cap length. `None` if nothing usable remains.
pub fn sanitize_response(raw: &str, max_len: usize) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”'))
        .trim();
    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        return None;
    }
    Some(truncate_chars(&collapsed, max_len))
}

/// Cap `s` at `max` characters, ending with `...` when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    if max <= 3 {
        return s.chars().take(max).collect();
    }
    let kept: String = s.chars().take(max - 3).collect();
    format!("{}...", kept.trim_end())
}
