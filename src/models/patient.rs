use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

/// Where push notifications for a patient are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum PushDestination {
    /// Fan-out topic (every device subscribed to the patient's topic).
    Topic(String),
    /// A single device registration token.
    Token(String),
}

impl PushDestination {
    pub fn kind_str(&self) -> &'static str {
        match self {
            PushDestination::Topic(_) => "topic",
            PushDestination::Token(_) => "token",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            PushDestination::Topic(v) | PushDestination::Token(v) => v,
        }
    }

    pub fn from_parts(kind: &str, value: &str) -> Option<Self> {
        match kind {
            "topic" => Some(PushDestination::Topic(value.to_string())),
            "token" => Some(PushDestination::Token(value.to_string())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: String,
    pub display_name: Option<String>,
    pub destination: Option<PushDestination>,
    /// `"UTC"`, `"Z"` or a fixed offset such as `"+02:00"`. Absent means UTC.
    pub timezone: Option<String>,
}

impl Patient {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: None,
            destination: None,
            timezone: None,
        }
    }

    /// Resolve the patient's UTC offset. Unrecognised zones fall back to UTC.
    pub fn utc_offset(&self) -> FixedOffset {
        let utc = Utc.fix();
        match self.timezone.as_deref().map(str::trim) {
            None | Some("") => utc,
            Some(tz) => match parse_offset(tz) {
                Some(offset) => offset,
                None => {
                    tracing::warn!(
                        patient_id = %self.id,
                        timezone = tz,
                        "Unrecognised timezone, assuming UTC"
                    );
                    utc
                }
            },
        }
    }
}

/// Parse `UTC`, `Z`, `+HH:MM`, `-HH:MM` or `+HHMM`.
pub fn parse_offset(tz: &str) -> Option<FixedOffset> {
    if tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z") || tz.eq_ignore_ascii_case("gmt") {
        return Some(Utc.fix());
    }

    let (sign, rest) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
