use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{Rem1ndError, Result};

/// How a reminder repeats after it fires.
///
/// Stored as text in `reminders.repeat_type`. NULL and `"none"` both mean
/// one-shot; any text we do not know is kept as `Unrecognized` so a row is
/// never rewritten behind the user's back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RepeatType {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    /// Every `repeat_interval` days.
    Custom,
    Unrecognized(String),
}

impl RepeatType {
    /// Map a nullable column value.
    pub fn from_column(value: Option<&str>) -> Self {
        value.map(Self::from).unwrap_or_default()
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, RepeatType::None)
    }

    pub fn as_str(&self) -> &str {
        match self {
            RepeatType::None => "none",
            RepeatType::Daily => "daily",
            RepeatType::Weekly => "weekly",
            RepeatType::Monthly => "monthly",
            RepeatType::Yearly => "yearly",
            RepeatType::Custom => "custom",
            RepeatType::Unrecognized(other) => other,
        }
    }
}

impl From<&str> for RepeatType {
    fn from(s: &str) -> Self {
        match s.trim() {
            "" | "none" => RepeatType::None,
            "daily" => RepeatType::Daily,
            "weekly" => RepeatType::Weekly,
            "monthly" => RepeatType::Monthly,
            "yearly" => RepeatType::Yearly,
            "custom" => RepeatType::Custom,
            other => RepeatType::Unrecognized(other.to_string()),
        }
    }
}

impl From<String> for RepeatType {
    fn from(s: String) -> Self {
        RepeatType::from(s.as_str())
    }
}

impl From<RepeatType> for String {
    fn from(r: RepeatType) -> Self {
        r.as_str().to_string()
    }
}

impl std::fmt::Display for RepeatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted reminder row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub recipient_email: String,
    /// Instant the user asked for. Anchor until `next_trigger_time` is set.
    pub trigger_time: NaiveDateTime,
    /// Anchor of the next occurrence of a recurring reminder.
    pub next_trigger_time: Option<NaiveDateTime>,
    /// Last successful delivery; informational only.
    pub last_sent_time: Option<NaiveDateTime>,
    /// Terminal flag. Recurring reminders stay `false` while they have a future.
    pub sent: bool,
    pub repeat_type: RepeatType,
    /// Days between occurrences for `RepeatType::Custom`.
    pub repeat_interval: Option<i64>,
    pub created_at: Option<String>,
}

impl Reminder {
    /// The instant due-detection and recurrence are computed from.
    pub fn anchor(&self) -> NaiveDateTime {
        self.next_trigger_time.unwrap_or(self.trigger_time)
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        !self.sent && self.anchor() <= now
    }
}

/// User-supplied fields for creating or editing a reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReminder {
    pub title: String,
    pub content: String,
    pub recipient_email: String,
    pub trigger_time: NaiveDateTime,
    #[serde(default)]
    pub repeat_type: RepeatType,
    #[serde(default)]
    pub repeat_interval: Option<i64>,
}

impl NewReminder {
    /// Reject interval values the recurrence calculator could never use.
    ///
    /// Custom repeats without a positive interval are still accepted; the
    /// engine retires them after their first delivery.
    pub fn validate(&self) -> Result<()> {
        if let Some(interval) = self.repeat_interval {
            if interval <= 0 {
                return Err(Rem1ndError::InvalidRepeat(format!(
                    "repeat_interval must be a positive number of days, got {interval}"
                )));
            }
        }
        Ok(())
    }
}

/// The single active SMTP credential set.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpCredentials {
    pub server: String,
    pub port: u16,
    pub sender_email: String,
    /// Account password or app-specific authorisation code.
    pub password: String,
    pub sender_name: String,
}

impl SmtpCredentials {
    /// Port 465 speaks TLS from the first byte; everything else upgrades via STARTTLS.
    pub fn implicit_tls(&self) -> bool {
        self.port == 465
    }
}

impl std::fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("sender_email", &self.sender_email)
            .field("password", &"***")
            .field("sender_name", &self.sender_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn reminder() -> Reminder {
        Reminder {
            id: 1,
            title: "t".into(),
            content: "c".into(),
            recipient_email: "a@example.com".into(),
            trigger_time: ts(1, 10),
            next_trigger_time: None,
            last_sent_time: None,
            sent: false,
            repeat_type: RepeatType::None,
            repeat_interval: None,
            created_at: None,
        }
    }

    #[test]
    fn repeat_type_parses_known_and_unknown() {
        assert_eq!(RepeatType::from_column(None), RepeatType::None);
        assert_eq!(RepeatType::from("none"), RepeatType::None);
        assert_eq!(RepeatType::from("weekly"), RepeatType::Weekly);
        assert_eq!(
            RepeatType::from("fortnightly"),
            RepeatType::Unrecognized("fortnightly".into())
        );
        assert_eq!(RepeatType::from("fortnightly").as_str(), "fortnightly");
    }

    #[test]
    fn repeat_type_serializes_as_plain_string() {
        let json = serde_json::to_string(&RepeatType::Custom).unwrap();
        assert_eq!(json, "\"custom\"");
        let back: RepeatType = serde_json::from_str("\"daily\"").unwrap();
        assert_eq!(back, RepeatType::Daily);
    }

    #[test]
    fn anchor_falls_back_to_trigger_time() {
        let mut r = reminder();
        assert_eq!(r.anchor(), ts(1, 10));
        r.next_trigger_time = Some(ts(2, 10));
        assert_eq!(r.anchor(), ts(2, 10));
    }

    #[test]
    fn future_next_trigger_hides_past_trigger() {
        let mut r = reminder();
        assert!(r.is_due(ts(1, 11)));
        r.next_trigger_time = Some(ts(3, 10));
        assert!(!r.is_due(ts(1, 11)));
        r.next_trigger_time = None;
        r.sent = true;
        assert!(!r.is_due(ts(1, 11)));
    }

    #[test]
    fn non_positive_interval_is_rejected() {
        let new = NewReminder {
            title: "t".into(),
            content: "c".into(),
            recipient_email: "a@example.com".into(),
            trigger_time: ts(1, 10),
            repeat_type: RepeatType::Custom,
            repeat_interval: Some(0),
        };
        assert!(new.validate().is_err());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = SmtpCredentials {
            server: "smtp.example.com".into(),
            port: 465,
            sender_email: "me@example.com".into(),
            password: "hunter2".into(),
            sender_name: "Me".into(),
        };
        assert!(creds.implicit_tls());
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
