use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DB_PATH: &str = "data/rem1nd.db";
pub const DEFAULT_CONFIG_PATH: &str = "rem1nd.toml";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SUBJECT_PREFIX: &str = "Reminder: ";

/// Top-level config (rem1nd.toml + REM1ND_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rem1ndConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Dispatch engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between ticks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Upper bound on a single delivery attempt.
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
    /// How long a claimed reminder stays invisible to other ticks.
    /// Defaults to twice the delivery timeout.
    #[serde(default)]
    pub lease_secs: Option<u64>,
    /// Consecutive failed deliveries before an occurrence is given up.
    /// Unset means retry forever.
    #[serde(default)]
    pub max_delivery_attempts: Option<u32>,
    #[serde(default)]
    pub month_policy: MonthPolicy,
    #[serde(default)]
    pub clock: ClockMode,
}

impl SchedulerConfig {
    pub fn lease_secs(&self) -> u64 {
        self.lease_secs
            .unwrap_or(self.delivery_timeout_secs.saturating_mul(2))
            .max(1)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            delivery_timeout_secs: DEFAULT_DELIVERY_TIMEOUT_SECS,
            lease_secs: None,
            max_delivery_attempts: None,
            month_policy: MonthPolicy::default(),
            clock: ClockMode::default(),
        }
    }
}

/// How `monthly` and `yearly` repeats advance.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MonthPolicy {
    /// monthly = +30 days, yearly = +365 days (legacy behaviour).
    #[default]
    FixedWidth,
    /// monthly = +1 calendar month, yearly = +12 calendar months.
    Calendar,
}

/// Which wall clock reminder instants are interpreted in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ClockMode {
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Prepended to the reminder title to form the subject line.
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            subject_prefix: default_subject_prefix(),
        }
    }
}

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_string()
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_delivery_timeout() -> u64 {
    DEFAULT_DELIVERY_TIMEOUT_SECS
}
fn default_subject_prefix() -> String {
    DEFAULT_SUBJECT_PREFIX.to_string()
}

impl Rem1ndConfig {
    /// Load config from a TOML file with REM1ND_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `REM1ND_SCHEDULER__POLL_INTERVAL_SECS=10`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or(DEFAULT_CONFIG_PATH);
        Self::figment(path)
            .extract()
            .map_err(|e| crate::error::Rem1ndError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("REM1ND_").split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Rem1ndConfig = Figment::new()
            .merge(Toml::string(""))
            .extract()
            .unwrap();
        assert_eq!(config.database.path, DEFAULT_DB_PATH);
        assert_eq!(config.scheduler.poll_interval_secs, 30);
        assert_eq!(config.scheduler.month_policy, MonthPolicy::FixedWidth);
        assert_eq!(config.scheduler.clock, ClockMode::Local);
        assert_eq!(config.mail.subject_prefix, DEFAULT_SUBJECT_PREFIX);
        assert!(config.scheduler.max_delivery_attempts.is_none());
    }

    #[test]
    fn toml_overrides_are_applied() {
        let config: Rem1ndConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [scheduler]
                poll_interval_secs = 5
                delivery_timeout_secs = 10
                max_delivery_attempts = 3
                month_policy = "calendar"
                clock = "utc"
                "#,
            ))
            .extract()
            .unwrap();
        assert_eq!(config.scheduler.poll_interval_secs, 5);
        assert_eq!(config.scheduler.lease_secs(), 20);
        assert_eq!(config.scheduler.max_delivery_attempts, Some(3));
        assert_eq!(config.scheduler.month_policy, MonthPolicy::Calendar);
        assert_eq!(config.scheduler.clock, ClockMode::Utc);
    }

    #[test]
    fn explicit_lease_wins() {
        let scheduler = SchedulerConfig {
            lease_secs: Some(7),
            ..SchedulerConfig::default()
        };
        assert_eq!(scheduler.lease_secs(), 7);
    }
}
