//! Config - 設定の読み込み
//!
//! 優先順位: デフォルト < TOML ファイル < 環境変数。
//! 読み込み後に `validate` で起動前に弾きます（Fail-fast）。
//!
//! | 環境変数 | 設定 |
//! |---|---|
//! | `BUDDY_DATABASE` | `database_path` |
//! | `BUDDY_RECIPIENT` (`YOUR_EMAIL`) | `recipient` |
//! | `BUDDY_SENDER` | `sender` |
//! | `BUDDY_SMTP_HOST` / `_PORT` / `_USER` / `_PASSWORD` | `smtp.*` |
//! | `BUDDY_LOG_FORMAT` | `log_format` (`pretty` / `json`) |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::runner::RunnerSettings;
use crate::domain::{MissingTaskPolicy, RetryPolicy};
use crate::impls::SmtpSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuddyConfig {
    /// SQLite file holding tasks and invocations.
    pub database_path: PathBuf,
    /// Who gets reminded.
    pub recipient: Option<String>,
    /// From address for SMTP. Required when `smtp` is set.
    pub sender: Option<String>,
    /// Without SMTP settings reminders are only logged.
    pub smtp: Option<SmtpSettings>,
    pub check_retry: RetryPolicy,
    pub notify_retry: RetryPolicy,
    pub missing_task: MissingTaskPolicy,
    /// Seconds a driver holds the notify claim while sending. Longer than the
    /// SMTP timeout, or a slow send can be repeated by another driver.
    pub notify_claim_secs: u64,
    pub runner: RunnerSettings,
    pub log_format: LogFormat,
}

impl Default for BuddyConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("buddy.db"),
            recipient: None,
            sender: None,
            smtp: None,
            check_retry: RetryPolicy::default(),
            notify_retry: RetryPolicy::default(),
            missing_task: MissingTaskPolicy::default(),
            notify_claim_secs: 300,
            runner: RunnerSettings::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl BuddyConfig {
    /// File (if any), then process environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn notify_claim(&self) -> chrono::Duration {
        i64::try_from(self.notify_claim_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Overlay environment variables. `lookup` is `std::env::var` outside tests.
    ///
    /// Values that are set but cannot be used are errors, not silently skipped.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = get("BUDDY_DATABASE") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(recipient) = get("BUDDY_RECIPIENT").or_else(|| get("YOUR_EMAIL")) {
            self.recipient = Some(recipient);
        }
        if let Some(sender) = get("BUDDY_SENDER") {
            self.sender = Some(sender);
        }
        if let Some(format) = get("BUDDY_LOG_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "json" => self.log_format = LogFormat::Json,
                "pretty" => self.log_format = LogFormat::Pretty,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "BUDDY_LOG_FORMAT must be \"pretty\" or \"json\", got {other:?}"
                    )));
                }
            }
        }

        if let Some(host) = get("BUDDY_SMTP_HOST") {
            let smtp = self.smtp.get_or_insert_with(|| SmtpSettings {
                host: String::new(),
                port: 587,
                username: String::new(),
                password: String::new(),
                timeout_secs: 30,
            });
            smtp.host = host;
        }
        if let Some(smtp) = self.smtp.as_mut() {
            if let Some(port) = get("BUDDY_SMTP_PORT") {
                smtp.port = port.trim().parse().map_err(|_| {
                    ConfigError::Invalid(format!("BUDDY_SMTP_PORT {port:?} is not a port number"))
                })?;
            }
            if let Some(user) = get("BUDDY_SMTP_USER") {
                smtp.username = user;
            }
            if let Some(password) = get("BUDDY_SMTP_PASSWORD") {
                smtp.password = password;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.recipient.as_deref() {
            None => {
                return Err(ConfigError::Invalid(
                    "recipient is not set (BUDDY_RECIPIENT)".into(),
                ));
            }
            Some(r) if !r.contains('@') => {
                return Err(ConfigError::Invalid(format!(
                    "recipient {r:?} is not an email address"
                )));
            }
            Some(_) => {}
        }

        if let Some(smtp) = &self.smtp {
            if smtp.host.is_empty() {
                return Err(ConfigError::Invalid("smtp.host is empty".into()));
            }
            if self.sender.is_none() {
                return Err(ConfigError::Invalid(
                    "sender is required when smtp is configured (BUDDY_SENDER)".into(),
                ));
            }
            if self.notify_claim_secs <= smtp.timeout_secs {
                return Err(ConfigError::Invalid(format!(
                    "notify_claim_secs ({}) must exceed smtp.timeout_secs ({})",
                    self.notify_claim_secs, smtp.timeout_secs
                )));
            }
        }

        if self.notify_claim_secs == 0 {
            return Err(ConfigError::Invalid("notify_claim_secs must be >= 1".into()));
        }
        if self.runner.error_backoff_secs == 0 {
            return Err(ConfigError::Invalid(
                "runner.error_backoff_secs must be >= 1".into(),
            ));
        }

        for (name, policy) in [("check_retry", &self.check_retry), ("notify_retry", &self.notify_retry)] {
            if policy.max_attempts == 0 {
                return Err(ConfigError::Invalid(format!("{name}.max_attempts must be >= 1")));
            }
            if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
                return Err(ConfigError::Invalid(format!("{name}.multiplier must be >= 1.0")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: BuddyConfig = toml::from_str("").unwrap();
        assert_eq!(config, BuddyConfig::default());
        assert_eq!(config.database_path, PathBuf::from("buddy.db"));
        assert_eq!(config.missing_task, MissingTaskPolicy::Suppress);
    }

    #[test]
    fn parses_full_file() {
        let toml_str = r#"
            database_path = "/var/lib/buddy/buddy.db"
            recipient = "me@example.com"
            sender = "Buddy <buddy@example.com>"
            missing_task = "notify"
            log_format = "json"

            [smtp]
            host = "smtp.example.com"
            username = "buddy@example.com"
            password = "hunter2"

            [notify_retry]
            base_delay = 500
            max_attempts = 8

            [runner]
            rescan_interval_secs = 10
        "#;
        let config: BuddyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.missing_task, MissingTaskPolicy::Notify);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.smtp.as_ref().unwrap().port, 587);
        assert_eq!(config.notify_retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.notify_retry.max_attempts, 8);
        assert_eq!(config.notify_retry.multiplier, 2.0);
        assert_eq!(config.runner.rescan_interval_secs, 10);
        assert_eq!(config.runner.error_backoff_secs, 5);
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = BuddyConfig {
            recipient: Some("old@example.com".into()),
            ..BuddyConfig::default()
        };
        config
            .apply_env(env(&[
                ("BUDDY_DATABASE", "/tmp/b.db"),
                ("BUDDY_RECIPIENT", "new@example.com"),
                ("BUDDY_SENDER", "buddy@example.com"),
                ("BUDDY_SMTP_HOST", "smtp.example.com"),
                ("BUDDY_SMTP_PORT", "2525"),
                ("BUDDY_SMTP_USER", "user"),
                ("BUDDY_LOG_FORMAT", "JSON"),
            ]))
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/b.db"));
        assert_eq!(config.recipient.as_deref(), Some("new@example.com"));
        let smtp = config.smtp.as_ref().unwrap();
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, 2525);
        assert_eq!(smtp.username, "user");
        assert_eq!(config.log_format, LogFormat::Json);
        config.validate().unwrap();
    }

    #[test]
    fn your_email_is_a_fallback_recipient() {
        let mut config = BuddyConfig::default();
        config
            .apply_env(env(&[("YOUR_EMAIL", "me@example.com")]))
            .unwrap();
        assert_eq!(config.recipient.as_deref(), Some("me@example.com"));

        config
            .apply_env(env(&[
                ("BUDDY_RECIPIENT", "other@example.com"),
                ("YOUR_EMAIL", "me@example.com"),
            ]))
            .unwrap();
        assert_eq!(config.recipient.as_deref(), Some("other@example.com"));
    }

    #[test]
    fn validation_rejects_incomplete_setups() {
        let missing_recipient = BuddyConfig::default();
        assert!(matches!(missing_recipient.validate(), Err(ConfigError::Invalid(_))));

        let smtp_without_sender = BuddyConfig {
            recipient: Some("me@example.com".into()),
            smtp: Some(SmtpSettings {
                host: "smtp.example.com".into(),
                port: 587,
                username: "u".into(),
                password: "p".into(),
                timeout_secs: 30,
            }),
            ..BuddyConfig::default()
        };
        assert!(smtp_without_sender.validate().is_err());

        let zero_attempts = BuddyConfig {
            recipient: Some("me@example.com".into()),
            check_retry: RetryPolicy {
                max_attempts: 0,
                ..RetryPolicy::default()
            },
            ..BuddyConfig::default()
        };
        assert!(zero_attempts.validate().is_err());

        let spinning_runner = BuddyConfig {
            recipient: Some("me@example.com".into()),
            runner: RunnerSettings {
                error_backoff_secs: 0,
                ..RunnerSettings::default()
            },
            ..BuddyConfig::default()
        };
        assert!(matches!(spinning_runner.validate(), Err(ConfigError::Invalid(m)) if m.contains("error_backoff_secs")));
    }

    #[test]
    fn notify_claim_must_outlast_the_smtp_timeout() {
        let mut config = BuddyConfig {
            recipient: Some("me@example.com".into()),
            sender: Some("buddy@example.com".into()),
            smtp: Some(SmtpSettings {
                host: "smtp.example.com".into(),
                port: 587,
                username: "u".into(),
                password: "p".into(),
                timeout_secs: 30,
            }),
            notify_claim_secs: 30,
            ..BuddyConfig::default()
        };
        assert!(config.validate().is_err());

        config.notify_claim_secs = 31;
        config.validate().unwrap();
        assert_eq!(config.notify_claim(), chrono::Duration::seconds(31));

        config.notify_claim_secs = u64::MAX;
        assert_eq!(config.notify_claim(), chrono::Duration::MAX);
    }

    #[rstest::rstest]
    #[case::log_format(("BUDDY_LOG_FORMAT", "yaml"), "BUDDY_LOG_FORMAT")]
    #[case::smtp_port(("BUDDY_SMTP_PORT", "smtp"), "BUDDY_SMTP_PORT")]
    fn unusable_env_values_are_errors(#[case] bad: (&str, &str), #[case] named: &str) {
        let mut config = BuddyConfig::default();
        let err = config
            .apply_env(env(&[("BUDDY_SMTP_HOST", "smtp.example.com"), bad]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref m) if m.contains(named)));
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buddy.toml");
        std::fs::write(&path, "recipient = \"me@example.com\"\n").unwrap();

        let config = BuddyConfig::load_from(&path).unwrap();
        assert_eq!(config.recipient.as_deref(), Some("me@example.com"));

        let missing = BuddyConfig::load_from(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
