//! Configuration types.
//!
//! Everything is read from `NC_FOLLOWUP_*` environment variables with
//! defaults matching the stock CRM pipeline names.

use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;

use crate::error::ConfigError;

pub const DEFAULT_NC_STAGE: &str = "Not Connected (NC)";
pub const DEFAULT_COLD_STAGE: &str = "Cold Lead";
pub const DEFAULT_REENGAGED_STAGE: &str = "Email Re-engaged";
pub const DEFAULT_CHANNEL_MARKER: &str = "WhatsApp Message:";
/// Daily at 06:00 local time (sec min hour dom month dow).
pub const DEFAULT_SWEEP_SCHEDULE: &str = "0 0 6 * * *";

/// Display names of the pipeline stages the follow-up flow depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageNames {
    pub not_connected: String,
    pub cold: String,
    pub reengaged: String,
}

impl Default for StageNames {
    fn default() -> Self {
        Self {
            not_connected: DEFAULT_NC_STAGE.to_string(),
            cold: DEFAULT_COLD_STAGE.to_string(),
            reengaged: DEFAULT_REENGAGED_STAGE.to_string(),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct FollowupConfig {
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Port for the HTTP integration surface.
    pub http_port: u16,
    /// Cron expression driving the periodic sweep.
    pub sweep_schedule: String,
    pub stage_names: StageNames,
    /// Literal substring identifying a message from the tracked channel.
    pub channel_marker: String,
    /// Create the three follow-up stages on startup if they are missing.
    pub seed_stages: bool,
    /// Directory for daily-rolling log files. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for FollowupConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/nc-followup.db"),
            http_port: 8080,
            sweep_schedule: DEFAULT_SWEEP_SCHEDULE.to_string(),
            stage_names: StageNames::default(),
            channel_marker: DEFAULT_CHANNEL_MARKER.to_string(),
            seed_stages: false,
            log_dir: None,
        }
    }
}

impl FollowupConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let http_port = match lookup("NC_FOLLOWUP_HTTP_PORT") {
            Some(raw) => parse_value("NC_FOLLOWUP_HTTP_PORT", &raw)?,
            None => defaults.http_port,
        };

        let sweep_schedule =
            lookup("NC_FOLLOWUP_SWEEP_SCHEDULE").unwrap_or(defaults.sweep_schedule);
        parse_schedule(&sweep_schedule)?;

        let seed_stages = match lookup("NC_FOLLOWUP_SEED_STAGES") {
            Some(raw) => parse_flag("NC_FOLLOWUP_SEED_STAGES", &raw)?,
            None => defaults.seed_stages,
        };

        let channel_marker = lookup("NC_FOLLOWUP_CHANNEL_MARKER")
            .filter(|m| !m.is_empty())
            .unwrap_or(defaults.channel_marker);

        Ok(Self {
            db_path: lookup("NC_FOLLOWUP_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            http_port,
            sweep_schedule,
            stage_names: StageNames {
                not_connected: lookup("NC_FOLLOWUP_STAGE_NOT_CONNECTED")
                    .unwrap_or(defaults.stage_names.not_connected),
                cold: lookup("NC_FOLLOWUP_STAGE_COLD").unwrap_or(defaults.stage_names.cold),
                reengaged: lookup("NC_FOLLOWUP_STAGE_REENGAGED")
                    .unwrap_or(defaults.stage_names.reengaged),
            },
            channel_marker,
            seed_stages,
            log_dir: lookup("NC_FOLLOWUP_LOG_DIR").map(PathBuf::from),
        })
    }
}

/// Outbound SMTP settings. Absent when `SMTP_HOST` is unset.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl MailConfig {
    /// Build config from environment variables.
    /// Returns `Ok(None)` if `SMTP_HOST` is not set (immediate delivery disabled).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(smtp_host) = lookup("SMTP_HOST") else {
            return Ok(None);
        };

        let smtp_port = match lookup("SMTP_PORT") {
            Some(raw) => parse_value("SMTP_PORT", &raw)?,
            None => 587,
        };

        let username = lookup("SMTP_USERNAME").unwrap_or_default();
        let password = SecretString::from(lookup("SMTP_PASSWORD").unwrap_or_default());
        let from_address = lookup("SMTP_FROM_ADDRESS")
            .or_else(|| (!username.is_empty()).then(|| username.clone()))
            .ok_or_else(|| ConfigError::MissingEnvVar("SMTP_FROM_ADDRESS".into()))?;

        Ok(Some(Self {
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
        }))
    }
}

/// Parse a 6-field cron expression (sec min hour dom month dow).
pub fn parse_schedule(expr: &str) -> Result<cron::Schedule, ConfigError> {
    cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
        key: "NC_FOLLOWUP_SWEEP_SCHEDULE".into(),
        message: format!("invalid cron expression '{expr}': {e}"),
    })
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = FollowupConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.sweep_schedule, DEFAULT_SWEEP_SCHEDULE);
        assert_eq!(config.stage_names, StageNames::default());
        assert_eq!(config.channel_marker, "WhatsApp Message:");
        assert!(!config.seed_stages);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn overrides_stage_names_and_port() {
        let config = FollowupConfig::from_lookup(lookup_from(&[
            ("NC_FOLLOWUP_HTTP_PORT", "9100"),
            ("NC_FOLLOWUP_STAGE_COLD", "Frozen"),
            ("NC_FOLLOWUP_SEED_STAGES", "yes"),
        ]))
        .unwrap();
        assert_eq!(config.http_port, 9100);
        assert_eq!(config.stage_names.cold, "Frozen");
        assert_eq!(config.stage_names.not_connected, DEFAULT_NC_STAGE);
        assert!(config.seed_stages);
    }

    #[test]
    fn rejects_bad_port() {
        let err = FollowupConfig::from_lookup(lookup_from(&[("NC_FOLLOWUP_HTTP_PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "NC_FOLLOWUP_HTTP_PORT"));
    }

    #[test]
    fn rejects_bad_cron() {
        let err = FollowupConfig::from_lookup(lookup_from(&[(
            "NC_FOLLOWUP_SWEEP_SCHEDULE",
            "every day",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("NC_FOLLOWUP_SWEEP_SCHEDULE"));
    }

    #[test]
    fn empty_marker_falls_back_to_default() {
        let config =
            FollowupConfig::from_lookup(lookup_from(&[("NC_FOLLOWUP_CHANNEL_MARKER", "")])).unwrap();
        assert_eq!(config.channel_marker, DEFAULT_CHANNEL_MARKER);
    }

    #[test]
    fn mail_disabled_without_host() {
        assert!(MailConfig::from_lookup(lookup_from(&[])).unwrap().is_none());
    }

    #[test]
    fn mail_from_defaults_to_username() {
        let mail = MailConfig::from_lookup(lookup_from(&[
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_USERNAME", "sales@example.com"),
            ("SMTP_PASSWORD", "hunter2"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(mail.smtp_port, 587);
        assert_eq!(mail.from_address, "sales@example.com");
        assert_eq!(mail.password.expose_secret(), "hunter2");
    }

    #[test]
    fn mail_requires_some_from_address() {
        let err = MailConfig::from_lookup(lookup_from(&[("SMTP_HOST", "smtp.example.com")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }
}
