//! Admission configuration.
//!
//! Values come from `WAITROOM_*` environment variables with defaults, or are
//! built directly by embedders and tests.

use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;

pub const ENV_CAPACITY_LIMIT: &str = "WAITROOM_CAPACITY_LIMIT";
pub const ENV_ACTIVITY_SECONDS: &str = "WAITROOM_ACTIVITY_SECONDS";
pub const ENV_EXPIRATION_SECONDS: &str = "WAITROOM_EXPIRATION_SECONDS";
pub const ENV_ROLLING_EXPIRATION: &str = "WAITROOM_ROLLING_EXPIRATION";
pub const ENV_REFRESH_QUEUED_ON_POLL: &str = "WAITROOM_REFRESH_QUEUED_ON_POLL";
pub const ENV_KEEP_IDLE_SLOTS: &str = "WAITROOM_KEEP_IDLE_SLOTS";
pub const ENV_CLEANUP_INTERVAL_SECONDS: &str = "WAITROOM_CLEANUP_INTERVAL_SECONDS";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
    #[error("{name} is too large to be represented as a time span")]
    OutOfRange { name: &'static str },
}

/// Per-controller admission policy. Immutable once a controller is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Maximum number of concurrently active tickets. Zero queues everyone.
    pub capacity_limit: usize,
    /// A ticket holder not seen within this window no longer occupies a slot.
    pub activity_window: Duration,
    /// Ticket lifetime from grant (or from the latest renewal when rolling).
    pub expiration: Duration,
    /// Push a valid ticket's expiry forward on every successful request.
    pub rolling_expiration: bool,
    /// Refresh a queued caller's activity when it re-polls its position.
    pub refresh_queued_on_poll: bool,
    /// Renew any unexpired ticket, even one whose idle slot has since been
    /// handed to a queued caller. Turning this off queues such a holder
    /// instead, so active tickets never exceed `capacity_limit`.
    pub keep_idle_slots: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity_limit: 100,
            activity_window: Duration::from_secs(60),
            expiration: Duration::from_secs(300),
            rolling_expiration: true,
            refresh_queued_on_poll: true,
            keep_idle_slots: true,
        }
    }
}

impl AdmissionConfig {
    /// Read configuration from the environment, falling back to defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            capacity_limit: parse_var(&lookup, ENV_CAPACITY_LIMIT, defaults.capacity_limit)?,
            activity_window: Duration::from_secs(parse_var(
                &lookup,
                ENV_ACTIVITY_SECONDS,
                defaults.activity_window.as_secs(),
            )?),
            expiration: Duration::from_secs(parse_var(
                &lookup,
                ENV_EXPIRATION_SECONDS,
                defaults.expiration.as_secs(),
            )?),
            rolling_expiration: parse_bool(
                &lookup,
                ENV_ROLLING_EXPIRATION,
                defaults.rolling_expiration,
            )?,
            refresh_queued_on_poll: parse_bool(
                &lookup,
                ENV_REFRESH_QUEUED_ON_POLL,
                defaults.refresh_queued_on_poll,
            )?,
            keep_idle_slots: parse_bool(&lookup, ENV_KEEP_IDLE_SLOTS, defaults.keep_idle_slots)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_capacity_limit(mut self, capacity_limit: usize) -> Self {
        self.capacity_limit = capacity_limit;
        self
    }

    pub fn with_activity_window(mut self, window: Duration) -> Self {
        self.activity_window = window;
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_rolling_expiration(mut self, rolling: bool) -> Self {
        self.rolling_expiration = rolling;
        self
    }

    pub fn with_refresh_queued_on_poll(mut self, refresh: bool) -> Self {
        self.refresh_queued_on_poll = refresh;
        self
    }

    pub fn with_keep_idle_slots(mut self, keep: bool) -> Self {
        self.keep_idle_slots = keep;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.windows().map(|_| ())
    }

    /// The activity window and expiration as signed spans for instant arithmetic.
    pub(crate) fn windows(&self) -> Result<Windows, ConfigError> {
        Ok(Windows {
            activity: to_span(ENV_ACTIVITY_SECONDS, self.activity_window)?,
            expiration: to_span(ENV_EXPIRATION_SECONDS, self.expiration)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Windows {
    pub activity: TimeDelta,
    pub expiration: TimeDelta,
}

/// Interval between expired-ticket sweeps.
pub fn cleanup_interval_from_env() -> Result<Duration, ConfigError> {
    cleanup_interval_from_lookup(|name| std::env::var(name).ok())
}

pub fn cleanup_interval_from_lookup<F>(lookup: F) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_var(&lookup, ENV_CLEANUP_INTERVAL_SECONDS, 10)?;
    if secs == 0 {
        return Err(ConfigError::Zero {
            name: ENV_CLEANUP_INTERVAL_SECONDS,
        });
    }
    Ok(Duration::from_secs(secs))
}

fn to_span(name: &'static str, duration: Duration) -> Result<TimeDelta, ConfigError> {
    if duration.is_zero() {
        return Err(ConfigError::Zero { name });
    }
    TimeDelta::from_std(duration).map_err(|_| ConfigError::OutOfRange { name })
}

fn parse_var<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn parse_bool<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = AdmissionConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, AdmissionConfig::default());
    }

    #[test]
    fn reads_all_variables() {
        let config = AdmissionConfig::from_lookup(lookup_from(&[
            (ENV_CAPACITY_LIMIT, "5"),
            (ENV_ACTIVITY_SECONDS, "1"),
            (ENV_EXPIRATION_SECONDS, " 5 "),
            (ENV_ROLLING_EXPIRATION, "false"),
            (ENV_REFRESH_QUEUED_ON_POLL, "off"),
            (ENV_KEEP_IDLE_SLOTS, "no"),
        ]))
        .unwrap();

        assert_eq!(config.capacity_limit, 5);
        assert_eq!(config.activity_window, Duration::from_secs(1));
        assert_eq!(config.expiration, Duration::from_secs(5));
        assert!(!config.rolling_expiration);
        assert!(!config.refresh_queued_on_poll);
        assert!(!config.keep_idle_slots);
    }

    #[test]
    fn rejects_unparseable_number() {
        let err = AdmissionConfig::from_lookup(lookup_from(&[(ENV_CAPACITY_LIMIT, "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: ENV_CAPACITY_LIMIT,
                ..
            }
        ));
    }

    #[test]
    fn rejects_unparseable_bool() {
        let err = AdmissionConfig::from_lookup(lookup_from(&[(ENV_ROLLING_EXPIRATION, "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_ROLLING_EXPIRATION));
    }

    #[test]
    fn rejects_zero_windows() {
        let err = AdmissionConfig::from_lookup(lookup_from(&[(ENV_ACTIVITY_SECONDS, "0")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Zero {
                name: ENV_ACTIVITY_SECONDS
            }
        );
    }

    #[test]
    fn rejects_unrepresentable_expiration() {
        let config = AdmissionConfig::default().with_expiration(Duration::from_secs(u64::MAX));
        assert_eq!(
            config.validate(),
            Err(ConfigError::OutOfRange {
                name: ENV_EXPIRATION_SECONDS
            })
        );
    }

    #[test]
    fn zero_capacity_is_allowed() {
        let config = AdmissionConfig::default().with_capacity_limit(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cleanup_interval_defaults_and_rejects_zero() {
        assert_eq!(
            cleanup_interval_from_lookup(|_| None).unwrap(),
            Duration::from_secs(10)
        );
        assert!(
            cleanup_interval_from_lookup(lookup_from(&[(ENV_CLEANUP_INTERVAL_SECONDS, "0")]))
                .is_err()
        );
    }
}
