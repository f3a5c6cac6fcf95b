//! Configuration management

use crate::dispatcher::{BatchLimits, DispatcherConfig};
use crate::normalizer::{NormalizerConfig, PathCasing, PayloadPolicy, DEFAULT_TIME_FORMAT};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "CDC_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment error: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Transformer settings, read from `CDC_`-prefixed environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// SNS topic ARN events are published to (`CDC_EVENT_BUS`)
    pub event_bus: String,
    #[serde(default = "default_time_format")]
    pub time_format: String,
    #[serde(default)]
    pub path_casing: PathCasing,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_invocation_timeout_ms")]
    pub invocation_timeout_ms: u64,
    #[serde(default = "default_max_batch_entries")]
    pub max_batch_entries: usize,
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,
    /// Carry the post-change image as the event body
    #[serde(default)]
    pub include_payload: bool,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_time_format() -> String {
    DEFAULT_TIME_FORMAT.to_string()
}

fn default_publish_timeout_ms() -> u64 {
    5_000
}

fn default_invocation_timeout_ms() -> u64 {
    30_000
}

fn default_max_batch_entries() -> usize {
    crate::dispatcher::batching::SNS_MAX_BATCH_ENTRIES
}

fn default_max_batch_bytes() -> usize {
    crate::dispatcher::batching::SNS_MAX_BATCH_BYTES
}

fn default_service_name() -> String {
    "cdc-event-transformer".to_string()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Load from an explicit set of variables (names include the `CDC_` prefix)
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Config = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.event_bus.trim().is_empty() {
            return Err(ConfigError::Invalid("CDC_EVENT_BUS must not be empty".to_string()));
        }
        if self.time_format.trim().is_empty() {
            return Err(ConfigError::Invalid("CDC_TIME_FORMAT must not be empty".to_string()));
        }
        if self.publish_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "CDC_PUBLISH_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn normalizer_config(&self) -> NormalizerConfig {
        NormalizerConfig {
            time_format: self.time_format.clone(),
            path_casing: self.path_casing,
            payload_policy: if self.include_payload {
                PayloadPolicy::AfterImage
            } else {
                PayloadPolicy::Omit
            },
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            topic: self.event_bus.clone(),
            limits: BatchLimits::clamped(self.max_batch_entries, self.max_batch_bytes),
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
        }
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_millis(self.invocation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config =
            Config::from_vars(vars(&[("CDC_EVENT_BUS", "arn:aws:sns:us-east-1:1:events")]))
                .unwrap();

        assert_eq!(config.time_format, DEFAULT_TIME_FORMAT);
        assert_eq!(config.path_casing, PathCasing::Kebab);
        assert!(!config.include_payload);
        assert_eq!(config.service_name, "cdc-event-transformer");

        let dispatcher = config.dispatcher_config();
        assert_eq!(dispatcher.topic, "arn:aws:sns:us-east-1:1:events");
        assert_eq!(dispatcher.limits, BatchLimits::default());
        assert_eq!(dispatcher.publish_timeout, Duration::from_secs(5));
        assert_eq!(config.invocation_timeout(), Duration::from_secs(30));
        assert_eq!(config.normalizer_config().payload_policy, PayloadPolicy::Omit);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_vars(vars(&[
            ("CDC_EVENT_BUS", "topic"),
            ("CDC_TIME_FORMAT", "%d/%m/%Y %H:%M"),
            ("CDC_PATH_CASING", "snake"),
            ("CDC_PUBLISH_TIMEOUT_MS", "250"),
            ("CDC_MAX_BATCH_ENTRIES", "40"),
            ("CDC_MAX_BATCH_BYTES", "1024"),
            ("CDC_INCLUDE_PAYLOAD", "true"),
            ("UNRELATED", "ignored"),
        ]))
        .unwrap();

        let normalizer = config.normalizer_config();
        assert_eq!(normalizer.time_format, "%d/%m/%Y %H:%M");
        assert_eq!(normalizer.path_casing, PathCasing::Snake);
        assert_eq!(normalizer.payload_policy, PayloadPolicy::AfterImage);

        let dispatcher = config.dispatcher_config();
        assert_eq!(dispatcher.limits, BatchLimits::clamped(10, 1024));
        assert_eq!(dispatcher.publish_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_event_bus_is_fatal() {
        assert!(matches!(
            Config::from_vars(vars(&[])),
            Err(ConfigError::Env(_))
        ));
        assert!(matches!(
            Config::from_vars(vars(&[("CDC_EVENT_BUS", "  ")])),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let result = Config::from_vars(vars(&[
            ("CDC_EVENT_BUS", "topic"),
            ("CDC_PUBLISH_TIMEOUT_MS", "soon"),
        ]));
        assert!(matches!(result, Err(ConfigError::Env(_))));
    }
}
