// Service configuration read from the environment.
//
// A `.env` file in the working directory is loaded first when present. Every key is
// optional; unset keys fall back to the defaults below.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::application::consumer::consumption_loop::ConsumerConfig;
use crate::application::relay::runner::RelayConfig;
use crate::core::retry_policy::{Backoff, RetryPolicy};

pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_CONSUMER_GROUP: &str = "outbox-subscriber";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub http_addr: SocketAddr,
    pub relay: RelayConfig,
    pub consumer_group: String,
    pub consumer_topics: Vec<String>,
    pub consumer: ConsumerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let http_addr = match lookup("HTTP_ADDR") {
            Some(value) => parse("HTTP_ADDR", value)?,
            None => default_http_addr(),
        };

        let defaults = RelayConfig::default();
        let batch_size: usize =
            optional(&lookup, "RELAY_BATCH_SIZE")?.unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            return Err(invalid("RELAY_BATCH_SIZE", "0", "must be at least 1"));
        }
        let poll_interval =
            millis(&lookup, "RELAY_POLL_INTERVAL_MS")?.unwrap_or(defaults.poll_interval);
        let failure_delay =
            millis(&lookup, "RELAY_FAILURE_DELAY_MS")?.unwrap_or(defaults.failure_delay);

        let mut retry = RetryPolicy::unbounded().with_backoff(backoff(&lookup)?);
        if let Some(max_attempts) = optional::<u32, _>(&lookup, "RELAY_MAX_ATTEMPTS")? {
            if max_attempts == 0 {
                return Err(invalid("RELAY_MAX_ATTEMPTS", "0", "must be at least 1"));
            }
            retry = retry.with_max_attempts(max_attempts);
        }

        let relay = RelayConfig::default()
            .with_batch_size(batch_size)
            .with_poll_interval(poll_interval)
            .with_failure_delay(failure_delay)
            .with_retry(retry);

        let consumer_group = lookup("CONSUMER_GROUP")
            .map(|group| group.trim().to_string())
            .filter(|group| !group.is_empty())
            .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string());

        let consumer_topics = lookup("CONSUMER_TOPICS")
            .map(|topics| {
                topics
                    .split(',')
                    .map(str::trim)
                    .filter(|topic| !topic.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let consumer = ConsumerConfig {
            failure_delay: millis(&lookup, "CONSUMER_FAILURE_DELAY_MS")?
                .unwrap_or(ConsumerConfig::default().failure_delay),
        };

        Ok(Self {
            http_addr,
            relay,
            consumer_group,
            consumer_topics,
            consumer,
        })
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn backoff<F>(lookup: &F) -> Result<Backoff, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let base = millis(lookup, "RELAY_BACKOFF_BASE_MS")?;
    let max = millis(lookup, "RELAY_BACKOFF_MAX_MS")?;
    match (base, max) {
        (None, None) => Ok(Backoff::None),
        (Some(base), None) => Ok(Backoff::Fixed(base)),
        (Some(base), Some(max)) if max < base => Err(invalid(
            "RELAY_BACKOFF_MAX_MS",
            &max.as_millis().to_string(),
            "must not be below RELAY_BACKOFF_BASE_MS",
        )),
        (Some(base), Some(max)) => Ok(Backoff::Exponential { base, max }),
        (None, Some(max)) => Err(invalid(
            "RELAY_BACKOFF_MAX_MS",
            &max.as_millis().to_string(),
            "requires RELAY_BACKOFF_BASE_MS",
        )),
    }
}

fn millis<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(optional::<u64, _>(lookup, key)?.map(Duration::from_millis))
}

fn optional<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map(|value| parse(key, value)).transpose()
}

fn parse<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value.trim().parse() {
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
