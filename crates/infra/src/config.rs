//! Actualizer configuration.
//!
//! Durations are expressed in milliseconds when deserialized or read from the
//! environment. A zero value means "unset" and falls back to the default.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;

pub const DEFAULT_INTENTS_LIMIT: usize = 100;
pub const DEFAULT_BUNDLES_LIMIT: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_FLUSH_POSITION_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(180);
pub const DEFAULT_READ_BATCH_SIZE: usize = 50;
pub const DEFAULT_CHANNEL_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);
pub const DEFAULT_ACTUALIZER_ENGINES: usize = 10;

/// Environment variable prefix read by [`ActualizerConfig::from_env`].
pub const ENV_PREFIX: &str = "STRATA_ACTUALIZER_";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {variable}: {value:?} ({reason})")]
    InvalidValue {
        variable: String,
        value: String,
        reason: String,
    },
}

/// Tuning knobs shared by the async and sync actualizers of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActualizerConfig {
    /// Max intents one projector invocation may stage
    pub intents_limit: usize,
    /// Max staged records before a bundle is flushed
    pub bundles_limit: usize,
    /// Idle flush period of a non-empty bundle
    #[serde(with = "millis")]
    pub flush_interval: Duration,
    /// Max age of the stored offset under non-accepting traffic
    #[serde(with = "millis")]
    pub flush_position_interval: Duration,
    #[serde(with = "millis")]
    pub retry_initial_delay: Duration,
    #[serde(with = "millis")]
    pub retry_max_delay: Duration,
    /// Events read per partition borrow
    pub read_batch_size: usize,
    /// Lifetime of the notification channel of an actualizer
    #[serde(with = "millis")]
    pub channel_ttl: Duration,
    /// Actualizer engines per partition
    pub actualizer_engines: usize,
}

impl Default for ActualizerConfig {
    fn default() -> Self {
        Self {
            intents_limit: DEFAULT_INTENTS_LIMIT,
            bundles_limit: DEFAULT_BUNDLES_LIMIT,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_position_interval: DEFAULT_FLUSH_POSITION_INTERVAL,
            retry_initial_delay: DEFAULT_RETRY_INITIAL_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            read_batch_size: DEFAULT_READ_BATCH_SIZE,
            channel_ttl: DEFAULT_CHANNEL_TTL,
            actualizer_engines: DEFAULT_ACTUALIZER_ENGINES,
        }
    }
}

impl ActualizerConfig {
    /// Defaults, overridden by any `STRATA_ACTUALIZER_*` variable that is set.
    ///
    /// Recognised: `INTENTS_LIMIT`, `BUNDLES_LIMIT`, `FLUSH_INTERVAL_MS`,
    /// `FLUSH_POSITION_INTERVAL_MS`, `RETRY_INITIAL_DELAY_MS`,
    /// `RETRY_MAX_DELAY_MS`, `READ_BATCH_SIZE`, `CHANNEL_TTL_MS`,
    /// `ENGINES`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let read = |suffix: &str| -> Result<Option<u64>, ConfigError> {
            let variable = format!("{ENV_PREFIX}{suffix}");
            let Some(value) = lookup(&variable) else {
                return Ok(None);
            };
            value
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|err| ConfigError::InvalidValue {
                    variable,
                    value,
                    reason: err.to_string(),
                })
        };

        if let Some(v) = read("INTENTS_LIMIT")? {
            config.intents_limit = v as usize;
        }
        if let Some(v) = read("BUNDLES_LIMIT")? {
            config.bundles_limit = v as usize;
        }
        if let Some(v) = read("FLUSH_INTERVAL_MS")? {
            config.flush_interval = Duration::from_millis(v);
        }
        if let Some(v) = read("FLUSH_POSITION_INTERVAL_MS")? {
            config.flush_position_interval = Duration::from_millis(v);
        }
        if let Some(v) = read("RETRY_INITIAL_DELAY_MS")? {
            config.retry_initial_delay = Duration::from_millis(v);
        }
        if let Some(v) = read("RETRY_MAX_DELAY_MS")? {
            config.retry_max_delay = Duration::from_millis(v);
        }
        if let Some(v) = read("READ_BATCH_SIZE")? {
            config.read_batch_size = v as usize;
        }
        if let Some(v) = read("CHANNEL_TTL_MS")? {
            config.channel_ttl = Duration::from_millis(v);
        }
        if let Some(v) = read("ENGINES")? {
            config.actualizer_engines = v as usize;
        }
        Ok(config.normalized())
    }

    /// Replace zero values with the defaults.
    pub fn normalized(self) -> Self {
        fn or_default<T: PartialEq + Default>(value: T, default: T) -> T {
            if value == T::default() { default } else { value }
        }

        let mut config = Self {
            intents_limit: or_default(self.intents_limit, DEFAULT_INTENTS_LIMIT),
            bundles_limit: or_default(self.bundles_limit, DEFAULT_BUNDLES_LIMIT),
            flush_interval: or_default(self.flush_interval, DEFAULT_FLUSH_INTERVAL),
            flush_position_interval: or_default(
                self.flush_position_interval,
                DEFAULT_FLUSH_POSITION_INTERVAL,
            ),
            retry_initial_delay: or_default(self.retry_initial_delay, DEFAULT_RETRY_INITIAL_DELAY),
            retry_max_delay: or_default(self.retry_max_delay, DEFAULT_RETRY_MAX_DELAY),
            read_batch_size: or_default(self.read_batch_size, DEFAULT_READ_BATCH_SIZE),
            channel_ttl: or_default(self.channel_ttl, DEFAULT_CHANNEL_TTL),
            actualizer_engines: or_default(self.actualizer_engines, DEFAULT_ACTUALIZER_ENGINES),
        };
        if config.retry_max_delay < config.retry_initial_delay {
            config.retry_max_delay = config.retry_initial_delay;
        }
        config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.retry_initial_delay, self.retry_max_delay)
    }

    pub fn with_intents_limit(mut self, limit: usize) -> Self {
        self.intents_limit = limit;
        self
    }

    pub fn with_bundles_limit(mut self, limit: usize) -> Self {
        self.bundles_limit = limit;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_flush_position_interval(mut self, interval: Duration) -> Self {
        self.flush_position_interval = interval;
        self
    }

    pub fn with_retry_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial_delay = initial;
        self.retry_max_delay = max;
        self
    }

    pub fn with_read_batch_size(mut self, size: usize) -> Self {
        self.read_batch_size = size;
        self
    }

    pub fn with_channel_ttl(mut self, ttl: Duration) -> Self {
        self.channel_ttl = ttl;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
