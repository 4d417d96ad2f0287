// src/config.rs

//! Configuration types for the usage gate

// dependencies
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::errors::GateError;

const ENV_PREFIX: &str = "USAGE_GATE_";

/// Longest block the detector will impose.
pub const MAX_BLOCK_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Limits and timings for abuse detection.
#[derive(Debug, Clone)]
pub struct AbuseConfig {
    pub(crate) max_requests_per_minute: usize,
    pub(crate) max_requests_per_hour: usize,
    pub(crate) max_message_length: usize,
    pub(crate) block_duration: Duration,
    pub(crate) suspicious_keywords: Vec<String>,
    pub(crate) suspicious_strikes: usize,
    pub(crate) spam_repeat_threshold: usize,
    pub(crate) max_recent_messages: usize,
    pub(crate) max_suspicious_entries: usize,
    pub(crate) sweep_interval: Duration,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 10,
            max_requests_per_hour: 100,
            max_message_length: 2000,
            block_duration: Duration::from_secs(30 * 60),
            suspicious_keywords: default_keywords(),
            suspicious_strikes: 3,
            spam_repeat_threshold: 4,
            max_recent_messages: 100,
            max_suspicious_entries: 50,
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

fn default_keywords() -> Vec<String> {
    [
        "hack",
        "exploit",
        "bypass",
        "jailbreak",
        "ignore previous instructions",
        "system prompt",
        "crack",
        "malware",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl AbuseConfig {
    /// Builder-style: requests allowed in any rolling minute
    pub fn max_requests_per_minute(mut self, limit: usize) -> Self {
        self.max_requests_per_minute = limit;
        self
    }

    /// Builder-style: requests allowed in any rolling hour
    pub fn max_requests_per_hour(mut self, limit: usize) -> Self {
        self.max_requests_per_hour = limit;
        self
    }

    /// Builder-style: longest accepted message, in characters
    pub fn max_message_length(mut self, length: usize) -> Self {
        self.max_message_length = length;
        self
    }

    /// Builder-style: how long a triggered block lasts
    pub fn block_duration(mut self, duration: Duration) -> Self {
        self.block_duration = duration;
        self
    }

    /// Builder-style: replace the suspicious keyword list (matched case-insensitively)
    pub fn suspicious_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suspicious_keywords = keywords
            .into_iter()
            .map(|k| k.into().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        self
    }

    /// Builder-style: interval of the background window sweep
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), GateError> {
        if self.max_message_length == 0 {
            return Err(GateError::InvalidConfig("max_message_length must be positive"));
        }
        if self.block_duration.is_zero() {
            return Err(GateError::InvalidConfig("block_duration must be positive"));
        }
        if self.block_duration > MAX_BLOCK_DURATION {
            return Err(GateError::InvalidConfig("block_duration must not exceed seven days"));
        }
        if self.sweep_interval.is_zero() {
            return Err(GateError::InvalidConfig("sweep_interval must be positive"));
        }
        if self.max_recent_messages == 0 || self.max_suspicious_entries == 0 {
            return Err(GateError::InvalidConfig("history caps must be positive"));
        }
        if self.suspicious_strikes == 0 || self.spam_repeat_threshold == 0 {
            return Err(GateError::InvalidConfig("strike thresholds must be positive"));
        }
        Ok(())
    }
}

/// Free-tier limits and flush behaviour.
#[derive(Debug, Clone)]
pub struct UsageConfig {
    pub(crate) free_daily_limit: u64,
    pub(crate) free_monthly_limit: u64,
    pub(crate) flush_interval: Duration,
    pub(crate) max_delta_cache_size: usize,
    pub(crate) flush_timeout: Duration,
    pub(crate) lookup_timeout: Duration,
    pub(crate) snapshot_max_age: Duration,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            free_daily_limit: 5,
            free_monthly_limit: 150,
            flush_interval: Duration::from_secs(30),
            max_delta_cache_size: 500,
            flush_timeout: Duration::from_secs(10),
            lookup_timeout: Duration::from_secs(2),
            snapshot_max_age: Duration::from_secs(60 * 60),
        }
    }
}

impl UsageConfig {
    /// Builder-style: free messages per day
    pub fn free_daily_limit(mut self, limit: u64) -> Self {
        self.free_daily_limit = limit;
        self
    }

    /// Builder-style: free messages per month
    pub fn free_monthly_limit(mut self, limit: u64) -> Self {
        self.free_monthly_limit = limit;
        self
    }

    /// Builder-style: periodic flush interval
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Builder-style: distinct pending users that trigger an early flush
    pub fn max_delta_cache_size(mut self, size: usize) -> Self {
        self.max_delta_cache_size = size;
        self
    }

    /// Builder-style: bound on a single batch-apply call
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Builder-style: bound on subscription and usage lookups
    pub fn lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), GateError> {
        if self.flush_interval.is_zero() {
            return Err(GateError::InvalidConfig("flush_interval must be positive"));
        }
        if self.max_delta_cache_size == 0 {
            return Err(GateError::InvalidConfig("max_delta_cache_size must be positive"));
        }
        if self.flush_timeout.is_zero() || self.lookup_timeout.is_zero() {
            return Err(GateError::InvalidConfig("timeouts must be positive"));
        }
        Ok(())
    }
}

/// Complete gate configuration.
#[derive(Debug, Clone, Default)]
pub struct GateConfig {
    pub abuse: AbuseConfig,
    pub usage: UsageConfig,
}

impl GateConfig {
    pub fn new(abuse: AbuseConfig, usage: UsageConfig) -> Self {
        Self { abuse, usage }
    }

    pub fn validate(&self) -> Result<(), GateError> {
        self.abuse.validate()?;
        self.usage.validate()
    }

    /// Load configuration from `USAGE_GATE_*` environment variables.
    ///
    /// Unset variables keep their default. Unparseable or out-of-range values
    /// are logged and also keep their default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let abuse = &mut config.abuse;
        let usage = &mut config.usage;

        read_positive(&lookup, "MAX_REQUESTS_PER_MINUTE", &mut abuse.max_requests_per_minute);
        read_positive(&lookup, "MAX_REQUESTS_PER_HOUR", &mut abuse.max_requests_per_hour);
        read_positive(&lookup, "MAX_MESSAGE_LENGTH", &mut abuse.max_message_length);

        let default_minutes = abuse.block_duration.as_secs() / 60;
        let mut block_minutes = default_minutes;
        read_positive(&lookup, "BLOCK_DURATION_MINUTES", &mut block_minutes);
        match block_minutes.checked_mul(60).map(Duration::from_secs) {
            Some(duration) if duration <= MAX_BLOCK_DURATION => abuse.block_duration = duration,
            _ => warn!(
                env_var = "USAGE_GATE_BLOCK_DURATION_MINUTES",
                value = block_minutes,
                default = default_minutes,
                "Block duration exceeds seven days, using default"
            ),
        }

        if let Some(raw) = lookup(&format!("{ENV_PREFIX}SUSPICIOUS_KEYWORDS")) {
            let keywords: Vec<String> = raw
                .split(',')
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
            if keywords.is_empty() {
                warn!(
                    env_var = "USAGE_GATE_SUSPICIOUS_KEYWORDS",
                    "Empty keyword list, using defaults"
                );
            } else {
                abuse.suspicious_keywords = keywords;
            }
        }

        // zero is a legitimate free allowance (no free tier), so these skip the positivity check
        read_value(&lookup, "FREE_DAILY_LIMIT", &mut usage.free_daily_limit);
        read_value(&lookup, "FREE_MONTHLY_LIMIT", &mut usage.free_monthly_limit);

        let mut flush_ms = usage.flush_interval.as_millis() as u64;
        read_positive(&lookup, "FLUSH_INTERVAL_MS", &mut flush_ms);
        usage.flush_interval = Duration::from_millis(flush_ms);

        read_positive(&lookup, "MAX_DELTA_CACHE_SIZE", &mut usage.max_delta_cache_size);

        config
    }
}

fn read_value<F, T>(lookup: &F, name: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display,
{
    let key = format!("{ENV_PREFIX}{name}");
    if let Some(raw) = lookup(&key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!(
                env_var = %key,
                value = %raw,
                default = %slot,
                "Invalid value for environment variable, using default"
            ),
        }
    }
}

fn read_positive<F, T>(lookup: &F, name: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy + std::fmt::Display + PartialOrd + Default,
{
    let before = *slot;
    read_value(lookup, name, slot);
    if *slot <= T::default() {
        let key = format!("{ENV_PREFIX}{name}");
        warn!(
            env_var = %key,
            default = %before,
            "Value must be positive, using default"
        );
        *slot = before;
    }
}
