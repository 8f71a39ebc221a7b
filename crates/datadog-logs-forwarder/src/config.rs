// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use regex::Regex;

use crate::cache::lock::LockOptions;
use crate::error::ForwarderError;
use crate::tags::parse_tags;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Forwarder configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderConfig {
    /// Enrich Lambda logs with the function's resource tags
    pub fetch_lambda_tags: bool,
    /// Enrich CloudWatch logs with the log group's resource tags
    pub fetch_log_group_tags: bool,
    /// Enrich Step Functions logs with the state machine's resource tags
    pub fetch_step_functions_tags: bool,
    /// Age after which a tags cache snapshot is rebuilt
    pub tags_cache_ttl: Duration,
    /// Lifetime of a cache refresh lock
    pub cache_lock_ttl: Duration,
    pub cache_lock_max_attempts: u32,
    pub cache_lock_retry_interval: Duration,
    /// Bucket holding the tags cache snapshots and locks
    pub cache_bucket: Option<String>,
    pub cache_dirname: String,
    /// Overrides the detected source for every record
    pub source_override: Option<String>,
    /// Custom tags appended to every record
    pub custom_tags: Vec<String>,
    /// Pattern marking the first line of a multiline log
    pub multiline_log_regex_pattern: Option<String>,
    pub dogstatsd_port: u16,
    pub log_level: String,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            fetch_lambda_tags: false,
            fetch_log_group_tags: false,
            fetch_step_functions_tags: false,
            tags_cache_ttl: Duration::from_secs(3600),
            cache_lock_ttl: Duration::from_secs(60),
            cache_lock_max_attempts: 1,
            cache_lock_retry_interval: Duration::from_millis(200),
            cache_bucket: None,
            cache_dirname: "cache".to_string(),
            source_override: None,
            custom_tags: Vec::new(),
            multiline_log_regex_pattern: None,
            dogstatsd_port: 8125,
            log_level: "info".to_string(),
        }
    }
}

fn env_bool(name: &str) -> bool {
    env::var(name)
        .map(|val| val.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ForwarderError> {
    match env_non_empty(name) {
        Some(val) => val
            .parse::<T>()
            .map(Some)
            .map_err(|_| ForwarderError::InvalidConfig(format!("{name} is not a valid number: '{val}'"))),
        None => Ok(None),
    }
}

impl ForwarderConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ForwarderError> {
        let defaults = Self::default();

        let config = Self {
            fetch_lambda_tags: env_bool("DD_FETCH_LAMBDA_TAGS"),
            fetch_log_group_tags: env_bool("DD_FETCH_LOG_GROUP_TAGS"),
            fetch_step_functions_tags: env_bool("DD_FETCH_STEP_FUNCTIONS_TAGS"),
            tags_cache_ttl: env_parsed::<u64>("DD_TAGS_CACHE_TTL_SECONDS")?
                .map_or(defaults.tags_cache_ttl, Duration::from_secs),
            cache_lock_ttl: env_parsed::<u64>("DD_S3_CACHE_LOCK_TTL_SECONDS")?
                .map_or(defaults.cache_lock_ttl, Duration::from_secs),
            cache_lock_max_attempts: env_parsed::<u32>("DD_S3_CACHE_LOCK_MAX_ATTEMPTS")?
                .unwrap_or(defaults.cache_lock_max_attempts),
            cache_lock_retry_interval: env_parsed::<u64>("DD_S3_CACHE_LOCK_RETRY_INTERVAL_MS")?
                .map_or(defaults.cache_lock_retry_interval, Duration::from_millis),
            cache_bucket: env_non_empty("DD_S3_BUCKET_NAME"),
            cache_dirname: env_non_empty("DD_S3_CACHE_DIRNAME").unwrap_or(defaults.cache_dirname),
            source_override: env_non_empty("DD_SOURCE").map(|source| source.to_lowercase()),
            custom_tags: env::var("DD_TAGS")
                .map(|tags| parse_tags(&tags))
                .unwrap_or_default(),
            multiline_log_regex_pattern: env_non_empty("DD_MULTILINE_LOG_REGEX_PATTERN"),
            dogstatsd_port: env_parsed::<u16>("DD_DOGSTATSD_PORT")?
                .unwrap_or(defaults.dogstatsd_port),
            log_level: env_non_empty("DD_LOG_LEVEL")
                .map_or(defaults.log_level, |level| level.to_lowercase()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ForwarderError> {
        if self.tags_cache_ttl.is_zero() {
            return Err(ForwarderError::InvalidConfig(
                "DD_TAGS_CACHE_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.cache_lock_ttl.is_zero() {
            return Err(ForwarderError::InvalidConfig(
                "DD_S3_CACHE_LOCK_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }
        if self.cache_lock_max_attempts == 0 {
            return Err(ForwarderError::InvalidConfig(
                "DD_S3_CACHE_LOCK_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.dogstatsd_port == 0 {
            return Err(ForwarderError::InvalidConfig(
                "DogStatsD port must be greater than 0".to_string(),
            ));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ForwarderError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        self.multiline_regex()?;
        Ok(())
    }

    /// Whether any tags cache needs the object store.
    #[must_use]
    pub fn fetches_tags(&self) -> bool {
        self.fetch_lambda_tags || self.fetch_log_group_tags || self.fetch_step_functions_tags
    }

    /// Local DogStatsD listener receiving the forwarder's own metrics.
    #[must_use]
    pub fn dogstatsd_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.dogstatsd_port))
    }

    #[must_use]
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            ttl: self.cache_lock_ttl,
            max_attempts: self.cache_lock_max_attempts,
            retry_interval: self.cache_lock_retry_interval,
        }
    }

    /// Compiles the pattern marking the first line of a multiline log.
    pub fn multiline_regex(&self) -> Result<Option<Regex>, ForwarderError> {
        self.multiline_log_regex_pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    ForwarderError::InvalidConfig(format!(
                        "Invalid DD_MULTILINE_LOG_REGEX_PATTERN '{pattern}': {e}"
                    ))
                })
            })
            .transpose()
    }
}
