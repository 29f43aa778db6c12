// Copyright 2024-Present The cloudfront-shipper Authors
// SPDX-License-Identifier: Apache-2.0

use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_GRAPHITE_PORT, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_IP_MASK, DEFAULT_MAX_FILES,
    DEFAULT_MAX_LINES, DEFAULT_SHIP_INTERVAL_MS,
};
use crate::deletion::OperatingMode;
use crate::shipper::ShipperConfig;
use crate::source::ListFilter;
use crate::stream::{IpScrubber, StreamGrouper};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where the log objects live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    S3 {
        bucket: String,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
    },
    Local {
        dir: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphiteConfig {
    pub host: String,
    pub port: u16,
    pub prefix: Option<String>,
}

/// Configuration for one shipping run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Loki push endpoint, e.g. `http://loki:3100/loki/api/v1/push`
    pub loki_push_url: String,
    /// Records held in memory before a flush
    pub max_lines: usize,
    /// Records per push request
    pub max_chunk_lines: usize,
    /// Log files considered per run
    pub max_files: usize,
    pub distributions: Option<BTreeSet<String>>,
    /// Leave today's files alone until the day is over
    pub stop_before_today: bool,
    pub mode: OperatingMode,
    pub ship_interval: Duration,
    pub http_timeout: Duration,
    /// Replacement for client IPs, when scrubbing is enabled
    pub ip_mask: Option<String>,
    pub source: SourceConfig,
    pub graphite: Option<GraphiteConfig>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            loki_push_url: "http://localhost:3100/loki/api/v1/push".to_string(),
            max_lines: DEFAULT_MAX_LINES,
            max_chunk_lines: DEFAULT_MAX_LINES,
            max_files: DEFAULT_MAX_FILES,
            distributions: None,
            stop_before_today: false,
            mode: OperatingMode::DryRun,
            ship_interval: Duration::from_millis(DEFAULT_SHIP_INTERVAL_MS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            ip_mask: None,
            source: SourceConfig::Local {
                dir: PathBuf::from("."),
            },
            graphite: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let loki_push_url =
            env::var("LOKI_PUSH_URL").map_err(|_| ConfigError::Missing("LOKI_PUSH_URL"))?;
        let max_lines = parse_var("MAX_LINES", DEFAULT_MAX_LINES)?;
        let max_chunk_lines = parse_var("MAX_CHUNK_LINES", max_lines)?;
        let max_files = parse_var("MAX_FILES", DEFAULT_MAX_FILES)?;
        let distributions = env::var("DISTRIBUTIONS").ok().and_then(|val| {
            let set: BTreeSet<String> = val
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect();
            (!set.is_empty()).then_some(set)
        });
        let stop_before_today = bool_var("STOP_BEFORE_TODAY");
        let stage = env::var("STAGE").map(|val| val.to_lowercase()).unwrap_or_default();
        let mode = if stage == "prod" {
            OperatingMode::Production
        } else {
            OperatingMode::DryRun
        };
        let ship_interval =
            Duration::from_millis(parse_var("SHIP_INTERVAL_MS", DEFAULT_SHIP_INTERVAL_MS)?);
        let http_timeout =
            Duration::from_secs(parse_var("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?);
        let ip_mask = bool_var("SCRUB_CLIENT_IP")
            .then(|| env::var("IP_MASK").unwrap_or_else(|_| DEFAULT_IP_MASK.to_string()));

        let source = match (env::var("AWS_LOG_BUCKET"), env::var("LOCAL_LOG_DIR")) {
            (Ok(bucket), _) => SourceConfig::S3 {
                bucket,
                access_key_id: env::var("AWS_ACCESS_KEY_ID").ok(),
                secret_access_key: env::var("AWS_ACCESS_KEY_SECRET").ok(),
                region: env::var("AWS_REGION").ok(),
                prefix: env::var("AWS_LOG_PREFIX").ok().filter(|p| !p.is_empty()),
            },
            (Err(_), Ok(dir)) => SourceConfig::Local {
                dir: PathBuf::from(dir),
            },
            (Err(_), Err(_)) => {
                return Err(ConfigError::Missing("AWS_LOG_BUCKET or LOCAL_LOG_DIR"))
            }
        };

        let graphite = match env::var("GRAPHITE_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(GraphiteConfig {
                host,
                port: parse_var("GRAPHITE_PORT", DEFAULT_GRAPHITE_PORT)?,
                prefix: env::var("GRAPHITE_PREFIX").ok().filter(|p| !p.is_empty()),
            }),
            _ => None,
        };

        let log_level = env::var("LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| {
                if stage == "dev" { "debug" } else { "info" }.to_string()
            });

        let config = Self {
            loki_push_url,
            max_lines,
            max_chunk_lines,
            max_files,
            distributions,
            stop_before_today,
            mode,
            ship_interval,
            http_timeout,
            ip_mask,
            source,
            graphite,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.loki_push_url.starts_with("http://")
            && !self.loki_push_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "LOKI_PUSH_URL must be an http(s) URL, got '{}'",
                self.loki_push_url
            )));
        }

        if self.max_lines == 0 || self.max_chunk_lines == 0 || self.max_files == 0 {
            return Err(ConfigError::Invalid(
                "MAX_LINES, MAX_CHUNK_LINES and MAX_FILES must be greater than 0".to_string(),
            ));
        }

        if let SourceConfig::S3 { bucket, .. } = &self.source {
            if bucket.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "AWS_LOG_BUCKET cannot be empty".to_string(),
                ));
            }
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Listing selection for a run starting on `today` (UTC).
    pub fn list_filter(&self, today: NaiveDate) -> ListFilter {
        ListFilter {
            max_units: self.max_files,
            distributions: self.distributions.clone(),
            before: self.stop_before_today.then_some(today),
        }
    }

    pub fn shipper_config(&self) -> ShipperConfig {
        ShipperConfig {
            push_url: self.loki_push_url.clone(),
            timeout: self.http_timeout,
            ship_interval: self.ship_interval,
            grouper: StreamGrouper::new(self.ip_mask.as_deref().map(IpScrubber::new)),
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(val) => val.trim().parse::<T>().map_err(|_| {
            ConfigError::Invalid(format!("{name} has an invalid value '{val}'"))
        }),
        Err(_) => Ok(default),
    }
}

fn bool_var(name: &str) -> bool {
    env::var(name)
        .map(|val| matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_VARS: [&str; 21] = [
        "LOKI_PUSH_URL",
        "MAX_LINES",
        "MAX_CHUNK_LINES",
        "MAX_FILES",
        "DISTRIBUTIONS",
        "STOP_BEFORE_TODAY",
        "STAGE",
        "SHIP_INTERVAL_MS",
        "HTTP_TIMEOUT_SECS",
        "SCRUB_CLIENT_IP",
        "IP_MASK",
        "AWS_LOG_BUCKET",
        "AWS_ACCESS_KEY_ID",
        "AWS_ACCESS_KEY_SECRET",
        "AWS_REGION",
        "AWS_LOG_PREFIX",
        "LOCAL_LOG_DIR",
        "GRAPHITE_HOST",
        "GRAPHITE_PORT",
        "GRAPHITE_PREFIX",
        "LOG_LEVEL",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            env::remove_var(var);
        }
    }

    fn minimal_env() {
        clear_env();
        env::set_var("LOKI_PUSH_URL", "http://loki:3100/loki/api/v1/push");
        env::set_var("LOCAL_LOG_DIR", "/var/log/cloudfront");
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_defaults_from_minimal_env() {
        minimal_env();

        let config = Config::from_env().unwrap();

        assert_eq!(config.max_lines, 1000);
        assert_eq!(config.max_chunk_lines, 1000);
        assert_eq!(config.max_files, 100);
        assert_eq!(config.mode, OperatingMode::DryRun);
        assert_eq!(config.ship_interval, Duration::from_secs(1));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.distributions, None);
        assert_eq!(config.ip_mask, None);
        assert_eq!(config.graphite, None);
        assert_eq!(config.log_level, "info");
        assert_eq!(
            config.source,
            SourceConfig::Local {
                dir: PathBuf::from("/var/log/cloudfront")
            }
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_push_url() {
        clear_env();
        env::set_var("LOCAL_LOG_DIR", "/tmp");

        assert_eq!(
            Config::from_env().unwrap_err(),
            ConfigError::Missing("LOKI_PUSH_URL")
        );
    }

    #[test]
    #[serial]
    fn test_missing_source() {
        clear_env();
        env::set_var("LOKI_PUSH_URL", "http://loki:3100/loki/api/v1/push");

        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Missing(_)
        ));
    }

    #[test]
    #[serial]
    fn test_full_env() {
        minimal_env();
        env::remove_var("LOCAL_LOG_DIR");
        env::set_var("MAX_LINES", "500");
        env::set_var("DISTRIBUTIONS", "E1A, E2B,,");
        env::set_var("STOP_BEFORE_TODAY", "true");
        env::set_var("STAGE", "prod");
        env::set_var("SCRUB_CLIENT_IP", "1");
        env::set_var("AWS_LOG_BUCKET", "cf-logs");
        env::set_var("AWS_REGION", "eu-west-1");
        env::set_var("AWS_LOG_PREFIX", "cloudfront/");
        env::set_var("GRAPHITE_HOST", "graphite.internal");
        env::set_var("GRAPHITE_PREFIX", "cf.shipper");

        let config = Config::from_env().unwrap();

        assert_eq!(config.max_lines, 500);
        assert_eq!(config.max_chunk_lines, 500);
        assert_eq!(config.mode, OperatingMode::Production);
        assert_eq!(
            config.distributions,
            Some(BTreeSet::from(["E1A".to_string(), "E2B".to_string()]))
        );
        assert_eq!(config.ip_mask.as_deref(), Some("0.0.0.0"));
        assert_eq!(
            config.source,
            SourceConfig::S3 {
                bucket: "cf-logs".to_string(),
                access_key_id: None,
                secret_access_key: None,
                region: Some("eu-west-1".to_string()),
                prefix: Some("cloudfront/".to_string()),
            }
        );
        assert_eq!(
            config.graphite,
            Some(GraphiteConfig {
                host: "graphite.internal".to_string(),
                port: 2003,
                prefix: Some("cf.shipper".to_string()),
            })
        );

        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let filter = config.list_filter(today);
        assert_eq!(filter.before, Some(today));
        assert_eq!(filter.max_units, 100);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_dev_stage_defaults_to_debug_logging() {
        minimal_env();
        env::set_var("STAGE", "dev");

        let config = Config::from_env().unwrap();

        assert_eq!(config.mode, OperatingMode::DryRun);
        assert_eq!(config.log_level, "debug");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_rejected() {
        minimal_env();
        env::set_var("MAX_LINES", "lots");

        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid(_)
        ));
        clear_env();
    }

    #[test]
    fn test_validate_zero_sizes() {
        let config = Config {
            max_chunk_lines: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_push_url_scheme() {
        let config = Config {
            loki_push_url: "loki:3100".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = Config {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
