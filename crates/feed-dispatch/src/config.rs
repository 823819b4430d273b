//! Configuration management
//!
//! Everything comes from environment variables, optionally seeded from a
//! `.env` file. The three deployment variables (`DATASET_ID`,
//! `LAMBDA_TO_TRIGGER`, `SOCRATA_PARAMS`) are required; the rest have defaults.

use crate::dispatcher::{DEFAULT_CONCURRENCY, DEFAULT_INVOKE_TIMEOUT_SECS};
use crate::registry::socrata::{SocrataConfig, SocrataCredentials, DEFAULT_PAGE_SIZE, DEFAULT_TIMEOUT_SECS};
use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_RETRIES, MAX_RETRIES_LIMIT};
use crate::run::{RunSettings, DEFAULT_FILTER};
use crate::run_log::s3::{S3RunLogConfig, DEFAULT_PREFIX};
use feed_dispatch_common::{DispatchError, Result};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default extra attempts for a registry write-back.
pub const DEFAULT_WRITE_RETRIES: u32 = 3;

const REQUIRED_VARS: [&str; 3] = ["DATASET_ID", "LAMBDA_TO_TRIGGER", "SOCRATA_PARAMS"];

/// Registry access settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    /// `None` fetches every row.
    pub filter: Option<String>,
    pub page_size: u32,
    pub timeout_secs: u64,
    pub retries: u32,
}

/// Dispatch and write-back settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    pub concurrency: usize,
    pub invoke_timeout_secs: u64,
    pub write_retries: u32,
    pub retry_base_delay_ms: u64,
}

/// Limits of the hosting environment. Logged only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostResources {
    pub memory_mb: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub dataset_id: String,
    pub lambda_to_trigger: String,
    pub credentials: SocrataCredentials,
    pub registry: RegistrySettings,
    pub dispatch: DispatchSettings,
    pub run_log: Option<S3RunLogConfig>,
    pub resources: HostResources,
}

impl DispatchConfig {
    /// Load configuration from the process environment (and `.env`, if present)
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let missing: Vec<&str> = REQUIRED_VARS
            .iter()
            .copied()
            .filter(|key| var(*key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(DispatchError::config(format!(
                "missing required environment variable(s): {}",
                missing.join(", ")
            )));
        }

        let dataset_id = var("DATASET_ID").unwrap_or_default();
        let lambda_to_trigger = var("LAMBDA_TO_TRIGGER").unwrap_or_default();
        let credentials: SocrataCredentials =
            serde_json::from_str(&var("SOCRATA_PARAMS").unwrap_or_default())
                .map_err(|e| DispatchError::config(format!("SOCRATA_PARAMS is not valid: {e}")))?;

        let registry = RegistrySettings {
            // An empty REGISTRY_FILTER means "no filter", not "default filter".
            filter: match lookup("REGISTRY_FILTER") {
                Some(raw) if raw.trim().is_empty() => None,
                Some(raw) => Some(raw.trim().to_string()),
                None => Some(DEFAULT_FILTER.to_string()),
            },
            page_size: parse_or("REGISTRY_PAGE_SIZE", var("REGISTRY_PAGE_SIZE"), DEFAULT_PAGE_SIZE)?,
            timeout_secs: parse_or("REGISTRY_TIMEOUT_SECS", var("REGISTRY_TIMEOUT_SECS"), DEFAULT_TIMEOUT_SECS)?,
            retries: parse_or("REGISTRY_RETRIES", var("REGISTRY_RETRIES"), DEFAULT_MAX_RETRIES)?,
        };

        let dispatch = DispatchSettings {
            concurrency: parse_or("DISPATCH_CONCURRENCY", var("DISPATCH_CONCURRENCY"), DEFAULT_CONCURRENCY)?,
            invoke_timeout_secs: parse_or(
                "INVOKE_TIMEOUT_SECS",
                var("INVOKE_TIMEOUT_SECS"),
                DEFAULT_INVOKE_TIMEOUT_SECS,
            )?,
            write_retries: parse_or("WRITE_RETRIES", var("WRITE_RETRIES"), DEFAULT_WRITE_RETRIES)?,
            retry_base_delay_ms: parse_or(
                "RETRY_BASE_DELAY_MS",
                var("RETRY_BASE_DELAY_MS"),
                DEFAULT_BASE_DELAY_MS,
            )?,
        };

        let run_log = var("RUN_LOG_BUCKET").map(|bucket| S3RunLogConfig {
            bucket,
            prefix: var("RUN_LOG_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            endpoint: var("RUN_LOG_ENDPOINT"),
        });

        // Set by the Lambda runtime; informational only, so bad values are dropped.
        let resources = HostResources {
            memory_mb: var("AWS_LAMBDA_FUNCTION_MEMORY_SIZE").and_then(|v| v.parse().ok()),
            timeout_secs: var("AWS_LAMBDA_FUNCTION_TIMEOUT").and_then(|v| v.parse().ok()),
        };

        let config = Self {
            dataset_id,
            lambda_to_trigger,
            credentials,
            registry,
            dispatch,
            run_log,
            resources,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.credentials.domain.trim().is_empty() {
            return Err(DispatchError::config("SOCRATA_PARAMS domain cannot be empty"));
        }

        if self.registry.page_size == 0 {
            return Err(DispatchError::config("REGISTRY_PAGE_SIZE must be greater than 0"));
        }

        if self.registry.timeout_secs == 0 {
            return Err(DispatchError::config("REGISTRY_TIMEOUT_SECS must be greater than 0"));
        }

        if self.dispatch.concurrency == 0 {
            return Err(DispatchError::config("DISPATCH_CONCURRENCY must be greater than 0"));
        }

        if self.dispatch.invoke_timeout_secs == 0 {
            return Err(DispatchError::config("INVOKE_TIMEOUT_SECS must be greater than 0"));
        }

        for (name, retries) in [
            ("REGISTRY_RETRIES", self.registry.retries),
            ("WRITE_RETRIES", self.dispatch.write_retries),
        ] {
            if retries > MAX_RETRIES_LIMIT {
                return Err(DispatchError::config(format!(
                    "{name} ({retries}) must be at most {MAX_RETRIES_LIMIT}"
                )));
            }
        }

        // The whole run has to fit in the host's time limit.
        if let Some(host_timeout) = self.resources.timeout_secs {
            if self.dispatch.invoke_timeout_secs >= host_timeout {
                return Err(DispatchError::config(format!(
                    "INVOKE_TIMEOUT_SECS ({}) must be lower than the host timeout ({host_timeout}s)",
                    self.dispatch.invoke_timeout_secs
                )));
            }
        }

        Ok(())
    }

    pub fn socrata_config(&self) -> SocrataConfig {
        SocrataConfig {
            credentials: self.credentials.clone(),
            dataset_id: self.dataset_id.clone(),
            page_size: self.registry.page_size,
            timeout: Duration::from_secs(self.registry.timeout_secs),
            retry: RetryPolicy::new(self.registry.retries, self.retry_base_delay()),
        }
    }

    pub fn write_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.dispatch.write_retries, self.retry_base_delay())
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            dataset_id: self.dataset_id.clone(),
            filter: self.registry.filter.clone(),
            concurrency: self.dispatch.concurrency,
            invoke_timeout: Duration::from_secs(self.dispatch.invoke_timeout_secs),
            write_retry: self.write_retry(),
        }
    }

    fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch.retry_base_delay_ms)
    }

    /// Log the effective configuration, without secrets.
    pub fn log_summary(&self) {
        info!(
            dataset_id = %self.dataset_id,
            function = %self.lambda_to_trigger,
            domain = %self.credentials.domain,
            filter = ?self.registry.filter,
            concurrency = self.dispatch.concurrency,
            run_log_bucket = ?self.run_log.as_ref().map(|r| &r.bucket),
            host_memory_mb = ?self.resources.memory_mb,
            host_timeout_secs = ?self.resources.timeout_secs,
            "Loaded configuration"
        );
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| DispatchError::config(format!("{key} has an invalid value: {raw}"))),
    }
}
