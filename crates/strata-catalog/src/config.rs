//! Catalog service configuration.
//!
//! Defaults carry the production constants; environment variables prefixed
//! with `STRATA_` override individual fields.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};

/// Maximum number of cached credential bundles.
pub const DEFAULT_CREDENTIAL_CACHE_MAX_ENTRIES: usize = 10_000;
/// Upper bound on the lifetime of a cached credential bundle.
pub const DEFAULT_CREDENTIAL_CACHE_MAX_TTL: Duration = Duration::from_secs(30 * 60);
/// Attempts made to read a metadata snapshot.
pub const DEFAULT_REFRESH_MAX_ATTEMPTS: u32 = 12;
/// Attempts made to run a deferred task.
pub const DEFAULT_TASK_MAX_ATTEMPTS: u32 = 3;
/// Base delay between task attempts; attempt `n` waits `n` times this.
pub const DEFAULT_TASK_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Configuration for a catalog service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Whether catalog properties may override the storage client implementation.
    pub allow_specifying_file_io_impl: bool,
    /// Whether dropping a namespace purges its data.
    pub cleanup_on_namespace_drop: bool,
    /// Attempts made to read a metadata snapshot during refresh.
    pub refresh_max_attempts: u32,
    /// First backoff delay between metadata read attempts.
    pub refresh_backoff_base: Duration,
    /// Ceiling of the metadata read backoff.
    pub refresh_backoff_max: Duration,
    /// Base delay between task attempts.
    pub task_retry_delay: Duration,
    /// Attempts made to run a deferred task.
    pub task_max_attempts: u32,
    /// Maximum number of task attempts running at once.
    pub task_worker_concurrency: usize,
    /// Maximum number of cached credential bundles.
    pub credential_cache_max_entries: usize,
    /// Upper bound on the lifetime of a cached credential bundle.
    pub credential_cache_max_ttl: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            allow_specifying_file_io_impl: false,
            cleanup_on_namespace_drop: false,
            refresh_max_attempts: DEFAULT_REFRESH_MAX_ATTEMPTS,
            refresh_backoff_base: Duration::from_millis(100),
            refresh_backoff_max: Duration::from_secs(5),
            task_retry_delay: DEFAULT_TASK_RETRY_DELAY,
            task_max_attempts: DEFAULT_TASK_MAX_ATTEMPTS,
            task_worker_concurrency: 8,
            credential_cache_max_entries: DEFAULT_CREDENTIAL_CACHE_MAX_ENTRIES,
            credential_cache_max_ttl: DEFAULT_CREDENTIAL_CACHE_MAX_TTL,
        }
    }
}

impl CatalogConfig {
    /// Loads configuration from `STRATA_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Validation`] when a variable is set but
    /// cannot be parsed.
    pub fn from_env() -> CatalogResult<Self> {
        let mut config = Self::default();

        if let Some(v) = env_bool("STRATA_ALLOW_SPECIFYING_FILE_IO_IMPL")? {
            config.allow_specifying_file_io_impl = v;
        }
        if let Some(v) = env_bool("STRATA_CLEANUP_ON_NAMESPACE_DROP")? {
            config.cleanup_on_namespace_drop = v;
        }
        if let Some(v) = env_u64("STRATA_REFRESH_MAX_ATTEMPTS")? {
            config.refresh_max_attempts = to_u32("STRATA_REFRESH_MAX_ATTEMPTS", v)?;
        }
        if let Some(v) = env_u64("STRATA_REFRESH_BACKOFF_BASE_MS")? {
            config.refresh_backoff_base = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("STRATA_REFRESH_BACKOFF_MAX_MS")? {
            config.refresh_backoff_max = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("STRATA_TASK_RETRY_DELAY_MS")? {
            config.task_retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("STRATA_TASK_MAX_ATTEMPTS")? {
            config.task_max_attempts = to_u32("STRATA_TASK_MAX_ATTEMPTS", v)?;
        }
        if let Some(v) = env_usize("STRATA_TASK_WORKER_CONCURRENCY")? {
            config.task_worker_concurrency = v;
        }
        if let Some(v) = env_usize("STRATA_CREDENTIAL_CACHE_MAX_ENTRIES")? {
            config.credential_cache_max_entries = v;
        }
        if let Some(v) = env_u64("STRATA_CREDENTIAL_CACHE_MAX_TTL_SECS")? {
            config.credential_cache_max_ttl = Duration::from_secs(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Validation`] for zero attempt counts or a
    /// zero-sized worker pool.
    pub fn validate(&self) -> CatalogResult<()> {
        if self.refresh_max_attempts == 0 {
            return Err(invalid("refresh_max_attempts must be at least 1"));
        }
        if self.task_max_attempts == 0 {
            return Err(invalid("task_max_attempts must be at least 1"));
        }
        if self.task_worker_concurrency == 0 {
            return Err(invalid("task_worker_concurrency must be at least 1"));
        }
        Ok(())
    }

    /// Returns a copy with all retry delays set to zero, for tests.
    #[must_use]
    pub fn without_delays(mut self) -> Self {
        self.refresh_backoff_base = Duration::ZERO;
        self.refresh_backoff_max = Duration::ZERO;
        self.task_retry_delay = Duration::ZERO;
        self
    }
}

fn invalid(message: impl Into<String>) -> CatalogError {
    CatalogError::Validation {
        message: message.into(),
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64(name: &str) -> CatalogResult<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| invalid(format!("{name} must be a u64: {e}")))
}

fn env_usize(name: &str) -> CatalogResult<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| invalid(format!("{name} must be a usize: {e}")))
}

fn to_u32(name: &str, value: u64) -> CatalogResult<u32> {
    u32::try_from(value).map_err(|e| invalid(format!("{name} is out of range: {e}")))
}

fn parse_bool(name: &str, value: &str) -> CatalogResult<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(invalid(format!("{name} must be a boolean (true/false/1/0)"))),
    }
}

fn env_bool(name: &str) -> CatalogResult<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_constants() {
        let config = CatalogConfig::default();
        assert_eq!(config.refresh_max_attempts, 12);
        assert_eq!(config.task_max_attempts, 3);
        assert_eq!(config.task_retry_delay, Duration::from_secs(1));
        assert_eq!(config.credential_cache_max_entries, 10_000);
        assert_eq!(config.credential_cache_max_ttl, Duration::from_secs(1800));
        assert!(!config.allow_specifying_file_io_impl);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("TEST", "TRUE").expect("bool"));
        assert!(parse_bool("TEST", "1").expect("bool"));
        assert!(!parse_bool("TEST", "no").expect("bool"));
        assert!(parse_bool("TEST", "maybe").is_err());
    }

    #[test]
    fn zero_worker_pool_is_rejected() {
        let config = CatalogConfig {
            task_worker_concurrency: 0,
            ..CatalogConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CatalogError::Validation { .. })
        ));
    }

    #[test]
    fn deserializes_partial_document() {
        let config: CatalogConfig =
            serde_json::from_str(r#"{"cleanup_on_namespace_drop": true}"#).expect("parse");
        assert!(config.cleanup_on_namespace_drop);
        assert_eq!(config.refresh_max_attempts, 12);
    }
}
