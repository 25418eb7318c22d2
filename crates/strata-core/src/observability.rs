//! Logging initialization and span constructors.
//!
//! Every catalog and task operation runs inside a span carrying the realm, so
//! log lines from concurrent tenants can be told apart.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Safe to call multiple times; subsequent calls are no-ops. Honors
/// `RUST_LOG` (for example `strata_catalog=debug`) and defaults to `info`.
///
/// # Example
///
/// ```rust
/// use strata_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = match format {
            LogFormat::Json => registry.with(tracing_fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(tracing_fmt::layer().pretty()).try_init(),
        };
        if result.is_err() {
            tracing::debug!("global subscriber already installed");
        }
    });
}

/// Creates a span for catalog operations.
///
/// ```rust
/// use strata_core::observability::catalog_span;
///
/// let span = catalog_span("commit_table", "acme-corp", "warehouse");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn catalog_span(operation: &str, realm: &str, catalog: &str) -> Span {
    tracing::info_span!("catalog", op = operation, realm = realm, catalog = catalog)
}

/// Creates a span for one attempt of a deferred task.
#[must_use]
pub fn task_span(task_id: i64, realm: &str, attempt: u32) -> Span {
    tracing::info_span!("task", task_id = task_id, realm = realm, attempt = attempt)
}

/// Wraps a string map whose values must never reach logs.
///
/// `Debug` and `Display` print only the keys.
pub struct Redacted<'a>(pub &'a BTreeMap<String, String>);

impl fmt::Debug for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn test_spans_can_be_entered() {
        let span = catalog_span("load_table", "acme", "warehouse");
        let _guard = span.enter();
        let task = task_span(42, "acme", 1);
        let _task_guard = task.enter();
        tracing::info!("message in span");
    }

    #[test]
    fn test_redacted_hides_values() {
        let mut map = BTreeMap::new();
        map.insert("s3.secret-access-key".to_string(), "hunter2".to_string());
        let rendered = format!("{:?}", Redacted(&map));
        assert!(rendered.contains("s3.secret-access-key"));
        assert!(!rendered.contains("hunter2"));
    }
}
