//! Metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade; the embedding service
//! installs whatever recorder it exports with.

use std::sync::OnceLock;

use metrics::{counter, describe_counter};

/// Credential cache lookups served from cache.
pub const CREDENTIAL_CACHE_HIT_TOTAL: &str = "strata_credential_cache_hit_total";
/// Credential cache lookups that triggered or joined a load.
pub const CREDENTIAL_CACHE_MISS_TOTAL: &str = "strata_credential_cache_miss_total";
/// Credential loads that failed.
pub const CREDENTIAL_LOAD_FAILURE_TOTAL: &str = "strata_credential_load_failure_total";
/// Commits rejected because the pointer moved.
pub const COMMIT_CONFLICT_TOTAL: &str = "strata_commit_conflict_total";
/// Metadata read attempts that were retried.
pub const REFRESH_RETRY_TOTAL: &str = "strata_refresh_retry_total";
/// Task attempts, labelled by outcome.
pub const TASK_ATTEMPT_TOTAL: &str = "strata_task_attempt_total";

static METRICS_REGISTERED: OnceLock<()> = OnceLock::new();

/// Registers metric descriptions.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn register_metrics() {
    METRICS_REGISTERED.get_or_init(|| {
        describe_counter!(
            CREDENTIAL_CACHE_HIT_TOTAL,
            "Credential cache lookups served from cache"
        );
        describe_counter!(
            CREDENTIAL_CACHE_MISS_TOTAL,
            "Credential cache lookups that required a load"
        );
        describe_counter!(
            CREDENTIAL_LOAD_FAILURE_TOTAL,
            "Credential loads that failed"
        );
        describe_counter!(
            COMMIT_CONFLICT_TOTAL,
            "Metadata commits rejected by compare-and-swap"
        );
        describe_counter!(REFRESH_RETRY_TOTAL, "Retried metadata reads");
        describe_counter!(TASK_ATTEMPT_TOTAL, "Deferred task attempts by outcome");
    });
}

pub(crate) fn record_cache_hit() {
    counter!(CREDENTIAL_CACHE_HIT_TOTAL).increment(1);
}

pub(crate) fn record_cache_miss() {
    counter!(CREDENTIAL_CACHE_MISS_TOTAL).increment(1);
}

pub(crate) fn record_load_failure() {
    counter!(CREDENTIAL_LOAD_FAILURE_TOTAL).increment(1);
}

pub(crate) fn record_commit_conflict(kind: &'static str) {
    counter!(COMMIT_CONFLICT_TOTAL, "kind" => kind).increment(1);
}

pub(crate) fn record_refresh_retry() {
    counter!(REFRESH_RETRY_TOTAL).increment(1);
}

pub(crate) fn record_task_attempt(outcome: &'static str) {
    counter!(TASK_ATTEMPT_TOTAL, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        register_metrics();
        register_metrics();
        record_task_attempt("success");
        record_commit_conflict("table");
    }
}
