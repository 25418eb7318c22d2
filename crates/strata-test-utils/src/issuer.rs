//! Credential issuer fake that counts and records calls.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use strata_catalog::credentials::{CredentialIssuer, CredentialScope, IssueError, ScopedCredentials};
use strata_core::Entity;

/// Issues numbered credentials and records every request.
///
/// Each issued map carries `s3.access-key-id = key-<n>` where `n` is the
/// 1-based call number, so tests can tell loads apart.
#[derive(Debug)]
pub struct CountingIssuer {
    calls: AtomicUsize,
    requests: Mutex<Vec<(i64, CredentialScope)>>,
    delay: Option<Duration>,
    lifetime: chrono::Duration,
    failing: AtomicBool,
}

impl Default for CountingIssuer {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingIssuer {
    /// Issues credentials valid for one hour, without delay.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            delay: None,
            lifetime: chrono::Duration::hours(1),
            failing: AtomicBool::new(false),
        }
    }

    /// Waits `delay` (Tokio time) inside every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sets the lifetime of issued credentials.
    #[must_use]
    pub fn with_lifetime(mut self, lifetime: chrono::Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Makes every following call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Entity ids and scopes of every call so far.
    pub fn requests(&self) -> Vec<(i64, CredentialScope)> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl CredentialIssuer for CountingIssuer {
    async fn issue(
        &self,
        entity: &Entity,
        scope: &CredentialScope,
    ) -> Result<ScopedCredentials, IssueError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests
            .lock()
            .expect("lock")
            .push((entity.id.get(), scope.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(IssueError::new(format!("issuer unavailable (call {call})")));
        }
        Ok(ScopedCredentials {
            credentials: BTreeMap::from([
                ("s3.access-key-id".to_string(), format!("key-{call}")),
                ("s3.session-token".to_string(), format!("token-{call}")),
            ]),
            expires_at: Utc::now() + self.lifetime,
        })
    }
}
