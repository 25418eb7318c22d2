//! Per-call execution context.
//!
//! A [`CallContext`] travels with every catalog call: it names the realm the
//! call runs in, the principal that issued it, and a request id for log
//! correlation. Deferred work captures a copy of the caller's context so it
//! runs under the same realm and principal even after the caller's own
//! context has changed or gone away.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::id::RequestId;
use crate::realm::RealmId;

/// Execution context for a single logical catalog call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    /// Realm (tenant) the call runs in.
    pub realm: RealmId,
    /// Authenticated principal name, if any.
    pub principal: Option<String>,
    /// Request ID for tracing/correlation.
    pub request_id: RequestId,
    /// Free-form attributes propagated with the call.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl CallContext {
    /// Creates a context for the given realm with a fresh request id.
    #[must_use]
    pub fn new(realm: RealmId) -> Self {
        Self {
            realm,
            principal: None,
            request_id: RequestId::generate(),
            attributes: BTreeMap::new(),
        }
    }

    /// Sets the principal.
    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns a detached copy suitable for handing to deferred work.
    ///
    /// The copy owns all of its data; later mutation of `self` is not
    /// observed through it.
    #[must_use]
    pub fn detached(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_copy_is_independent() {
        let mut ctx = CallContext::new(RealmId::new("acme").expect("realm"))
            .with_principal("alice")
            .with_attribute("client", "spark");
        let copy = ctx.detached();

        ctx.principal = Some("mallory".to_string());
        ctx.attributes.insert("client".to_string(), "trino".to_string());

        assert_eq!(copy.principal.as_deref(), Some("alice"));
        assert_eq!(copy.attributes.get("client").map(String::as_str), Some("spark"));
        assert_eq!(copy.request_id, ctx.request_id);
    }
}
