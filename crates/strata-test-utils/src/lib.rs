//! Shared test utilities for Strata integration tests.
//!
//! This crate provides:
//! - [`TracingMemoryBackend`]: in-memory object storage with operation
//!   recording and failure injection
//! - [`CountingIssuer`]: credential issuer that counts and records calls
//! - [`TestCatalog`]: a catalog wired over in-memory collaborators
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_test_utils::{TestCatalog, table_metadata};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let catalog = TestCatalog::new().await;
//!     let ns = catalog.create_namespace("a.b").await;
//!     // ... run test ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod issuer;
pub mod storage;

pub use fixtures::*;
pub use issuer::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("strata_catalog=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
