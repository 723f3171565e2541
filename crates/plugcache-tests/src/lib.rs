//! Integration test infrastructure for plugcache.
//!
//! Registries and mirrors are wiremock servers; the cache server runs
//! in-process on a loopback port.
//!
//! # Usage
//!
//! ```ignore
//! use plugcache_tests::{RegistryFixture, start_test_cache};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let registry = RegistryFixture::start().await;
//!     let cache = start_test_cache(vec![InstallationMethodConfig::direct()]).await.unwrap();
//!     // Drive cache.server with a ProviderClient.
//! }
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,plugcache_server=debug,plugcache_store=debug")),
        )
        .with_test_writer()
        .try_init();
}
