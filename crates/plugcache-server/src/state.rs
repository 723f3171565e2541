//! Application state shared across handlers.

use dashmap::DashMap;
use plugcache_core::ProviderKey;
use plugcache_registry::InstallationMethod;
use plugcache_registry::protocol::VersionEntry;
use plugcache_store::CacheStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::fetch::PackageFetcher;

pub struct AppState {
    pub store: Arc<CacheStore>,
    pub methods: Arc<Vec<InstallationMethod>>,
    pub fetcher: PackageFetcher,
    /// Credential every provider request must present.
    pub token: String,
    /// Version listings already answered, per provider.
    pub versions: DashMap<ProviderKey, Arc<Vec<VersionEntry>>>,
}

impl AppState {
    pub fn new(
        store: Arc<CacheStore>,
        methods: Vec<InstallationMethod>,
        cancel: CancellationToken,
    ) -> Self {
        let methods = Arc::new(methods);
        Self {
            fetcher: PackageFetcher::new(store.clone(), methods.clone(), cancel),
            store,
            methods,
            token: generate_token(),
            versions: DashMap::new(),
        }
    }
}

/// Per-process token, `x-api-key:<uuid>`.
pub fn generate_token() -> String {
    format!("x-api-key:{}", Uuid::new_v4())
}
