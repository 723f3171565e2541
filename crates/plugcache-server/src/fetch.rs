//! Asynchronous cache fill.

use plugcache_core::{Error, PackageKey, RequestId, Result};
use plugcache_registry::{InstallationMethod, resolve_package};
use plugcache_store::{CacheEntry, CacheStore, EntryState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Starts at most one fill per package and reports the entry's state.
#[derive(Clone)]
pub struct PackageFetcher {
    store: Arc<CacheStore>,
    methods: Arc<Vec<InstallationMethod>>,
    cancel: CancellationToken,
}

impl PackageFetcher {
    pub fn new(
        store: Arc<CacheStore>,
        methods: Arc<Vec<InstallationMethod>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            methods,
            cancel,
        }
    }

    /// Record `key` against `request_id` and make sure a fill is running or
    /// finished for it. Never blocks on the fill itself.
    pub fn ensure(&self, request_id: RequestId, key: &PackageKey) -> Result<CacheEntry> {
        let first_for_request = self.store.track(request_id, key)?;
        let (entry, created) = self.store.get_or_create(key);

        if created {
            let entry = self.store.mark_fetching(key)?;
            self.spawn_fill(key.clone());
            return Ok(entry);
        }

        if entry.state == EntryState::Failed && first_for_request && self.store.try_retry(key) {
            info!(package = %key, request_id = %request_id, "Retrying failed package");
            self.spawn_fill(key.clone());
        }

        Ok(self.store.get(key).unwrap_or(entry))
    }

    fn spawn_fill(&self, key: PackageKey) {
        let this = self.clone();
        tokio::spawn(async move { this.fill(key).await });
    }

    async fn fill(&self, key: PackageKey) {
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = self.fetch(&key) => result,
        };

        match outcome {
            Ok(()) => debug!(package = %key, "Fill complete"),
            Err(err) => {
                // mark_ready records its own failures.
                let still_fetching = self
                    .store
                    .get(&key)
                    .is_some_and(|e| e.state == EntryState::Fetching);
                if still_fetching {
                    if let Err(e) = self.store.mark_failed(&key, &err) {
                        warn!(package = %key, error = %e, "Could not record fill failure");
                    }
                }
            }
        }
    }

    async fn fetch(&self, key: &PackageKey) -> Result<()> {
        if self.store.adopt_existing(key).await?.is_some() {
            return Ok(());
        }
        let resolution = resolve_package(&self.methods, key).await?;
        debug!(package = %key, source = resolution.source, "Persisting package");
        self.store
            .mark_ready(key, resolution.bytes, &resolution.checksum)
            .await?;
        Ok(())
    }
}
