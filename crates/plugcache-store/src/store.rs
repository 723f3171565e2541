//! The package ledger.
//!
//! Each `PackageKey` owns one `watch` channel holding its `CacheEntry`. The
//! channel is both the source of truth for the entry and the notification
//! path for waiters: a transition is a single `send_if_modified`, and every
//! subscribed receiver observes it. Receivers are created per wait and
//! dropped when the wait ends, so no waiter bookkeeping outlives a request.

use crate::archiver;
use crate::layout::{CacheLayout, staging_path};
use crate::types::{CacheEntry, CacheStats, EntryState};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use plugcache_core::{Error, PackageKey, RequestId, Result};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared ledger and sole writer of the on-disk cache.
pub struct CacheStore {
    layout: CacheLayout,
    ledger: DashMap<PackageKey, watch::Sender<CacheEntry>>,
    requests: DashMap<RequestId, BTreeSet<PackageKey>>,
    cancel: CancellationToken,
}

impl CacheStore {
    pub fn new(layout: CacheLayout, cancel: CancellationToken) -> Self {
        Self {
            layout,
            ledger: DashMap::new(),
            requests: DashMap::new(),
            cancel,
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Return the entry for `key`, creating it as Pending if absent.
    ///
    /// Exactly one concurrent caller observes `created = true` and owns the fill.
    pub fn get_or_create(&self, key: &PackageKey) -> (CacheEntry, bool) {
        match self.ledger.entry(key.clone()) {
            Entry::Occupied(slot) => (slot.get().borrow().clone(), false),
            Entry::Vacant(slot) => {
                let entry = CacheEntry::pending(key.clone());
                let (tx, _rx) = watch::channel(entry.clone());
                slot.insert(tx);
                debug!(package = %key, "Created cache entry");
                (entry, true)
            }
        }
    }

    pub fn get(&self, key: &PackageKey) -> Option<CacheEntry> {
        self.ledger.get(key).map(|slot| slot.borrow().clone())
    }

    pub fn mark_fetching(&self, key: &PackageKey) -> Result<CacheEntry> {
        self.transition(key, EntryState::Fetching, |entry| {
            entry.attempts += 1;
            entry.last_error = None;
        })
    }

    /// Re-arm a Failed entry. Returns true if this caller now owns the fill.
    pub fn try_retry(&self, key: &PackageKey) -> bool {
        let Some(slot) = self.ledger.get(key) else {
            return false;
        };
        let retried = slot.send_if_modified(|entry| {
            if entry.state != EntryState::Failed {
                return false;
            }
            entry.state = EntryState::Fetching;
            entry.attempts += 1;
            entry.last_error = None;
            entry.updated_at = Utc::now();
            true
        });
        if retried {
            info!(package = %key, "Retrying failed package");
        }
        retried
    }

    pub fn mark_failed(&self, key: &PackageKey, error: &Error) -> Result<CacheEntry> {
        warn!(package = %key, error = %error, "Package fetch failed");
        let reason = error.to_string();
        self.transition(key, EntryState::Failed, move |entry| {
            entry.last_error = Some(reason);
        })
    }

    /// Persist `bytes` and flip the entry to Ready.
    ///
    /// The archive and the unpacked package are staged next to their final
    /// paths and renamed into place before the state changes, so a Ready
    /// entry always has complete content on disk. A checksum mismatch marks
    /// the entry Failed and leaves nothing behind.
    pub async fn mark_ready(
        &self,
        key: &PackageKey,
        bytes: Vec<u8>,
        checksum: &str,
    ) -> Result<CacheEntry> {
        self.expect_state(key, EntryState::Fetching, EntryState::Ready)?;

        let expected = normalize_checksum(checksum);
        let actual = archiver::sha256_hex(&bytes);
        if expected != actual {
            let err = Error::ChecksumMismatch {
                package: key.to_string(),
                expected,
                actual,
            };
            self.mark_failed(key, &err)?;
            return Err(err);
        }

        if self.cancel.is_cancelled() {
            self.mark_failed(key, &Error::Cancelled)?;
            return Err(Error::Cancelled);
        }

        let size_bytes = bytes.len() as u64;
        if let Err(e) = self.persist(key, bytes).await {
            self.mark_failed(key, &e)?;
            return Err(e);
        }

        let archive_path = self.layout.archive_path(key);
        let package_dir = self.layout.package_dir(key);
        let entry = self.transition(key, EntryState::Ready, move |entry| {
            entry.checksum = Some(actual);
            entry.archive_path = Some(archive_path);
            entry.package_dir = Some(package_dir);
            entry.size_bytes = size_bytes;
            entry.last_error = None;
        })?;
        info!(package = %key, size_bytes, "Package cached");
        Ok(entry)
    }

    /// Adopt a package left on disk by an earlier process.
    ///
    /// Only valid while the caller owns the fill (entry is Fetching).
    pub async fn adopt_existing(&self, key: &PackageKey) -> Result<Option<CacheEntry>> {
        let archive_path = self.layout.archive_path(key);
        let package_dir = self.layout.package_dir(key);
        if !tokio::fs::try_exists(&package_dir).await? {
            return Ok(None);
        }
        let bytes = match tokio::fs::read(&archive_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checksum = archiver::sha256_hex(&bytes);
        let size_bytes = bytes.len() as u64;
        let entry = self.transition(key, EntryState::Ready, move |entry| {
            entry.checksum = Some(checksum);
            entry.archive_path = Some(archive_path);
            entry.package_dir = Some(package_dir);
            entry.size_bytes = size_bytes;
        })?;
        debug!(package = %key, "Adopted package already on disk");
        Ok(Some(entry))
    }

    /// Read back the archive bytes of a Ready entry.
    pub async fn read_archive(&self, key: &PackageKey) -> Result<Option<Vec<u8>>> {
        let Some(path) = self
            .get(key)
            .filter(CacheEntry::is_ready)
            .and_then(|entry| entry.archive_path)
        else {
            return Ok(None);
        };
        Ok(Some(tokio::fs::read(path).await?))
    }

    /// Open a request scope. Idempotent.
    pub fn register_request(&self, request_id: RequestId) {
        self.requests.entry(request_id).or_default();
        debug!(request_id = %request_id, "Registered cache request");
    }

    /// Record that `request_id` needs `key`. Returns true if newly recorded.
    pub fn track(&self, request_id: RequestId, key: &PackageKey) -> Result<bool> {
        let mut keys = self
            .requests
            .get_mut(&request_id)
            .ok_or_else(|| Error::UnknownRequest(request_id.to_string()))?;
        Ok(keys.insert(key.clone()))
    }

    pub fn is_registered(&self, request_id: RequestId) -> bool {
        self.requests.contains_key(&request_id)
    }

    pub fn request_keys(&self, request_id: RequestId) -> Result<Vec<PackageKey>> {
        self.requests
            .get(&request_id)
            .map(|keys| keys.iter().cloned().collect())
            .ok_or_else(|| Error::UnknownRequest(request_id.to_string()))
    }

    /// Close a request scope. Entries stay in the ledger.
    pub fn release_request(&self, request_id: RequestId) -> Option<Vec<PackageKey>> {
        let released = self
            .requests
            .remove(&request_id)
            .map(|(_, keys)| keys.into_iter().collect());
        debug!(request_id = %request_id, "Released cache request");
        released
    }

    /// Block until every key is Ready or Failed, or `timeout` elapses.
    ///
    /// Fails with `PackagesFailed` naming every failed key, or with
    /// `WaitTimeout` naming every key still in flight.
    pub async fn wait(
        &self,
        request_id: RequestId,
        keys: &[PackageKey],
        timeout: Duration,
    ) -> Result<()> {
        let mut failures = Vec::new();
        let mut receivers = Vec::with_capacity(keys.len());
        for key in keys {
            match self.ledger.get(key) {
                Some(slot) => receivers.push((key.clone(), slot.subscribe())),
                None => failures.push(format!("{}: never requested from the cache", key)),
            }
        }

        let waits = receivers.into_iter().map(|(key, mut rx)| async move {
            let entry = rx
                .wait_for(|entry| entry.state.is_terminal())
                .await
                .map(|entry| (*entry).clone())
                .ok();
            (key, entry)
        });

        let outcomes = match tokio::time::timeout(timeout, join_all(waits)).await {
            Ok(outcomes) => outcomes,
            Err(_) => {
                let pending: Vec<String> = keys
                    .iter()
                    .filter(|key| {
                        self.get(key)
                            .map(|entry| !entry.state.is_terminal())
                            .unwrap_or(false)
                    })
                    .map(ToString::to_string)
                    .collect();
                if !pending.is_empty() {
                    warn!(request_id = %request_id, pending = pending.len(), "Cache wait timed out");
                    return Err(Error::WaitTimeout {
                        request_id: request_id.to_string(),
                        pending,
                    });
                }
                keys.iter()
                    .map(|key| (key.clone(), self.get(key)))
                    .collect()
            }
        };

        for (key, entry) in outcomes {
            match entry {
                Some(entry) if entry.state == EntryState::Ready => {}
                Some(entry) => failures.push(format!(
                    "{}: {}",
                    key,
                    entry.last_error.unwrap_or_else(|| "unknown error".to_string())
                )),
                None => failures.push(format!("{}: cache entry dropped", key)),
            }
        }

        if failures.is_empty() {
            debug!(request_id = %request_id, packages = keys.len(), "Cache request ready");
            Ok(())
        } else {
            Err(Error::PackagesFailed { failures })
        }
    }

    /// Wait on every key recorded for `request_id`, returning those keys.
    pub async fn wait_for_request(
        &self,
        request_id: RequestId,
        timeout: Duration,
    ) -> Result<Vec<PackageKey>> {
        let keys = self.request_keys(request_id)?;
        self.wait(request_id, &keys, timeout).await?;
        Ok(keys)
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            open_requests: self.requests.len() as u64,
            ..CacheStats::default()
        };
        for slot in self.ledger.iter() {
            let entry = slot.value().borrow();
            match entry.state {
                EntryState::Pending => stats.pending += 1,
                EntryState::Fetching => stats.fetching += 1,
                EntryState::Ready => {
                    stats.ready += 1;
                    stats.ready_bytes += entry.size_bytes;
                }
                EntryState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    fn expect_state(&self, key: &PackageKey, expected: EntryState, to: EntryState) -> Result<()> {
        let current = self
            .get(key)
            .ok_or_else(|| Error::Internal(format!("No cache entry for {}", key)))?
            .state;
        if current != expected {
            return Err(Error::InvalidTransition {
                package: key.to_string(),
                from: current.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    fn transition(
        &self,
        key: &PackageKey,
        to: EntryState,
        update: impl FnOnce(&mut CacheEntry),
    ) -> Result<CacheEntry> {
        let slot = self
            .ledger
            .get(key)
            .ok_or_else(|| Error::Internal(format!("No cache entry for {}", key)))?;

        let mut outcome = None;
        slot.send_if_modified(|entry| {
            if !entry.state.can_transition_to(to) {
                outcome = Some(Err(Error::InvalidTransition {
                    package: key.to_string(),
                    from: entry.state.to_string(),
                    to: to.to_string(),
                }));
                return false;
            }
            entry.state = to;
            entry.updated_at = Utc::now();
            update(entry);
            outcome = Some(Ok(entry.clone()));
            true
        });

        outcome.unwrap_or_else(|| Err(Error::Internal("Ledger update did not run".to_string())))
    }

    async fn persist(&self, key: &PackageKey, bytes: Vec<u8>) -> Result<()> {
        let archive_path = self.layout.archive_path(key);
        let package_dir = self.layout.package_dir(key);
        let fallback_name = key.package_filename();

        if let Some(parent) = archive_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staged_archive = staging_path(&archive_path);
        tokio::fs::write(&staged_archive, &bytes).await?;
        tokio::fs::rename(&staged_archive, &archive_path).await?;

        if let Some(parent) = package_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staged_dir = staging_path(&package_dir);
        let unpack_target = staged_dir.clone();
        let unpacked = tokio::task::spawn_blocking(move || {
            archiver::unpack_package(&bytes, &unpack_target, &fallback_name)
        })
        .await
        .map_err(|e| Error::Internal(format!("Unpack task failed: {}", e)))?;
        if let Err(e) = unpacked {
            let _ = tokio::fs::remove_dir_all(&staged_dir).await;
            return Err(e);
        }

        // A leftover directory without an archive is replaced wholesale.
        if tokio::fs::try_exists(&package_dir).await? {
            tokio::fs::remove_dir_all(&package_dir).await?;
        }
        tokio::fs::rename(&staged_dir, &package_dir).await?;
        Ok(())
    }
}

fn normalize_checksum(checksum: &str) -> String {
    checksum
        .trim()
        .strip_prefix("zh:")
        .unwrap_or(checksum.trim())
        .to_ascii_lowercase()
}
