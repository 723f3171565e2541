//! Ledger entry types.

use chrono::{DateTime, Utc};
use plugcache_core::PackageKey;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of a cached package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Fetching,
    Ready,
    Failed,
}

impl EntryState {
    /// Ready and Failed are terminal until a Failed entry is explicitly retried.
    pub fn is_terminal(self) -> bool {
        matches!(self, EntryState::Ready | EntryState::Failed)
    }

    pub fn can_transition_to(self, next: EntryState) -> bool {
        use EntryState::*;
        matches!(
            (self, next),
            (Pending, Fetching) | (Pending, Failed) | (Fetching, Ready) | (Fetching, Failed) | (Failed, Fetching)
        )
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryState::Pending => "pending",
            EntryState::Fetching => "fetching",
            EntryState::Ready => "ready",
            EntryState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A ledger entry for one package.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub key: PackageKey,
    pub state: EntryState,
    /// SHA-256 of the archive, hex encoded. Set once Ready.
    pub checksum: Option<String>,
    /// Packed archive, served back by the download route.
    pub archive_path: Option<PathBuf>,
    /// Unpacked package, read by the filesystem mirror.
    pub package_dir: Option<PathBuf>,
    pub size_bytes: u64,
    pub last_error: Option<String>,
    /// Number of fills started for this key.
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn pending(key: PackageKey) -> Self {
        Self {
            key,
            state: EntryState::Pending,
            checksum: None,
            archive_path: None,
            package_dir: None,
            size_bytes: 0,
            last_error: None,
            attempts: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == EntryState::Ready
    }
}

/// Ledger counts by state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub pending: u64,
    pub fetching: u64,
    pub ready: u64,
    pub failed: u64,
    pub ready_bytes: u64,
    pub open_requests: u64,
}
