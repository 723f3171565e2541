//! Dependency lock file handling.
//!
//! Provider blocks can be derived from the cached archives instead of asking
//! the registry again. This trusts the cache's own checksums, so it only
//! happens under [`LockfilePolicy::FromCache`].

use plugcache_core::{PackageKey, ProviderKey, Result};
use plugcache_store::{CacheStore, hash_h1, hash_zh};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};

pub const LOCK_FILE_NAME: &str = ".terraform.lock.hcl";

const LOCK_FILE_HEADER: &str = "# This file is maintained automatically by \"terraform init\".\n\
# Manual edits may be lost in future updates.\n";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockfilePolicy {
    /// Leave the lock file to the wrapped tool.
    #[default]
    Disabled,
    /// Write provider hashes computed from the cache.
    FromCache,
}

static PROVIDER_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^provider\s+"([^"]+)"\s*\{\s*$"#).expect("provider header regex must compile")
});
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(version|constraints)\s*=\s*"([^"]*)"\s*$"#)
        .expect("attribute regex must compile")
});
static HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""((?:h1|zh):[^"]+)""#).expect("hash regex must compile"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderLock {
    pub version: String,
    pub constraints: Option<String>,
    pub hashes: BTreeSet<String>,
}

/// Parsed lock file: provider blocks keyed by address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockFile {
    pub providers: BTreeMap<String, ProviderLock>,
}

impl LockFile {
    pub fn parse(content: &str) -> Self {
        let mut providers = BTreeMap::new();
        let mut current: Option<(String, ProviderLock)> = None;

        for line in content.lines() {
            if let Some((address, lock)) = current.as_mut() {
                if line.starts_with('}') {
                    let address = std::mem::take(address);
                    let lock = std::mem::take(lock);
                    providers.insert(address, lock);
                    current = None;
                    continue;
                }
                if let Some(caps) = ATTRIBUTE.captures(line) {
                    match &caps[1] {
                        "version" => lock.version = caps[2].to_string(),
                        _ => lock.constraints = Some(caps[2].to_string()),
                    }
                }
                for caps in HASH.captures_iter(line) {
                    lock.hashes.insert(caps[1].to_string());
                }
            } else if let Some(caps) = PROVIDER_HEADER.captures(line) {
                current = Some((caps[1].to_string(), ProviderLock::default()));
            }
        }
        Self { providers }
    }

    pub fn render(&self) -> String {
        let mut out = String::from(LOCK_FILE_HEADER);
        for (address, lock) in &self.providers {
            out.push('\n');
            out.push_str(&format!("provider \"{}\" {{\n", address));
            out.push_str(&format!("  version     = \"{}\"\n", lock.version));
            if let Some(constraints) = &lock.constraints {
                out.push_str(&format!("  constraints = \"{}\"\n", constraints));
            }
            out.push_str("  hashes = [\n");
            for hash in &lock.hashes {
                out.push_str(&format!("    \"{}\",\n", hash));
            }
            out.push_str("  ]\n}\n");
        }
        out
    }

    /// Record `hashes` for `provider` at `version`.
    ///
    /// Hashes for the same version are merged; a different version replaces
    /// them. Existing constraints are kept either way.
    pub fn upsert(&mut self, provider: &ProviderKey, version: &str, hashes: BTreeSet<String>) {
        let entry = self.providers.entry(provider.address()).or_default();
        if entry.version != version {
            entry.version = version.to_string();
            entry.hashes.clear();
        }
        entry.hashes.extend(hashes);
    }
}

/// Hashes for each provider version among `keys`, from cached archives.
pub async fn hashes_from_cache(
    store: &CacheStore,
    keys: &[PackageKey],
) -> Result<BTreeMap<(ProviderKey, String), BTreeSet<String>>> {
    let mut out: BTreeMap<(ProviderKey, String), BTreeSet<String>> = BTreeMap::new();
    for key in keys {
        let Some(bytes) = store.read_archive(key).await? else {
            debug!(package = %key, "Package not cached, no lock hashes");
            continue;
        };
        let hashes = out
            .entry((key.provider().clone(), key.version().to_string()))
            .or_default();
        hashes.insert(hash_zh(&bytes));
        if plugcache_store::archiver::is_zip(&bytes) {
            hashes.insert(hash_h1(&bytes)?);
        }
    }
    Ok(out)
}

/// Update `<working_dir>/.terraform.lock.hcl` from the cached `keys`.
pub async fn update_from_cache(
    working_dir: &Path,
    store: &CacheStore,
    keys: &[PackageKey],
) -> Result<PathBuf> {
    let path = working_dir.join(LOCK_FILE_NAME);
    let mut lock = match tokio::fs::read_to_string(&path).await {
        Ok(content) => LockFile::parse(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => LockFile::default(),
        Err(e) => return Err(e.into()),
    };

    let derived = hashes_from_cache(store, keys).await?;
    for ((provider, version), hashes) in derived {
        lock.upsert(&provider, &version, hashes);
    }

    tokio::fs::write(&path, lock.render()).await?;
    info!(path = %path.display(), providers = lock.providers.len(), "Lock file updated from cache");
    Ok(path)
}

/// The lock file as it was before warm-up ran, so warm-up cannot alter it.
#[derive(Debug)]
pub struct LockfileSnapshot {
    path: PathBuf,
    content: Option<Vec<u8>>,
}

impl LockfileSnapshot {
    pub async fn capture(working_dir: &Path) -> Result<Self> {
        let path = working_dir.join(LOCK_FILE_NAME);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, content })
    }

    pub async fn restore(&self) -> Result<()> {
        match &self.content {
            Some(content) => tokio::fs::write(&self.path, content).await?,
            None => match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }
}
