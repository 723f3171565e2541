//! On-disk layout of the provider cache.
//!
//! Unpacked packages live at
//! `<cache_dir>/<hostname>/<namespace>/<type>/<version>/<os>_<arch>/`, the
//! layout the wrapped tool scans for a filesystem mirror. The original
//! archives are kept separately in packed layout under `archive_dir`.

use plugcache_core::{PackageKey, ProviderKey};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CacheLayout {
    cache_dir: PathBuf,
    archive_dir: PathBuf,
}

impl CacheLayout {
    pub fn new(cache_dir: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            archive_dir: archive_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub fn provider_dir(&self, provider: &ProviderKey) -> PathBuf {
        self.cache_dir
            .join(provider.hostname())
            .join(provider.namespace())
            .join(provider.provider_type())
    }

    pub fn package_dir(&self, key: &PackageKey) -> PathBuf {
        self.provider_dir(key.provider())
            .join(key.version())
            .join(key.platform.to_string())
    }

    pub fn archive_path(&self, key: &PackageKey) -> PathBuf {
        let provider = key.provider();
        self.archive_dir
            .join(provider.hostname())
            .join(provider.namespace())
            .join(provider.provider_type())
            .join(key.package_filename())
    }
}

/// A unique sibling of `target` to stage writes before the final rename.
pub fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("entry");
    target.with_file_name(format!(".{}.tmp-{}", name, Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PackageKey {
        ProviderKey::new("registry.example.com", "hashicorp", "aws")
            .unwrap()
            .with_version("5.40.0")
            .unwrap()
            .for_platform("linux_amd64".parse().unwrap())
    }

    #[test]
    fn test_package_dir() {
        let layout = CacheLayout::new("/cache", "/archives");
        assert_eq!(
            layout.package_dir(&key()),
            PathBuf::from("/cache/registry.example.com/hashicorp/aws/5.40.0/linux_amd64")
        );
    }

    #[test]
    fn test_archive_path() {
        let layout = CacheLayout::new("/cache", "/archives");
        assert_eq!(
            layout.archive_path(&key()),
            PathBuf::from(
                "/archives/registry.example.com/hashicorp/aws/terraform-provider-aws_5.40.0_linux_amd64.zip"
            )
        );
    }

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        let target = PathBuf::from("/cache/a/linux_amd64");
        let staged = staging_path(&target);
        assert_eq!(staged.parent(), target.parent());
        let name = staged.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".linux_amd64.tmp-"));
        assert_ne!(staging_path(&target), staged);
    }
}
