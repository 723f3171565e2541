use super::Resolution;
use crate::protocol::{PlatformEntry, VersionEntry};
use plugcache_core::{PackageKey, ProviderKey, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A local directory in packed layout:
/// `<root>/<hostname>/<namespace>/<type>/terraform-provider-<type>_<version>_<os>_<arch>.zip`.
pub struct FilesystemMirror {
    root: PathBuf,
}

impl FilesystemMirror {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn provider_dir(&self, provider: &ProviderKey) -> PathBuf {
        self.root
            .join(provider.hostname())
            .join(provider.namespace())
            .join(provider.provider_type())
    }

    pub async fn resolve(&self, key: &PackageKey) -> Result<Option<Resolution>> {
        let path = self.provider_dir(key.provider()).join(key.package_filename());
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checksum = hex::encode(Sha256::digest(&bytes));
        Ok(Some(Resolution {
            bytes,
            checksum,
            source: "filesystem_mirror",
        }))
    }

    pub async fn list_versions(&self, provider: &ProviderKey) -> Result<Option<Vec<VersionEntry>>> {
        let dir = self.provider_dir(provider);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("terraform-provider-{}_", provider.provider_type());
        let mut versions: BTreeMap<String, Vec<PlatformEntry>> = BTreeMap::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name
                .to_str()
                .and_then(|n| n.strip_prefix(&prefix))
                .and_then(|n| n.strip_suffix(".zip"))
            else {
                continue;
            };
            // <version>_<os>_<arch>; versions never contain '_'.
            let mut parts = stem.rsplitn(3, '_');
            let (Some(arch), Some(os), Some(version)) = (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            versions
                .entry(version.to_string())
                .or_default()
                .push(PlatformEntry {
                    os: os.to_string(),
                    arch: arch.to_string(),
                });
        }

        if versions.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            versions
                .into_iter()
                .map(|(version, mut platforms)| {
                    platforms.sort();
                    VersionEntry {
                        version,
                        protocols: Vec::new(),
                        platforms,
                    }
                })
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ProviderKey {
        ProviderKey::new("registry.example.com", "hashicorp", "aws").unwrap()
    }

    fn write_package(root: &std::path::Path, file: &str, content: &[u8]) {
        let dir = root.join("registry.example.com/hashicorp/aws");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), content).unwrap();
    }

    #[tokio::test]
    async fn test_resolve_present_package() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), "terraform-provider-aws_5.40.0_linux_amd64.zip", b"zip");
        let mirror = FilesystemMirror::new(dir.path().to_path_buf());

        let key = provider()
            .with_version("5.40.0")
            .unwrap()
            .for_platform("linux_amd64".parse().unwrap());
        let resolved = mirror.resolve(&key).await.unwrap().unwrap();

        assert_eq!(resolved.bytes, b"zip");
        assert_eq!(resolved.checksum, hex::encode(Sha256::digest(b"zip")));
    }

    #[tokio::test]
    async fn test_declines_absent_package() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = FilesystemMirror::new(dir.path().to_path_buf());
        let key = provider()
            .with_version("1.0.0")
            .unwrap()
            .for_platform("linux_amd64".parse().unwrap());

        assert!(mirror.resolve(&key).await.unwrap().is_none());
        assert!(mirror.list_versions(&provider()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_versions_groups_platforms() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path(), "terraform-provider-aws_5.40.0_linux_amd64.zip", b"a");
        write_package(dir.path(), "terraform-provider-aws_5.40.0_darwin_arm64.zip", b"b");
        write_package(dir.path(), "terraform-provider-aws_5.41.0_linux_amd64.zip", b"c");
        write_package(dir.path(), "README.md", b"ignored");
        let mirror = FilesystemMirror::new(dir.path().to_path_buf());

        let versions = mirror.list_versions(&provider()).await.unwrap().unwrap();

        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, "5.40.0");
        assert_eq!(
            versions[0].platforms,
            vec![
                PlatformEntry { os: "darwin".into(), arch: "arm64".into() },
                PlatformEntry { os: "linux".into(), arch: "amd64".into() },
            ]
        );
    }
}
