//! Provider, version, platform and package addresses.
//!
//! Every segment of an address ends up as a path component in the on-disk
//! cache, so construction rejects empty segments, separators and dot paths.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

fn validate_segment(kind: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.chars().any(char::is_whitespace)
    {
        return Err(Error::InvalidAddress(format!("invalid {}: {:?}", kind, value)));
    }
    Ok(())
}

/// A provider family: `registry.terraform.io/hashicorp/aws`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderKey {
    hostname: String,
    namespace: String,
    provider_type: String,
}

impl ProviderKey {
    pub fn new(
        hostname: impl Into<String>,
        namespace: impl Into<String>,
        provider_type: impl Into<String>,
    ) -> Result<Self> {
        let hostname = hostname.into().to_ascii_lowercase();
        let namespace = namespace.into().to_ascii_lowercase();
        let provider_type = provider_type.into().to_ascii_lowercase();
        validate_segment("hostname", &hostname)?;
        validate_segment("namespace", &namespace)?;
        validate_segment("provider type", &provider_type)?;
        Ok(Self {
            hostname,
            namespace,
            provider_type,
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn provider_type(&self) -> &str {
        &self.provider_type
    }

    /// Fully-qualified address as used in lock files and glob rules.
    pub fn address(&self) -> String {
        format!("{}/{}/{}", self.hostname, self.namespace, self.provider_type)
    }

    pub fn with_version(&self, version: impl Into<String>) -> Result<ProviderVersion> {
        ProviderVersion::new(self.clone(), version)
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.hostname, self.namespace, self.provider_type)
    }
}

impl FromStr for ProviderKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [hostname, namespace, provider_type] => {
                Self::new(*hostname, *namespace, *provider_type)
            }
            _ => Err(Error::InvalidAddress(format!(
                "expected hostname/namespace/type, got {:?}",
                s
            ))),
        }
    }
}

/// A provider family pinned to one version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderVersion {
    pub provider: ProviderKey,
    version: String,
}

impl ProviderVersion {
    pub fn new(provider: ProviderKey, version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        let version = version.strip_prefix('v').unwrap_or(&version).to_string();
        validate_segment("version", &version)?;
        Ok(Self { provider, version })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn for_platform(&self, platform: Platform) -> PackageKey {
        PackageKey {
            provider_version: self.clone(),
            platform,
        }
    }
}

impl fmt::Display for ProviderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.provider, self.version)
    }
}

/// An OS/architecture pair such as `linux_amd64`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Result<Self> {
        let os = os.into().to_ascii_lowercase();
        let arch = arch.into().to_ascii_lowercase();
        validate_segment("os", &os)?;
        validate_segment("arch", &arch)?;
        if os.contains('_') {
            return Err(Error::InvalidAddress(format!("invalid os: {:?}", os)));
        }
        Ok(Self { os, arch })
    }

    /// The platform this process is running on, in registry naming.
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            "arm" => "arm",
            other => other,
        };
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (os, arch) = s
            .split_once('_')
            .ok_or_else(|| Error::InvalidAddress(format!("expected os_arch, got {:?}", s)))?;
        Self::new(os, arch)
    }
}

/// The unit of caching: one provider version built for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageKey {
    pub provider_version: ProviderVersion,
    pub platform: Platform,
}

impl PackageKey {
    pub fn provider(&self) -> &ProviderKey {
        &self.provider_version.provider
    }

    pub fn version(&self) -> &str {
        self.provider_version.version()
    }

    /// Archive file name in the registry's packed layout.
    pub fn package_filename(&self) -> String {
        format!(
            "terraform-provider-{}_{}_{}_{}.zip",
            self.provider().provider_type(),
            self.version(),
            self.platform.os,
            self.platform.arch
        )
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.provider_version, self.platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn aws() -> ProviderKey {
        ProviderKey::new("registry.example.com", "hashicorp", "aws").unwrap()
    }

    #[test]
    fn test_provider_key_parse() {
        let key: ProviderKey = "Registry.Example.com/hashicorp/aws".parse().unwrap();
        assert_eq!(key, aws());
        assert_eq!(key.address(), "registry.example.com/hashicorp/aws");
    }

    #[test]
    fn test_provider_key_rejects_traversal() {
        assert!(ProviderKey::new("registry.example.com", "..", "aws").is_err());
        assert!(ProviderKey::new("registry.example.com", "a/b", "aws").is_err());
        assert!("registry.example.com/aws".parse::<ProviderKey>().is_err());
    }

    #[test]
    fn test_version_strips_prefix() {
        let v = aws().with_version("v5.40.0").unwrap();
        assert_eq!(v.version(), "5.40.0");
    }

    #[test]
    fn test_platform_parse() {
        let p: Platform = "darwin_arm64".parse().unwrap();
        assert_eq!(p.os, "darwin");
        assert_eq!(p.arch, "arm64");
        assert_eq!(p.to_string(), "darwin_arm64");
        assert!("linux".parse::<Platform>().is_err());
    }

    #[test]
    fn test_package_display_and_filename() {
        let key = aws()
            .with_version("5.40.0")
            .unwrap()
            .for_platform("linux_amd64".parse().unwrap());
        assert_eq!(
            key.to_string(),
            "registry.example.com/hashicorp/aws 5.40.0 linux_amd64"
        );
        assert_eq!(
            key.package_filename(),
            "terraform-provider-aws_5.40.0_linux_amd64.zip"
        );
    }
}
