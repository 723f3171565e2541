//! Wire types for the provider registry protocol and the network mirror
//! protocol.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `GET <providers>/<namespace>/<type>/versions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionsResponse {
    pub versions: Vec<VersionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub platforms: Vec<PlatformEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlatformEntry {
    pub os: String,
    pub arch: String,
}

/// `GET <providers>/<namespace>/<type>/<version>/download/<os>/<arch>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadResponse {
    #[serde(default)]
    pub protocols: Vec<String>,
    pub os: String,
    pub arch: String,
    pub filename: String,
    pub download_url: String,
    #[serde(default)]
    pub shasums_url: String,
    #[serde(default)]
    pub shasums_signature_url: String,
    pub shasum: String,
    #[serde(default)]
    pub signing_keys: serde_json::Value,
}

/// `GET <mirror>/<hostname>/<namespace>/<type>/index.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorIndex {
    pub versions: BTreeMap<String, serde_json::Value>,
}

/// `GET <mirror>/<hostname>/<namespace>/<type>/<version>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorVersion {
    pub archives: BTreeMap<String, MirrorArchive>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorArchive {
    pub url: String,
    #[serde(default)]
    pub hashes: Vec<String>,
}

impl MirrorArchive {
    /// The `zh:` archive hash, if the mirror advertises one.
    pub fn zh_hash(&self) -> Option<&str> {
        self.hashes.iter().find_map(|h| h.strip_prefix("zh:"))
    }
}

/// Registry-style error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub errors: Vec<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_download_response() {
        let body = r#"{
            "protocols": ["5.0"],
            "os": "linux",
            "arch": "amd64",
            "filename": "terraform-provider-aws_5.40.0_linux_amd64.zip",
            "download_url": "https://releases.example.com/aws.zip",
            "shasums_url": "https://releases.example.com/SHA256SUMS",
            "shasums_signature_url": "https://releases.example.com/SHA256SUMS.sig",
            "shasum": "abc123",
            "signing_keys": {"gpg_public_keys": []}
        }"#;
        let parsed: DownloadResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.shasum, "abc123");
        assert_eq!(parsed.protocols, vec!["5.0"]);
    }

    #[test]
    fn test_mirror_archive_zh_hash() {
        let archive = MirrorArchive {
            url: "aws.zip".into(),
            hashes: vec!["h1:xyz".into(), "zh:deadbeef".into()],
        };
        assert_eq!(archive.zh_hash(), Some("deadbeef"));
    }

    #[test]
    fn test_versions_tolerate_missing_fields() {
        let parsed: VersionsResponse =
            serde_json::from_str(r#"{"versions":[{"version":"1.0.0"}]}"#).unwrap();
        assert!(parsed.versions[0].platforms.is_empty());
    }
}
