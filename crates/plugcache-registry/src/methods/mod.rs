//! Installation methods: the ordered sources a cache miss is filled from.

mod direct;
mod filesystem;
mod network;

pub use direct::DirectSource;
pub use filesystem::FilesystemMirror;
pub use network::NetworkMirror;

use crate::credentials::Credentials;
use crate::discovery::RegistryDiscovery;
use crate::protocol::VersionEntry;
use glob::{MatchOptions, Pattern};
use plugcache_core::{Error, PackageKey, ProviderKey, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Package bytes plus the checksum their source vouches for.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub bytes: Vec<u8>,
    /// Lowercase hex SHA-256 of `bytes` as reported by the source.
    pub checksum: String,
    pub source: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MethodKind {
    Direct,
    FilesystemMirror {
        path: PathBuf,
    },
    NetworkMirror {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
}

/// One configured installation method, as read from the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallationMethodConfig {
    #[serde(flatten)]
    pub kind: MethodKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl InstallationMethodConfig {
    pub fn direct() -> Self {
        Self {
            kind: MethodKind::Direct,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// Shared collaborators the methods are built with.
#[derive(Clone)]
pub struct MethodContext {
    pub client: Client,
    pub discovery: Arc<RegistryDiscovery>,
    pub credentials: Arc<Credentials>,
}

#[derive(Debug, Clone, Default)]
struct MatchRules {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

const SEGMENT_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl MatchRules {
    fn compile(include: &[String], exclude: &[String]) -> Result<Self> {
        let compile_all = |patterns: &[String]| -> Result<Vec<Pattern>> {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|e| {
                        Error::InvalidAddress(format!("invalid provider pattern {:?}: {}", p, e))
                    })
                })
                .collect()
        };
        Ok(Self {
            include: compile_all(include)?,
            exclude: compile_all(exclude)?,
        })
    }

    fn matches(&self, provider: &ProviderKey) -> bool {
        let address = provider.address();
        let included = self.include.is_empty()
            || self
                .include
                .iter()
                .any(|p| p.matches_with(&address, SEGMENT_MATCH));
        included
            && !self
                .exclude
                .iter()
                .any(|p| p.matches_with(&address, SEGMENT_MATCH))
    }
}

enum Source {
    Direct(DirectSource),
    FilesystemMirror(FilesystemMirror),
    NetworkMirror(NetworkMirror),
}

pub struct InstallationMethod {
    rules: MatchRules,
    source: Source,
}

impl InstallationMethod {
    pub fn from_config(config: &InstallationMethodConfig, ctx: &MethodContext) -> Result<Self> {
        let rules = MatchRules::compile(&config.include, &config.exclude)?;
        let source = match &config.kind {
            MethodKind::Direct => Source::Direct(DirectSource::new(
                ctx.client.clone(),
                ctx.discovery.clone(),
                ctx.credentials.clone(),
            )),
            MethodKind::FilesystemMirror { path } => {
                Source::FilesystemMirror(FilesystemMirror::new(path.clone()))
            }
            MethodKind::NetworkMirror { url, token } => Source::NetworkMirror(NetworkMirror::new(
                ctx.client.clone(),
                url,
                token.clone(),
            )?),
        };
        Ok(Self { rules, source })
    }

    pub fn name(&self) -> &'static str {
        match &self.source {
            Source::Direct(_) => "direct",
            Source::FilesystemMirror(_) => "filesystem_mirror",
            Source::NetworkMirror(_) => "network_mirror",
        }
    }

    /// Whether this method's include/exclude rules admit `provider`.
    pub fn matches(&self, provider: &ProviderKey) -> bool {
        self.rules.matches(provider)
    }

    /// Fetch the package. `Ok(None)` means this method declines it.
    pub async fn resolve(&self, key: &PackageKey) -> Result<Option<Resolution>> {
        match &self.source {
            Source::Direct(s) => s.resolve(key).await,
            Source::FilesystemMirror(s) => s.resolve(key).await,
            Source::NetworkMirror(s) => s.resolve(key).await,
        }
    }

    /// Versions this method can supply. `Ok(None)` means it knows none.
    pub async fn list_versions(&self, provider: &ProviderKey) -> Result<Option<Vec<VersionEntry>>> {
        match &self.source {
            Source::Direct(s) => s.list_versions(provider).await,
            Source::FilesystemMirror(s) => s.list_versions(provider).await,
            Source::NetworkMirror(s) => s.list_versions(provider).await,
        }
    }
}

/// Resolve `key` through `methods` in order; the first that accepts wins.
pub async fn resolve_package(methods: &[InstallationMethod], key: &PackageKey) -> Result<Resolution> {
    for method in methods {
        if !method.matches(key.provider()) {
            continue;
        }
        match method.resolve(key).await? {
            Some(resolution) => {
                debug!(package = %key, method = method.name(), "Package resolved");
                return Ok(resolution);
            }
            None => debug!(package = %key, method = method.name(), "Method declined package"),
        }
    }
    Err(Error::NoHandlerMatched(key.to_string()))
}

fn fetch_failed(key: &impl std::fmt::Display, reason: impl std::fmt::Display) -> Error {
    Error::FetchFailed {
        package: key.to_string(),
        reason: reason.to_string(),
    }
}

/// GET `url`, returning `None` on 404.
async fn get_optional(
    client: &Client,
    url: &str,
    token: Option<&str>,
    subject: &impl std::fmt::Display,
) -> Result<Option<reqwest::Response>> {
    let mut req = client.get(url);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    let res = req.send().await.map_err(|e| fetch_failed(subject, e))?;
    match res.status() {
        status if status.is_success() => Ok(Some(res)),
        StatusCode::NOT_FOUND => Ok(None),
        status => Err(fetch_failed(subject, format!("GET {} returned {}", url, status))),
    }
}

async fn read_bytes(res: reqwest::Response, subject: &impl std::fmt::Display) -> Result<Vec<u8>> {
    res.bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| fetch_failed(subject, e))
}

async fn read_json<T: serde::de::DeserializeOwned>(
    res: reqwest::Response,
    subject: &impl std::fmt::Display,
) -> Result<T> {
    let body = read_bytes(res, subject).await?;
    serde_json::from_slice(&body).map_err(|e| fetch_failed(subject, format!("malformed response: {}", e)))
}
