//! Registry service discovery via `/.well-known/terraform.json`.

use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_PROVIDERS_PATH: &str = "/v1/providers/";
pub const DEFAULT_MODULES_PATH: &str = "/v1/modules/";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The host answered but has no usable discovery document.
    #[error("No discovery document for {hostname}: {reason}")]
    NotFound { hostname: String, reason: String },

    #[error("Discovery request to {hostname} failed: {source}")]
    Transport {
        hostname: String,
        #[source]
        source: reqwest::Error,
    },
}

impl From<DiscoveryError> for plugcache_core::Error {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::NotFound { hostname, reason } => {
                plugcache_core::Error::DiscoveryUnavailable { hostname, reason }
            }
            DiscoveryError::Transport { hostname, source } => {
                plugcache_core::Error::DiscoveryUnavailable {
                    hostname,
                    reason: source.to_string(),
                }
            }
        }
    }
}

/// Service base paths advertised by a registry host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    #[serde(rename = "providers.v1", default = "default_providers")]
    pub providers: String,
    #[serde(rename = "modules.v1", default = "default_modules")]
    pub modules: String,
}

fn default_providers() -> String {
    DEFAULT_PROVIDERS_PATH.to_string()
}

fn default_modules() -> String {
    DEFAULT_MODULES_PATH.to_string()
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            modules: default_modules(),
        }
    }
}

impl ServiceEndpoints {
    /// Absolute providers base URL for `hostname`, always ending in `/`.
    pub fn providers_url(&self, scheme: &str, hostname: &str) -> plugcache_core::Result<Url> {
        resolve_service(scheme, hostname, &self.providers)
    }

    /// Absolute modules base URL for `hostname`, always ending in `/`.
    pub fn modules_url(&self, scheme: &str, hostname: &str) -> plugcache_core::Result<Url> {
        resolve_service(scheme, hostname, &self.modules)
    }
}

fn resolve_service(scheme: &str, hostname: &str, path: &str) -> plugcache_core::Result<Url> {
    let origin = Url::parse(&format!("{}://{}/", scheme, hostname)).map_err(|e| {
        plugcache_core::Error::InvalidAddress(format!("{}: {}", hostname, e))
    })?;
    let mut url = origin.join(path).map_err(|e| {
        plugcache_core::Error::DiscoveryUnavailable {
            hostname: hostname.to_string(),
            reason: format!("invalid service path {:?}: {}", path, e),
        }
    })?;
    if !url.path().ends_with('/') {
        let with_slash = format!("{}/", url.path());
        url.set_path(&with_slash);
    }
    Ok(url)
}

/// Looks up and memoises registry discovery documents.
pub struct RegistryDiscovery {
    client: Client,
    scheme: String,
    cache: DashMap<String, ServiceEndpoints>,
}

impl RegistryDiscovery {
    pub fn new(client: Client, scheme: impl Into<String>) -> Self {
        Self {
            client,
            scheme: scheme.into(),
            cache: DashMap::new(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Fetch the discovery document for `hostname`.
    ///
    /// Successful lookups are cached for the life of the process.
    pub async fn discover(&self, hostname: &str) -> Result<ServiceEndpoints, DiscoveryError> {
        let hostname = hostname.to_ascii_lowercase();
        if let Some(cached) = self.cache.get(&hostname) {
            return Ok(cached.clone());
        }

        let url = format!("{}://{}/.well-known/terraform.json", self.scheme, hostname);
        debug!(%url, "Fetching registry discovery document");

        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| DiscoveryError::Transport {
                hostname: hostname.clone(),
                source,
            })?;

        let status = res.status();
        if status != StatusCode::OK {
            return Err(DiscoveryError::NotFound {
                hostname,
                reason: format!("status {}", status),
            });
        }

        let body = res
            .bytes()
            .await
            .map_err(|source| DiscoveryError::Transport {
                hostname: hostname.clone(),
                source,
            })?;
        let endpoints: ServiceEndpoints =
            serde_json::from_slice(&body).map_err(|e| DiscoveryError::NotFound {
                hostname: hostname.clone(),
                reason: format!("malformed document: {}", e),
            })?;

        self.cache.insert(hostname, endpoints.clone());
        Ok(endpoints)
    }

    /// Discovery with fallback to the conventional default paths.
    ///
    /// Transport errors are still returned to the caller.
    pub async fn endpoints_for(&self, hostname: &str) -> Result<ServiceEndpoints, DiscoveryError> {
        match self.discover(hostname).await {
            Ok(endpoints) => Ok(endpoints),
            Err(DiscoveryError::NotFound { hostname, reason }) => {
                debug!(%hostname, %reason, "Using default registry service paths");
                Ok(ServiceEndpoints::default())
            }
            Err(err) => {
                warn!(error = %err, "Registry discovery failed");
                Err(err)
            }
        }
    }
}
