//! Test helper functions and utilities.

use crate::fixtures::{NAMESPACE, PROVIDER_TYPE, VERSION};
use plugcache_core::RequestId;
use plugcache_registry::{
    Credentials, InstallationMethod, InstallationMethodConfig, MethodContext, MethodKind,
    RegistryDiscovery,
};
use plugcache_server::{AppState, ProviderCacheServer};
use plugcache_store::{CacheLayout, CacheStore};
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A cache server backed by temporary directories. Stops on drop.
pub struct TestCache {
    pub server: Arc<ProviderCacheServer>,
    pub discovery: Arc<RegistryDiscovery>,
    pub cancel: CancellationToken,
    dirs: TempDir,
}

impl TestCache {
    pub fn cache_dir(&self) -> PathBuf {
        self.dirs.path().join("cache")
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        self.server.store()
    }

    /// A fresh request scope on this server.
    pub fn register(&self) -> RequestId {
        let request_id = RequestId::new();
        self.store().register_request(request_id);
        request_id
    }
}

impl Drop for TestCache {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start a cache server that resolves misses through `methods`, in order.
pub async fn start_test_cache(methods: Vec<InstallationMethodConfig>) -> anyhow::Result<TestCache> {
    let dirs = tempfile::tempdir()?;
    let cancel = CancellationToken::new();

    let client = test_client();
    let discovery = Arc::new(RegistryDiscovery::new(client.clone(), "http"));
    let ctx = MethodContext {
        client,
        discovery: discovery.clone(),
        credentials: Arc::new(Credentials::new()),
    };
    let methods = methods
        .iter()
        .map(|m| InstallationMethod::from_config(m, &ctx))
        .collect::<plugcache_core::Result<Vec<_>>>()?;

    let store = Arc::new(CacheStore::new(
        CacheLayout::new(dirs.path().join("cache"), dirs.path().join("archives")),
        cancel.clone(),
    ));
    let state = Arc::new(AppState::new(store, methods, cancel.clone()));
    let server = ProviderCacheServer::start(state, "127.0.0.1", 0, &cancel).await?;

    Ok(TestCache {
        server: Arc::new(server),
        discovery,
        cancel,
        dirs,
    })
}

pub fn network_mirror(url: &str) -> InstallationMethodConfig {
    InstallationMethodConfig {
        kind: MethodKind::NetworkMirror {
            url: url.to_string(),
            token: None,
        },
        include: Vec::new(),
        exclude: Vec::new(),
    }
}

/// Create an HTTP client for testing.
pub fn test_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to create test client")
}

/// Talks to the cache server the way the wrapped tool does during warm-up.
pub struct ProviderClient {
    client: Client,
    base_url: String,
    providers_url: String,
    token: String,
}

impl ProviderClient {
    pub fn new(server: &ProviderCacheServer, request_id: RequestId, hostname: &str) -> Self {
        Self {
            client: test_client(),
            base_url: server.base_url(),
            providers_url: server.providers_url(request_id, hostname),
            token: server.token().to_string(),
        }
    }

    /// Without a token.
    pub fn anonymous(server: &ProviderCacheServer, request_id: RequestId, hostname: &str) -> Self {
        Self {
            token: String::new(),
            ..Self::new(server, request_id, hostname)
        }
    }

    async fn get(&self, url: String) -> reqwest::Result<reqwest::Response> {
        let mut req = self.client.get(url);
        if !self.token.is_empty() {
            req = req.bearer_auth(&self.token);
        }
        req.send().await
    }

    pub async fn versions(&self) -> reqwest::Result<reqwest::Response> {
        self.get(format!(
            "{}{}/{}/versions",
            self.providers_url, NAMESPACE, PROVIDER_TYPE
        ))
        .await
    }

    /// Download metadata for `platform` (`os_arch`).
    pub async fn download(&self, platform: &str) -> reqwest::Result<reqwest::Response> {
        let (os, arch) = platform.split_once('_').expect("platform is os_arch");
        self.get(format!(
            "{}{}/{}/{}/download/{}/{}",
            self.providers_url, NAMESPACE, PROVIDER_TYPE, VERSION, os, arch
        ))
        .await
    }

    /// A server-relative path such as a `download_url`.
    pub async fn fetch(&self, relative: &str) -> reqwest::Result<reqwest::Response> {
        self.get(format!("{}{}", self.base_url, relative)).await
    }
}
