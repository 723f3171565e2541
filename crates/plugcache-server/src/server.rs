//! Listener lifecycle for the cache server.

use plugcache_core::{Error, RequestId, Result};
use plugcache_store::CacheStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::routes::create_router;
use crate::state::AppState;

/// A running cache server bound to a loopback address.
pub struct ProviderCacheServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProviderCacheServer {
    /// Bind `host:port` (port 0 picks a free one) and start serving.
    ///
    /// The server stops when `cancel` or [`ProviderCacheServer::shutdown`] fires.
    pub async fn start(
        state: Arc<AppState>,
        host: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        let addr = listener.local_addr()?;
        let shutdown = cancel.child_token();

        let app = create_router(state.clone());
        let signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
            {
                error!(error = %e, "Cache server stopped with an error");
            }
        });

        info!(%addr, "Provider cache server listening");
        Ok(Self {
            addr,
            state,
            shutdown,
            handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn token(&self) -> &str {
        &self.state.token
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.state.store
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Providers service URL the wrapped tool should use for `hostname`
    /// while warming up under `request_id`.
    pub fn providers_url(&self, request_id: RequestId, hostname: &str) -> String {
        format!("{}/{}/v1/providers/{}/", self.base_url(), request_id, hostname)
    }

    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        self.handle
            .await
            .map_err(|e| Error::Internal(format!("Cache server task failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugcache_core::ProviderKey;
    use plugcache_registry::{
        Credentials, InstallationMethod, InstallationMethodConfig, MethodContext, MethodKind,
        RegistryDiscovery,
    };
    use plugcache_store::CacheLayout;
    use std::time::Duration;

    struct Fixture {
        server: ProviderCacheServer,
        _dirs: tempfile::TempDir,
    }

    async fn start_with_mirror(files: &[(&str, &[u8])]) -> Fixture {
        let dirs = tempfile::tempdir().unwrap();
        let mirror = dirs.path().join("mirror");
        for (name, content) in files {
            let dir = mirror.join("registry.example.com/hashicorp/aws");
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(name), content).unwrap();
        }

        let cancel = CancellationToken::new();
        let store = Arc::new(CacheStore::new(
            CacheLayout::new(dirs.path().join("cache"), dirs.path().join("archives")),
            cancel.clone(),
        ));
        let client = reqwest::Client::new();
        let ctx = MethodContext {
            client: client.clone(),
            discovery: Arc::new(RegistryDiscovery::new(client, "http")),
            credentials: Arc::new(Credentials::new()),
        };
        let config = InstallationMethodConfig {
            kind: MethodKind::FilesystemMirror { path: mirror },
            include: Vec::new(),
            exclude: Vec::new(),
        };
        let methods = vec![InstallationMethod::from_config(&config, &ctx).unwrap()];
        let state = Arc::new(AppState::new(store, methods, cancel.clone()));
        let server = ProviderCacheServer::start(state, "127.0.0.1", 0, &cancel)
            .await
            .unwrap();
        Fixture {
            server,
            _dirs: dirs,
        }
    }

    fn download_url(server: &ProviderCacheServer, request_id: RequestId) -> String {
        format!(
            "{}hashicorp/aws/5.40.0/download/linux/amd64",
            server.providers_url(request_id, "registry.example.com")
        )
    }

    #[tokio::test]
    async fn test_rejects_missing_token() {
        let fixture = start_with_mirror(&[]).await;
        let request_id = RequestId::new();
        fixture.server.store().register_request(request_id);

        let res = reqwest::get(download_url(&fixture.server, request_id))
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::UNAUTHORIZED);

        fixture.server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let fixture = start_with_mirror(&[]).await;
        let res = reqwest::get(format!("{}/health", fixture.server.base_url()))
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_unknown_request_is_404() {
        let fixture = start_with_mirror(&[]).await;
        let client = reqwest::Client::new();

        let res = client
            .get(download_url(&fixture.server, RequestId::new()))
            .bearer_auth(fixture.server.token())
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_populating_then_ready_then_archive() {
        let fixture = start_with_mirror(&[(
            "terraform-provider-aws_5.40.0_linux_amd64.zip",
            b"package-bytes",
        )])
        .await;
        let server = &fixture.server;
        let client = reqwest::Client::new();
        let request_id = RequestId::new();
        server.store().register_request(request_id);

        let first = client
            .get(download_url(server, request_id))
            .header("x-api-key", server.token())
            .send()
            .await
            .unwrap();
        assert_eq!(first.status(), reqwest::StatusCode::LOCKED);

        server
            .store()
            .wait_for_request(request_id, Duration::from_secs(5))
            .await
            .unwrap();

        let ready = client
            .get(download_url(server, request_id))
            .bearer_auth(server.token())
            .send()
            .await
            .unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::OK);
        let metadata: serde_json::Value = ready.json().await.unwrap();
        let download = metadata["download_url"].as_str().unwrap().to_string();

        let archive = client
            .get(format!("{}{}", server.base_url(), download))
            .bearer_auth(server.token())
            .send()
            .await
            .unwrap();
        assert_eq!(archive.status(), reqwest::StatusCode::OK);
        assert_eq!(archive.bytes().await.unwrap().as_ref(), b"package-bytes");

        let provider = ProviderKey::new("registry.example.com", "hashicorp", "aws").unwrap();
        let package_dir = server.store().layout().provider_dir(&provider).join("5.40.0/linux_amd64");
        assert!(package_dir.exists());
    }

    #[tokio::test]
    async fn test_missing_package_reports_failure() {
        let fixture = start_with_mirror(&[]).await;
        let server = &fixture.server;
        let client = reqwest::Client::new();
        let request_id = RequestId::new();
        server.store().register_request(request_id);

        client
            .get(download_url(server, request_id))
            .bearer_auth(server.token())
            .send()
            .await
            .unwrap();
        let err = server
            .store()
            .wait_for_request(request_id, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No installation method"));

        let res = client
            .get(download_url(server, request_id))
            .bearer_auth(server.token())
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = res.json().await.unwrap();
        assert!(body["errors"][0].as_str().unwrap().contains("No installation method"));
    }

    #[tokio::test]
    async fn test_versions_from_filesystem_mirror() {
        let fixture = start_with_mirror(&[(
            "terraform-provider-aws_5.40.0_linux_amd64.zip",
            b"package-bytes",
        )])
        .await;
        let server = &fixture.server;
        let request_id = RequestId::new();
        server.store().register_request(request_id);

        let res = reqwest::Client::new()
            .get(format!(
                "{}hashicorp/aws/versions",
                server.providers_url(request_id, "registry.example.com")
            ))
            .bearer_auth(server.token())
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["versions"][0]["version"], "5.40.0");
    }
}
