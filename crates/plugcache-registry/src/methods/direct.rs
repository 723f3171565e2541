use super::{Resolution, fetch_failed, get_optional, read_bytes, read_json};
use crate::credentials::Credentials;
use crate::discovery::RegistryDiscovery;
use crate::protocol::{DownloadResponse, VersionEntry, VersionsResponse};
use plugcache_core::{PackageKey, ProviderKey, Result};
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Fetches packages from the provider's origin registry.
pub struct DirectSource {
    client: Client,
    discovery: Arc<RegistryDiscovery>,
    credentials: Arc<Credentials>,
}

impl DirectSource {
    pub fn new(
        client: Client,
        discovery: Arc<RegistryDiscovery>,
        credentials: Arc<Credentials>,
    ) -> Self {
        Self {
            client,
            discovery,
            credentials,
        }
    }

    async fn provider_base(&self, provider: &ProviderKey) -> Result<Url> {
        let hostname = provider.hostname();
        let endpoints = self.discovery.endpoints_for(hostname).await?;
        let base = endpoints.providers_url(self.discovery.scheme(), hostname)?;
        base.join(&format!(
            "{}/{}/",
            provider.namespace(),
            provider.provider_type()
        ))
        .map_err(|e| fetch_failed(provider, e))
    }

    pub async fn list_versions(&self, provider: &ProviderKey) -> Result<Option<Vec<VersionEntry>>> {
        let url = self
            .provider_base(provider)
            .await?
            .join("versions")
            .map_err(|e| fetch_failed(provider, e))?;
        let token = self.credentials.token_for(provider.hostname());

        let Some(res) = get_optional(&self.client, url.as_str(), token, provider).await? else {
            return Ok(None);
        };
        let versions: VersionsResponse = read_json(res, provider).await?;
        Ok(Some(versions.versions))
    }

    pub async fn resolve(&self, key: &PackageKey) -> Result<Option<Resolution>> {
        let provider = key.provider();
        let metadata_url = self
            .provider_base(provider)
            .await?
            .join(&format!(
                "{}/download/{}/{}",
                key.version(),
                key.platform.os,
                key.platform.arch
            ))
            .map_err(|e| fetch_failed(key, e))?;
        let token = self.credentials.token_for(provider.hostname());

        let Some(res) = get_optional(&self.client, metadata_url.as_str(), token, key).await? else {
            return Err(fetch_failed(
                key,
                "the registry has no package for this version and platform",
            ));
        };
        let metadata: DownloadResponse = read_json(res, key).await?;

        let download_url = metadata_url
            .join(&metadata.download_url)
            .map_err(|e| fetch_failed(key, e))?;
        // Registry credentials only go back to the registry itself.
        let download_token = if download_url.host_str() == metadata_url.host_str() {
            token
        } else {
            None
        };

        debug!(package = %key, url = %download_url, "Downloading provider package");
        let Some(res) =
            get_optional(&self.client, download_url.as_str(), download_token, key).await?
        else {
            return Err(fetch_failed(key, format!("{} not found", download_url)));
        };
        let bytes = read_bytes(res, key).await?;

        Ok(Some(Resolution {
            bytes,
            checksum: metadata.shasum.to_ascii_lowercase(),
            source: "direct",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::{InstallationMethod, InstallationMethodConfig, MethodContext};
    use plugcache_core::Error;
    use sha2::{Digest, Sha256};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn method_for(creds: Credentials) -> InstallationMethod {
        let client = Client::new();
        let ctx = MethodContext {
            client: client.clone(),
            discovery: Arc::new(RegistryDiscovery::new(client, "http")),
            credentials: Arc::new(creds),
        };
        InstallationMethod::from_config(&InstallationMethodConfig::direct(), &ctx).unwrap()
    }

    fn key(host: &str) -> PackageKey {
        ProviderKey::new(host, "hashicorp", "aws")
            .unwrap()
            .with_version("5.40.0")
            .unwrap()
            .for_platform("linux_amd64".parse().unwrap())
    }

    #[tokio::test]
    async fn test_resolve_via_discovered_paths() {
        let server = MockServer::start().await;
        let host = server.address().to_string();
        let payload = b"provider-archive".to_vec();
        let shasum = hex::encode(Sha256::digest(&payload));

        Mock::given(method("GET"))
            .and(path("/.well-known/terraform.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"providers.v1": "/p/"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/p/hashicorp/aws/5.40.0/download/linux/amd64"))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "os": "linux",
                "arch": "amd64",
                "filename": "terraform-provider-aws_5.40.0_linux_amd64.zip",
                "download_url": "/files/aws.zip",
                "shasum": shasum.to_uppercase(),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/aws.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let method = method_for(Credentials::new().with_token(&host, "sekrit"));
        let resolved = method.resolve(&key(&host)).await.unwrap().unwrap();

        assert_eq!(resolved.bytes, payload);
        assert_eq!(resolved.checksum, shasum);
    }

    #[tokio::test]
    async fn test_missing_package_is_fetch_failure() {
        let server = MockServer::start().await;
        let host = server.address().to_string();
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let method = method_for(Credentials::new());
        let err = method.resolve(&key(&host)).await.unwrap_err();
        assert!(matches!(err, Error::FetchFailed { .. }));
    }

    #[tokio::test]
    async fn test_list_versions_with_default_paths() {
        let server = MockServer::start().await;
        let host = server.address().to_string();
        Mock::given(method("GET"))
            .and(path("/v1/providers/hashicorp/aws/versions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "versions": [
                    {"version": "5.40.0", "protocols": ["5.0"],
                     "platforms": [{"os": "linux", "arch": "amd64"}]}
                ]
            })))
            .mount(&server)
            .await;

        let method = method_for(Credentials::new());
        let provider = ProviderKey::new(&host, "hashicorp", "aws").unwrap();
        let versions = method.list_versions(&provider).await.unwrap().unwrap();

        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, "5.40.0");
    }
}
