//! Fake registries, mirrors and provider packages.

use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

pub const NAMESPACE: &str = "hashicorp";
pub const PROVIDER_TYPE: &str = "aws";
pub const VERSION: &str = "5.40.0";

/// A provider package zip holding one fake plugin binary.
pub fn provider_zip(platform: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(
            format!("terraform-provider-{}_v{}_x5", PROVIDER_TYPE, VERSION),
            SimpleFileOptions::default(),
        )
        .expect("Failed to start zip entry");
    writer
        .write_all(format!("plugin binary for {}", platform).as_bytes())
        .expect("Failed to write zip entry");
    writer
        .finish()
        .expect("Failed to finish zip")
        .into_inner()
}

pub fn sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn package_filename(platform: &str) -> String {
    format!("terraform-provider-{}_{}_{}.zip", PROVIDER_TYPE, VERSION, platform)
}

/// A fake origin registry speaking the provider registry protocol.
pub struct RegistryFixture {
    pub server: MockServer,
    providers_path: String,
}

impl RegistryFixture {
    /// A registry with no discovery document; clients fall back to the
    /// default providers path.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            providers_path: "/v1/providers/".to_string(),
        }
    }

    /// A registry advertising `providers_path` through service discovery.
    pub async fn with_discovery(providers_path: &str) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/terraform.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "providers.v1": providers_path,
                "modules.v1": "/v1/modules/",
            })))
            .mount(&server)
            .await;
        Self {
            server,
            providers_path: providers_path.to_string(),
        }
    }

    /// `host:port`, used as the registry hostname in provider addresses.
    pub fn hostname(&self) -> String {
        self.server.address().to_string()
    }

    fn provider_path(&self, suffix: &str) -> String {
        format!(
            "{}{}/{}/{}",
            self.providers_path, NAMESPACE, PROVIDER_TYPE, suffix
        )
    }

    /// Versions listing naming every platform in `platforms`.
    pub async fn mount_versions(&self, platforms: &[&str]) {
        let platforms: Vec<_> = platforms
            .iter()
            .filter_map(|p| p.split_once('_'))
            .map(|(os, arch)| serde_json::json!({"os": os, "arch": arch}))
            .collect();
        Mock::given(method("GET"))
            .and(path(self.provider_path("versions")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "versions": [{"version": VERSION, "protocols": ["5.0"], "platforms": platforms}]
            })))
            .mount(&self.server)
            .await;
    }

    /// Download metadata advertising `shasum`, answered at most `times`
    /// times when given.
    pub async fn mount_metadata(&self, platform: &str, shasum: &str, times: Option<u64>) {
        let (os, arch) = platform.split_once('_').expect("platform is os_arch");
        let mut mock = Mock::given(method("GET"))
            .and(path(self.provider_path(&format!("{}/download/{}/{}", VERSION, os, arch))))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "protocols": ["5.0"],
                "os": os,
                "arch": arch,
                "filename": package_filename(platform),
                "download_url": format!("/files/{}", package_filename(platform)),
                "shasums_url": "",
                "shasums_signature_url": "",
                "shasum": shasum,
                "signing_keys": {"gpg_public_keys": []},
            })));
        if let Some(times) = times {
            mock = mock.up_to_n_times(times);
        }
        mock.mount(&self.server).await;
    }

    /// The archive itself, expected to be downloaded exactly `expected` times
    /// when given.
    pub async fn mount_archive(&self, platform: &str, bytes: &[u8], expected: Option<u64>) {
        let mut mock = Mock::given(method("GET"))
            .and(path(format!("/files/{}", package_filename(platform))))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()));
        if let Some(expected) = expected {
            mock = mock.expect(expected);
        }
        mock.mount(&self.server).await;
    }

    /// Metadata plus archive for one platform. Returns the archive bytes.
    pub async fn mount_package(&self, platform: &str) -> Vec<u8> {
        let bytes = provider_zip(platform);
        self.mount_metadata(platform, &sha256(&bytes), None).await;
        self.mount_archive(platform, &bytes, None).await;
        bytes
    }
}

/// A fake network mirror serving packages for `hostname`.
pub struct MirrorFixture {
    pub server: MockServer,
    pub hostname: String,
}

impl MirrorFixture {
    pub async fn start(hostname: &str) -> Self {
        Self {
            server: MockServer::start().await,
            hostname: hostname.to_string(),
        }
    }

    /// Mirror base URL, as configured in an installation method.
    pub fn url(&self) -> String {
        format!("{}/mirror/", self.server.uri())
    }

    fn provider_path(&self, file: &str) -> String {
        format!(
            "/mirror/{}/{}/{}/{}",
            self.hostname, NAMESPACE, PROVIDER_TYPE, file
        )
    }

    /// Index, version document and archives for `packages`. Each archive
    /// must be downloaded exactly `expected_downloads` times.
    pub async fn mount_packages(&self, packages: &[(&str, &[u8])], expected_downloads: u64) {
        Mock::given(method("GET"))
            .and(path(self.provider_path("index.json")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "versions": {VERSION: {}}
            })))
            .mount(&self.server)
            .await;

        let mut archives = serde_json::Map::new();
        for (platform, bytes) in packages {
            archives.insert(
                platform.to_string(),
                serde_json::json!({
                    "url": package_filename(platform),
                    "hashes": [format!("zh:{}", sha256(bytes))],
                }),
            );
            Mock::given(method("GET"))
                .and(path(self.provider_path(&package_filename(platform))))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
                .expect(expected_downloads)
                .mount(&self.server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path(self.provider_path(&format!("{}.json", VERSION))))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "archives": archives })),
            )
            .mount(&self.server)
            .await;
    }
}
