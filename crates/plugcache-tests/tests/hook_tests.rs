//! End-to-end hook runs with a fake wrapped tool.
//!
//! The fake tool behaves like the real one during warm-up: it reads the
//! generated CLI config, follows the providers.v1 redirect and asks the cache
//! server for each platform's package using the injected registry token.

use async_trait::async_trait;
use plugcache_core::{Error, Platform, Result};
use plugcache_hook::env::CLI_CONFIG_FILE_VAR;
use plugcache_hook::lockfile::LOCK_FILE_NAME;
use plugcache_hook::{
    CommandHook, HookSettings, InvocationPhase, LockfilePolicy, ToolInvocation, ToolOutcome,
    ToolRunner, config_path,
};
use plugcache_registry::{InstallationMethodConfig, token_env_var};
use plugcache_tests::{
    NAMESPACE, PROVIDER_TYPE, RegistryFixture, TestCache, VERSION, init_test_logging, sha256,
    start_test_cache, test_client,
};
use regex::Regex;
use reqwest::StatusCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FakeTool {
    registry_host: String,
    warm_ups: Mutex<Vec<(String, StatusCode)>>,
    serve_config: Mutex<Option<String>>,
    serve_lockfile: Mutex<Option<String>>,
}

impl FakeTool {
    fn new(registry_host: &str) -> Self {
        Self {
            registry_host: registry_host.to_string(),
            warm_ups: Mutex::new(Vec::new()),
            serve_config: Mutex::new(None),
            serve_lockfile: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ToolRunner for FakeTool {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutcome> {
        // Resolved the way the real tool does, from its working directory.
        let config_file = invocation.working_dir.join(&invocation.env[CLI_CONFIG_FILE_VAR]);
        let config = tokio::fs::read_to_string(config_file).await?;

        match &invocation.phase {
            InvocationPhase::WarmUp { platform } => {
                let pattern = Regex::new(r#""providers\.v1"\s*=\s*"([^"]+)""#).unwrap();
                let providers_url = pattern
                    .captures(&config)
                    .map(|c| c[1].to_string())
                    .ok_or_else(|| Error::Internal("no providers.v1 redirect".into()))?;
                let token = &invocation.env[&token_env_var(&self.registry_host)];

                let status = test_client()
                    .get(format!(
                        "{}{}/{}/{}/download/{}/{}",
                        providers_url, NAMESPACE, PROVIDER_TYPE, VERSION, platform.os, platform.arch
                    ))
                    .bearer_auth(token)
                    .send()
                    .await
                    .map_err(|e| Error::ToolFailed(e.to_string()))?
                    .status();
                self.warm_ups
                    .lock()
                    .unwrap()
                    .push((platform.to_string(), status));

                // Still populating: the real tool gives up with an error.
                Ok(ToolOutcome {
                    exit_code: 1,
                    success: false,
                    duration_ms: 1,
                })
            }
            InvocationPhase::Serve => {
                *self.serve_config.lock().unwrap() = Some(config);
                *self.serve_lockfile.lock().unwrap() =
                    std::fs::read_to_string(invocation.working_dir.join(LOCK_FILE_NAME)).ok();
                Ok(ToolOutcome {
                    exit_code: 0,
                    success: true,
                    duration_ms: 1,
                })
            }
        }
    }
}

fn hook_for(
    cache: &TestCache,
    tool: Arc<FakeTool>,
    platforms: &[&str],
    lockfile: LockfilePolicy,
) -> CommandHook {
    let settings = HookSettings {
        registries: vec![tool.registry_host.clone()],
        platforms: platforms
            .iter()
            .map(|p| p.parse::<Platform>().unwrap())
            .collect(),
        wait_timeout: Duration::from_secs(10),
        lockfile,
        ..HookSettings::default()
    };
    CommandHook::new(cache.server.clone(), cache.discovery.clone(), tool, settings)
}

fn package_dir(cache: &TestCache, host: &str, platform: &str) -> std::path::PathBuf {
    cache
        .cache_dir()
        .join(host)
        .join(NAMESPACE)
        .join(PROVIDER_TYPE)
        .join(VERSION)
        .join(platform)
}

#[tokio::test]
async fn test_warm_up_populates_every_platform() {
    init_test_logging();
    let registry = RegistryFixture::start().await;
    registry.mount_package("linux_amd64").await;
    registry.mount_package("darwin_arm64").await;
    let host = registry.hostname();

    let cache = start_test_cache(vec![InstallationMethodConfig::direct()])
        .await
        .expect("Failed to start cache");
    let tool = Arc::new(FakeTool::new(&host));
    let hook = hook_for(
        &cache,
        tool.clone(),
        &["linux_amd64", "darwin_arm64"],
        LockfilePolicy::Disabled,
    );

    let work = tempfile::tempdir().unwrap();
    let report = hook
        .run(work.path(), &["plan".to_string()])
        .await
        .expect("Hook run failed");

    assert!(report.outcome.success);
    assert_eq!(report.packages.len(), 2);
    assert_eq!(
        *tool.warm_ups.lock().unwrap(),
        vec![
            ("linux_amd64".to_string(), StatusCode::LOCKED),
            ("darwin_arm64".to_string(), StatusCode::LOCKED),
        ]
    );

    let serve_config = tool.serve_config.lock().unwrap().clone().unwrap();
    assert!(serve_config.contains("filesystem_mirror"));
    assert!(serve_config.contains(&format!("\"{}/*/*\"", host)));
    assert!(!serve_config.contains("providers.v1"));
    for platform in ["linux_amd64", "darwin_arm64"] {
        assert!(package_dir(&cache, &host, platform).is_dir());
    }

    assert!(!config_path(work.path(), report.request_id).exists());
    assert!(!cache.store().is_registered(report.request_id));
    // No lock file unless asked for one.
    assert!(tool.serve_lockfile.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_lockfile_from_cache() {
    let registry = RegistryFixture::start().await;
    let bytes = registry.mount_package("linux_amd64").await;
    let host = registry.hostname();

    let cache = start_test_cache(vec![InstallationMethodConfig::direct()])
        .await
        .expect("Failed to start cache");
    let tool = Arc::new(FakeTool::new(&host));
    let hook = hook_for(&cache, tool.clone(), &["linux_amd64"], LockfilePolicy::FromCache);

    let work = tempfile::tempdir().unwrap();
    hook.run(work.path(), &["init".to_string()])
        .await
        .expect("Hook run failed");

    let seen = tool.serve_lockfile.lock().unwrap().clone().unwrap();
    let written = std::fs::read_to_string(work.path().join(LOCK_FILE_NAME)).unwrap();
    assert_eq!(seen, written);
    assert!(written.contains(&format!("provider \"{}/{}/{}\"", host, NAMESPACE, PROVIDER_TYPE)));
    assert!(written.contains(&format!("version     = \"{}\"", VERSION)));
    assert!(written.contains(&format!("\"zh:{}\"", sha256(&bytes))));
    assert!(written.contains("\"h1:"));
}

#[tokio::test]
async fn test_missing_package_fails_before_serve() {
    let registry = RegistryFixture::start().await;
    let host = registry.hostname();

    let cache = start_test_cache(vec![InstallationMethodConfig::direct()])
        .await
        .expect("Failed to start cache");
    let tool = Arc::new(FakeTool::new(&host));
    let hook = hook_for(&cache, tool.clone(), &["linux_amd64"], LockfilePolicy::Disabled);

    let work = tempfile::tempdir().unwrap();
    let err = hook.run(work.path(), &["plan".to_string()]).await.unwrap_err();

    assert!(matches!(err, Error::PackagesFailed { .. }), "{}", err);
    assert!(err.to_string().contains("linux_amd64"));
    assert!(tool.serve_config.lock().unwrap().is_none());
    assert_eq!(cache.store().stats().open_requests, 0);
    assert!(!work.path().join(LOCK_FILE_NAME).exists());
}
