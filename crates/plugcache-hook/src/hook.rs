//! The two-phase command hook.
//!
//! Warm-up runs the tool's enumeration command once per platform against a
//! CLI config that sends provider traffic to the cache server, then waits
//! for every package that traffic asked for. Serve runs the real command
//! against a config that installs from the on-disk cache.

use plugcache_core::{Error, PackageKey, Platform, RequestId, Result};
use plugcache_registry::RegistryDiscovery;
use plugcache_registry::discovery::DEFAULT_MODULES_PATH;
use plugcache_server::ProviderCacheServer;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cliconfig::{CliConfigMode, HostRedirect, config_path, write_cli_config};
use crate::env::{serve_env, warm_up_env};
use crate::lockfile::{LockfilePolicy, LockfileSnapshot, update_from_cache};
use crate::runner::{InvocationPhase, ToolInvocation, ToolOutcome, ToolRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    Idle,
    WarmingUp,
    Ready,
    Serving,
    Done,
    Failed,
}

impl HookState {
    pub fn can_transition_to(self, next: HookState) -> bool {
        use HookState::*;
        matches!(
            (self, next),
            (Idle, WarmingUp)
                | (WarmingUp, Ready)
                | (Ready, Serving)
                | (Serving, Done)
                | (WarmingUp | Ready | Serving, Failed)
        )
    }
}

impl fmt::Display for HookState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HookState::Idle => "idle",
            HookState::WarmingUp => "warming_up",
            HookState::Ready => "ready",
            HookState::Serving => "serving",
            HookState::Done => "done",
            HookState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct HookSettings {
    pub program: String,
    /// Registry hostnames whose providers go through the cache.
    pub registries: Vec<String>,
    pub platforms: Vec<Platform>,
    pub wait_timeout: Duration,
    pub lockfile: LockfilePolicy,
}

impl Default for HookSettings {
    fn default() -> Self {
        Self {
            program: "terraform".to_string(),
            registries: vec![
                "registry.terraform.io".to_string(),
                "registry.opentofu.org".to_string(),
            ],
            platforms: vec![Platform::current()],
            wait_timeout: Duration::from_secs(600),
            lockfile: LockfilePolicy::Disabled,
        }
    }
}

/// What one hook run did.
#[derive(Debug, Clone)]
pub struct HookReport {
    pub request_id: RequestId,
    pub packages: Vec<PackageKey>,
    pub outcome: ToolOutcome,
}

struct HookRun {
    request_id: RequestId,
    state: HookState,
}

impl HookRun {
    fn advance(&mut self, next: HookState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::Internal(format!(
                "invalid hook transition {} -> {}",
                self.state, next
            )));
        }
        debug!(request_id = %self.request_id, from = %self.state, to = %next, "Hook state");
        self.state = next;
        Ok(())
    }
}

/// Drives one module run through warm-up and serve.
pub struct CommandHook {
    server: Arc<ProviderCacheServer>,
    discovery: Arc<RegistryDiscovery>,
    runner: Arc<dyn ToolRunner>,
    settings: HookSettings,
    cancel: CancellationToken,
}

impl CommandHook {
    pub fn new(
        server: Arc<ProviderCacheServer>,
        discovery: Arc<RegistryDiscovery>,
        runner: Arc<dyn ToolRunner>,
        settings: HookSettings,
    ) -> Self {
        Self {
            server,
            discovery,
            runner,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Abandon in-flight runs when `cancel` fires. The lock file is still
    /// restored and the generated config removed.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &HookSettings {
        &self.settings
    }

    /// Run `args` through the wrapped tool in `working_dir`.
    ///
    /// The cache request is released however the run ends.
    pub async fn run(&self, working_dir: &Path, args: &[String]) -> Result<HookReport> {
        // The tool resolves config paths against its own working directory.
        let working_dir = tokio::fs::canonicalize(working_dir).await?;
        let working_dir = working_dir.as_path();
        let store = self.server.store().clone();
        let request_id = RequestId::new();
        store.register_request(request_id);

        let mut run = HookRun {
            request_id,
            state: HookState::Idle,
        };
        let result = self.drive(&mut run, working_dir, args).await;

        store.release_request(request_id);
        let config = config_path(working_dir, request_id);
        if let Err(e) = tokio::fs::remove_file(&config).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %config.display(), error = %e, "Could not remove generated CLI config");
            }
        }

        if let Err(err) = &result {
            if run.state.can_transition_to(HookState::Failed) {
                run.state = HookState::Failed;
            }
            warn!(request_id = %request_id, state = %run.state, error = %err, "Hook failed");
        }
        result
    }

    async fn drive(&self, run: &mut HookRun, working_dir: &Path, args: &[String]) -> Result<HookReport> {
        let request_id = run.request_id;
        let store = self.server.store();

        run.advance(HookState::WarmingUp)?;
        let hosts = self.host_redirects(request_id).await;
        let config = write_cli_config(working_dir, request_id, &CliConfigMode::WarmUp { hosts }).await?;
        let env = warm_up_env(&config, &self.settings.registries, self.server.token());

        let snapshot = LockfileSnapshot::capture(working_dir).await?;
        let warmed = self.until_cancelled(self.warm_up(working_dir, &env)).await;
        snapshot.restore().await?;
        warmed?;

        let packages = self
            .until_cancelled(store.wait_for_request(request_id, self.settings.wait_timeout))
            .await?;
        run.advance(HookState::Ready)?;
        info!(request_id = %request_id, packages = packages.len(), "Provider cache ready");

        run.advance(HookState::Serving)?;
        let config = write_cli_config(
            working_dir,
            request_id,
            &CliConfigMode::Serve {
                cache_dir: std::path::absolute(store.layout().cache_dir())?,
                registries: self.settings.registries.clone(),
            },
        )
        .await?;

        if self.settings.lockfile == LockfilePolicy::FromCache {
            update_from_cache(working_dir, store, &packages).await?;
        }

        let serve = ToolInvocation {
            program: self.settings.program.clone(),
            args: args.to_vec(),
            working_dir: working_dir.to_path_buf(),
            env: serve_env(&config),
            phase: InvocationPhase::Serve,
        };
        let outcome = self.until_cancelled(self.runner.run(&serve)).await?;
        run.advance(HookState::Done)?;

        Ok(HookReport {
            request_id,
            packages,
            outcome,
        })
    }

    async fn until_cancelled<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = work => result,
        }
    }

    /// One enumeration pass per platform, in order. Non-zero exits are
    /// expected while packages are still populating.
    async fn warm_up(
        &self,
        working_dir: &Path,
        env: &std::collections::HashMap<String, String>,
    ) -> Result<()> {
        for platform in &self.settings.platforms {
            let invocation = ToolInvocation {
                program: self.settings.program.clone(),
                args: vec![
                    "providers".to_string(),
                    "lock".to_string(),
                    format!("-platform={}", platform),
                ],
                working_dir: working_dir.to_path_buf(),
                env: env.clone(),
                phase: InvocationPhase::WarmUp {
                    platform: platform.clone(),
                },
            };
            let outcome = self.runner.run(&invocation).await?;
            if !outcome.success {
                debug!(%platform, exit_code = outcome.exit_code, "Warm-up pass exited non-zero");
            }
        }
        Ok(())
    }

    async fn host_redirects(&self, request_id: RequestId) -> Vec<HostRedirect> {
        let mut hosts = Vec::with_capacity(self.settings.registries.len());
        for hostname in &self.settings.registries {
            let scheme = self.discovery.scheme();
            let modules_url = match self.discovery.endpoints_for(hostname).await {
                Ok(endpoints) => endpoints
                    .modules_url(scheme, hostname)
                    .ok()
                    .map(|u| u.to_string()),
                Err(e) => {
                    warn!(%hostname, error = %e, "Discovery failed, using default modules path");
                    Some(format!("{}://{}{}", scheme, hostname, DEFAULT_MODULES_PATH))
                }
            };
            hosts.push(HostRedirect {
                hostname: hostname.clone(),
                providers_url: self.server.providers_url(request_id, hostname),
                modules_url,
            });
        }
        hosts
    }
}
