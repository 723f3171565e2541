//! Command handlers.

use anyhow::{Context, Result};
use console::style;
use plugcache_core::Error;
use plugcache_hook::{CommandHook, HookReport, ProcessRunner};
use plugcache_registry::{
    Credentials, InstallationMethod, MethodContext, MethodKind, RegistryDiscovery,
};
use plugcache_server::{AppState, ProviderCacheServer};
use plugcache_store::{CacheLayout, CacheStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::PlugcacheConfig;

/// Run the hook in every working directory. Returns whether all succeeded.
pub async fn run(
    config: &PlugcacheConfig,
    working_dirs: Vec<PathBuf>,
    parallelism: usize,
    args: Vec<String>,
) -> Result<bool> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down");
            interrupt.cancel();
        }
    });

    // Captured before any invocation overrides them.
    let credentials = Arc::new(Credentials::from_env());
    let client = reqwest::Client::builder()
        .user_agent(concat!("plugcache/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let discovery = Arc::new(RegistryDiscovery::new(
        client.clone(),
        config.discovery_scheme.clone(),
    ));
    let ctx = MethodContext {
        client,
        discovery: discovery.clone(),
        credentials,
    };
    let methods = config
        .installation_methods
        .iter()
        .map(|m| InstallationMethod::from_config(m, &ctx))
        .collect::<plugcache_core::Result<Vec<_>>>()
        .context("Invalid installation method")?;

    let cache_dir = prepare_dir(&config.cache_dir).await?;
    let archive_dir = prepare_dir(&config.archive_dir).await?;
    let store = Arc::new(CacheStore::new(
        CacheLayout::new(cache_dir, archive_dir),
        cancel.clone(),
    ));
    let state = Arc::new(AppState::new(store, methods, cancel.clone()));
    let server = Arc::new(
        ProviderCacheServer::start(state, &config.listen_host, config.listen_port, &cancel)
            .await
            .context("Failed to start cache server")?,
    );

    let hook = Arc::new(
        CommandHook::new(
            server.clone(),
            discovery,
            Arc::new(ProcessRunner::new()),
            config.hook_settings()?,
        )
        .with_cancellation(cancel.clone()),
    );

    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let args = Arc::new(args);
    let mut join_set = JoinSet::new();
    for dir in working_dirs {
        let hook = hook.clone();
        let semaphore = semaphore.clone();
        let args = args.clone();
        let cancel = cancel.clone();
        join_set.spawn(async move {
            // The hook observes cancellation itself so its cleanup still runs.
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) if !cancel.is_cancelled() => hook.run(&dir, &args).await,
                _ => Err(Error::Cancelled),
            };
            (dir, result)
        });
    }

    let mut all_ok = true;
    while let Some(joined) = join_set.join_next().await {
        let (dir, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                warn!(error = %e, "Module task panicked");
                all_ok = false;
                continue;
            }
        };
        all_ok &= report(&dir, &result);
    }

    drop(hook);
    match Arc::try_unwrap(server) {
        Ok(server) => server.shutdown().await?,
        Err(_) => cancel.cancel(),
    }
    Ok(all_ok)
}

/// Create `dir` and return its absolute path. The store and the wrapped
/// tool resolve it from different working directories.
async fn prepare_dir(dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    tokio::fs::canonicalize(dir)
        .await
        .with_context(|| format!("Failed to resolve {}", dir.display()))
}

fn report(dir: &Path, result: &plugcache_core::Result<HookReport>) -> bool {
    match result {
        Ok(report) if report.outcome.success => {
            println!(
                "{} {} ({} providers cached)",
                style("✓").green().bold(),
                dir.display(),
                report.packages.len()
            );
            true
        }
        Ok(report) => {
            println!(
                "{} {} (exit code {})",
                style("✗").red().bold(),
                dir.display(),
                report.outcome.exit_code
            );
            false
        }
        Err(e) => {
            println!("{} {}: {}", style("✗").red().bold(), dir.display(), e);
            false
        }
    }
}

pub fn show_config(config: &PlugcacheConfig) -> Result<()> {
    let mut shown = config.clone();
    for method in &mut shown.installation_methods {
        if let MethodKind::NetworkMirror { token: Some(token), .. } = &mut method.kind {
            *token = "***".to_string();
        }
    }
    print!("{}", serde_yaml::to_string(&shown)?);
    Ok(())
}

pub fn show_config_path() -> Result<()> {
    match PlugcacheConfig::config_path() {
        Some(path) => println!("{}", path.display()),
        None => println!("(no configuration directory on this system)"),
    }
    info!("Config files are optional; defaults apply when absent");
    Ok(())
}
