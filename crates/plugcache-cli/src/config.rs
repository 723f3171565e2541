//! CLI configuration management.

use anyhow::{Context, Result};
use plugcache_core::Platform;
use plugcache_hook::{HookSettings, LockfilePolicy};
use plugcache_registry::InstallationMethodConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// plugcache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlugcacheConfig {
    /// Unpacked packages, in the layout the wrapped tool reads.
    pub cache_dir: PathBuf,
    /// Original package archives.
    pub archive_dir: PathBuf,
    pub listen_host: String,
    /// 0 picks a free port.
    pub listen_port: u16,
    /// Registry hostnames served through the cache.
    pub registries: Vec<String>,
    /// Tried in order for every cache miss.
    pub installation_methods: Vec<InstallationMethodConfig>,
    /// `os_arch` pairs to warm. Empty means the host platform.
    pub platforms: Vec<String>,
    pub wait_timeout_secs: u64,
    pub tool_program: String,
    pub lockfile: LockfilePolicy,
    pub discovery_scheme: String,
}

impl Default for PlugcacheConfig {
    fn default() -> Self {
        let base = directories::ProjectDirs::from("io", "plugcache", "plugcache")
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("plugcache"));
        Self {
            cache_dir: base.join("providers"),
            archive_dir: base.join("archives"),
            listen_host: "127.0.0.1".to_string(),
            listen_port: 0,
            registries: vec![
                "registry.terraform.io".to_string(),
                "registry.opentofu.org".to_string(),
            ],
            installation_methods: vec![InstallationMethodConfig::direct()],
            platforms: Vec::new(),
            wait_timeout_secs: 600,
            tool_program: "terraform".to_string(),
            lockfile: LockfilePolicy::Disabled,
            discovery_scheme: "https".to_string(),
        }
    }
}

/// Values given on the command line or through `PLUGCACHE_*` variables.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub cache_dir: Option<PathBuf>,
    pub archive_dir: Option<PathBuf>,
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
    pub registries: Vec<String>,
    pub wait_timeout_secs: Option<u64>,
    pub tool_program: Option<String>,
    pub lockfile: Option<LockfilePolicy>,
}

impl PlugcacheConfig {
    /// Load from `path`, or from the default location when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Default configuration file path.
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "plugcache", "plugcache")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(dir) = overrides.cache_dir {
            self.cache_dir = dir;
        }
        if let Some(dir) = overrides.archive_dir {
            self.archive_dir = dir;
        }
        if let Some(host) = overrides.listen_host {
            self.listen_host = host;
        }
        if let Some(port) = overrides.listen_port {
            self.listen_port = port;
        }
        if !overrides.registries.is_empty() {
            self.registries = overrides.registries;
        }
        if let Some(secs) = overrides.wait_timeout_secs {
            self.wait_timeout_secs = secs;
        }
        if let Some(program) = overrides.tool_program {
            self.tool_program = program;
        }
        if let Some(policy) = overrides.lockfile {
            self.lockfile = policy;
        }
    }

    pub fn platforms(&self) -> Result<Vec<Platform>> {
        if self.platforms.is_empty() {
            return Ok(vec![Platform::current()]);
        }
        self.platforms
            .iter()
            .map(|p| p.parse::<Platform>().with_context(|| format!("Invalid platform {:?}", p)))
            .collect()
    }

    pub fn hook_settings(&self) -> Result<HookSettings> {
        Ok(HookSettings {
            program: self.tool_program.clone(),
            registries: self.registries.clone(),
            platforms: self.platforms()?,
            wait_timeout: Duration::from_secs(self.wait_timeout_secs),
            lockfile: self.lockfile,
        })
    }
}
