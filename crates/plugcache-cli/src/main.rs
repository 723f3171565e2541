//! plugcache CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod config;
mod handlers;
mod telemetry;

use commands::{Commands, ConfigCommands, LockfileArg, LogFormat};
use config::{ConfigOverrides, PlugcacheConfig};

#[derive(Parser)]
#[command(name = "plugcache")]
#[command(author, version, about = "Shared provider cache for IaC tool runs", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "PLUGCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for unpacked provider packages
    #[arg(long, global = true, env = "PLUGCACHE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Directory for provider archives
    #[arg(long, global = true, env = "PLUGCACHE_ARCHIVE_DIR")]
    archive_dir: Option<PathBuf>,

    /// Address the cache server binds
    #[arg(long, global = true, env = "PLUGCACHE_LISTEN_HOST")]
    listen_host: Option<String>,

    /// Port the cache server binds (0 picks a free port)
    #[arg(long, global = true, env = "PLUGCACHE_LISTEN_PORT")]
    listen_port: Option<u16>,

    /// Registry hostname to cache (repeatable)
    #[arg(long = "registry", global = true, env = "PLUGCACHE_REGISTRIES", value_delimiter = ',')]
    registries: Vec<String>,

    /// Seconds to wait for the cache before failing a module
    #[arg(long, global = true, env = "PLUGCACHE_WAIT_TIMEOUT")]
    wait_timeout: Option<u64>,

    /// Wrapped tool executable
    #[arg(long, global = true, env = "PLUGCACHE_TOOL")]
    tool: Option<String>,

    /// Lock file policy
    #[arg(long, global = true, env = "PLUGCACHE_LOCKFILE", value_enum)]
    lockfile: Option<LockfileArg>,

    /// Log output format
    #[arg(long, global = true, env = "PLUGCACHE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            cache_dir: self.cache_dir.clone(),
            archive_dir: self.archive_dir.clone(),
            listen_host: self.listen_host.clone(),
            listen_port: self.listen_port,
            registries: self.registries.clone(),
            wait_timeout_secs: self.wait_timeout,
            tool_program: self.tool.clone(),
            lockfile: self.lockfile.map(Into::into),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_format);

    let mut config = PlugcacheConfig::load(cli.config.as_deref())?;
    config.apply(cli.overrides());

    match cli.command {
        Commands::Run {
            working_dirs,
            platforms,
            parallelism,
            args,
        } => {
            if !platforms.is_empty() {
                config.platforms = platforms;
            }
            let working_dirs = if working_dirs.is_empty() {
                vec![std::env::current_dir()?]
            } else {
                working_dirs
            };
            let all_ok = handlers::run(&config, working_dirs, parallelism, args).await?;
            Ok(if all_ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Config { command } => {
            match command {
                ConfigCommands::Show => handlers::show_config(&config)?,
                ConfigCommands::Path => handlers::show_config_path()?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
