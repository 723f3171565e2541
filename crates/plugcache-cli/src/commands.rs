//! CLI command definitions.

use clap::{Subcommand, ValueEnum};
use plugcache_hook::LockfilePolicy;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Warm the provider cache, then run the wrapped tool in each module
    Run {
        /// Module directory (repeatable; defaults to the current directory)
        #[arg(short = 'd', long = "working-dir", value_name = "DIR")]
        working_dirs: Vec<PathBuf>,

        /// Platform to warm, as os_arch (repeatable)
        #[arg(short, long = "platform", value_name = "OS_ARCH")]
        platforms: Vec<String>,

        /// Modules run at the same time
        #[arg(short = 'j', long, default_value_t = 4)]
        parallelism: usize,

        /// Arguments for the wrapped tool
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Print the default configuration file path
    Path,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LockfileArg {
    Disabled,
    FromCache,
}

impl From<LockfileArg> for LockfilePolicy {
    fn from(arg: LockfileArg) -> Self {
        match arg {
            LockfileArg::Disabled => LockfilePolicy::Disabled,
            LockfileArg::FromCache => LockfilePolicy::FromCache,
        }
    }
}
