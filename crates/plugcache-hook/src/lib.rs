//! The command hook: warm the provider cache through the cache server, then
//! run the wrapped tool against the local cache.

pub mod cliconfig;
pub mod env;
pub mod hook;
pub mod lockfile;
pub mod process;
pub mod runner;

pub use cliconfig::{CliConfigMode, HostRedirect, config_path, write_cli_config};
pub use hook::{CommandHook, HookReport, HookSettings, HookState};
pub use lockfile::LockfilePolicy;
pub use process::ProcessRunner;
pub use runner::{InvocationPhase, ToolInvocation, ToolOutcome, ToolRunner};
