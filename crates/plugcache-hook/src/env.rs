//! Environment for wrapped-tool invocations.

use plugcache_registry::token_env_var;
use std::collections::HashMap;
use std::path::Path;

pub const CLI_CONFIG_FILE_VAR: &str = "TF_CLI_CONFIG_FILE";
pub const PLUGIN_CACHE_DIR_VAR: &str = "TF_PLUGIN_CACHE_DIR";

/// Variables shared by both phases: the generated config file, and no
/// native plugin cache competing with ours.
fn base_env(config_path: &Path) -> HashMap<String, String> {
    HashMap::from([
        (
            CLI_CONFIG_FILE_VAR.to_string(),
            config_path.display().to_string(),
        ),
        (PLUGIN_CACHE_DIR_VAR.to_string(), String::new()),
    ])
}

/// Warm-up: every redirected registry authenticates to the cache server.
pub fn warm_up_env(config_path: &Path, hostnames: &[String], token: &str) -> HashMap<String, String> {
    let mut env = base_env(config_path);
    for hostname in hostnames {
        env.insert(token_env_var(hostname), token.to_string());
    }
    env
}

/// Serve: the user's own registry tokens stay in effect.
pub fn serve_env(config_path: &Path) -> HashMap<String, String> {
    base_env(config_path)
}
