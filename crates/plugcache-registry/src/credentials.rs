//! Registry credentials from `TF_TOKEN_*` environment variables.

use std::collections::HashMap;
use std::fmt;

const TOKEN_PREFIX: &str = "TF_TOKEN_";

/// Name of the token variable the wrapped tool reads for `hostname`.
///
/// Dashes become `__` and dots become `_`.
pub fn token_env_var(hostname: &str) -> String {
    format!(
        "{}{}",
        TOKEN_PREFIX,
        hostname.replace('-', "__").replace('.', "_")
    )
}

fn hostname_from_var(name: &str) -> Option<String> {
    let encoded = name.strip_prefix(TOKEN_PREFIX)?;
    if encoded.is_empty() {
        return None;
    }
    Some(
        encoded
            .replace("__", "-")
            .replace('_', ".")
            .to_ascii_lowercase(),
    )
}

/// Bearer tokens keyed by registry hostname.
#[derive(Clone, Default)]
pub struct Credentials {
    tokens: HashMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the tokens present in this process's environment.
    ///
    /// Call before the hook overrides the same variables for the wrapped tool.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let tokens = vars
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .filter_map(|(name, value)| hostname_from_var(&name).map(|host| (host, value)))
            .collect();
        Self { tokens }
    }

    pub fn with_token(mut self, hostname: impl Into<String>, token: impl Into<String>) -> Self {
        self.tokens
            .insert(hostname.into().to_ascii_lowercase(), token.into());
        self
    }

    pub fn token_for(&self, hostname: &str) -> Option<&str> {
        self.tokens
            .get(&hostname.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hosts: Vec<&String> = self.tokens.keys().collect();
        hosts.sort();
        f.debug_struct("Credentials").field("hosts", &hosts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_env_var_encoding() {
        assert_eq!(
            token_env_var("registry.terraform.io"),
            "TF_TOKEN_registry_terraform_io"
        );
        assert_eq!(
            token_env_var("my-registry.example.com"),
            "TF_TOKEN_my__registry_example_com"
        );
    }

    #[test]
    fn test_from_vars_decodes_hostnames() {
        let creds = Credentials::from_vars(vec![
            ("TF_TOKEN_my__registry_example_com".to_string(), "secret".to_string()),
            ("TF_TOKEN_empty_example_com".to_string(), String::new()),
            ("HOME".to_string(), "/root".to_string()),
        ]);
        assert_eq!(creds.token_for("my-registry.example.com"), Some("secret"));
        assert_eq!(creds.token_for("empty.example.com"), None);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let creds = Credentials::new().with_token("registry.example.com", "secret");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("registry.example.com"));
        assert!(!rendered.contains("secret"));
    }
}
