//! Process-scoped CLI configuration for the wrapped tool.

use plugcache_core::{Error, RequestId, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Redirect of one registry host's provider service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRedirect {
    pub hostname: String,
    pub providers_url: String,
    /// Kept pointing at the origin so module downloads still work.
    pub modules_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliConfigMode {
    /// Provider services point at the cache server; direct installation only.
    WarmUp { hosts: Vec<HostRedirect> },
    /// Providers from `registries` come from the on-disk cache; anything
    /// else is installed directly.
    Serve {
        cache_dir: PathBuf,
        registries: Vec<String>,
    },
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            // Template sequences must not be interpreted.
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn quote_list(values: &[String]) -> String {
    let items: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("[{}]", items.join(", "))
}

fn registry_globs(registries: &[String]) -> Vec<String> {
    registries.iter().map(|r| format!("{}/*/*", r)).collect()
}

/// Render the configuration as HCL.
pub fn render(mode: &CliConfigMode) -> String {
    let mut out = String::from("# Generated by plugcache for a single run. Do not edit.\n\n");

    match mode {
        CliConfigMode::WarmUp { hosts } => {
            for host in hosts {
                let _ = writeln!(out, "host {} {{", quote(&host.hostname));
                out.push_str("  services = {\n");
                let _ = writeln!(out, "    \"providers.v1\" = {},", quote(&host.providers_url));
                if let Some(modules) = &host.modules_url {
                    let _ = writeln!(out, "    \"modules.v1\"   = {},", quote(modules));
                }
                out.push_str("  }\n}\n\n");
            }
            out.push_str("provider_installation {\n  direct {}\n}\n");
        }
        CliConfigMode::Serve {
            cache_dir,
            registries,
        } => {
            let globs = registry_globs(registries);
            out.push_str("provider_installation {\n");
            out.push_str("  filesystem_mirror {\n");
            let _ = writeln!(out, "    path    = {}", quote(&cache_dir.display().to_string()));
            let _ = writeln!(out, "    include = {}", quote_list(&globs));
            out.push_str("  }\n");
            if globs.is_empty() {
                out.push_str("  direct {}\n");
            } else {
                out.push_str("  direct {\n");
                let _ = writeln!(out, "    exclude = {}", quote_list(&globs));
                out.push_str("  }\n");
            }
            out.push_str("}\n");
        }
    }
    out
}

/// Path of the generated config for one run in `working_dir`.
pub fn config_path(working_dir: &Path, request_id: RequestId) -> PathBuf {
    working_dir.join(format!(".plugcache-{}.tfrc", request_id))
}

/// Write the configuration for `request_id` into `working_dir`.
pub async fn write_cli_config(
    working_dir: &Path,
    request_id: RequestId,
    mode: &CliConfigMode,
) -> Result<PathBuf> {
    let path = config_path(working_dir, request_id);
    tokio::fs::write(&path, render(mode))
        .await
        .map_err(|e| Error::ConfigGeneration(format!("{}: {}", path.display(), e)))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_warm_up() {
        let rendered = render(&CliConfigMode::WarmUp {
            hosts: vec![HostRedirect {
                hostname: "registry.terraform.io".into(),
                providers_url: "http://127.0.0.1:4000/req_1/v1/providers/registry.terraform.io/"
                    .into(),
                modules_url: Some("https://registry.terraform.io/v1/modules/".into()),
            }],
        });

        assert_eq!(
            rendered,
            r#"# Generated by plugcache for a single run. Do not edit.

host "registry.terraform.io" {
  services = {
    "providers.v1" = "http://127.0.0.1:4000/req_1/v1/providers/registry.terraform.io/",
    "modules.v1"   = "https://registry.terraform.io/v1/modules/",
  }
}

provider_installation {
  direct {}
}
"#
        );
        assert!(!rendered.contains("filesystem_mirror"));
    }

    #[test]
    fn test_render_serve() {
        let rendered = render(&CliConfigMode::Serve {
            cache_dir: PathBuf::from("/var/cache/plugcache"),
            registries: vec!["registry.terraform.io".into(), "registry.opentofu.org".into()],
        });

        assert_eq!(
            rendered,
            r#"# Generated by plugcache for a single run. Do not edit.

provider_installation {
  filesystem_mirror {
    path    = "/var/cache/plugcache"
    include = ["registry.terraform.io/*/*", "registry.opentofu.org/*/*"]
  }
  direct {
    exclude = ["registry.terraform.io/*/*", "registry.opentofu.org/*/*"]
  }
}
"#
        );
        assert!(!rendered.contains("host "));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
        assert_eq!(quote("${x}"), r#""$${x}""#);
    }

    #[tokio::test]
    async fn test_write_failure_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let err = write_cli_config(
            &missing,
            RequestId::new(),
            &CliConfigMode::WarmUp { hosts: vec![] },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::ConfigGeneration(_)));
    }
}
