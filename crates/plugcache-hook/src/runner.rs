//! The seam between the hook and the wrapped tool.

use async_trait::async_trait;
use plugcache_core::{Platform, Result};
use std::collections::HashMap;
use std::path::PathBuf;

/// Which part of the hook an invocation belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationPhase {
    /// Enumeration-only pass for one platform.
    WarmUp { platform: Platform },
    /// The real command.
    Serve,
}

#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Added on top of the inherited environment.
    pub env: HashMap<String, String>,
    pub phase: InvocationPhase,
}

#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
}

/// Runs the wrapped tool.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run to completion. A non-zero exit is an `Ok` outcome; `Err` means
    /// the tool could not be run at all.
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutcome>;
}
