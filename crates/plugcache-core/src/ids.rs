//! Cache request identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

const REQUEST_PREFIX: &str = "req_";

/// Scopes one module run's set of in-flight cache waits.
///
/// Rendered as `req_<32 hex digits>` so it fits in a single URL path
/// segment of the cache server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", REQUEST_PREFIX, self.0.simple())
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let raw = s.strip_prefix(REQUEST_PREFIX).unwrap_or(s);
        Uuid::parse_str(raw).map(Self)
    }
}
