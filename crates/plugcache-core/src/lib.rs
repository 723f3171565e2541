//! plugcache core
//!
//! Domain vocabulary shared by every plugcache crate: provider and package
//! addresses, request identifiers, and the common error type.

pub mod error;
pub mod ids;
pub mod provider;

pub use error::{Error, Result};
pub use ids::RequestId;
pub use provider::{PackageKey, Platform, ProviderKey, ProviderVersion};
