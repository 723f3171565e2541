//! Registry discovery, registry/mirror wire types, credentials, and the
//! installation methods that satisfy a provider package on a cache miss.

pub mod credentials;
pub mod discovery;
pub mod methods;
pub mod protocol;

pub use credentials::{Credentials, token_env_var};
pub use discovery::{DiscoveryError, RegistryDiscovery, ServiceEndpoints};
pub use methods::{
    InstallationMethod, InstallationMethodConfig, MethodContext, MethodKind, Resolution,
    resolve_package,
};
