//! Registry-compatible HTTP cache for provider packages.

pub mod fetch;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use fetch::PackageFetcher;
pub use server::ProviderCacheServer;
pub use state::AppState;
