//! Provider package cache: the ledger of package states and the on-disk
//! layout the wrapped tool reads through its filesystem mirror.

pub mod archiver;
pub mod layout;
pub mod store;
pub mod types;

pub use archiver::{hash_h1, hash_zh, sha256_hex};
pub use layout::CacheLayout;
pub use store::CacheStore;
pub use types::{CacheEntry, CacheStats, EntryState};
