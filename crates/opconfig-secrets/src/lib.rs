//! Secret resolution for opconfig
//!
//! Provides:
//! - The remote [`SecretStore`] abstraction and its `op` CLI implementation
//! - A memoizing [`SecretResolver`] with a lazily built client
//! - The encrypted on-disk [`CacheFile`] of resolved secret paths

pub mod cache;
pub mod resolver;
pub mod store;
pub mod types;

pub use cache::{remove_cache_file, CacheFile, EncryptedCacheEntry};
pub use resolver::SecretResolver;
pub use store::{IntegrationIdentity, OpCliStore, SecretStore, StoreFactory};
pub use types::SecretPathCache;
