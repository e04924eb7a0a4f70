//! # Probecache - Probe Result Caching for Infrastructure Automation
//!
//! Probecache is a short-lived, in-process result cache that sits in front of
//! expensive, idempotent remote-system probes: gathering host facts, checking
//! command availability, checking path existence, and checking package or
//! service state. Re-issuing one of these probes costs a full round-trip to a
//! managed host; answering it from a recent result costs a map lookup.
//!
//! ## Core Concepts
//!
//! - **Runner**: the capability set of query operations executed against a
//!   remote target. Probecache does not implement transports or output
//!   parsing; callers supply a [`runner::Runner`] implementation.
//! - **CachedRunner**: a decorator implementing the same capability set,
//!   transparently caching the read-mostly probe subset and forwarding
//!   everything else.
//! - **ContextCache**: the engine - a concurrent fingerprint-indexed store
//!   with per-operation TTLs, a capacity bound with earliest-expiry eviction,
//!   and a background sweeper that reaps expired entries.
//!
//! Different probe kinds go stale at very different rates, so the TTL policy
//! is per operation: host facts rarely change (30 minutes by default) while
//! service-active state changes often (1 minute by default).
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use probecache::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let runner: Arc<dyn Runner> = Arc::new(SshRunner::connect("10.0.0.4").await?);
//!     let cached = CachedRunner::new(runner, CacheConfig::default());
//!
//!     let target = Target::new("10.0.0.4");
//!     let facts = cached.gather_facts(&target).await?;
//!
//!     // Answered from cache for the next 5 minutes:
//!     let installed = cached.package_installed(&target, &facts, "nginx").await?;
//!     println!("nginx installed: {installed}");
//!
//!     cached.close();
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod cache;
pub mod error;
pub mod facts;
pub mod runner;

pub use cache::{CacheConfig, CacheKey, CacheStats, CacheValue, ContextCache};
pub use error::{Error, Result};
pub use facts::Facts;
pub use runner::{CachedRunner, CommandOutput, Runner, Target};

/// Convenient re-exports of commonly used types and traits.
pub mod prelude {
    pub use crate::cache::{CacheConfig, CacheKey, CacheStats, CacheValue, ContextCache};
    pub use crate::error::{Error, Result};
    pub use crate::facts::Facts;
    pub use crate::runner::{CachedRunner, CommandOutput, Runner, Target};
}
