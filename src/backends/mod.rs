//! Cache Store Implementations
//!
//! # Available Backends
//!
//! - **Redis** - the shared production store
//! - **`DashMap`** - in-process store with the same semantics, for tests,
//!   demos and single-node deployments
//!
//! # Usage
//!
//! ```rust,no_run
//! use video_cache::backends::{DashMapCache, RedisCache};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let redis = RedisCache::with_url("redis://127.0.0.1:6379").await?;
//! let local = DashMapCache::new();
//! # Ok(())
//! # }
//! ```

pub mod dashmap_cache;
pub mod redis_cache;

pub use dashmap_cache::DashMapCache;
pub use redis_cache::RedisCache;
