//! Bounded priority cache of rendered tiles.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Page layout / paint pass         │
//! │  (computes priorities, queries tiles)   │
//! └────────────┬───────────────▲────────────┘
//!   RenderRequest│               │ CachedTile, events
//!                ▼               │
//! ┌─────────────────────────────────────────┐
//! │               TileCache                 │
//! │  pending ──▶ in flight ──▶ resident     │
//! └────────────────────┬────────────────────┘
//!                      │ one render at a time
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              TileRenderer               │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileCache`]: Admission, single-flight scheduling, priority eviction
//! - [`RenderRequest`]: A desired render (tile, scale, priority)
//! - [`CachedTile`]: A resident rendered tile
//! - [`TileCacheObserver`]: Event sink for admission, paint and eviction events
//! - [`TileCacheConfig`] / [`CacheStats`]: Capacity and counters

mod observer;
mod request;
mod tile_cache;

pub use observer::{ObserverId, TileCacheObserver};
pub use request::{CachedTile, RenderRequest};
pub use tile_cache::{CacheStats, PageCounts, TileCache, TileCacheConfig, DEFAULT_MAX_TILE_COUNT};
