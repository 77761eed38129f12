//! # page-tiles
//!
//! Hierarchical tiling and a bounded, priority-driven tile cache for viewers
//! of very large paginated documents.
//!
//! Each page is split into a hierarchy of square tiles; level 0 covers the
//! whole page and every level splits each tile into `base x base` children.
//! A viewer asks the [`TileCache`] for the tiles it wants with a priority per
//! tile. The cache renders them one at a time through a [`TileRenderer`],
//! keeps at most `max_tile_count` tiles alive and evicts the least important
//! ones when something more important is waiting.
//!
//! ## Features
//!
//! - **Tile identity**: Validated `(row, col, level, base)` indices qualified by page
//! - **Hierarchy traversal**: Breadth-first with region culling and depth-first
//! - **Single-flight rendering**: At most one render job in flight at any time
//! - **Priority eviction**: Resident tiles are only evicted for higher-priority work
//! - **Memory pressure**: Drop half of the resident tiles on demand
//! - **Observers**: Admission, paint, eviction and failure notifications
//!
//! ## Architecture
//!
//! - [`tile`] - Tile indices, page regions and the tile hierarchy
//! - [`cache`] - Render requests, cached tiles, the tile cache and observers
//! - [`render`] - Renderer contract and a test-pattern renderer
//! - [`priority`] - Viewport-based tile priorities and request planning
//! - [`simulate`] - Scripted scroll simulation used by the CLI
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use page_tiles::{
//!     plan_requests, Focus, PatternRenderer, PriorityConfig, Rect, TileCache, TileCacheConfig,
//!     TileHierarchy,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let hierarchy = TileHierarchy::new(4, 2).unwrap();
//!     let cache = TileCache::new(PatternRenderer::new(256), TileCacheConfig::new(64)).unwrap();
//!
//!     let focus = Focus {
//!         page: 3,
//!         region: Rect::new(0.0, 0.0, 0.5, 0.5),
//!         target_level: 2,
//!         scale: 1.0,
//!     };
//!     let requests = plan_requests(&PriorityConfig::default(), &focus, &hierarchy, 2..5);
//!     cache.request_tiles(requests).unwrap();
//!
//!     cache.wait_idle().await;
//!     println!("{} tiles resident", cache.resident_count());
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod priority;
pub mod render;
pub mod simulate;
pub mod tile;

// Re-export commonly used types
pub use cache::{
    CacheStats, CachedTile, ObserverId, PageCounts, RenderRequest, TileCache, TileCacheConfig,
    TileCacheObserver, DEFAULT_MAX_TILE_COUNT,
};
pub use config::{Cli, Command, PlanConfig, PlanOutputFormat, RenderConfig, SimulateConfig};
pub use error::{CacheError, HierarchyError, RenderError, SimulationError, TileIndexError};
pub use priority::{level_for_zoom, plan_requests, tile_priority, Focus, PriorityConfig};
pub use render::{PatternRenderer, RasterTile, TileRenderer, MAX_TILE_PIXELS};
pub use simulate::{run_simulation, SimulationReport};
pub use tile::{PageTileIndex, Rect, TileHierarchy, TileIndex, TileNode, MAX_HIERARCHY_NODES};
