use thiserror::Error;

use crate::tile::PageTileIndex;

/// Errors raised when constructing a tile index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileIndexError {
    /// Branching factor must split each axis at least in two
    #[error("Invalid branching factor: expected at least 2, got {0}")]
    InvalidBase(u32),

    /// Row or column lies outside the level's grid
    #[error("Tile ({row}, {col}) out of range for level {level} (grid is {size}x{size})")]
    OutOfRange {
        row: u32,
        col: u32,
        level: u32,
        size: u64,
    },

    /// The level is too deep for the grid size to be represented
    #[error("Level {level} too deep for base {base}")]
    LevelTooDeep { level: u32, base: u32 },
}

/// Errors raised when building a tile hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyError {
    /// A hierarchy needs at least the root level
    #[error("Hierarchy must have at least one level")]
    NoLevels,

    /// Branching factor must split each axis at least in two
    #[error("Invalid branching factor: expected at least 2, got {0}")]
    InvalidBase(u32),

    /// Eager construction would allocate more nodes than allowed
    #[error("Hierarchy with {levels} levels and base {base} exceeds {limit} nodes")]
    TooLarge { levels: u32, base: u32, limit: usize },
}

/// Errors produced by a tile renderer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    /// The renderer could not produce the tile
    #[error("Render failed: {0}")]
    Failed(String),

    /// Render scale must be finite and positive
    #[error("Invalid render scale: {0}")]
    InvalidScale(f64),
}

/// Errors raised by the tile cache.
///
/// Every variant except [`CacheError::NoRuntime`] and
/// [`CacheError::InvalidCapacity`] signals a caller bug: the operation was
/// rejected and the cache state is unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    /// The cache has been disposed and no longer accepts requests
    #[error("Tile cache has been disposed")]
    Disposed,

    /// Cancellation targeted an identity with no pending request
    #[error("No pending request for tile {0}")]
    NotPending(PageTileIndex),

    /// Cancellation passed a request that differs from the pending one
    #[error(
        "Request for tile {index} does not match the pending request \
         (pending scale {pending_scale}, requested scale {requested_scale})"
    )]
    RequestMismatch {
        index: PageTileIndex,
        pending_scale: f64,
        requested_scale: f64,
    },

    /// The cache was created outside of a tokio runtime
    #[error("Tile cache must be created inside a tokio runtime")]
    NoRuntime,

    /// The cache cannot hold a rendered tile next to a job in flight
    #[error("max_tile_count must be at least 2, got {0}")]
    InvalidCapacity(usize),
}

/// Errors raised while driving a scroll simulation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    /// The simulation settings are inconsistent
    #[error("Invalid simulation config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
