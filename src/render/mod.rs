//! Tile renderers.
//!
//! - [`TileRenderer`]: The contract the cache renders and releases tiles through
//! - [`PatternRenderer`]: Reference renderer producing deterministic RGBA test
//!   patterns, used by the command-line simulator and tests

mod pattern;
mod renderer;

pub use pattern::{PatternRenderer, RasterTile, MAX_TILE_PIXELS};
pub use renderer::TileRenderer;
