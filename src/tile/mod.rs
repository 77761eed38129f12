//! Tile identity and hierarchy.
//!
//! Every page of a document is split into a hierarchy of square tiles:
//!
//! ```text
//!   level 0            level 1 (base 2)       level 2 (base 2)
//! ┌─────────┐        ┌────┬────┐            ┌──┬──┬──┬──┐
//! │         │        │0,0 │0,1 │            ├──┼──┼──┼──┤
//! │  root   │   →    ├────┼────┤      →     ├──┼──┼──┼──┤
//! │         │        │1,0 │1,1 │            ├──┼──┼──┼──┤
//! └─────────┘        └────┴────┘            └──┴──┴──┴──┘
//! ```
//!
//! # Components
//!
//! - [`Rect`]: Normalized page-local rectangle used for regions and culling
//! - [`TileIndex`]: Row, column, level and branching factor of one tile
//! - [`PageTileIndex`]: A [`TileIndex`] qualified by its page number
//! - [`TileHierarchy`]: Eagerly built arena of every tile down to a fixed depth,
//!   with breadth-first (cullable) and depth-first traversal
//!
//! # Example
//!
//! ```
//! use page_tiles::tile::{Rect, TileHierarchy};
//!
//! let hierarchy = TileHierarchy::new(3, 2).unwrap();
//!
//! // Tiles at levels 1..=2 overlapping the top-left quadrant
//! let visible = hierarchy.breadth_first(1, Some(2), Some(&Rect::new(0.0, 0.0, 0.5, 0.5)));
//! assert_eq!(visible.len(), 1 + 4);
//! ```

mod hierarchy;
mod index;

pub use hierarchy::{TileHierarchy, TileNode, MAX_HIERARCHY_NODES};
pub use index::{PageTileIndex, Rect, TileIndex};
