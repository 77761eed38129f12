//! Tile identity and page-local geometry.
//!
//! A page is the unit square `[0, 1] x [0, 1]`. Level 0 covers the whole page
//! with a single tile; every deeper level splits each axis by the hierarchy's
//! branching factor (`base`), so level `L` is a `base^L x base^L` grid.

use std::fmt;

use serde::Serialize;

use crate::error::TileIndexError;

// =============================================================================
// Rect
// =============================================================================

/// Axis-aligned rectangle in normalized page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// The whole page.
    pub const UNIT: Rect = Rect {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Returns `true` if the two rectangles share a region of positive area.
    ///
    /// Rectangles that only touch along an edge or a corner do not overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Returns `true` if `(x, y)` lies inside the rectangle (right/bottom edges excluded).
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Center point of the rectangle.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

// =============================================================================
// TileIndex
// =============================================================================

/// Number of tiles along one axis at `level`, or `None` on overflow.
pub(crate) fn grid_size(base: u32, level: u32) -> Option<u64> {
    u64::from(base).checked_pow(level)
}

/// Identity of a tile within one page's hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileIndex {
    level: u32,
    row: u32,
    col: u32,
    base: u32,
}

impl TileIndex {
    /// Create a tile index, validating that `row` and `col` lie inside the
    /// `base^level` grid.
    pub fn new(row: u32, col: u32, level: u32, base: u32) -> Result<Self, TileIndexError> {
        if base < 2 {
            return Err(TileIndexError::InvalidBase(base));
        }
        let size = grid_size(base, level).ok_or(TileIndexError::LevelTooDeep { level, base })?;
        if u64::from(row) >= size || u64::from(col) >= size {
            return Err(TileIndexError::OutOfRange {
                row,
                col,
                level,
                size,
            });
        }
        Ok(Self {
            level,
            row,
            col,
            base,
        })
    }

    /// The level-0 tile covering the whole page.
    pub fn root(base: u32) -> Result<Self, TileIndexError> {
        Self::new(0, 0, 0, base)
    }

    /// Child at `(local_row, local_col)` within this tile's `base x base` split.
    ///
    /// Returns `None` if the local coordinates exceed the branching factor or
    /// the child would be an index [`new`](Self::new) rejects.
    pub fn child(&self, local_row: u32, local_col: u32) -> Option<Self> {
        if local_row >= self.base || local_col >= self.base {
            return None;
        }
        let row = self.row.checked_mul(self.base)?.checked_add(local_row)?;
        let col = self.col.checked_mul(self.base)?.checked_add(local_col)?;
        Self::new(row, col, self.level.checked_add(1)?, self.base).ok()
    }

    /// Parent tile, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.level == 0 {
            return None;
        }
        Some(Self {
            level: self.level - 1,
            row: self.row / self.base,
            col: self.col / self.base,
            base: self.base,
        })
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn col(&self) -> u32 {
        self.col
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Normalized region of the page covered by this tile.
    ///
    /// Both edges come from the grid lines `i / base^level`, so neighbouring
    /// tiles share bit-identical edges and never overlap.
    pub fn page_region(&self) -> Rect {
        let n = f64::from(self.base).powi(self.level as i32);
        let left = f64::from(self.col) / n;
        let top = f64::from(self.row) / n;
        let right = (f64::from(self.col) + 1.0) / n;
        let bottom = (f64::from(self.row) + 1.0) / n;
        Rect::new(left, top, right - left, bottom - top)
    }
}

// =============================================================================
// PageTileIndex
// =============================================================================

/// Identity of a tile within the whole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PageTileIndex {
    /// Zero-based page number
    pub page: u32,

    /// Tile within the page hierarchy
    pub tile: TileIndex,
}

impl PageTileIndex {
    pub fn new(page: u32, tile: TileIndex) -> Self {
        Self { page, tile }
    }
}

impl fmt::Display for PageTileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "p{}/L{}/{},{}",
            self.page, self.tile.level, self.tile.row, self.tile.col
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
