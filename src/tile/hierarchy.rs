//! Precomputed tile hierarchy for one page.
//!
//! The hierarchy is stored as a flat arena in level-major, row-major order.
//! The node for `(level, row, col)` lives at
//! `level_offset(level) + row * base^level + col`, so parent/child links are
//! computed rather than stored.
//!
//! ```text
//! level 0:  [ root ]
//! level 1:  [ 0,0 | 0,1 | 1,0 | 1,1 ]                     (base = 2)
//! level 2:  [ 0,0 | 0,1 | 0,2 | 0,3 | 1,0 | ... | 3,3 ]
//! ```

use std::collections::VecDeque;
use std::ops::Range;

use crate::error::HierarchyError;

use super::index::{grid_size, Rect, TileIndex};

/// Upper bound on the number of nodes built eagerly for one hierarchy.
pub const MAX_HIERARCHY_NODES: usize = 4 * 1024 * 1024;

/// A node of the tile hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct TileNode {
    index: TileIndex,
    region: Rect,
}

impl TileNode {
    pub fn index(&self) -> TileIndex {
        self.index
    }

    pub fn level(&self) -> u32 {
        self.index.level()
    }

    /// Cached [`TileIndex::page_region`].
    pub fn page_region(&self) -> Rect {
        self.region
    }
}

/// Immutable tree of tiles from level 0 down to `levels - 1`.
///
/// Build once per layout configuration and share it; construction cost grows
/// with `base^(2 * levels)`.
#[derive(Debug, Clone)]
pub struct TileHierarchy {
    levels: u32,
    base: u32,
    /// Start position of each level in `nodes`, plus the total length
    level_offsets: Vec<usize>,
    /// Tiles per axis at each level
    grid_sizes: Vec<usize>,
    nodes: Vec<TileNode>,
}

impl TileHierarchy {
    /// Build every node of a hierarchy with `levels` levels and `base`
    /// children per axis per node.
    pub fn new(levels: u32, base: u32) -> Result<Self, HierarchyError> {
        if levels == 0 {
            return Err(HierarchyError::NoLevels);
        }
        if base < 2 {
            return Err(HierarchyError::InvalidBase(base));
        }

        let too_large = HierarchyError::TooLarge {
            levels,
            base,
            limit: MAX_HIERARCHY_NODES,
        };

        let mut level_offsets = Vec::with_capacity(levels as usize + 1);
        let mut grid_sizes = Vec::with_capacity(levels as usize);
        let mut total: usize = 0;
        for level in 0..levels {
            level_offsets.push(total);
            let size = grid_size(base, level)
                .and_then(|size| usize::try_from(size).ok())
                .ok_or_else(|| too_large.clone())?;
            let per_level = size.checked_mul(size).ok_or_else(|| too_large.clone())?;
            total = total
                .checked_add(per_level)
                .filter(|&t| t <= MAX_HIERARCHY_NODES)
                .ok_or_else(|| too_large.clone())?;
            grid_sizes.push(size);
        }
        level_offsets.push(total);

        let mut nodes = Vec::with_capacity(total);
        for level in 0..levels {
            // Bounded by MAX_HIERARCHY_NODES, so the grid fits in u32
            let size = grid_sizes[level as usize] as u32;
            for row in 0..size {
                for col in 0..size {
                    let index = TileIndex::new(row, col, level, base)
                        .map_err(|_| too_large.clone())?;
                    nodes.push(TileNode {
                        index,
                        region: index.page_region(),
                    });
                }
            }
        }

        Ok(Self {
            levels,
            base,
            level_offsets,
            grid_sizes,
            nodes,
        })
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Total number of nodes across all levels.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: a hierarchy has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> &TileNode {
        &self.nodes[0]
    }

    /// Look up the node at `(level, row, col)`.
    pub fn node(&self, level: u32, row: u32, col: u32) -> Option<&TileNode> {
        if level >= self.levels {
            return None;
        }
        let size = self.grid_size(level);
        if row as usize >= size || col as usize >= size {
            return None;
        }
        self.nodes
            .get(self.level_offsets[level as usize] + row as usize * size + col as usize)
    }

    /// All nodes of one level, row-major.
    pub fn nodes_at_level(&self, level: u32) -> &[TileNode] {
        if level >= self.levels {
            return &[];
        }
        let start = self.level_offsets[level as usize];
        let end = self.level_offsets[level as usize + 1];
        &self.nodes[start..end]
    }

    /// Direct children of `node`, row-major. Empty for the deepest level.
    pub fn children<'a>(&'a self, node: &TileNode) -> impl Iterator<Item = &'a TileNode> + 'a {
        self.child_positions(node.index)
            .map(move |pos| &self.nodes[pos])
    }

    /// Breadth-first traversal.
    ///
    /// The root is always visited. `visitor` runs for each visited node whose
    /// level is at least `min_level`. A node's children are explored only while
    /// its level is below `max_level` (if given), and, when `cull` is given,
    /// only children whose region overlaps `cull` are enqueued.
    pub fn visit_breadth_first<F>(
        &self,
        min_level: u32,
        max_level: Option<u32>,
        cull: Option<&Rect>,
        mut visitor: F,
    ) where
        F: FnMut(&TileNode),
    {
        let mut queue = VecDeque::from([0usize]);
        while let Some(pos) = queue.pop_front() {
            let node = &self.nodes[pos];
            if node.level() >= min_level {
                visitor(node);
            }
            if !Self::descends(node, max_level) {
                continue;
            }
            for child in self.child_positions(node.index) {
                let keep = cull.map_or(true, |region| self.nodes[child].region.overlaps(region));
                if keep {
                    queue.push_back(child);
                }
            }
        }
    }

    /// Pre-order depth-first traversal with the same descent rule as
    /// [`visit_breadth_first`](Self::visit_breadth_first) and no culling.
    pub fn visit_depth_first<F>(&self, max_level: Option<u32>, mut visitor: F)
    where
        F: FnMut(&TileNode),
    {
        let mut stack = vec![0usize];
        while let Some(pos) = stack.pop() {
            let node = &self.nodes[pos];
            visitor(node);
            if Self::descends(node, max_level) {
                // Reversed so children pop in row-major order
                stack.extend(self.child_positions(node.index).rev());
            }
        }
    }

    /// Collect the breadth-first visit into a list of indices.
    pub fn breadth_first(
        &self,
        min_level: u32,
        max_level: Option<u32>,
        cull: Option<&Rect>,
    ) -> Vec<TileIndex> {
        let mut out = Vec::new();
        self.visit_breadth_first(min_level, max_level, cull, |node| out.push(node.index()));
        out
    }

    fn descends(node: &TileNode, max_level: Option<u32>) -> bool {
        max_level.map_or(true, |max| node.level() < max)
    }

    fn grid_size(&self, level: u32) -> usize {
        self.grid_sizes[level as usize]
    }

    fn child_positions(&self, index: TileIndex) -> ChildPositions {
        let child_level = index.level() + 1;
        if child_level >= self.levels {
            return ChildPositions::empty();
        }
        let base = self.base as usize;
        let size = self.grid_size(child_level);
        ChildPositions {
            offset: self.level_offsets[child_level as usize],
            size,
            first_row: index.row() as usize * base,
            first_col: index.col() as usize * base,
            base,
            range: 0..base * base,
        }
    }
}

/// Arena positions of a node's children.
struct ChildPositions {
    offset: usize,
    size: usize,
    first_row: usize,
    first_col: usize,
    base: usize,
    range: Range<usize>,
}

impl ChildPositions {
    fn empty() -> Self {
        Self {
            offset: 0,
            size: 0,
            first_row: 0,
            first_col: 0,
            base: 1,
            range: 0..0,
        }
    }

    fn child_at(&self, local: usize) -> usize {
        let row = self.first_row + local / self.base;
        let col = self.first_col + local % self.base;
        self.offset + row * self.size + col
    }
}

impl Iterator for ChildPositions {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        self.range.next().map(|local| self.child_at(local))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.range.size_hint()
    }
}

impl DoubleEndedIterator for ChildPositions {
    fn next_back(&mut self) -> Option<usize> {
        self.range.next_back().map(|local| self.child_at(local))
    }
}

impl ExactSizeIterator for ChildPositions {}

// =============================================================================
// Tests
// =============================================================================
