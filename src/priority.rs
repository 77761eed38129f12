//! Tile priorities for a viewer focused on part of a document.
//!
//! The page-rendering side of a viewer decides which tiles it wants and how
//! much it wants them; the [`TileCache`](crate::cache::TileCache) only
//! schedules and evicts by the resulting numbers. Weights are passed in as a
//! [`PriorityConfig`] rather than fixed, so different viewers (thumbnails,
//! presentation mode, ...) can tune them.
//!
//! Priority bands, highest first:
//!
//! | Tile                                         | Base                 |
//! |----------------------------------------------|----------------------|
//! | Focus page, overlapping the focus region     | `visible`            |
//! | Focus page, outside the focus region         | `margin`             |
//! | Other pages                                  | `offscreen`          |
//!
//! From the base, `page_distance_penalty` is subtracted per page away from the
//! focus and `level_penalty` per level away from the target level. Level-0
//! tiles get `preview_bonus` on top because a page with no tile at all is
//! worse than a blurry one.

use std::ops::Range;

use crate::cache::RenderRequest;
use crate::tile::{PageTileIndex, Rect, TileHierarchy};

/// Weights for [`tile_priority`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityConfig {
    pub visible: f64,
    pub margin: f64,
    pub offscreen: f64,
    pub page_distance_penalty: f64,
    pub level_penalty: f64,
    pub preview_bonus: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            visible: 1000.0,
            margin: 500.0,
            offscreen: 250.0,
            page_distance_penalty: 50.0,
            level_penalty: 20.0,
            preview_bonus: 100.0,
        }
    }
}

/// Where the viewer is looking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Focus {
    /// Page under the viewport center
    pub page: u32,

    /// Visible part of that page, in normalized page coordinates
    pub region: Rect,

    /// Hierarchy level whose resolution matches the current zoom
    pub target_level: u32,

    /// Render scale requested for tiles
    pub scale: f64,
}

/// Priority of `index` for a viewer at `focus`.
pub fn tile_priority(config: &PriorityConfig, focus: &Focus, index: &PageTileIndex) -> f64 {
    let tile = index.tile;

    let base = if index.page == focus.page {
        if tile.page_region().overlaps(&focus.region) {
            config.visible
        } else {
            config.margin
        }
    } else {
        config.offscreen
    };

    let page_distance = f64::from(index.page.abs_diff(focus.page));
    let level_distance = f64::from(tile.level().abs_diff(focus.target_level));
    let preview = if tile.level() == 0 {
        config.preview_bonus
    } else {
        0.0
    };

    base - page_distance * config.page_distance_penalty - level_distance * config.level_penalty
        + preview
}

/// Hierarchy level whose tiles match `zoom` (1.0 = one level-0 tile per page).
///
/// Picks the shallowest level whose tiles are at least as dense as the zoom,
/// clamped to the hierarchy. NaN and non-positive zooms map to level 0.
pub fn level_for_zoom(zoom: f64, hierarchy: &TileHierarchy) -> u32 {
    let deepest = hierarchy.levels() - 1;
    let base = f64::from(hierarchy.base());
    if zoom.is_nan() || zoom <= 0.0 {
        return 0;
    }

    let mut level = 0;
    let mut density = 1.0;
    while density < zoom && level < deepest {
        density *= base;
        level += 1;
    }
    level
}

/// Requests a viewer at `focus` wants across `pages`, with priorities.
///
/// Every page gets its level-0 preview. The focus page additionally gets the
/// target-level tiles overlapping the focus region.
pub fn plan_requests(
    config: &PriorityConfig,
    focus: &Focus,
    hierarchy: &TileHierarchy,
    pages: Range<u32>,
) -> Vec<RenderRequest> {
    let mut requests = Vec::new();
    for page in pages {
        let root = PageTileIndex::new(page, hierarchy.root().index());
        requests.push(RenderRequest::new(
            root,
            focus.scale,
            tile_priority(config, focus, &root),
        ));

        if page != focus.page || focus.target_level == 0 {
            continue;
        }
        hierarchy.visit_breadth_first(
            focus.target_level,
            Some(focus.target_level),
            Some(&focus.region),
            |node| {
                let index = PageTileIndex::new(page, node.index());
                requests.push(RenderRequest::new(
                    index,
                    focus.scale,
                    tile_priority(config, focus, &index),
                ));
            },
        );
    }
    requests
}

// =============================================================================
// Tests
// =============================================================================
