//! Scripted scroll through a synthetic document.
//!
//! Drives a [`TileCache`] backed by the [`PatternRenderer`] the way a viewer
//! would while the user scrolls from the first to the last page at a fixed
//! zoom:
//!
//! ```text
//!  for each step:
//!    focus  = page under the viewport center + visible region
//!    wanted = plan_requests(focus, neighbouring pages)
//!    cancel pending requests no longer wanted
//!    request wanted tiles, re-rank resident tiles
//!    reevaluate priorities, wait for the cache to go idle
//! ```
//!
//! The resulting [`SimulationReport`] is what the `simulate` subcommand prints.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{
    CacheStats, CachedTile, PageCounts, RenderRequest, TileCache, TileCacheConfig,
    TileCacheObserver,
};
use crate::config::SimulateConfig;
use crate::error::{RenderError, SimulationError};
use crate::priority::{level_for_zoom, plan_requests, tile_priority, Focus, PriorityConfig};
use crate::render::{PatternRenderer, RasterTile};
use crate::tile::{PageTileIndex, Rect, TileHierarchy};

/// Outcome of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub steps: u32,

    /// Hierarchy level the zoom maps to
    pub target_level: u32,

    /// Cache counters right before disposal
    pub stats: CacheStats,

    /// Largest resident set observed after a step
    pub peak_resident: usize,

    /// Largest pending queue observed after a step
    pub peak_pending: usize,

    /// Per-page counts right before disposal
    pub pages: BTreeMap<u32, PageCounts>,

    /// Tiles released by the final memory-pressure sweep
    pub evicted_on_memory_pressure: usize,

    /// Paint notifications delivered to the observer
    pub painted_events: u64,

    /// Eviction notifications delivered to the observer
    pub evicted_events: u64,

    /// Rendered images not released after disposal
    pub leaked_images: usize,
}

/// Observer logging paints and evictions and counting them.
#[derive(Debug, Default)]
struct ScrollObserver {
    painted: AtomicU64,
    evicted: AtomicU64,
}

impl TileCacheObserver<RasterTile> for ScrollObserver {
    fn on_tile_painted(&self, _request: &RenderRequest, tile: &CachedTile<RasterTile>) {
        self.painted.fetch_add(1, Ordering::Relaxed);
        debug!(tile = %tile.index(), width = tile.image().width, "Painted");
    }

    fn on_tile_evicted(&self, tile: &CachedTile<RasterTile>) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
        debug!(tile = %tile.index(), priority = tile.priority(), "Evicted");
    }

    fn on_tile_render_failed(&self, request: &RenderRequest, error: &RenderError) {
        debug!(tile = %request.index, "Render failed: {}", error);
    }
}

/// Focus of the viewport at `step` of `steps`.
///
/// Pages are stacked vertically, each one unit tall. The viewport is
/// `1 / zoom` pages tall and wide, horizontally centred.
fn viewport_focus(
    config: &SimulateConfig,
    hierarchy: &TileHierarchy,
    target_level: u32,
    step: u32,
) -> Focus {
    let extent = (1.0 / config.zoom).min(1.0);
    let travel = f64::from(config.pages) - extent;
    let progress = if config.steps > 1 {
        f64::from(step) / f64::from(config.steps - 1)
    } else {
        0.0
    };
    let top = travel * progress;

    let last_page = config.pages - 1;
    let page = ((top + extent / 2.0).floor() as u32).min(last_page);
    let region = Rect::new((1.0 - extent) / 2.0, top - f64::from(page), extent, extent);

    let density = f64::from(hierarchy.base()).powi(target_level as i32);
    Focus {
        page,
        region,
        target_level,
        scale: config.zoom / density,
    }
}

/// Run the scroll simulation described by `config`.
pub async fn run_simulation(config: &SimulateConfig) -> Result<SimulationReport, SimulationError> {
    config.validate().map_err(SimulationError::InvalidConfig)?;

    let hierarchy = TileHierarchy::new(config.hierarchy.levels, config.hierarchy.base)?;
    let target_level = level_for_zoom(config.zoom, &hierarchy);
    let priorities = PriorityConfig::default();

    let mut renderer = PatternRenderer::new(config.tile_size);
    if config.latency_ms > 0 {
        renderer = renderer.with_latency(Duration::from_millis(config.latency_ms));
    }
    if let Some(page) = config.fail_page {
        renderer = renderer.with_failing_page(page);
    }

    let cache = TileCache::new(renderer, TileCacheConfig::new(config.max_tiles))?;
    let observer = Arc::new(ScrollObserver::default());
    cache.add_observer(observer.clone());

    info!(
        pages = config.pages,
        steps = config.steps,
        zoom = config.zoom,
        target_level,
        max_tiles = config.max_tiles,
        "Starting scroll simulation"
    );

    let mut peak_resident = 0;
    let mut peak_pending = 0;

    for step in 0..config.steps {
        let focus = viewport_focus(config, &hierarchy, target_level, step);
        let first = focus.page.saturating_sub(1);
        let end = (focus.page + 2).min(config.pages);
        let wanted = plan_requests(&priorities, &focus, &hierarchy, first..end);
        let wanted_keys: HashSet<PageTileIndex> = wanted.iter().map(|r| r.index).collect();

        let stale: Vec<RenderRequest> = cache
            .pending_requests()
            .into_iter()
            .filter(|request| !wanted_keys.contains(&request.index))
            .collect();
        cache.cancel_requests(stale)?;
        cache.request_tiles(wanted)?;

        for tile in cache.resident_tiles() {
            let index = tile.index();
            cache.set_priority(&index, tile_priority(&priorities, &focus, &index))?;
        }
        cache.reevaluate_priorities()?;
        cache.wait_idle().await;

        let stats = cache.stats();
        peak_resident = peak_resident.max(stats.resident);
        peak_pending = peak_pending.max(stats.pending);
        debug!(
            step,
            page = focus.page,
            pending = stats.pending,
            resident = stats.resident,
            "Scroll step settled"
        );
    }

    let evicted_on_memory_pressure = cache.evict_on_memory_pressure();
    let stats = cache.stats();
    let pages = cache.counts_per_page();
    cache.dispose();
    cache.wait_idle().await;

    let report = SimulationReport {
        steps: config.steps,
        target_level,
        stats,
        peak_resident,
        peak_pending,
        pages,
        evicted_on_memory_pressure,
        painted_events: observer.painted.load(Ordering::Relaxed),
        evicted_events: observer.evicted.load(Ordering::Relaxed),
        leaked_images: cache.renderer().live_images(),
    };

    info!(
        rendered = report.stats.tiles_rendered,
        evicted = report.stats.tiles_evicted,
        failures = report.stats.render_failures,
        "Scroll simulation finished"
    );
    Ok(report)
}

// =============================================================================
// Tests
// =============================================================================
