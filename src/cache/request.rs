//! Render requests and resident tiles.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;

use crate::tile::PageTileIndex;

// =============================================================================
// RenderRequest
// =============================================================================

/// A desired tile render.
///
/// Two requests are equal when they target the same [`PageTileIndex`]; the
/// render `scale` and `priority` do not take part in equality. The cache keys
/// its pending queue the same way, so a second request for an identity that is
/// already pending updates the pending entry instead of queueing another
/// render. Use [`RenderRequest::same_render`] to also compare the scale.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RenderRequest {
    /// Tile to render
    pub index: PageTileIndex,

    /// Render scale (device pixels per tile pixel)
    pub scale: f64,

    /// Scheduling priority; higher renders first and is evicted last
    pub priority: f64,
}

impl RenderRequest {
    pub fn new(index: PageTileIndex, scale: f64, priority: f64) -> Self {
        Self {
            index,
            scale,
            priority,
        }
    }

    /// Returns `true` if both requests target the same tile at the same scale.
    pub fn same_render(&self, other: &RenderRequest) -> bool {
        self.index == other.index && self.scale == other.scale
    }
}

impl PartialEq for RenderRequest {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for RenderRequest {}

impl Hash for RenderRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

// =============================================================================
// CachedTile
// =============================================================================

/// A rendered tile held by the cache.
///
/// The image is shared behind an [`Arc`] so query results and observer
/// notifications can hand out cheap clones. The cache entry itself is handed
/// back to the renderer exactly once, on eviction or disposal, through
/// [`TileRenderer::release`](crate::render::TileRenderer::release).
pub struct CachedTile<I> {
    index: PageTileIndex,
    image: Arc<I>,
    scale: f64,
    priority: f64,
}

impl<I> CachedTile<I> {
    pub fn new(index: PageTileIndex, image: Arc<I>, scale: f64, priority: f64) -> Self {
        Self {
            index,
            image,
            scale,
            priority,
        }
    }

    /// Build the resident tile for a finished render.
    pub(crate) fn rendered(request: &RenderRequest, image: I) -> Self {
        Self::new(request.index, Arc::new(image), request.scale, request.priority)
    }

    pub fn index(&self) -> PageTileIndex {
        self.index
    }

    pub fn image(&self) -> &Arc<I> {
        &self.image
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Priority at the time this snapshot was taken.
    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub(crate) fn set_priority(&mut self, priority: f64) {
        self.priority = priority;
    }
}

impl<I> Clone for CachedTile<I> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            image: Arc::clone(&self.image),
            scale: self.scale,
            priority: self.priority,
        }
    }
}

impl<I> PartialEq for CachedTile<I> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<I> fmt::Debug for CachedTile<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedTile")
            .field("index", &self.index)
            .field("scale", &self.scale)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
