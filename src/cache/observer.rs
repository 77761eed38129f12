//! Cache event notifications.

use crate::error::RenderError;
use crate::tile::PageTileIndex;

use super::request::{CachedTile, RenderRequest};

/// Receives tile cache events.
///
/// Every method defaults to a no-op. Events are delivered synchronously on
/// the thread that caused them, after the cache has released its internal
/// lock, so an observer may call back into the cache. Delivery order across
/// multiple observers is unspecified.
pub trait TileCacheObserver<I>: Send + Sync {
    /// New requests were admitted into the pending queue.
    fn on_requests_added(&self, _requests: &[RenderRequest]) {}

    /// Pending requests were cancelled.
    fn on_requests_cancelled(&self, _requests: &[RenderRequest]) {}

    /// A request moved into the in-flight slot and is being rendered.
    fn on_tile_paint_start(&self, _request: &RenderRequest) {}

    /// A render finished and the tile is now resident.
    fn on_tile_painted(&self, _request: &RenderRequest, _tile: &CachedTile<I>) {}

    /// A resident tile was evicted and its image released.
    fn on_tile_evicted(&self, _tile: &CachedTile<I>) {}

    /// A render failed; the tile is neither pending nor resident afterwards.
    fn on_tile_render_failed(&self, _request: &RenderRequest, _error: &RenderError) {}

    /// The priority of a pending, in-flight or resident tile changed.
    fn on_priority_changed(&self, _index: PageTileIndex, _old: f64, _new: f64) {}
}

/// Handle returned by [`TileCache::add_observer`](super::TileCache::add_observer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

/// An event queued while the cache lock is held.
pub(crate) enum CacheEvent<I> {
    RequestsAdded(Vec<RenderRequest>),
    RequestsCancelled(Vec<RenderRequest>),
    PaintStart(RenderRequest),
    Painted(RenderRequest, CachedTile<I>),
    Evicted(CachedTile<I>),
    RenderFailed(RenderRequest, RenderError),
    PriorityChanged {
        index: PageTileIndex,
        old: f64,
        new: f64,
    },
}

impl<I> CacheEvent<I> {
    pub(crate) fn dispatch(&self, observer: &dyn TileCacheObserver<I>) {
        match self {
            CacheEvent::RequestsAdded(requests) => observer.on_requests_added(requests),
            CacheEvent::RequestsCancelled(requests) => observer.on_requests_cancelled(requests),
            CacheEvent::PaintStart(request) => observer.on_tile_paint_start(request),
            CacheEvent::Painted(request, tile) => observer.on_tile_painted(request, tile),
            CacheEvent::Evicted(tile) => observer.on_tile_evicted(tile),
            CacheEvent::RenderFailed(request, error) => {
                observer.on_tile_render_failed(request, error)
            }
            CacheEvent::PriorityChanged { index, old, new } => {
                observer.on_priority_changed(*index, *old, *new)
            }
        }
    }
}
