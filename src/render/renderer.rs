use async_trait::async_trait;

use crate::cache::{CachedTile, RenderRequest};
use crate::error::RenderError;

/// Produces tile images for the cache and frees them again.
///
/// The cache calls [`render`](TileRenderer::render) for at most one request at
/// a time. Every image that becomes resident is handed back exactly once,
/// through [`release`](TileRenderer::release) or
/// [`release_all`](TileRenderer::release_all).
#[async_trait]
pub trait TileRenderer: Send + Sync + 'static {
    /// The rendered image resource (pixel buffer, texture handle, ...).
    type Image: Send + Sync + 'static;

    /// Render the tile described by `request`.
    ///
    /// There is no timeout: a render that never completes stalls the cache's
    /// pipeline, so implementations must bound their own latency.
    async fn render(&self, request: &RenderRequest) -> Result<Self::Image, RenderError>;

    /// Free the resources of a tile leaving the cache.
    fn release(&self, tile: CachedTile<Self::Image>);

    /// Free several tiles in one call.
    fn release_all(&self, tiles: Vec<CachedTile<Self::Image>>) {
        for tile in tiles {
            self.release(tile);
        }
    }
}
