//! Test-pattern tile renderer.
//!
//! Produces a checkerboard whose colours are derived from the tile identity,
//! so neighbouring tiles and levels are easy to tell apart when dumped to disk.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, Rgba, RgbaImage};

use crate::cache::{CachedTile, RenderRequest};
use crate::error::RenderError;
use crate::tile::PageTileIndex;

use super::TileRenderer;

/// Largest edge, in pixels, of a rendered tile.
pub const MAX_TILE_PIXELS: u32 = 4096;

/// Edge of one checkerboard cell in pixels.
const CELL_PIXELS: u32 = 16;

// =============================================================================
// Raster Tile
// =============================================================================

/// RGBA8 pixels of a rendered tile.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterTile {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA8 pixels
    pub pixels: Bytes,
}

impl RasterTile {
    /// Encode the tile as JPEG at `quality` (clamped to 1-100).
    pub fn to_jpeg(&self, quality: u8) -> Result<Bytes, RenderError> {
        let quality = quality.clamp(1, 100);

        // JPEG has no alpha channel
        let rgb: Vec<u8> = self
            .pixels
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();

        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);
        encoder
            .encode(&rgb, self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|e| RenderError::Failed(e.to_string()))?;

        Ok(Bytes::from(output))
    }
}

// =============================================================================
// Pattern Renderer
// =============================================================================

/// Renderer drawing a deterministic checkerboard per tile.
///
/// Tracks how many rendered images are still alive (rendered but not yet
/// released), which makes leaks and double releases visible in tests.
#[derive(Debug)]
pub struct PatternRenderer {
    tile_size: u32,
    latency: Option<Duration>,
    failing_pages: HashSet<u32>,
    live: AtomicUsize,
    rendered: AtomicU64,
    released: AtomicU64,
}

impl PatternRenderer {
    /// Create a renderer whose tiles are `tile_size` pixels wide at scale 1.
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size: tile_size.max(1),
            latency: None,
            failing_pages: HashSet::new(),
            live: AtomicUsize::new(0),
            rendered: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Sleep for `latency` before producing each tile.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail every render of tiles on `page`.
    pub fn with_failing_page(mut self, page: u32) -> Self {
        self.failing_pages.insert(page);
        self
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Images rendered and not yet released.
    pub fn live_images(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn rendered_count(&self) -> u64 {
        self.rendered.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Edge length in pixels of a tile rendered at `scale`.
    pub fn pixel_size(&self, scale: f64) -> Result<u32, RenderError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(RenderError::InvalidScale(scale));
        }
        let px = (f64::from(self.tile_size) * scale).ceil();
        if px > f64::from(MAX_TILE_PIXELS) {
            return Err(RenderError::Failed(format!(
                "tile of {px} pixels exceeds the {MAX_TILE_PIXELS} pixel limit"
            )));
        }
        Ok((px as u32).max(1))
    }

    /// Rasterize the pattern for `index` without touching the live counters.
    pub fn rasterize(&self, index: &PageTileIndex, scale: f64) -> Result<RasterTile, RenderError> {
        let size = self.pixel_size(scale)?;
        let (light, dark) = palette(index);

        let image = RgbaImage::from_fn(size, size, |x, y| {
            if (x / CELL_PIXELS + y / CELL_PIXELS) % 2 == 0 {
                light
            } else {
                dark
            }
        });

        Ok(RasterTile {
            width: size,
            height: size,
            pixels: Bytes::from(image.into_raw()),
        })
    }

    fn forget(&self, count: usize) {
        self.live.fetch_sub(count, Ordering::SeqCst);
        self.released.fetch_add(count as u64, Ordering::SeqCst);
    }
}

impl Default for PatternRenderer {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl TileRenderer for PatternRenderer {
    type Image = RasterTile;

    async fn render(&self, request: &RenderRequest) -> Result<RasterTile, RenderError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing_pages.contains(&request.index.page) {
            return Err(RenderError::Failed(format!(
                "page {} is not renderable",
                request.index.page
            )));
        }

        let tile = self.rasterize(&request.index, request.scale)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        self.rendered.fetch_add(1, Ordering::SeqCst);
        Ok(tile)
    }

    fn release(&self, _tile: CachedTile<RasterTile>) {
        self.forget(1);
    }

    fn release_all(&self, tiles: Vec<CachedTile<RasterTile>>) {
        self.forget(tiles.len());
    }
}

/// Two colours derived from the tile identity.
fn palette(index: &PageTileIndex) -> (Rgba<u8>, Rgba<u8>) {
    let tile = index.tile;
    // FNV-1a over the identity fields
    let mut hash: u32 = 0x811c_9dc5;
    for value in [index.page, tile.level(), tile.row(), tile.col()] {
        for byte in value.to_le_bytes() {
            hash ^= u32::from(byte);
            hash = hash.wrapping_mul(0x0100_0193);
        }
    }
    let [r, g, b, _] = hash.to_le_bytes();
    let light = Rgba([r | 0x80, g | 0x80, b | 0x80, 0xFF]);
    let dark = Rgba([r & 0x7F, g & 0x7F, b & 0x7F, 0xFF]);
    (light, dark)
}

// =============================================================================
// Tests
// =============================================================================
