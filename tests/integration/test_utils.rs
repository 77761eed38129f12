//! Test utilities for integration tests.
//!
//! This module provides a renderer whose jobs are completed by the test,
//! an observer recording every cache event, and helpers for building tile
//! identities and checking cache invariants.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

use page_tiles::cache::{CachedTile, RenderRequest, TileCache, TileCacheObserver};
use page_tiles::error::RenderError;
use page_tiles::render::TileRenderer;
use page_tiles::tile::{PageTileIndex, TileIndex};

// =============================================================================
// Tile helpers
// =============================================================================

/// Base-2 tile on `page`.
pub fn tile(page: u32, row: u32, col: u32, level: u32) -> PageTileIndex {
    PageTileIndex::new(page, TileIndex::new(row, col, level, 2).unwrap())
}

/// Root tile of `page`, the usual test subject when only identity matters.
pub fn page(page: u32) -> PageTileIndex {
    tile(page, 0, 0, 0)
}

/// Request at scale 1.0.
pub fn request(index: PageTileIndex, priority: f64) -> RenderRequest {
    RenderRequest::new(index, 1.0, priority)
}

/// Let spawned tasks run until the runtime has nothing left to do.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Gated Renderer
// =============================================================================

/// Image produced by [`GatedRenderer`].
#[derive(Debug, Clone, PartialEq)]
pub struct TestImage {
    pub index: PageTileIndex,
}

type Gate = oneshot::Sender<Result<(), RenderError>>;

/// A renderer whose jobs block until the test finishes them.
///
/// In open mode jobs complete immediately. Every release is tracked so tests
/// can check that each rendered image is released exactly once.
pub struct GatedRenderer {
    open: bool,
    waiting: Mutex<Vec<(RenderRequest, Gate)>>,
    started: AtomicUsize,
    live: AtomicUsize,
    released: Mutex<Vec<PageTileIndex>>,
    bulk_calls: AtomicUsize,
}

impl GatedRenderer {
    /// Jobs wait for [`finish`](Self::finish).
    pub fn gated() -> Self {
        Self::with_mode(false)
    }

    /// Jobs complete as soon as they run.
    pub fn open() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(open: bool) -> Self {
        Self {
            open,
            waiting: Mutex::new(Vec::new()),
            started: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            released: Mutex::new(Vec::new()),
            bulk_calls: AtomicUsize::new(0),
        }
    }

    /// Jobs currently blocked on their gate.
    pub fn waiting_count(&self) -> usize {
        self.waiting.lock().unwrap().len()
    }

    /// Jobs the renderer has been asked to run.
    pub fn started_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Rendered images not yet released.
    pub fn live_images(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Released tiles in release order.
    pub fn released(&self) -> Vec<PageTileIndex> {
        self.released.lock().unwrap().clone()
    }

    /// Number of `release_all` calls.
    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    /// Complete the blocked job with `outcome` and let the cache react.
    ///
    /// Panics if no job is blocked.
    pub async fn finish(&self, outcome: Result<(), RenderError>) -> RenderRequest {
        settle().await;
        let (request, gate) = self
            .waiting
            .lock()
            .unwrap()
            .pop()
            .expect("no render job is waiting");
        let _ = gate.send(outcome);
        settle().await;
        request
    }

    /// Complete the blocked job successfully.
    pub async fn finish_ok(&self) -> RenderRequest {
        self.finish(Ok(())).await
    }

    fn forget(&self, tile: &CachedTile<TestImage>) {
        assert_eq!(tile.index(), tile.image().index, "image released under the wrong tile");
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.released.lock().unwrap().push(tile.index());
    }
}

#[async_trait]
impl TileRenderer for GatedRenderer {
    type Image = TestImage;

    async fn render(&self, request: &RenderRequest) -> Result<TestImage, RenderError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if !self.open {
            let (tx, rx) = oneshot::channel();
            self.waiting.lock().unwrap().push((*request, tx));
            rx.await
                .unwrap_or_else(|_| Err(RenderError::Failed("gate dropped".to_string())))?;
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(TestImage {
            index: request.index,
        })
    }

    fn release(&self, tile: CachedTile<TestImage>) {
        self.forget(&tile);
    }

    fn release_all(&self, tiles: Vec<CachedTile<TestImage>>) {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        for tile in &tiles {
            self.forget(tile);
        }
    }
}

// =============================================================================
// Recording Observer
// =============================================================================

/// A cache event as seen by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Added(Vec<PageTileIndex>),
    Cancelled(Vec<PageTileIndex>),
    PaintStart(PageTileIndex),
    Painted(PageTileIndex),
    Evicted(PageTileIndex),
    Failed(PageTileIndex),
    PriorityChanged(PageTileIndex, f64, f64),
}

/// Observer recording every event in delivery order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn painted(&self) -> Vec<PageTileIndex> {
        self.filter(|event| match event {
            Event::Painted(index) => Some(*index),
            _ => None,
        })
    }

    pub fn evicted(&self) -> Vec<PageTileIndex> {
        self.filter(|event| match event {
            Event::Evicted(index) => Some(*index),
            _ => None,
        })
    }

    pub fn failed(&self) -> Vec<PageTileIndex> {
        self.filter(|event| match event {
            Event::Failed(index) => Some(*index),
            _ => None,
        })
    }

    fn filter<F>(&self, f: F) -> Vec<PageTileIndex>
    where
        F: Fn(&Event) -> Option<PageTileIndex>,
    {
        self.events.lock().unwrap().iter().filter_map(f).collect()
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl<I> TileCacheObserver<I> for RecordingObserver {
    fn on_requests_added(&self, requests: &[RenderRequest]) {
        self.record(Event::Added(requests.iter().map(|r| r.index).collect()));
    }

    fn on_requests_cancelled(&self, requests: &[RenderRequest]) {
        self.record(Event::Cancelled(requests.iter().map(|r| r.index).collect()));
    }

    fn on_tile_paint_start(&self, request: &RenderRequest) {
        self.record(Event::PaintStart(request.index));
    }

    fn on_tile_painted(&self, request: &RenderRequest, _tile: &CachedTile<I>) {
        self.record(Event::Painted(request.index));
    }

    fn on_tile_evicted(&self, tile: &CachedTile<I>) {
        self.record(Event::Evicted(tile.index()));
    }

    fn on_tile_render_failed(&self, request: &RenderRequest, _error: &RenderError) {
        self.record(Event::Failed(request.index));
    }

    fn on_priority_changed(&self, index: PageTileIndex, old: f64, new: f64) {
        self.record(Event::PriorityChanged(index, old, new));
    }
}

// =============================================================================
// Invariants
// =============================================================================

/// Assert the structural invariants of the cache.
///
/// - pending, in-flight and resident tiles are pairwise disjoint
/// - `resident + in_flight <= max_tile_count`
pub fn assert_invariants<R: TileRenderer>(cache: &TileCache<R>) {
    let pending: HashSet<PageTileIndex> =
        cache.pending_requests().iter().map(|r| r.index).collect();
    let resident: HashSet<PageTileIndex> =
        cache.resident_tiles().iter().map(|t| t.index()).collect();
    let in_flight = cache.in_flight().map(|r| r.index);

    assert!(
        pending.is_disjoint(&resident),
        "tiles both pending and resident: {:?}",
        pending.intersection(&resident).collect::<Vec<_>>()
    );
    if let Some(index) = in_flight {
        assert!(!pending.contains(&index), "in-flight tile {} is pending", index);
        assert!(!resident.contains(&index), "in-flight tile {} is resident", index);
    }

    let occupied = resident.len() + usize::from(in_flight.is_some());
    assert!(
        occupied <= cache.max_tile_count(),
        "{} tiles exceed capacity {}",
        occupied,
        cache.max_tile_count()
    );
}
