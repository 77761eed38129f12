//! Bounded priority cache of rendered tiles.
//!
//! # Life of a tile
//!
//! ```text
//!  request_tiles()         advance()             render completes
//! ───────────────▶ pending ─────────▶ in flight ──────────────────▶ resident
//!                     │                   │                            │
//!          cancel ◀───┘        failure ◀──┘          evict / dispose ◀─┘
//! ```
//!
//! A tile identity lives in at most one of the three stages at a time. At most
//! one render runs at once, and `resident + in_flight <= max_tile_count` holds
//! after every operation.
//!
//! # Scheduling
//!
//! After every admission, cancellation and render completion the cache runs
//! one scheduling step:
//!
//! 1. Nothing to do if the pending queue is empty or a job is in flight.
//! 2. If the resident set plus the new job would reach capacity, the
//!    lowest-priority resident tile is evicted, but only when the best pending
//!    request outranks it. Otherwise the pending work waits.
//! 3. The highest-priority pending request (oldest first on ties) moves into
//!    the in-flight slot and its render is spawned on the runtime.
//!
//! Each completion runs the next step from its own task, so draining a long
//! queue never grows the stack.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

use crate::error::{CacheError, RenderError};
use crate::render::TileRenderer;
use crate::tile::PageTileIndex;

use super::observer::{CacheEvent, ObserverId, TileCacheObserver};
use super::request::{CachedTile, RenderRequest};

/// Default number of tiles the cache may hold, counting the in-flight job.
pub const DEFAULT_MAX_TILE_COUNT: usize = 128;

// =============================================================================
// Configuration and statistics
// =============================================================================

/// Tile cache configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCacheConfig {
    /// Upper bound on resident tiles plus the in-flight job
    pub max_tile_count: usize,
}

impl TileCacheConfig {
    pub fn new(max_tile_count: usize) -> Self {
        Self { max_tile_count }
    }

    /// A cache must fit one resident tile next to the in-flight job.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_tile_count < 2 {
            return Err(CacheError::InvalidCapacity(self.max_tile_count));
        }
        Ok(())
    }
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TILE_COUNT)
    }
}

/// Counters and a size snapshot of the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Requests inserted into the pending queue
    pub requests_admitted: u64,

    /// Requests ignored or merged because the tile was already known
    pub requests_deduplicated: u64,

    /// Pending requests removed by cancellation
    pub requests_cancelled: u64,

    /// Renders that produced a resident tile
    pub tiles_rendered: u64,

    /// Renders that failed
    pub render_failures: u64,

    /// Resident tiles evicted for capacity or memory pressure
    pub tiles_evicted: u64,

    /// Render results that arrived after disposal
    pub results_discarded: u64,

    pub pending: usize,
    pub resident: usize,
    pub in_flight: bool,
}

/// Pending and resident tile counts for one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PageCounts {
    pub pending: usize,
    pub resident: usize,
}

// =============================================================================
// Internal state
// =============================================================================

struct PendingEntry {
    request: RenderRequest,
    seq: u64,
}

struct ResidentEntry<I> {
    tile: CachedTile<I>,
    seq: u64,
}

struct CacheState<I> {
    pending: HashMap<PageTileIndex, PendingEntry>,
    in_flight: Option<RenderRequest>,
    resident: HashMap<PageTileIndex, ResidentEntry<I>>,
    max_tile_count: usize,
    /// Admission order, used to break priority ties
    next_seq: u64,
    disposed: bool,
    stats: CacheStats,
}

/// Side effects of one operation, applied after the state lock is released.
struct Effects<I> {
    events: Vec<CacheEvent<I>>,
    released: Vec<CachedTile<I>>,
    /// Release through `release_all` even for a single tile
    bulk_release: bool,
    job: Option<RenderRequest>,
    settled: bool,
}

impl<I> Default for Effects<I> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            released: Vec::new(),
            bulk_release: false,
            job: None,
            settled: false,
        }
    }
}

impl<I> CacheState<I> {
    fn new(max_tile_count: usize) -> Self {
        Self {
            pending: HashMap::new(),
            in_flight: None,
            resident: HashMap::new(),
            max_tile_count,
            next_seq: 0,
            disposed: false,
            stats: CacheStats::default(),
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Highest-priority pending entry; the oldest wins ties.
    fn best_pending(&self) -> Option<(PageTileIndex, f64)> {
        self.pending
            .iter()
            .max_by(|(_, a), (_, b)| {
                a.request
                    .priority
                    .total_cmp(&b.request.priority)
                    .then_with(|| b.seq.cmp(&a.seq))
            })
            .map(|(key, entry)| (*key, entry.request.priority))
    }

    /// Lowest-priority resident entry; the oldest goes first on ties.
    fn worst_resident(&self) -> Option<(PageTileIndex, f64)> {
        self.resident
            .iter()
            .min_by(|(_, a), (_, b)| Self::eviction_order(a, b))
            .map(|(key, entry)| (*key, entry.tile.priority()))
    }

    fn eviction_order(a: &ResidentEntry<I>, b: &ResidentEntry<I>) -> Ordering {
        a.tile
            .priority()
            .total_cmp(&b.tile.priority())
            .then_with(|| a.seq.cmp(&b.seq))
    }

    fn evict(&mut self, key: &PageTileIndex, effects: &mut Effects<I>) {
        if let Some(entry) = self.resident.remove(key) {
            self.stats.tiles_evicted += 1;
            effects.released.push(entry.tile.clone());
            effects.events.push(CacheEvent::Evicted(entry.tile));
        }
    }

    /// One scheduling step.
    fn advance(&mut self, effects: &mut Effects<I>) {
        if self.disposed || self.in_flight.is_some() {
            return;
        }
        let Some((best, best_priority)) = self.best_pending() else {
            return;
        };

        if self.resident.len() + 1 >= self.max_tile_count {
            match self.worst_resident() {
                Some((worst, worst_priority))
                    if best_priority.total_cmp(&worst_priority) == Ordering::Greater =>
                {
                    debug!(
                        tile = %worst,
                        priority = worst_priority,
                        "Evicting tile for higher-priority request {}",
                        best
                    );
                    self.evict(&worst, effects);
                }
                _ => {
                    trace!(
                        pending = self.pending.len(),
                        resident = self.resident.len(),
                        "Cache full, pending work outranked by resident tiles"
                    );
                    return;
                }
            }
        }

        let Some(entry) = self.pending.remove(&best) else {
            return;
        };
        debug!(tile = %best, priority = entry.request.priority, "Starting tile render");
        self.in_flight = Some(entry.request);
        effects.events.push(CacheEvent::PaintStart(entry.request));
        effects.job = Some(entry.request);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            pending: self.pending.len(),
            resident: self.resident.len(),
            in_flight: self.in_flight.is_some(),
            ..self.stats
        }
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

type ObserverList<I> = Vec<(ObserverId, Arc<dyn TileCacheObserver<I>>)>;

struct Shared<R: TileRenderer> {
    renderer: R,
    state: Mutex<CacheState<R::Image>>,
    observers: Mutex<ObserverList<R::Image>>,
    next_observer_id: AtomicU64,
    /// Signalled whenever the cache stops rendering
    settled: Notify,
    runtime: Handle,
}

impl<R: TileRenderer> Drop for Shared<R> {
    /// Last handle gone: resident tiles go back to the renderer unless
    /// `dispose` already released them.
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.disposed {
            return;
        }
        let tiles: Vec<CachedTile<R::Image>> =
            state.resident.drain().map(|(_, entry)| entry.tile).collect();
        if !tiles.is_empty() {
            debug!(released = tiles.len(), "Releasing tiles of dropped cache");
            self.renderer.release_all(tiles);
        }
    }
}

/// Bounded, priority-ordered cache of rendered tiles.
///
/// `TileCache` is a cheap handle; clones share the same cache. Renders are
/// spawned on the tokio runtime the cache was created in. Every public
/// operation except [`wait_idle`](TileCache::wait_idle) is synchronous and
/// returns without waiting for a render. Dropping the last handle without
/// calling [`dispose`](TileCache::dispose) still releases the resident tiles.
///
/// # Example
///
/// ```
/// use page_tiles::cache::{RenderRequest, TileCache, TileCacheConfig};
/// use page_tiles::render::PatternRenderer;
/// use page_tiles::tile::{PageTileIndex, TileIndex};
///
/// #[tokio::main]
/// async fn main() {
///     let cache = TileCache::new(PatternRenderer::new(64), TileCacheConfig::new(16)).unwrap();
///
///     let index = PageTileIndex::new(0, TileIndex::root(2).unwrap());
///     cache.request_tile(RenderRequest::new(index, 1.0, 5.0)).unwrap();
///
///     cache.wait_idle().await;
///     assert!(cache.has_resident(&index));
/// }
/// ```
pub struct TileCache<R: TileRenderer> {
    shared: Arc<Shared<R>>,
}

impl<R: TileRenderer> Clone for TileCache<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: TileRenderer> TileCache<R> {
    /// Create a cache that renders through `renderer`.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn new(renderer: R, config: TileCacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| CacheError::NoRuntime)?;
        Ok(Self {
            shared: Arc::new(Shared {
                renderer,
                state: Mutex::new(CacheState::new(config.max_tile_count)),
                observers: Mutex::new(Vec::new()),
                next_observer_id: AtomicU64::new(0),
                settled: Notify::new(),
                runtime,
            }),
        })
    }

    /// The renderer this cache draws tiles from.
    pub fn renderer(&self) -> &R {
        &self.shared.renderer
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Register an observer for cache events.
    pub fn add_observer(&self, observer: Arc<dyn TileCacheObserver<R::Image>>) -> ObserverId {
        let id = ObserverId(self.shared.next_observer_id.fetch_add(1, AtomicOrdering::Relaxed));
        self.lock_observers().push((id, observer));
        id
    }

    /// Unregister an observer. Returns `false` if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.lock_observers();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Request a single tile. See [`request_tiles`](Self::request_tiles).
    pub fn request_tile(&self, request: RenderRequest) -> Result<usize, CacheError> {
        self.request_tiles([request])
    }

    /// Request a batch of tiles.
    ///
    /// - A tile that is being rendered or is already resident is ignored.
    /// - A tile that is already pending keeps its single pending entry, which
    ///   takes on the new priority and scale.
    /// - Any other tile is admitted into the pending queue.
    ///
    /// Returns the number of admitted requests. Fails with
    /// [`CacheError::Disposed`] after [`dispose`](Self::dispose).
    pub fn request_tiles<I>(&self, requests: I) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = RenderRequest>,
    {
        let mut effects = Effects::default();
        let admitted_count = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            if state.disposed {
                return Err(CacheError::Disposed);
            }

            let mut admitted = Vec::new();
            for request in requests {
                if state
                    .in_flight
                    .is_some_and(|in_flight| in_flight.index == request.index)
                {
                    state.stats.requests_deduplicated += 1;
                    continue;
                }

                if let Some(entry) = state.pending.get_mut(&request.index) {
                    if entry.request.scale != request.scale {
                        debug!(
                            tile = %request.index,
                            "Pending request rescaled from {} to {}",
                            entry.request.scale,
                            request.scale
                        );
                        entry.request.scale = request.scale;
                    }
                    let old = entry.request.priority;
                    if old != request.priority {
                        entry.request.priority = request.priority;
                        effects.events.push(CacheEvent::PriorityChanged {
                            index: request.index,
                            old,
                            new: request.priority,
                        });
                    }
                    state.stats.requests_deduplicated += 1;
                    continue;
                }

                if state.resident.contains_key(&request.index) {
                    state.stats.requests_deduplicated += 1;
                    continue;
                }

                let seq = state.next_seq();
                state
                    .pending
                    .insert(request.index, PendingEntry { request, seq });
                admitted.push(request);
            }

            let count = admitted.len();
            if count > 0 {
                state.stats.requests_admitted += count as u64;
                debug!(
                    admitted = count,
                    pending = state.pending.len(),
                    "Admitted render requests"
                );
                effects.events.push(CacheEvent::RequestsAdded(admitted));
                state.advance(&mut effects);
            }
            count
        };

        self.apply(effects);
        Ok(admitted_count)
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Cancel a single pending request. See [`cancel_requests`](Self::cancel_requests).
    pub fn cancel_request(&self, request: &RenderRequest) -> Result<(), CacheError> {
        self.cancel_requests([*request])
    }

    /// Cancel a batch of pending requests.
    ///
    /// Every request must match the pending entry for its tile, including its
    /// scale. Otherwise nothing is cancelled and the call fails with
    /// [`CacheError::NotPending`] or [`CacheError::RequestMismatch`]. In-flight
    /// renders cannot be cancelled.
    pub fn cancel_requests<I>(&self, requests: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = RenderRequest>,
    {
        let requests: Vec<RenderRequest> = requests.into_iter().collect();
        let mut effects = Effects::default();
        {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            if state.disposed {
                return Err(CacheError::Disposed);
            }

            for request in &requests {
                let entry = state
                    .pending
                    .get(&request.index)
                    .ok_or(CacheError::NotPending(request.index))?;
                if entry.request.scale != request.scale {
                    return Err(CacheError::RequestMismatch {
                        index: request.index,
                        pending_scale: entry.request.scale,
                        requested_scale: request.scale,
                    });
                }
            }

            let cancelled: Vec<RenderRequest> = requests
                .iter()
                .filter_map(|request| state.pending.remove(&request.index))
                .map(|entry| entry.request)
                .collect();
            if cancelled.is_empty() {
                return Ok(());
            }

            state.stats.requests_cancelled += cancelled.len() as u64;
            debug!(
                cancelled = cancelled.len(),
                pending = state.pending.len(),
                "Cancelled render requests"
            );
            effects.events.push(CacheEvent::RequestsCancelled(cancelled));
            state.advance(&mut effects);
        }

        self.apply(effects);
        Ok(())
    }

    // =========================================================================
    // Priorities
    // =========================================================================

    /// Change the priority of a pending, in-flight or resident tile.
    ///
    /// Fires `on_priority_changed` when the value differs. Does not reschedule;
    /// call [`reevaluate_priorities`](Self::reevaluate_priorities) after a
    /// batch of changes. Returns `false` if the tile is unknown to the cache.
    pub fn set_priority(&self, index: &PageTileIndex, priority: f64) -> Result<bool, CacheError> {
        let mut effects = Effects::default();
        {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            if state.disposed {
                return Err(CacheError::Disposed);
            }

            let old = if let Some(entry) = state.pending.get_mut(index) {
                std::mem::replace(&mut entry.request.priority, priority)
            } else if let Some(entry) = state.resident.get_mut(index) {
                let old = entry.tile.priority();
                entry.tile.set_priority(priority);
                old
            } else if let Some(in_flight) = state.in_flight.as_mut().filter(|r| r.index == *index)
            {
                std::mem::replace(&mut in_flight.priority, priority)
            } else {
                return Ok(false);
            };

            if old != priority {
                effects.events.push(CacheEvent::PriorityChanged {
                    index: *index,
                    old,
                    new: priority,
                });
            }
        }

        self.apply(effects);
        Ok(true)
    }

    /// Run a scheduling step without adding or removing requests.
    ///
    /// Use after changing many priorities to reschedule once.
    pub fn reevaluate_priorities(&self) -> Result<(), CacheError> {
        let mut effects = Effects::default();
        {
            let mut state = self.lock_state();
            if state.disposed {
                return Err(CacheError::Disposed);
            }
            state.advance(&mut effects);
        }
        self.apply(effects);
        Ok(())
    }

    // =========================================================================
    // Eviction and disposal
    // =========================================================================

    /// Evict half of the resident tiles, lowest priority first.
    ///
    /// Pending requests and the in-flight job are left alone; no new render
    /// is started. Returns the number of evicted tiles.
    pub fn evict_on_memory_pressure(&self) -> usize {
        let mut effects = Effects {
            bulk_release: true,
            ..Effects::default()
        };
        {
            let mut state = self.lock_state();
            let count = state.resident.len() / 2;
            if count == 0 {
                return 0;
            }

            let mut victims: Vec<(&PageTileIndex, &ResidentEntry<R::Image>)> =
                state.resident.iter().collect();
            victims.sort_by(|(_, a), (_, b)| CacheState::eviction_order(a, b));
            let victims: Vec<PageTileIndex> =
                victims.into_iter().take(count).map(|(key, _)| *key).collect();

            for key in &victims {
                state.evict(key, &mut effects);
            }
            info!(
                evicted = count,
                resident = state.resident.len(),
                "Evicted tiles on memory pressure"
            );
        }

        let evicted = effects.released.len();
        self.apply(effects);
        evicted
    }

    /// Close the cache.
    ///
    /// Drops every observer, releases all resident tiles in one
    /// [`release_all`](TileRenderer::release_all) call and forgets pending
    /// requests. A render still in flight completes in the background; its
    /// result is released without becoming resident. Calling `dispose` again
    /// has no effect.
    pub fn dispose(&self) {
        let tiles: Vec<CachedTile<R::Image>> = {
            let mut state = self.lock_state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.pending.clear();
            state.in_flight = None;
            state.resident.drain().map(|(_, entry)| entry.tile).collect()
        };

        self.lock_observers().clear();
        info!(released = tiles.len(), "Tile cache disposed");
        if !tiles.is_empty() {
            self.shared.renderer.release_all(tiles);
        }
        self.shared.settled.notify_waiters();
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn has_pending(&self, index: &PageTileIndex) -> bool {
        self.lock_state().pending.contains_key(index)
    }

    pub fn has_resident(&self, index: &PageTileIndex) -> bool {
        self.lock_state().resident.contains_key(index)
    }

    pub fn is_in_flight(&self, index: &PageTileIndex) -> bool {
        self.lock_state()
            .in_flight
            .is_some_and(|request| request.index == *index)
    }

    /// The request currently being rendered.
    pub fn in_flight(&self) -> Option<RenderRequest> {
        self.lock_state().in_flight
    }

    /// Returns `true` while a render job is outstanding.
    pub fn is_rendering(&self) -> bool {
        self.lock_state().in_flight.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock_state().disposed
    }

    pub fn pending(&self, index: &PageTileIndex) -> Option<RenderRequest> {
        self.lock_state().pending.get(index).map(|entry| entry.request)
    }

    pub fn resident(&self, index: &PageTileIndex) -> Option<CachedTile<R::Image>> {
        self.lock_state()
            .resident
            .get(index)
            .map(|entry| entry.tile.clone())
    }

    /// All pending requests, in the order they would be scheduled.
    pub fn pending_requests(&self) -> Vec<RenderRequest> {
        let state = self.lock_state();
        let mut entries: Vec<&PendingEntry> = state.pending.values().collect();
        entries.sort_by(|a, b| {
            b.request
                .priority
                .total_cmp(&a.request.priority)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|entry| entry.request).collect()
    }

    /// All resident tiles, in the order they would be evicted.
    pub fn resident_tiles(&self) -> Vec<CachedTile<R::Image>> {
        let state = self.lock_state();
        let mut entries: Vec<&ResidentEntry<R::Image>> = state.resident.values().collect();
        entries.sort_by(|a, b| CacheState::eviction_order(a, b));
        entries.into_iter().map(|entry| entry.tile.clone()).collect()
    }

    pub fn pending_for_page(&self, page: u32) -> Vec<RenderRequest> {
        self.pending_requests()
            .into_iter()
            .filter(|request| request.index.page == page)
            .collect()
    }

    pub fn resident_for_page(&self, page: u32) -> Vec<CachedTile<R::Image>> {
        self.resident_tiles()
            .into_iter()
            .filter(|tile| tile.index().page == page)
            .collect()
    }

    /// Pending and resident counts for every page the cache knows about.
    pub fn counts_per_page(&self) -> BTreeMap<u32, PageCounts> {
        let state = self.lock_state();
        let mut counts: BTreeMap<u32, PageCounts> = BTreeMap::new();
        for key in state.pending.keys() {
            counts.entry(key.page).or_default().pending += 1;
        }
        for key in state.resident.keys() {
            counts.entry(key.page).or_default().resident += 1;
        }
        counts
    }

    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn resident_count(&self) -> usize {
        self.lock_state().resident.len()
    }

    pub fn max_tile_count(&self) -> usize {
        self.lock_state().max_tile_count
    }

    pub fn stats(&self) -> CacheStats {
        self.lock_state().snapshot()
    }

    /// Wait until no render is in flight.
    ///
    /// Because every state change runs a scheduling step, an idle cache has
    /// either drained its pending queue or is blocked on capacity.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_rendering() {
                return;
            }
            notified.await;
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn lock_state(&self) -> MutexGuard<'_, CacheState<R::Image>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_observers(&self) -> MutexGuard<'_, ObserverList<R::Image>> {
        self.shared
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Release tiles, notify observers and spawn the next render.
    fn apply(&self, effects: Effects<R::Image>) {
        let Effects {
            events,
            mut released,
            bulk_release,
            job,
            settled,
        } = effects;

        if released.len() == 1 && !bulk_release {
            if let Some(tile) = released.pop() {
                self.shared.renderer.release(tile);
            }
        } else if !released.is_empty() {
            self.shared.renderer.release_all(released);
        }

        if !events.is_empty() {
            let observers: Vec<Arc<dyn TileCacheObserver<R::Image>>> = self
                .lock_observers()
                .iter()
                .map(|(_, observer)| Arc::clone(observer))
                .collect();
            for event in &events {
                for observer in &observers {
                    event.dispatch(observer.as_ref());
                }
            }
        }

        if let Some(request) = job {
            self.spawn_render(request);
        }

        if settled {
            self.shared.settled.notify_waiters();
        }
    }

    /// Run the render in its own task so a panicking renderer surfaces as a
    /// failed render instead of leaving the in-flight slot occupied.
    fn spawn_render(&self, request: RenderRequest) {
        let cache = self.clone();
        self.shared.runtime.spawn(async move {
            let worker = cache.clone();
            let job = cache
                .shared
                .runtime
                .spawn(async move { worker.shared.renderer.render(&request).await });
            let result = job.await.unwrap_or_else(|e| {
                Err(RenderError::Failed(format!("render task failed: {}", e)))
            });
            cache.complete(request, result);
        });
    }

    /// Handle the outcome of the in-flight render.
    fn complete(&self, request: RenderRequest, result: Result<R::Image, RenderError>) {
        let mut effects = Effects::default();
        {
            let mut state = self.lock_state();
            if state.disposed {
                state.stats.results_discarded += 1;
                debug!(tile = %request.index, "Discarding render result after dispose");
                if let Ok(image) = result {
                    effects
                        .released
                        .push(CachedTile::rendered(&request, image));
                }
            } else {
                // Priority may have changed while rendering
                let request = state.in_flight.take().unwrap_or(request);
                match result {
                    Ok(image) => {
                        let tile = CachedTile::rendered(&request, image);
                        let seq = state.next_seq();
                        state.resident.insert(
                            request.index,
                            ResidentEntry {
                                tile: tile.clone(),
                                seq,
                            },
                        );
                        state.stats.tiles_rendered += 1;
                        debug!(
                            tile = %request.index,
                            resident = state.resident.len(),
                            "Tile rendered"
                        );
                        effects.events.push(CacheEvent::Painted(request, tile));
                    }
                    Err(error) => {
                        state.stats.render_failures += 1;
                        warn!(tile = %request.index, "Tile render failed: {}", error);
                        effects.events.push(CacheEvent::RenderFailed(request, error));
                    }
                }
                state.advance(&mut effects);
            }
            effects.settled = state.in_flight.is_none();
        }
        self.apply(effects);
    }
}

// =============================================================================
// Tests
// =============================================================================
