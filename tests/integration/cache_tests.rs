//! Tile cache integration tests.
//!
//! Tests verify:
//! - Eviction only makes room for strictly higher-priority work
//! - At most one render is in flight at any time
//! - Render failures and late results after dispose are handled cleanly
//! - Every rendered image is released exactly once
//! - Structural invariants hold after every settled step

use std::sync::{Arc, Mutex};

use page_tiles::cache::{CachedTile, RenderRequest, TileCache, TileCacheConfig, TileCacheObserver};
use page_tiles::error::{CacheError, RenderError};
use page_tiles::priority::{plan_requests, Focus, PriorityConfig};
use page_tiles::render::PatternRenderer;
use page_tiles::tile::{PageTileIndex, Rect, TileHierarchy};

use super::test_utils::{
    assert_invariants, page, request, settle, tile, Event, GatedRenderer, RecordingObserver,
    TestImage,
};

fn gated_cache(capacity: usize) -> (TileCache<GatedRenderer>, Arc<RecordingObserver>) {
    let cache = TileCache::new(GatedRenderer::gated(), TileCacheConfig::new(capacity)).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    cache.add_observer(observer.clone());
    (cache, observer)
}

/// Request `index` and complete its render.
async fn make_resident(cache: &TileCache<GatedRenderer>, index: PageTileIndex, priority: f64) {
    assert_eq!(cache.request_tile(request(index, priority)).unwrap(), 1);
    let rendered = cache.renderer().finish_ok().await;
    assert_eq!(rendered.index, index);
    assert!(cache.has_resident(&index));
}

fn resident_priorities(cache: &TileCache<GatedRenderer>) -> Vec<f64> {
    cache
        .resident_tiles()
        .iter()
        .map(|tile| tile.priority())
        .collect()
}

// =============================================================================
// Eviction
// =============================================================================

#[tokio::test]
async fn test_higher_priority_request_evicts_lowest_resident() {
    let (cache, observer) = gated_cache(4);
    make_resident(&cache, page(1), 1.0).await;
    make_resident(&cache, page(5), 5.0).await;
    make_resident(&cache, page(9), 9.0).await;
    assert_eq!(resident_priorities(&cache), vec![1.0, 5.0, 9.0]);

    cache.request_tile(request(page(10), 10.0)).unwrap();

    assert_eq!(observer.evicted(), vec![page(1)]);
    assert_eq!(cache.renderer().released(), vec![page(1)]);
    assert!(cache.is_in_flight(&page(10)));
    assert_invariants(&cache);

    cache.renderer().finish_ok().await;
    assert_eq!(resident_priorities(&cache), vec![5.0, 9.0, 10.0]);
    assert_invariants(&cache);
}

#[tokio::test]
async fn test_lower_priority_request_waits_when_full() {
    let (cache, observer) = gated_cache(3);
    make_resident(&cache, page(5), 5.0).await;
    make_resident(&cache, page(9), 9.0).await;

    cache.request_tile(request(page(3), 3.0)).unwrap();
    settle().await;

    assert!(cache.has_pending(&page(3)));
    assert!(!cache.is_rendering());
    assert!(observer.evicted().is_empty());
    assert_eq!(cache.renderer().started_count(), 2);

    // A request that outranks the weakest resident tile gets through
    cache.request_tile(request(page(20), 20.0)).unwrap();
    assert_eq!(observer.evicted(), vec![page(5)]);
    assert!(cache.is_in_flight(&page(20)));
    cache.renderer().finish_ok().await;

    // The low-priority request is still outranked afterwards
    assert!(cache.has_pending(&page(3)));
    assert!(!cache.is_rendering());
    assert_eq!(resident_priorities(&cache), vec![9.0, 20.0]);
    assert_invariants(&cache);
}

#[tokio::test]
async fn test_equal_priority_does_not_evict() {
    let (cache, observer) = gated_cache(3);
    make_resident(&cache, page(1), 5.0).await;
    make_resident(&cache, page(2), 5.0).await;

    cache.request_tile(request(page(3), 5.0)).unwrap();
    settle().await;

    assert!(cache.has_pending(&page(3)));
    assert!(observer.evicted().is_empty());
}

#[tokio::test]
async fn test_raising_pending_priority_unblocks_it() {
    let (cache, observer) = gated_cache(3);
    make_resident(&cache, page(5), 5.0).await;
    make_resident(&cache, page(9), 9.0).await;
    cache.request_tile(request(page(3), 3.0)).unwrap();
    settle().await;
    assert!(cache.has_pending(&page(3)));

    assert!(cache.set_priority(&page(3), 7.0).unwrap());
    // set_priority alone does not reschedule
    assert!(!cache.is_rendering());

    cache.reevaluate_priorities().unwrap();
    assert_eq!(observer.evicted(), vec![page(5)]);
    assert!(cache.is_in_flight(&page(3)));
}

#[tokio::test]
async fn test_lowering_resident_priority_makes_it_the_victim() {
    let (cache, observer) = gated_cache(3);
    make_resident(&cache, page(1), 5.0).await;
    make_resident(&cache, page(2), 9.0).await;

    cache.set_priority(&page(2), 0.5).unwrap();
    cache.request_tile(request(page(3), 4.0)).unwrap();

    assert_eq!(observer.evicted(), vec![page(2)]);
    assert!(cache.is_in_flight(&page(3)));
}

// =============================================================================
// Scheduling
// =============================================================================

#[tokio::test]
async fn test_single_flight_and_priority_order() {
    let (cache, observer) = gated_cache(16);
    let batch = vec![
        request(page(0), 1.0),
        request(page(1), 4.0),
        request(page(2), 2.0),
        request(page(3), 4.0),
        request(page(4), 3.0),
    ];
    assert_eq!(cache.request_tiles(batch).unwrap(), 5);

    let mut order = Vec::new();
    while cache.is_rendering() {
        settle().await;
        assert_eq!(cache.renderer().waiting_count(), 1);
        order.push(cache.renderer().finish_ok().await.index);
        assert_invariants(&cache);
    }

    // Ties go to the request admitted first
    assert_eq!(order, vec![page(1), page(3), page(4), page(2), page(0)]);
    assert_eq!(observer.painted(), order);
    assert_eq!(cache.renderer().started_count(), 5);
}

#[tokio::test]
async fn test_in_flight_priority_change_carries_into_resident_tile() {
    let (cache, observer) = gated_cache(8);
    cache.request_tile(request(page(0), 1.0)).unwrap();
    assert!(cache.is_in_flight(&page(0)));

    assert!(cache.set_priority(&page(0), 42.0).unwrap());
    cache.renderer().finish_ok().await;

    assert_eq!(cache.resident(&page(0)).unwrap().priority(), 42.0);
    assert!(observer
        .events()
        .contains(&Event::PriorityChanged(page(0), 1.0, 42.0)));
}

#[tokio::test]
async fn test_requests_for_known_tiles_are_ignored() {
    let (cache, _observer) = gated_cache(8);
    make_resident(&cache, page(0), 1.0).await;
    cache.request_tile(request(page(1), 1.0)).unwrap();
    assert!(cache.is_in_flight(&page(1)));

    // Resident, in flight, and duplicated inside one batch
    let admitted = cache
        .request_tiles(vec![
            request(page(0), 9.0),
            request(page(1), 9.0),
            request(page(2), 3.0),
            request(page(2), 6.0),
        ])
        .unwrap();

    assert_eq!(admitted, 1);
    assert_eq!(cache.pending(&page(2)).unwrap().priority, 6.0);
    assert_eq!(cache.resident(&page(0)).unwrap().priority(), 1.0);
    assert_eq!(cache.stats().requests_deduplicated, 3);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_pending_but_not_in_flight() {
    let (cache, observer) = gated_cache(8);
    cache
        .request_tiles(vec![request(page(0), 9.0), request(page(1), 1.0)])
        .unwrap();
    assert!(cache.is_in_flight(&page(0)));

    assert_eq!(
        cache.cancel_request(&request(page(0), 9.0)),
        Err(CacheError::NotPending(page(0)))
    );
    assert!(matches!(
        cache.cancel_request(&RenderRequest::new(page(1), 2.0, 1.0)),
        Err(CacheError::RequestMismatch { .. })
    ));

    cache.cancel_request(&request(page(1), 1.0)).unwrap();
    assert!(!cache.has_pending(&page(1)));
    assert!(observer
        .events()
        .contains(&Event::Cancelled(vec![page(1)])));

    cache.renderer().finish_ok().await;
    assert!(!cache.is_rendering());
    assert_eq!(cache.renderer().started_count(), 1);
}

// =============================================================================
// Failures and disposal
// =============================================================================

#[tokio::test]
async fn test_render_failure_keeps_draining() {
    let (cache, observer) = gated_cache(8);
    cache
        .request_tiles(vec![request(page(0), 9.0), request(page(1), 1.0)])
        .unwrap();

    let failed = cache
        .renderer()
        .finish(Err(RenderError::Failed("boom".to_string())))
        .await;
    assert_eq!(failed.index, page(0));
    assert_eq!(observer.failed(), vec![page(0)]);
    assert!(!cache.has_pending(&page(0)));
    assert!(!cache.has_resident(&page(0)));

    // Queue keeps draining after the failure
    assert!(cache.is_in_flight(&page(1)));
    cache.renderer().finish_ok().await;
    assert!(cache.has_resident(&page(1)));

    // The failed tile can be requested again
    assert_eq!(cache.request_tile(request(page(0), 9.0)).unwrap(), 1);
    cache.renderer().finish_ok().await;
    assert!(cache.has_resident(&page(0)));

    let stats = cache.stats();
    assert_eq!(stats.render_failures, 1);
    assert_eq!(stats.tiles_rendered, 2);
}

#[tokio::test]
async fn test_late_result_after_dispose_is_released() {
    let (cache, observer) = gated_cache(8);
    make_resident(&cache, page(0), 1.0).await;
    cache
        .request_tiles(vec![request(page(1), 5.0), request(page(2), 1.0)])
        .unwrap();
    assert!(cache.is_in_flight(&page(1)));

    cache.dispose();
    assert!(cache.is_disposed());
    assert_eq!(cache.resident_count(), 0);
    assert_eq!(cache.pending_count(), 0);
    assert_eq!(cache.renderer().bulk_calls(), 1);

    // The render started before dispose still completes
    cache.renderer().finish_ok().await;
    assert_eq!(cache.resident_count(), 0);
    assert_eq!(cache.stats().results_discarded, 1);
    assert_eq!(cache.renderer().live_images(), 0);
    assert_eq!(cache.renderer().released(), vec![page(0), page(1)]);

    // Observers were dropped on dispose
    assert!(!observer.painted().contains(&page(1)));

    assert_eq!(
        cache.request_tile(request(page(3), 1.0)),
        Err(CacheError::Disposed)
    );
    cache.dispose();
    assert_eq!(cache.renderer().bulk_calls(), 1);
}

#[tokio::test]
async fn test_memory_pressure_releases_lowest_half_in_one_batch() {
    let (cache, observer) = gated_cache(8);
    for (p, priority) in [(0, 4.0), (1, 1.0), (2, 3.0), (3, 2.0), (4, 5.0)] {
        make_resident(&cache, page(p), priority).await;
    }

    assert_eq!(cache.evict_on_memory_pressure(), 2);
    assert_eq!(observer.evicted(), vec![page(1), page(3)]);
    assert_eq!(cache.renderer().bulk_calls(), 1);
    assert_eq!(resident_priorities(&cache), vec![3.0, 4.0, 5.0]);

    assert_eq!(cache.evict_on_memory_pressure(), 1);
    assert_eq!(cache.evict_on_memory_pressure(), 1);
    assert_eq!(cache.evict_on_memory_pressure(), 0);
    assert_eq!(cache.resident_count(), 1);
}

// =============================================================================
// End-to-end
// =============================================================================

/// Deterministic pseudo-random sequence.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u32) -> u32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) % u64::from(bound)) as u32
    }
}

#[tokio::test]
async fn test_invariants_hold_under_mixed_operations() {
    let cache = TileCache::new(GatedRenderer::open(), TileCacheConfig::new(5)).unwrap();
    let mut rng = Lcg(7);

    for _ in 0..300 {
        match rng.next(5) {
            0 | 1 => {
                let index = tile(rng.next(4), rng.next(2), rng.next(2), 1);
                cache
                    .request_tile(request(index, f64::from(rng.next(100))))
                    .unwrap();
            }
            2 => {
                if let Some(pending) = cache.pending_requests().first().copied() {
                    cache.cancel_request(&pending).unwrap();
                }
            }
            3 => {
                let index = tile(rng.next(4), rng.next(2), rng.next(2), 1);
                cache
                    .set_priority(&index, f64::from(rng.next(100)))
                    .unwrap();
                cache.reevaluate_priorities().unwrap();
            }
            _ => {
                cache.evict_on_memory_pressure();
            }
        }
        assert_invariants(&cache);
        cache.wait_idle().await;
        assert_invariants(&cache);
        assert!(cache.resident_count() < cache.max_tile_count());
    }

    let live_before = cache.renderer().live_images();
    assert_eq!(live_before, cache.resident_count());
    cache.dispose();
    assert_eq!(cache.renderer().live_images(), 0);

    // Every rendered image was released exactly once
    assert_eq!(
        cache.renderer().released().len(),
        cache.renderer().started_count()
    );
}

#[tokio::test]
async fn test_pattern_renderer_viewport_flow() {
    let hierarchy = TileHierarchy::new(3, 2).unwrap();
    let cache = TileCache::new(PatternRenderer::new(32), TileCacheConfig::new(6)).unwrap();
    let config = PriorityConfig::default();

    for focus_page in 0..4 {
        let focus = Focus {
            page: focus_page,
            region: Rect::new(0.0, 0.0, 1.0, 0.5),
            target_level: 1,
            scale: 1.0,
        };
        let wanted = plan_requests(&config, &focus, &hierarchy, focus_page..focus_page + 2);
        cache.request_tiles(wanted).unwrap();
        for resident in cache.resident_tiles() {
            let index = resident.index();
            let priority = page_tiles::priority::tile_priority(&config, &focus, &index);
            cache.set_priority(&index, priority).unwrap();
        }
        cache.reevaluate_priorities().unwrap();
        cache.wait_idle().await;
        assert_invariants(&cache);

        // Visible tiles of the focus page are always resident once idle
        assert!(cache.has_resident(&tile(focus_page, 0, 0, 1)));
        assert!(cache.has_resident(&tile(focus_page, 0, 1, 1)));
    }

    let counts = cache.counts_per_page();
    assert_eq!(
        counts.values().map(|c| c.resident).sum::<usize>(),
        cache.resident_count()
    );

    let resident = cache.resident_count();
    assert_eq!(cache.renderer().live_images(), resident);
    cache.dispose();
    assert_eq!(cache.renderer().live_images(), 0);
    assert_eq!(
        cache.renderer().released_count(),
        cache.renderer().rendered_count()
    );
}

// =============================================================================
// Re-entrant observers
// =============================================================================

/// Requests the next page every time a tile is painted, up to `last_page`.
struct ChainingObserver {
    cache: Mutex<Option<TileCache<GatedRenderer>>>,
    last_page: u32,
}

impl TileCacheObserver<TestImage> for ChainingObserver {
    fn on_tile_painted(&self, painted: &RenderRequest, _tile: &CachedTile<TestImage>) {
        let next = painted.index.page + 1;
        if next > self.last_page {
            return;
        }
        let cache = self.cache.lock().unwrap().clone();
        if let Some(cache) = cache {
            assert_eq!(cache.request_tile(request(page(next), 1.0)).unwrap(), 1);
            assert_invariants(&cache);
        }
    }
}

#[tokio::test]
async fn test_observer_can_request_tiles_from_callback() {
    let (cache, recorder) = gated_cache(8);
    let chaining = Arc::new(ChainingObserver {
        cache: Mutex::new(Some(cache.clone())),
        last_page: 2,
    });
    cache.add_observer(chaining.clone());

    cache.request_tile(request(page(0), 1.0)).unwrap();
    for expected in 0..3 {
        let rendered = cache.renderer().finish_ok().await;
        assert_eq!(rendered.index, page(expected));
    }

    assert!(!cache.is_rendering());
    assert_eq!(cache.pending_count(), 0);
    for index in 0..3 {
        assert!(cache.has_resident(&page(index)));
    }
    assert_eq!(recorder.painted(), vec![page(0), page(1), page(2)]);
    assert_invariants(&cache);

    // The observer holds a handle; break the cycle so the cache can drop
    chaining.cache.lock().unwrap().take();
}
