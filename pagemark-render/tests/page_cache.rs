mod common;

use std::sync::Arc;

use common::{FakeEngine, PAGE_HEIGHT, PAGE_WIDTH};
use pagemark_core::{BackendKind, Bounds, CacheConfig, Color, Markup, PixelPoint, ToolMode};
use pagemark_render::{
    GestureContext, GestureOutcome, PageCache, PointerEvent, ToolStyle, Viewport,
};

async fn cache(pages: usize, config: CacheConfig, kind: BackendKind) -> PageCache {
    PageCache::build(Arc::new(FakeEngine::new(pages)), 1.0, config, kind)
        .await
        .unwrap()
}

#[tokio::test]
async fn scrolling_past_capacity_evicts_the_furthest_pages() {
    let mut cache = cache(50, CacheConfig::default(), BackendKind::Overlay).await;
    let mut markups = Vec::new();

    let report = cache.set_visible(0..15, &mut markups).await;
    assert_eq!(report.rendered, (0..15).collect::<Vec<_>>());
    assert_eq!(cache.rendered_count(), 15);

    let report = cache.set_visible(15..20, &mut markups).await;
    assert_eq!(report.rendered, (15..20).collect::<Vec<_>>());
    assert_eq!(report.evicted, vec![0, 1, 2, 3, 4]);
    assert_eq!(cache.rendered_pages(), (5..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn continuous_scroll_stays_within_capacity() {
    let mut cache = cache(50, CacheConfig::default(), BackendKind::Canvas).await;
    let mut markups = vec![Markup::highlight(
        0,
        Bounds::new(0.1, 0.1, 0.2, 0.2),
        Color::HIGHLIGHT,
    )];
    let total = cache.layout().total_height();

    let mut scroll_top = 0.0;
    while scroll_top < total {
        let report = cache
            .update_visibility(Viewport::new(scroll_top, 600.0), &mut markups)
            .await;
        assert!(report.deferred.is_empty());
        assert!(report.failed.is_empty());
        assert!(cache.rendered_count() <= cache.capacity());
        for page in cache.visible().collect::<Vec<_>>() {
            assert!(cache.page(page).unwrap().state.is_rendered(), "page {page} not rendered");
        }
        scroll_top += 150.0;
    }

    // Page 0 was evicted long ago; its markup must have survived.
    assert!(!cache.page(0).unwrap().state.is_rendered());
    assert_eq!(markups.len(), 1);
    assert!(markups[0].bounds.approx_eq(&Bounds::new(0.1, 0.1, 0.2, 0.2), 1e-9));
}

#[tokio::test]
async fn eviction_writes_back_canvas_edits() {
    let config = CacheConfig {
        capacity: 3,
        ..CacheConfig::default()
    };
    let mut cache = cache(20, config, BackendKind::Canvas).await;
    let mut markups = Vec::new();
    cache.set_visible([0], &mut markups).await;

    let style = ToolStyle::default();
    let mut scratch = Vec::new();
    let backend = cache.backend_mut(0).unwrap();
    let mut ctx = GestureContext::new(&mut scratch, &style).with_tool(ToolMode::Highlight);
    backend.handle_pointer(PointerEvent::Down(PixelPoint::new(10.0, 10.0)), &mut ctx);
    let outcome = backend.handle_pointer(PointerEvent::Up(PixelPoint::new(100.0, 100.0)), &mut ctx);
    assert_eq!(outcome, GestureOutcome::Changed);
    assert!(markups.is_empty(), "canvas keeps its own state until synced");

    for page in [10, 11, 12] {
        cache.set_visible([page], &mut markups).await;
    }
    assert!(!cache.page(0).unwrap().state.is_rendered());
    assert_eq!(markups.len(), 1);
    let expected = Bounds::new(
        10.0 / PAGE_WIDTH,
        10.0 / PAGE_HEIGHT,
        90.0 / PAGE_WIDTH,
        90.0 / PAGE_HEIGHT,
    );
    assert_eq!(markups[0].page, 0);
    assert!(markups[0].bounds.approx_eq(&expected, 1e-9));
}

#[tokio::test]
async fn full_cache_of_visible_pages_defers_the_rest() {
    let config = CacheConfig {
        capacity: 2,
        ..CacheConfig::default()
    };
    let mut cache = cache(10, config, BackendKind::Overlay).await;
    let mut markups = Vec::new();

    let report = cache.set_visible([3, 4, 5], &mut markups).await;
    assert_eq!(report.rendered, vec![3, 4]);
    assert_eq!(report.deferred, vec![5]);
    assert!(report.evicted.is_empty());
}

#[tokio::test]
async fn rescale_drops_rendered_pages_and_repaginates() {
    let mut cache = cache(4, CacheConfig::default(), BackendKind::Overlay).await;
    let mut markups = Vec::new();
    cache.set_visible(0..2, &mut markups).await;

    cache.rescale(2.0, &mut markups).await.unwrap();
    assert_eq!(cache.rendered_count(), 0);
    assert_eq!(cache.scale(), 2.0);
    assert_eq!(cache.page(0).unwrap().width, PAGE_WIDTH * 2.0);
}
