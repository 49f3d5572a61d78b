//! Page virtualization cache.
//!
//! Every page gets a descriptor as soon as the document is paginated, but
//! only pages near the viewport hold a raster and a backend. At most
//! `capacity` pages are rendered at any time; when a newly visible page
//! needs a slot, the rendered page furthest from the visible span is torn
//! down after its markups are written back into the canonical sequence.

use std::collections::BTreeSet;
use std::sync::Arc;

use pagemark_core::{markups_on_page, merge_page, BackendKind, CacheConfig, Markup};
use tracing::{debug, instrument, warn};

use crate::backend::{create_backend, RenderBackend, SurfaceInfo};
use crate::engine::{PageSize, RenderImage, RenderingEngine};
use crate::error::RenderError;
use crate::layout::{PageLayout, Viewport};

/// A rendered page's raster plus the one backend drawing over it.
pub struct PageSurface {
    pub raster: RenderImage,
    pub backend: Box<dyn RenderBackend>,
}

pub enum RenderState {
    Placeholder,
    Rendered(PageSurface),
}

impl RenderState {
    pub fn is_rendered(&self) -> bool {
        matches!(self, RenderState::Rendered(_))
    }
}

pub struct PageDescriptor {
    pub index: usize,
    pub width: f64,
    pub height: f64,
    pub state: RenderState,
}

impl PageDescriptor {
    fn placeholder(index: usize, size: PageSize) -> Self {
        Self {
            index,
            width: size.width,
            height: size.height,
            state: RenderState::Placeholder,
        }
    }

    pub fn surface_info(&self, scale: f64) -> SurfaceInfo {
        SurfaceInfo {
            page: self.index,
            width: self.width,
            height: self.height,
            scale,
        }
    }
}

/// What one visibility update did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderReport {
    pub rendered: Vec<usize>,
    pub evicted: Vec<usize>,
    pub failed: Vec<usize>,
    /// Visible pages left as placeholders because no rendered page could be
    /// evicted.
    pub deferred: Vec<usize>,
}

pub struct PageCache {
    engine: Arc<dyn RenderingEngine>,
    pages: Vec<PageDescriptor>,
    layout: PageLayout,
    config: CacheConfig,
    scale: f64,
    backend_kind: BackendKind,
    visible: BTreeSet<usize>,
    observing: bool,
}

impl PageCache {
    /// Paginates the document at `scale`. Sizes are requested one page at a
    /// time and visibility is only observed once all of them are known.
    #[instrument(skip(engine, config))]
    pub async fn build(
        engine: Arc<dyn RenderingEngine>,
        scale: f64,
        config: CacheConfig,
        backend_kind: BackendKind,
    ) -> Result<Self, RenderError> {
        let mut cache = Self {
            engine,
            pages: Vec::new(),
            layout: PageLayout::default(),
            config,
            scale,
            backend_kind,
            visible: BTreeSet::new(),
            observing: false,
        };
        let sizes = cache.measure(scale).await?;
        cache.paginate(sizes);
        Ok(cache)
    }

    async fn measure(&self, scale: f64) -> Result<Vec<PageSize>, RenderError> {
        let count = self.engine.page_count();
        let mut sizes = Vec::with_capacity(count);
        for page in 0..count {
            let size = self
                .engine
                .page_size(page, scale)
                .await
                .map_err(RenderError::Dependency)?;
            sizes.push(size);
        }
        Ok(sizes)
    }

    fn paginate(&mut self, sizes: Vec<PageSize>) {
        let count = sizes.len();
        self.layout = PageLayout::new(&sizes, self.config.page_gap_px);
        self.pages = sizes
            .into_iter()
            .enumerate()
            .map(|(index, size)| PageDescriptor::placeholder(index, size))
            .collect();
        self.visible.clear();
        self.observing = true;
        debug!(pages = count, scale = self.scale, "document paginated");
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[PageDescriptor] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> Option<&PageDescriptor> {
        self.pages.get(index)
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend_kind
    }

    pub fn is_observing(&self) -> bool {
        self.observing
    }

    pub fn visible(&self) -> impl Iterator<Item = usize> + '_ {
        self.visible.iter().copied()
    }

    pub fn rendered_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|page| page.state.is_rendered())
            .map(|page| page.index)
            .collect()
    }

    pub fn rendered_count(&self) -> usize {
        self.pages.iter().filter(|p| p.state.is_rendered()).count()
    }

    pub fn raster(&self, page: usize) -> Option<&RenderImage> {
        match &self.pages.get(page)?.state {
            RenderState::Rendered(surface) => Some(&surface.raster),
            RenderState::Placeholder => None,
        }
    }

    pub fn backend(&self, page: usize) -> Option<&dyn RenderBackend> {
        match &self.pages.get(page)?.state {
            RenderState::Rendered(surface) => Some(surface.backend.as_ref()),
            RenderState::Placeholder => None,
        }
    }

    pub fn backend_mut(&mut self, page: usize) -> Option<&mut (dyn RenderBackend + 'static)> {
        match &mut self.pages.get_mut(page)?.state {
            RenderState::Rendered(surface) => Some(surface.backend.as_mut()),
            RenderState::Placeholder => None,
        }
    }

    /// Visibility report from a scroll position.
    pub async fn update_visibility(
        &mut self,
        viewport: Viewport,
        markups: &mut Vec<Markup>,
    ) -> RenderReport {
        let visible = self
            .layout
            .intersecting(viewport, self.config.lookahead_px);
        self.set_visible(visible, markups).await
    }

    /// Replaces the visible set and renders every visible placeholder,
    /// evicting as needed to stay within capacity.
    pub async fn set_visible<I>(&mut self, visible: I, markups: &mut Vec<Markup>) -> RenderReport
    where
        I: IntoIterator<Item = usize>,
    {
        let mut report = RenderReport::default();
        if !self.observing {
            return report;
        }
        self.visible = visible
            .into_iter()
            .filter(|page| *page < self.pages.len())
            .collect();

        let wanted: Vec<usize> = self
            .visible
            .iter()
            .copied()
            .filter(|page| !self.pages[*page].state.is_rendered())
            .collect();
        for page in wanted {
            if self.rendered_count() >= self.config.capacity {
                match self.eviction_candidate() {
                    Some(victim) => {
                        self.evict(victim, markups);
                        report.evicted.push(victim);
                    }
                    None => {
                        debug!(page, "cache full of visible pages; deferring render");
                        report.deferred.push(page);
                        continue;
                    }
                }
            }
            match self.render_page(page, markups).await {
                Ok(()) => report.rendered.push(page),
                Err(err) => {
                    warn!(%err, "page left as placeholder");
                    report.failed.push(page);
                }
            }
        }
        report
    }

    /// Rendered page outside the visible set with the greatest distance from
    /// the visible span. Ties go to the lowest index.
    fn eviction_candidate(&self) -> Option<usize> {
        let lo = *self.visible.first()?;
        let hi = *self.visible.last()?;
        let distance = |page: usize| {
            if page < lo {
                lo - page
            } else {
                page.saturating_sub(hi)
            }
        };
        let mut best: Option<(usize, usize)> = None;
        for page in self.pages.iter().filter(|p| p.state.is_rendered()) {
            if self.visible.contains(&page.index) {
                continue;
            }
            let d = distance(page.index);
            if best.map_or(true, |(_, best_d)| d > best_d) {
                best = Some((page.index, d));
            }
        }
        best.map(|(page, _)| page)
    }

    fn evict(&mut self, page: usize, markups: &mut Vec<Markup>) {
        let Some(descriptor) = self.pages.get_mut(page) else {
            return;
        };
        if let RenderState::Rendered(mut surface) =
            std::mem::replace(&mut descriptor.state, RenderState::Placeholder)
        {
            let serialized = surface.backend.serialize_to_model(markups);
            merge_page(markups, page, serialized);
            surface.backend.dispose();
            debug!(page, "page evicted");
        }
    }

    #[instrument(skip(self, markups))]
    async fn render_page(&mut self, page: usize, markups: &[Markup]) -> Result<(), RenderError> {
        let descriptor = self.pages.get(page).ok_or(RenderError::NoSuchPage(page))?;
        let info = descriptor.surface_info(self.scale);
        let raster = self
            .engine
            .render_page(page, self.scale)
            .await
            .map_err(|cause| RenderError::Page { page, cause })?;
        let mut backend = create_backend(self.backend_kind);
        backend.attach(info);
        backend.render_from_model(&markups_on_page(markups, page));
        if let Some(descriptor) = self.pages.get_mut(page) {
            descriptor.state = RenderState::Rendered(PageSurface { raster, backend });
        }
        debug!(page, "page rendered");
        Ok(())
    }

    /// Writes every rendered page's backend state into `markups`. Runs
    /// without yielding so the result never mixes states across pages.
    pub fn sync_all(&self, markups: &mut Vec<Markup>) {
        for descriptor in &self.pages {
            if let RenderState::Rendered(surface) = &descriptor.state {
                let serialized = surface.backend.serialize_to_model(markups);
                merge_page(markups, descriptor.index, serialized);
            }
        }
    }

    pub fn sync_page(&self, page: usize, markups: &mut Vec<Markup>) {
        if let Some(backend) = self.backend(page) {
            let serialized = backend.serialize_to_model(markups);
            merge_page(markups, page, serialized);
        }
    }

    /// Redraws every rendered page from `markups`.
    pub fn rerender_all(&mut self, markups: &[Markup]) {
        for descriptor in &mut self.pages {
            if let RenderState::Rendered(surface) = &mut descriptor.state {
                surface
                    .backend
                    .render_from_model(&markups_on_page(markups, descriptor.index));
            }
        }
    }

    fn dispose_all(&mut self, markups: &mut Vec<Markup>) {
        for page in self.rendered_pages() {
            self.evict(page, markups);
        }
    }

    /// Rebuilds the whole structure at a new scale. Every page is measured
    /// before anything is disposed, so a failure leaves the cache untouched.
    pub async fn rescale(&mut self, scale: f64, markups: &mut Vec<Markup>) -> Result<(), RenderError> {
        let sizes = self.measure(scale).await?;
        self.observing = false;
        self.dispose_all(markups);
        self.scale = scale;
        self.paginate(sizes);
        Ok(())
    }

    /// Moves every rendered page to a backend of `kind`, serializing the
    /// outgoing backend first so nothing is lost.
    pub fn swap_backend(&mut self, kind: BackendKind, markups: &mut Vec<Markup>) {
        if kind == self.backend_kind {
            return;
        }
        self.sync_all(markups);
        for descriptor in &mut self.pages {
            let info = descriptor.surface_info(self.scale);
            if let RenderState::Rendered(surface) = &mut descriptor.state {
                surface.backend.dispose();
                let mut backend = create_backend(kind);
                backend.attach(info);
                backend.render_from_model(&markups_on_page(markups, descriptor.index));
                surface.backend = backend;
            }
        }
        debug!(?kind, "render backend swapped");
        self.backend_kind = kind;
    }
}

/// Read-only presentation used when the rendering engine is unavailable.
#[derive(Debug, Clone)]
pub struct FallbackView {
    pub bytes: Vec<u8>,
    pub reason: String,
}

pub enum DocumentView {
    Interactive(PageCache),
    Fallback(FallbackView),
}

impl DocumentView {
    pub fn cache(&self) -> Option<&PageCache> {
        match self {
            DocumentView::Interactive(cache) => Some(cache),
            DocumentView::Fallback(_) => None,
        }
    }

    pub fn cache_mut(&mut self) -> Option<&mut PageCache> {
        match self {
            DocumentView::Interactive(cache) => Some(cache),
            DocumentView::Fallback(_) => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, DocumentView::Fallback(_))
    }
}
