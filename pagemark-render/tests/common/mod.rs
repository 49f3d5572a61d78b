#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use pagemark_core::{
    document_key, ApiError, BackendKind, DocumentInfo, DocumentRecord, EditorConfig, HistoryEntry,
    LinkOption, LinkedContext, Markup, MarkupsPayload, MemoryViewStateStore, PersistenceApi,
    QueuedPrompt,
};
use pagemark_render::{
    Editor, EditorDeps, EngineProvider, PageSize, RenderImage, RenderingEngine,
};
use parking_lot::Mutex;

pub const PAGE_WIDTH: f64 = 200.0;
pub const PAGE_HEIGHT: f64 = 300.0;
pub const BASE_URL: &str = "http://pagemark.test";

/// Engine with `pages` identical pages. Measuring above `max_scale` fails.
pub struct FakeEngine {
    pub pages: usize,
    pub max_scale: f64,
}

impl FakeEngine {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            max_scale: f64::INFINITY,
        }
    }
}

#[async_trait]
impl RenderingEngine for FakeEngine {
    fn page_count(&self) -> usize {
        self.pages
    }

    async fn page_size(&self, page: usize, scale: f64) -> Result<PageSize> {
        if page >= self.pages {
            return Err(anyhow!("page {page} out of range"));
        }
        if scale > self.max_scale {
            return Err(anyhow!("engine lost"));
        }
        Ok(PageSize {
            width: PAGE_WIDTH * scale,
            height: PAGE_HEIGHT * scale,
        })
    }

    async fn render_page(&self, _page: usize, scale: f64) -> Result<RenderImage> {
        Ok(RenderImage::blank(
            (PAGE_WIDTH * scale) as u32,
            (PAGE_HEIGHT * scale) as u32,
        ))
    }
}

pub struct FakeProvider {
    pub pages: usize,
    pub max_scale: f64,
    pub broken: bool,
}

#[async_trait]
impl EngineProvider for FakeProvider {
    async fn open(&self, bytes: Vec<u8>) -> Result<Arc<dyn RenderingEngine>> {
        if self.broken || bytes.is_empty() {
            return Err(anyhow!("engine failed to initialize"));
        }
        Ok(Arc::new(FakeEngine {
            pages: self.pages,
            max_scale: self.max_scale,
        }))
    }
}

/// In-memory persistence service that validates scopes like the real one
/// and records every call.
#[derive(Default)]
pub struct FakeApi {
    pub links: Mutex<Vec<LinkOption>>,
    pub stored: Mutex<HashMap<Option<LinkedContext>, Vec<Markup>>>,
    pub versions: Mutex<Vec<(Option<LinkedContext>, Vec<Markup>)>>,
    pub puts: Mutex<Vec<MarkupsPayload>>,
    pub flattens: Mutex<Vec<Option<LinkedContext>>>,
    pub beacons: Mutex<Vec<MarkupsPayload>>,
    pub fail_puts: Mutex<Option<ApiError>>,
    pub fail_document: Mutex<Option<ApiError>>,
    pub fail_markups: Mutex<Option<ApiError>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_links(links: Vec<LinkOption>) -> Arc<Self> {
        let api = Self::default();
        *api.links.lock() = links;
        Arc::new(api)
    }

    pub fn seed(&self, scope: Option<LinkedContext>, markups: Vec<Markup>) {
        self.stored.lock().insert(scope, markups);
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().len()
    }

    pub fn last_put(&self) -> Option<MarkupsPayload> {
        self.puts.lock().last().cloned()
    }

    fn check_scope(&self, scope: Option<LinkedContext>) -> Result<(), ApiError> {
        match scope {
            None => Ok(()),
            Some(scope) if self.links.lock().iter().any(|l| l.context() == scope) => Ok(()),
            Some(scope) => Err(ApiError::ValidationRejection(format!(
                "{scope} is not linked to this document"
            ))),
        }
    }
}

#[async_trait]
impl PersistenceApi for FakeApi {
    async fn document(&self) -> Result<DocumentInfo, ApiError> {
        if let Some(err) = self.fail_document.lock().clone() {
            return Err(err);
        }
        Ok(DocumentInfo {
            document: DocumentRecord {
                id: 1,
                filename: "doc.pdf".into(),
                original_name: Some("Doc.pdf".into()),
            },
            linked: self.links.lock().clone(),
        })
    }

    async fn fetch_file(&self) -> Result<Vec<u8>, ApiError> {
        Ok(b"%PDF-1.7".to_vec())
    }

    async fn fetch_markups(&self, scope: Option<LinkedContext>) -> Result<Vec<Markup>, ApiError> {
        if let Some(err) = self.fail_markups.lock().clone() {
            return Err(err);
        }
        Ok(self.stored.lock().get(&scope).cloned().unwrap_or_default())
    }

    async fn put_markups(&self, payload: &MarkupsPayload) -> Result<(), ApiError> {
        if let Some(err) = self.fail_puts.lock().clone() {
            return Err(err);
        }
        self.check_scope(payload.scope())?;
        self.puts.lock().push(payload.clone());
        self.stored
            .lock()
            .insert(payload.scope(), payload.markups.clone());
        self.versions
            .lock()
            .push((payload.scope(), payload.markups.clone()));
        Ok(())
    }

    async fn save_document(&self, scope: Option<LinkedContext>) -> Result<(), ApiError> {
        self.check_scope(scope)?;
        self.flattens.lock().push(scope);
        Ok(())
    }

    async fn history(&self, scope: Option<LinkedContext>) -> Result<Vec<HistoryEntry>, ApiError> {
        Ok(self
            .versions
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, (s, _))| *s == scope)
            .map(|(i, (_, markups))| HistoryEntry {
                version: i as u64 + 1,
                saved_at: None,
                count: Some(markups.len()),
            })
            .collect())
    }

    async fn restore(&self, version: u64, scope: Option<LinkedContext>) -> Result<(), ApiError> {
        let versions = self.versions.lock();
        let index = version
            .checked_sub(1)
            .ok_or_else(|| ApiError::Server {
                status: 404,
                message: "version not found".into(),
            })? as usize;
        let Some((_, markups)) = versions.get(index).filter(|(s, _)| *s == scope) else {
            return Err(ApiError::Server {
                status: 404,
                message: "version not found".into(),
            });
        };
        self.stored.lock().insert(scope, markups.clone());
        Ok(())
    }

    fn send_beacon(&self, payload: MarkupsPayload) {
        self.beacons.lock().push(payload);
    }
}

pub struct Harness {
    pub api: Arc<FakeApi>,
    pub views: Arc<MemoryViewStateStore>,
    pub prompt: Arc<QueuedPrompt>,
    pub pages: usize,
    pub max_scale: f64,
    pub broken_engine: bool,
    pub backend: BackendKind,
}

impl Harness {
    pub fn new(api: Arc<FakeApi>) -> Self {
        Self {
            api,
            views: Arc::new(MemoryViewStateStore::new()),
            prompt: Arc::new(QueuedPrompt::default()),
            pages: 3,
            max_scale: f64::INFINITY,
            broken_engine: false,
            backend: BackendKind::Overlay,
        }
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn pages(mut self, pages: usize) -> Self {
        self.pages = pages;
        self
    }

    pub fn max_scale(mut self, max_scale: f64) -> Self {
        self.max_scale = max_scale;
        self
    }

    pub fn broken_engine(mut self) -> Self {
        self.broken_engine = true;
        self
    }

    pub async fn open(&self, scope: Option<LinkedContext>) -> Editor {
        let config = EditorConfig {
            backend: self.backend,
            ..EditorConfig::default()
        };
        let deps = EditorDeps {
            api: self.api.clone(),
            provider: Arc::new(FakeProvider {
                pages: self.pages,
                max_scale: self.max_scale,
                broken: self.broken_engine,
            }),
            prompt: self.prompt.clone(),
            views: self.views.clone(),
            document_key: document_key(BASE_URL, 1),
        };
        Editor::load(deps, config, 1, scope).await
    }
}

/// Field-wise comparison that tolerates float noise from pixel round trips.
pub fn assert_markups_match(actual: &[Markup], expected: &[Markup]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "markup count differs: {actual:#?} vs {expected:#?}"
    );
    for (a, e) in actual.iter().zip(expected) {
        assert!(a.approx_eq(e, 1e-9), "markup differs:\n{a:#?}\nvs\n{e:#?}");
    }
}
