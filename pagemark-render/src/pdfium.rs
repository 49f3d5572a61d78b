use std::convert::TryFrom;
use std::fmt;
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{debug, instrument};

use crate::engine::{EngineProvider, PageSize, RenderImage, RenderingEngine};

const LIBRARY_PATH_ENV: &str = "PAGEMARK_PDFIUM_LIBRARY_PATH";

pub struct PdfiumEngineProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumEngineProvider {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pdfium: Arc::new(bind_pdfium()?),
        })
    }
}

#[async_trait]
impl EngineProvider for PdfiumEngineProvider {
    async fn open(&self, bytes: Vec<u8>) -> Result<Arc<dyn RenderingEngine>> {
        let engine = PdfiumEngine::open(Arc::clone(&self.pdfium), bytes)?;
        Ok(Arc::new(engine))
    }
}

struct PdfiumEngine {
    // Declared before `pdfium` so it is dropped first.
    document: Mutex<PdfDocument<'static>>,
    page_count: usize,
    pdfium: Arc<Pdfium>,
}

impl PdfiumEngine {
    fn open(pdfium: Arc<Pdfium>, bytes: Vec<u8>) -> Result<Self> {
        let document = pdfium
            .load_pdf_from_byte_vec(bytes, None)
            .context("failed to parse document bytes")?;
        // SAFETY: the document borrows the bindings owned by `pdfium`. Both live in
        // this struct and fields drop in declaration order, so the document is
        // released while the bindings are still alive.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        let page_count = usize::from(document.pages().len());
        Ok(Self {
            document: Mutex::new(document),
            page_count,
            pdfium,
        })
    }

    fn with_page<R, F>(&self, page: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        let index: PdfPageIndex = page
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", page))?;
        let document = self.document.lock();
        let page_ref = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page))?;
        f(&page_ref)
    }
}

#[async_trait]
impl RenderingEngine for PdfiumEngine {
    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn page_size(&self, page: usize, scale: f64) -> Result<PageSize> {
        self.with_page(page, |page_ref| {
            Ok(PageSize {
                width: f64::from(page_ref.width().value) * scale,
                height: f64::from(page_ref.height().value) * scale,
            })
        })
    }

    #[instrument(skip(self))]
    async fn render_page(&self, page: usize, scale: f64) -> Result<RenderImage> {
        self.with_page(page, |page_ref| {
            let config = PdfRenderConfig::new().scale_page_by_factor((scale as f32).max(0.1));
            let bitmap = page_ref
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", page))?;
            let image = bitmap.as_image().to_rgba8();
            Ok(RenderImage {
                width: u32::try_from(bitmap.width()).unwrap_or_default(),
                height: u32::try_from(bitmap.height()).unwrap_or_default(),
                pixels: image.into_raw(),
            })
        })
    }
}

/// Where a Pdfium library may come from, in the order they are tried.
enum LibrarySource {
    Env(PathBuf),
    WorkingDir(PathBuf),
    System,
}

impl LibrarySource {
    fn candidates() -> Vec<LibrarySource> {
        let mut sources = Vec::with_capacity(3);
        if let Some(path) = std::env::var_os(LIBRARY_PATH_ENV).filter(|p| !p.is_empty()) {
            sources.push(LibrarySource::Env(PathBuf::from(path)));
        }
        sources.push(LibrarySource::WorkingDir(
            Pdfium::pdfium_platform_library_name_at_path("./"),
        ));
        sources.push(LibrarySource::System);
        sources
    }

    fn bind(&self) -> Result<Box<dyn PdfiumLibraryBindings>, PdfiumError> {
        match self {
            LibrarySource::Env(path) | LibrarySource::WorkingDir(path) => {
                Pdfium::bind_to_library(path)
            }
            LibrarySource::System => Pdfium::bind_to_system_library(),
        }
    }
}

impl fmt::Display for LibrarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibrarySource::Env(path) => write!(f, "{LIBRARY_PATH_ENV}={}", path.display()),
            LibrarySource::WorkingDir(path) => write!(f, "{}", path.display()),
            LibrarySource::System => f.write_str("system library"),
        }
    }
}

fn bind_pdfium() -> Result<Pdfium> {
    let mut failures = Vec::new();
    for source in LibrarySource::candidates() {
        match source.bind() {
            Ok(bindings) => {
                debug!(%source, "pdfium bound");
                return Ok(Pdfium::new(bindings));
            }
            Err(err) => {
                debug!(%source, %err, "pdfium not available");
                failures.push(format!("{source}: {err}"));
            }
        }
    }
    Err(anyhow!(
        "no usable pdfium library found; set {LIBRARY_PATH_ENV} or install pdfium ({})",
        failures.join("; ")
    ))
}
