pub mod backend;
pub mod cache;
pub mod editor;
pub mod engine;
pub mod error;
pub mod layout;
#[cfg(feature = "pdf")]
pub mod pdfium;

pub use backend::{
    create_backend, CanvasBackend, CanvasEvent, EditAction, EditMenu, GestureContext,
    GestureOutcome, OverlayBackend, PendingPrompt, PointerEvent, RenderBackend, SurfaceInfo,
    ToolStyle,
};
pub use cache::{DocumentView, FallbackView, PageCache, PageDescriptor, RenderReport, RenderState};
pub use editor::{Editor, EditorDeps};
pub use engine::{EngineProvider, PageSize, RenderImage, RenderingEngine};
pub use error::RenderError;
pub use layout::{PageLayout, Viewport};
#[cfg(feature = "pdf")]
pub use pdfium::PdfiumEngineProvider;
