pub mod api;
pub mod color;
pub mod config;
pub mod error;
pub mod geometry;
pub mod history;
pub mod markup;
pub mod prompt;
pub mod save;
pub mod scope;
pub mod session;
pub mod store;

pub use api::{DocumentInfo, DocumentRecord, HistoryEntry, MarkupsPayload, PersistenceApi, ScopeBody};
pub use color::{escape_text, Color};
pub use config::{BackendKind, CacheConfig, EditorConfig, InkConfig, SaveConfig, ZoomConfig};
pub use error::{ApiError, MarkupError, SaveError};
pub use geometry::{
    bounds_of_points, decimate, new_id, normalize_bounds, normalize_point, Bounds, PixelPoint,
    PixelRect, Point, DEFAULT_MAX_POINTS,
};
pub use history::{History, Snapshot};
pub use markup::{
    markups_on_page, merge_page, validate_set, Markup, MarkupId, MarkupKind, MarkupType,
    DEFAULT_FONT_SIZE, DEFAULT_STROKE_WIDTH, MAX_INK_POINTS, MAX_MARKUPS, MAX_TEXT_LEN,
};
pub use prompt::{clean_answer, PromptKind, PromptRequest, QueuedPrompt, TextPrompt};
pub use save::{AutosaveDue, Debouncer, SaveSettled, SaveStatus, SaveTicket, SaveTracker};
pub use scope::{resolve_scope, LinkOption, LinkedContext, LinkedType, ScopeResolution};
pub use session::{Session, ToolMode, Zoom};
pub use store::{
    document_key, DocumentKey, FileViewStateStore, MemoryViewStateStore, ViewState, ViewStateStore,
};
