//! The render backend contract and the two interchangeable implementations.
//!
//! A backend is attached to exactly one rendered page. It draws that page's
//! markups, turns pointer gestures into markup changes, and can always be
//! asked for the page's markups in canonical, normalized form. The editor
//! never branches on which backend is active; it only talks to this trait.

use pagemark_core::{
    BackendKind, Bounds, Color, Markup, MarkupKind, MarkupType, PixelPoint, PixelRect, PromptKind,
    ToolMode, DEFAULT_FONT_SIZE, DEFAULT_MAX_POINTS, DEFAULT_STROKE_WIDTH,
};

mod canvas;
mod overlay;

pub use canvas::{
    CanvasBackend, CanvasEvent, CanvasObject, ObjectHandle, ObjectTag, PathCommand, Shape, Transform,
};
pub use overlay::{DisplayItem, OverlayBackend};

/// Drags shorter than this, in pixels, count as clicks.
pub const MIN_DRAG_PX: f64 = 3.0;
/// Side of a comment marker at scale 1.
pub const COMMENT_MARKER_PX: f64 = 24.0;

/// The page surface a backend draws over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceInfo {
    pub page: usize,
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

impl SurfaceInfo {
    pub fn normalize(&self, rect: PixelRect) -> Bounds {
        rect.normalize(self.width, self.height).clamped()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down(PixelPoint),
    Move(PixelPoint),
    Up(PixelPoint),
}

/// Styling applied to newly created markups.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolStyle {
    pub highlight_color: Color,
    pub ink_color: Color,
    pub stroke_width: f64,
    pub text_color: Color,
    pub font_size: f64,
}

impl Default for ToolStyle {
    fn default() -> Self {
        Self {
            highlight_color: Color::HIGHLIGHT,
            ink_color: Color::BLACK,
            stroke_width: DEFAULT_STROKE_WIDTH,
            text_color: Color::BLACK,
            font_size: DEFAULT_FONT_SIZE,
        }
    }
}

/// Everything a gesture may read or write besides the backend itself.
pub struct GestureContext<'a> {
    pub tool: ToolMode,
    pub edit_mode: bool,
    pub markups: &'a mut Vec<Markup>,
    pub style: &'a ToolStyle,
    pub max_points: usize,
}

impl<'a> GestureContext<'a> {
    pub fn new(markups: &'a mut Vec<Markup>, style: &'a ToolStyle) -> Self {
        Self {
            tool: ToolMode::None,
            edit_mode: true,
            markups,
            style,
            max_points: DEFAULT_MAX_POINTS,
        }
    }

    pub fn with_tool(mut self, tool: ToolMode) -> Self {
        self.tool = tool;
        self
    }
}

/// A click that needs text from the user before a markup can be created.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPrompt {
    pub page: usize,
    pub kind: PromptKind,
    pub anchor: PixelPoint,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GestureOutcome {
    Idle,
    /// The page's markups changed and must be synced into the session.
    Changed,
    Prompt(PendingPrompt),
    Selected(EditMenu),
    SelectionCleared,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditAction {
    SetFontSize(f64),
    SetColor(Color),
    Delete,
}

/// Contextual edit menu for one selected markup. `None` fields are not
/// editable for that markup type.
#[derive(Debug, Clone, PartialEq)]
pub struct EditMenu {
    pub markup_id: String,
    pub markup_type: MarkupType,
    pub font_size: Option<f64>,
    pub color: Option<Color>,
}

impl EditMenu {
    pub fn for_markup(markup: &Markup) -> Self {
        let font_size = match &markup.kind {
            MarkupKind::Text { font_size, .. } => Some(*font_size),
            _ => None,
        };
        Self {
            markup_id: markup.id.clone(),
            markup_type: markup.markup_type(),
            font_size,
            color: markup.kind.color(),
        }
    }

    pub fn allows(&self, action: &EditAction) -> bool {
        match action {
            EditAction::SetFontSize(size) => self.font_size.is_some() && size.is_finite() && *size > 0.0,
            EditAction::SetColor(_) => self.color.is_some(),
            EditAction::Delete => true,
        }
    }
}

/// Applies an edit action to a canonical record. Returns `false` when the
/// action does not apply to the record's type. Deletion is handled by the
/// caller since it removes the record.
pub fn edit_markup(markup: &mut Markup, action: &EditAction) -> bool {
    match (&mut markup.kind, action) {
        (MarkupKind::Text { font_size, .. }, EditAction::SetFontSize(size))
            if size.is_finite() && *size > 0.0 =>
        {
            *font_size = *size;
            true
        }
        (
            MarkupKind::Highlight { color }
            | MarkupKind::Ink { color, .. }
            | MarkupKind::Text { color, .. },
            EditAction::SetColor(next),
        ) => {
            *color = *next;
            true
        }
        _ => false,
    }
}

pub trait RenderBackend: Send {
    fn kind(&self) -> BackendKind;

    fn attach(&mut self, surface: SurfaceInfo);

    fn surface(&self) -> Option<SurfaceInfo>;

    /// Replaces whatever is drawn with `markups`, which all belong to the
    /// attached page.
    fn render_from_model(&mut self, markups: &[Markup]);

    /// The attached page's markups in canonical form. `canonical` is the
    /// session's current sequence, for backends that keep no state of their
    /// own.
    fn serialize_to_model(&self, canonical: &[Markup]) -> Vec<Markup>;

    fn dispose(&mut self);

    fn handle_pointer(&mut self, event: PointerEvent, ctx: &mut GestureContext<'_>)
        -> GestureOutcome;

    /// Creates the markup a [`PendingPrompt`] was waiting for.
    fn complete_prompt(
        &mut self,
        prompt: &PendingPrompt,
        text: String,
        ctx: &mut GestureContext<'_>,
    ) -> bool;

    fn apply_edit(&mut self, markup_id: &str, action: &EditAction, ctx: &mut GestureContext<'_>)
        -> bool;

    /// Change notifications raised since the last call.
    fn drain_events(&mut self) -> Vec<CanvasEvent> {
        Vec::new()
    }

    fn selected(&self) -> Option<&str>;
}

pub fn create_backend(kind: BackendKind) -> Box<dyn RenderBackend> {
    match kind {
        BackendKind::Overlay => Box::new(OverlayBackend::new()),
        BackendKind::Canvas => Box::new(CanvasBackend::new()),
    }
}

/// Pixel box for a text label anchored at its top-left corner.
pub(crate) fn text_box(anchor: PixelPoint, text: &str, font_px: f64) -> PixelRect {
    let chars = text.lines().map(|line| line.chars().count()).max().unwrap_or(0) as f64;
    let lines = text.lines().count().max(1) as f64;
    PixelRect {
        x: anchor.x,
        y: anchor.y,
        width: (chars * font_px * 0.6).max(font_px),
        height: lines * font_px * 1.4,
    }
}

/// Pixel box for a comment marker centred on the click.
pub(crate) fn comment_box(anchor: PixelPoint, scale: f64) -> PixelRect {
    let side = COMMENT_MARKER_PX * scale;
    PixelRect {
        x: anchor.x - side / 2.0,
        y: anchor.y - side / 2.0,
        width: side,
        height: side,
    }
}

pub(crate) fn prompt_kind(tool: ToolMode) -> Option<PromptKind> {
    match tool {
        ToolMode::Text => Some(PromptKind::Text),
        ToolMode::Comment => Some(PromptKind::Comment),
        ToolMode::None | ToolMode::Highlight | ToolMode::Draw => None,
    }
}

/// Builds the markup a completed prompt describes, in normalized space.
pub(crate) fn markup_from_prompt(
    prompt: &PendingPrompt,
    text: String,
    surface: &SurfaceInfo,
    style: &ToolStyle,
) -> Markup {
    match prompt.kind {
        PromptKind::Text => {
            let rect = text_box(prompt.anchor, &text, style.font_size * surface.scale);
            Markup::text(
                prompt.page,
                surface.normalize(rect),
                text,
                style.font_size,
                style.text_color,
            )
        }
        PromptKind::Comment => {
            let rect = comment_box(prompt.anchor, surface.scale);
            Markup::comment(prompt.page, surface.normalize(rect), text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_menu_exposes_type_specific_fields() {
        let text = Markup::text(0, Bounds::default(), "a".into(), 14.0, Color::BLACK);
        let menu = EditMenu::for_markup(&text);
        assert_eq!(menu.font_size, Some(14.0));
        assert!(menu.allows(&EditAction::SetColor(Color::HIGHLIGHT)));

        let comment = Markup::comment(0, Bounds::default(), "c".into());
        let menu = EditMenu::for_markup(&comment);
        assert!(!menu.allows(&EditAction::SetFontSize(10.0)));
        assert!(!menu.allows(&EditAction::SetColor(Color::BLACK)));
        assert!(menu.allows(&EditAction::Delete));
    }

    #[test]
    fn edit_markup_rejects_mismatched_actions() {
        let mut highlight = Markup::highlight(0, Bounds::default(), Color::HIGHLIGHT);
        assert!(!edit_markup(&mut highlight, &EditAction::SetFontSize(20.0)));
        assert!(edit_markup(&mut highlight, &EditAction::SetColor(Color::BLACK)));
        assert_eq!(highlight.kind.color(), Some(Color::BLACK));
    }

    #[test]
    fn comment_box_is_centred_and_scaled() {
        let rect = comment_box(PixelPoint::new(100.0, 100.0), 2.0);
        assert_eq!(rect.width, 48.0);
        assert_eq!(rect.x, 76.0);
    }
}
