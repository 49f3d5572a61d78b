use std::fmt::Write as _;

use pagemark_core::{
    decimate, escape_text, normalize_point, BackendKind, Color, Markup, MarkupKind, PixelPoint,
    PixelRect, ToolMode,
};
use tracing::debug;

use super::{
    edit_markup, markup_from_prompt, prompt_kind, EditAction, EditMenu, GestureContext,
    GestureOutcome, PendingPrompt, PointerEvent, RenderBackend, SurfaceInfo, MIN_DRAG_PX,
};

const HIGHLIGHT_OPACITY: f64 = 0.35;
const HIT_SLOP_PX: f64 = 4.0;

/// One drawable primitive of the overlay, in page pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayItem {
    Rect {
        markup_id: String,
        rect: PixelRect,
        fill: Color,
        opacity: f64,
    },
    Polyline {
        markup_id: String,
        points: Vec<PixelPoint>,
        width: f64,
        color: Color,
    },
    Label {
        markup_id: String,
        rect: PixelRect,
        text: String,
        font_px: f64,
        color: Color,
    },
    Marker {
        markup_id: String,
        rect: PixelRect,
        note: String,
    },
}

impl DisplayItem {
    pub fn markup_id(&self) -> &str {
        match self {
            DisplayItem::Rect { markup_id, .. }
            | DisplayItem::Polyline { markup_id, .. }
            | DisplayItem::Label { markup_id, .. }
            | DisplayItem::Marker { markup_id, .. } => markup_id,
        }
    }
}

#[derive(Debug, Clone)]
enum Gesture {
    Drag { start: PixelPoint },
    Stroke(Vec<PixelPoint>),
    Click,
}

/// Stateless renderer. The display list is rebuilt from the canonical
/// sequence on every change and gestures write markups straight into it, so
/// there is nothing to serialize back.
#[derive(Debug, Default)]
pub struct OverlayBackend {
    surface: Option<SurfaceInfo>,
    items: Vec<DisplayItem>,
    gesture: Option<Gesture>,
    selected: Option<String>,
}

impl OverlayBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[DisplayItem] {
        &self.items
    }

    /// Renders the display list as a standalone SVG document.
    pub fn to_svg(&self) -> String {
        let (width, height) = self
            .surface
            .map(|s| (s.width, s.height))
            .unwrap_or_default();
        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width:.0}" height="{height:.0}" viewBox="0 0 {width:.2} {height:.2}">"#
        );
        for item in &self.items {
            // Writing into a String cannot fail.
            let _ = match item {
                DisplayItem::Rect {
                    rect, fill, opacity, ..
                } => write!(
                    svg,
                    r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="{}" fill-opacity="{}"/>"#,
                    rect.x, rect.y, rect.width, rect.height, fill, opacity
                ),
                DisplayItem::Polyline {
                    points,
                    width,
                    color,
                    ..
                } => {
                    let coords: Vec<String> = points
                        .iter()
                        .map(|p| format!("{:.2},{:.2}", p.x, p.y))
                        .collect();
                    write!(
                        svg,
                        r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="{:.2}" stroke-linecap="round" stroke-linejoin="round"/>"#,
                        coords.join(" "),
                        color,
                        width
                    )
                }
                DisplayItem::Label {
                    rect,
                    text,
                    font_px,
                    color,
                    ..
                } => write!(
                    svg,
                    r#"<text x="{:.2}" y="{:.2}" font-size="{:.2}" fill="{}">{}</text>"#,
                    rect.x,
                    rect.y + font_px,
                    font_px,
                    color,
                    escape_text(text)
                ),
                DisplayItem::Marker { rect, note, .. } => write!(
                    svg,
                    r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" rx="4" fill="{}"><title>{}</title></rect>"#,
                    rect.x,
                    rect.y,
                    rect.width,
                    rect.height,
                    Color::COMMENT,
                    escape_text(note)
                ),
            };
        }
        svg.push_str("</svg>");
        svg
    }

    fn redraw(&mut self, canonical: &[Markup]) {
        let Some(surface) = self.surface else {
            return;
        };
        let page: Vec<Markup> = canonical
            .iter()
            .filter(|m| m.page == surface.page)
            .cloned()
            .collect();
        self.render_from_model(&page);
    }

    fn hit_test<'m>(&self, markups: &'m [Markup], point: PixelPoint) -> Option<&'m Markup> {
        let surface = self.surface?;
        markups
            .iter()
            .rev()
            .filter(|m| m.page == surface.page)
            .find(|m| {
                let rect = m.bounds.to_pixels(surface.width, surface.height);
                PixelRect {
                    x: rect.x - HIT_SLOP_PX,
                    y: rect.y - HIT_SLOP_PX,
                    width: rect.width + 2.0 * HIT_SLOP_PX,
                    height: rect.height + 2.0 * HIT_SLOP_PX,
                }
                .contains(point)
            })
    }
}

impl RenderBackend for OverlayBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Overlay
    }

    fn attach(&mut self, surface: SurfaceInfo) {
        self.surface = Some(surface);
        self.items.clear();
        self.gesture = None;
    }

    fn surface(&self) -> Option<SurfaceInfo> {
        self.surface
    }

    fn render_from_model(&mut self, markups: &[Markup]) {
        let Some(surface) = self.surface else {
            return;
        };
        let (w, h) = (surface.width, surface.height);
        self.items = markups
            .iter()
            .filter(|m| m.page == surface.page)
            .map(|markup| {
                let rect = markup.bounds.to_pixels(w, h);
                let markup_id = markup.id.clone();
                match &markup.kind {
                    MarkupKind::Highlight { color } => DisplayItem::Rect {
                        markup_id,
                        rect,
                        fill: *color,
                        opacity: HIGHLIGHT_OPACITY,
                    },
                    MarkupKind::Ink {
                        points,
                        stroke_width,
                        color,
                    } => DisplayItem::Polyline {
                        markup_id,
                        points: points.iter().map(|p| p.to_pixels(w, h)).collect(),
                        width: stroke_width * surface.scale,
                        color: *color,
                    },
                    MarkupKind::Text {
                        text,
                        font_size,
                        color,
                    } => DisplayItem::Label {
                        markup_id,
                        rect,
                        text: text.clone(),
                        font_px: font_size * surface.scale,
                        color: *color,
                    },
                    MarkupKind::Comment { text } => DisplayItem::Marker {
                        markup_id,
                        rect,
                        note: text.clone(),
                    },
                }
            })
            .collect();
        if let Some(selected) = &self.selected {
            if !self.items.iter().any(|item| item.markup_id() == selected) {
                self.selected = None;
            }
        }
    }

    fn serialize_to_model(&self, canonical: &[Markup]) -> Vec<Markup> {
        match self.surface {
            Some(surface) => canonical
                .iter()
                .filter(|m| m.page == surface.page)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    fn dispose(&mut self) {
        self.surface = None;
        self.items.clear();
        self.gesture = None;
        self.selected = None;
    }

    fn handle_pointer(
        &mut self,
        event: PointerEvent,
        ctx: &mut GestureContext<'_>,
    ) -> GestureOutcome {
        let Some(surface) = self.surface else {
            return GestureOutcome::Idle;
        };
        if !ctx.edit_mode {
            return GestureOutcome::Idle;
        }
        match event {
            PointerEvent::Down(point) => match ctx.tool {
                ToolMode::Highlight => {
                    self.gesture = Some(Gesture::Drag { start: point });
                    GestureOutcome::Idle
                }
                ToolMode::Draw => {
                    self.gesture = Some(Gesture::Stroke(vec![point]));
                    GestureOutcome::Idle
                }
                ToolMode::Text | ToolMode::Comment => {
                    self.gesture = Some(Gesture::Click);
                    GestureOutcome::Idle
                }
                ToolMode::None => match self.hit_test(ctx.markups.as_slice(), point) {
                    Some(markup) => {
                        self.selected = Some(markup.id.clone());
                        GestureOutcome::Selected(EditMenu::for_markup(markup))
                    }
                    None if self.selected.take().is_some() => GestureOutcome::SelectionCleared,
                    None => GestureOutcome::Idle,
                },
            },
            PointerEvent::Move(point) => {
                if let Some(Gesture::Stroke(points)) = &mut self.gesture {
                    points.push(point);
                }
                GestureOutcome::Idle
            }
            PointerEvent::Up(point) => match self.gesture.take() {
                Some(Gesture::Drag { start }) => {
                    let rect = PixelRect::from_corners(start, point);
                    if rect.width < MIN_DRAG_PX || rect.height < MIN_DRAG_PX {
                        return GestureOutcome::Idle;
                    }
                    ctx.markups.push(Markup::highlight(
                        surface.page,
                        surface.normalize(rect),
                        ctx.style.highlight_color,
                    ));
                    self.redraw(ctx.markups.as_slice());
                    GestureOutcome::Changed
                }
                Some(Gesture::Stroke(mut points)) => {
                    points.push(point);
                    if points.len() < 2 {
                        return GestureOutcome::Idle;
                    }
                    let sampled = points.len();
                    let points: Vec<_> = decimate(points, ctx.max_points)
                        .into_iter()
                        .map(|p| normalize_point(p, surface.width, surface.height))
                        .collect();
                    debug!(page = surface.page, sampled, kept = points.len(), "ink stroke finished");
                    ctx.markups.push(Markup::ink(
                        surface.page,
                        points,
                        ctx.style.stroke_width,
                        ctx.style.ink_color,
                    ));
                    self.redraw(ctx.markups.as_slice());
                    GestureOutcome::Changed
                }
                Some(Gesture::Click) => match prompt_kind(ctx.tool) {
                    Some(kind) => GestureOutcome::Prompt(PendingPrompt {
                        page: surface.page,
                        kind,
                        anchor: point,
                    }),
                    None => GestureOutcome::Idle,
                },
                None => GestureOutcome::Idle,
            },
        }
    }

    fn complete_prompt(
        &mut self,
        prompt: &PendingPrompt,
        text: String,
        ctx: &mut GestureContext<'_>,
    ) -> bool {
        let Some(surface) = self.surface.filter(|s| s.page == prompt.page) else {
            return false;
        };
        ctx.markups
            .push(markup_from_prompt(prompt, text, &surface, ctx.style));
        self.redraw(ctx.markups.as_slice());
        true
    }

    fn apply_edit(
        &mut self,
        markup_id: &str,
        action: &EditAction,
        ctx: &mut GestureContext<'_>,
    ) -> bool {
        let Some(surface) = self.surface else {
            return false;
        };
        let Some(index) = ctx
            .markups
            .iter()
            .position(|m| m.id == markup_id && m.page == surface.page)
        else {
            return false;
        };
        let changed = match action {
            EditAction::Delete => {
                ctx.markups.remove(index);
                if self.selected.as_deref() == Some(markup_id) {
                    self.selected = None;
                }
                true
            }
            _ => edit_markup(&mut ctx.markups[index], action),
        };
        if changed {
            self.redraw(ctx.markups.as_slice());
        }
        changed
    }

    fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }
}
