//! Interactive backend that keeps its own object graph per page.
//!
//! Gestures create and transform objects; nothing touches the canonical
//! sequence until [`RenderBackend::serialize_to_model`] rebuilds normalized
//! markups from each object's transform state.

use pagemark_core::{
    decimate, normalize_point, BackendKind, Color, Markup, MarkupKind, MarkupType, PixelPoint,
    PixelRect, ToolMode,
};
use tracing::debug;

use super::{
    markup_from_prompt, prompt_kind, EditAction, EditMenu, GestureContext, GestureOutcome,
    PendingPrompt, PointerEvent, RenderBackend, SurfaceInfo, MIN_DRAG_PX,
};

pub type ObjectHandle = u64;

/// Markup identity carried by a canvas object, plus payload the object's
/// native geometry cannot hold.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectTag {
    pub markup_id: String,
    pub markup_type: MarkupType,
    /// Ink points in object-local pixels, before any smoothing.
    pub points: Option<Vec<PixelPoint>>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathCommand {
    MoveTo(PixelPoint),
    LineTo(PixelPoint),
    QuadTo { control: PixelPoint, to: PixelPoint },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Rect {
        width: f64,
        height: f64,
    },
    Path {
        commands: Vec<PathCommand>,
        width: f64,
        height: f64,
        stroke_px: f64,
    },
    Text {
        content: String,
        font_px: f64,
        width: f64,
        height: f64,
    },
    Circle {
        radius: f64,
    },
}

impl Shape {
    /// Untransformed extent in pixels.
    fn extent(&self) -> (f64, f64) {
        match self {
            Shape::Rect { width, height }
            | Shape::Path { width, height, .. }
            | Shape::Text { width, height, .. } => (*width, *height),
            Shape::Circle { radius } => (radius * 2.0, radius * 2.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub left: f64,
    pub top: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl Transform {
    fn at(left: f64, top: f64) -> Self {
        Self {
            left,
            top,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanvasObject {
    pub handle: ObjectHandle,
    pub tag: ObjectTag,
    pub shape: Shape,
    pub transform: Transform,
    pub fill: Option<Color>,
    pub stroke: Option<Color>,
}

impl CanvasObject {
    pub fn bounding_rect(&self) -> PixelRect {
        let (width, height) = self.shape.extent();
        PixelRect {
            x: self.transform.left,
            y: self.transform.top,
            width: width * self.transform.scale_x,
            height: height * self.transform.scale_y,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanvasEvent {
    ObjectAdded { handle: ObjectHandle, markup_id: String },
    ObjectModified { handle: ObjectHandle, markup_id: String },
    ObjectRemoved { handle: ObjectHandle, markup_id: String },
    SelectionCreated { handle: ObjectHandle, markup_id: String },
    SelectionCleared,
}

#[derive(Debug, Clone)]
enum Gesture {
    Drag { start: PixelPoint },
    Stroke(Vec<PixelPoint>),
    Click,
    Move {
        handle: ObjectHandle,
        last: PixelPoint,
        moved: bool,
    },
}

#[derive(Debug, Default)]
pub struct CanvasBackend {
    surface: Option<SurfaceInfo>,
    objects: Vec<CanvasObject>,
    next_handle: ObjectHandle,
    selected: Option<ObjectHandle>,
    gesture: Option<Gesture>,
    events: Vec<CanvasEvent>,
}

impl CanvasBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn objects(&self) -> &[CanvasObject] {
        &self.objects
    }

    pub fn object_mut(&mut self, markup_id: &str) -> Option<&mut CanvasObject> {
        self.objects
            .iter_mut()
            .find(|object| object.tag.markup_id == markup_id)
    }

    fn object_from_markup(&mut self, markup: &Markup, surface: &SurfaceInfo) -> CanvasObject {
        self.next_handle += 1;
        let rect = markup.bounds.to_pixels(surface.width, surface.height);
        let mut tag = ObjectTag {
            markup_id: markup.id.clone(),
            markup_type: markup.markup_type(),
            points: None,
            note: None,
        };
        let mut transform = Transform::at(rect.x, rect.y);
        let (shape, fill, stroke) = match &markup.kind {
            MarkupKind::Highlight { color } => (
                Shape::Rect {
                    width: rect.width,
                    height: rect.height,
                },
                Some(*color),
                None,
            ),
            MarkupKind::Ink {
                points,
                stroke_width,
                color,
            } => {
                let local: Vec<PixelPoint> = points
                    .iter()
                    .map(|p| {
                        let px = p.to_pixels(surface.width, surface.height);
                        PixelPoint::new(px.x - rect.x, px.y - rect.y)
                    })
                    .collect();
                let commands = smooth_path(&local);
                tag.points = Some(local);
                (
                    Shape::Path {
                        commands,
                        width: rect.width,
                        height: rect.height,
                        stroke_px: stroke_width * surface.scale,
                    },
                    None,
                    Some(*color),
                )
            }
            MarkupKind::Text {
                text,
                font_size,
                color,
            } => (
                Shape::Text {
                    content: text.clone(),
                    font_px: font_size * surface.scale,
                    width: rect.width,
                    height: rect.height,
                },
                Some(*color),
                None,
            ),
            MarkupKind::Comment { text } => {
                tag.note = Some(text.clone());
                let radius = rect.width.max(rect.height) / 2.0;
                if radius > 0.0 {
                    transform.scale_x = rect.width / (radius * 2.0);
                    transform.scale_y = rect.height / (radius * 2.0);
                }
                (Shape::Circle { radius }, Some(Color::COMMENT), None)
            }
        };
        CanvasObject {
            handle: self.next_handle,
            tag,
            shape,
            transform,
            fill,
            stroke,
        }
    }

    fn add_markup(&mut self, markup: &Markup, surface: &SurfaceInfo) {
        let object = self.object_from_markup(markup, surface);
        self.events.push(CanvasEvent::ObjectAdded {
            handle: object.handle,
            markup_id: object.tag.markup_id.clone(),
        });
        self.objects.push(object);
    }

    fn serialize_object(object: &CanvasObject, surface: &SurfaceInfo) -> Markup {
        let bounds = surface.normalize(object.bounding_rect());
        let t = object.transform;
        let kind = match &object.shape {
            Shape::Rect { .. } => MarkupKind::Highlight {
                color: object.fill.unwrap_or(Color::HIGHLIGHT),
            },
            Shape::Path {
                commands,
                stroke_px,
                ..
            } => {
                let local = match (native_points(commands), &object.tag.points) {
                    (Some(points), _) => points,
                    (None, Some(stashed)) => {
                        debug!(
                            markup_id = %object.tag.markup_id,
                            "smoothed path cannot be inverted; using stashed points"
                        );
                        stashed.clone()
                    }
                    (None, None) => {
                        debug!(
                            markup_id = %object.tag.markup_id,
                            "no stashed points; approximating stroke from path endpoints"
                        );
                        path_endpoints(commands)
                    }
                };
                let points = local
                    .iter()
                    .map(|p| {
                        let page_px =
                            PixelPoint::new(t.left + p.x * t.scale_x, t.top + p.y * t.scale_y);
                        normalize_point(page_px, surface.width, surface.height).clamped()
                    })
                    .collect();
                MarkupKind::Ink {
                    points,
                    stroke_width: stroke_px / surface.scale,
                    color: object.stroke.unwrap_or(Color::BLACK),
                }
            }
            Shape::Text {
                content, font_px, ..
            } => MarkupKind::Text {
                text: content.clone(),
                font_size: font_px * t.scale_y / surface.scale,
                color: object.fill.unwrap_or(Color::BLACK),
            },
            Shape::Circle { .. } => MarkupKind::Comment {
                text: object.tag.note.clone().unwrap_or_default(),
            },
        };
        Markup {
            id: object.tag.markup_id.clone(),
            page: surface.page,
            bounds,
            kind,
        }
    }

    fn hit_test(&self, point: PixelPoint) -> Option<ObjectHandle> {
        self.objects
            .iter()
            .rev()
            .find(|object| object.bounding_rect().contains(point))
            .map(|object| object.handle)
    }

    fn clear_selection(&mut self) -> bool {
        if self.selected.take().is_some() {
            self.events.push(CanvasEvent::SelectionCleared);
            true
        } else {
            false
        }
    }
}

/// Quadratic smoothing through the midpoints between samples. Two-point
/// strokes stay straight lines.
fn smooth_path(points: &[PixelPoint]) -> Vec<PathCommand> {
    let Some((first, rest)) = points.split_first() else {
        return Vec::new();
    };
    let mut commands = vec![PathCommand::MoveTo(*first)];
    if let Some((last, middle)) = rest.split_last() {
        let mut previous = *first;
        for point in middle {
            let mid = PixelPoint::new((point.x + previous.x) / 2.0, (point.y + previous.y) / 2.0);
            commands.push(PathCommand::QuadTo {
                control: previous,
                to: mid,
            });
            previous = *point;
        }
        if !middle.is_empty() {
            commands.push(PathCommand::QuadTo {
                control: previous,
                to: *last,
            });
        } else {
            commands.push(PathCommand::LineTo(*last));
        }
    }
    commands
}

/// Sample points of a path made only of straight segments.
fn native_points(commands: &[PathCommand]) -> Option<Vec<PixelPoint>> {
    commands
        .iter()
        .map(|command| match command {
            PathCommand::MoveTo(p) | PathCommand::LineTo(p) => Some(*p),
            PathCommand::QuadTo { .. } => None,
        })
        .collect()
}

fn path_endpoints(commands: &[PathCommand]) -> Vec<PixelPoint> {
    commands
        .iter()
        .map(|command| match command {
            PathCommand::MoveTo(p) | PathCommand::LineTo(p) => *p,
            PathCommand::QuadTo { to, .. } => *to,
        })
        .collect()
}

impl RenderBackend for CanvasBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Canvas
    }

    fn attach(&mut self, surface: SurfaceInfo) {
        self.surface = Some(surface);
        self.objects.clear();
        self.selected = None;
        self.gesture = None;
    }

    fn surface(&self) -> Option<SurfaceInfo> {
        self.surface
    }

    fn render_from_model(&mut self, markups: &[Markup]) {
        let Some(surface) = self.surface else {
            return;
        };
        self.objects.clear();
        self.selected = None;
        for markup in markups.iter().filter(|m| m.page == surface.page) {
            let object = self.object_from_markup(markup, &surface);
            self.objects.push(object);
        }
    }

    fn serialize_to_model(&self, _canonical: &[Markup]) -> Vec<Markup> {
        let Some(surface) = self.surface else {
            return Vec::new();
        };
        self.objects
            .iter()
            .map(|object| Self::serialize_object(object, &surface))
            .collect()
    }

    fn dispose(&mut self) {
        self.surface = None;
        self.objects.clear();
        self.selected = None;
        self.gesture = None;
        self.events.clear();
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
                ToolMode::None => match self.hit_test(point) {
                    Some(handle) => {
                        self.selected = Some(handle);
                        self.gesture = Some(Gesture::Move {
                            handle,
                            last: point,
                            moved: false,
                        });
                        let Some(object) = self.objects.iter().find(|o| o.handle == handle) else {
                            return GestureOutcome::Idle;
                        };
                        let markup = Self::serialize_object(object, &surface);
                        self.events.push(CanvasEvent::SelectionCreated {
                            handle,
                            markup_id: markup.id.clone(),
                        });
                        GestureOutcome::Selected(EditMenu::for_markup(&markup))
                    }
                    None if self.clear_selection() => GestureOutcome::SelectionCleared,
                    None => GestureOutcome::Idle,
                },
            },
            PointerEvent::Move(point) => {
                match &mut self.gesture {
                    Some(Gesture::Stroke(points)) => points.push(point),
                    Some(Gesture::Move {
                        handle,
                        last,
                        moved,
                    }) => {
                        let (dx, dy) = (point.x - last.x, point.y - last.y);
                        let handle = *handle;
                        *last = point;
                        *moved = true;
                        if let Some(object) = self.objects.iter_mut().find(|o| o.handle == handle)
                        {
                            object.transform.left += dx;
                            object.transform.top += dy;
                        }
                    }
                    _ => {}
                }
                GestureOutcome::Idle
            }
            PointerEvent::Up(point) => match self.gesture.take() {
                Some(Gesture::Drag { start }) => {
                    let rect = PixelRect::from_corners(start, point);
                    if rect.width < MIN_DRAG_PX || rect.height < MIN_DRAG_PX {
                        return GestureOutcome::Idle;
                    }
                    let markup = Markup::highlight(
                        surface.page,
                        surface.normalize(rect),
                        ctx.style.highlight_color,
                    );
                    self.add_markup(&markup, &surface);
                    GestureOutcome::Changed
                }
                Some(Gesture::Stroke(mut points)) => {
                    points.push(point);
                    if points.len() < 2 {
                        return GestureOutcome::Idle;
                    }
                    let points = decimate(points, ctx.max_points)
                        .into_iter()
                        .map(|p| normalize_point(p, surface.width, surface.height))
                        .collect();
                    let markup = Markup::ink(
                        surface.page,
                        points,
                        ctx.style.stroke_width,
                        ctx.style.ink_color,
                    );
                    self.add_markup(&markup, &surface);
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
                Some(Gesture::Move { handle, moved, .. }) => {
                    if !moved {
                        return GestureOutcome::Idle;
                    }
                    let Some(object) = self.objects.iter().find(|o| o.handle == handle) else {
                        return GestureOutcome::Idle;
                    };
                    self.events.push(CanvasEvent::ObjectModified {
                        handle,
                        markup_id: object.tag.markup_id.clone(),
                    });
                    GestureOutcome::Changed
                }
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
        let markup = markup_from_prompt(prompt, text, &surface, ctx.style);
        self.add_markup(&markup, &surface);
        true
    }

    fn apply_edit(
        &mut self,
        markup_id: &str,
        action: &EditAction,
        _ctx: &mut GestureContext<'_>,
    ) -> bool {
        let Some(surface) = self.surface else {
            return false;
        };
        let Some(index) = self
            .objects
            .iter()
            .position(|o| o.tag.markup_id == markup_id)
        else {
            return false;
        };
        if let EditAction::Delete = action {
            let object = self.objects.remove(index);
            if self.selected == Some(object.handle) {
                self.clear_selection();
            }
            self.events.push(CanvasEvent::ObjectRemoved {
                handle: object.handle,
                markup_id: object.tag.markup_id,
            });
            return true;
        }

        let object = &mut self.objects[index];
        let changed = match (&mut object.shape, action) {
            (Shape::Text { font_px, .. }, EditAction::SetFontSize(size))
                if size.is_finite() && *size > 0.0 =>
            {
                *font_px = size * surface.scale / object.transform.scale_y;
                true
            }
            (Shape::Rect { .. } | Shape::Text { .. }, EditAction::SetColor(color)) => {
                object.fill = Some(*color);
                true
            }
            (Shape::Path { .. }, EditAction::SetColor(color)) => {
                object.stroke = Some(*color);
                true
            }
            _ => false,
        };
        if changed {
            self.events.push(CanvasEvent::ObjectModified {
                handle: object.handle,
                markup_id: object.tag.markup_id.clone(),
            });
        }
        changed
    }

    fn drain_events(&mut self) -> Vec<CanvasEvent> {
        std::mem::take(&mut self.events)
    }

    fn selected(&self) -> Option<&str> {
        let handle = self.selected?;
        self.objects
            .iter()
            .find(|o| o.handle == handle)
            .map(|o| o.tag.markup_id.as_str())
    }
}
