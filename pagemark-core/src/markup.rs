//! The canonical markup record.
//!
//! A markup is one positioned annotation on one page. The four kinds form a
//! closed set; everything that branches on the kind matches exhaustively on
//! [`MarkupKind`].

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::error::MarkupError;
use crate::geometry::{bounds_of_points, new_id, Bounds, Point};

pub const MAX_MARKUPS: usize = 1000;
pub const MAX_INK_POINTS: usize = 2000;
pub const MAX_TEXT_LEN: usize = 2000;
pub const DEFAULT_STROKE_WIDTH: f64 = 2.0;
pub const DEFAULT_FONT_SIZE: f64 = 12.0;

pub type MarkupId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Markup {
    pub id: MarkupId,
    pub page: usize,
    pub bounds: Bounds,
    #[serde(flatten)]
    pub kind: MarkupKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarkupKind {
    Highlight {
        #[serde(default = "highlight_color")]
        color: Color,
    },
    Ink {
        #[serde(default)]
        points: Vec<Point>,
        #[serde(rename = "strokeWidth", default = "default_stroke_width")]
        stroke_width: f64,
        #[serde(default)]
        color: Color,
    },
    Text {
        #[serde(default)]
        text: String,
        #[serde(rename = "fontSize", default = "default_font_size")]
        font_size: f64,
        #[serde(default)]
        color: Color,
    },
    #[serde(alias = "sticky_note")]
    Comment {
        #[serde(default)]
        text: String,
    },
}

fn highlight_color() -> Color {
    Color::HIGHLIGHT
}

fn default_stroke_width() -> f64 {
    DEFAULT_STROKE_WIDTH
}

fn default_font_size() -> f64 {
    DEFAULT_FONT_SIZE
}

/// Payload-free discriminant of [`MarkupKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkupType {
    Highlight,
    Ink,
    Text,
    Comment,
}

impl MarkupKind {
    pub fn markup_type(&self) -> MarkupType {
        match self {
            MarkupKind::Highlight { .. } => MarkupType::Highlight,
            MarkupKind::Ink { .. } => MarkupType::Ink,
            MarkupKind::Text { .. } => MarkupType::Text,
            MarkupKind::Comment { .. } => MarkupType::Comment,
        }
    }

    pub fn color(&self) -> Option<Color> {
        match self {
            MarkupKind::Highlight { color }
            | MarkupKind::Ink { color, .. }
            | MarkupKind::Text { color, .. } => Some(*color),
            MarkupKind::Comment { .. } => None,
        }
    }
}

impl Markup {
    pub fn highlight(page: usize, bounds: Bounds, color: Color) -> Self {
        Self {
            id: new_id(),
            page,
            bounds: bounds.clamped(),
            kind: MarkupKind::Highlight { color },
        }
    }

    /// Ink stroke whose bounds are the bounding box of its points.
    pub fn ink(page: usize, points: Vec<Point>, stroke_width: f64, color: Color) -> Self {
        let points: Vec<Point> = points.into_iter().map(Point::clamped).collect();
        let bounds = bounds_of_points(&points).unwrap_or_default();
        Self {
            id: new_id(),
            page,
            bounds,
            kind: MarkupKind::Ink {
                points,
                stroke_width,
                color,
            },
        }
    }

    pub fn text(page: usize, bounds: Bounds, text: String, font_size: f64, color: Color) -> Self {
        Self {
            id: new_id(),
            page,
            bounds: bounds.clamped(),
            kind: MarkupKind::Text {
                text,
                font_size,
                color,
            },
        }
    }

    pub fn comment(page: usize, bounds: Bounds, text: String) -> Self {
        Self {
            id: new_id(),
            page,
            bounds: bounds.clamped(),
            kind: MarkupKind::Comment { text },
        }
    }

    pub fn markup_type(&self) -> MarkupType {
        self.kind.markup_type()
    }

    /// Checks the record against the limits the persistence service enforces.
    /// `page_count` is optional because the page count is unknown while the
    /// rendering engine is unavailable.
    pub fn validate(&self, page_count: Option<usize>) -> Result<(), MarkupError> {
        if let Some(page_count) = page_count {
            if self.page >= page_count {
                return Err(MarkupError::PageOutOfRange {
                    id: self.id.clone(),
                    page: self.page,
                    page_count,
                });
            }
        }
        if !self.bounds.is_finite() {
            return Err(MarkupError::NonFinite(self.id.clone()));
        }
        match &self.kind {
            MarkupKind::Highlight { .. } => {}
            MarkupKind::Ink {
                points,
                stroke_width,
                ..
            } => {
                if points.len() > MAX_INK_POINTS {
                    return Err(MarkupError::TooManyPoints {
                        count: points.len(),
                        max: MAX_INK_POINTS,
                    });
                }
                if !stroke_width.is_finite()
                    || points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite())
                {
                    return Err(MarkupError::NonFinite(self.id.clone()));
                }
            }
            MarkupKind::Text {
                text, font_size, ..
            } => {
                check_text(text)?;
                if !font_size.is_finite() {
                    return Err(MarkupError::NonFinite(self.id.clone()));
                }
            }
            MarkupKind::Comment { text } => check_text(text)?,
        }
        Ok(())
    }

    /// Field-wise equality with a tolerance on every floating point value.
    pub fn approx_eq(&self, other: &Markup, epsilon: f64) -> bool {
        if self.id != other.id
            || self.page != other.page
            || !self.bounds.approx_eq(&other.bounds, epsilon)
        {
            return false;
        }
        match (&self.kind, &other.kind) {
            (MarkupKind::Highlight { color: a }, MarkupKind::Highlight { color: b }) => a == b,
            (
                MarkupKind::Ink {
                    points: pa,
                    stroke_width: wa,
                    color: ca,
                },
                MarkupKind::Ink {
                    points: pb,
                    stroke_width: wb,
                    color: cb,
                },
            ) => {
                ca == cb
                    && (wa - wb).abs() <= epsilon
                    && pa.len() == pb.len()
                    && pa.iter().zip(pb).all(|(a, b)| a.approx_eq(b, epsilon))
            }
            (
                MarkupKind::Text {
                    text: ta,
                    font_size: fa,
                    color: ca,
                },
                MarkupKind::Text {
                    text: tb,
                    font_size: fb,
                    color: cb,
                },
            ) => ta == tb && ca == cb && (fa - fb).abs() <= epsilon,
            (MarkupKind::Comment { text: a }, MarkupKind::Comment { text: b }) => a == b,
            _ => false,
        }
    }
}

fn check_text(text: &str) -> Result<(), MarkupError> {
    let len = text.chars().count();
    if len > MAX_TEXT_LEN {
        return Err(MarkupError::TextTooLong {
            len,
            max: MAX_TEXT_LEN,
        });
    }
    Ok(())
}

/// Validates a whole markup set as it would be sent in one save.
pub fn validate_set(markups: &[Markup], page_count: Option<usize>) -> Result<(), MarkupError> {
    if markups.len() > MAX_MARKUPS {
        return Err(MarkupError::TooManyMarkups {
            count: markups.len(),
            max: MAX_MARKUPS,
        });
    }
    markups.iter().try_for_each(|markup| markup.validate(page_count))
}

pub fn markups_on_page(markups: &[Markup], page: usize) -> Vec<Markup> {
    markups.iter().filter(|m| m.page == page).cloned().collect()
}

/// Writes one page's serialized markups back into the canonical sequence.
///
/// Surviving records keep their position, records missing from `serialized`
/// are removed, and new ones are appended in backend order. Other pages are
/// left untouched.
pub fn merge_page(canonical: &mut Vec<Markup>, page: usize, serialized: Vec<Markup>) {
    let mut incoming: Vec<Option<Markup>> = serialized.into_iter().map(Some).collect();
    let mut merged = Vec::with_capacity(canonical.len() + incoming.len());
    for existing in canonical.drain(..) {
        if existing.page != page {
            merged.push(existing);
            continue;
        }
        let replacement = incoming
            .iter_mut()
            .find(|slot| slot.as_ref().map_or(false, |m| m.id == existing.id))
            .and_then(Option::take);
        if let Some(updated) = replacement {
            merged.push(updated);
        }
    }
    merged.extend(incoming.into_iter().flatten());
    *canonical = merged;
}
