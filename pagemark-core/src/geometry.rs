//! Page-relative geometry.
//!
//! Markups never store pixels. Every rectangle and point is a fraction of the
//! page width/height, so the same record is valid at any zoom level and on any
//! device pixel ratio. Pixel values only exist transiently inside the render
//! backends and are converted with [`normalize_bounds`] / [`Bounds::to_pixels`].

use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default upper bound on stored points for a single freehand stroke.
pub const DEFAULT_MAX_POINTS: usize = 500;

/// Generates an opaque markup identifier from the current time plus random
/// entropy. Practically unique; nothing relies on a uniqueness proof.
pub fn new_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!("m{millis:x}{suffix}")
}

/// Rectangle in normalized page space. Each component is a fraction of the
/// page width (`x`, `width`) or height (`y`, `height`).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "RawBounds")]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Deserialize)]
struct RawBounds {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    width: f64,
    #[serde(default)]
    height: f64,
}

impl From<RawBounds> for Bounds {
    fn from(raw: RawBounds) -> Self {
        Bounds::new(raw.x, raw.y, raw.width, raw.height).clamped()
    }
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// Forces the rectangle inside the unit square: the origin is clamped to
    /// `[0, 1]` and the extent may not run past the page edge. Non-finite
    /// components collapse to zero.
    pub fn clamped(self) -> Self {
        let finite = |value: f64| if value.is_finite() { value } else { 0.0 };
        let x = finite(self.x).clamp(0.0, 1.0);
        let y = finite(self.y).clamp(0.0, 1.0);
        let width = finite(self.width).clamp(0.0, 1.0 - x);
        let height = finite(self.height).clamp(0.0, 1.0 - y);
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    /// Expands the rectangle back into pixels for a page of the given size.
    pub fn to_pixels(&self, page_width: f64, page_height: f64) -> PixelRect {
        PixelRect {
            x: self.x * page_width,
            y: self.y * page_height,
            width: self.width * page_width,
            height: self.height * page_height,
        }
    }

    /// PDF user-space rectangle `[llx, lly, urx, ury]` for a page measured in
    /// points. PDF puts the origin at the bottom-left corner.
    pub fn to_pdf_rect(&self, page_width: f64, page_height: f64) -> [f64; 4] {
        [
            self.x * page_width,
            (1.0 - self.y - self.height) * page_height,
            self.right() * page_width,
            (1.0 - self.y) * page_height,
        ]
    }

    pub fn approx_eq(&self, other: &Bounds, epsilon: f64) -> bool {
        (self.x - other.x).abs() <= epsilon
            && (self.y - other.y).abs() <= epsilon
            && (self.width - other.width).abs() <= epsilon
            && (self.height - other.height).abs() <= epsilon
    }
}

/// Point in normalized page space, serialized as an `[x, y]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "RawPoint", into = "(f64, f64)")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Wire form of a point; clamped onto the page as it is read, like
/// [`Bounds`].
#[derive(Deserialize)]
struct RawPoint(f64, f64);

impl From<RawPoint> for Point {
    fn from(RawPoint(x, y): RawPoint) -> Self {
        Point::new(x, y).clamped()
    }
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn clamped(self) -> Self {
        let finite = |value: f64| if value.is_finite() { value } else { 0.0 };
        Self {
            x: finite(self.x).clamp(0.0, 1.0),
            y: finite(self.y).clamp(0.0, 1.0),
        }
    }

    pub fn to_pixels(&self, page_width: f64, page_height: f64) -> PixelPoint {
        PixelPoint::new(self.x * page_width, self.y * page_height)
    }

    pub fn approx_eq(&self, other: &Point, epsilon: f64) -> bool {
        (self.x - other.x).abs() <= epsilon && (self.y - other.y).abs() <= epsilon
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Point::new(x, y)
    }
}

impl From<Point> for (f64, f64) {
    fn from(point: Point) -> Self {
        (point.x, point.y)
    }
}

/// Point on a rendered page surface, in pixels at the current scale.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &PixelPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Rectangle on a rendered page surface, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    /// Rectangle spanned by two drag corners, in either order.
    pub fn from_corners(a: PixelPoint, b: PixelPoint) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (a.x - b.x).abs(),
            height: (a.y - b.y).abs(),
        }
    }

    pub fn contains(&self, point: PixelPoint) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }

    pub fn normalize(&self, page_width: f64, page_height: f64) -> Bounds {
        normalize_bounds(self.x, self.y, self.width, self.height, page_width, page_height)
    }
}

/// Converts a pixel rectangle into fractional bounds. A degenerate page size
/// yields empty bounds instead of infinities.
pub fn normalize_bounds(
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    page_width: f64,
    page_height: f64,
) -> Bounds {
    if page_width <= 0.0 || page_height <= 0.0 {
        return Bounds::default();
    }
    Bounds {
        x: x / page_width,
        y: y / page_height,
        width: width / page_width,
        height: height / page_height,
    }
}

pub fn normalize_point(point: PixelPoint, page_width: f64, page_height: f64) -> Point {
    if page_width <= 0.0 || page_height <= 0.0 {
        return Point::default();
    }
    Point::new(point.x / page_width, point.y / page_height)
}

/// Axis-aligned bounding box of a point list, `None` when empty.
pub fn bounds_of_points(points: &[Point]) -> Option<Bounds> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for point in &points[1..] {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }
    Some(Bounds::new(min_x, min_y, max_x - min_x, max_y - min_y))
}

/// Resamples `points` at a uniform stride when it holds more than
/// `max_count` entries. First and last samples are always kept, and an input
/// that already fits is returned untouched, so repeated calls with the same
/// target are stable.
pub fn decimate<T: Clone>(points: Vec<T>, max_count: usize) -> Vec<T> {
    let len = points.len();
    if len <= max_count {
        return points;
    }
    match max_count {
        0 => Vec::new(),
        1 => points.into_iter().take(1).collect(),
        _ => {
            let last = (len - 1) as f64;
            let steps = (max_count - 1) as f64;
            (0..max_count)
                .map(|i| {
                    let index = ((i as f64) * last / steps).round() as usize;
                    points[index.min(len - 1)].clone()
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn normalize_then_expand_reproduces_pixels() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let page_w: f64 = rng.gen_range(50.0..4000.0);
            let page_h: f64 = rng.gen_range(50.0..4000.0);
            let x = rng.gen_range(0.0..page_w);
            let y = rng.gen_range(0.0..page_h);
            let w = rng.gen_range(0.0..page_w - x);
            let h = rng.gen_range(0.0..page_h - y);

            let bounds = normalize_bounds(x, y, w, h, page_w, page_h);
            let back = bounds.to_pixels(page_w, page_h);
            assert!((back.x - x).abs() < 1e-9);
            assert!((back.y - y).abs() < 1e-9);
            assert!((back.width - w).abs() < 1e-9);
            assert!((back.height - h).abs() < 1e-9);
        }
    }

    #[test]
    fn normalized_bounds_are_zoom_independent() {
        let at_one = normalize_bounds(61.2, 79.2, 122.4, 39.6, 612.0, 792.0);
        let at_two = normalize_bounds(122.4, 158.4, 244.8, 79.2, 1224.0, 1584.0);
        assert!(at_one.approx_eq(&at_two, 1e-12));
    }

    #[test]
    fn degenerate_page_size_gives_empty_bounds() {
        assert_eq!(normalize_bounds(1.0, 2.0, 3.0, 4.0, 0.0, 100.0), Bounds::default());
    }

    #[test]
    fn clamped_keeps_rectangle_on_page() {
        let bounds = Bounds::new(1.5, -0.2, 0.5, 2.0).clamped();
        assert_eq!(bounds, Bounds::new(1.0, 0.0, 0.0, 1.0));

        let bounds = Bounds::new(0.8, 0.5, 0.5, f64::NAN).clamped();
        assert!((bounds.width - 0.2).abs() < 1e-12);
        assert_eq!(bounds.height, 0.0);
    }

    #[test]
    fn deserializing_bounds_clamps() {
        let bounds: Bounds =
            serde_json::from_str(r#"{"x": 2, "y": 2, "width": 2, "height": 2}"#).unwrap();
        assert_eq!(bounds, Bounds::new(1.0, 1.0, 0.0, 0.0));
    }

    #[test]
    fn pdf_rect_flips_vertical_axis() {
        let bounds = Bounds::new(0.0, 0.0, 0.5, 0.25);
        assert_eq!(bounds.to_pdf_rect(612.0, 792.0), [0.0, 594.0, 306.0, 792.0]);
    }

    #[test]
    fn deserializing_points_clamps() {
        let points: Vec<Point> = serde_json::from_str("[[1.4, -0.3], [0.25, 0.5]]").unwrap();
        assert_eq!(points, vec![Point::new(1.0, 0.0), Point::new(0.25, 0.5)]);
    }

    #[test]
    fn points_serialize_as_pairs() {
        let json = serde_json::to_string(&vec![Point::new(0.1, 0.2)]).unwrap();
        assert_eq!(json, "[[0.1,0.2]]");
    }

    #[test]
    fn bounds_of_points_spans_extremes() {
        let points = [Point::new(0.2, 0.4), Point::new(0.1, 0.9), Point::new(0.5, 0.3)];
        let bounds = bounds_of_points(&points).unwrap();
        assert!(bounds.approx_eq(&Bounds::new(0.1, 0.3, 0.4, 0.6), 1e-12));
        assert!(bounds_of_points(&[]).is_none());
    }

    #[test]
    fn decimate_respects_bound_and_keeps_endpoints() {
        for len in [0usize, 1, 2, 10, 499, 500, 501, 777, 5000] {
            let points: Vec<usize> = (0..len).collect();
            let out = decimate(points.clone(), DEFAULT_MAX_POINTS);
            assert!(out.len() <= DEFAULT_MAX_POINTS);
            if len <= DEFAULT_MAX_POINTS {
                assert_eq!(out, points);
            } else {
                assert_eq!(out.first(), Some(&0));
                assert_eq!(out.last(), Some(&(len - 1)));
                assert!(out.windows(2).all(|pair| pair[0] < pair[1]));
            }
        }
    }

    #[test]
    fn decimate_is_idempotent() {
        let points: Vec<usize> = (0..1234).collect();
        let once = decimate(points, 100);
        let twice = decimate(once.clone(), 100);
        assert_eq!(once, twice);
    }

    #[test]
    fn decimate_handles_tiny_targets() {
        assert!(decimate(vec![1, 2, 3], 0).is_empty());
        assert_eq!(decimate(vec![1, 2, 3], 1), vec![1]);
    }

    #[test]
    fn ids_are_practically_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| new_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
