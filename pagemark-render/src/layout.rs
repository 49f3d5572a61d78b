//! Vertical page stack and the viewport intersection test that stands in for
//! a visibility observer.

use crate::engine::PageSize;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub scroll_top: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(scroll_top: f64, height: f64) -> Self {
        Self { scroll_top, height }
    }
}

/// Pages stacked top to bottom, separated by `gap` pixels.
#[derive(Debug, Clone, Default)]
pub struct PageLayout {
    offsets: Vec<f64>,
    heights: Vec<f64>,
    gap: f64,
}

impl PageLayout {
    pub fn new(sizes: &[PageSize], gap: f64) -> Self {
        let mut offsets = Vec::with_capacity(sizes.len());
        let mut heights = Vec::with_capacity(sizes.len());
        let mut top = 0.0;
        for size in sizes {
            offsets.push(top);
            heights.push(size.height);
            top += size.height + gap;
        }
        Self {
            offsets,
            heights,
            gap,
        }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn offset_of(&self, page: usize) -> Option<f64> {
        self.offsets.get(page).copied()
    }

    pub fn total_height(&self) -> f64 {
        match (self.offsets.last(), self.heights.last()) {
            (Some(offset), Some(height)) => offset + height,
            _ => 0.0,
        }
    }

    /// Pages whose vertical extent overlaps the viewport grown by `margin`
    /// pixels on both sides.
    pub fn intersecting(&self, viewport: Viewport, margin: f64) -> Vec<usize> {
        let top = viewport.scroll_top - margin;
        let bottom = viewport.scroll_top + viewport.height + margin;
        // Offsets are sorted, so skip everything that ends above the window.
        let start = self
            .offsets
            .iter()
            .zip(&self.heights)
            .position(|(offset, height)| offset + height >= top)
            .unwrap_or(self.offsets.len());
        self.offsets[start..]
            .iter()
            .enumerate()
            .take_while(|(_, offset)| **offset <= bottom)
            .map(|(i, _)| start + i)
            .collect()
    }

    pub fn gap(&self) -> f64 {
        self.gap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(pages: usize) -> PageLayout {
        let sizes = vec![
            PageSize {
                width: 600.0,
                height: 800.0
            };
            pages
        ];
        PageLayout::new(&sizes, 10.0)
    }

    #[test]
    fn offsets_include_gap() {
        let layout = layout(3);
        assert_eq!(layout.offset_of(1), Some(810.0));
        assert_eq!(layout.offset_of(2), Some(1620.0));
        assert_eq!(layout.total_height(), 2420.0);
        assert_eq!(layout.offset_of(3), None);
    }

    #[test]
    fn margin_pulls_in_neighbours() {
        let layout = layout(10);
        let viewport = Viewport::new(810.0, 700.0);
        assert_eq!(layout.intersecting(viewport, 0.0), vec![1]);
        assert_eq!(layout.intersecting(viewport, 200.0), vec![0, 1, 2]);
    }

    #[test]
    fn viewport_past_the_end_sees_nothing() {
        let layout = layout(2);
        assert!(layout.intersecting(Viewport::new(5000.0, 500.0), 0.0).is_empty());
        assert!(PageLayout::default().intersecting(Viewport::new(0.0, 500.0), 0.0).is_empty());
    }
}
