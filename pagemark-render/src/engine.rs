//! Contract of the page rendering engine.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::RgbaImage;

/// RGBA8 raster of one page.
#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RenderImage {
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![255; width as usize * height as usize * 4],
        }
    }

    pub fn to_rgba_image(&self) -> Result<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", self.width, self.height))
    }
}

/// Page size in pixels at a given scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

#[async_trait]
pub trait RenderingEngine: Send + Sync {
    fn page_count(&self) -> usize;

    async fn page_size(&self, page: usize, scale: f64) -> Result<PageSize>;

    async fn render_page(&self, page: usize, scale: f64) -> Result<RenderImage>;
}

/// Opens raw document bytes. Failure here means the session cannot offer
/// interactive annotation at all.
#[async_trait]
pub trait EngineProvider: Send + Sync {
    async fn open(&self, bytes: Vec<u8>) -> Result<Arc<dyn RenderingEngine>>;
}
