use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

mod cache;
mod config;
mod controller;
mod error;
mod geometry;
mod layout;
mod sync;
mod viewport;

#[cfg(test)]
mod testing;

pub use cache::{CacheStats, RenderCache};
pub use config::{
    zoom_scale, AnimatedScroll, CompileSection, ConfigStore, FileConfigStore, MemoryConfigStore,
    PreviewConfig, PreviewSection, ZoomMode, ZOOM_PERCENTAGES,
};
pub use controller::{
    CompileGuard, CompileLock, CompileResult, Modifiers, PagePlacement, PreviewController,
    ReloadOutcome, ScrollDirection, SyncMarker,
};
pub use error::PreviewError;
pub use geometry::{LayeredRect, Rect};
pub use layout::{Document, Extent, FitMode, LayoutMetrics, LayoutMode, Page};
pub use sync::{
    disambiguate_by_text, merge_if_close, preceding_words, scroll_target, select_unique,
    SourceLine, SourcePosition, SyncAnchor, SyncBackend, SyncNode, SyncSession,
};
pub use viewport::{ease, ScrollPosition, Viewport, ANIMATION_INTERVAL, ANIMATION_STEPS};

/// Size of one page in unscaled device-independent units (PDF points).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub path: PathBuf,
    pub page_sizes: Vec<PageSize>,
}

impl DocumentInfo {
    pub fn page_count(&self) -> usize {
        self.page_sizes.len()
    }
}

/// Asks the backend to draw one page's content box.
///
/// `scale` already folds in the device scale factor; `width`/`height` are the
/// pixel dimensions the cache expects back.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    pub page_index: usize,
    pub scale: f64,
    pub width: u32,
    pub height: u32,
}

pub const BYTES_PER_PIXEL: u64 = 4;

/// RGBA8 pixels of one rendered page.
#[derive(Debug, Clone)]
pub struct PageBitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl PageBitmap {
    /// A white, fully opaque bitmap.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![255; width as usize * height as usize * BYTES_PER_PIXEL as usize],
        }
    }

    pub fn byte_len(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * BYTES_PER_PIXEL
    }
}

/// One opened document as seen by the preview: page geometry, rendering and
/// text extraction.
pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    fn render_page(&self, request: RenderRequest) -> Result<PageBitmap>;
    /// Text under `area`, given in unscaled page coordinates with the origin at
    /// the top-left corner of the page.
    fn page_text(&self, page_index: usize, area: Rect) -> Result<String>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>>;
}

#[derive(Debug, Clone)]
pub enum Command {
    NextPage { count: usize },
    PrevPage { count: usize },
    GotoPage { page: usize },
    ZoomIn { steps: usize },
    ZoomOut { steps: usize },
    SetZoom(ZoomMode),
    SetLayout(LayoutMode),
    ToggleLayout,
    TogglePause,
    Pan { delta_x: f64, delta_y: f64 },
    ForwardSync(SyncAnchor),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PreviewEvent {
    DocumentLoaded { page_count: usize },
    RedrawNeeded,
    PageChanged(usize),
    ScaleChanged(f64),
    /// `Some(message)` while the error display is active, `None` once it ends.
    ErrorMode(Option<String>),
    SourceRequested(SourceLine),
    Status(String),
}
