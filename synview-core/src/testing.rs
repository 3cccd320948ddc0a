use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;

use crate::geometry::Rect;
use crate::sync::{SourceLine, SourcePosition, SyncBackend, SyncNode};
use crate::{DocumentBackend, DocumentInfo, DocumentProvider, PageBitmap, PageSize, RenderRequest};

pub struct FakeBackend {
    info: DocumentInfo,
    renders: Arc<AtomicUsize>,
    texts: Vec<(usize, Rect, String)>,
}

impl FakeBackend {
    pub fn new(sizes: Vec<PageSize>) -> Self {
        Self {
            info: DocumentInfo {
                path: PathBuf::from("fake.pdf"),
                page_sizes: sizes,
            },
            renders: Arc::new(AtomicUsize::new(0)),
            texts: Vec::new(),
        }
    }

    pub fn uniform(pages: usize, width: f64, height: f64) -> Self {
        Self::new(vec![PageSize::new(width, height); pages])
    }

    pub fn with_text(mut self, page: usize, area: Rect, text: &str) -> Self {
        self.texts.push((page, area, text.to_string()));
        self
    }

    fn with_counter(mut self, renders: Arc<AtomicUsize>) -> Self {
        self.renders = renders;
        self
    }

    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl DocumentBackend for FakeBackend {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn render_page(&self, request: RenderRequest) -> Result<PageBitmap> {
        if request.page_index >= self.info.page_count() {
            return Err(anyhow!("no page {}", request.page_index));
        }
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(PageBitmap::blank(request.width, request.height))
    }

    fn page_text(&self, page_index: usize, area: Rect) -> Result<String> {
        let parts: Vec<&str> = self
            .texts
            .iter()
            .filter(|(page, rect, _)| *page == page_index && rect.intersects(&area))
            .map(|(_, _, text)| text.as_str())
            .collect();
        Ok(parts.join(" "))
    }
}

/// Opens [`FakeBackend`]s with whatever page sizes are currently configured.
/// Render counts are shared across every document it opens.
pub struct FakeProvider {
    sizes: Mutex<Vec<PageSize>>,
    texts: Mutex<Vec<(usize, Rect, String)>>,
    fail: Mutex<bool>,
    opens: AtomicUsize,
    renders: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn new(sizes: Vec<PageSize>) -> Self {
        Self {
            sizes: Mutex::new(sizes),
            texts: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
            opens: AtomicUsize::new(0),
            renders: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn uniform(pages: usize, width: f64, height: f64) -> Self {
        Self::new(vec![PageSize::new(width, height); pages])
    }

    pub fn set_sizes(&self, sizes: Vec<PageSize>) {
        *self.sizes.lock() = sizes;
    }

    pub fn add_text(&self, page: usize, area: Rect, text: &str) {
        self.texts.lock().push((page, area, text.to_string()));
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DocumentProvider for FakeProvider {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if *self.fail.lock() {
            return Err(anyhow!("{} is not a PDF", path.display()));
        }
        let mut backend =
            FakeBackend::new(self.sizes.lock().clone()).with_counter(Arc::clone(&self.renders));
        for (page, area, text) in self.texts.lock().iter() {
            backend = backend.with_text(*page, *area, text);
        }
        Ok(Arc::new(backend))
    }
}

/// Sync backend answering with canned results and recording queries.
#[derive(Default)]
pub struct ScriptedSync {
    forward: Mutex<Vec<SyncNode>>,
    inverse: Mutex<Option<SourceLine>>,
    inverse_queries: Mutex<Vec<(usize, f64, f64)>>,
}

impl ScriptedSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_forward(&self, nodes: Vec<SyncNode>) {
        *self.forward.lock() = nodes;
    }

    pub fn set_inverse(&self, line: Option<SourceLine>) {
        *self.inverse.lock() = line;
    }

    pub fn inverse_queries(&self) -> Vec<(usize, f64, f64)> {
        self.inverse_queries.lock().clone()
    }
}

impl SyncBackend for ScriptedSync {
    fn forward(&self, _document: &Path, _position: &SourcePosition) -> Result<Vec<SyncNode>> {
        Ok(self.forward.lock().clone())
    }

    fn inverse(&self, _document: &Path, page: usize, x: f64, y: f64) -> Result<Option<SourceLine>> {
        self.inverse_queries.lock().push((page, x, y));
        Ok(self.inverse.lock().clone())
    }
}
