use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use synview_core::{
    DocumentBackend, DocumentInfo, DocumentProvider, PageBitmap, PageSize, Rect, RenderRequest,
};
use tracing::{debug, instrument, warn};

/// Runtime override for the Pdfium shared library location.
const LIBRARY_PATH_ENV: &str = "SYNVIEW_PDFIUM_LIBRARY_PATH";

/// Smallest factor handed to Pdfium; tiny views still get a readable bitmap.
const MIN_RENDER_SCALE: f32 = 0.05;

pub struct PdfiumRenderFactory {
    pdfium: Arc<Pdfium>,
}

impl PdfiumRenderFactory {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumRenderFactory {
    #[instrument(skip(self))]
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let document = PdfiumDocument::open(Arc::clone(&self.pdfium), absolute)?;
        Ok(Arc::new(document))
    }
}

/// An open PDF. The file is read once when the document is opened, so a
/// compiler rewriting it afterwards does not disturb rendering.
struct PdfiumDocument {
    info: DocumentInfo,
    document: Mutex<PdfDocument<'static>>,
    pdfium: Arc<Pdfium>,
}

impl PdfiumDocument {
    fn open(pdfium: Arc<Pdfium>, path: PathBuf) -> Result<Self> {
        let bytes = std::fs::read(&path).with_context(|| format!("failed to read {:?}", path))?;
        let document = pdfium
            .load_pdf_from_byte_vec(bytes, None)
            .with_context(|| format!("failed to open {:?}", path))?;
        // SAFETY: the document borrows the bindings owned by `pdfium`. Fields drop in
        // declaration order, so `document` is dropped before this struct's handle on
        // `pdfium`, and the Arc keeps the bindings alive for as long as the document exists.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };

        let page_sizes = document
            .pages()
            .iter()
            .map(|page| PageSize::new(f64::from(page.width().value), f64::from(page.height().value)))
            .collect::<Vec<_>>();
        debug!(pages = page_sizes.len(), path = %path.display(), "document opened");

        Ok(Self {
            info: DocumentInfo { path, page_sizes },
            document: Mutex::new(document),
            pdfium,
        })
    }

    fn with_page<R, F>(&self, page_index: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        let index: PdfPageIndex = page_index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
        let document = self.document.lock();
        let page = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page_index))?;
        f(&page)
    }
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<PageBitmap> {
        self.with_page(request.page_index, |page| {
            let config =
                PdfRenderConfig::new().scale_page_by_factor((request.scale as f32).max(MIN_RENDER_SCALE));
            let bitmap = page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", request.page_index))?;
            let pixels = bitmap.as_image().to_rgba8().into_raw();
            let width = u32::try_from(bitmap.width()).unwrap_or_default();
            let height = u32::try_from(bitmap.height()).unwrap_or_default();
            if (width, height) != (request.width, request.height) {
                debug!(
                    page = request.page_index,
                    width,
                    height,
                    expected_width = request.width,
                    expected_height = request.height,
                    "renderer rounded page size differently"
                );
            }
            Ok(PageBitmap {
                width,
                height,
                pixels,
            })
        })
    }

    fn page_text(&self, page_index: usize, area: Rect) -> Result<String> {
        self.with_page(page_index, |page| {
            let page_height = page.height().value;
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page_index))?;
            // PDF space grows upwards from the bottom-left corner
            let rect = PdfRect::new_from_values(
                page_height - area.bottom() as f32,
                area.x as f32,
                page_height - area.y as f32,
                area.right() as f32,
            );
            Ok(text.inside_rect(rect))
        })
    }
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    let path = std::env::var(LIBRARY_PATH_ENV).ok()?;
    if path.is_empty() {
        return None;
    }
    match Pdfium::bind_to_library(&path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!("failed to load Pdfium from {LIBRARY_PATH_ENV}={path}: {err}");
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; install it or set {LIBRARY_PATH_ENV} ({})",
                errors.join(", ")
            ))
        }
    }
}
