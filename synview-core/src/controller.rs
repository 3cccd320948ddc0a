use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{CacheStats, RenderCache};
use crate::config::{
    zoom_scale, AnimatedScroll, ConfigStore, PreviewConfig, ZoomMode, ZOOM_PERCENTAGES,
};
use crate::error::PreviewError;
use crate::geometry::{LayeredRect, Rect};
use crate::layout::{Document, FitMode, LayoutMetrics, LayoutMode};
use crate::sync::{
    disambiguate_by_text, merge_if_close, scroll_target, select_unique, SourceLine, SyncAnchor,
    SyncBackend, SyncNode, SyncSession,
};
use crate::viewport::Viewport;
use crate::{Command, DocumentBackend, DocumentProvider, PageBitmap, PreviewEvent};

/// Shared "a compile or reload is running" flag. Not reentrant: a second
/// `try_acquire` fails while a guard is alive.
#[derive(Debug, Default)]
pub struct CompileLock {
    busy: Mutex<()>,
}

impl CompileLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<CompileGuard<'_>> {
        self.busy.try_lock().map(|guard| CompileGuard { _guard: guard })
    }

    pub fn is_held(&self) -> bool {
        self.busy.is_locked()
    }
}

#[derive(Debug)]
pub struct CompileGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    fn swapped(self) -> Self {
        match self {
            ScrollDirection::Up => ScrollDirection::Left,
            ScrollDirection::Down => ScrollDirection::Right,
            ScrollDirection::Left => ScrollDirection::Up,
            ScrollDirection::Right => ScrollDirection::Down,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Reloaded,
    /// Nothing was loaded yet, so the reload performed the first load.
    Loaded,
    Busy,
    NoDocument,
    Missing,
    Unreadable,
}

/// What the build reported once it finished.
#[derive(Debug, Clone)]
pub struct CompileResult {
    pub document: PathBuf,
    pub error: Option<String>,
    pub anchor: Option<SyncAnchor>,
}

/// Sync candidate box on a placed page, in page-relative pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncMarker {
    pub rect: Rect,
    pub selected: bool,
    pub matched: bool,
}

/// One visible page, positioned relative to the top-left of the view.
#[derive(Debug, Clone)]
pub struct PagePlacement {
    pub page: usize,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub bitmap: Arc<PageBitmap>,
    /// Factor from bitmap pixels to view pixels.
    pub paint_scale: f64,
    pub markers: Vec<SyncMarker>,
}

pub struct PreviewController {
    provider: Arc<dyn DocumentProvider>,
    sync_backend: Option<Arc<dyn SyncBackend>>,
    config_store: Arc<dyn ConfigStore>,
    config: PreviewConfig,
    compile_lock: Arc<CompileLock>,
    path: Option<PathBuf>,
    backend: Option<Arc<dyn DocumentBackend>>,
    document: Document,
    viewport: Viewport,
    cache: RenderCache,
    sync: SyncSession,
    zoom: ZoomMode,
    events: Arc<Mutex<Vec<PreviewEvent>>>,
}

impl PreviewController {
    pub fn new(
        provider: Arc<dyn DocumentProvider>,
        config_store: Arc<dyn ConfigStore>,
        compile_lock: Arc<CompileLock>,
    ) -> Result<Self, PreviewError> {
        let config = config_store
            .load()
            .map_err(|err| PreviewError::Config(format!("{err:#}")))?
            .unwrap_or_default();
        let zoom = config.preview.zoom_mode;

        let mut controller = Self {
            provider,
            sync_backend: None,
            config_store,
            config,
            compile_lock,
            path: None,
            backend: None,
            document: Document::new(LayoutMetrics::default()),
            viewport: Viewport::default(),
            cache: RenderCache::new(),
            sync: SyncSession::default(),
            zoom,
            events: Arc::new(Mutex::new(Vec::new())),
        };
        controller.reset_document(LayoutMetrics::default());
        Ok(controller)
    }

    pub fn with_sync_backend(mut self, backend: Arc<dyn SyncBackend>) -> Self {
        self.sync_backend = Some(backend);
        self
    }

    pub fn with_metrics(mut self, metrics: LayoutMetrics) -> Self {
        self.reset_document(metrics);
        self
    }

    fn reset_document(&mut self, metrics: LayoutMetrics) {
        self.document = Document::new(metrics);
        self.document.layout_mode = self.config.preview.pagelayout;
        self.document.fit_mode = self.zoom.fit_mode();
    }

    pub fn events(&self) -> Arc<Mutex<Vec<PreviewEvent>>> {
        Arc::clone(&self.events)
    }

    fn emit(&self, event: PreviewEvent) {
        self.events.lock().push(event);
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn zoom(&self) -> ZoomMode {
        self.zoom
    }

    pub fn sync_nodes(&self) -> &[SyncNode] {
        self.sync.nodes()
    }

    pub fn current_page(&self) -> Option<usize> {
        self.document.current_page()
    }

    pub fn page_count(&self) -> usize {
        self.document.page_count()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache_budget(&self) -> u64 {
        self.config.cache_budget_bytes()
    }

    pub fn is_paused(&self) -> bool {
        self.config.compile.pause
    }

    pub fn is_animating(&self) -> bool {
        self.viewport.is_animating()
    }

    fn persist_config(&self) {
        if let Err(err) = self.config_store.save(&self.config) {
            warn!("failed to save configuration: {err:#}");
        }
    }

    fn field_of_view(&self) -> LayeredRect {
        let layer = match self.document.layout_mode {
            LayoutMode::Continuous => 0,
            LayoutMode::SinglePage => self.document.current_page().unwrap_or(0),
        };
        self.viewport.field_of_view(layer)
    }

    /// Pushes the content size to the viewport, then lays pages out for the
    /// resulting field of view.
    fn relayout(&mut self) {
        let (width, height) = self.document.content_extent();
        self.viewport.quietly(|vp| vp.set_content(width, height));
        let fov = self.field_of_view();
        self.document.compute_positions(&fov);
    }

    fn invalidate_renderings(&mut self) {
        if let Err(err) = self.cache.invalidate_all() {
            error!(%err, "render cache accounting drifted");
        }
    }

    fn set_current_page(&mut self, page: usize) {
        if self.document.set_current_page(page) {
            if let Some(page) = self.document.current_page() {
                self.emit(PreviewEvent::PageChanged(page));
            }
        }
    }

    /// Continuous layout derives the current page from the scroll offset.
    fn update_current_page(&mut self) {
        if self.document.layout_mode != LayoutMode::Continuous || self.document.page_count() == 0
        {
            return;
        }

        let pm = self.document.page_margin();
        let view_start = self.viewport.offset().y - pm;
        let view_end = view_start + self.viewport.view_height() + 2.0 * pm;

        let pages = self.document.pages();
        let mut page = pages.len();
        let mut edge = 0.0;
        for (index, candidate) in pages.iter().enumerate() {
            edge = candidate.inner.y + candidate.inner.height + pm;
            if edge >= view_start {
                page = index;
                break;
            }
        }
        if edge <= (view_start + view_end) / 2.0 {
            page += 1;
        }
        self.set_current_page(page);
    }

    fn update_fit_scale(&mut self) {
        let (width, height) = self.viewport.outer_size();
        let Some(scale) = self
            .document
            .solve_fit_scale(width, height, self.viewport.vbar_width())
        else {
            return;
        };
        if (scale - self.document.scale).abs() <= f64::EPSILON {
            return;
        }
        debug!(scale, fit = ?self.document.fit_mode, "fit scale changed");
        self.set_scale(scale, None);
    }

    /// Changes the scale. With an anchor (a point relative to the view) the
    /// document point under it stays put; without one nothing scrolls.
    pub fn set_scale(&mut self, scale: f64, anchor: Option<(f64, f64)>) {
        if !scale.is_finite() || scale <= 0.0 || (scale - self.document.scale).abs() <= f64::EPSILON
        {
            return;
        }

        let margins = 2.0 * self.document.document_margin();
        let offset = self.viewport.offset();
        let relative = anchor.map(|(x, y)| {
            (
                (offset.x + x) / (self.document.width_scaled() + margins),
                (offset.y + y) / (self.document.height_scaled() + margins),
            )
        });

        self.invalidate_renderings();
        self.document.scale = scale;
        self.relayout();

        if let (Some((x, y)), Some((rel_x, rel_y))) = (anchor, relative) {
            let target_x = rel_x * (self.document.width_scaled() + margins) - x;
            let target_y = rel_y * (self.document.height_scaled() + margins) - y;
            self.viewport.quietly(|vp| vp.goto(target_x, target_y));
        }

        self.emit(PreviewEvent::ScaleChanged(scale));
        self.emit(PreviewEvent::RedrawNeeded);
    }

    fn view_center(&self) -> (f64, f64) {
        (
            self.viewport.view_width() / 2.0,
            self.viewport.view_height() / 2.0,
        )
    }

    pub fn set_zoom(&mut self, zoom: ZoomMode) {
        self.zoom = zoom;
        self.document.fit_mode = zoom.fit_mode();
        match zoom {
            ZoomMode::Percent(percent) => {
                let scale = zoom_scale(percent, self.config.preview.screen_dpi);
                let anchor = self.view_center();
                self.set_scale(scale, Some(anchor));
            }
            ZoomMode::BestFit | ZoomMode::FitWidth => self.update_fit_scale(),
        }
        self.relayout();
        self.update_current_page();
        self.emit(PreviewEvent::RedrawNeeded);
    }

    /// Moves to the next numeric zoom level above or below the current scale.
    /// Moves `steps` levels along the zoom list, stopping at either end.
    fn zoom_steps(&mut self, zoom_in: bool, steps: usize) {
        for _ in 0..steps.min(ZOOM_PERCENTAGES.len()) {
            self.zoom_step(zoom_in, None);
        }
    }

    fn zoom_step(&mut self, zoom_in: bool, anchor: Option<(f64, f64)>) {
        const TOLERANCE: f64 = 1e-9;
        let dpi = self.config.preview.screen_dpi;
        let current = self.document.scale;
        let next = if zoom_in {
            ZOOM_PERCENTAGES
                .iter()
                .copied()
                .find(|&percent| zoom_scale(percent, dpi) > current + TOLERANCE)
        } else {
            ZOOM_PERCENTAGES
                .iter()
                .rev()
                .copied()
                .find(|&percent| zoom_scale(percent, dpi) < current - TOLERANCE)
        };
        let Some(percent) = next else {
            return;
        };

        self.zoom = ZoomMode::Percent(percent);
        self.document.fit_mode = FitMode::Numeric;
        let anchor = anchor.unwrap_or_else(|| self.view_center());
        self.set_scale(zoom_scale(percent, dpi), Some(anchor));
        self.relayout();
        self.update_current_page();
        self.emit(PreviewEvent::RedrawNeeded);
    }

    pub fn set_layout_mode(&mut self, mode: LayoutMode) {
        if self.config.preview.pagelayout != mode {
            self.config.preview.pagelayout = mode;
            self.persist_config();
        }
        if self.document.layout_mode == mode {
            return;
        }

        let page = self.document.current_page();
        self.document.layout_mode = mode;
        self.update_fit_scale();
        self.relayout();
        if let Some(page) = page {
            self.goto_page(page);
        }
        self.emit(PreviewEvent::RedrawNeeded);
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.config.compile.pause == paused {
            return;
        }
        self.config.compile.pause = paused;
        self.persist_config();
        let message = if paused {
            "preview paused"
        } else {
            "preview resumed"
        };
        self.emit(PreviewEvent::Status(message.to_string()));
    }

    pub fn set_device_scale_factor(&mut self, factor: Option<f64>) {
        if self.viewport.set_device_scale_factor(factor) {
            self.invalidate_renderings();
            self.emit(PreviewEvent::RedrawNeeded);
        }
    }

    pub fn set_scrollbar_thickness(&mut self, vbar_width: f64, hbar_height: f64) {
        self.viewport.set_scrollbar_thickness(vbar_width, hbar_height);
        self.update_fit_scale();
        self.relayout();
    }

    /// Jumps to a scroll offset without animation.
    pub fn goto(&mut self, x: f64, y: f64) {
        let changed = self.viewport.quietly(|vp| vp.goto(x, y));
        self.update_current_page();
        if changed {
            self.emit(PreviewEvent::RedrawNeeded);
        }
    }

    /// Starts an eased scroll; [`PreviewController::tick`] drives it.
    pub fn scroll_to(&mut self, x: f64, y: f64) {
        self.viewport.animate_to(x, y);
    }

    /// Advances a running scroll animation; returns whether more ticks are
    /// needed.
    pub fn tick(&mut self) -> bool {
        if !self.viewport.is_animating() {
            return false;
        }
        let more = self.viewport.quietly(|vp| vp.step());
        self.update_current_page();
        self.emit(PreviewEvent::RedrawNeeded);
        more
    }

    /// Scroll offsets changed by the user through the host's own scrollbars.
    /// Writes made by the controller itself are ignored.
    pub fn on_scroll_offsets_changed(&mut self, x: f64, y: f64) {
        if self.viewport.notifications_blocked() {
            return;
        }
        self.viewport.cancel_animation();
        self.goto(x, y);
    }

    pub fn goto_page(&mut self, page: usize) {
        let count = self.document.page_count();
        if count == 0 {
            return;
        }
        let page = page.min(count - 1);
        self.set_current_page(page);

        match self.document.layout_mode {
            LayoutMode::SinglePage => {
                self.update_fit_scale();
                self.relayout();
            }
            LayoutMode::Continuous => {
                let x = self.viewport.offset().x;
                let y = self.document.page_offset(page);
                self.viewport.quietly(|vp| vp.goto(x, y));
            }
        }
        self.emit(PreviewEvent::RedrawNeeded);
    }

    /// Animated variant of [`PreviewController::goto_page`]; single-page
    /// layout has nothing to animate and switches directly.
    pub fn scroll_to_page(&mut self, page: usize) {
        let count = self.document.page_count();
        if count == 0 {
            return;
        }
        match self.document.layout_mode {
            LayoutMode::SinglePage => self.goto_page(page),
            LayoutMode::Continuous => {
                let page = page.min(count - 1);
                self.set_current_page(page);
                let x = self.viewport.offset().x;
                let y = self.document.page_offset(page);
                self.viewport.animate_to(x, y);
            }
        }
    }

    fn navigate_to_page(&mut self, page: usize) {
        if self.config.preview.animated_scroll == AnimatedScroll::Always {
            self.scroll_to_page(page);
        } else {
            self.goto_page(page);
        }
    }

    pub fn next_page(&mut self, count: usize) {
        if let Some(page) = self.document.current_page() {
            self.navigate_to_page(page.saturating_add(count));
        }
    }

    pub fn prev_page(&mut self, count: usize) {
        if let Some(page) = self.document.current_page() {
            self.navigate_to_page(page.saturating_sub(count));
        }
    }

    /// The host's drawing area changed size. The point at the center of the
    /// view stays centered across the re-fit.
    pub fn on_viewport_resized(&mut self, width: f64, height: f64) {
        let fov = self.field_of_view();
        let width_scaled = self.document.width_scaled();
        let height_scaled = self.document.height_scaled();
        let relative = (width_scaled > 0.0 && height_scaled > 0.0).then(|| {
            (
                (fov.x + fov.width / 2.0) / width_scaled,
                (fov.y + fov.height / 2.0) / height_scaled,
            )
        });

        self.viewport.set_outer_size(width, height);
        self.update_fit_scale();
        self.relayout();

        if let Some((rel_x, rel_y)) = relative {
            let fov = self.field_of_view();
            let x = rel_x * self.document.width_scaled() - fov.width / 2.0;
            let y = rel_y * self.document.height_scaled() - fov.height / 2.0;
            self.viewport.quietly(|vp| vp.goto(x, y));
        }
        self.update_current_page();
        self.emit(PreviewEvent::RedrawNeeded);
    }

    /// Ctrl+click runs an inverse search for the clicked point (view
    /// coordinates) and reports the source line.
    pub fn on_pointer_click(&mut self, x: f64, y: f64, modifiers: Modifiers) -> Option<SourceLine> {
        if !modifiers.ctrl {
            return None;
        }
        let offset = self.viewport.offset();
        let (page, page_x, page_y) = self.document.page_at(offset.x + x, offset.y + y)?;
        self.inverse_search(page, page_x / self.document.scale, page_y / self.document.scale)
    }

    /// Source line for a point in unscaled page coordinates.
    pub fn inverse_search(&mut self, page: usize, x: f64, y: f64) -> Option<SourceLine> {
        let (Some(sync_backend), Some(path)) = (self.sync_backend.as_ref(), self.path.as_ref())
        else {
            return None;
        };
        match sync_backend.inverse(path, page, x, y) {
            Ok(Some(line)) => {
                info!(file = %line.file.display(), line = line.line, "inverse search");
                self.emit(PreviewEvent::SourceRequested(line.clone()));
                Some(line)
            }
            Ok(None) => {
                debug!(page, x, y, "inverse search found nothing");
                None
            }
            Err(err) => {
                warn!(page, "inverse search failed: {err:#}");
                None
            }
        }
    }

    /// Pointer dragged by `(delta_x, delta_y)`: the document follows it.
    pub fn on_pointer_drag(&mut self, delta_x: f64, delta_y: f64) {
        self.pan(-delta_x, -delta_y);
    }

    fn pan(&mut self, delta_x: f64, delta_y: f64) {
        let offset = self.viewport.offset();
        self.viewport.cancel_animation();
        self.goto(offset.x + delta_x, offset.y + delta_y);
    }

    /// One wheel notch at `(x, y)` in view coordinates.
    pub fn on_scroll_wheel(
        &mut self,
        direction: ScrollDirection,
        x: f64,
        y: f64,
        modifiers: Modifiers,
    ) {
        if modifiers.ctrl {
            match direction {
                ScrollDirection::Up => self.zoom_step(true, Some((x, y))),
                ScrollDirection::Down => self.zoom_step(false, Some((x, y))),
                ScrollDirection::Left | ScrollDirection::Right => {}
            }
            return;
        }

        let direction = if modifiers.shift {
            direction.swapped()
        } else {
            direction
        };

        let (vertical_bar, _) = self.viewport.scrollbars();
        if !vertical_bar {
            match direction {
                ScrollDirection::Up => return self.prev_page(1),
                ScrollDirection::Down => return self.next_page(1),
                ScrollDirection::Left | ScrollDirection::Right => {}
            }
        }

        let vertical_step = self.viewport.view_height().powf(2.0 / 3.0);
        let horizontal_step = self.viewport.view_width().powf(2.0 / 3.0);
        let (delta_x, delta_y) = match direction {
            ScrollDirection::Up => (0.0, -vertical_step),
            ScrollDirection::Down => (0.0, vertical_step),
            ScrollDirection::Left => (-horizontal_step, 0.0),
            ScrollDirection::Right => (horizontal_step, 0.0),
        };
        self.pan(delta_x, delta_y);
    }

    /// Shows the compile error display. The scroll position is saved once and
    /// stays frozen until [`PreviewController::stop_error_mode`].
    pub fn start_error_mode(&mut self, message: &str) {
        if !self.viewport.error_mode() {
            self.viewport.save_position();
            self.viewport.set_error_mode(true);
            info!(%message, "entering error mode");
        }
        self.emit(PreviewEvent::ErrorMode(Some(message.to_string())));
    }

    pub fn stop_error_mode(&mut self) {
        if !self.viewport.error_mode() {
            return;
        }
        self.viewport.quietly(|vp| vp.restore_position());
        self.viewport.set_error_mode(false);
        self.update_current_page();
        self.emit(PreviewEvent::ErrorMode(None));
        self.emit(PreviewEvent::RedrawNeeded);
    }

    fn load_document(&mut self, backend: Arc<dyn DocumentBackend>) {
        self.invalidate_renderings();
        let sizes = backend.info().page_sizes.clone();
        self.document.replace_pages(&sizes);
        self.backend = Some(backend);
        self.update_fit_scale();
        self.relayout();
        self.emit(PreviewEvent::DocumentLoaded {
            page_count: self.document.page_count(),
        });
    }

    /// Opens `path` as the previewed document and restores the saved scroll
    /// position.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn set_document(&mut self, path: PathBuf) -> Result<(), PreviewError> {
        self.backend = None;
        self.path = Some(path.clone());

        let backend = match self.provider.open(&path).await {
            Ok(backend) => backend,
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(%reason, "failed to open document");
                self.emit(PreviewEvent::Status(format!(
                    "cannot open {}: {reason}",
                    path.display()
                )));
                return Err(PreviewError::LoadFailure { path, reason });
            }
        };

        self.load_document(backend);
        self.sync.clear();
        self.set_zoom(self.zoom);

        let saved = self.viewport.saved_position();
        self.viewport.quietly(|vp| vp.goto(saved.x, saved.y));
        match self.document.layout_mode {
            LayoutMode::Continuous => self.update_current_page(),
            LayoutMode::SinglePage => {
                let page = self.document.current_page().unwrap_or(0);
                self.goto_page(page);
            }
        }

        info!(pages = self.document.page_count(), "document loaded");
        self.emit(PreviewEvent::RedrawNeeded);
        Ok(())
    }

    /// Re-reads the document after it changed on disk. With an anchor and
    /// automatic sync enabled the view follows the editor cursor; otherwise
    /// the scroll position is kept.
    #[instrument(skip(self, anchor))]
    pub async fn reload(
        &mut self,
        anchor: Option<&SyncAnchor>,
    ) -> Result<ReloadOutcome, PreviewError> {
        let lock = Arc::clone(&self.compile_lock);
        let Some(_guard) = lock.try_acquire() else {
            debug!("compile lock held, skipping reload");
            return Ok(ReloadOutcome::Busy);
        };

        let Some(path) = self.path.clone() else {
            return Ok(ReloadOutcome::NoDocument);
        };
        if !path.exists() {
            debug!(path = %path.display(), "document missing, skipping reload");
            return Ok(ReloadOutcome::Missing);
        }
        if self.backend.is_none() {
            self.set_document(path).await?;
            return Ok(ReloadOutcome::Loaded);
        }

        // the previous backend keeps painting until the new file opens
        let backend = match self.provider.open(&path).await {
            Ok(backend) => backend,
            Err(err) => {
                warn!(path = %path.display(), "document unreadable: {err:#}");
                return Ok(ReloadOutcome::Unreadable);
            }
        };

        let previous_page = self.document.current_page();
        self.load_document(backend);

        let synced = match anchor {
            Some(anchor) if self.config.compile.synctex && self.config.preview.autosync => {
                self.sync_to_anchor(anchor)
            }
            _ => false,
        };
        if !synced {
            self.sync.clear();
            let count = self.document.page_count();
            if let Some(page) = previous_page {
                if count > 0 && page >= count {
                    self.goto_page(count - 1);
                }
            }
        }

        self.update_current_page();
        self.emit(PreviewEvent::RedrawNeeded);
        Ok(ReloadOutcome::Reloaded)
    }

    pub async fn on_compile_finished(&mut self, result: CompileResult) -> Result<(), PreviewError> {
        if let Some(message) = result.error {
            self.start_error_mode(&message);
            return Ok(());
        }

        if self.path.as_deref() != Some(result.document.as_path()) {
            self.set_document(result.document).await?;
        } else {
            let outcome = self.reload(result.anchor.as_ref()).await?;
            debug!(?outcome, "reloaded after compile");
        }
        self.stop_error_mode();
        Ok(())
    }

    /// Explicit forward search: shows the box produced by the anchor's
    /// source position, whatever the auto-sync settings say.
    pub fn forward_sync(&mut self, anchor: &SyncAnchor) -> Option<SyncNode> {
        self.sync_to_anchor(anchor);
        self.sync.selected().copied()
    }

    /// Runs a forward search and scrolls to the winning candidate. Returns
    /// whether the search ran at all.
    fn sync_to_anchor(&mut self, anchor: &SyncAnchor) -> bool {
        let (Some(sync_backend), Some(path)) = (self.sync_backend.clone(), self.path.clone()) else {
            return false;
        };

        let nodes = match sync_backend.forward(&path, &anchor.position) {
            Ok(nodes) => nodes,
            Err(err) => {
                warn!("forward search failed: {err:#}");
                self.sync.clear();
                return false;
            }
        };
        let page_count = self.document.page_count();
        self.sync
            .replace(nodes.into_iter().filter(|node| node.page < page_count).collect());

        let view_height = self.viewport.view_height();
        let scale = self.document.scale;
        let mut selected = select_unique(self.sync.nodes_mut());
        if selected.is_none() && merge_if_close(self.sync.nodes_mut(), view_height, scale) {
            selected = select_unique(self.sync.nodes_mut());
        }
        if selected.is_none() {
            if let Some(backend) = self.backend.clone() {
                disambiguate_by_text(self.sync.nodes_mut(), anchor, backend.as_ref());
                selected = select_unique(self.sync.nodes_mut());
            }
        }

        debug!(
            candidates = self.sync.nodes().len(),
            ?selected,
            "forward search finished"
        );
        if let Some(index) = selected {
            let node = self.sync.nodes()[index];
            self.scroll_to_node(&node);
        }
        self.emit(PreviewEvent::RedrawNeeded);
        true
    }

    fn node_target(&self, node: &SyncNode) -> Option<(f64, f64)> {
        let page = self.document.page(node.page)?;
        let scale = self.document.scale;
        let rect = Rect::new(
            page.inner.x + node.x * scale,
            page.inner.y + node.y * scale,
            node.width * scale,
            node.height * scale,
        );
        let offset = self.viewport.offset();
        let view = Rect::new(
            offset.x,
            offset.y,
            self.viewport.view_width(),
            self.viewport.view_height(),
        );
        Some(scroll_target(rect, view))
    }

    fn scroll_to_node(&mut self, node: &SyncNode) {
        if self.document.layout_mode == LayoutMode::SinglePage
            && self.document.current_page() != Some(node.page)
        {
            self.goto_page(node.page);
            if let Some((x, y)) = self.node_target(node) {
                self.goto(x, y);
            }
            return;
        }

        let Some((x, y)) = self.node_target(node) else {
            return;
        };
        match self.config.preview.animated_scroll {
            AnimatedScroll::Always | AnimatedScroll::Autosync => self.scroll_to(x, y),
            AnimatedScroll::Off => self.goto(x, y),
        }
    }

    /// Runs deferred work: collects the render cache when a miss asked for
    /// it. Returns the number of pages dropped.
    pub fn run_idle(&mut self) -> usize {
        if !self.cache.take_scheduled_gc() {
            return 0;
        }
        let fov = self.field_of_view();
        let budget = self.config.cache_budget_bytes();
        self.cache.evict(&self.document, &fov, budget)
    }

    /// Every page whose outer box meets the view, with its bitmap, rendered
    /// on demand.
    pub fn paint_list(&mut self) -> Vec<PagePlacement> {
        let Some(backend) = self.backend.clone() else {
            return Vec::new();
        };

        let fov = self.field_of_view();
        let device_scale = self.viewport.device_scale_factor();
        let scale = self.document.scale;
        let visible: Vec<usize> = self
            .document
            .pages()
            .iter()
            .enumerate()
            .filter(|(_, page)| page.outer.intersects(&fov))
            .map(|(index, _)| index)
            .collect();

        let mut placements = Vec::with_capacity(visible.len());
        for index in visible {
            let bitmap = match self
                .cache
                .get(&self.document, backend.as_ref(), index, device_scale)
            {
                Ok(bitmap) => bitmap,
                Err(err) => {
                    warn!(page = index, %err, "skipping page");
                    continue;
                }
            };
            let inner = self.document.pages()[index].inner;
            let markers = self
                .sync
                .on_page(index)
                .map(|node| SyncMarker {
                    rect: Rect::new(
                        node.x * scale,
                        node.y * scale,
                        node.width * scale,
                        node.height * scale,
                    ),
                    selected: node.is_selected(),
                    matched: node.score > 0,
                })
                .collect();
            placements.push(PagePlacement {
                page: index,
                x: inner.x - fov.x,
                y: inner.y - fov.y,
                width: inner.width,
                height: inner.height,
                bitmap,
                paint_scale: 1.0 / device_scale,
                markers,
            });
        }
        placements
    }

    pub fn apply(&mut self, command: Command) {
        match command {
            Command::NextPage { count } => self.next_page(count),
            Command::PrevPage { count } => self.prev_page(count),
            Command::GotoPage { page } => self.goto_page(page),
            Command::ZoomIn { steps } => self.zoom_steps(true, steps),
            Command::ZoomOut { steps } => self.zoom_steps(false, steps),
            Command::SetZoom(zoom) => self.set_zoom(zoom),
            Command::SetLayout(mode) => self.set_layout_mode(mode),
            Command::ToggleLayout => self.set_layout_mode(self.document.layout_mode.toggled()),
            Command::TogglePause => self.set_paused(!self.config.compile.pause),
            Command::Pan { delta_x, delta_y } => self.pan(delta_x, delta_y),
            Command::ForwardSync(anchor) => {
                if self.forward_sync(&anchor).is_none() {
                    self.emit(PreviewEvent::Status(format!(
                        "no unique match for {}:{}",
                        anchor.position.file.display(),
                        anchor.position.line
                    )));
                }
            }
        }
    }
}
