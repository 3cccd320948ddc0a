use serde::{Deserialize, Serialize};

use crate::geometry::LayeredRect;
use crate::PageSize;

/// Smallest scale the fit solver will hand out when the view is too small to
/// hold anything.
const MIN_SCALE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LayoutMode {
    #[serde(rename = "single_page")]
    SinglePage,
    #[default]
    #[serde(rename = "one_column")]
    Continuous,
}

impl LayoutMode {
    pub fn toggled(self) -> Self {
        match self {
            LayoutMode::SinglePage => LayoutMode::Continuous,
            LayoutMode::Continuous => LayoutMode::SinglePage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitMode {
    #[default]
    FitWidth,
    FitBoth,
    Numeric,
}

/// Size of one scrollable axis: either a fixed extent or "whatever the view
/// is", which leaves nothing to scroll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Extent {
    Fixed(f64),
    FitView,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutMetrics {
    pub document_margin: f64,
    pub page_margin: f64,
    pub shadow_width: f64,
    pub shadow_offset: f64,
}

impl Default for LayoutMetrics {
    fn default() -> Self {
        Self {
            document_margin: 20.0,
            page_margin: 10.0,
            shadow_width: 5.0,
            shadow_offset: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub size: PageSize,
    /// Scaled page box in document pixel space.
    pub inner: LayeredRect,
    /// `inner` plus border and drop shadow.
    pub outer: LayeredRect,
}

impl Page {
    fn new(size: PageSize) -> Self {
        Self {
            size,
            inner: LayeredRect::default(),
            outer: LayeredRect::default(),
        }
    }
}

/// Page geometry and presentation state of the loaded document.
#[derive(Debug, Clone)]
pub struct Document {
    pages: Vec<Page>,
    pub layout_mode: LayoutMode,
    pub scale: f64,
    pub fit_mode: FitMode,
    current_page: Option<usize>,
    metrics: LayoutMetrics,
}

impl Document {
    pub fn new(metrics: LayoutMetrics) -> Self {
        Self {
            pages: Vec::new(),
            layout_mode: LayoutMode::default(),
            scale: 1.0,
            fit_mode: FitMode::default(),
            current_page: None,
            metrics,
        }
    }

    /// Swaps in a freshly read page list, keeping scale and modes. The current
    /// page is clamped into the new range.
    pub fn replace_pages(&mut self, sizes: &[PageSize]) {
        self.pages = sizes.iter().copied().map(Page::new).collect();
        self.current_page = match (self.pages.len(), self.current_page) {
            (0, _) => None,
            (count, Some(page)) => Some(page.min(count - 1)),
            (_, None) => Some(0),
        };
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.current_page = None;
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn metrics(&self) -> &LayoutMetrics {
        &self.metrics
    }

    pub fn current_page(&self) -> Option<usize> {
        self.current_page
    }

    /// Clamps into range; returns whether the current page changed.
    pub fn set_current_page(&mut self, page: usize) -> bool {
        if self.pages.is_empty() {
            return false;
        }
        let page = page.min(self.pages.len() - 1);
        let changed = self.current_page != Some(page);
        self.current_page = Some(page);
        changed
    }

    /// Margin around the whole document; single-page layout has none.
    pub fn document_margin(&self) -> f64 {
        match self.layout_mode {
            LayoutMode::SinglePage => 0.0,
            LayoutMode::Continuous => self.metrics.document_margin,
        }
    }

    pub fn page_margin(&self) -> f64 {
        self.metrics.page_margin
    }

    pub fn width_pages(&self) -> f64 {
        self.pages
            .iter()
            .map(|page| page.size.width)
            .fold(0.0, f64::max)
    }

    pub fn height_pages(&self) -> f64 {
        self.pages.iter().map(|page| page.size.height).sum()
    }

    fn max_page_height(&self) -> f64 {
        self.pages
            .iter()
            .map(|page| page.size.height)
            .fold(0.0, f64::max)
    }

    fn current_page_height(&self) -> f64 {
        self.current_page
            .and_then(|page| self.pages.get(page))
            .map(|page| page.size.height)
            .unwrap_or(0.0)
    }

    pub fn width_scaled(&self) -> f64 {
        self.width_pages() * self.scale
    }

    pub fn height_scaled(&self) -> f64 {
        match self.layout_mode {
            LayoutMode::Continuous => {
                let gaps = self.pages.len().saturating_sub(1) as f64 * self.page_margin();
                self.height_pages() * self.scale + gaps
            }
            LayoutMode::SinglePage => self.current_page_height() * self.scale,
        }
    }

    /// Scrollable size of the drawing area for the current fit mode.
    pub fn content_extent(&self) -> (Extent, Extent) {
        let margins = 2.0 * self.document_margin();
        let width = Extent::Fixed(self.width_scaled() + margins);
        let height = Extent::Fixed(self.height_scaled() + margins);

        match self.fit_mode {
            FitMode::Numeric => (width, height),
            FitMode::FitWidth => (Extent::FitView, height),
            FitMode::FitBoth => match self.layout_mode {
                LayoutMode::Continuous => (Extent::FitView, height),
                LayoutMode::SinglePage => (Extent::FitView, Extent::FitView),
            },
        }
    }

    /// Lays pages out in document pixel space for the given field of view.
    pub fn compute_positions(&mut self, fov: &LayeredRect) {
        let dm = self.document_margin();
        let pm = self.page_margin();
        let scale = self.scale;
        let shadow = self.metrics.shadow_width;

        match self.layout_mode {
            LayoutMode::Continuous => {
                let mut y = dm;
                for page in &mut self.pages {
                    let width = page.size.width * scale;
                    let height = page.size.height * scale;
                    let x = ((fov.width - width) / 2.0).max(dm);
                    page.inner = LayeredRect::new(x, y, width, height, 0);
                    y += height + pm;
                }
                if !self.pages.is_empty() {
                    y -= pm;
                }
                y += dm;

                // short documents are centered vertically
                if y < fov.height {
                    let shift = (fov.height - y) / 2.0;
                    for page in &mut self.pages {
                        page.inner.y += shift;
                    }
                }
            }
            LayoutMode::SinglePage => {
                for (index, page) in self.pages.iter_mut().enumerate() {
                    let width = page.size.width * scale;
                    let height = page.size.height * scale;
                    let x = ((fov.width - width) / 2.0).max(dm);
                    let y = ((fov.height - height) / 2.0).max(dm);
                    page.inner = LayeredRect::new(x, y, width, height, index);
                }
            }
        }

        for page in &mut self.pages {
            page.outer = page.inner.with_shadow(shadow);
        }
    }

    /// Scale that realises the active fit mode for a view of
    /// `outer_width`×`outer_height` (scrollbars included) whose vertical
    /// scrollbar, when shown, is `vbar_width` wide.
    ///
    /// Returns `None` in numeric mode or when there is nothing to fit.
    pub fn solve_fit_scale(
        &self,
        outer_width: f64,
        outer_height: f64,
        vbar_width: f64,
    ) -> Option<f64> {
        if self.fit_mode == FitMode::Numeric || self.pages.is_empty() {
            return None;
        }

        let dm = self.document_margin();
        let width_scaling = self.width_pages();
        let height_scaling = match self.layout_mode {
            LayoutMode::Continuous => self.max_page_height(),
            LayoutMode::SinglePage => self.current_page_height(),
        };
        let full_height_scaling = self.height_pages();
        if width_scaling <= 0.0 || height_scaling <= 0.0 || full_height_scaling <= 0.0 {
            return None;
        }

        let non_scaling = 2.0 * dm;
        let full_height_non_scaling =
            (self.pages.len() - 1) as f64 * self.page_margin() + 2.0 * dm;

        let scale_height_without_bar = (outer_height - non_scaling) / height_scaling;
        let scale_full_height_without_bar =
            (outer_height - full_height_non_scaling) / full_height_scaling;
        let scale_width_without_bar = (outer_width - non_scaling) / width_scaling;
        let scale_width_with_bar = (outer_width - vbar_width - non_scaling) / width_scaling;

        let mut scale_both = scale_width_without_bar.min(scale_height_without_bar);
        let scale_both_full = scale_width_without_bar.min(scale_full_height_without_bar);
        let scale_width = scale_width_with_bar.max(scale_both_full);

        // The whole document would not fit even at "both" scale, so a
        // scrollbar appears and eats into the width.
        if scale_full_height_without_bar < scale_both {
            scale_both =
                scale_both_full.max(scale_width_with_bar.min(scale_height_without_bar));
        }

        let scale = match self.fit_mode {
            FitMode::FitWidth => scale_width,
            FitMode::FitBoth => scale_both,
            FitMode::Numeric => return None,
        };
        Some(scale.max(MIN_SCALE))
    }

    /// Maps a point in document pixel space to a page and page-local pixel
    /// offsets (still scaled).
    ///
    /// Single-page layout only considers the current page. Continuous layout
    /// picks the last page starting above the point, so clicks in the gaps
    /// resolve to the page above.
    pub fn page_at(&self, x: f64, y: f64) -> Option<(usize, f64, f64)> {
        let index = match self.layout_mode {
            LayoutMode::SinglePage => self.current_page?,
            LayoutMode::Continuous => self
                .pages
                .iter()
                .rposition(|page| y >= page.inner.y)
                .unwrap_or(0),
        };
        let page = self.pages.get(index)?;
        Some((index, x - page.inner.x, y - page.inner.y))
    }

    /// Vertical scroll offset that brings `page` to the top in continuous
    /// layout.
    pub fn page_offset(&self, page: usize) -> f64 {
        match (self.pages.first(), self.pages.get(page)) {
            (Some(first), Some(target)) => target.inner.y - first.inner.y,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(sizes: &[(f64, f64)], mode: LayoutMode) -> Document {
        let mut doc = Document::new(LayoutMetrics::default());
        doc.layout_mode = mode;
        let sizes: Vec<PageSize> = sizes.iter().map(|&(w, h)| PageSize::new(w, h)).collect();
        doc.replace_pages(&sizes);
        doc
    }

    fn fov(width: f64, height: f64) -> LayeredRect {
        LayeredRect::new(0.0, 0.0, width, height, 0)
    }

    #[test]
    fn continuous_layout_stacks_pages_with_margins() {
        let mut doc = document(&[(600.0, 800.0), (600.0, 800.0)], LayoutMode::Continuous);
        doc.compute_positions(&fov(700.0, 500.0));

        let pages = doc.pages();
        assert_eq!(pages[0].inner, LayeredRect::new(50.0, 20.0, 600.0, 800.0, 0));
        assert_eq!(pages[1].inner, LayeredRect::new(50.0, 830.0, 600.0, 800.0, 0));
        assert_eq!(pages[1].outer, LayeredRect::new(49.0, 829.0, 605.0, 805.0, 0));
    }

    #[test]
    fn narrow_view_keeps_document_margin_on_the_left() {
        let mut doc = document(&[(600.0, 800.0)], LayoutMode::Continuous);
        doc.compute_positions(&fov(300.0, 500.0));
        assert_eq!(doc.pages()[0].inner.x, 20.0);
    }

    #[test]
    fn short_document_is_centered_vertically() {
        let mut doc = document(&[(100.0, 100.0)], LayoutMode::Continuous);
        doc.compute_positions(&fov(500.0, 500.0));
        // content is 140 high (100 + 2 * 20), leaving 360 to split
        assert_eq!(doc.pages()[0].inner.y, 20.0 + 180.0);
    }

    #[test]
    fn single_page_layout_puts_each_page_on_its_own_layer() {
        let mut doc = document(&[(100.0, 100.0), (200.0, 300.0)], LayoutMode::SinglePage);
        doc.compute_positions(&fov(400.0, 400.0));

        let pages = doc.pages();
        assert_eq!(pages[0].inner, LayeredRect::new(150.0, 150.0, 100.0, 100.0, 0));
        assert_eq!(pages[1].inner, LayeredRect::new(100.0, 50.0, 200.0, 300.0, 1));
        assert_eq!(doc.document_margin(), 0.0);
    }

    #[test]
    fn height_scaled_counts_page_gaps_only_when_continuous() {
        let mut doc = document(&[(100.0, 200.0), (100.0, 300.0)], LayoutMode::Continuous);
        doc.scale = 2.0;
        assert_eq!(doc.height_scaled(), 1000.0 + 10.0);
        assert_eq!(doc.width_scaled(), 200.0);

        doc.layout_mode = LayoutMode::SinglePage;
        doc.set_current_page(1);
        assert_eq!(doc.height_scaled(), 600.0);
    }

    #[test]
    fn fit_width_uses_view_minus_scrollbar_for_long_documents() {
        let mut doc = document(
            &[(600.0, 800.0), (600.0, 800.0), (600.0, 800.0)],
            LayoutMode::Continuous,
        );
        doc.fit_mode = FitMode::FitWidth;

        // (660 - 20 - 40) / 600
        let scale = doc.solve_fit_scale(660.0, 500.0, 20.0).unwrap();
        assert!((scale - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fit_both_fits_tallest_page_height() {
        let mut doc = document(&[(600.0, 800.0), (600.0, 800.0)], LayoutMode::Continuous);
        doc.fit_mode = FitMode::FitBoth;

        // height without bar: (440 - 40) / 800 = 0.5, width with bar: (1000 - 20 - 40) / 600
        let scale = doc.solve_fit_scale(1000.0, 440.0, 20.0).unwrap();
        assert!((scale - 0.5).abs() < 1e-9);
    }

    #[test]
    fn fit_scale_is_none_in_numeric_mode() {
        let mut doc = document(&[(600.0, 800.0)], LayoutMode::Continuous);
        doc.fit_mode = FitMode::Numeric;
        assert!(doc.solve_fit_scale(1000.0, 1000.0, 20.0).is_none());
    }

    #[test]
    fn fit_scale_never_drops_to_zero() {
        let mut doc = document(&[(600.0, 800.0)], LayoutMode::Continuous);
        doc.fit_mode = FitMode::FitWidth;
        assert_eq!(doc.solve_fit_scale(10.0, 10.0, 20.0), Some(MIN_SCALE));
    }

    #[test]
    fn content_extent_follows_fit_mode() {
        let mut doc = document(&[(100.0, 100.0)], LayoutMode::SinglePage);
        doc.fit_mode = FitMode::FitBoth;
        assert_eq!(doc.content_extent(), (Extent::FitView, Extent::FitView));

        doc.layout_mode = LayoutMode::Continuous;
        assert_eq!(
            doc.content_extent(),
            (Extent::FitView, Extent::Fixed(140.0))
        );

        doc.fit_mode = FitMode::Numeric;
        assert_eq!(
            doc.content_extent(),
            (Extent::Fixed(140.0), Extent::Fixed(140.0))
        );
    }

    #[test]
    fn replacing_pages_clamps_current_page() {
        let mut doc = document(&[(1.0, 1.0); 5], LayoutMode::Continuous);
        doc.set_current_page(4);
        doc.replace_pages(&[PageSize::new(1.0, 1.0); 2]);
        assert_eq!(doc.current_page(), Some(1));

        doc.replace_pages(&[]);
        assert_eq!(doc.current_page(), None);
    }

    #[test]
    fn page_at_resolves_gaps_to_page_above() {
        let mut doc = document(&[(100.0, 100.0), (100.0, 100.0)], LayoutMode::Continuous);
        doc.compute_positions(&fov(140.0, 100.0));

        // page 0 spans y 20..120, gap until 130
        assert_eq!(doc.page_at(30.0, 125.0), Some((0, 10.0, 105.0)));
        assert_eq!(doc.page_at(30.0, 135.0), Some((1, 10.0, 5.0)));
        assert_eq!(doc.page_offset(1), 110.0);
    }
}
