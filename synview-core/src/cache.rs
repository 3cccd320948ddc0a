use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, instrument, trace};

use crate::error::PreviewError;
use crate::geometry::LayeredRect;
use crate::layout::Document;
use crate::{DocumentBackend, PageBitmap, RenderRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub pages: usize,
    pub bytes: u64,
    pub renders: u64,
    pub evictions: u64,
    /// Number of times every rendering was dropped at once.
    pub invalidations: u64,
}

#[derive(Debug)]
struct CacheEntry {
    bitmap: Arc<PageBitmap>,
    footprint: u64,
}

/// Page renderings keyed by page index, with byte accounting.
///
/// Handed-out bitmaps are shared: evicting an entry drops the cache's
/// reference, a paint pass still holding one keeps the pixels alive.
#[derive(Debug, Default)]
pub struct RenderCache {
    entries: HashMap<usize, CacheEntry>,
    bytes: u64,
    gc_scheduled: bool,
    renders: u64,
    evictions: u64,
    invalidations: u64,
}

impl RenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn contains(&self, page: usize) -> bool {
        self.entries.contains_key(&page)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            pages: self.entries.len(),
            bytes: self.bytes,
            renders: self.renders,
            evictions: self.evictions,
            invalidations: self.invalidations,
        }
    }

    /// Returns the rendering of `page`, producing it at the document's scale
    /// times `device_scale` on a miss. Every miss schedules a collection.
    #[instrument(skip(self, document, backend), level = "trace")]
    pub fn get(
        &mut self,
        document: &Document,
        backend: &dyn DocumentBackend,
        page: usize,
        device_scale: f64,
    ) -> Result<Arc<PageBitmap>, PreviewError> {
        if let Some(entry) = self.entries.get(&page) {
            return Ok(Arc::clone(&entry.bitmap));
        }

        let size = document
            .page(page)
            .ok_or(PreviewError::PageOutOfRange {
                page,
                page_count: document.page_count(),
            })?
            .size;
        let scale = document.scale * device_scale;
        let request = RenderRequest {
            page_index: page,
            scale,
            width: (size.width * scale).max(1.0) as u32,
            height: (size.height * scale).max(1.0) as u32,
        };

        let bitmap = backend
            .render_page(request)
            .map_err(|err| PreviewError::Render {
                page,
                reason: format!("{err:#}"),
            })?;
        let footprint = bitmap.byte_len();
        let bitmap = Arc::new(bitmap);

        self.bytes += footprint;
        self.renders += 1;
        self.gc_scheduled = true;
        self.entries.insert(
            page,
            CacheEntry {
                bitmap: Arc::clone(&bitmap),
                footprint,
            },
        );
        trace!(page, footprint, total = self.bytes, "page rendered");
        Ok(bitmap)
    }

    pub fn remove(&mut self, page: usize) -> bool {
        match self.entries.remove(&page) {
            Some(entry) => {
                self.bytes = self.bytes.saturating_sub(entry.footprint);
                self.evictions += 1;
                true
            }
            None => false,
        }
    }

    /// Drops every rendering. The byte counter is reset even when it did not
    /// come out at zero; the mismatch is reported to the caller.
    pub fn invalidate_all(&mut self) -> Result<(), PreviewError> {
        let pages: Vec<usize> = self.entries.keys().copied().collect();
        for page in pages {
            self.remove(page);
        }
        self.invalidations += 1;

        let leftover = std::mem::take(&mut self.bytes);
        if leftover != 0 {
            return Err(PreviewError::CacheAccountingMismatch { bytes: leftover });
        }
        Ok(())
    }

    /// Consumes the flag set by cache misses.
    pub fn take_scheduled_gc(&mut self) -> bool {
        std::mem::take(&mut self.gc_scheduled)
    }

    /// Shrinks the cache once it exceeds `budget`, dropping pages farthest
    /// from the visible range first until usage falls under half the budget.
    /// Returns the number of pages dropped.
    pub fn evict(&mut self, document: &Document, fov: &LayeredRect, budget: u64) -> usize {
        if self.bytes < budget {
            return 0;
        }

        let pages = document.pages();
        let visible = |index: usize| pages[index].inner.intersects(fov);
        let first = (0..pages.len()).find(|&index| visible(index));
        let last = (0..pages.len()).rev().find(|&index| visible(index));

        let (Some(first), Some(last)) = (first, last) else {
            error!(
                bytes = self.bytes,
                budget, "no page intersects the view, dropping every rendering"
            );
            let count = self.entries.len();
            if let Err(err) = self.invalidate_all() {
                error!(%err, "render cache accounting drifted");
            }
            return count;
        };

        let before = self.entries.len();
        let farthest = first.max(pages.len() - 1 - last);
        'walk: for dist in (1..=farthest).rev() {
            let candidates = [first.checked_sub(dist), Some(last + dist)];
            for index in candidates.into_iter().flatten() {
                if index >= pages.len() || visible(index) {
                    continue;
                }
                self.remove(index);
                if self.bytes < budget / 2 {
                    break 'walk;
                }
            }
        }

        let dropped = before - self.entries.len();
        debug!(
            dropped,
            first,
            last,
            bytes = self.bytes,
            budget,
            "render cache collected"
        );
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{LayoutMetrics, LayoutMode};
    use crate::testing::FakeBackend;
    use crate::PageSize;

    fn document(pages: usize) -> Document {
        let mut doc = Document::new(LayoutMetrics::default());
        doc.layout_mode = LayoutMode::Continuous;
        doc.replace_pages(&vec![PageSize::new(10.0, 10.0); pages]);
        doc.compute_positions(&LayeredRect::new(0.0, 0.0, 50.0, 50.0, 0));
        doc
    }

    /// Field of view covering exactly the pages `first..=last`.
    fn fov_over(doc: &Document, first: usize, last: usize) -> LayeredRect {
        let top = doc.pages()[first].inner.y;
        let bottom = doc.pages()[last].inner.y + doc.pages()[last].inner.height;
        LayeredRect::new(0.0, top, 50.0, bottom - top, 0)
    }

    #[test]
    fn miss_renders_once_and_accounts_bytes() {
        let doc = document(3);
        let backend = FakeBackend::uniform(3, 10.0, 10.0);
        let mut cache = RenderCache::new();

        let first = cache.get(&doc, &backend, 1, 2.0).unwrap();
        let second = cache.get(&doc, &backend, 1, 2.0).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!((first.width, first.height), (20, 20));
        assert_eq!(backend.render_count(), 1);
        assert_eq!(cache.bytes(), 20 * 20 * 4);
        assert!(cache.take_scheduled_gc());
        assert!(!cache.take_scheduled_gc());
    }

    #[test]
    fn out_of_range_page_is_an_error() {
        let doc = document(1);
        let backend = FakeBackend::uniform(1, 10.0, 10.0);
        let mut cache = RenderCache::new();
        assert!(matches!(
            cache.get(&doc, &backend, 4, 1.0),
            Err(PreviewError::PageOutOfRange { page: 4, page_count: 1 })
        ));
    }

    #[test]
    fn invalidate_all_zeroes_accounting_and_keeps_handed_out_bitmaps() {
        let doc = document(2);
        let backend = FakeBackend::uniform(2, 10.0, 10.0);
        let mut cache = RenderCache::new();
        let held = cache.get(&doc, &backend, 0, 1.0).unwrap();
        cache.get(&doc, &backend, 1, 1.0).unwrap();

        cache.invalidate_all().unwrap();

        assert_eq!(cache.bytes(), 0);
        assert_eq!(cache.stats().pages, 0);
        assert_eq!(held.pixels.len(), 10 * 10 * 4);
    }

    #[test]
    fn under_budget_does_nothing() {
        let doc = document(3);
        let backend = FakeBackend::uniform(3, 10.0, 10.0);
        let mut cache = RenderCache::new();
        for page in 0..3 {
            cache.get(&doc, &backend, page, 1.0).unwrap();
        }
        let fov = fov_over(&doc, 1, 1);
        assert_eq!(cache.evict(&doc, &fov, 10_000), 0);
        assert_eq!(cache.stats().pages, 3);
    }

    #[test]
    fn eviction_drops_farthest_pages_first() {
        let doc = document(10);
        let backend = FakeBackend::uniform(10, 10.0, 10.0);
        let mut cache = RenderCache::new();
        for page in 0..10 {
            cache.get(&doc, &backend, page, 1.0).unwrap();
        }
        let per_page = 10 * 10 * 4;

        // view on pages 4..=5 with a budget of exactly ten pages: the walk
        // stops once fewer than five pages remain
        let fov = fov_over(&doc, 4, 5);
        assert_eq!(cache.evict(&doc, &fov, 10 * per_page), 6);

        for kept in 3..=6 {
            assert!(cache.contains(kept), "page {kept} should stay cached");
        }
        for dropped in [0, 1, 2, 7, 8, 9] {
            assert!(!cache.contains(dropped), "page {dropped} should be dropped");
        }
        assert_eq!(cache.bytes(), 4 * per_page);
    }

    #[test]
    fn eviction_at_twice_the_budget_stops_below_half_budget() {
        let doc = document(10);
        let backend = FakeBackend::uniform(10, 10.0, 10.0);
        let mut cache = RenderCache::new();
        for page in 0..10 {
            cache.get(&doc, &backend, page, 1.0).unwrap();
        }
        let per_page = 10 * 10 * 4;
        let budget = 5 * per_page;

        let fov = fov_over(&doc, 4, 5);
        cache.evict(&doc, &fov, budget);

        // 3 pages would still be above budget / 2, so only the visible pair stays
        assert_eq!(cache.bytes(), 2 * per_page);
        assert!(cache.bytes() < budget / 2);
        assert_eq!(cache.stats().evictions, 8);
    }

    #[test]
    fn visible_pages_survive_even_when_budget_is_tiny() {
        let doc = document(5);
        let backend = FakeBackend::uniform(5, 10.0, 10.0);
        let mut cache = RenderCache::new();
        for page in 0..5 {
            cache.get(&doc, &backend, page, 1.0).unwrap();
        }

        let fov = fov_over(&doc, 2, 2);
        cache.evict(&doc, &fov, 1);

        assert_eq!(cache.stats().pages, 1);
        assert!(cache.contains(2));
    }

    #[test]
    fn single_page_layout_keeps_only_the_current_page() {
        let mut doc = Document::new(LayoutMetrics::default());
        doc.layout_mode = LayoutMode::SinglePage;
        doc.replace_pages(&vec![PageSize::new(10.0, 10.0); 6]);
        doc.compute_positions(&LayeredRect::new(0.0, 0.0, 50.0, 50.0, 3));
        let backend = FakeBackend::uniform(6, 10.0, 10.0);
        let mut cache = RenderCache::new();
        for page in 0..6 {
            cache.get(&doc, &backend, page, 1.0).unwrap();
        }
        let per_page = 10 * 10 * 4;

        // every page sits at the same spot, only the layer tells them apart
        let fov = LayeredRect::new(0.0, 0.0, 50.0, 50.0, 3);
        assert_eq!(cache.evict(&doc, &fov, per_page), 5);

        assert!(cache.contains(3));
        assert_eq!(cache.stats().pages, 1);
        assert_eq!(cache.bytes(), per_page);
    }

    #[test]
    fn no_visible_page_drops_everything() {
        let doc = document(3);
        let backend = FakeBackend::uniform(3, 10.0, 10.0);
        let mut cache = RenderCache::new();
        for page in 0..3 {
            cache.get(&doc, &backend, page, 1.0).unwrap();
        }

        let elsewhere = LayeredRect::new(0.0, 10_000.0, 50.0, 50.0, 0);
        assert_eq!(cache.evict(&doc, &elsewhere, 1), 3);
        assert_eq!(cache.bytes(), 0);
        assert_eq!(cache.stats().invalidations, 1);
    }
}
