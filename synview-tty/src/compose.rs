use image::imageops::{self, FilterType};
use image::{ImageBuffer, Rgba, RgbaImage};
use synview_core::{PagePlacement, Rect, SyncMarker};
use tracing::warn;

const BACKGROUND: Rgba<u8> = Rgba([0x88, 0x8a, 0x85, 0xff]);
const SHADOW: Rgba<u8> = Rgba([0x55, 0x57, 0x53, 0xff]);
const BORDER: Rgba<u8> = Rgba([0x00, 0x00, 0x00, 0xff]);
const SELECTED_BOX: Rgba<u8> = Rgba([0x4e, 0x9a, 0x06, 0xff]);
const MATCHED_BOX: Rgba<u8> = Rgba([0x34, 0x65, 0xa4, 0xff]);
const PLAIN_BOX: Rgba<u8> = Rgba([0xcc, 0x00, 0x00, 0xff]);
const BOX_STROKE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposeOptions {
    /// Distance of the drop shadow from the page, in view pixels.
    pub shadow_offset: f64,
    /// Outline the sync candidates of each page.
    pub show_sync_boxes: bool,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            shadow_offset: 5.0,
            show_sync_boxes: false,
        }
    }
}

/// Paints the visible pages into one frame of `width` x `height` view pixels.
pub fn compose_frame(
    width: u32,
    height: u32,
    placements: &[PagePlacement],
    options: ComposeOptions,
) -> RgbaImage {
    let mut frame = RgbaImage::from_pixel(width.max(1), height.max(1), BACKGROUND);

    for placement in placements {
        let x = placement.x.round() as i64;
        let y = placement.y.round() as i64;
        let page_width = placement.width.round().max(1.0) as i64;
        let page_height = placement.height.round().max(1.0) as i64;
        let offset = options.shadow_offset.round() as i64;

        fill_rect(&mut frame, x + offset, y + offset, page_width, page_height, SHADOW);
        fill_rect(&mut frame, x - 1, y - 1, page_width + 2, page_height + 2, BORDER);

        let bitmap = &placement.bitmap;
        let Some(source) = ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(
            bitmap.width,
            bitmap.height,
            bitmap.pixels.as_slice(),
        ) else {
            warn!(page = placement.page, "bitmap does not match its dimensions");
            continue;
        };

        let target_width = (f64::from(bitmap.width) * placement.paint_scale).round().max(1.0) as u32;
        let target_height =
            (f64::from(bitmap.height) * placement.paint_scale).round().max(1.0) as u32;
        if (target_width, target_height) == (bitmap.width, bitmap.height) {
            imageops::replace(&mut frame, &source, x, y);
        } else {
            let scaled = imageops::resize(&source, target_width, target_height, FilterType::Triangle);
            imageops::replace(&mut frame, &scaled, x, y);
        }

        if options.show_sync_boxes {
            for marker in &placement.markers {
                outline_marker(&mut frame, x, y, marker);
            }
        }
    }

    frame
}

fn outline_marker(frame: &mut RgbaImage, page_x: i64, page_y: i64, marker: &SyncMarker) {
    let color = if marker.selected {
        SELECTED_BOX
    } else if marker.matched {
        MATCHED_BOX
    } else {
        PLAIN_BOX
    };
    let Rect {
        x,
        y,
        width,
        height,
    } = marker.rect;
    let left = page_x + x.round() as i64;
    let top = page_y + y.round() as i64;
    let width = width.round().max(1.0) as i64;
    let height = height.round().max(1.0) as i64;
    let stroke = i64::from(BOX_STROKE);

    fill_rect(frame, left, top, width, stroke, color);
    fill_rect(frame, left, top + height - stroke, width, stroke, color);
    fill_rect(frame, left, top, stroke, height, color);
    fill_rect(frame, left + width - stroke, top, stroke, height, color);
}

/// Fills the part of the rectangle that lies inside the frame.
fn fill_rect(frame: &mut RgbaImage, x: i64, y: i64, width: i64, height: i64, color: Rgba<u8>) {
    let left = x.max(0);
    let top = y.max(0);
    let right = (x + width).min(i64::from(frame.width()));
    let bottom = (y + height).min(i64::from(frame.height()));
    for py in top..bottom {
        for px in left..right {
            frame.put_pixel(px as u32, py as u32, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use synview_core::PageBitmap;

    fn placement(x: f64, y: f64, size: u32, paint_scale: f64) -> PagePlacement {
        let painted = f64::from(size) * paint_scale;
        PagePlacement {
            page: 0,
            x,
            y,
            width: painted,
            height: painted,
            bitmap: Arc::new(PageBitmap::blank(size, size)),
            paint_scale,
            markers: Vec::new(),
        }
    }

    const WHITE: Rgba<u8> = Rgba([0xff, 0xff, 0xff, 0xff]);

    #[test]
    fn empty_frame_is_background() {
        let frame = compose_frame(4, 3, &[], ComposeOptions::default());
        assert_eq!(frame.dimensions(), (4, 3));
        assert!(frame.pixels().all(|pixel| *pixel == BACKGROUND));
    }

    #[test]
    fn page_is_framed_by_border_and_shadow() {
        let frame = compose_frame(40, 40, &[placement(10.0, 10.0, 10, 1.0)], ComposeOptions::default());

        assert_eq!(*frame.get_pixel(10, 10), WHITE);
        assert_eq!(*frame.get_pixel(19, 19), WHITE);
        assert_eq!(*frame.get_pixel(9, 9), BORDER);
        assert_eq!(*frame.get_pixel(20, 15), BORDER);
        assert_eq!(*frame.get_pixel(22, 22), SHADOW);
        assert_eq!(*frame.get_pixel(30, 30), BACKGROUND);
    }

    #[test]
    fn pages_partially_outside_the_view_are_clipped() {
        let frame = compose_frame(10, 10, &[placement(-5.0, -5.0, 10, 1.0)], ComposeOptions::default());
        assert_eq!(*frame.get_pixel(0, 0), WHITE);
        assert_eq!(*frame.get_pixel(4, 4), WHITE);
        assert_eq!(*frame.get_pixel(5, 5), BORDER);
    }

    #[test]
    fn hidpi_bitmaps_are_scaled_down_to_view_pixels() {
        let frame = compose_frame(40, 40, &[placement(5.0, 5.0, 20, 0.5)], ComposeOptions::default());
        assert_eq!(*frame.get_pixel(5, 5), WHITE);
        assert_eq!(*frame.get_pixel(14, 14), WHITE);
        assert_eq!(*frame.get_pixel(15, 10), BORDER);
    }

    #[test]
    fn sync_boxes_are_drawn_only_when_enabled() {
        let mut page = placement(0.0, 0.0, 20, 1.0);
        page.markers = vec![
            SyncMarker {
                rect: Rect::new(2.0, 2.0, 6.0, 6.0),
                selected: true,
                matched: false,
            },
            SyncMarker {
                rect: Rect::new(10.0, 10.0, 6.0, 6.0),
                selected: false,
                matched: false,
            },
        ];

        let hidden = compose_frame(30, 30, std::slice::from_ref(&page), ComposeOptions::default());
        assert_eq!(*hidden.get_pixel(2, 2), WHITE);

        let options = ComposeOptions {
            show_sync_boxes: true,
            ..ComposeOptions::default()
        };
        let shown = compose_frame(30, 30, &[page], options);
        assert_eq!(*shown.get_pixel(2, 2), SELECTED_BOX);
        assert_eq!(*shown.get_pixel(7, 4), SELECTED_BOX);
        assert_eq!(*shown.get_pixel(5, 5), WHITE);
        assert_eq!(*shown.get_pixel(10, 15), PLAIN_BOX);
    }
}
