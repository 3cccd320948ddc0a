/// Axis-aligned rectangle without a layer, used for page-local areas.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
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

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x.max(other.x) < self.right().min(other.right())
            && self.y.max(other.y) < self.bottom().min(other.bottom())
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }
}

/// Rectangle in document pixel space tagged with a layer.
///
/// Rectangles on different layers never intersect. Continuous layout puts
/// every page on layer 0; single-page layout gives each page its own layer so
/// only the current page can meet the field of view.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayeredRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub layer: usize,
}

impl LayeredRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64, layer: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
            layer,
        }
    }

    /// The overlapping area, or `None` when the rectangles are on different
    /// layers or only touch.
    pub fn intersection(&self, other: &LayeredRect) -> Option<LayeredRect> {
        if self.layer != other.layer {
            return None;
        }

        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 > x && y2 > y {
            Some(LayeredRect::new(x, y, x2 - x, y2 - y, self.layer))
        } else {
            None
        }
    }

    pub fn intersects(&self, other: &LayeredRect) -> bool {
        self.intersection(other).is_some()
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    /// Page box plus its drop shadow: shifted one unit up-left and grown by
    /// `shadow` on the bottom and right edges.
    pub fn with_shadow(&self, shadow: f64) -> LayeredRect {
        LayeredRect::new(
            self.x - 1.0,
            self.y - 1.0,
            self.width + shadow,
            self.height + shadow,
            self.layer,
        )
    }
}
