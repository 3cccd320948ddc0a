use std::time::Duration;

use tracing::trace;

use crate::geometry::LayeredRect;
use crate::layout::Extent;

pub const ANIMATION_STEPS: u32 = 25;
/// Animation ticks run at 25 Hz.
pub const ANIMATION_INTERVAL: Duration = Duration::from_millis(1000 / 25);

const EASE_A: f64 = 3.0 / 8.0;
const EASE_B: f64 = -10.0 / 8.0;
const EASE_C: f64 = 15.0 / 8.0;

/// Odd quintic easing on `[-1, 1]`: `f(-1) = -1`, `f(1) = 1`, flat at both
/// ends.
pub fn ease(t: f64) -> f64 {
    let t2 = t * t;
    ((EASE_A * t2 + EASE_B) * t2 + EASE_C) * t
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollPosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ScrollAnimation {
    steps_left: u32,
    end: ScrollPosition,
    /// start minus end, per axis
    distance: ScrollPosition,
}

/// Scroll state of the drawing area.
///
/// The outer size includes scrollbars. Scrollbars take space only while the
/// content overflows along their axis.
#[derive(Debug, Clone)]
pub struct Viewport {
    offset: ScrollPosition,
    outer_width: f64,
    outer_height: f64,
    content: (Extent, Extent),
    vbar_width: f64,
    hbar_height: f64,
    device_scale: Option<f64>,
    saved: ScrollPosition,
    error_mode: bool,
    animation: Option<ScrollAnimation>,
    notifications_blocked: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl Viewport {
    /// A viewport without scrollbar thickness; hosts that draw real
    /// scrollbars set it with [`Viewport::set_scrollbar_thickness`].
    pub fn new(vbar_width: f64, hbar_height: f64) -> Self {
        Self {
            offset: ScrollPosition::default(),
            outer_width: 0.0,
            outer_height: 0.0,
            content: (Extent::FitView, Extent::FitView),
            vbar_width,
            hbar_height,
            device_scale: None,
            saved: ScrollPosition::default(),
            error_mode: false,
            animation: None,
            notifications_blocked: false,
        }
    }

    pub fn set_scrollbar_thickness(&mut self, vbar_width: f64, hbar_height: f64) {
        self.vbar_width = vbar_width;
        self.hbar_height = hbar_height;
        self.clamp_offset();
    }

    pub fn vbar_width(&self) -> f64 {
        self.vbar_width
    }

    pub fn outer_size(&self) -> (f64, f64) {
        (self.outer_width, self.outer_height)
    }

    pub fn set_outer_size(&mut self, width: f64, height: f64) {
        self.outer_width = width.max(0.0);
        self.outer_height = height.max(0.0);
        self.clamp_offset();
    }

    pub fn set_content(&mut self, width: Extent, height: Extent) {
        self.content = (width, height);
        self.clamp_offset();
    }

    fn overflows(extent: Extent, available: f64) -> bool {
        match extent {
            Extent::Fixed(size) => size > available,
            Extent::FitView => false,
        }
    }

    /// Visibility of (vertical, horizontal) scrollbars.
    pub fn scrollbars(&self) -> (bool, bool) {
        let (width, height) = self.content;
        let mut vertical = Self::overflows(height, self.outer_height);
        let available_width = self.outer_width - if vertical { self.vbar_width } else { 0.0 };
        let horizontal = Self::overflows(width, available_width);
        if horizontal && !vertical {
            vertical = Self::overflows(height, self.outer_height - self.hbar_height);
        }
        (vertical, horizontal)
    }

    pub fn view_width(&self) -> f64 {
        let (vertical, _) = self.scrollbars();
        (self.outer_width - if vertical { self.vbar_width } else { 0.0 }).max(0.0)
    }

    pub fn view_height(&self) -> f64 {
        let (_, horizontal) = self.scrollbars();
        (self.outer_height - if horizontal { self.hbar_height } else { 0.0 }).max(0.0)
    }

    pub fn content_width(&self) -> f64 {
        match self.content.0 {
            Extent::Fixed(width) => width,
            Extent::FitView => self.view_width(),
        }
    }

    pub fn content_height(&self) -> f64 {
        match self.content.1 {
            Extent::Fixed(height) => height,
            Extent::FitView => self.view_height(),
        }
    }

    pub fn max_offset(&self) -> ScrollPosition {
        ScrollPosition {
            x: (self.content_width() - self.view_width()).max(0.0),
            y: (self.content_height() - self.view_height()).max(0.0),
        }
    }

    pub fn offset(&self) -> ScrollPosition {
        self.offset
    }

    /// Visible part of the document in document pixel space.
    pub fn field_of_view(&self, layer: usize) -> LayeredRect {
        LayeredRect::new(
            self.offset.x,
            self.offset.y,
            self.view_width(),
            self.view_height(),
            layer,
        )
    }

    fn clamped(&self, x: f64, y: f64) -> ScrollPosition {
        let max = self.max_offset();
        ScrollPosition {
            x: x.clamp(0.0, max.x),
            y: y.clamp(0.0, max.y),
        }
    }

    /// Pulls the offset back into range after the view or content shrank. A
    /// moved offset ends any running animation.
    fn clamp_offset(&mut self) {
        let clamped = self.clamped(self.offset.x, self.offset.y);
        if clamped != self.offset {
            self.animation = None;
            self.offset = clamped;
        }
    }

    fn write_offset(&mut self, position: ScrollPosition) {
        self.offset = position;
        self.save_position();
    }

    /// Jumps to `(x, y)`, clamped to the scrollable range. Non-finite values
    /// are ignored. Cancels a running animation.
    pub fn goto(&mut self, x: f64, y: f64) -> bool {
        if !x.is_finite() || !y.is_finite() {
            return false;
        }
        self.animation = None;
        let target = self.clamped(x, y);
        let changed = target != self.offset;
        self.write_offset(target);
        changed
    }

    /// Starts an eased scroll towards `(x, y)`. Call [`Viewport::step`] once
    /// per [`ANIMATION_INTERVAL`] to advance it.
    pub fn animate_to(&mut self, x: f64, y: f64) {
        if !x.is_finite() || !y.is_finite() {
            return;
        }
        let end = self.clamped(x, y);
        self.animation = Some(ScrollAnimation {
            steps_left: ANIMATION_STEPS,
            end,
            distance: ScrollPosition {
                x: self.offset.x - end.x,
                y: self.offset.y - end.y,
            },
        });
        trace!(x = end.x, y = end.y, "scroll animation started");
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    pub fn cancel_animation(&mut self) {
        self.animation = None;
    }

    /// Advances the animation by one tick; returns whether more ticks follow.
    pub fn step(&mut self) -> bool {
        let Some(animation) = self.animation.as_mut() else {
            return false;
        };

        match animation.steps_left {
            0 => {
                self.animation = None;
                false
            }
            1 => {
                let end = animation.end;
                self.animation = None;
                let end = self.clamped(end.x, end.y);
                self.write_offset(end);
                false
            }
            _ => {
                animation.steps_left -= 1;
                let r = 2.0 * f64::from(animation.steps_left) / f64::from(ANIMATION_STEPS) - 1.0;
                let relative = 0.5 * ease(r) + 0.5;
                let x = animation.end.x + animation.distance.x * relative;
                let y = animation.end.y + animation.distance.y * relative;
                let position = self.clamped(x, y);
                self.write_offset(position);
                true
            }
        }
    }

    /// Runs `f` with offset-change notifications suppressed, so hosts can
    /// tell programmatic writes apart from user scrolling.
    pub fn quietly<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.notifications_blocked;
        self.notifications_blocked = true;
        let result = f(self);
        self.notifications_blocked = previous;
        result
    }

    pub fn notifications_blocked(&self) -> bool {
        self.notifications_blocked
    }

    pub fn device_scale_factor(&self) -> f64 {
        self.device_scale.unwrap_or(1.0)
    }

    /// Returns whether the effective factor changed.
    pub fn set_device_scale_factor(&mut self, factor: Option<f64>) -> bool {
        let factor = factor.filter(|value| value.is_finite() && *value > 0.0);
        let changed = factor.unwrap_or(1.0) != self.device_scale_factor();
        self.device_scale = factor;
        changed
    }

    /// Remembers the current offset unless an error display is active.
    pub fn save_position(&mut self) {
        if !self.error_mode {
            self.saved = self.offset;
        }
    }

    pub fn saved_position(&self) -> ScrollPosition {
        self.saved
    }

    pub fn restore_position(&mut self) -> bool {
        let saved = self.saved;
        self.goto(saved.x, saved.y)
    }

    pub fn error_mode(&self) -> bool {
        self.error_mode
    }

    pub fn set_error_mode(&mut self, active: bool) {
        self.error_mode = active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scrollable(width: f64, height: f64) -> Viewport {
        let mut viewport = Viewport::new(10.0, 10.0);
        viewport.set_outer_size(200.0, 100.0);
        viewport.set_content(Extent::Fixed(width), Extent::Fixed(height));
        viewport
    }

    #[test]
    fn easing_hits_endpoints() {
        assert!((ease(-1.0) + 1.0).abs() < 1e-12);
        assert!((ease(1.0) - 1.0).abs() < 1e-12);
        assert_eq!(ease(0.0), 0.0);
    }

    #[test]
    fn scrollbars_take_space_only_when_content_overflows() {
        let viewport = scrollable(150.0, 1000.0);
        assert_eq!(viewport.scrollbars(), (true, false));
        assert_eq!(viewport.view_width(), 190.0);
        assert_eq!(viewport.view_height(), 100.0);

        let viewport = scrollable(150.0, 80.0);
        assert_eq!(viewport.scrollbars(), (false, false));
    }

    #[test]
    fn horizontal_bar_can_force_vertical_bar() {
        let viewport = scrollable(500.0, 95.0);
        assert_eq!(viewport.scrollbars(), (true, true));
    }

    #[test]
    fn goto_clamps_and_ignores_nan() {
        let mut viewport = scrollable(150.0, 1000.0);
        assert!(viewport.goto(0.0, 5000.0));
        assert_eq!(viewport.offset(), ScrollPosition { x: 0.0, y: 900.0 });

        assert!(!viewport.goto(f64::NAN, 10.0));
        assert_eq!(viewport.offset().y, 900.0);
    }

    #[test]
    fn fit_view_content_does_not_scroll() {
        let mut viewport = Viewport::new(10.0, 10.0);
        viewport.set_outer_size(200.0, 100.0);
        viewport.set_content(Extent::FitView, Extent::FitView);
        viewport.goto(50.0, 50.0);
        assert_eq!(viewport.offset(), ScrollPosition::default());
    }

    #[test]
    fn animation_reaches_target_after_all_steps() {
        let mut viewport = scrollable(150.0, 1000.0);
        viewport.animate_to(0.0, 500.0);

        let mut ticks = 0;
        let mut last = 0.0;
        while viewport.step() {
            ticks += 1;
            let y = viewport.offset().y;
            assert!(y >= last, "animation moved backwards");
            last = y;
        }

        assert_eq!(ticks, ANIMATION_STEPS - 1);
        assert_eq!(viewport.offset().y, 500.0);
        assert!(!viewport.is_animating());
    }

    #[test]
    fn goto_cancels_animation() {
        let mut viewport = scrollable(150.0, 1000.0);
        viewport.animate_to(0.0, 500.0);
        viewport.step();
        viewport.goto(0.0, 10.0);

        assert!(!viewport.is_animating());
        assert!(!viewport.step());
        assert_eq!(viewport.offset().y, 10.0);
    }

    #[test]
    fn shrinking_content_clamps_and_cancels_animation() {
        let mut viewport = scrollable(150.0, 1000.0);
        viewport.goto(0.0, 800.0);
        viewport.animate_to(0.0, 900.0);
        viewport.step();

        viewport.set_content(Extent::Fixed(150.0), Extent::Fixed(1000.0));
        assert!(viewport.is_animating());

        viewport.set_content(Extent::Fixed(150.0), Extent::Fixed(400.0));
        assert!(!viewport.is_animating());
        assert_eq!(viewport.offset().y, 300.0);

        viewport.animate_to(0.0, 0.0);
        viewport.set_outer_size(200.0, 300.0);
        assert!(!viewport.is_animating());
        assert_eq!(viewport.offset().y, 100.0);
    }

    #[test]
    fn error_mode_freezes_saved_position() {
        let mut viewport = scrollable(150.0, 1000.0);
        viewport.goto(0.0, 300.0);
        viewport.set_error_mode(true);
        viewport.goto(0.0, 0.0);
        assert_eq!(viewport.saved_position().y, 300.0);

        viewport.restore_position();
        viewport.set_error_mode(false);
        assert_eq!(viewport.offset().y, 300.0);
    }

    #[test]
    fn quiet_writes_block_notifications_only_inside() {
        let mut viewport = scrollable(150.0, 1000.0);
        let blocked = viewport.quietly(|vp| {
            vp.goto(0.0, 10.0);
            vp.notifications_blocked()
        });
        assert!(blocked);
        assert!(!viewport.notifications_blocked());
    }

    #[test]
    fn device_scale_defaults_to_one() {
        let mut viewport = Viewport::default();
        assert_eq!(viewport.device_scale_factor(), 1.0);
        assert!(!viewport.set_device_scale_factor(Some(1.0)));
        assert!(viewport.set_device_scale_factor(Some(2.0)));
        assert!(viewport.set_device_scale_factor(None));
    }
}
