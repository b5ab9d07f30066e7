//! Zoom and pan of the canvas stage.
//!
//! Screen coordinates are relative to the canvas origin. Display space is
//! the unzoomed stage; `screen = pan + display * zoom`.

use crate::coords::{Point, Size};

pub const MIN_ZOOM: f32 = 1.0;
pub const MAX_ZOOM: f32 = 10.0;
pub const ZOOM_STEP: f32 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub zoom: f32,
    pub pan: Point,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            zoom: MIN_ZOOM,
            pan: Point::ZERO,
        }
    }
}

impl Viewport {
    pub fn screen_to_display(&self, screen: Point) -> Point {
        Point::new((screen.x - self.pan.x) / self.zoom, (screen.y - self.pan.y) / self.zoom)
    }

    pub fn display_to_screen(&self, display: Point) -> Point {
        Point::new(display.x * self.zoom + self.pan.x, display.y * self.zoom + self.pan.y)
    }

    /// Step the zoom by one wheel notch around `pointer` (screen space).
    ///
    /// Returns `false` when the step would leave `[MIN_ZOOM, MAX_ZOOM]`, in
    /// which case nothing changes.
    pub fn zoom_at(&mut self, pointer: Point, zoom_in: bool, stage: Size) -> bool {
        let direction = if zoom_in { 1.0 } else { -1.0 };
        let new_zoom = self.zoom + direction * ZOOM_STEP;
        // Accumulated 0.1 steps drift; compare with a little slack.
        if new_zoom < MIN_ZOOM - 1e-4 || new_zoom > MAX_ZOOM + 1e-4 {
            return false;
        }
        let new_zoom = new_zoom.clamp(MIN_ZOOM, MAX_ZOOM);

        let anchor = self.screen_to_display(pointer);
        self.zoom = new_zoom;
        self.pan = Point::new(pointer.x - anchor.x * new_zoom, pointer.y - anchor.y * new_zoom);
        self.pan = self.clamp_pan(self.pan, stage);
        true
    }

    /// Pan by a screen-space delta, keeping the stage over the frame.
    pub fn pan_by(&mut self, delta: Point, stage: Size) {
        self.pan = self.clamp_pan(self.pan.offset(delta), stage);
    }

    /// The zoomed stage must always cover the frame it sits in: no empty
    /// band may appear on the left/top or right/bottom.
    pub fn clamp_pan(&self, pan: Point, stage: Size) -> Point {
        Point::new(
            clamp_axis(pan.x, stage.width, self.zoom),
            clamp_axis(pan.y, stage.height, self.zoom),
        )
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn clamp_axis(value: f32, size: f32, zoom: f32) -> f32 {
    let overflow = size * zoom - size;
    if overflow <= 0.0 {
        return 0.0;
    }
    value.clamp(-overflow, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAGE: Size = Size {
        width: 800.0,
        height: 600.0,
    };

    #[test]
    fn identity_at_default() {
        let v = Viewport::default();
        let p = Point::new(12.0, 34.0);
        assert_eq!(v.screen_to_display(p), p);
        assert_eq!(v.display_to_screen(p), p);
    }

    #[test]
    fn cannot_zoom_out_below_one() {
        let mut v = Viewport::default();
        assert!(!v.zoom_at(Point::new(10.0, 10.0), false, STAGE));
        assert_eq!(v, Viewport::default());
    }

    #[test]
    fn cannot_zoom_past_ten() {
        let mut v = Viewport::default();
        let mut steps = 0;
        while v.zoom_at(Point::new(400.0, 300.0), true, STAGE) {
            steps += 1;
            assert!(steps < 200);
        }
        assert!((v.zoom - MAX_ZOOM).abs() < 1e-3);
        assert_eq!(steps, 90);
    }

    #[test]
    fn zoom_keeps_pointer_anchored() {
        let mut v = Viewport::default();
        let pointer = Point::new(400.0, 300.0);
        let before = v.screen_to_display(pointer);
        assert!(v.zoom_at(pointer, true, STAGE));
        assert!(v.zoom_at(pointer, true, STAGE));
        let after = v.screen_to_display(pointer);
        assert!((before.x - after.x).abs() < 1e-3);
        assert!((before.y - after.y).abs() < 1e-3);
    }

    #[test]
    fn pan_is_clamped_to_stage() {
        let mut v = Viewport {
            zoom: 2.0,
            pan: Point::ZERO,
        };
        v.pan_by(Point::new(50.0, 50.0), STAGE);
        assert_eq!(v.pan, Point::ZERO);
        v.pan_by(Point::new(-5000.0, -5000.0), STAGE);
        assert_eq!(v.pan, Point::new(-800.0, -600.0));
    }

    #[test]
    fn no_pan_at_unit_zoom() {
        let mut v = Viewport::default();
        v.pan_by(Point::new(-30.0, 20.0), STAGE);
        assert_eq!(v.pan, Point::ZERO);
    }
}
