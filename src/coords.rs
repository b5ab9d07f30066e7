//! Conversion between display space (the unzoomed canvas stage) and
//! original space (native pixels of the source image).
//!
//! Annotation geometry is always stored in original space. Anything drawn
//! on screen is derived from it through these functions on every frame.

use serde::{Deserialize, Serialize};

/// A 2-D point. Serialized as `[x, y]` to match the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn offset(&self, by: Point) -> Point {
        Point::new(self.x + by.x, self.y + by.y)
    }
}

impl From<[f32; 2]> for Point {
    fn from([x, y]: [f32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f32; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// Width and height of one coordinate space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// A size is usable once both dimensions are finite and non-zero.
    pub fn is_ready(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width != 0.0 && self.height != 0.0
    }
}

/// One of the two sizes has no usable dimensions yet, typically because
/// the image has not finished loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("coordinate space not ready (zero or non-finite size)")]
pub struct NotReady;

fn scale(from: Size, to: Size) -> Result<(f32, f32), NotReady> {
    if !from.is_ready() || !to.is_ready() {
        return Err(NotReady);
    }
    Ok((to.width / from.width, to.height / from.height))
}

/// Map a display-space point into original space.
pub fn to_original_point(point: Point, display: Size, original: Size) -> Result<Point, NotReady> {
    let (sx, sy) = scale(display, original)?;
    Ok(Point::new(point.x * sx, point.y * sy))
}

/// Map every display-space point into original space. All or nothing.
#[allow(dead_code)]
pub fn to_original_points(
    points: &[Point],
    display: Size,
    original: Size,
) -> Result<Vec<Point>, NotReady> {
    let (sx, sy) = scale(display, original)?;
    Ok(points.iter().map(|p| Point::new(p.x * sx, p.y * sy)).collect())
}

/// Map an original-space point into display space.
pub fn to_display_point(point: Point, display: Size, original: Size) -> Result<Point, NotReady> {
    let (sx, sy) = scale(original, display)?;
    Ok(Point::new(point.x * sx, point.y * sy))
}

/// Map every original-space point into display space. All or nothing.
pub fn to_display_points(
    points: &[Point],
    display: Size,
    original: Size,
) -> Result<Vec<Point>, NotReady> {
    let (sx, sy) = scale(original, display)?;
    Ok(points.iter().map(|p| Point::new(p.x * sx, p.y * sy)).collect())
}

/// Scale a display-space displacement into original space. Same math as
/// a point, named separately so call sites read as what they mean.
pub fn to_original_offset(delta: Point, display: Size, original: Size) -> Result<Point, NotReady> {
    to_original_point(delta, display, original)
}
