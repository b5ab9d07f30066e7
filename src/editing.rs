//! SELECT-mode editing of finished polygons: vertex drags, whole-shape
//! drags and hit testing.
//!
//! Drags are tracked in display space (the unzoomed stage) and converted to
//! original space only when they are dropped.

use crate::coords::{self, NotReady, Point, Size};
use crate::model::{Annotation, AnnotationId};

pub const VERTEX_RADIUS: f32 = 6.0;
pub const VERTEX_HIT_RADIUS: f32 = 12.0;
pub const HOVER_SCALE: f32 = 1.5;
pub const STROKE_WIDTH: f32 = 3.0;
pub const SELECTED_STROKE_WIDTH: f32 = 6.0;

pub fn stroke_width(selected: bool) -> f32 {
    if selected {
        SELECTED_STROKE_WIDTH
    } else {
        STROKE_WIDTH
    }
}

/// Keep a dragged vertex on the stage. A vertex within `radius` of an edge
/// snaps onto that edge.
pub fn clamp_vertex(pos: Point, stage: Size, radius: f32) -> Point {
    let mut out = pos;
    if pos.x + radius > stage.width {
        out.x = stage.width;
    }
    if pos.x - radius < 0.0 {
        out.x = 0.0;
    }
    if pos.y + radius > stage.height {
        out.y = stage.height;
    }
    if pos.y - radius < 0.0 {
        out.y = 0.0;
    }
    out
}

/// Axis-aligned extent of a point set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min: Point,
    pub max: Point,
}

impl Bounds {
    pub fn of(points: &[Point]) -> Option<Bounds> {
        let first = *points.first()?;
        Some(points.iter().skip(1).fold(
            Bounds {
                min: first,
                max: first,
            },
            |b, p| Bounds {
                min: Point::new(b.min.x.min(p.x), b.min.y.min(p.y)),
                max: Point::new(b.max.x.max(p.x), b.max.y.max(p.y)),
            },
        ))
    }
}

/// Limit a whole-shape drag offset so the shape's bounds stay on the stage.
pub fn clamp_group_offset(offset: Point, bounds: Bounds, stage: Size) -> Point {
    let mut x = offset.x;
    let mut y = offset.y;
    if bounds.min.y + y < 0.0 {
        y = -bounds.min.y;
    }
    if bounds.min.x + x < 0.0 {
        x = -bounds.min.x;
    }
    if bounds.max.y + y > stage.height {
        y = stage.height - bounds.max.y;
    }
    if bounds.max.x + x > stage.width {
        x = stage.width - bounds.max.x;
    }
    Point::new(x, y)
}

/// Even-odd point-in-polygon test.
pub fn contains(polygon: &[Point], p: Point) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let vi = polygon[i];
        let vj = polygon[j];
        if ((vi.y > p.y) != (vj.y > p.y)) && (p.x < (vj.x - vi.x) * (p.y - vi.y) / (vj.y - vi.y) + vi.x) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Index of the vertex under `p`, nearest first.
pub fn hit_vertex(vertices: &[Point], p: Point, radius: f32) -> Option<usize> {
    vertices
        .iter()
        .enumerate()
        .map(|(i, v)| (i, v.distance_to(p)))
        .filter(|(_, d)| *d <= radius)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// What a pointer press in SELECT mode landed on.
#[derive(Clone, Debug, PartialEq)]
pub enum Hit {
    Vertex { annotation: AnnotationId, index: usize },
    Body { annotation: AnnotationId },
}

/// Hit-test finished annotations, topmost (last drawn) first. `shapes`
/// pairs each annotation with its display-space vertices.
pub fn hit_test<'a>(shapes: impl DoubleEndedIterator<Item = (&'a Annotation, &'a [Point])>, p: Point) -> Option<Hit> {
    for (annotation, vertices) in shapes.rev() {
        if !annotation.finished {
            continue;
        }
        if let Some(index) = hit_vertex(vertices, p, VERTEX_HIT_RADIUS) {
            return Some(Hit::Vertex {
                annotation: annotation.id.clone(),
                index,
            });
        }
        if contains(vertices, p) {
            return Some(Hit::Body {
                annotation: annotation.id.clone(),
            });
        }
    }
    None
}

/// A drag in progress, in display space.
#[derive(Clone, Debug, PartialEq)]
pub enum EditDrag {
    Vertex {
        annotation: AnnotationId,
        index: usize,
        position: Point,
    },
    Group {
        annotation: AnnotationId,
        bounds: Bounds,
        offset: Point,
    },
}

impl EditDrag {
    /// Start dragging whatever `hit` found. `vertices` are the target's
    /// display-space points.
    pub fn begin(hit: Hit, vertices: &[Point]) -> Option<EditDrag> {
        match hit {
            Hit::Vertex { annotation, index } => Some(EditDrag::Vertex {
                annotation,
                index,
                position: *vertices.get(index)?,
            }),
            Hit::Body { annotation } => Some(EditDrag::Group {
                annotation,
                bounds: Bounds::of(vertices)?,
                offset: Point::ZERO,
            }),
        }
    }

    pub fn annotation(&self) -> &AnnotationId {
        match self {
            EditDrag::Vertex { annotation, .. } | EditDrag::Group { annotation, .. } => annotation,
        }
    }

    /// Apply a display-space pointer delta, clamped to the stage.
    pub fn update(&mut self, delta: Point, stage: Size) {
        match self {
            EditDrag::Vertex { position, .. } => {
                *position = clamp_vertex(position.offset(delta), stage, 0.0);
            }
            EditDrag::Group { bounds, offset, .. } => {
                *offset = clamp_group_offset(offset.offset(delta), *bounds, stage);
            }
        }
    }

    /// Display-space vertices as they should be drawn mid-drag.
    pub fn preview(&self, vertices: &[Point]) -> Vec<Point> {
        match self {
            EditDrag::Vertex { index, position, .. } => {
                let mut out = vertices.to_vec();
                if let Some(v) = out.get_mut(*index) {
                    *v = *position;
                }
                out
            }
            EditDrag::Group { offset, .. } => vertices.iter().map(|v| v.offset(*offset)).collect(),
        }
    }

    /// Drop the drag: the annotation's new points in original space.
    pub fn finish(self, stage: Size, original: Size, points: &[Point]) -> Result<(AnnotationId, Vec<Point>), NotReady> {
        match self {
            EditDrag::Vertex {
                annotation,
                index,
                position,
            } => {
                let clamped = clamp_vertex(position, stage, VERTEX_RADIUS);
                let moved = coords::to_original_point(clamped, stage, original)?;
                let mut out = points.to_vec();
                if let Some(v) = out.get_mut(index) {
                    *v = moved;
                }
                Ok((annotation, out))
            }
            EditDrag::Group { annotation, offset, .. } => {
                let delta = coords::to_original_offset(offset, stage, original)?;
                Ok((annotation, points.iter().map(|p| p.offset(delta)).collect()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const STAGE: Size = Size {
        width: 100.0,
        height: 50.0,
    };
    const ORIGINAL: Size = Size {
        width: 200.0,
        height: 100.0,
    };

    fn p(x: f32, y: f32) -> Point {
        Point::new(x, y)
    }

    fn square() -> Vec<Point> {
        vec![p(10.0, 10.0), p(20.0, 10.0), p(20.0, 20.0), p(10.0, 20.0)]
    }

    fn ann(id: &str, finished: bool) -> Annotation {
        Annotation {
            id: AnnotationId(id.into()),
            class_name: "car".into(),
            points: square(),
            finished,
        }
    }

    #[test]
    fn vertex_snaps_to_edges() {
        assert_eq!(clamp_vertex(p(-3.0, 25.0), STAGE, 6.0), p(0.0, 25.0));
        assert_eq!(clamp_vertex(p(97.0, 48.0), STAGE, 6.0), p(100.0, 50.0));
        assert_eq!(clamp_vertex(p(50.0, 25.0), STAGE, 6.0), p(50.0, 25.0));
    }

    #[test]
    fn group_offset_keeps_shape_on_stage() {
        let b = Bounds::of(&square()).unwrap();
        assert_eq!(clamp_group_offset(p(-50.0, 0.0), b, STAGE), p(-10.0, 0.0));
        assert_eq!(clamp_group_offset(p(500.0, 500.0), b, STAGE), p(80.0, 30.0));
        assert_eq!(clamp_group_offset(p(5.0, 5.0), b, STAGE), p(5.0, 5.0));
    }

    #[test]
    fn bounds_of_empty_is_none() {
        assert!(Bounds::of(&[]).is_none());
    }

    #[test]
    fn point_in_polygon() {
        assert!(contains(&square(), p(15.0, 15.0)));
        assert!(!contains(&square(), p(25.0, 15.0)));
        assert!(!contains(&square()[..2], p(15.0, 10.0)));
    }

    #[test]
    fn hit_prefers_vertices_and_topmost() {
        let below = ann("below", true);
        let above = ann("above", true);
        let verts = vec![p(10.0, 10.0), p(40.0, 10.0), p(40.0, 40.0), p(10.0, 40.0)];
        let shapes = vec![(&below, verts.as_slice()), (&above, verts.as_slice())];
        assert_eq!(
            hit_test(shapes.clone().into_iter(), p(10.5, 10.5)),
            Some(Hit::Vertex {
                annotation: AnnotationId("above".into()),
                index: 0
            })
        );
        assert_eq!(
            hit_test(shapes.into_iter(), p(25.0, 25.0)),
            Some(Hit::Body {
                annotation: AnnotationId("above".into())
            })
        );
    }

    #[test]
    fn unfinished_shapes_are_not_selectable() {
        let draft = ann("draft", false);
        let verts = square();
        assert_eq!(hit_test(vec![(&draft, verts.as_slice())].into_iter(), p(15.0, 15.0)), None);
    }

    #[test]
    fn vertex_drag_converts_on_drop() {
        let verts = square();
        let mut drag = EditDrag::begin(
            Hit::Vertex {
                annotation: AnnotationId("a".into()),
                index: 1,
            },
            &verts,
        )
        .unwrap();
        drag.update(p(5.0, 5.0), STAGE);
        assert_eq!(drag.preview(&verts)[1], p(25.0, 15.0));

        let original_points: Vec<Point> = verts.iter().map(|v| p(v.x * 2.0, v.y * 2.0)).collect();
        let (id, out) = drag.finish(STAGE, ORIGINAL, &original_points).unwrap();
        assert_eq!(id, AnnotationId("a".into()));
        assert_eq!(out[1], p(50.0, 30.0));
        assert_eq!(out[0], original_points[0]);
    }

    #[test]
    fn group_drag_translates_every_vertex() {
        let verts = square();
        let mut drag = EditDrag::begin(
            Hit::Body {
                annotation: AnnotationId("a".into()),
            },
            &verts,
        )
        .unwrap();
        drag.update(p(-100.0, 3.0), STAGE);
        let original_points: Vec<Point> = verts.iter().map(|v| p(v.x * 2.0, v.y * 2.0)).collect();
        let (_, out) = drag.finish(STAGE, ORIGINAL, &original_points).unwrap();
        assert_eq!(out[0], p(0.0, 26.0));
        assert_eq!(out[2], p(20.0, 46.0));
    }

    #[test]
    fn drop_before_image_loads_is_not_ready() {
        let verts = square();
        let drag = EditDrag::begin(
            Hit::Body {
                annotation: AnnotationId("a".into()),
            },
            &verts,
        )
        .unwrap();
        assert_matches!(drag.finish(STAGE, Size::default(), &verts), Err(NotReady));
    }

    #[test]
    fn selected_stroke_is_thicker() {
        assert!(stroke_width(true) > stroke_width(false));
    }
}
