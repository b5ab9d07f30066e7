//! Draw-in-progress state for the annotation tools.
//!
//! All points here are original-image coordinates; the caller converts
//! pointer positions before feeding them in. Committed geometry leaves as a
//! [`DrawAction`] for the session to turn into a request.

use crate::coords::Point;
use crate::protocol::PromptLabel;

/// The active tool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AnnotationMode {
    #[default]
    Select,
    Polygon,
    Rectangle,
    Magic,
}

impl AnnotationMode {
    pub const ALL: [AnnotationMode; 4] = [
        AnnotationMode::Select,
        AnnotationMode::Polygon,
        AnnotationMode::Rectangle,
        AnnotationMode::Magic,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AnnotationMode::Select => "Select",
            AnnotationMode::Polygon => "Polygon",
            AnnotationMode::Rectangle => "Rectangle",
            AnnotationMode::Magic => "Magic",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
}

pub const MIN_POLYGON_POINTS: usize = 3;

#[derive(Clone, Debug, Default, PartialEq)]
pub enum DrawState {
    #[default]
    Idle,
    Polygon {
        points: Vec<Point>,
    },
    Rectangle {
        anchor: Point,
        corner: Point,
    },
    Magic {
        points: Vec<Point>,
        labels: Vec<PromptLabel>,
        /// Candidate polygons pushed back by the segmentation service.
        suggestions: Vec<Vec<Point>>,
    },
}

/// What the session should do after an input event.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawAction {
    None,
    /// One finished shape.
    Commit(Vec<Point>),
    /// Accepted magic suggestions, committed together.
    CommitBatch(Vec<Vec<Point>>),
    /// Prompt set changed; ask for new suggestions.
    Prompt {
        points: Vec<Point>,
        labels: Vec<PromptLabel>,
    },
}

impl DrawState {
    pub fn is_idle(&self) -> bool {
        matches!(self, DrawState::Idle)
    }

    pub fn reset(&mut self) {
        *self = DrawState::Idle;
    }

    pub fn pointer_down(&mut self, mode: AnnotationMode, at: Point, button: PointerButton) -> DrawAction {
        match (mode, button) {
            (AnnotationMode::Polygon, PointerButton::Primary) => {
                match self {
                    DrawState::Polygon { points } => points.push(at),
                    _ => *self = DrawState::Polygon { points: vec![at] },
                }
                DrawAction::None
            }
            (AnnotationMode::Rectangle, PointerButton::Primary) => {
                *self = DrawState::Rectangle { anchor: at, corner: at };
                DrawAction::None
            }
            (AnnotationMode::Magic, _) => {
                let label = match button {
                    PointerButton::Primary => PromptLabel::Positive,
                    PointerButton::Secondary => PromptLabel::Negative,
                };
                if !matches!(self, DrawState::Magic { .. }) {
                    *self = DrawState::Magic {
                        points: Vec::new(),
                        labels: Vec::new(),
                        suggestions: Vec::new(),
                    };
                }
                let DrawState::Magic { points, labels, .. } = self else {
                    return DrawAction::None;
                };
                points.push(at);
                labels.push(label);
                DrawAction::Prompt {
                    points: points.clone(),
                    labels: labels.clone(),
                }
            }
            _ => DrawAction::None,
        }
    }

    pub fn pointer_move(&mut self, at: Point) {
        if let DrawState::Rectangle { corner, .. } = self {
            *corner = at;
        }
    }

    pub fn pointer_up(&mut self, at: Point) -> DrawAction {
        let DrawState::Rectangle { anchor, .. } = *self else {
            return DrawAction::None;
        };
        self.reset();
        match rectangle(anchor, at) {
            Some(corners) => DrawAction::Commit(corners),
            None => {
                tracing::debug!("Dropped zero-size rectangle");
                DrawAction::None
            }
        }
    }

    /// Space: commit the polygon or accept all magic suggestions.
    pub fn commit(&mut self) -> DrawAction {
        match std::mem::take(self) {
            DrawState::Polygon { points } if points.len() >= MIN_POLYGON_POINTS => {
                DrawAction::Commit(points)
            }
            DrawState::Polygon { points } => {
                // Not enough vertices yet; keep drawing.
                *self = DrawState::Polygon { points };
                DrawAction::None
            }
            DrawState::Magic { suggestions, .. } if !suggestions.is_empty() => {
                DrawAction::CommitBatch(suggestions)
            }
            DrawState::Magic { .. } | DrawState::Idle => DrawAction::None,
            rect @ DrawState::Rectangle { .. } => {
                *self = rect;
                DrawAction::None
            }
        }
    }

    /// Escape: throw away whatever is in progress.
    pub fn cancel(&mut self) {
        self.reset();
    }

    /// Store suggestions for the current prompt set. Ignored unless magic
    /// prompting is in progress.
    pub fn set_suggestions(&mut self, polygons: Vec<Vec<Point>>) {
        if let DrawState::Magic { suggestions, .. } = self {
            *suggestions = polygons;
        }
    }

    /// Vertices of the in-progress shape, for preview.
    pub fn preview(&self) -> Vec<Point> {
        match self {
            DrawState::Polygon { points } => points.clone(),
            DrawState::Rectangle { anchor, corner } => corners(*anchor, *corner).to_vec(),
            DrawState::Idle | DrawState::Magic { .. } => Vec::new(),
        }
    }
}

fn corners(anchor: Point, corner: Point) -> [Point; 4] {
    [
        anchor,
        Point::new(corner.x, anchor.y),
        corner,
        Point::new(anchor.x, corner.y),
    ]
}

/// Four corners anchored at `anchor`, or `None` when either side has zero
/// length.
pub fn rectangle(anchor: Point, corner: Point) -> Option<Vec<Point>> {
    let width = (corner.x - anchor.x).abs();
    let height = (corner.y - anchor.y).abs();
    if width <= f32::EPSILON || height <= f32::EPSILON {
        return None;
    }
    Some(corners(anchor, corner).to_vec())
}
