//! Named JSON events exchanged with the annotation backend.
//!
//! Both directions use the envelope `{"event": "<name>", "data": {...}}`.
//! Requests carry backend field names; point lists, labels and batches are
//! JSON-encoded strings because the backend decodes them with `json.loads`.
//! Every push carries `{data, status, message}` where `data` is usually a
//! full project snapshot.

use serde::{Deserialize, Serialize};

use crate::coords::Point;
use crate::model::{AnnotationId, MediaId, Project, ProjectId};

/// Positive/negative prompt label for assisted segmentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PromptLabel {
    Negative,
    Positive,
}

impl From<PromptLabel> for u8 {
    fn from(label: PromptLabel) -> u8 {
        match label {
            PromptLabel::Negative => 0,
            PromptLabel::Positive => 1,
        }
    }
}

impl TryFrom<u8> for PromptLabel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PromptLabel::Negative),
            1 => Ok(PromptLabel::Positive),
            other => Err(format!("unknown prompt label {other}")),
        }
    }
}

/// One entry of an `add_annotations` batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewAnnotation {
    pub points: Vec<Point>,
    #[serde(rename = "className")]
    pub class_name: String,
}

/// Which image (or which frame of which video) a request applies to.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Target {
    pub project_id: ProjectId,
    pub image_id: MediaId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<MediaId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_number: Option<usize>,
}

/// Requests sent over the push channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    GetProject {
        project_id: ProjectId,
    },
    AddAnnotation {
        #[serde(flatten)]
        target: Target,
        #[serde(with = "json_string")]
        points: Vec<Point>,
        class_name: String,
    },
    AddAnnotations {
        #[serde(flatten)]
        target: Target,
        #[serde(with = "json_string")]
        annotations: Vec<NewAnnotation>,
    },
    ModifyAnnotation {
        #[serde(flatten)]
        target: Target,
        annotation_id: AnnotationId,
        #[serde(with = "json_string")]
        points: Vec<Point>,
        class_name: String,
    },
    DeleteAnnotation {
        #[serde(flatten)]
        target: Target,
        annotation_id: AnnotationId,
    },
    DeleteImage {
        project_id: ProjectId,
        image_id: MediaId,
    },
    DeleteVideo {
        project_id: ProjectId,
        video_id: MediaId,
    },
    ChangeProjectName {
        project_id: ProjectId,
        name: String,
    },
    SetDefaultClass {
        project_id: ProjectId,
        class_name: String,
    },
    AddClass {
        project_id: ProjectId,
        class_name: String,
    },
    SetClasses {
        project_id: ProjectId,
        #[serde(with = "json_string")]
        classes: Vec<String>,
        default_class: String,
    },
    SetKeyFrame {
        project_id: ProjectId,
        video_id: MediaId,
        frame_number: usize,
        is_key_frame: bool,
    },
    InterpolateAnnotations {
        project_id: ProjectId,
        video_id: MediaId,
    },
    SetMagicImage {
        project_id: ProjectId,
        image_id: MediaId,
    },
    SetMagicPoints {
        project_id: ProjectId,
        image_id: MediaId,
        #[serde(with = "json_string")]
        points: Vec<Point>,
        #[serde(with = "json_string")]
        labels: Vec<PromptLabel>,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::GetProject { .. } => "get_project",
            ClientEvent::AddAnnotation { .. } => "add_annotation",
            ClientEvent::AddAnnotations { .. } => "add_annotations",
            ClientEvent::ModifyAnnotation { .. } => "modify_annotation",
            ClientEvent::DeleteAnnotation { .. } => "delete_annotation",
            ClientEvent::DeleteImage { .. } => "delete_image",
            ClientEvent::DeleteVideo { .. } => "delete_video",
            ClientEvent::ChangeProjectName { .. } => "change_project_name",
            ClientEvent::SetDefaultClass { .. } => "set_default_class",
            ClientEvent::AddClass { .. } => "add_class",
            ClientEvent::SetClasses { .. } => "set_classes",
            ClientEvent::SetKeyFrame { .. } => "set_key_frame",
            ClientEvent::InterpolateAnnotations { .. } => "interpolate_annotations",
            ClientEvent::SetMagicImage { .. } => "set_magic_image",
            ClientEvent::SetMagicPoints { .. } => "set_magic_points",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Events the backend pushes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushEvent {
    Connected,
    Disconnected,
    GetProject,
    AddAnnotation,
    AddAnnotations,
    ModifyAnnotation,
    DeleteAnnotation,
    DeleteImage,
    DeleteVideo,
    ChangeProjectName,
    SetDefaultClass,
    AddClass,
    SetClasses,
    SetKeyFrame,
    InterpolateAnnotations,
    SetMagicImage,
    SetMagicPoints,
}

/// What a push carries once its `data` has been interpreted.
#[derive(Clone, Debug, PartialEq)]
pub enum PushPayload {
    Project(Box<Project>),
    /// Candidate polygons in original-image coordinates.
    MagicPolygons(Vec<Vec<Point>>),
    Empty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerPush {
    pub event: PushEvent,
    pub status: u16,
    pub message: String,
    pub payload: PushPayload,
}

impl ServerPush {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed push: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("push `{event:?}` carried unexpected data: {reason}")]
    UnexpectedData { event: PushEvent, reason: String },
}

#[derive(Deserialize)]
struct Envelope {
    event: PushEvent,
    #[serde(default)]
    data: Option<Response>,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default = "ok_status")]
    status: u16,
    #[serde(default)]
    message: String,
}

fn ok_status() -> u16 {
    200
}

/// Parse one text frame from the push channel.
///
/// Unknown event names are errors; callers log and keep reading.
pub fn parse_push(text: &str) -> Result<ServerPush, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let Some(response) = envelope.data else {
        return Ok(ServerPush {
            event: envelope.event,
            status: ok_status(),
            message: String::new(),
            payload: PushPayload::Empty,
        });
    };

    let payload = if response.data.is_null() {
        PushPayload::Empty
    } else {
        match envelope.event {
            PushEvent::SetMagicPoints => PushPayload::MagicPolygons(parse_polygons(response.data)?),
            PushEvent::Connected | PushEvent::Disconnected | PushEvent::SetMagicImage => {
                PushPayload::Empty
            }
            event => {
                let project = serde_json::from_value(response.data).map_err(|e| {
                    ProtocolError::UnexpectedData {
                        event,
                        reason: e.to_string(),
                    }
                })?;
                PushPayload::Project(Box::new(project))
            }
        }
    };

    Ok(ServerPush {
        event: envelope.event,
        status: response.status,
        message: response.message,
        payload,
    })
}

/// The segmentation result arrives double-encoded: a JSON string holding
/// a list of polygons. Accept a plain list as well.
fn parse_polygons(data: serde_json::Value) -> Result<Vec<Vec<Point>>, ProtocolError> {
    let value = match data {
        serde_json::Value::String(s) => serde_json::from_str(&s)?,
        other => other,
    };
    Ok(serde_json::from_value(value)?)
}

/// Serialize a field as a JSON document embedded in a string.
mod json_string {
    use serde::{Serialize, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        let text = serde_json::to_string(value).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn target() -> Target {
        Target {
            project_id: ProjectId("p1".into()),
            image_id: MediaId("img1".into()),
            video_id: None,
            frame_number: None,
        }
    }

    #[test]
    fn add_annotation_encodes_points_as_string() {
        let event = ClientEvent::AddAnnotation {
            target: target(),
            points: vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)],
            class_name: "car".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["event"], "add_annotation");
        assert_eq!(json["data"]["project_id"], "p1");
        assert_eq!(json["data"]["image_id"], "img1");
        assert_eq!(json["data"]["points"], "[[1.0,2.0],[3.0,4.0]]");
        assert_eq!(json["data"]["class_name"], "car");
        assert!(json["data"].get("video_id").is_none());
    }

    #[test]
    fn frame_target_carries_video_and_frame() {
        let event = ClientEvent::DeleteAnnotation {
            target: Target {
                video_id: Some(MediaId("v1".into())),
                frame_number: Some(4),
                ..target()
            },
            annotation_id: AnnotationId("a1".into()),
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["data"]["video_id"], "v1");
        assert_eq!(json["data"]["frame_number"], 4);
        assert_eq!(json["data"]["annotation_id"], "a1");
    }

    #[test]
    fn magic_points_encode_labels() {
        let event = ClientEvent::SetMagicPoints {
            project_id: ProjectId("p1".into()),
            image_id: MediaId("img1".into()),
            points: vec![Point::new(5.0, 5.0), Point::new(6.0, 6.0)],
            labels: vec![PromptLabel::Positive, PromptLabel::Negative],
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["data"]["labels"], "[1,0]");
        assert_eq!(event.name(), "set_magic_points");
    }

    #[test]
    fn parses_project_push() {
        let text = r#"{"event":"add_annotation","data":{"data":{"project_id":"p1","name":"n","classes":["a"],"default_class":"a","imageAnnotations":[]},"status":200,"message":"Annotation added successfully"}}"#;
        let push = parse_push(text).unwrap();
        assert_eq!(push.event, PushEvent::AddAnnotation);
        assert!(push.is_ok());
        assert_matches!(push.payload, PushPayload::Project(p) if p.id == ProjectId("p1".into()));
    }

    #[test]
    fn parses_double_encoded_magic_polygons() {
        let text = r#"{"event":"set_magic_points","data":{"data":"[[[1,1],[5,1],[5,5]]]","status":200,"message":"Points set successfully"}}"#;
        let push = parse_push(text).unwrap();
        assert_matches!(push.payload, PushPayload::MagicPolygons(polys) => {
            assert_eq!(polys.len(), 1);
            assert_eq!(polys[0][1], Point::new(5.0, 1.0));
        });
    }

    #[test]
    fn failed_magic_points_has_empty_payload() {
        let text = r#"{"event":"set_magic_points","data":{"data":null,"status":400,"message":"No points set"}}"#;
        let push = parse_push(text).unwrap();
        assert!(!push.is_ok());
        assert_eq!(push.payload, PushPayload::Empty);
    }

    #[test]
    fn magic_image_ack() {
        let text = r#"{"event":"set_magic_image","data":{"data":null,"status":200,"message":"Image set successfully"}}"#;
        let push = parse_push(text).unwrap();
        assert_eq!(push.event, PushEvent::SetMagicImage);
        assert_eq!(push.payload, PushPayload::Empty);
    }

    #[test]
    fn unknown_event_is_an_error() {
        assert_matches!(
            parse_push(r#"{"event":"reticulate","data":{}}"#),
            Err(ProtocolError::Malformed(_))
        );
    }

    #[test]
    fn project_event_with_garbage_is_rejected() {
        let text = r#"{"event":"get_project","data":{"data":{"nope":true},"status":200,"message":""}}"#;
        assert_matches!(
            parse_push(text),
            Err(ProtocolError::UnexpectedData { event: PushEvent::GetProject, .. })
        );
    }
}
