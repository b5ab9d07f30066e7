//! Project data as the backend broadcasts it.
//!
//! The client only ever holds a cached copy. Every mutation goes through a
//! request and comes back as a fresh snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coords::Point;

/// Server-assigned project id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

/// Server-assigned id of an image, a video frame image or a video.
/// Doubles as the blob cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(pub String);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn finished() -> bool {
    true
}

/// A labelled polygon. `points` are in original-image pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(rename = "annotation_id")]
    pub id: AnnotationId,
    #[serde(rename = "className", default)]
    pub class_name: String,
    #[serde(default)]
    pub points: Vec<Point>,
    /// Client-side only. Everything the server sends has been committed.
    #[serde(skip_serializing, default = "finished")]
    pub finished: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageAnnotation {
    #[serde(rename = "image_id")]
    pub id: MediaId,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl ImageAnnotation {
    pub fn annotation(&self, id: &AnnotationId) -> Option<&Annotation> {
        self.annotations.iter().find(|a| &a.id == id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoFrame {
    #[serde(flatten)]
    pub image: ImageAnnotation,
    pub frame_number: usize,
    #[serde(rename = "keyFrame", default)]
    pub key_frame: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoAnnotation {
    #[serde(rename = "video_id")]
    pub id: MediaId,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub fps: f64,
    #[serde(rename = "videoFrames", default)]
    pub frames: Vec<VideoFrame>,
}

impl VideoAnnotation {
    pub fn frame(&self, index: usize) -> Option<&VideoFrame> {
        self.frames.get(index)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Image ids of every frame, in frame order.
    pub fn frame_image_ids(&self) -> impl Iterator<Item = &MediaId> {
        self.frames.iter().map(|f| &f.image.id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "project_id")]
    pub id: ProjectId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub default_class: String,
    #[serde(rename = "imageAnnotations", default)]
    pub images: Vec<ImageAnnotation>,
    #[serde(rename = "videoAnnotations", default)]
    pub videos: Vec<VideoAnnotation>,
    /// Monotonic snapshot stamp, when the backend provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

impl Project {
    /// Look up a stand-alone image or a video frame image by id.
    pub fn image(&self, id: &MediaId) -> Option<&ImageAnnotation> {
        self.images.iter().find(|i| &i.id == id).or_else(|| {
            self.videos
                .iter()
                .flat_map(|v| v.frames.iter())
                .map(|f| &f.image)
                .find(|i| &i.id == id)
        })
    }

    pub fn video(&self, id: &MediaId) -> Option<&VideoAnnotation> {
        self.videos.iter().find(|v| &v.id == id)
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.classes.iter().any(|c| c == name)
    }
}
