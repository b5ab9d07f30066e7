//! The annotation session: selection, tool mode, the cached project
//! snapshot and everything that turns user intent into backend requests.
//!
//! The session never edits the snapshot itself. Requests go out through an
//! [`EventSink`] and the backend answers with a fresh project that replaces
//! the cached one in [`AnnotationSession::handle_inbound`].

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use crate::blob_cache::{BlobError, BlobStore};
use crate::channel::{ChannelError, EventSink};
use crate::coords::Point;
use crate::draw::{AnnotationMode, DrawAction, DrawState, PointerButton};
use crate::frames::SampleMethod;
use crate::media::{MediaRequests, MediaUpload};
use crate::model::{Annotation, AnnotationId, ImageAnnotation, MediaId, Project, ProjectId, VideoAnnotation};
use crate::protocol::{ClientEvent, NewAnnotation, PromptLabel, PushEvent, PushPayload, ServerPush, Target};
use crate::viewport::Viewport;

/// Called after a message is posted so the UI wakes up to drain it.
pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// Messages from background tasks to the session.
#[derive(Debug)]
pub enum Inbound {
    Connected,
    Disconnected,
    Push(ServerPush),
    MediaUploaded(MediaUpload),
    MediaFailed(String),
}

/// Sending half of the session's inbound queue.
#[derive(Clone)]
pub struct Inbox {
    sender: Sender<Inbound>,
    waker: Option<Waker>,
}

impl Inbox {
    pub fn channel(waker: Option<Waker>) -> (Inbox, Receiver<Inbound>) {
        let (sender, receiver) = mpsc::channel();
        (Inbox { sender, waker }, receiver)
    }

    pub fn post(&self, inbound: Inbound) {
        if self.sender.send(inbound).is_err() {
            tracing::debug!("Inbox closed; dropping message");
            return;
        }
        if let Some(wake) = &self.waker {
            wake();
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no project is open")]
    NoProject,

    #[error("no image selected")]
    NoImage,

    #[error("no annotation selected")]
    NoAnnotation,

    #[error("no video selected")]
    NoVideo,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Blob(#[from] BlobError),
}

pub struct AnnotationSession {
    mode: AnnotationMode,
    project_id: Option<ProjectId>,
    project: Option<Project>,
    selected_image_id: Option<MediaId>,
    selected_annotation_id: Option<AnnotationId>,
    selected_video_id: Option<MediaId>,
    frame_number: Option<usize>,
    pub viewport: Viewport,
    loading: bool,
    playing: bool,
    last_push: Option<ServerPush>,
    draw: DrawState,
    /// Revision of the applied snapshot, when the backend stamps them.
    revision: Option<u64>,
    /// Local count of received snapshots, for logging unversioned ones.
    push_seq: u64,
    sink: Box<dyn EventSink>,
    media: Box<dyn MediaRequests>,
    blobs: Box<dyn BlobStore>,
}

impl AnnotationSession {
    pub fn new(sink: Box<dyn EventSink>, media: Box<dyn MediaRequests>, blobs: Box<dyn BlobStore>) -> Self {
        Self {
            mode: AnnotationMode::default(),
            project_id: None,
            project: None,
            selected_image_id: None,
            selected_annotation_id: None,
            selected_video_id: None,
            frame_number: None,
            viewport: Viewport::default(),
            loading: false,
            playing: false,
            last_push: None,
            draw: DrawState::default(),
            revision: None,
            push_seq: 0,
            sink,
            media,
            blobs,
        }
    }

    // ---- read access ----

    pub fn mode(&self) -> AnnotationMode {
        self.mode
    }

    pub fn project(&self) -> Option<&Project> {
        self.project.as_ref()
    }

    pub fn project_id(&self) -> Option<&ProjectId> {
        self.project_id.as_ref()
    }

    pub fn selected_image_id(&self) -> Option<&MediaId> {
        self.selected_image_id.as_ref()
    }

    pub fn selected_annotation_id(&self) -> Option<&AnnotationId> {
        self.selected_annotation_id.as_ref()
    }

    pub fn selected_video_id(&self) -> Option<&MediaId> {
        self.selected_video_id.as_ref()
    }

    pub fn frame_number(&self) -> Option<usize> {
        self.frame_number
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn last_push(&self) -> Option<&ServerPush> {
        self.last_push.as_ref()
    }

    pub fn draw(&self) -> &DrawState {
        &self.draw
    }

    pub fn selected_image(&self) -> Option<&ImageAnnotation> {
        self.project.as_ref()?.image(self.selected_image_id.as_ref()?)
    }

    pub fn selected_annotation(&self) -> Option<&Annotation> {
        self.selected_image()?.annotation(self.selected_annotation_id.as_ref()?)
    }

    pub fn selected_video(&self) -> Option<&VideoAnnotation> {
        self.project.as_ref()?.video(self.selected_video_id.as_ref()?)
    }

    /// Cached bytes of an uploaded image or frame.
    pub fn cached_media(&self, id: &MediaId) -> Option<Vec<u8>> {
        match self.blobs.get(id) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Blob cache read failed");
                None
            }
        }
    }

    // ---- selection and mode ----

    pub fn set_annotation_mode(&mut self, mode: AnnotationMode) {
        if mode == self.mode {
            return;
        }
        tracing::debug!(from = ?self.mode, to = ?mode, "Annotation mode");
        self.draw.reset();
        self.mode = mode;
        if mode == AnnotationMode::Magic && self.selected_image_id.is_some() {
            let result = self.set_magic_image();
            log_failure("set_magic_image", result);
        }
    }

    pub fn set_selected_image_id(&mut self, id: Option<MediaId>) {
        self.select_image(id, true);
    }

    /// Frames of one video share a viewport; other switches start unzoomed.
    fn select_image(&mut self, id: Option<MediaId>, reset_view: bool) {
        if id != self.selected_image_id {
            self.selected_annotation_id = None;
            if reset_view {
                self.viewport.reset();
            }
        }
        self.draw.reset();
        self.selected_image_id = id;
        if self.mode == AnnotationMode::Magic && self.selected_image_id.is_some() {
            let result = self.set_magic_image();
            log_failure("set_magic_image", result);
        }
    }

    pub fn set_selected_annotation_id(&mut self, id: Option<AnnotationId>) {
        self.selected_annotation_id = id;
    }

    /// Select a video and show its first frame.
    pub fn set_selected_video_id(&mut self, id: Option<MediaId>) {
        self.playing = false;
        self.selected_video_id = id;
        self.frame_number = None;
        let first = self.selected_video().and_then(|v| v.frame(0)).map(|f| f.image.id.clone());
        match first {
            Some(image_id) => {
                self.frame_number = Some(0);
                self.set_selected_image_id(Some(image_id));
            }
            None if self.selected_video_id.is_some() => self.set_selected_image_id(None),
            None => {}
        }
    }

    /// Jump to `frame` of the selected video. Out of range is a no-op and
    /// returns `false`.
    pub fn set_frame_number(&mut self, frame: usize) -> bool {
        let Some(image_id) = self.selected_video().and_then(|v| v.frame(frame)).map(|f| f.image.id.clone()) else {
            return false;
        };
        self.frame_number = Some(frame);
        self.select_image(Some(image_id), false);
        true
    }

    /// Advance or rewind one frame. Playback stops at either end.
    pub fn step_frame(&mut self, forward: bool) -> bool {
        let Some(current) = self.frame_number else {
            return false;
        };
        let next = if forward { current.checked_add(1) } else { current.checked_sub(1) };
        let moved = next.is_some_and(|n| self.set_frame_number(n));
        if !moved {
            self.playing = false;
        }
        moved
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing && self.selected_video().is_some_and(|v| v.frame_count() > 1);
    }

    // ---- project ----

    /// Start following a project. The snapshot arrives by push.
    pub fn open_project(&mut self, project_id: ProjectId) -> Result<(), SessionError> {
        tracing::info!(project_id = %project_id, "Opening project");
        if self.project_id.as_ref() != Some(&project_id) {
            self.project = None;
            self.revision = None;
            self.set_selected_video_id(None);
            self.set_selected_image_id(None);
        }
        self.project_id = Some(project_id.clone());
        self.send(ClientEvent::GetProject { project_id })
    }

    pub fn change_project_name(&mut self, name: String) -> Result<(), SessionError> {
        let project_id = self.require_project_id()?;
        self.send(ClientEvent::ChangeProjectName { project_id, name })
    }

    pub fn set_default_class(&mut self, class_name: String) -> Result<(), SessionError> {
        let project_id = self.require_project_id()?;
        self.send(ClientEvent::SetDefaultClass { project_id, class_name })
    }

    /// Add one class. A name the project already has is not sent.
    pub fn add_class(&mut self, class_name: String) -> Result<(), SessionError> {
        let project_id = self.require_project_id()?;
        if self.project.as_ref().is_some_and(|p| p.has_class(&class_name)) {
            tracing::debug!(class_name = %class_name, "Class already exists");
            return Ok(());
        }
        self.send(ClientEvent::AddClass { project_id, class_name })
    }

    pub fn set_classes(&mut self, classes: Vec<String>, default_class: String) -> Result<(), SessionError> {
        let project_id = self.require_project_id()?;
        self.send(ClientEvent::SetClasses {
            project_id,
            classes,
            default_class,
        })
    }

    // ---- media ----

    pub fn upload_image(&mut self, path: PathBuf) -> Result<(), SessionError> {
        let project_id = self.require_project_id()?;
        tracing::info!("Uploading image {}", path.display());
        self.loading = true;
        self.media.upload_image(project_id, path);
        Ok(())
    }

    pub fn upload_video(&mut self, path: PathBuf, method: SampleMethod) -> Result<(), SessionError> {
        let project_id = self.require_project_id()?;
        tracing::info!(?method, "Uploading video {}", path.display());
        self.loading = true;
        self.media.upload_video(project_id, path, method);
        Ok(())
    }

    pub fn remove_selected_image(&mut self) -> Result<(), SessionError> {
        let project_id = self.require_project_id()?;
        let image_id = self.selected_image_id.clone().ok_or(SessionError::NoImage)?;
        self.send(ClientEvent::DeleteImage {
            project_id,
            image_id: image_id.clone(),
        })?;
        self.blobs.delete(&image_id)?;
        self.set_selected_image_id(None);
        Ok(())
    }

    /// Delete the selected video and every cached frame image.
    pub fn remove_selected_video(&mut self) -> Result<(), SessionError> {
        let project_id = self.require_project_id()?;
        let video = self.selected_video().ok_or(SessionError::NoVideo)?;
        let video_id = video.id.clone();
        let frame_ids: Vec<MediaId> = video.frame_image_ids().cloned().collect();

        self.send(ClientEvent::DeleteVideo {
            project_id,
            video_id: video_id.clone(),
        })?;
        self.blobs.delete(&video_id)?;
        for id in &frame_ids {
            self.blobs.delete(id)?;
        }
        tracing::debug!(video_id = %video_id, frames = frame_ids.len(), "Evicted video blobs");
        self.set_selected_video_id(None);
        self.set_selected_image_id(None);
        Ok(())
    }

    // ---- annotations ----

    pub fn add_annotation(&mut self, points: Vec<Point>, class_name: String) -> Result<(), SessionError> {
        let target = self.target()?;
        self.send(ClientEvent::AddAnnotation {
            target,
            points,
            class_name,
        })
    }

    pub fn add_annotations(&mut self, annotations: Vec<NewAnnotation>) -> Result<(), SessionError> {
        if annotations.is_empty() {
            return Ok(());
        }
        let target = self.target()?;
        self.send(ClientEvent::AddAnnotations { target, annotations })
    }

    /// Replace the geometry and class of annotation `id` and select it.
    pub fn modify_selected_annotation(
        &mut self,
        points: Vec<Point>,
        class_name: String,
        id: AnnotationId,
    ) -> Result<(), SessionError> {
        let target = self.target()?;
        self.selected_annotation_id = Some(id.clone());
        self.send(ClientEvent::ModifyAnnotation {
            target,
            annotation_id: id,
            points,
            class_name,
        })
    }

    pub fn remove_selected_annotation(&mut self) -> Result<(), SessionError> {
        let annotation_id = self.selected_annotation_id.clone().ok_or(SessionError::NoAnnotation)?;
        let target = self.target()?;
        self.send(ClientEvent::DeleteAnnotation { target, annotation_id })?;
        self.selected_annotation_id = None;
        Ok(())
    }

    // ---- video ----

    pub fn set_key_frame(&mut self, frame_number: usize, is_key_frame: bool) -> Result<(), SessionError> {
        let project_id = self.require_project_id()?;
        let video_id = self.selected_video_id.clone().ok_or(SessionError::NoVideo)?;
        self.send(ClientEvent::SetKeyFrame {
            project_id,
            video_id,
            frame_number,
            is_key_frame,
        })
    }

    pub fn interpolate_annotations(&mut self) -> Result<(), SessionError> {
        let project_id = self.require_project_id()?;
        let video_id = self.selected_video_id.clone().ok_or(SessionError::NoVideo)?;
        self.send(ClientEvent::InterpolateAnnotations { project_id, video_id })
    }

    // ---- assisted segmentation ----

    /// Have the segmentation service load the selected image.
    pub fn set_magic_image(&mut self) -> Result<(), SessionError> {
        let project_id = self.require_project_id()?;
        let image_id = self.selected_image_id.clone().ok_or(SessionError::NoImage)?;
        self.send(ClientEvent::SetMagicImage { project_id, image_id })?;
        self.loading = true;
        Ok(())
    }

    pub fn set_magic_points(&mut self, points: Vec<Point>, labels: Vec<PromptLabel>) -> Result<(), SessionError> {
        let project_id = self.require_project_id()?;
        let image_id = self.selected_image_id.clone().ok_or(SessionError::NoImage)?;
        self.send(ClientEvent::SetMagicPoints {
            project_id,
            image_id,
            points,
            labels,
        })
    }

    // ---- pointer and keys ----
    //
    // Points are in original-image space; the canvas converts before
    // calling in.

    pub fn pointer_down(&mut self, at: Point, button: PointerButton) -> Result<(), SessionError> {
        if self.selected_image_id.is_none() {
            return Ok(());
        }
        let action = self.draw.pointer_down(self.mode, at, button);
        self.dispatch(action)
    }

    pub fn pointer_move(&mut self, at: Point) {
        self.draw.pointer_move(at);
    }

    pub fn pointer_up(&mut self, at: Point) -> Result<(), SessionError> {
        let action = self.draw.pointer_up(at);
        self.dispatch(action)
    }

    pub fn commit_key(&mut self) -> Result<(), SessionError> {
        let action = self.draw.commit();
        self.dispatch(action)
    }

    pub fn cancel_key(&mut self) {
        self.draw.cancel();
    }

    fn dispatch(&mut self, action: DrawAction) -> Result<(), SessionError> {
        match action {
            DrawAction::None => Ok(()),
            DrawAction::Commit(points) => {
                let class_name = self.default_class();
                self.add_annotation(points, class_name)
            }
            DrawAction::CommitBatch(polygons) => {
                let class_name = self.default_class();
                let batch = polygons
                    .into_iter()
                    .map(|points| NewAnnotation {
                        points,
                        class_name: class_name.clone(),
                    })
                    .collect();
                self.add_annotations(batch)
            }
            DrawAction::Prompt { points, labels } => self.set_magic_points(points, labels),
        }
    }

    fn default_class(&self) -> String {
        self.project.as_ref().map(|p| p.default_class.clone()).unwrap_or_default()
    }

    // ---- inbound ----

    pub fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Connected => {
                if let Some(project_id) = self.project_id.clone() {
                    log_failure("get_project", self.send(ClientEvent::GetProject { project_id }));
                }
            }
            Inbound::Disconnected => {
                tracing::warn!("Lost connection to backend");
            }
            Inbound::Push(push) => self.apply_push(push),
            Inbound::MediaUploaded(upload) => {
                self.loading = false;
                self.apply_upload(upload);
            }
            Inbound::MediaFailed(reason) => {
                self.loading = false;
                tracing::error!("Upload failed: {reason}");
            }
        }
    }

    fn apply_push(&mut self, mut push: ServerPush) {
        if !push.is_ok() {
            tracing::warn!(event = ?push.event, status = push.status, "Backend rejected request: {}", push.message);
        }
        if matches!(push.event, PushEvent::SetMagicImage | PushEvent::SetMagicPoints) {
            self.loading = false;
        }

        match std::mem::replace(&mut push.payload, PushPayload::Empty) {
            PushPayload::Project(project) => {
                self.replace_project(*project);
            }
            PushPayload::MagicPolygons(polygons) => {
                tracing::debug!(count = polygons.len(), "Magic suggestions");
                self.draw.set_suggestions(polygons);
            }
            PushPayload::Empty => {}
        }
        self.last_push = Some(push);
    }

    fn apply_upload(&mut self, upload: MediaUpload) {
        match upload {
            MediaUpload::Image {
                image_id,
                bytes,
                project,
            } => {
                if let Err(e) = self.blobs.put(&image_id, &bytes) {
                    tracing::warn!(error = %e, "Failed to cache image");
                }
                if self.replace_project(project) {
                    self.set_selected_video_id(None);
                    self.set_selected_image_id(Some(image_id));
                }
            }
            MediaUpload::Video {
                video_id,
                frames,
                project,
            } => {
                for (id, png) in &frames {
                    if let Err(e) = self.blobs.put(id, png) {
                        tracing::warn!(error = %e, "Failed to cache frame");
                    }
                }
                if self.replace_project(project) {
                    self.set_selected_video_id(Some(video_id));
                }
            }
        }
    }

    /// Adopt a snapshot unless it belongs to another project or is older
    /// than the one held. Returns whether it was applied.
    fn replace_project(&mut self, project: Project) -> bool {
        self.push_seq += 1;
        if let Some(open) = &self.project_id {
            if open != &project.id {
                tracing::debug!(project_id = %project.id, "Ignoring snapshot of another project");
                return false;
            }
        }

        match (self.revision, project.revision) {
            (Some(current), Some(incoming)) if incoming < current => {
                tracing::warn!(current, incoming, "Dropping stale snapshot");
                return false;
            }
            (_, None) => {
                tracing::debug!(seq = self.push_seq, "Applying unversioned snapshot");
            }
            _ => {}
        }

        self.revision = project.revision;
        self.project_id = Some(project.id.clone());
        self.project = Some(project);
        self.reconcile_selection();
        true
    }

    /// Drop selections the new snapshot no longer contains.
    fn reconcile_selection(&mut self) {
        if self.selected_video_id.is_some() {
            match self.selected_video().map(|v| v.frame_count()) {
                None => {
                    self.selected_video_id = None;
                    self.frame_number = None;
                    self.playing = false;
                }
                Some(count) if self.frame_number.is_some_and(|f| f >= count) => {
                    self.frame_number = None;
                    self.playing = false;
                }
                Some(_) => {}
            }
        }
        if self.selected_image_id.is_some() && self.selected_image().is_none() {
            self.selected_image_id = None;
            self.selected_annotation_id = None;
            self.draw.reset();
        }
        if self.selected_annotation_id.is_some() && self.selected_annotation().is_none() {
            self.selected_annotation_id = None;
        }
    }

    // ---- helpers ----

    fn require_project_id(&self) -> Result<ProjectId, SessionError> {
        self.project_id.clone().ok_or(SessionError::NoProject)
    }

    fn target(&self) -> Result<Target, SessionError> {
        let project_id = self.require_project_id()?;
        let image_id = self.selected_image_id.clone().ok_or(SessionError::NoImage)?;
        let (video_id, frame_number) = match (&self.selected_video_id, self.frame_number) {
            (Some(video), Some(frame)) => (Some(video.clone()), Some(frame)),
            _ => (None, None),
        };
        Ok(Target {
            project_id,
            image_id,
            video_id,
            frame_number,
        })
    }

    fn send(&self, event: ClientEvent) -> Result<(), SessionError> {
        self.sink.send(event)?;
        Ok(())
    }
}

fn log_failure(what: &str, result: Result<(), SessionError>) {
    if let Err(e) = result {
        tracing::warn!(error = %e, "{what} failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_cache::MemoryBlobStore;
    use crate::model::VideoFrame;
    use assert_matches::assert_matches;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct RecordingSink(Rc<RefCell<Vec<ClientEvent>>>);

    impl EventSink for RecordingSink {
        fn send(&self, event: ClientEvent) -> Result<(), ChannelError> {
            self.0.borrow_mut().push(event);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingMedia(Rc<RefCell<Vec<PathBuf>>>);

    impl MediaRequests for RecordingMedia {
        fn upload_image(&self, _project_id: ProjectId, path: PathBuf) {
            self.0.borrow_mut().push(path);
        }

        fn upload_video(&self, _project_id: ProjectId, path: PathBuf, _method: SampleMethod) {
            self.0.borrow_mut().push(path);
        }
    }

    fn p(x: f32, y: f32) -> Point {
        Point::new(x, y)
    }

    fn image(id: &str, annotations: &[&str]) -> ImageAnnotation {
        ImageAnnotation {
            id: MediaId(id.into()),
            file_name: format!("{id}.png"),
            annotations: annotations
                .iter()
                .map(|a| Annotation {
                    id: AnnotationId((*a).into()),
                    class_name: "car".into(),
                    points: vec![p(0.0, 0.0), p(10.0, 0.0), p(10.0, 10.0)],
                    finished: true,
                })
                .collect(),
        }
    }

    fn project(revision: Option<u64>) -> Project {
        Project {
            id: ProjectId("p1".into()),
            name: "Street".into(),
            classes: vec!["car".into(), "person".into()],
            default_class: "car".into(),
            images: vec![image("img1", &["a1"]), image("img2", &[])],
            videos: vec![VideoAnnotation {
                id: MediaId("v1".into()),
                file_name: "clip.mp4".into(),
                fps: 10.0,
                frames: (0..3)
                    .map(|i| VideoFrame {
                        image: image(&format!("f{i}"), &[]),
                        frame_number: i,
                        key_frame: i == 0,
                    })
                    .collect(),
            }],
            revision,
        }
    }

    fn push(event: PushEvent, payload: PushPayload) -> Inbound {
        Inbound::Push(ServerPush {
            event,
            status: 200,
            message: String::new(),
            payload,
        })
    }

    fn session() -> (AnnotationSession, RecordingSink, RecordingMedia) {
        let sink = RecordingSink::default();
        let media = RecordingMedia::default();
        let session = AnnotationSession::new(
            Box::new(sink.clone()),
            Box::new(media.clone()),
            Box::new(MemoryBlobStore::new()),
        );
        (session, sink, media)
    }

    fn opened(revision: Option<u64>) -> (AnnotationSession, RecordingSink, RecordingMedia) {
        let (mut s, sink, media) = session();
        s.open_project(ProjectId("p1".into())).unwrap();
        s.handle_inbound(push(PushEvent::GetProject, PushPayload::Project(Box::new(project(revision)))));
        sink.0.borrow_mut().clear();
        (s, sink, media)
    }

    #[test]
    fn lookups_are_empty_without_selection() {
        let (s, _, _) = opened(None);
        assert!(s.selected_image().is_none());
        assert!(s.selected_annotation().is_none());
        assert!(s.selected_video().is_none());
    }

    #[test]
    fn unknown_annotation_id_resolves_to_none() {
        let (mut s, _, _) = opened(None);
        s.set_selected_image_id(Some(MediaId("img1".into())));
        s.set_selected_annotation_id(Some(AnnotationId("missing".into())));
        assert!(s.selected_annotation().is_none());
        s.set_selected_annotation_id(Some(AnnotationId("a1".into())));
        assert_eq!(s.selected_annotation().map(|a| a.class_name.as_str()), Some("car"));
    }

    #[test]
    fn out_of_range_frame_is_ignored() {
        let (mut s, _, _) = opened(None);
        s.set_selected_video_id(Some(MediaId("v1".into())));
        assert_eq!(s.frame_number(), Some(0));
        assert!(s.set_frame_number(2));
        assert!(!s.set_frame_number(3));
        assert_eq!(s.frame_number(), Some(2));
        assert_eq!(s.selected_image_id(), Some(&MediaId("f2".into())));
    }

    #[test]
    fn stepping_past_the_end_stops_playback() {
        let (mut s, _, _) = opened(None);
        s.set_selected_video_id(Some(MediaId("v1".into())));
        s.set_playing(true);
        assert!(s.step_frame(true));
        assert!(s.step_frame(true));
        assert!(!s.step_frame(true));
        assert!(!s.is_playing());
        assert_eq!(s.frame_number(), Some(2));
    }

    #[test]
    fn mode_switch_discards_draft() {
        let (mut s, sink, _) = opened(None);
        s.set_selected_image_id(Some(MediaId("img1".into())));
        s.set_annotation_mode(AnnotationMode::Polygon);
        s.pointer_down(p(1.0, 1.0), PointerButton::Primary).unwrap();
        s.pointer_down(p(5.0, 1.0), PointerButton::Primary).unwrap();
        assert!(!s.draw().is_idle());

        s.set_annotation_mode(AnnotationMode::Select);
        assert!(s.draw().is_idle());
        s.commit_key().unwrap();
        assert!(sink.0.borrow().is_empty());
    }

    #[test]
    fn image_switch_discards_draft() {
        let (mut s, _, _) = opened(None);
        s.set_annotation_mode(AnnotationMode::Polygon);
        s.set_selected_image_id(Some(MediaId("img1".into())));
        s.pointer_down(p(1.0, 1.0), PointerButton::Primary).unwrap();
        s.set_selected_image_id(Some(MediaId("img2".into())));
        assert!(s.draw().is_idle());
    }

    #[test]
    fn polygon_commit_sends_default_class() {
        let (mut s, sink, _) = opened(None);
        s.set_selected_image_id(Some(MediaId("img1".into())));
        s.set_annotation_mode(AnnotationMode::Polygon);
        for at in [p(0.0, 0.0), p(10.0, 0.0), p(10.0, 10.0)] {
            s.pointer_down(at, PointerButton::Primary).unwrap();
        }
        s.commit_key().unwrap();

        let sent = sink.0.borrow();
        assert_matches!(&sent[..], [ClientEvent::AddAnnotation { target, points, class_name }] => {
            assert_eq!(target.image_id, MediaId("img1".into()));
            assert_eq!(target.video_id, None);
            assert_eq!(points.len(), 3);
            assert_eq!(class_name, "car");
        });
    }

    #[test]
    fn frame_annotations_target_the_frame() {
        let (mut s, sink, _) = opened(None);
        s.set_selected_video_id(Some(MediaId("v1".into())));
        s.set_frame_number(1);
        s.add_annotation(vec![p(0.0, 0.0), p(1.0, 0.0), p(1.0, 1.0)], "person".into())
            .unwrap();
        assert_matches!(&sink.0.borrow()[..], [ClientEvent::AddAnnotation { target, .. }] => {
            assert_eq!(target.video_id, Some(MediaId("v1".into())));
            assert_eq!(target.frame_number, Some(1));
            assert_eq!(target.image_id, MediaId("f1".into()));
        });
    }

    #[test]
    fn magic_flow_prompts_then_commits_batch() {
        let (mut s, sink, _) = opened(None);
        s.set_selected_image_id(Some(MediaId("img1".into())));
        s.set_annotation_mode(AnnotationMode::Magic);
        assert!(s.is_loading());
        s.handle_inbound(push(PushEvent::SetMagicImage, PushPayload::Empty));
        assert!(!s.is_loading());

        s.pointer_down(p(3.0, 3.0), PointerButton::Primary).unwrap();
        s.handle_inbound(push(
            PushEvent::SetMagicPoints,
            PushPayload::MagicPolygons(vec![vec![p(0.0, 0.0), p(6.0, 0.0), p(6.0, 6.0)]]),
        ));
        s.commit_key().unwrap();

        let sent = sink.0.borrow();
        assert_matches!(sent[0], ClientEvent::SetMagicImage { .. });
        assert_matches!(&sent[1], ClientEvent::SetMagicPoints { labels, .. } if labels == &[PromptLabel::Positive]);
        assert_matches!(&sent[2], ClientEvent::AddAnnotations { annotations, .. } => {
            assert_eq!(annotations.len(), 1);
            assert_eq!(annotations[0].class_name, "car");
        });
    }

    #[test]
    fn stale_revision_is_dropped() {
        let (mut s, _, _) = opened(Some(5));
        let mut older = project(Some(4));
        older.name = "Old".into();
        s.handle_inbound(push(PushEvent::ChangeProjectName, PushPayload::Project(Box::new(older))));
        assert_eq!(s.project().map(|p| p.name.as_str()), Some("Street"));

        let mut newer = project(Some(6));
        newer.name = "New".into();
        s.handle_inbound(push(PushEvent::ChangeProjectName, PushPayload::Project(Box::new(newer))));
        assert_eq!(s.project().map(|p| p.name.as_str()), Some("New"));
    }

    #[test]
    fn unversioned_snapshots_last_push_wins() {
        let (mut s, _, _) = opened(None);
        let mut renamed = project(None);
        renamed.name = "Renamed".into();
        s.handle_inbound(push(PushEvent::ChangeProjectName, PushPayload::Project(Box::new(renamed))));
        assert_eq!(s.project().map(|p| p.name.as_str()), Some("Renamed"));
        assert_eq!(s.last_push().map(|p| p.event), Some(PushEvent::ChangeProjectName));
    }

    #[test]
    fn snapshot_removing_selection_clears_it() {
        let (mut s, _, _) = opened(None);
        s.set_selected_image_id(Some(MediaId("img1".into())));
        s.set_selected_annotation_id(Some(AnnotationId("a1".into())));
        let mut next = project(None);
        next.images[0].annotations.clear();
        s.handle_inbound(push(PushEvent::DeleteAnnotation, PushPayload::Project(Box::new(next))));
        assert_eq!(s.selected_image_id(), Some(&MediaId("img1".into())));
        assert!(s.selected_annotation_id().is_none());
    }

    #[test]
    fn upload_caches_bytes_under_assigned_id() {
        let (mut s, _, media) = opened(None);
        s.upload_image(PathBuf::from("/tmp/cat.png")).unwrap();
        assert!(s.is_loading());
        assert_eq!(media.0.borrow().len(), 1);

        let mut next = project(None);
        next.images.push(image("img3", &[]));
        s.handle_inbound(Inbound::MediaUploaded(MediaUpload::Image {
            image_id: MediaId("img3".into()),
            bytes: vec![1, 2, 3],
            project: next,
        }));
        assert!(!s.is_loading());
        assert_eq!(s.cached_media(&MediaId("img3".into())), Some(vec![1, 2, 3]));
        assert_eq!(s.selected_image_id(), Some(&MediaId("img3".into())));
    }

    #[test]
    fn removing_image_evicts_blob() {
        let (mut s, sink, _) = opened(None);
        s.handle_inbound(Inbound::MediaUploaded(MediaUpload::Image {
            image_id: MediaId("img2".into()),
            bytes: vec![9],
            project: project(None),
        }));
        s.remove_selected_image().unwrap();
        assert_eq!(s.cached_media(&MediaId("img2".into())), None);
        assert!(s.selected_image_id().is_none());
        assert_matches!(&sink.0.borrow()[..], [ClientEvent::DeleteImage { image_id, .. }] if image_id == &MediaId("img2".into()));
    }

    #[test]
    fn removing_video_evicts_every_frame() {
        let (mut s, _, _) = opened(None);
        s.handle_inbound(Inbound::MediaUploaded(MediaUpload::Video {
            video_id: MediaId("v1".into()),
            frames: (0..3).map(|i| (MediaId(format!("f{i}")), vec![i as u8])).collect(),
            project: project(None),
        }));
        assert_eq!(s.frame_number(), Some(0));
        assert_eq!(s.cached_media(&MediaId("f2".into())), Some(vec![2]));

        s.remove_selected_video().unwrap();
        for i in 0..3 {
            assert_eq!(s.cached_media(&MediaId(format!("f{i}"))), None);
        }
        assert!(s.selected_video_id().is_none());
        assert!(s.selected_image_id().is_none());
        assert_eq!(s.frame_number(), None);
    }

    #[test]
    fn nothing_is_annotated_after_removing_a_video() {
        let (mut s, sink, _) = opened(None);
        s.set_selected_video_id(Some(MediaId("v1".into())));
        s.remove_selected_video().unwrap();
        sink.0.borrow_mut().clear();

        assert_matches!(
            s.add_annotation(vec![p(0.0, 0.0), p(5.0, 0.0), p(5.0, 5.0)], "car".into()),
            Err(SessionError::NoImage)
        );
        assert_matches!(s.remove_selected_image(), Err(SessionError::NoImage));
        assert!(sink.0.borrow().is_empty());
    }

    #[test]
    fn failed_magic_image_request_does_not_stick_loading() {
        struct ClosedSink;
        impl EventSink for ClosedSink {
            fn send(&self, _event: ClientEvent) -> Result<(), ChannelError> {
                Err(ChannelError::Closed)
            }
        }

        let mut s = AnnotationSession::new(
            Box::new(ClosedSink),
            Box::new(RecordingMedia::default()),
            Box::new(MemoryBlobStore::new()),
        );
        assert_matches!(
            s.open_project(ProjectId("p1".into())),
            Err(SessionError::Channel(ChannelError::Closed))
        );
        s.handle_inbound(push(PushEvent::GetProject, PushPayload::Project(Box::new(project(None)))));
        s.set_selected_image_id(Some(MediaId("img1".into())));

        assert_matches!(s.set_magic_image(), Err(SessionError::Channel(ChannelError::Closed)));
        assert!(!s.is_loading());
    }

    #[test]
    fn existing_class_is_not_added_again() {
        let (mut s, sink, _) = opened(None);
        s.add_class("car".into()).unwrap();
        assert!(sink.0.borrow().is_empty());
        s.add_class("bike".into()).unwrap();
        assert_matches!(&sink.0.borrow()[..], [ClientEvent::AddClass { class_name, .. }] if class_name == "bike");
    }

    #[test]
    fn reconnect_requests_project_again() {
        let (mut s, sink, _) = opened(None);
        s.handle_inbound(Inbound::Connected);
        assert_matches!(&sink.0.borrow()[..], [ClientEvent::GetProject { project_id }] if project_id.0 == "p1");
    }

    #[test]
    fn requests_without_project_fail() {
        let (mut s, _, _) = session();
        assert_matches!(s.add_class("car".into()), Err(SessionError::NoProject));
        assert_matches!(s.upload_image(PathBuf::from("a.png")), Err(SessionError::NoProject));
    }

    #[test]
    fn failed_upload_clears_loading() {
        let (mut s, _, _) = opened(None);
        s.upload_image(PathBuf::from("a.png")).unwrap();
        s.handle_inbound(Inbound::MediaFailed("boom".into()));
        assert!(!s.is_loading());
    }
}
