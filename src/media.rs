//! Upload jobs. The session fires them and forgets; each job reports back
//! through the inbox once the backend has answered.

use std::path::{Path, PathBuf};

use tokio::runtime::Handle;

use crate::api::{ApiError, FrameUpload, MediaApi};
use crate::frames::{self, FrameError, SampleMethod};
use crate::model::{MediaId, Project, ProjectId};
use crate::session::{Inbound, Inbox};

/// A finished upload: the bytes to cache and the snapshot to adopt.
#[derive(Debug, Clone)]
pub enum MediaUpload {
    Image {
        image_id: MediaId,
        bytes: Vec<u8>,
        project: Project,
    },
    Video {
        video_id: MediaId,
        /// Frame image ids paired with their PNG bytes, in frame order.
        frames: Vec<(MediaId, Vec<u8>)>,
        project: Project,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Frames(#[from] FrameError),

    #[error("backend returned {ids} frame ids for {frames} frames")]
    FrameMismatch { ids: usize, frames: usize },
}

/// Where uploads are sent. Implementations must not block the caller.
pub trait MediaRequests {
    fn upload_image(&self, project_id: ProjectId, path: PathBuf);
    fn upload_video(&self, project_id: ProjectId, path: PathBuf, method: SampleMethod);
}

/// Runs uploads on the tokio runtime against the HTTP API.
pub struct HttpMedia {
    api: MediaApi,
    runtime: Handle,
    inbox: Inbox,
}

impl HttpMedia {
    pub fn new(api: MediaApi, runtime: Handle, inbox: Inbox) -> Self {
        Self { api, runtime, inbox }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string())
}

async fn upload_image(api: &MediaApi, project_id: &ProjectId, path: &Path) -> Result<MediaUpload, MediaError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| MediaError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file_name = file_name_of(path);
    let uploaded = api.add_image(project_id, &file_name, bytes.clone()).await?;
    tracing::info!(image_id = %uploaded.image_id, "Uploaded {file_name}");
    Ok(MediaUpload::Image {
        image_id: uploaded.image_id,
        bytes,
        project: uploaded.project,
    })
}

async fn upload_video(
    api: &MediaApi,
    project_id: &ProjectId,
    path: &Path,
    method: SampleMethod,
) -> Result<MediaUpload, MediaError> {
    let (plan, sampled) = frames::extract_frames(path, method).await?;
    let pngs: Vec<Vec<u8>> = sampled.iter().map(|f| f.png.clone()).collect();
    let uploads = sampled
        .into_iter()
        .map(|f| FrameUpload {
            file_name: f.file_name,
            png: f.png,
        })
        .collect();

    let file_name = file_name_of(path);
    let uploaded = api
        .add_video(project_id, &file_name, plan.effective_fps(), uploads)
        .await?;
    if uploaded.frame_ids.len() != pngs.len() {
        return Err(MediaError::FrameMismatch {
            ids: uploaded.frame_ids.len(),
            frames: pngs.len(),
        });
    }
    tracing::info!(video_id = %uploaded.video_id, frames = pngs.len(), "Uploaded {file_name}");
    Ok(MediaUpload::Video {
        video_id: uploaded.video_id,
        frames: uploaded.frame_ids.into_iter().zip(pngs).collect(),
        project: uploaded.project,
    })
}

impl MediaRequests for HttpMedia {
    fn upload_image(&self, project_id: ProjectId, path: PathBuf) {
        let api = self.api.clone();
        let inbox = self.inbox.clone();
        self.runtime.spawn(async move {
            let inbound = match upload_image(&api, &project_id, &path).await {
                Ok(upload) => Inbound::MediaUploaded(upload),
                Err(e) => Inbound::MediaFailed(e.to_string()),
            };
            inbox.post(inbound);
        });
    }

    fn upload_video(&self, project_id: ProjectId, path: PathBuf, method: SampleMethod) {
        let api = self.api.clone();
        let inbox = self.inbox.clone();
        self.runtime.spawn(async move {
            let inbound = match upload_video(&api, &project_id, &path, method).await {
                Ok(upload) => Inbound::MediaUploaded(upload),
                Err(e) => Inbound::MediaFailed(e.to_string()),
            };
            inbox.post(inbound);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn file_name_falls_back() {
        assert_eq!(file_name_of(Path::new("/tmp/cat.png")), "cat.png");
        assert_eq!(file_name_of(Path::new("/")), "upload");
    }

    #[tokio::test]
    async fn unreadable_image_fails_before_any_request() {
        let api = MediaApi::new("http://127.0.0.1:9");
        let result = upload_image(&api, &ProjectId("p".into()), Path::new("/no/such/file.png")).await;
        assert_matches!(result, Err(MediaError::Read { .. }));
    }

    #[tokio::test]
    async fn failed_job_posts_to_inbox() {
        let (inbox, receiver) = Inbox::channel(None);
        let media = HttpMedia::new(MediaApi::new("http://127.0.0.1:9"), Handle::current(), inbox);
        media.upload_image(ProjectId("p".into()), PathBuf::from("/no/such/file.png"));

        let received = tokio::task::spawn_blocking(move || {
            receiver.recv_timeout(std::time::Duration::from_secs(5))
        })
        .await
        .unwrap();
        assert_matches!(received, Ok(Inbound::MediaFailed(_)));
    }
}
