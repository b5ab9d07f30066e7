//! Request/response calls to the annotation backend's HTTP endpoints.
//!
//! Media upload, project creation and COCO export go through here; all
//! other mutations travel over the push channel. Every response is wrapped
//! in `{data, status, message}` and a non-200 `status` is an error even
//! when the HTTP status is 2xx.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::model::{MediaId, Project, ProjectId};

/// HTTP client for one backend.
#[derive(Clone)]
pub struct MediaApi {
    client: reqwest::Client,
    api_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx HTTP status.
    #[error("backend HTTP error ({status}): {body}")]
    Http { status: u16, body: String },

    /// The envelope reported a failure.
    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("backend response had no data")]
    MissingData,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    status: u16,
    #[serde(default)]
    message: String,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, ApiError> {
        if self.status != 200 {
            return Err(ApiError::Rejected {
                status: self.status,
                message: self.message,
            });
        }
        self.data.ok_or(ApiError::MissingData)
    }
}

/// Result of `add-image`: the id the server assigned plus the new snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedImage {
    pub image_id: MediaId,
    pub project: Project,
}

/// Result of `add-video`: one image id per uploaded frame, in order.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedVideo {
    pub video_id: MediaId,
    pub frame_ids: Vec<MediaId>,
    pub project: Project,
}

/// A frame ready to upload.
pub struct FrameUpload {
    pub file_name: String,
    pub png: Vec<u8>,
}

impl MediaApi {
    /// * `api_url` - base URL, e.g. `http://localhost:5000`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.api_url, path)
    }

    pub async fn create_project(&self) -> Result<Project, ApiError> {
        let response = self.client.post(self.url("create-project")).send().await?;
        Self::parse_response(response).await
    }

    pub async fn get_project(&self, project_id: &ProjectId) -> Result<Project, ApiError> {
        let response = self
            .client
            .get(self.url("get-project"))
            .query(&[("project_id", project_id.0.as_str())])
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Upload one image file.
    pub async fn add_image(
        &self,
        project_id: &ProjectId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedImage, ApiError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .client
            .post(self.url("add-image"))
            .query(&[("project_id", project_id.0.as_str()), ("file_name", file_name)])
            .multipart(form)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Upload the sampled frames of one video, in frame order.
    pub async fn add_video(
        &self,
        project_id: &ProjectId,
        file_name: &str,
        fps: f64,
        frames: Vec<FrameUpload>,
    ) -> Result<UploadedVideo, ApiError> {
        let mut form = reqwest::multipart::Form::new();
        for frame in frames {
            let part = reqwest::multipart::Part::bytes(frame.png)
                .file_name(frame.file_name)
                .mime_str("image/png")?;
            form = form.part("frames", part);
        }

        let fps = format!("{fps:.3}");
        let response = self
            .client
            .post(self.url("add-video"))
            .query(&[
                ("project_id", project_id.0.as_str()),
                ("file_name", file_name),
                ("fps", fps.as_str()),
            ])
            .multipart(form)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// The project's annotations in COCO format, as the backend renders them.
    pub async fn export_coco(&self, project_id: &ProjectId) -> Result<serde_json::Value, ApiError> {
        let response = self
            .client
            .get(self.url("export-coco"))
            .query(&[("project_id", project_id.0.as_str())])
            .send()
            .await?;
        Self::parse_response(response).await
    }

    // ---- private helpers ----

    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let envelope: Envelope<T> = response.json().await?;
        envelope.into_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn envelope_status_is_checked() {
        let env: Envelope<serde_json::Value> =
            serde_json::from_str(r#"{"data":null,"status":404,"message":"Image not found"}"#).unwrap();
        assert_matches!(
            env.into_data(),
            Err(ApiError::Rejected { status: 404, message }) if message == "Image not found"
        );
    }

    #[test]
    fn envelope_without_data_is_an_error() {
        let env: Envelope<Project> = serde_json::from_str(r#"{"data":null,"status":200,"message":"ok"}"#).unwrap();
        assert_matches!(env.into_data(), Err(ApiError::MissingData));
    }

    #[test]
    fn uploaded_image_parses() {
        let env: Envelope<UploadedImage> = serde_json::from_str(
            r#"{"data":{"image_id":"img9","project":{"project_id":"p1","imageAnnotations":[{"image_id":"img9","file_name":"a.png","annotations":[]}]}},"status":200,"message":"Image added successfully"}"#,
        )
        .unwrap();
        let uploaded = env.into_data().unwrap();
        assert_eq!(uploaded.image_id, MediaId("img9".into()));
        assert_eq!(uploaded.project.images.len(), 1);
    }

    #[test]
    fn base_url_is_normalised() {
        let api = MediaApi::new("http://localhost:5000/");
        assert_eq!(api.url("create-project"), "http://localhost:5000/api/create-project");
    }
}
