//! Sampling a video into a bounded set of still frames before upload.
//!
//! The plan is pure: how many frames and at which timestamps. Extraction
//! shells out to `ffprobe`/`ffmpeg` and captures frames strictly one after
//! another, each seek finishing before the next begins.

use std::path::Path;

use serde::Deserialize;

pub const MIN_FRAMES: usize = 10;
pub const MAX_FRAMES: usize = 100;

/// How the requested amount is interpreted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SampleMethod {
    /// Frames per second of video.
    PerSecond(f64),
    /// Frames across the whole duration.
    Total(usize),
}

/// Number of frames to take from a video of `duration` seconds, clamped to
/// `[MIN_FRAMES, MAX_FRAMES]`. A fractional per-second count rounds up.
pub fn frame_count(duration: f64, method: SampleMethod) -> usize {
    let requested = match method {
        SampleMethod::PerSecond(fps) => {
            let n = duration * fps;
            if n.is_finite() && n > 0.0 {
                n.ceil() as usize
            } else {
                0
            }
        }
        SampleMethod::Total(n) => n,
    };
    requested.clamp(MIN_FRAMES, MAX_FRAMES)
}

/// Evenly spaced capture timestamps, starting at zero and strictly
/// increasing. The last one sits one interval before the end, so the
/// samples span the whole clip.
pub fn sample_times(duration: f64, count: usize) -> Vec<f64> {
    if !(duration.is_finite() && duration > 0.0) || count == 0 {
        return Vec::new();
    }
    let step = duration / count as f64;
    (0..count).map(|i| i as f64 * step).collect()
}

/// The capture schedule for one video.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplePlan {
    pub duration: f64,
    pub times: Vec<f64>,
}

impl SamplePlan {
    pub fn new(duration: f64, method: SampleMethod) -> Self {
        let count = frame_count(duration, method);
        Self {
            duration,
            times: sample_times(duration, count),
        }
    }

    /// Effective frames per second of the sampled sequence.
    pub fn effective_fps(&self) -> f64 {
        if self.duration > 0.0 {
            self.times.len() as f64 / self.duration
        } else {
            0.0
        }
    }
}

/// One captured still.
#[derive(Clone, Debug)]
pub struct SampledFrame {
    pub file_name: String,
    /// PNG-encoded pixels.
    pub png: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("video file not found: {0}")]
    VideoNotFound(String),

    #[error("video has no usable duration")]
    NoDuration,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe_duration(stdout: &str) -> Result<f64, FrameError> {
    let probe: ProbeOutput =
        serde_json::from_str(stdout).map_err(|e| FrameError::ParseError(format!("{e}: {stdout}")))?;
    probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or(FrameError::NoDuration)
}

/// Duration of a video in seconds, via `ffprobe`.
pub async fn probe_duration(path: &Path) -> Result<f64, FrameError> {
    if !path.exists() {
        return Err(FrameError::VideoNotFound(path.to_string_lossy().to_string()));
    }

    let output = tokio::process::Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(path)
        .output()
        .await
        .map_err(FrameError::NotFound)?;

    if !output.status.success() {
        return Err(FrameError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    parse_probe_duration(&String::from_utf8_lossy(&output.stdout))
}

/// Capture one frame at `timestamp_secs` as PNG bytes on stdout.
async fn capture_frame(path: &Path, timestamp_secs: f64) -> Result<Vec<u8>, FrameError> {
    let output = tokio::process::Command::new("ffmpeg")
        .args(["-v", "error", "-ss", &format!("{timestamp_secs:.3}"), "-i"])
        .arg(path)
        .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
        .output()
        .await
        .map_err(FrameError::NotFound)?;

    if !output.status.success() || output.stdout.is_empty() {
        return Err(FrameError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    Ok(output.stdout)
}

/// Sample `path` according to `method`. Frames come back in timestamp
/// order; each capture completes before the next is started.
pub async fn extract_frames(
    path: &Path,
    method: SampleMethod,
) -> Result<(SamplePlan, Vec<SampledFrame>), FrameError> {
    let duration = probe_duration(path).await?;
    let plan = SamplePlan::new(duration, method);

    let mut frames = Vec::with_capacity(plan.times.len());
    for (index, &time) in plan.times.iter().enumerate() {
        let started = std::time::Instant::now();
        let png = capture_frame(path, time).await?;
        tracing::debug!(
            index,
            timestamp_secs = time,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Captured frame",
        );
        frames.push(SampledFrame {
            file_name: format!("frame-{time:.3}.png"),
            png,
        });
    }

    tracing::info!(
        count = frames.len(),
        duration_secs = duration,
        "Sampled {}",
        path.display()
    );
    Ok((plan, frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn ten_seconds_at_ten_fps_stays_in_range() {
        let plan = SamplePlan::new(10.0, SampleMethod::PerSecond(10.0));
        let n = plan.times.len();
        assert!((MIN_FRAMES..=MAX_FRAMES).contains(&n));
        assert!(plan.times.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(plan.times[0], 0.0);
        let step = 10.0 / n as f64;
        assert!((plan.times[n - 1] - (10.0 - step)).abs() < 1e-9);
    }

    #[test]
    fn intervals_are_even() {
        let times = sample_times(7.0, 14);
        let gaps: Vec<f64> = times.windows(2).map(|w| w[1] - w[0]).collect();
        for g in gaps {
            assert!((g - 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn partial_seconds_round_up() {
        assert_eq!(frame_count(10.4, SampleMethod::PerSecond(1.0)), 11);
        assert_eq!(frame_count(20.0, SampleMethod::PerSecond(0.75)), 15);
        assert_eq!(frame_count(12.0, SampleMethod::PerSecond(1.0)), 12);
    }

    #[test]
    fn long_video_is_capped() {
        assert_eq!(frame_count(600.0, SampleMethod::PerSecond(10.0)), MAX_FRAMES);
        assert_eq!(frame_count(1.0, SampleMethod::Total(5000)), MAX_FRAMES);
    }

    #[test]
    fn short_video_gets_the_minimum() {
        assert_eq!(frame_count(0.5, SampleMethod::PerSecond(10.0)), MIN_FRAMES);
        assert_eq!(frame_count(3.0, SampleMethod::Total(2)), MIN_FRAMES);
        assert_eq!(frame_count(f64::NAN, SampleMethod::PerSecond(10.0)), MIN_FRAMES);
    }

    #[test]
    fn zero_duration_has_no_samples() {
        assert!(sample_times(0.0, 10).is_empty());
        assert_eq!(SamplePlan::new(0.0, SampleMethod::Total(10)).effective_fps(), 0.0);
    }

    #[test]
    fn effective_fps() {
        let plan = SamplePlan::new(20.0, SampleMethod::PerSecond(10.0));
        assert_eq!(plan.times.len(), MAX_FRAMES);
        assert!((plan.effective_fps() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn probe_duration_parsing() {
        let d = parse_probe_duration(r#"{"format":{"duration":"12.480000"}}"#).unwrap();
        assert!((d - 12.48).abs() < 1e-9);
        assert_matches!(parse_probe_duration(r#"{"format":{}}"#), Err(FrameError::NoDuration));
        assert_matches!(parse_probe_duration("garbage"), Err(FrameError::ParseError(_)));
    }

    #[tokio::test]
    async fn missing_video_is_reported() {
        let result = probe_duration(Path::new("/definitely/not/here.mp4")).await;
        assert_matches!(result, Err(FrameError::VideoNotFound(_)));
    }
}
