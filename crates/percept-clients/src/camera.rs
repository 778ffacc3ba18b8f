//! Local camera frames via ffmpeg.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use percept_core::ImageFrame;
use percept_settings::CameraSettings;
use tracing::{debug, instrument, warn};

use crate::errors::{ClientError, ClientResult};
use crate::traits::FrameSource;

/// ffmpeg input format for the host platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureBackend {
    /// macOS `avfoundation`.
    AvFoundation,
    /// Linux Video4Linux2.
    V4l2,
    /// Windows `DirectShow`.
    DirectShow,
}

impl CaptureBackend {
    /// Backend for the platform this binary was built for.
    pub fn host() -> Option<Self> {
        match std::env::consts::OS {
            "macos" => Some(Self::AvFoundation),
            "linux" => Some(Self::V4l2),
            "windows" => Some(Self::DirectShow),
            _ => None,
        }
    }

    fn format(self) -> &'static str {
        match self {
            Self::AvFoundation => "avfoundation",
            Self::V4l2 => "v4l2",
            Self::DirectShow => "dshow",
        }
    }

    fn default_device(self) -> &'static str {
        match self {
            Self::AvFoundation => "0",
            Self::V4l2 => "/dev/video0",
            Self::DirectShow => "video=USB Camera",
        }
    }
}

/// Arguments for grabbing one MJPEG frame to stdout.
pub fn ffmpeg_args(backend: CaptureBackend, device: Option<&str>, width: u32, height: u32) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-f".to_owned(),
        backend.format().to_owned(),
        "-video_size".to_owned(),
        format!("{width}x{height}"),
    ];
    if backend == CaptureBackend::AvFoundation {
        args.extend(["-framerate".to_owned(), "30".to_owned()]);
    }
    args.extend([
        "-i".to_owned(),
        device.unwrap_or_else(|| backend.default_device()).to_owned(),
        "-vframes".to_owned(),
        "1".to_owned(),
        "-f".to_owned(),
        "image2pipe".to_owned(),
        "-vcodec".to_owned(),
        "mjpeg".to_owned(),
        "-q:v".to_owned(),
        "2".to_owned(),
        "-".to_owned(),
    ]);
    args
}

/// Captures still frames from a local camera.
pub struct CameraCapture {
    settings: CameraSettings,
    backend: Option<CaptureBackend>,
}

impl CameraCapture {
    /// Camera on the host platform.
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            backend: CaptureBackend::host(),
        }
    }

    /// Camera with an explicit backend.
    pub fn with_backend(settings: CameraSettings, backend: CaptureBackend) -> Self {
        Self {
            settings,
            backend: Some(backend),
        }
    }
}

#[async_trait]
impl FrameSource for CameraCapture {
    #[instrument(skip_all, fields(ffmpeg = %self.settings.ffmpeg_path))]
    async fn capture(&self) -> ClientResult<Option<ImageFrame>> {
        let backend = self
            .backend
            .ok_or_else(|| ClientError::Capture(format!("unsupported platform: {}", std::env::consts::OS)))?;
        let args = ffmpeg_args(
            backend,
            self.settings.device.as_deref(),
            self.settings.width,
            self.settings.height,
        );

        let mut cmd = tokio::process::Command::new(&self.settings.ffmpeg_path);
        let _ = cmd
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| ClientError::Capture(format!("failed to spawn ffmpeg: {e}")))?;

        let timeout = Duration::from_millis(self.settings.timeout_ms);
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ClientError::Capture(format!("ffmpeg timed out after {timeout:?}")))?
            .map_err(|e| ClientError::Capture(format!("ffmpeg wait failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = ?output.status.code(), stderr = %stderr.trim(), "camera capture failed");
            return Err(ClientError::Capture(format!("ffmpeg exited with {}", output.status)));
        }
        if output.stdout.is_empty() {
            return Err(ClientError::Capture("no image data captured".into()));
        }

        debug!(bytes = output.stdout.len(), "camera frame captured");
        Ok(Some(ImageFrame::from_jpeg_bytes(&output.stdout)))
    }
}
