//! Camera backends.
//!
//! A backend owns the device and knows how to configure it and pull one frame.
//! Backends are never shared directly: `FrameSource` holds the only instance and
//! serializes every call behind its lock.
//!
//! - `stub://<name>`: synthetic camera (always available, used for tests and demos)
//! - device paths such as `/dev/video0`: V4L2 (feature: v4l2)

use anyhow::Result;
use std::fmt;

use crate::config::CameraSettings;
use crate::frame::RawFrame;

pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use synthetic::SyntheticCamera;
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Camera;

/// Device capability driven by `FrameSource`.
pub trait Camera: Send {
    /// Backend identifier for logs.
    fn name(&self) -> &str;

    /// Apply the fixed settings and start streaming. Called at most once.
    fn configure(&mut self, settings: &CameraSettings) -> Result<()>;

    /// Pull the next frame. Blocks until the sensor delivers one.
    fn capture(&mut self) -> Result<RawFrame>;
}

/// Open the backend named by `settings.device`. Does not touch the hardware yet.
pub fn open_camera(settings: &CameraSettings) -> Result<Box<dyn Camera>> {
    if settings.device.starts_with("stub://") {
        return Ok(Box::new(SyntheticCamera::new(&settings.device)));
    }
    #[cfg(feature = "v4l2")]
    {
        Ok(Box::new(V4l2Camera::new(&settings.device)))
    }
    #[cfg(not(feature = "v4l2"))]
    {
        anyhow::bail!(
            "camera device {} requires the v4l2 feature",
            settings.device
        )
    }
}

/// Capture failure, classified by whether the stream can continue.
#[derive(Debug)]
pub enum CaptureError {
    /// The device could not be configured. Permanent for the process.
    Init(String),
    /// A single frame could not be read. Back off and retry.
    Transient(String),
}

impl CaptureError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Transient(_))
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Init(msg) => write!(f, "camera initialization failed: {msg}"),
            CaptureError::Transient(msg) => write!(f, "frame capture failed: {msg}"),
        }
    }
}

impl std::error::Error for CaptureError {}
