//! camstream
//!
//! Captures frames from a single camera, applies a fixed color correction, and serves
//! the result to any number of browsers as a motion-JPEG stream.
//!
//! # Pipeline
//!
//! camera → `FrameSource::capture` (locked, rate-limited) → `adjust_colors`
//! → `encode_jpeg` → `multipart_part` → socket, once per connected client.
//!
//! # Module Structure
//!
//! - `frame`: RawFrame, CorrectedFrame, EncodedFrame, PixelFormat
//! - `color`: the color transform
//! - `camera`: Camera trait and backends (synthetic, V4L2)
//! - `source`: FrameSource, the single owner of the camera
//! - `stream`: JPEG encoding, multipart framing, StreamSession
//! - `server`: HTTP routes
//! - `config`: file + environment configuration

pub mod camera;
pub mod color;
pub mod config;
pub mod frame;
pub mod server;
pub mod source;
pub mod stream;

pub use camera::{open_camera, Camera, CaptureError, SyntheticCamera};
#[cfg(feature = "v4l2")]
pub use camera::V4l2Camera;
pub use color::{adjust_colors, adjust_pixel};
pub use config::{CameraControls, CameraSettings, ServerSettings, StreamConfig, WhiteBalanceMode};
pub use frame::{CorrectedFrame, EncodedFrame, PixelFormat, RawFrame};
pub use server::{ServerHandle, StreamServer};
pub use source::{FramePacer, FrameSource, CAPTURE_RETRY_BACKOFF};
pub use stream::{encode_jpeg, multipart_part, StreamSession, STREAM_CONTENT_TYPE};
