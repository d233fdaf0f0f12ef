//! Per-client motion-JPEG stream.
//!
//! A `StreamSession` is a pull-based iterator: each `next()` captures a frame from
//! the shared `FrameSource`, encodes it as JPEG and returns one complete multipart
//! part. It never ends on its own; it stops when its cancel flag is raised, when the
//! transport drops it after a failed write, or when the camera is permanently gone.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::frame::{CorrectedFrame, EncodedFrame, JPEG_CONTENT_TYPE};
use crate::source::{FrameSource, CAPTURE_RETRY_BACKOFF};

pub const BOUNDARY: &str = "frame";
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Encode a corrected frame as baseline JPEG.
pub fn encode_jpeg(frame: &CorrectedFrame, quality: u8) -> Result<EncodedFrame> {
    let rgb = frame.to_rgb();
    let mut bytes = Vec::with_capacity(rgb.len() / 8);
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode(&rgb, frame.width(), frame.height(), ExtendedColorType::Rgb8)
        .context("encode jpeg frame")?;
    Ok(EncodedFrame::new(bytes))
}

/// Wrap one encoded frame in the multipart envelope:
/// `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg>\r\n`.
pub fn multipart_part(frame: &EncodedFrame) -> Vec<u8> {
    let header = format!(
        "--{}\r\nContent-Type: {}\r\n\r\n",
        BOUNDARY, JPEG_CONTENT_TYPE
    );
    let mut part = Vec::with_capacity(header.len() + frame.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(frame.bytes());
    part.extend_from_slice(b"\r\n");
    part
}

pub struct StreamSession {
    source: Arc<FrameSource>,
    quality: u8,
    cancel: Arc<AtomicBool>,
    frames_sent: u64,
    last_emitted: Option<Instant>,
    finished: bool,
}

impl StreamSession {
    pub fn new(source: Arc<FrameSource>, quality: u8, cancel: Arc<AtomicBool>) -> Self {
        Self {
            source,
            quality,
            cancel,
            frames_sent: 0,
            last_emitted: None,
            finished: false,
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn last_emitted(&self) -> Option<Instant> {
        self.last_emitted
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn next_frame(&mut self) -> Option<EncodedFrame> {
        loop {
            if self.finished || self.cancelled() {
                return None;
            }
            match self.source.capture() {
                Ok(frame) => match encode_jpeg(&frame, self.quality) {
                    Ok(encoded) => return Some(encoded),
                    Err(err) => {
                        log::warn!("StreamSession: dropping frame: {:#}", err);
                        std::thread::sleep(CAPTURE_RETRY_BACKOFF);
                    }
                },
                Err(err) if err.is_transient() => {
                    log::warn!("StreamSession: {}; retrying", err);
                    std::thread::sleep(CAPTURE_RETRY_BACKOFF);
                }
                Err(err) => {
                    log::error!("StreamSession: {}; ending stream", err);
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

impl Iterator for StreamSession {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let frame = self.next_frame()?;
        self.frames_sent += 1;
        self.last_emitted = Some(Instant::now());
        Some(multipart_part(&frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SyntheticCamera;
    use crate::config::CameraSettings;
    use crate::frame::{PixelFormat, RawFrame};
    use crate::color::adjust_colors;
    use std::time::Duration;

    fn stub_source() -> Arc<FrameSource> {
        let settings = CameraSettings {
            device: "stub://session".to_string(),
            width: 64,
            height: 48,
            target_fps: 1000,
            warm_up: Duration::ZERO,
            ..CameraSettings::default()
        };
        Arc::new(FrameSource::new(
            Box::new(SyntheticCamera::new(&settings.device)),
            settings,
        ))
    }

    #[test]
    fn jpeg_output_has_markers() -> Result<()> {
        let raw = RawFrame::new(vec![90u8; 16 * 16 * 3], 16, 16, PixelFormat::Bgr24)?;
        let encoded = encode_jpeg(&adjust_colors(&raw), DEFAULT_JPEG_QUALITY)?;
        assert_eq!(&encoded.bytes()[..2], &[0xFF, 0xD8]);
        assert_eq!(&encoded.bytes()[encoded.len() - 2..], &[0xFF, 0xD9]);
        assert_eq!(encoded.content_type(), "image/jpeg");
        Ok(())
    }

    #[test]
    fn part_envelope_is_exact() {
        let part = multipart_part(&EncodedFrame::new(vec![1, 2, 3]));
        assert_eq!(
            part,
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\x01\x02\x03\r\n".to_vec()
        );
    }

    #[test]
    fn session_yields_parts_until_cancelled() {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut session = StreamSession::new(stub_source(), DEFAULT_JPEG_QUALITY, cancel.clone());

        let first = session.next().expect("first part");
        assert!(first.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8"));
        assert!(first.ends_with(b"\r\n"));
        assert!(session.next().is_some());
        assert_eq!(session.frames_sent(), 2);
        assert!(session.last_emitted().is_some());

        cancel.store(true, Ordering::SeqCst);
        assert!(session.next().is_none());
        assert_eq!(session.frames_sent(), 2);
    }
}
