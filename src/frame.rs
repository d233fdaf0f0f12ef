//! Frame types flowing through the capture pipeline.
//!
//! - `RawFrame`: pixels exactly as the sensor delivered them.
//! - `CorrectedFrame`: output of the color transform, same shape and channel order.
//! - `EncodedFrame`: a JPEG bitstream ready for the multipart stream.
//!
//! All three are ephemeral: each is produced for one capture, consumed by the next
//! stage, and dropped. None of them implement `Clone`, and `Debug` never prints pixels.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;

/// Default sensor resolution.
pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

/// Interleaved channels per pixel.
pub const CHANNELS: usize = 3;

/// Content type of every encoded frame.
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Memory layout of a 24-bit interleaved pixel.
///
/// Color gains are defined per physical color, so every consumer must go through
/// `rgb_indices` rather than assuming index 0 is red.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Red, green, blue (V4L2 `RGB3`).
    Rgb24,
    /// Blue, green, red (V4L2 `BGR3`, libcamera `RGB888`).
    Bgr24,
}

impl PixelFormat {
    /// Byte offsets of (red, green, blue) within one pixel.
    pub fn rgb_indices(self) -> (usize, usize, usize) {
        match self {
            PixelFormat::Rgb24 => (0, 1, 2),
            PixelFormat::Bgr24 => (2, 1, 0),
        }
    }

    pub fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Bgr24 => *b"BGR3",
        }
    }

    pub fn from_fourcc(code: &[u8; 4]) -> Option<Self> {
        match code {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"BGR3" => Some(PixelFormat::Bgr24),
            _ => None,
        }
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

fn check_len(data: &[u8], width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(anyhow!("frame dimensions must be non-zero"));
    }
    let expected = expected_len(width, height)?;
    if data.len() != expected {
        return Err(anyhow!(
            "frame length mismatch: expected {}, got {}",
            expected,
            data.len()
        ));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// RawFrame
// ----------------------------------------------------------------------------

/// One capture from the sensor.
pub struct RawFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl RawFrame {
    /// Wrap sensor bytes. Fails if the buffer does not hold exactly
    /// `width * height * 3` bytes.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        check_len(&data, width, height)?;
        Ok(Self {
            data,
            width,
            height,
            format,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// CorrectedFrame
// ----------------------------------------------------------------------------

/// Color-corrected frame, same layout as the `RawFrame` it came from.
#[derive(PartialEq, Eq)]
pub struct CorrectedFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl CorrectedFrame {
    pub(crate) fn from_parts(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        debug_assert!(check_len(&data, width, height).is_ok());
        Self {
            data,
            width,
            height,
            format,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Pixels reordered to RGB, the layout the JPEG encoder expects.
    pub fn to_rgb(&self) -> Vec<u8> {
        match self.format {
            PixelFormat::Rgb24 => self.data.clone(),
            PixelFormat::Bgr24 => {
                let mut rgb = Vec::with_capacity(self.data.len());
                for px in self.data.chunks_exact(CHANNELS) {
                    rgb.extend_from_slice(&[px[2], px[1], px[0]]);
                }
                rgb
            }
        }
    }
}

impl fmt::Debug for CorrectedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrectedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// EncodedFrame
// ----------------------------------------------------------------------------

/// A JPEG bitstream for one frame.
pub struct EncodedFrame {
    bytes: Vec<u8>,
}

impl EncodedFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn content_type(&self) -> &'static str {
        JPEG_CONTENT_TYPE
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for EncodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedFrame")
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_frame_validates_length() {
        assert!(RawFrame::new(vec![0u8; 12], 2, 2, PixelFormat::Rgb24).is_ok());
        assert!(RawFrame::new(vec![0u8; 11], 2, 2, PixelFormat::Rgb24).is_err());
        assert!(RawFrame::new(vec![], 0, 0, PixelFormat::Rgb24).is_err());
    }

    #[test]
    fn bgr_frames_reorder_to_rgb() {
        let frame = CorrectedFrame::from_parts(vec![1, 2, 3, 4, 5, 6], 2, 1, PixelFormat::Bgr24);
        assert_eq!(frame.to_rgb(), vec![3, 2, 1, 6, 5, 4]);

        let frame = CorrectedFrame::from_parts(vec![1, 2, 3], 1, 1, PixelFormat::Rgb24);
        assert_eq!(frame.to_rgb(), vec![1, 2, 3]);
    }

    #[test]
    fn fourcc_round_trips_supported_formats() {
        for format in [PixelFormat::Rgb24, PixelFormat::Bgr24] {
            assert_eq!(PixelFormat::from_fourcc(&format.fourcc()), Some(format));
        }
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), None);
    }

    #[test]
    fn debug_output_omits_pixels() {
        let frame = RawFrame::new(vec![7u8; 3], 1, 1, PixelFormat::Bgr24).unwrap();
        let text = format!("{:?}", frame);
        assert!(text.contains("width: 1"));
        assert!(!text.contains("data"));
    }
}
