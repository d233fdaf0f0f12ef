//! V4L2 camera backend.
//!
//! Opens a local device node (e.g. /dev/video0), negotiates 24-bit RGB or BGR at the
//! configured resolution and frame rate, applies the fixed control set, and captures
//! through a memory-mapped buffer stream.
//!
//! Controls are best effort: drivers expose different subsets with different ranges,
//! so each requested control is scaled into the range the driver reports and skipped
//! with a warning when it is missing.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::Camera;
use crate::config::{CameraControls, CameraSettings, WhiteBalanceMode};
use crate::frame::{PixelFormat, RawFrame, CHANNELS};

const CID_BRIGHTNESS: u32 = 0x0098_0900;
const CID_CONTRAST: u32 = 0x0098_0901;
const CID_SATURATION: u32 = 0x0098_0902;
const CID_AUTO_WHITE_BALANCE: u32 = 0x0098_090c;
const CID_RED_BALANCE: u32 = 0x0098_090e;
const CID_BLUE_BALANCE: u32 = 0x0098_090f;
const CID_SHARPNESS: u32 = 0x0098_091b;
const CID_AUTO_EXPOSURE_BIAS: u32 = 0x009a_0913;
const CID_AUTO_N_PRESET_WHITE_BALANCE: u32 = 0x009a_0914;

const MMAP_BUFFERS: u32 = 4;

pub struct V4l2Camera {
    device: String,
    state: Option<V4l2State>,
    width: u32,
    height: u32,
    /// Bytes per row as negotiated with the driver; may exceed `width * 3`.
    stride: usize,
    format: PixelFormat,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            state: None,
            width: 0,
            height: 0,
            stride: 0,
            format: PixelFormat::Bgr24,
        }
    }

    fn apply_controls(&self, device: &v4l::Device, controls: &CameraControls) {
        let described = match device.query_controls() {
            Ok(described) => described,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: cannot list controls on {}: {}",
                    self.device,
                    err
                );
                return;
            }
        };

        let mut requests = vec![
            (CID_AUTO_WHITE_BALANCE, ControlTarget::Flag(controls.awb_enable)),
            (CID_BRIGHTNESS, ControlTarget::Span((controls.brightness as f64 + 1.0) / 2.0)),
            (CID_CONTRAST, ControlTarget::Scale(controls.contrast as f64)),
            (CID_SATURATION, ControlTarget::Scale(controls.saturation as f64)),
            (CID_SHARPNESS, ControlTarget::Scale(controls.sharpness as f64)),
            // V4L2 exposure bias is in units of 0.001 EV.
            (
                CID_AUTO_EXPOSURE_BIAS,
                ControlTarget::Exact((controls.exposure_value as f64 * 1000.0).round() as i64),
            ),
        ];
        if controls.awb_enable {
            requests.push((
                CID_AUTO_N_PRESET_WHITE_BALANCE,
                ControlTarget::Exact(wb_preset(controls.awb_mode)),
            ));
        } else {
            requests.push((CID_RED_BALANCE, ControlTarget::Scale(controls.colour_gains.0 as f64)));
            requests.push((CID_BLUE_BALANCE, ControlTarget::Scale(controls.colour_gains.1 as f64)));
        }

        for (id, target) in requests {
            let Some(desc) = described.iter().find(|d| d.id == id) else {
                log::warn!(
                    "V4l2Camera: {} has no control 0x{:08x}, skipping",
                    self.device,
                    id
                );
                continue;
            };
            let value = target.resolve(desc.minimum, desc.maximum, desc.default);
            let control = v4l::control::Control {
                id,
                value: v4l::control::Value::Integer(value),
            };
            if let Err(err) = device.set_control(control) {
                log::warn!(
                    "V4l2Camera: failed to set {} = {} on {}: {}",
                    desc.name,
                    value,
                    self.device,
                    err
                );
            } else {
                log::debug!("V4l2Camera: {} = {}", desc.name, value);
            }
        }
    }
}

impl Camera for V4l2Camera {
    fn name(&self) -> &str {
        "v4l2"
    }

    fn configure(&mut self, settings: &CameraSettings) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device)
            .with_context(|| format!("open v4l2 device {}", self.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = v4l::FourCC::new(&settings.pixel_format.fourcc());

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    self.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} does not offer 24-bit RGB capture (got {})",
                self.device,
                format.fourcc
            )
        })?;

        let params = v4l::video::capture::Parameters::with_fps(settings.target_fps);
        if let Err(err) = device.set_params(&params) {
            log::warn!(
                "V4l2Camera: failed to set fps on {}: {}",
                self.device,
                err
            );
        }

        self.apply_controls(&device, &settings.controls);

        self.width = format.width;
        self.height = format.height;
        let row_bytes = format.width as usize * CHANNELS;
        self.stride = (format.stride as usize).max(row_bytes);
        self.format = pixel_format;

        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Camera: configured {} ({}x{} {:?} @ {} fps)",
            self.device,
            self.width,
            self.height,
            self.format,
            settings.target_fps
        );
        Ok(())
    }

    fn capture(&mut self) -> Result<RawFrame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not configured")?;
        let (buf, meta) = state
            .with_mut(|fields| fields.stream.next())
            .context("capture v4l2 frame")?;

        let used = (meta.bytesused as usize).min(buf.len());
        let data = pack_rows(&buf[..used], self.width, self.height, self.stride)?;
        RawFrame::new(data, self.width, self.height, self.format)
    }
}

/// Copy `height` rows of `width * 3` bytes out of a buffer whose rows are
/// `stride` bytes apart, dropping any row padding.
fn pack_rows(buf: &[u8], width: u32, height: u32, stride: usize) -> Result<Vec<u8>> {
    let row_bytes = width as usize * CHANNELS;
    let height = height as usize;
    if height == 0 {
        return Ok(Vec::new());
    }
    let needed = stride * (height - 1) + row_bytes;
    if stride < row_bytes || buf.len() < needed {
        return Err(anyhow!(
            "short v4l2 frame: expected {} bytes (stride {}), got {}",
            needed,
            stride,
            buf.len()
        ));
    }
    if stride == row_bytes {
        return Ok(buf[..row_bytes * height].to_vec());
    }
    let mut data = Vec::with_capacity(row_bytes * height);
    for row in buf.chunks(stride).take(height) {
        data.extend_from_slice(&row[..row_bytes]);
    }
    Ok(data)
}

/// How a requested setting maps into a control's reported range.
enum ControlTarget {
    Flag(bool),
    /// Position within [min, max], 0.0..=1.0.
    Span(f64),
    /// Multiple of the driver default.
    Scale(f64),
    Exact(i64),
}

impl ControlTarget {
    fn resolve(&self, min: i64, max: i64, default: i64) -> i64 {
        let value = match *self {
            ControlTarget::Flag(on) => on as i64,
            ControlTarget::Span(t) => min + ((max - min) as f64 * t.clamp(0.0, 1.0)).round() as i64,
            ControlTarget::Scale(k) => (default as f64 * k).round() as i64,
            ControlTarget::Exact(v) => v,
        };
        value.clamp(min, max.max(min))
    }
}

fn wb_preset(mode: WhiteBalanceMode) -> i64 {
    // enum v4l2_auto_n_preset_white_balance
    match mode {
        WhiteBalanceMode::Auto => 1,
        WhiteBalanceMode::Incandescent | WhiteBalanceMode::Tungsten => 2,
        WhiteBalanceMode::Fluorescent => 3,
        WhiteBalanceMode::Indoor => 4,
        WhiteBalanceMode::Daylight => 6,
        WhiteBalanceMode::Cloudy => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brightness_span_maps_into_driver_range() {
        // +0.1 on a 0..=255 control
        assert_eq!(ControlTarget::Span(0.55).resolve(0, 255, 128), 140);
        assert_eq!(ControlTarget::Span(0.0).resolve(-64, 64, 0), -64);
    }

    #[test]
    fn scaled_controls_follow_driver_default() {
        assert_eq!(ControlTarget::Scale(1.1).resolve(0, 200, 100), 110);
        assert_eq!(ControlTarget::Scale(5.0).resolve(0, 200, 100), 200);
    }

    #[test]
    fn exact_values_are_clamped() {
        assert_eq!(ControlTarget::Exact(200).resolve(-4000, 4000, 0), 200);
        assert_eq!(ControlTarget::Exact(9000).resolve(-4000, 4000, 0), 4000);
        assert_eq!(ControlTarget::Flag(true).resolve(0, 1, 0), 1);
    }

    #[test]
    fn padded_rows_are_repacked() -> Result<()> {
        // 2x2 pixels, 6 bytes of pixel data per row padded out to 8
        let buf = [1, 2, 3, 4, 5, 6, 0xEE, 0xEE, 7, 8, 9, 10, 11, 12, 0xEE, 0xEE];
        assert_eq!(
            pack_rows(&buf, 2, 2, 8)?,
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]
        );
        // the last row needs no trailing padding
        assert_eq!(pack_rows(&buf[..14], 2, 2, 8)?.len(), 12);
        Ok(())
    }

    #[test]
    fn tight_rows_are_copied_whole() -> Result<()> {
        let buf: Vec<u8> = (0..12).collect();
        assert_eq!(pack_rows(&buf, 2, 2, 6)?, buf);
        Ok(())
    }

    #[test]
    fn short_or_narrow_buffers_are_rejected() {
        let buf = [0u8; 13];
        assert!(pack_rows(&buf, 2, 2, 8).is_err());
        assert!(pack_rows(&[0u8; 16], 2, 2, 4).is_err());
    }

    #[test]
    fn capture_before_configure_fails() {
        let mut camera = V4l2Camera::new("/dev/video-missing");
        assert!(camera.capture().is_err());
    }
}
