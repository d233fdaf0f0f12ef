use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::frame::{PixelFormat, FRAME_HEIGHT, FRAME_WIDTH};
use crate::stream::DEFAULT_JPEG_QUALITY;

const DEFAULT_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_WARM_UP_MS: u64 = 2_000;

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    server: Option<ServerConfigFile>,
    camera: Option<CameraConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    addr: Option<String>,
    jpeg_quality: Option<u8>,
    write_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    pixel_format: Option<PixelFormat>,
    warm_up_ms: Option<u64>,
    awb_enable: Option<bool>,
    awb_mode: Option<WhiteBalanceMode>,
    colour_gains: Option<(f32, f32)>,
    brightness: Option<f32>,
    contrast: Option<f32>,
    saturation: Option<f32>,
    exposure_value: Option<f32>,
    sharpness: Option<f32>,
}

/// Auto white balance presets, in libcamera's order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhiteBalanceMode {
    Auto,
    Incandescent,
    Tungsten,
    Fluorescent,
    Indoor,
    Daylight,
    Cloudy,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub server: ServerSettings,
    pub camera: CameraSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub addr: String,
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
    /// Per-write socket timeout; a client that stops reading is dropped after this.
    pub write_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
        }
    }
}

/// Camera setup. Applied once when the device is configured and never changed after.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    /// Device path, or `stub://<name>` for the synthetic camera.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Frame-rate ceiling for captures.
    pub target_fps: u32,
    pub pixel_format: PixelFormat,
    /// Settle time after configuring the sensor.
    pub warm_up: Duration,
    pub controls: CameraControls,
}

/// Sensor controls, in libcamera units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraControls {
    pub awb_enable: bool,
    pub awb_mode: WhiteBalanceMode,
    /// (red, blue) gains.
    pub colour_gains: (f32, f32),
    /// -1.0..=1.0, 0.0 is neutral.
    pub brightness: f32,
    /// Multiplier, 1.0 is neutral.
    pub contrast: f32,
    /// Multiplier, 1.0 is neutral.
    pub saturation: f32,
    /// Exposure compensation in stops.
    pub exposure_value: f32,
    /// Multiplier, 1.0 is neutral.
    pub sharpness: f32,
}

impl Default for CameraControls {
    fn default() -> Self {
        Self {
            awb_enable: true,
            awb_mode: WhiteBalanceMode::Daylight,
            colour_gains: (1.4, 1.2),
            brightness: 0.1,
            contrast: 1.0,
            saturation: 1.1,
            exposure_value: 0.2,
            sharpness: 1.0,
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            target_fps: DEFAULT_TARGET_FPS,
            pixel_format: PixelFormat::Bgr24,
            warm_up: Duration::from_millis(DEFAULT_WARM_UP_MS),
            controls: CameraControls::default(),
        }
    }
}

impl CameraSettings {
    /// Minimum spacing between emitted frames.
    pub fn frame_interval(&self) -> Duration {
        if self.target_fps == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(1.0 / self.target_fps as f64)
    }
}

impl StreamConfig {
    /// Load from the JSON file named by `CAMSTREAM_CONFIG` (if any), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAMSTREAM_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => StreamConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StreamConfigFile) -> Self {
        let server_defaults = ServerSettings::default();
        let server_file = file.server.unwrap_or_default();
        let server = ServerSettings {
            addr: server_file.addr.unwrap_or(server_defaults.addr),
            jpeg_quality: server_file
                .jpeg_quality
                .unwrap_or(server_defaults.jpeg_quality),
            write_timeout: server_file
                .write_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(server_defaults.write_timeout),
        };

        let defaults = CameraSettings::default();
        let controls = defaults.controls;
        let cam = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            device: cam.device.unwrap_or(defaults.device),
            width: cam.width.unwrap_or(defaults.width),
            height: cam.height.unwrap_or(defaults.height),
            target_fps: cam.target_fps.unwrap_or(defaults.target_fps),
            pixel_format: cam.pixel_format.unwrap_or(defaults.pixel_format),
            warm_up: cam
                .warm_up_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.warm_up),
            controls: CameraControls {
                awb_enable: cam.awb_enable.unwrap_or(controls.awb_enable),
                awb_mode: cam.awb_mode.unwrap_or(controls.awb_mode),
                colour_gains: cam.colour_gains.unwrap_or(controls.colour_gains),
                brightness: cam.brightness.unwrap_or(controls.brightness),
                contrast: cam.contrast.unwrap_or(controls.contrast),
                saturation: cam.saturation.unwrap_or(controls.saturation),
                exposure_value: cam.exposure_value.unwrap_or(controls.exposure_value),
                sharpness: cam.sharpness.unwrap_or(controls.sharpness),
            },
        };

        Self { server, camera }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("CAMSTREAM_ADDR") {
            if !addr.trim().is_empty() {
                self.server.addr = addr.trim().to_string();
            }
        }
        if let Ok(device) = std::env::var("CAMSTREAM_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device.trim().to_string();
            }
        }
        if let Ok(quality) = std::env::var("CAMSTREAM_JPEG_QUALITY") {
            self.server.jpeg_quality = quality
                .trim()
                .parse()
                .map_err(|_| anyhow!("CAMSTREAM_JPEG_QUALITY must be an integer in 1..=100"))?;
        }
        if let Ok(warm_up) = std::env::var("CAMSTREAM_WARM_UP_MS") {
            let millis: u64 = warm_up.trim().parse().map_err(|_| {
                anyhow!("CAMSTREAM_WARM_UP_MS must be an integer number of milliseconds")
            })?;
            self.camera.warm_up = Duration::from_millis(millis);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.server
            .addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid bind address '{}': {}", self.server.addr, e))?;
        if !(1..=100).contains(&self.server.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be in 1..=100"));
        }
        if self.server.write_timeout.is_zero() {
            return Err(anyhow!("write_timeout_ms must be greater than zero"));
        }

        let cam = &self.camera;
        if cam.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if cam.width == 0 || cam.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        if cam.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }

        let c = &cam.controls;
        if !(-1.0..=1.0).contains(&c.brightness) {
            return Err(anyhow!("brightness must be in -1.0..=1.0"));
        }
        for (name, value) in [
            ("red colour gain", c.colour_gains.0),
            ("blue colour gain", c.colour_gains.1),
            ("contrast", c.contrast),
            ("saturation", c.saturation),
            ("sharpness", c.sharpness),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(anyhow!("{} must be a non-negative number", name));
            }
        }
        if !c.exposure_value.is_finite() {
            return Err(anyhow!("exposure_value must be finite"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<StreamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
