//! Synthetic camera for `stub://` devices.
//!
//! Produces a diagonal gradient that drifts one step per frame, with a bright
//! band so the highlight branch of the color transform is exercised.

use anyhow::{anyhow, Result};

use super::Camera;
use crate::config::CameraSettings;
use crate::frame::{PixelFormat, RawFrame, CHANNELS};

pub struct SyntheticCamera {
    device: String,
    active: Option<ActiveFormat>,
    frame_count: u64,
}

#[derive(Clone, Copy)]
struct ActiveFormat {
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl SyntheticCamera {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            active: None,
            frame_count: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn generate_pixels(&self, active: ActiveFormat) -> Vec<u8> {
        let (ri, gi, bi) = active.format.rgb_indices();
        let w = active.width as usize;
        let h = active.height as usize;
        let shift = self.frame_count as usize;
        let band = (shift * 4) % h.max(1);

        let mut pixels = vec![0u8; w * h * CHANNELS];
        for (idx, px) in pixels.chunks_exact_mut(CHANNELS).enumerate() {
            let x = idx % w;
            let y = idx / w;
            if y.abs_diff(band) < 8 {
                px.fill(250);
                continue;
            }
            px[ri] = ((x + shift) % 256) as u8;
            px[gi] = ((y + shift) % 256) as u8;
            px[bi] = ((x + y) % 256) as u8;
        }
        pixels
    }
}

impl Camera for SyntheticCamera {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn configure(&mut self, settings: &CameraSettings) -> Result<()> {
        self.active = Some(ActiveFormat {
            width: settings.width,
            height: settings.height,
            format: settings.pixel_format,
        });
        log::info!(
            "SyntheticCamera: configured {} ({}x{} {:?})",
            self.device,
            settings.width,
            settings.height,
            settings.pixel_format
        );
        Ok(())
    }

    fn capture(&mut self) -> Result<RawFrame> {
        let active = self
            .active
            .ok_or_else(|| anyhow!("synthetic camera {} not configured", self.device))?;
        let pixels = self.generate_pixels(active);
        self.frame_count += 1;
        RawFrame::new(pixels, active.width, active.height, active.format)
    }
}
