//! Shared, rate-limited access to the single camera.
//!
//! `FrameSource` owns the camera. Every capture goes through one mutex: the lazy
//! configure, the frame-rate wait, the device read and the color transform all run
//! with the lock held, so at most one capture is in flight across all sessions and
//! the frame-rate ceiling applies to the process as a whole. Clients share the
//! frame rate; they do not multiply it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::camera::{Camera, CaptureError};
use crate::color::adjust_colors;
use crate::config::CameraSettings;
use crate::frame::CorrectedFrame;

/// How long a caller should wait after a transient capture failure.
pub const CAPTURE_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Spaces emissions at least `interval` apart by sleeping until the next tick.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl FramePacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    pub fn with_fps(fps: u32) -> Self {
        if fps == 0 {
            return Self::new(Duration::ZERO);
        }
        Self::new(Duration::from_secs_f64(1.0 / fps as f64))
    }

    /// Time remaining at `now` before the next emission is allowed.
    pub fn delay_at(&self, now: Instant) -> Duration {
        match self.last_emit {
            Some(last) => (last + self.interval).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Block until the next emission is allowed.
    pub fn wait(&self) {
        let delay = self.delay_at(Instant::now());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    pub fn mark_emitted(&mut self, at: Instant) {
        self.last_emit = Some(at);
    }
}

enum DeviceState {
    Unconfigured,
    Ready,
    Failed(String),
}

struct Gate {
    camera: Box<dyn Camera>,
    state: DeviceState,
    pacer: FramePacer,
}

/// The process-wide owner of the camera. Share it with `Arc`; it is not `Clone`.
pub struct FrameSource {
    settings: CameraSettings,
    gate: Mutex<Gate>,
    frames_captured: AtomicU64,
    capture_failures: AtomicU64,
}

impl FrameSource {
    pub fn new(camera: Box<dyn Camera>, settings: CameraSettings) -> Self {
        let pacer = FramePacer::new(settings.frame_interval());
        Self {
            settings,
            gate: Mutex::new(Gate {
                camera,
                state: DeviceState::Unconfigured,
                pacer,
            }),
            frames_captured: AtomicU64::new(0),
            capture_failures: AtomicU64::new(0),
        }
    }

    /// The fixed settings the camera was (or will be) configured with.
    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    /// Configure the camera now instead of on the first capture.
    pub fn initialize(&self) -> Result<(), CaptureError> {
        let mut gate = self.lock();
        self.ensure_ready(&mut gate)
    }

    /// Capture one color-corrected frame.
    ///
    /// Blocks while another caller holds the camera and until the frame-rate
    /// ceiling allows the next emission. A failed device read returns
    /// `CaptureError::Transient`; the caller should wait `CAPTURE_RETRY_BACKOFF`
    /// and try again.
    pub fn capture(&self) -> Result<CorrectedFrame, CaptureError> {
        let mut gate = self.lock();
        self.ensure_ready(&mut gate)?;

        gate.pacer.wait();
        let raw = match gate.camera.capture() {
            Ok(raw) => raw,
            Err(err) => {
                self.capture_failures.fetch_add(1, Ordering::Relaxed);
                return Err(CaptureError::Transient(format!("{err:#}")));
            }
        };
        let corrected = adjust_colors(&raw);
        gate.pacer.mark_emitted(Instant::now());
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        Ok(corrected)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn capture_failures(&self) -> u64 {
        self.capture_failures.load(Ordering::Relaxed)
    }

    /// A panicking capture leaves the camera itself intact, so a poisoned lock is
    /// recovered rather than propagated.
    fn lock(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_ready(&self, gate: &mut Gate) -> Result<(), CaptureError> {
        match &gate.state {
            DeviceState::Ready => return Ok(()),
            DeviceState::Failed(msg) => return Err(CaptureError::Init(msg.clone())),
            DeviceState::Unconfigured => {}
        }

        log::info!(
            "FrameSource: configuring {} camera {} ({}x{} @ {} fps)",
            gate.camera.name(),
            self.settings.device,
            self.settings.width,
            self.settings.height,
            self.settings.target_fps
        );
        if let Err(err) = gate.camera.configure(&self.settings) {
            let msg = format!("{err:#}");
            log::error!("FrameSource: camera {} unusable: {}", self.settings.device, msg);
            gate.state = DeviceState::Failed(msg.clone());
            return Err(CaptureError::Init(msg));
        }
        if !self.settings.warm_up.is_zero() {
            log::info!(
                "FrameSource: warming up for {} ms",
                self.settings.warm_up.as_millis()
            );
            std::thread::sleep(self.settings.warm_up);
        }
        gate.state = DeviceState::Ready;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_emission_is_not_delayed() {
        let pacer = FramePacer::with_fps(30);
        assert_eq!(pacer.delay_at(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn delay_counts_down_from_last_emission() {
        let mut pacer = FramePacer::new(Duration::from_millis(40));
        let t0 = Instant::now();
        pacer.mark_emitted(t0);

        assert_eq!(pacer.delay_at(t0), Duration::from_millis(40));
        assert_eq!(
            pacer.delay_at(t0 + Duration::from_millis(15)),
            Duration::from_millis(25)
        );
        assert_eq!(pacer.delay_at(t0 + Duration::from_millis(40)), Duration::ZERO);
        assert_eq!(pacer.delay_at(t0 + Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn zero_fps_disables_pacing() {
        let mut pacer = FramePacer::with_fps(0);
        let t0 = Instant::now();
        pacer.mark_emitted(t0);
        assert_eq!(pacer.delay_at(t0), Duration::ZERO);
    }
}
