//! FrameSource behavior under concurrency, pacing and device faults.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camstream::{
    Camera, CameraSettings, CaptureError, FrameSource, PixelFormat, RawFrame, StreamSession,
    STREAM_CONTENT_TYPE,
};

const W: u32 = 32;
const H: u32 = 24;

fn test_settings(target_fps: u32) -> CameraSettings {
    CameraSettings {
        device: "test://camera".to_string(),
        width: W,
        height: H,
        target_fps,
        warm_up: Duration::ZERO,
        ..CameraSettings::default()
    }
}

/// Shared counters so tests can observe the camera after handing it to FrameSource.
#[derive(Default)]
struct CameraStats {
    configures: AtomicUsize,
    captures: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct CountingCamera {
    stats: Arc<CameraStats>,
    capture_time: Duration,
    /// Number of initial captures that fail.
    failures_left: usize,
    fail_configure: bool,
}

impl CountingCamera {
    fn instant(stats: Arc<CameraStats>) -> Self {
        Self {
            stats,
            capture_time: Duration::ZERO,
            failures_left: 0,
            fail_configure: false,
        }
    }
}

impl Camera for CountingCamera {
    fn name(&self) -> &str {
        "counting"
    }

    fn configure(&mut self, _settings: &CameraSettings) -> Result<()> {
        self.stats.configures.fetch_add(1, Ordering::SeqCst);
        if self.fail_configure {
            return Err(anyhow!("no such device"));
        }
        Ok(())
    }

    fn capture(&mut self) -> Result<RawFrame> {
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.capture_time.is_zero() {
            std::thread::sleep(self.capture_time);
        }
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(anyhow!("simulated read timeout"));
        }
        self.stats.captures.fetch_add(1, Ordering::SeqCst);
        RawFrame::new(vec![100u8; (W * H * 3) as usize], W, H, PixelFormat::Bgr24)
    }
}

#[test]
fn capture_rate_is_capped_at_target_fps() -> Result<()> {
    let stats = Arc::new(CameraStats::default());
    let source = FrameSource::new(Box::new(CountingCamera::instant(stats)), test_settings(30));
    source.initialize()?;

    let start = Instant::now();
    let mut frames = 0;
    while start.elapsed() < Duration::from_secs(1) {
        source.capture()?;
        frames += 1;
    }

    // 30 intervals fit in one second, plus the unpaced first frame.
    assert!(frames <= 31, "emitted {} frames in one second", frames);
    assert!(frames >= 20, "pacing too slow: {} frames", frames);
    Ok(())
}

#[test]
fn concurrent_sessions_never_overlap_in_capture() -> Result<()> {
    let stats = Arc::new(CameraStats::default());
    let camera = CountingCamera {
        capture_time: Duration::from_millis(2),
        ..CountingCamera::instant(stats.clone())
    };
    let source = Arc::new(FrameSource::new(Box::new(camera), test_settings(500)));

    let workers: Vec<_> = (0..3)
        .map(|_| {
            let source = source.clone();
            std::thread::spawn(move || -> Result<(), CaptureError> {
                for _ in 0..20 {
                    source.capture()?;
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        worker
            .join()
            .map_err(|_| anyhow!("worker panicked"))??;
    }

    assert_eq!(stats.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(stats.captures.load(Ordering::SeqCst), 60);
    assert_eq!(source.frames_captured(), 60);
    Ok(())
}

#[test]
fn camera_is_configured_once_on_first_capture() -> Result<()> {
    let stats = Arc::new(CameraStats::default());
    let source = Arc::new(FrameSource::new(
        Box::new(CountingCamera::instant(stats.clone())),
        test_settings(1000),
    ));
    assert_eq!(stats.configures.load(Ordering::SeqCst), 0);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let source = source.clone();
            std::thread::spawn(move || source.capture().map(|_| ()))
        })
        .collect();
    for worker in workers {
        worker
            .join()
            .map_err(|_| anyhow!("worker panicked"))??;
    }
    source.initialize()?;

    assert_eq!(stats.configures.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn configure_failure_is_permanent() {
    let stats = Arc::new(CameraStats::default());
    let camera = CountingCamera {
        fail_configure: true,
        ..CountingCamera::instant(stats.clone())
    };
    let source = FrameSource::new(Box::new(camera), test_settings(30));

    let first = source.initialize().unwrap_err();
    assert!(!first.is_transient());
    let second = source.capture().unwrap_err();
    assert!(matches!(second, CaptureError::Init(_)));
    assert_eq!(stats.configures.load(Ordering::SeqCst), 1);
}

#[test]
fn read_failures_are_transient_and_counted() {
    let stats = Arc::new(CameraStats::default());
    let camera = CountingCamera {
        failures_left: 2,
        ..CountingCamera::instant(stats)
    };
    let source = FrameSource::new(Box::new(camera), test_settings(1000));

    assert!(source.capture().unwrap_err().is_transient());
    assert!(source.capture().unwrap_err().is_transient());
    assert!(source.capture().is_ok());
    assert_eq!(source.capture_failures(), 2);
    assert_eq!(source.frames_captured(), 1);
}

#[test]
fn session_rides_out_transient_failures() {
    let stats = Arc::new(CameraStats::default());
    let camera = CountingCamera {
        failures_left: 3,
        ..CountingCamera::instant(stats)
    };
    let source = Arc::new(FrameSource::new(Box::new(camera), test_settings(1000)));
    let cancel = Arc::new(AtomicBool::new(false));
    let mut session = StreamSession::new(source.clone(), 85, cancel);

    let started = Instant::now();
    let part = session.next().expect("session recovers after failures");
    assert!(part.starts_with(b"--frame\r\n"));
    // three failures, each followed by the 100 ms backoff
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(source.capture_failures(), 3);
}

#[test]
fn session_ends_when_camera_cannot_start() {
    let stats = Arc::new(CameraStats::default());
    let camera = CountingCamera {
        fail_configure: true,
        ..CountingCamera::instant(stats)
    };
    let source = Arc::new(FrameSource::new(Box::new(camera), test_settings(30)));
    let mut session = StreamSession::new(source, 85, Arc::new(AtomicBool::new(false)));

    assert!(session.next().is_none());
    assert!(session.next().is_none());
    assert_eq!(session.frames_sent(), 0);
}

#[test]
fn stream_content_type_declares_frame_boundary() {
    assert_eq!(
        STREAM_CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame"
    );
}
