//! camstream - camera to motion-JPEG HTTP stream
//!
//! This daemon:
//! 1. Loads configuration (JSON file, environment, command line)
//! 2. Opens and configures the camera, exiting if it is unusable
//! 3. Serves `/` and `/video_feed` until Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use camstream::{open_camera, FrameSource, StreamConfig, StreamServer};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Serve a color-corrected camera feed as a motion-JPEG stream"
)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "CAMSTREAM_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides config).
    #[arg(long, value_name = "ADDR")]
    addr: Option<String>,

    /// Camera device path, or stub://<name> for the synthetic camera (overrides config).
    #[arg(long, value_name = "DEVICE")]
    device: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = StreamConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(device) = args.device {
        config.camera.device = device;
    }
    config.validate()?;

    let camera = open_camera(&config.camera)?;
    let source = Arc::new(FrameSource::new(camera, config.camera.clone()));
    if let Err(err) = source.initialize() {
        log::error!("refusing to serve without a camera: {}", err);
        std::process::exit(1);
    }

    let server = StreamServer::new(config.server.clone(), source.clone()).spawn()?;
    log::info!("streaming on http://{}/video_feed", server.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let _ = rx.recv();
    log::info!("shutdown signal received, stopping stream server...");
    server.stop()?;
    log::info!("served {} frames", source.frames_captured());

    Ok(())
}
