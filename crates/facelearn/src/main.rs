use std::process::ExitCode;

use anyhow::{Context, Result};
use facelearn_core::{EmbeddingStore, OnnxAnalyzer};
use facelearn_hw::Camera;
use tracing_subscriber::EnvFilter;

mod capture;
mod config;
mod enroll;
mod overlay;
mod prompt;
mod recognition;
mod ui;
mod window;

#[cfg(test)]
mod testutil;

use config::Config;
use enroll::DiskSink;
use overlay::Overlay;
use prompt::TerminalPrompt;
use recognition::{LoopSettings, Peripherals, RecognitionContext, RecognitionLoop};
use window::WindowDisplay;

/// Exit status when the configured sentinel file is missing.
const SENTINEL_EXIT: u8 = 42;

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        device = %config.camera_device,
        data_dir = %config.data_dir.display(),
        tolerance = config.tolerance.value(),
        "facelearn starting"
    );

    if let Some(sentinel) = &config.sentinel_file {
        if !sentinel.exists() {
            tracing::error!(path = %sentinel.display(), "sentinel file missing, refusing to start");
            return Ok(ExitCode::from(SENTINEL_EXIT));
        }
    }

    let store_path = config.store_path();
    let store = EmbeddingStore::load(&store_path)
        .with_context(|| format!("failed to load store {}", store_path.display()))?;

    let mut analyzer = OnnxAnalyzer::load(&config.scrfd_model_path(), &config.arcface_model_path())
        .context("failed to load face models")?;

    let mut camera = Camera::open(&config.camera_device, config.frame_width, config.frame_height)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;

    let mut display = WindowDisplay::open("facelearn", camera.width, camera.height)
        .context("failed to open display window")?;
    let mut prompt = TerminalPrompt::stdio();
    let mut sink = DiskSink::new(config.train_dir());

    let io = Peripherals {
        camera: &mut camera,
        analyzer: &mut analyzer,
        display: &mut display,
        prompt: &mut prompt,
    };
    let ctx = RecognitionContext { tolerance: config.tolerance, store };
    let mut recognition = RecognitionLoop::new(
        io,
        &mut sink,
        Overlay::load(&config.font_path),
        LoopSettings::from(&config),
        ctx,
    );
    recognition.run().context("recognition loop stopped")?;

    let ctx = recognition.context();
    tracing::info!(
        entries = ctx.store.len(),
        tolerance = ctx.tolerance.value(),
        "facelearn shutting down"
    );
    Ok(ExitCode::SUCCESS)
}
