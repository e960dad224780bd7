//! Steady-state recognition loop and operator command dispatch.
//!
//! One thread owns the camera, the analyzer, the window and the store. Each
//! frame is read, optionally analysed, drawn and shown before keys are
//! handled; anything a command changes is seen from the next frame on.

use std::path::PathBuf;

use facelearn_core::analyzer::{self, FaceAnalyzer};
use facelearn_core::{Embedding, EmbeddingStore, IdentityLabel, MatchResult, Matcher, NearestMatcher};
use facelearn_hw::{CameraError, FrameSource};
use image::RgbImage;
use thiserror::Error;

use crate::capture::FaceSink;
use crate::config::Config;
use crate::enroll;
use crate::overlay::{FaceTag, Overlay, WHITE};
use crate::ui::{Display, DisplayError, KeyPress, Prompt};

pub const TOLERANCE_MIN: f32 = 0.20;
pub const TOLERANCE_MAX: f32 = 0.80;
pub const TOLERANCE_STEP: f32 = 0.02;
pub const TOLERANCE_DEFAULT: f32 = 0.45;

const LOOP_HINT: &str = "q: quit | a: learn | r: reinforce | -/+: tolerance";

#[derive(Error, Debug)]
pub enum LoopError {
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("display: {0}")]
    Display(#[from] DisplayError),
}

/// Match threshold, always within `[TOLERANCE_MIN, TOLERANCE_MAX]` and
/// rounded to two decimals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance(f32);

impl Tolerance {
    pub fn new(value: f32) -> Self {
        let value = if value.is_nan() { TOLERANCE_DEFAULT } else { value };
        Self(round2(value.clamp(TOLERANCE_MIN, TOLERANCE_MAX)))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    /// Stricter by one step.
    pub fn lower(self) -> Self {
        Self::new(self.0 - TOLERANCE_STEP)
    }

    /// More permissive by one step.
    pub fn raise(self) -> Self {
        Self::new(self.0 + TOLERANCE_STEP)
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self(TOLERANCE_DEFAULT)
    }
}

fn round2(v: f32) -> f32 {
    (v * 100.0).round() / 100.0
}

/// Decides which frames run detection.
#[derive(Debug, Clone)]
pub struct FrameSchedule {
    every: u64,
    index: u64,
}

impl FrameSchedule {
    pub fn new(every: usize) -> Self {
        Self { every: every.max(1) as u64, index: 0 }
    }

    /// Whether the frame about to be processed is a detection frame.
    pub fn tick(&mut self) -> bool {
        let due = self.index % self.every == 0;
        self.index += 1;
        due
    }

    /// Make the next frame a detection frame.
    pub fn restart(&mut self) {
        self.index = 0;
    }
}

/// Everything the loop needs from the outside world.
pub struct Peripherals<'a> {
    pub camera: &'a mut dyn FrameSource,
    pub analyzer: &'a mut dyn FaceAnalyzer,
    pub display: &'a mut dyn Display,
    /// Blocking; the loop stalls while it waits for the operator.
    pub prompt: &'a mut dyn Prompt,
}

/// State the operator can change at runtime.
#[derive(Debug, Clone)]
pub struct RecognitionContext {
    pub tolerance: Tolerance,
    pub store: EmbeddingStore,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub downscale: f32,
    pub detect_every: usize,
    pub capture_fps: u32,
    pub dwell_frames: usize,
    pub max_wait_frames: usize,
    pub train_dir: PathBuf,
    pub store_path: PathBuf,
}

impl From<&Config> for LoopSettings {
    fn from(config: &Config) -> Self {
        Self {
            downscale: config.downscale,
            detect_every: config.detect_every,
            capture_fps: config.capture_fps,
            dwell_frames: config.dwell_frames(),
            max_wait_frames: config.max_wait_frames(),
            train_dir: config.train_dir(),
            store_path: config.store_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Quit,
    ToleranceDown,
    ToleranceUp,
    Reinforce,
    Learn,
}

fn command_for(key: KeyPress) -> Option<Command> {
    match key {
        KeyPress::Char('q') | KeyPress::Close => Some(Command::Quit),
        KeyPress::Char('-') => Some(Command::ToleranceDown),
        KeyPress::Char('+') | KeyPress::Char('=') => Some(Command::ToleranceUp),
        KeyPress::Char('r') => Some(Command::Reinforce),
        KeyPress::Char('a') => Some(Command::Learn),
        _ => None,
    }
}

/// Result of the last detection frame, reused until the next one.
#[derive(Debug, Clone, Default)]
struct Detections {
    tags: Vec<FaceTag>,
    embeddings: Vec<Embedding>,
}

pub struct RecognitionLoop<'a> {
    io: Peripherals<'a>,
    sink: &'a mut dyn FaceSink,
    overlay: Overlay,
    settings: LoopSettings,
    ctx: RecognitionContext,
    matcher: NearestMatcher,
    schedule: FrameSchedule,
    last: Detections,
}

impl<'a> RecognitionLoop<'a> {
    pub fn new(
        io: Peripherals<'a>,
        sink: &'a mut dyn FaceSink,
        overlay: Overlay,
        settings: LoopSettings,
        ctx: RecognitionContext,
    ) -> Self {
        let matcher = NearestMatcher::new(io.analyzer.distance());
        let schedule = FrameSchedule::new(settings.detect_every);
        Self {
            io,
            sink,
            overlay,
            settings,
            ctx,
            matcher,
            schedule,
            last: Detections::default(),
        }
    }

    pub fn context(&self) -> &RecognitionContext {
        &self.ctx
    }

    /// Run until the operator quits. A camera read failure ends the loop
    /// with an error.
    pub fn run(&mut self) -> Result<(), LoopError> {
        tracing::info!(
            entries = self.ctx.store.len(),
            tolerance = self.ctx.tolerance.value(),
            detect_every = self.settings.detect_every,
            "recognition loop started"
        );
        loop {
            let frame = self.io.camera.read_frame().map_err(|e| {
                tracing::error!(error = %e, "camera read failed, stopping");
                e
            })?;

            if self.schedule.tick() {
                self.detect(&frame.image);
            }

            let canvas = self.render(&frame.image);
            self.io.display.show(&canvas)?;

            while let Some(key) = self.io.display.poll_key() {
                let Some(command) = command_for(key) else {
                    continue;
                };
                if command == Command::Quit {
                    tracing::info!("quit requested");
                    return Ok(());
                }
                self.dispatch(command)?;
            }
        }
    }

    fn detect(&mut self, image: &RgbImage) {
        let scan = match analyzer::scan(self.io.analyzer, image, self.settings.downscale, true) {
            Ok(scan) => scan,
            Err(e) => {
                tracing::warn!(error = %e, "analysis failed, keeping previous overlay");
                return;
            }
        };

        let tags = scan
            .faces
            .iter()
            .zip(&scan.embeddings)
            .map(|(bbox, embedding)| FaceTag { bbox: *bbox, label: self.lookup(embedding).label })
            .collect();
        self.last = Detections { tags, embeddings: scan.embeddings };
    }

    fn lookup(&self, embedding: &Embedding) -> MatchResult {
        self.matcher.compare(embedding, &self.ctx.store, self.ctx.tolerance.value())
    }

    fn render(&self, image: &RgbImage) -> RgbImage {
        let mut canvas = image.clone();
        self.overlay.draw_faces(&mut canvas, &self.last.tags);
        let hud = vec![(
            format!(
                "tol {:.2} | {} known",
                self.ctx.tolerance.value(),
                self.ctx.store.identities().len()
            ),
            WHITE,
        )];
        self.overlay.draw_hud(&mut canvas, &hud);
        self.overlay.draw_footer(&mut canvas, LOOP_HINT);
        canvas
    }

    fn dispatch(&mut self, command: Command) -> Result<(), LoopError> {
        match command {
            Command::Quit => {}
            Command::ToleranceDown => self.set_tolerance(self.ctx.tolerance.lower(), "stricter"),
            Command::ToleranceUp => self.set_tolerance(self.ctx.tolerance.raise(), "more permissive"),
            Command::Learn => self.learn()?,
            Command::Reinforce => self.reinforce()?,
        }
        Ok(())
    }

    fn set_tolerance(&mut self, tolerance: Tolerance, direction: &str) {
        self.ctx.tolerance = tolerance;
        tracing::info!(tolerance = tolerance.value(), "tolerance changed");
        self.io
            .prompt
            .notify(&format!("Tolerance now {:.2} ({direction})", tolerance.value()));
    }

    /// Match for the most confident face of the last detection frame, against
    /// the current store and tolerance.
    fn primary_match(&self) -> Option<MatchResult> {
        self.last.embeddings.first().map(|e| self.lookup(e))
    }

    fn learn(&mut self) -> Result<(), LoopError> {
        let Some(result) = self.primary_match() else {
            self.refuse("No face in view to learn.");
            return Ok(());
        };
        if let Some(existing) = result.label {
            self.refuse(&format!(
                "This face is already registered as '{existing}'. Press 'r' to reinforce it."
            ));
            return Ok(());
        }

        let answer = self.io.prompt.ask_label("Name for this face:")?;
        let label = match answer.as_deref().map(IdentityLabel::parse) {
            Some(Ok(label)) => label,
            Some(Err(e)) => {
                self.refuse(&format!("Invalid name ({e}), skipped."));
                return Ok(());
            }
            None => {
                self.refuse("Learning cancelled.");
                return Ok(());
            }
        };

        tracing::info!(label = %label, "learning new identity");
        self.enroll(label)
    }

    fn reinforce(&mut self) -> Result<(), LoopError> {
        let Some(result) = self.primary_match() else {
            self.refuse("No face in view to reinforce.");
            return Ok(());
        };
        let Some(existing) = result.label else {
            self.refuse("Face not recognized. Press 'a' to learn a new face.");
            return Ok(());
        };

        let confirmed = self
            .io
            .prompt
            .confirm(&format!("Detected: {existing}. Capture more photos?"))?;
        if !confirmed {
            self.refuse("Reinforcement cancelled.");
            return Ok(());
        }

        let label = match IdentityLabel::existing(&existing) {
            Ok(label) => label,
            Err(e) => {
                self.refuse(&format!("Stored label '{existing}' cannot be reused: {e}"));
                return Ok(());
            }
        };
        tracing::info!(label = %label, "reinforcing identity");
        self.enroll(label)
    }

    fn enroll(&mut self, label: IdentityLabel) -> Result<(), LoopError> {
        let rebuilt = enroll::enroll(label, &mut self.io, &self.overlay, &mut *self.sink, &self.settings)?;
        if let Some(store) = rebuilt {
            self.ctx.store = store;
        }
        // Cached labels predate the session.
        self.last = Detections::default();
        self.schedule.restart();
        Ok(())
    }

    fn refuse(&mut self, message: &str) {
        tracing::info!(reason = message, "command refused");
        self.io.prompt.notify(message);
    }
}
