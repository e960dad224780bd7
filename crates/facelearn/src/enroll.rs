//! Drives a [`CaptureSession`] against the live camera, then rebuilds the
//! store when the session produced new photos.

use std::fs;
use std::path::{Path, PathBuf};

use facelearn_core::store;
use facelearn_core::{analyzer, EmbeddingStore, IdentityLabel};
use image::{ImageFormat, Rgb, RgbImage};

use crate::capture::{
    default_angles, AngleSpec, CaptureError, CaptureLimits, CaptureSession, FaceSink, SessionOutcome,
    SessionSignal, StepEvent,
};
use crate::overlay::{Overlay, GREEN, RED, WHITE};
use crate::recognition::{LoopError, LoopSettings, Peripherals};
use crate::ui::KeyPress;

const SESSION_HINT: &str = "ESC: skip angle | q: cancel";

/// Writes crops as JPEG under `<root>/<label>/`, one timestamped file each.
pub struct DiskSink {
    root: PathBuf,
}

impl DiskSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FaceSink for DiskSink {
    fn store(
        &mut self,
        label: &IdentityLabel,
        _angle: &AngleSpec,
        crop: &RgbImage,
    ) -> Result<PathBuf, CaptureError> {
        let dir = self.root.join(label.as_str());
        fs::create_dir_all(&dir).map_err(|e| CaptureError::Io { path: dir.clone(), source: e })?;

        let stem = chrono::Local::now().format("%Y%m%d_%H%M%S_%6f").to_string();
        let path = unique_path(&dir, &stem);
        crop.save_with_format(&path, ImageFormat::Jpeg)
            .map_err(|e| CaptureError::Encode { path: path.clone(), source: e })?;
        Ok(path)
    }
}

fn unique_path(dir: &Path, stem: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.jpg"));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| dir.join(format!("{stem}_{n}.jpg")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

/// Run one session to completion or cancellation, one camera frame per step.
///
/// A camera read failure ends the whole tool, not just the session.
pub fn run_session(
    session: &mut CaptureSession,
    io: &mut Peripherals<'_>,
    overlay: &Overlay,
    sink: &mut dyn FaceSink,
    settings: &LoopSettings,
) -> Result<SessionOutcome, LoopError> {
    loop {
        if let Some(outcome) = session.outcome() {
            return Ok(outcome);
        }

        let frame = io.camera.read_frame()?;
        let face = match analyzer::scan(io.analyzer, &frame.image, settings.downscale, false) {
            Ok(scan) => scan.faces.into_iter().next(),
            Err(e) => {
                tracing::warn!(error = %e, "detection failed during capture");
                None
            }
        };

        let mut canvas = frame.image.clone();
        if let (Some(face), Some((_, angle))) = (&face, session.current_angle()) {
            overlay.draw_box(&mut canvas, face, angle.color);
        }
        overlay.draw_hud(&mut canvas, &session_hud(session, face.is_some(), settings.capture_fps));
        overlay.draw_footer(&mut canvas, SESSION_HINT);
        io.display.show(&canvas)?;

        let signal = poll_signal(io);
        let event = session.step(&frame.image, face.as_ref(), signal, sink);
        let name = |angle: usize| session.angle(angle).map_or("?", |a| a.name);
        match event {
            StepEvent::Captured { angle, .. } => {
                io.prompt.notify(&format!("  Photo {} captured ({})", session.captured(), name(angle)));
            }
            StepEvent::Abandoned { angle, .. } => {
                io.prompt.notify(&format!("  No face for angle '{}', moving on.", name(angle)));
            }
            StepEvent::Skipped { angle } => {
                io.prompt.notify(&format!("Skipping angle '{}'.", name(angle)));
            }
            StepEvent::CaptureFailed { angle } => {
                io.prompt.notify(&format!("  Could not save photo for '{}'.", name(angle)));
            }
            StepEvent::Cancelled => io.prompt.notify("Capture cancelled."),
            StepEvent::Waiting | StepEvent::Idle => {}
        }
    }
}

/// Strongest pending signal: cancel beats skip. Other keys are dropped.
fn poll_signal(io: &mut Peripherals<'_>) -> Option<SessionSignal> {
    let mut signal = None;
    while let Some(key) = io.display.poll_key() {
        match key {
            KeyPress::Char('q') | KeyPress::Close => return Some(SessionSignal::Cancel),
            KeyPress::Escape => signal = Some(SessionSignal::SkipAngle),
            _ => {}
        }
    }
    signal
}

fn session_hud(session: &CaptureSession, has_face: bool, fps: u32) -> Vec<(String, Rgb<u8>)> {
    let Some((index, angle)) = session.current_angle() else {
        return Vec::new();
    };
    let fps = fps.max(1) as usize;
    let progress = format!(
        "Photo {}/{} | Angle {}/{}",
        session.captured(),
        session.num_angles(),
        index + 1,
        session.num_angles()
    );
    let status = if has_face {
        let remaining = angle.dwell_frames.saturating_sub(session.dwell());
        (format!("Face detected, hold still... {}s", remaining.div_ceil(fps).max(1)), GREEN)
    } else {
        let left = session.limits().max_wait_frames.saturating_sub(session.frames_in_angle());
        (
            format!(
                "No face ({}s) | moving on in {}s",
                session.no_face() / fps,
                left.div_ceil(fps)
            ),
            RED,
        )
    };
    vec![(angle.prompt.to_string(), angle.color), (progress, WHITE), status]
}

/// Capture photos for `label` and, when the session calls for it, rebuild
/// the store from the corpus and persist it.
///
/// Returns the rebuilt store, or `None` when the current one stays. A
/// rebuilt store that failed to persist is still returned.
pub fn enroll(
    label: IdentityLabel,
    io: &mut Peripherals<'_>,
    overlay: &Overlay,
    sink: &mut dyn FaceSink,
    settings: &LoopSettings,
) -> Result<Option<EmbeddingStore>, LoopError> {
    let mut session = CaptureSession::new(
        label.clone(),
        default_angles(settings.dwell_frames),
        CaptureLimits::new(settings.max_wait_frames),
    );
    io.prompt.notify(&format!(
        "Capturing photos of '{label}' from {} angles.",
        session.num_angles()
    ));

    let outcome = run_session(&mut session, io, overlay, sink, settings)?;
    if !outcome.needs_rebuild() {
        if outcome.captured() == 0 {
            io.prompt.notify("No photo could be captured. Try again.");
        }
        return Ok(None);
    }
    io.prompt.notify(&format!(
        "Done: {} photos of '{label}'. Re-encoding training set...",
        outcome.captured()
    ));

    let rebuilt = match store::rebuild_from_corpus(io.analyzer, &settings.train_dir) {
        Ok(rebuilt) => rebuilt,
        Err(e) => {
            tracing::error!(error = %e, "rebuild failed, keeping current store");
            io.prompt.notify(&format!("Re-encoding failed: {e}"));
            return Ok(None);
        }
    };
    if let Err(e) = rebuilt.save(&settings.store_path) {
        tracing::error!(error = %e, "store not persisted, using rebuilt store in memory");
        io.prompt.notify(&format!("Could not save the store: {e}"));
    }
    io.prompt.notify(&format!("Model updated: {} embeddings.", rebuilt.len()));
    Ok(Some(rebuilt))
}
