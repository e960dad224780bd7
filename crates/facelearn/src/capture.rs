//! Guided multi-angle capture.
//!
//! [`CaptureSession`] is a pure per-frame state machine: the driver feeds it
//! one detection outcome (and at most one operator signal) per frame, and it
//! hands face crops to a [`FaceSink`]. Every angle lasts at most
//! `max_wait_frames` frames, so a session ends within
//! `angles × max_wait_frames` frames whatever the detector reports.

use std::path::PathBuf;

use facelearn_core::{BoundingBox, IdentityLabel};
use image::imageops;
use image::{Rgb, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// One step of the guided sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct AngleSpec {
    pub name: &'static str,
    pub prompt: &'static str,
    pub color: Rgb<u8>,
    /// Consecutive face frames required before the capture is taken.
    pub dwell_frames: usize,
}

/// Front, Right, Left, Up, Down.
pub fn default_angles(dwell_frames: usize) -> Vec<AngleSpec> {
    const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
    const ORANGE: Rgb<u8> = Rgb([255, 165, 0]);
    const PINK: Rgb<u8> = Rgb([255, 100, 255]);

    let dwell_frames = dwell_frames.max(1);
    [
        ("Front", "Look STRAIGHT AHEAD", GREEN),
        ("Right", "Turn to the RIGHT", ORANGE),
        ("Left", "Turn to the LEFT", ORANGE),
        ("Up", "Look UP", PINK),
        ("Down", "Look DOWN", PINK),
    ]
    .into_iter()
    .map(|(name, prompt, color)| AngleSpec { name, prompt, color, dwell_frames })
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimits {
    /// Frames spent on one angle before it is abandoned.
    pub max_wait_frames: usize,
}

impl CaptureLimits {
    pub fn new(max_wait_frames: usize) -> Self {
        Self { max_wait_frames: max_wait_frames.max(1) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AtAngle(usize),
    Completed,
    Cancelled,
}

/// Operator input relevant to a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    SkipAngle,
    Cancel,
}

/// What happened on one call to [`CaptureSession::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    /// Still dwelling or waiting on the current angle.
    Waiting,
    Captured { angle: usize, path: PathBuf },
    /// Dwell reached but the sink rejected the crop; the angle is still left.
    CaptureFailed { angle: usize },
    Skipped { angle: usize },
    /// Wait limit hit. `path` is set when the last-frame capture succeeded.
    Abandoned { angle: usize, path: Option<PathBuf> },
    Cancelled,
    /// The session was already over; nothing was done.
    Idle,
}

/// Destination for captured face crops.
pub trait FaceSink {
    fn store(
        &mut self,
        label: &IdentityLabel,
        angle: &AngleSpec,
        crop: &RgbImage,
    ) -> Result<PathBuf, CaptureError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed { captured: usize },
    Cancelled { captured: usize },
}

impl SessionOutcome {
    pub fn captured(&self) -> usize {
        match *self {
            SessionOutcome::Completed { captured } | SessionOutcome::Cancelled { captured } => captured,
        }
    }

    /// Only a completed session that saved at least one photo feeds a rebuild.
    pub fn needs_rebuild(&self) -> bool {
        matches!(*self, SessionOutcome::Completed { captured } if captured > 0)
    }
}

pub struct CaptureSession {
    label: IdentityLabel,
    angles: Vec<AngleSpec>,
    limits: CaptureLimits,
    state: SessionState,
    frames_in_angle: usize,
    dwell: usize,
    no_face: usize,
    captured: usize,
}

impl CaptureSession {
    pub fn new(label: IdentityLabel, angles: Vec<AngleSpec>, limits: CaptureLimits) -> Self {
        let state = if angles.is_empty() {
            SessionState::Completed
        } else {
            SessionState::AtAngle(0)
        };
        tracing::info!(label = %label, angles = angles.len(), "capture session started");
        Self {
            label,
            angles,
            limits,
            state,
            frames_in_angle: 0,
            dwell: 0,
            no_face: 0,
            captured: 0,
        }
    }

    pub fn num_angles(&self) -> usize {
        self.angles.len()
    }

    pub fn current_angle(&self) -> Option<(usize, &AngleSpec)> {
        match self.state {
            SessionState::AtAngle(i) => self.angles.get(i).map(|a| (i, a)),
            _ => None,
        }
    }

    pub fn angle(&self, index: usize) -> Option<&AngleSpec> {
        self.angles.get(index)
    }

    pub fn captured(&self) -> usize {
        self.captured
    }

    pub fn dwell(&self) -> usize {
        self.dwell
    }

    pub fn no_face(&self) -> usize {
        self.no_face
    }

    pub fn frames_in_angle(&self) -> usize {
        self.frames_in_angle
    }

    pub fn limits(&self) -> CaptureLimits {
        self.limits
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.state, SessionState::AtAngle(_))
    }

    /// `None` while the session is still running.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        match self.state {
            SessionState::AtAngle(_) => None,
            SessionState::Completed => Some(SessionOutcome::Completed { captured: self.captured }),
            SessionState::Cancelled => Some(SessionOutcome::Cancelled { captured: self.captured }),
        }
    }

    /// Advance by one frame. `face` is the most confident detection on
    /// `frame`, in `frame` coordinates. A signal takes precedence over the
    /// detection outcome, and cancel over skip.
    pub fn step(
        &mut self,
        frame: &RgbImage,
        face: Option<&BoundingBox>,
        signal: Option<SessionSignal>,
        sink: &mut dyn FaceSink,
    ) -> StepEvent {
        let SessionState::AtAngle(angle) = self.state else {
            return StepEvent::Idle;
        };

        match signal {
            Some(SessionSignal::Cancel) => {
                self.state = SessionState::Cancelled;
                tracing::info!(label = %self.label, captured = self.captured, "capture session cancelled");
                return StepEvent::Cancelled;
            }
            Some(SessionSignal::SkipAngle) => {
                tracing::info!(angle = self.angles[angle].name, "angle skipped by operator");
                self.advance();
                return StepEvent::Skipped { angle };
            }
            None => {}
        }

        self.frames_in_angle += 1;
        match face {
            Some(face) => {
                self.no_face = 0;
                self.dwell += 1;
                if self.dwell >= self.angles[angle].dwell_frames {
                    let event = match self.capture(frame, face, angle, sink) {
                        Some(path) => StepEvent::Captured { angle, path },
                        None => StepEvent::CaptureFailed { angle },
                    };
                    self.advance();
                    return event;
                }
            }
            None => {
                self.dwell = 0;
                self.no_face += 1;
            }
        }

        if self.frames_in_angle >= self.limits.max_wait_frames {
            tracing::warn!(
                angle = self.angles[angle].name,
                frames = self.frames_in_angle,
                "no stable face, abandoning angle"
            );
            let path = face.and_then(|face| self.capture(frame, face, angle, sink));
            self.advance();
            return StepEvent::Abandoned { angle, path };
        }

        StepEvent::Waiting
    }

    fn capture(
        &mut self,
        frame: &RgbImage,
        face: &BoundingBox,
        angle: usize,
        sink: &mut dyn FaceSink,
    ) -> Option<PathBuf> {
        let current = &self.angles[angle];
        let result = crop(frame, face).and_then(|crop| sink.store(&self.label, current, &crop));
        match result {
            Ok(path) => {
                self.captured += 1;
                tracing::info!(
                    label = %self.label,
                    angle = current.name,
                    captured = self.captured,
                    path = %path.display(),
                    "photo captured"
                );
                Some(path)
            }
            Err(e) => {
                tracing::warn!(angle = current.name, error = %e, "capture failed, photo not counted");
                None
            }
        }
    }

    fn advance(&mut self) {
        self.frames_in_angle = 0;
        self.dwell = 0;
        self.no_face = 0;
        if let SessionState::AtAngle(i) = self.state {
            if i + 1 >= self.angles.len() {
                self.state = SessionState::Completed;
                tracing::info!(label = %self.label, captured = self.captured, "capture session completed");
            } else {
                self.state = SessionState::AtAngle(i + 1);
            }
        }
    }
}

fn crop(frame: &RgbImage, face: &BoundingBox) -> Result<RgbImage, CaptureError> {
    let (x, y, w, h) = face
        .clamped_rect(frame.width(), frame.height())
        .ok_or(CaptureError::EmptyCrop)?;
    Ok(imageops::crop_imm(frame, x, y, w, h).to_image())
}
