//! Fakes for the loop's collaborators.

use std::collections::VecDeque;

use facelearn_core::{AnalyzerError, BoundingBox, Distance, Embedding, FaceAnalyzer};
use facelearn_hw::{CameraError, Frame, FrameSource};
use image::{Rgb, RgbImage};

use crate::ui::{Display, DisplayError, KeyPress, Prompt};

pub fn frame_of(value: u8) -> RgbImage {
    RgbImage::from_pixel(32, 24, Rgb([value, value, value]))
}

pub fn bright() -> RgbImage {
    frame_of(200)
}

pub fn dark() -> RgbImage {
    frame_of(20)
}

/// Yields the same image `limit` times, then fails like an unplugged camera.
pub struct FakeCamera {
    image: RgbImage,
    limit: usize,
    reads: usize,
}

impl FakeCamera {
    pub fn repeating(image: RgbImage, limit: usize) -> Self {
        Self { image, limit, reads: 0 }
    }

    /// Successful reads so far.
    pub fn reads(&self) -> usize {
        self.reads.min(self.limit)
    }
}

impl FrameSource for FakeCamera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        if self.reads >= self.limit {
            return Err(CameraError::CaptureFailed("device disconnected".into()));
        }
        self.reads += 1;
        Ok(Frame::new(self.image.clone(), self.reads as u32))
    }
}

/// A face covering the central half of any image whose mean red exceeds
/// 128. The embedding is the mean red divided by 100.
#[derive(Default)]
pub struct ThresholdAnalyzer {
    pub detect_calls: usize,
}

fn mean_red(image: &RgbImage) -> f32 {
    let n = (image.width() * image.height()).max(1) as f32;
    image.pixels().map(|p| p[0] as f32).sum::<f32>() / n
}

impl FaceAnalyzer for ThresholdAnalyzer {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
        self.detect_calls += 1;
        if mean_red(image) <= 128.0 {
            return Ok(Vec::new());
        }
        let (w, h) = (image.width() as f32, image.height() as f32);
        Ok(vec![BoundingBox {
            x: w / 4.0,
            y: h / 4.0,
            width: w / 2.0,
            height: h / 2.0,
            confidence: 0.9,
        }])
    }

    fn encode(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, AnalyzerError> {
        Ok(faces.iter().map(|_| Embedding::new(vec![mean_red(image) / 100.0])).collect())
    }

    fn distance(&self) -> Distance {
        Distance::Euclidean
    }
}

/// Keys scripted per `show` call: `(n, key)` becomes pending after the
/// n-th (0-based) frame is shown.
#[derive(Default)]
pub struct FakeDisplay {
    pub shown: usize,
    script: Vec<(usize, KeyPress)>,
    pending: VecDeque<KeyPress>,
}

impl FakeDisplay {
    pub fn with_keys(keys: &[(usize, KeyPress)]) -> Self {
        Self { script: keys.to_vec(), ..Default::default() }
    }
}

impl Display for FakeDisplay {
    fn show(&mut self, _frame: &RgbImage) -> Result<(), DisplayError> {
        let n = self.shown;
        self.pending
            .extend(self.script.iter().filter(|(at, _)| *at == n).map(|(_, k)| *k));
        self.shown += 1;
        Ok(())
    }

    fn poll_key(&mut self) -> Option<KeyPress> {
        self.pending.pop_front()
    }
}

/// Scripted answers; runs out to "no" / EOF.
#[derive(Default)]
pub struct FakePrompt {
    labels: VecDeque<Option<String>>,
    confirms: VecDeque<bool>,
    pub labels_asked: usize,
    pub confirms_asked: usize,
    pub messages: Vec<String>,
}

impl FakePrompt {
    pub fn answering_labels(labels: &[Option<&str>]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.map(str::to_string)).collect(),
            ..Default::default()
        }
    }

    pub fn answering_confirms(confirms: &[bool]) -> Self {
        Self { confirms: confirms.iter().copied().collect(), ..Default::default() }
    }
}

impl Prompt for FakePrompt {
    fn ask_label(&mut self, _question: &str) -> Result<Option<String>, DisplayError> {
        self.labels_asked += 1;
        Ok(self.labels.pop_front().flatten())
    }

    fn confirm(&mut self, _question: &str) -> Result<bool, DisplayError> {
        self.confirms_asked += 1;
        Ok(self.confirms.pop_front().unwrap_or(false))
    }

    fn notify(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }
}
