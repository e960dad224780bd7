use serde::{Deserialize, Serialize};

use crate::store::EmbeddingStore;

/// Axis-aligned bounding box for a detected face, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Multiply every coordinate by `factor`.
    ///
    /// Used with `1.0 / downscale` to map boxes found on a downscaled copy
    /// back into full-frame space.
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
        }
    }

    /// Integer pixel rectangle `(x, y, w, h)` clamped to an image of the given size.
    ///
    /// Returns `None` when the clamped rectangle is empty.
    pub fn clamped_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.floor().max(0.0) as u32;
        let y0 = self.y.floor().max(0.0) as u32;
        let x1 = ((self.x + self.width).ceil().max(0.0) as u32).min(width);
        let y1 = ((self.y + self.height).ceil().max(0.0) as u32).min(height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.width * self.height + other.width * other.height - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Face embedding vector produced by the encoder for one detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Cosine similarity in [-1, 1]. Zero vectors compare as 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Distance metric an encoder is designed against.
///
/// Tolerances are only meaningful for the metric they were tuned with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    Euclidean,
    /// `1 - cosine_similarity`, in [0, 2].
    Cosine,
}

impl Distance {
    pub fn between(&self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            Distance::Euclidean => a.euclidean_distance(b),
            Distance::Cosine => 1.0 - a.similarity(b),
        }
    }
}

/// Result of matching a probe embedding against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Label of the winning entry, `None` when nothing is within tolerance.
    pub label: Option<String>,
    /// Smallest distance seen over the whole store (`f32::INFINITY` when empty).
    pub distance: f32,
    /// Store index of the winning entry.
    pub index: Option<usize>,
}

impl MatchResult {
    pub fn is_known(&self) -> bool {
        self.label.is_some()
    }
}

/// Strategy for resolving a probe embedding to a stored identity.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, store: &EmbeddingStore, tolerance: f32) -> MatchResult;
}

/// Minimum-distance matcher.
///
/// Scans every entry and picks the closest one within tolerance, so an
/// earlier entry that is merely "close enough" never shadows a closer one.
/// Ties keep the earliest entry in store order.
#[derive(Debug, Clone, Copy)]
pub struct NearestMatcher {
    pub distance: Distance,
}

impl NearestMatcher {
    pub fn new(distance: Distance) -> Self {
        Self { distance }
    }
}

impl Matcher for NearestMatcher {
    fn compare(&self, probe: &Embedding, store: &EmbeddingStore, tolerance: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, (_, embedding)) in store.iter().enumerate() {
            let dist = self.distance.between(probe, embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= tolerance => MatchResult {
                label: store.label(idx).map(str::to_string),
                distance: best_dist,
                index: Some(idx),
            },
            _ => MatchResult {
                label: None,
                distance: best_dist,
                index: None,
            },
        }
    }
}
