//! Detector/encoder seam.
//!
//! The rest of the system only sees [`FaceAnalyzer`]; the ONNX-backed
//! implementation pairs the SCRFD detector with the ArcFace encoder.

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Distance, Embedding};

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("encoder returned {embeddings} embeddings for {faces} faces")]
    Misaligned { faces: usize, embeddings: usize },
    #[error("invalid downscale factor {0} (must be in (0, 1])")]
    InvalidDownscale(f32),
    #[error("{0}")]
    Other(String),
}

/// Black-box face detection and embedding capability.
///
/// `encode` returns one embedding per input box, in the same order.
pub trait FaceAnalyzer {
    /// Detect faces, most confident first. An empty image yields no faces.
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError>;

    fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, AnalyzerError>;

    /// Metric the embeddings are meant to be compared with.
    fn distance(&self) -> Distance;
}

/// Faces found on one frame, in full-frame coordinates.
#[derive(Debug, Clone, Default)]
pub struct Scan {
    pub faces: Vec<BoundingBox>,
    /// Positionally aligned with `faces`; empty when encoding was not requested.
    pub embeddings: Vec<Embedding>,
}

/// Resize `image` by `factor`, borrowing it unchanged when `factor == 1.0`.
pub fn downscale(image: &RgbImage, factor: f32) -> Cow<'_, RgbImage> {
    if factor >= 1.0 {
        return Cow::Borrowed(image);
    }
    let w = ((image.width() as f32 * factor).round() as u32).max(1);
    let h = ((image.height() as f32 * factor).round() as u32).max(1);
    Cow::Owned(imageops::resize(image, w, h, FilterType::Triangle))
}

/// Detect (and optionally encode) on a downscaled copy of `image`, then map
/// the boxes back to full-frame space with the exact inverse factor.
pub fn scan(
    analyzer: &mut dyn FaceAnalyzer,
    image: &RgbImage,
    factor: f32,
    encode: bool,
) -> Result<Scan, AnalyzerError> {
    if !(factor > 0.0 && factor <= 1.0) {
        return Err(AnalyzerError::InvalidDownscale(factor));
    }
    if image.width() == 0 || image.height() == 0 {
        return Ok(Scan::default());
    }

    let small = downscale(image, factor);
    let faces = analyzer.detect_faces(&small)?;
    if faces.is_empty() {
        return Ok(Scan::default());
    }

    let embeddings = if encode {
        let embeddings = analyzer.encode(&small, &faces)?;
        if embeddings.len() != faces.len() {
            return Err(AnalyzerError::Misaligned {
                faces: faces.len(),
                embeddings: embeddings.len(),
            });
        }
        embeddings
    } else {
        Vec::new()
    };

    let inv = 1.0 / factor;
    let faces = if factor == 1.0 {
        faces
    } else {
        faces.iter().map(|f| f.scaled(inv)).collect()
    };

    Ok(Scan { faces, embeddings })
}

/// SCRFD + ArcFace analyzer running on ONNX Runtime.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    pub fn load(scrfd_path: &str, arcface_path: &str) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(scrfd_path)?;
        tracing::info!(path = scrfd_path, "SCRFD detector loaded");
        let recognizer = FaceRecognizer::load(arcface_path)?;
        tracing::info!(path = arcface_path, "ArcFace recognizer loaded");
        Ok(Self { detector, recognizer })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        Ok(self.detector.detect(image)?)
    }

    fn encode(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
    ) -> Result<Vec<Embedding>, AnalyzerError> {
        faces
            .iter()
            .map(|face| self.recognizer.extract(image, face).map_err(AnalyzerError::from))
            .collect()
    }

    fn distance(&self) -> Distance {
        Distance::Cosine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Reports one fixed box in whatever image it is given, remembering the
    /// size it was called with.
    struct FixedAnalyzer {
        face: Option<BoundingBox>,
        seen: Option<(u32, u32)>,
        drop_embedding: bool,
    }

    impl FaceAnalyzer for FixedAnalyzer {
        fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
            self.seen = Some(image.dimensions());
            Ok(self.face.into_iter().collect())
        }

        fn encode(
            &mut self,
            _image: &RgbImage,
            faces: &[BoundingBox],
        ) -> Result<Vec<Embedding>, AnalyzerError> {
            let n = if self.drop_embedding { faces.len() - 1 } else { faces.len() };
            Ok(vec![Embedding::new(vec![0.5, 0.5]); n])
        }

        fn distance(&self) -> Distance {
            Distance::Euclidean
        }
    }

    fn analyzer(face: Option<BoundingBox>) -> FixedAnalyzer {
        FixedAnalyzer { face, seen: None, drop_embedding: false }
    }

    fn bbox() -> BoundingBox {
        BoundingBox { x: 30.0, y: 15.0, width: 60.0, height: 45.0, confidence: 0.8 }
    }

    #[test]
    fn test_scan_rescales_boxes_to_full_frame() {
        let image = RgbImage::from_pixel(400, 200, Rgb([10, 10, 10]));
        let mut a = analyzer(Some(bbox()));
        let scan = scan(&mut a, &image, 0.75, true).unwrap();

        assert_eq!(a.seen, Some((300, 150)));
        assert_eq!(scan.faces.len(), 1);
        assert_eq!(scan.embeddings.len(), 1);
        assert!((scan.faces[0].x - 40.0).abs() < 1e-4);
        assert!((scan.faces[0].width - 80.0).abs() < 1e-4);
    }

    #[test]
    fn test_scan_without_downscale_keeps_boxes() {
        let image = RgbImage::new(64, 64);
        let mut a = analyzer(Some(bbox()));
        let scan = scan(&mut a, &image, 1.0, false).unwrap();
        assert_eq!(a.seen, Some((64, 64)));
        assert_eq!(scan.faces[0], bbox());
        assert!(scan.embeddings.is_empty());
    }

    #[test]
    fn test_scan_empty_image_never_calls_detector() {
        let image = RgbImage::new(0, 0);
        let mut a = analyzer(Some(bbox()));
        let scan = scan(&mut a, &image, 0.5, true).unwrap();
        assert!(scan.faces.is_empty());
        assert_eq!(a.seen, None);
    }

    #[test]
    fn test_scan_rejects_misaligned_encoder() {
        let image = RgbImage::new(32, 32);
        let mut a = analyzer(Some(bbox()));
        a.drop_embedding = true;
        let err = scan(&mut a, &image, 1.0, true).unwrap_err();
        assert!(matches!(err, AnalyzerError::Misaligned { faces: 1, embeddings: 0 }));
    }

    #[test]
    fn test_scan_rejects_bad_downscale() {
        let image = RgbImage::new(32, 32);
        let mut a = analyzer(None);
        assert!(scan(&mut a, &image, 0.0, false).is_err());
        assert!(scan(&mut a, &image, 1.5, false).is_err());
    }

    #[test]
    fn test_downscale_borrows_at_unit_factor() {
        let image = RgbImage::new(10, 10);
        assert!(matches!(downscale(&image, 1.0), Cow::Borrowed(_)));
        assert_eq!(downscale(&image, 0.5).dimensions(), (5, 5));
    }
}
