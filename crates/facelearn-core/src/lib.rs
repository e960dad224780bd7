//! facelearn-core — identity store and face analysis engine.
//!
//! Holds the labelled embedding store and its corpus rebuild, the
//! minimum-distance matcher, identity-label normalization, and the
//! SCRFD + ArcFace analyzer running on ONNX Runtime.

pub mod analyzer;
pub mod detector;
pub mod label;
pub mod recognizer;
pub mod store;
pub mod types;

use std::path::PathBuf;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer, Scan};
pub use label::{normalize_label, IdentityLabel, LabelError};
pub use store::{EmbeddingStore, StoreError};
pub use types::{BoundingBox, Distance, Embedding, MatchResult, Matcher, NearestMatcher};

/// File name of the persisted store inside the data dir.
pub const STORE_FILE: &str = "known_encodings.json";
/// Directory of the training corpus inside the data dir.
pub const TRAIN_DIR: &str = "train";
/// SCRFD detection model file name.
pub const SCRFD_MODEL: &str = "det_10g.onnx";
/// ArcFace recognition model file name.
pub const ARCFACE_MODEL: &str = "w600k_r50.onnx";

/// `$XDG_DATA_HOME/facelearn`, falling back to `~/.local/share/facelearn`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facelearn")
}

/// Model files live next to the data by default.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}
