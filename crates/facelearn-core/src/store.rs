//! Embedding store: labelled embeddings, persisted as one JSON snapshot and
//! rebuilt wholesale from the training corpus.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use image::ImageFormat;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::analyzer::{self, FaceAnalyzer};
use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store has {labels} labels but {embeddings} embeddings")]
    LengthMismatch { labels: usize, embeddings: usize },
    #[error("embedding {index} has dimension {found}, expected {expected}")]
    DimensionMismatch { index: usize, expected: usize, found: usize },
    #[error("failed to serialize store: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io { context: context.into(), source }
    }
}

/// On-disk snapshot layout.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    embeddings: Vec<Embedding>,
    labels: Vec<String>,
}

/// Ordered (label, embedding) pairs. `labels.len() == embeddings.len()` always
/// holds, and every embedding has the same dimension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingStore {
    labels: Vec<String>,
    embeddings: Vec<Embedding>,
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(labels: Vec<String>, embeddings: Vec<Embedding>) -> Result<Self, StoreError> {
        if labels.len() != embeddings.len() {
            return Err(StoreError::LengthMismatch {
                labels: labels.len(),
                embeddings: embeddings.len(),
            });
        }
        if let Some(first) = embeddings.first() {
            let expected = first.values.len();
            if let Some((index, e)) = embeddings.iter().enumerate().find(|(_, e)| e.values.len() != expected) {
                return Err(StoreError::DimensionMismatch { index, expected, found: e.values.len() });
            }
        }
        Ok(Self { labels, embeddings })
    }

    pub fn push(&mut self, label: String, embedding: Embedding) {
        self.labels.push(label);
        self.embeddings.push(embedding);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.labels.iter().map(String::as_str).zip(self.embeddings.iter())
    }

    /// Number of embeddings per label, sorted by label.
    pub fn identities(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for label in &self.labels {
            *counts.entry(label.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Read the persisted snapshot. A missing file is the cold-start state
    /// and yields an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let file = match fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no store snapshot, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(StoreError::io(format!("open {}", path.display()), e)),
        };

        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            StoreError::Corrupt { path: path.to_path_buf(), source: e }
        })?;
        let store = Self::from_parts(snapshot.labels, snapshot.embeddings)?;

        tracing::info!(path = %path.display(), entries = store.len(), "loaded store snapshot");
        Ok(store)
    }

    /// Atomically replace the snapshot at `path`.
    ///
    /// Writes to a temp file in the same directory and renames it over the
    /// target, so a failure at any point leaves the previous snapshot intact.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| StoreError::io(format!("create {}", dir.display()), e))?;

        let tmp = NamedTempFile::new_in(dir)
            .map_err(|e| StoreError::io(format!("temp file in {}", dir.display()), e))?;

        let snapshot = Snapshot {
            embeddings: self.embeddings.clone(),
            labels: self.labels.clone(),
        };
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, &snapshot)?;
            writer.flush().map_err(|e| StoreError::io("flush store snapshot", e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io("sync store snapshot", e))?;
        tmp.persist(path)
            .map_err(|e| StoreError::io(format!("replace {}", path.display()), e.error))?;

        tracing::info!(path = %path.display(), entries = self.len(), "saved store snapshot");
        Ok(())
    }
}

/// Recompute the store from every identity directory under `root`.
///
/// Directories and files are visited in name order. Images that fail to
/// decode, fail in the analyzer, or contain no face are skipped with a
/// warning; the most confident face of each image contributes one entry.
/// A missing `root` yields an empty store.
pub fn rebuild_from_corpus(
    analyzer: &mut dyn FaceAnalyzer,
    root: &Path,
) -> Result<EmbeddingStore, StoreError> {
    let mut store = EmbeddingStore::new();
    if !root.exists() {
        tracing::warn!(root = %root.display(), "training corpus missing, rebuilt store is empty");
        return Ok(store);
    }

    for person_dir in sorted_entries(root)? {
        if !person_dir.is_dir() {
            continue;
        }
        let Some(label) = person_dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            tracing::warn!(dir = %person_dir.display(), "skipping non-UTF-8 identity directory");
            continue;
        };

        let images = match sorted_entries(&person_dir) {
            Ok(images) => images,
            Err(e) => {
                tracing::warn!(dir = %person_dir.display(), error = %e, "skipping unreadable identity directory");
                continue;
            }
        };

        let before = store.len();
        for img_path in images {
            if !is_image(&img_path) {
                continue;
            }
            match encode_image(analyzer, &img_path) {
                Ok(Some(embedding)) => store.push(label.clone(), embedding),
                Ok(None) => tracing::warn!(path = %img_path.display(), "no face found, skipping"),
                Err(reason) => tracing::warn!(path = %img_path.display(), %reason, "skipping image"),
            }
        }
        tracing::info!(label = %label, embeddings = store.len() - before, "encoded identity");
    }

    tracing::info!(root = %root.display(), entries = store.len(), "rebuilt store from corpus");
    Ok(store)
}

/// Rebuild from the corpus and persist the result. Returns the new store.
pub fn rebuild_and_persist(
    analyzer: &mut dyn FaceAnalyzer,
    root: &Path,
    store_path: &Path,
) -> Result<EmbeddingStore, StoreError> {
    let store = rebuild_from_corpus(analyzer, root)?;
    store.save(store_path)?;
    Ok(store)
}

fn encode_image(analyzer: &mut dyn FaceAnalyzer, path: &Path) -> Result<Option<Embedding>, String> {
    let image = image::open(path).map_err(|e| e.to_string())?.to_rgb8();
    let scan = analyzer::scan(analyzer, &image, 1.0, false).map_err(|e| e.to_string())?;
    let Some(face) = scan.faces.first() else {
        return Ok(None);
    };
    let embeddings = analyzer
        .encode(&image, std::slice::from_ref(face))
        .map_err(|e| e.to_string())?;
    Ok(embeddings.into_iter().next())
}

fn is_image(path: &Path) -> bool {
    path.is_file() && ImageFormat::from_path(path).is_ok()
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let read = fs::read_dir(dir).map_err(|e| StoreError::io(format!("read {}", dir.display()), e))?;
    let mut paths: Vec<PathBuf> = read.filter_map(|entry| entry.ok().map(|e| e.path())).collect();
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerError;
    use crate::types::{BoundingBox, Distance};
    use image::{Rgb, RgbImage};

    /// Treats bright images as containing one face; the embedding is the
    /// mean red value scaled to [0, 1].
    struct BrightnessAnalyzer;

    impl FaceAnalyzer for BrightnessAnalyzer {
        fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, AnalyzerError> {
            let mean = mean_red(image);
            if mean > 128.0 {
                Ok(vec![BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: image.width() as f32,
                    height: image.height() as f32,
                    confidence: 0.9,
                }])
            } else {
                Ok(vec![])
            }
        }

        fn encode(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, AnalyzerError> {
            Ok(faces.iter().map(|_| Embedding::new(vec![mean_red(image) / 255.0])).collect())
        }

        fn distance(&self) -> Distance {
            Distance::Euclidean
        }
    }

    fn mean_red(image: &RgbImage) -> f32 {
        let n = (image.width() * image.height()).max(1) as f32;
        image.pixels().map(|p| p[0] as f32).sum::<f32>() / n
    }

    fn write_image(dir: &Path, name: &str, value: u8) {
        fs::create_dir_all(dir).unwrap();
        RgbImage::from_pixel(8, 8, Rgb([value, value, value]))
            .save(dir.join(name))
            .unwrap();
    }

    fn sample_store() -> EmbeddingStore {
        EmbeddingStore::from_parts(
            vec!["Ana".into(), "Luis".into(), "Ana".into()],
            vec![
                Embedding::new(vec![0.1, 0.2]),
                Embedding::new(vec![0.3, 0.4]),
                Embedding::new(vec![0.5, 0.6]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_from_parts_rejects_mismatch() {
        let err = EmbeddingStore::from_parts(vec!["a".into()], vec![]).unwrap_err();
        assert!(matches!(err, StoreError::LengthMismatch { labels: 1, embeddings: 0 }));
    }

    #[test]
    fn test_from_parts_rejects_mixed_dimensions() {
        let err = EmbeddingStore::from_parts(
            vec!["Ana".into(), "Luis".into()],
            vec![Embedding::new(vec![0.1, 0.2]), Embedding::new(vec![0.3])],
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { index: 1, expected: 2, found: 1 }));
    }

    #[test]
    fn test_load_mixed_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_encodings.json");
        fs::write(&path, br#"{"embeddings": [[0.1, 0.2], [0.3]], "labels": ["Ana", "Luis"]}"#).unwrap();
        assert!(matches!(EmbeddingStore::load(&path), Err(StoreError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_identities_counts() {
        let counts = sample_store().identities();
        assert_eq!(counts.get("Ana"), Some(&2));
        assert_eq!(counts.get("Luis"), Some(&1));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddingStore::load(&dir.path().join("nope.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/known_encodings.json");
        let store = sample_store();
        store.save(&path).unwrap();
        assert_eq!(EmbeddingStore::load(&path).unwrap(), store);
    }

    #[test]
    fn test_snapshot_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_encodings.json");
        sample_store().save(&path).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["labels"][1], "Luis");
        assert_eq!(value["embeddings"].as_array().unwrap().len(), 3);
        assert_eq!(value["embeddings"][0].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_encodings.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(EmbeddingStore::load(&path), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_load_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_encodings.json");
        fs::write(&path, br#"{"embeddings": [[0.1]], "labels": []}"#).unwrap();
        assert!(matches!(EmbeddingStore::load(&path), Err(StoreError::LengthMismatch { .. })));
    }

    #[test]
    fn test_failed_save_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_encodings.json");
        // A non-empty directory at the target path makes the final rename fail.
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), b"x").unwrap();

        assert!(sample_store().save(&path).is_err());
        assert!(path.join("keep").exists());
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "temp file must not be left behind");
    }

    #[test]
    fn test_rebuild_labels_by_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("train");
        write_image(&root.join("Luis"), "b.png", 250);
        write_image(&root.join("Ana"), "a.png", 200);
        write_image(&root.join("Ana"), "b.png", 220);
        fs::write(root.join("Ana/notes.txt"), b"ignored").unwrap();
        fs::write(root.join("stray.png"), b"not a dir").unwrap();

        let store = rebuild_from_corpus(&mut BrightnessAnalyzer, &root).unwrap();
        let labels: Vec<&str> = store.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["Ana", "Ana", "Luis"]);
    }

    #[test]
    fn test_rebuild_skips_faceless_and_undecodable_images() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("train");
        write_image(&root.join("Ana"), "dark.png", 10);
        write_image(&root.join("Ana"), "ok.png", 200);
        fs::write(root.join("Ana/broken.jpg"), b"definitely not a jpeg").unwrap();

        let store = rebuild_from_corpus(&mut BrightnessAnalyzer, &root).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_rebuild_with_only_faceless_images_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("train");
        for name in ["Ana", "Luis", "Marta"] {
            write_image(&root.join(name), "x.png", 0);
        }
        let store = rebuild_from_corpus(&mut BrightnessAnalyzer, &root).unwrap();
        assert!(store.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_rebuild_skips_unreadable_identity_directory() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("train");
        write_image(&root.join("Ana"), "a.png", 200);
        write_image(&root.join("Luis"), "a.png", 220);
        let locked = root.join("Ana");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        let readable_anyway = fs::read_dir(&locked).is_ok();

        let store = rebuild_from_corpus(&mut BrightnessAnalyzer, &root);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        let store = store.unwrap();

        let labels: Vec<&str> = store.iter().map(|(l, _)| l).collect();
        if readable_anyway {
            // Privileged users ignore directory permissions.
            assert_eq!(labels, vec!["Ana", "Luis"]);
        } else {
            assert_eq!(labels, vec!["Luis"]);
        }
    }

    #[test]
    fn test_rebuild_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = rebuild_from_corpus(&mut BrightnessAnalyzer, &dir.path().join("none")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_rebuild_and_persist_replaces_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("train");
        let path = dir.path().join("known_encodings.json");
        sample_store().save(&path).unwrap();
        write_image(&root.join("Marta"), "a.png", 255);

        let store = rebuild_and_persist(&mut BrightnessAnalyzer, &root, &path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(EmbeddingStore::load(&path).unwrap(), store);
    }
}
