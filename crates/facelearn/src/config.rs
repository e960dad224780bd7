use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::recognition::Tolerance;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Tool configuration: defaults, then an optional TOML file, then
/// `FACELEARN_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Holds the training corpus and the store snapshot.
    pub data_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Initial match tolerance.
    pub tolerance: Tolerance,
    /// Scale applied to frames before detection, in (0, 1].
    pub downscale: f32,
    /// Run detection every Nth frame.
    pub detect_every: usize,
    /// Nominal frame rate used to turn the durations below into frame counts.
    pub capture_fps: u32,
    /// Seconds a face must stay in view before an angle is captured.
    pub dwell_secs: f32,
    /// Seconds before an angle is abandoned.
    pub max_wait_secs: f32,
    /// TrueType font for overlay text.
    pub font_path: PathBuf,
    /// Optional pre-flight file that must exist for the tool to start.
    pub sentinel_file: Option<PathBuf>,
}

/// Every key is optional; missing keys keep the default.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    frame_width: Option<u32>,
    frame_height: Option<u32>,
    data_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    tolerance: Option<f32>,
    downscale: Option<f32>,
    detect_every: Option<usize>,
    capture_fps: Option<u32>,
    dwell_secs: Option<f32>,
    max_wait_secs: Option<f32>,
    font_path: Option<PathBuf>,
    sentinel_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = facelearn_core::default_data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            model_dir: data_dir.join("models"),
            data_dir,
            tolerance: Tolerance::default(),
            downscale: 0.75,
            detect_every: 1,
            capture_fps: 30,
            dwell_secs: 2.0,
            max_wait_secs: 5.0,
            font_path: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
            sentinel_file: None,
        }
    }
}

impl Config {
    /// Load from the config file (if any) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();

        let file = match env("FACELEARN_CONFIG") {
            Some(path) => Some(read_file(Path::new(&path))?),
            None => match default_config_path() {
                Some(path) if path.exists() => Some(read_file(&path)?),
                _ => None,
            },
        };

        Self::resolve(file.unwrap_or_default(), &env)
    }

    fn resolve(file: FileConfig, env: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();

        let data_dir = env("FACELEARN_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or(d.data_dir);
        // A relocated data dir drags the default model dir along with it.
        let model_dir = env("FACELEARN_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(|| data_dir.join("models"));

        let raw_tolerance = env_parse(env, "FACELEARN_TOLERANCE")
            .or(file.tolerance)
            .unwrap_or(d.tolerance.value());
        let tolerance = Tolerance::new(raw_tolerance);
        if tolerance.value() != raw_tolerance {
            tracing::warn!(requested = raw_tolerance, using = tolerance.value(), "tolerance clamped");
        }

        let config = Self {
            camera_device: env("FACELEARN_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or(d.camera_device),
            frame_width: env_parse(env, "FACELEARN_FRAME_WIDTH")
                .or(file.frame_width)
                .unwrap_or(d.frame_width),
            frame_height: env_parse(env, "FACELEARN_FRAME_HEIGHT")
                .or(file.frame_height)
                .unwrap_or(d.frame_height),
            data_dir,
            model_dir,
            tolerance,
            downscale: env_parse(env, "FACELEARN_DOWNSCALE")
                .or(file.downscale)
                .unwrap_or(d.downscale),
            detect_every: env_parse(env, "FACELEARN_DETECT_EVERY")
                .or(file.detect_every)
                .unwrap_or(d.detect_every),
            capture_fps: env_parse(env, "FACELEARN_CAPTURE_FPS")
                .or(file.capture_fps)
                .unwrap_or(d.capture_fps),
            dwell_secs: env_parse(env, "FACELEARN_DWELL_SECS")
                .or(file.dwell_secs)
                .unwrap_or(d.dwell_secs),
            max_wait_secs: env_parse(env, "FACELEARN_MAX_WAIT_SECS")
                .or(file.max_wait_secs)
                .unwrap_or(d.max_wait_secs),
            font_path: env("FACELEARN_FONT_PATH")
                .map(PathBuf::from)
                .or(file.font_path)
                .unwrap_or(d.font_path),
            sentinel_file: env("FACELEARN_SENTINEL")
                .map(PathBuf::from)
                .or(file.sentinel_file),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.downscale > 0.0 && self.downscale <= 1.0) {
            return Err(invalid("downscale", format!("{} is not in (0, 1]", self.downscale)));
        }
        if self.detect_every == 0 {
            return Err(invalid("detect_every", "must be at least 1".into()));
        }
        if self.capture_fps == 0 {
            return Err(invalid("capture_fps", "must be at least 1".into()));
        }
        if !(self.dwell_secs > 0.0) {
            return Err(invalid("dwell_secs", "must be positive".into()));
        }
        if !(self.max_wait_secs > 0.0) {
            return Err(invalid("max_wait_secs", "must be positive".into()));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(invalid("frame_width/frame_height", "must be non-zero".into()));
        }
        Ok(())
    }

    /// Frames a face must stay detected before an angle is captured.
    pub fn dwell_frames(&self) -> usize {
        secs_to_frames(self.dwell_secs, self.capture_fps)
    }

    /// Frames before an angle is abandoned.
    pub fn max_wait_frames(&self) -> usize {
        secs_to_frames(self.max_wait_secs, self.capture_fps)
    }

    pub fn train_dir(&self) -> PathBuf {
        self.data_dir.join(facelearn_core::TRAIN_DIR)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(facelearn_core::STORE_FILE)
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(facelearn_core::SCRFD_MODEL)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(facelearn_core::ARCFACE_MODEL)
            .to_string_lossy()
            .into_owned()
    }
}

fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok()?;
    Some(base.join("facelearn").join("config.toml"))
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_file(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn parse_file(text: &str) -> Result<FileConfig, toml::de::Error> {
    toml::from_str(text)
}

fn env_parse<T: FromStr>(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

fn secs_to_frames(secs: f32, fps: u32) -> usize {
    ((secs * fps as f32).round() as usize).max(1)
}

fn invalid(key: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { key, reason }
}
