//! Pipeline configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `FACESCAN_*` environment variables.

use crate::detector::{DETECTOR_CONFIDENCE_THRESHOLD, DETECTOR_INPUT_SIZE, DETECTOR_NMS_THRESHOLD};
use crate::landmarks::{
    LANDMARK_CONFIDENCE_THRESHOLD, LANDMARK_INPUT_SIZE, LANDMARK_NMS_THRESHOLD, LANDMARK_STRIDES,
};
use crate::recognizer::ARCFACE_INPUT_SIZE;
use crate::search::{DEFAULT_SEARCH_K, DEFAULT_SIMILARITY_THRESHOLD};
use crate::throttle::DEFAULT_MATCH_INTERVAL;
use crate::tracker::{DEFAULT_TRACKER_CONFIRM, DEFAULT_TRACKER_WINDOW};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "FACESCAN_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub landmark_model: String,
    pub embedding_model: String,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,

    pub detector_input_size: u32,
    pub detector_confidence: f32,
    pub detector_nms: f32,

    pub landmark_input_size: u32,
    pub landmark_confidence: f32,
    pub landmark_nms: f32,
    pub strides: Vec<usize>,

    /// Fraction of the box size added on each side before cropping.
    pub crop_margin: f32,

    pub embedding_input_size: u32,
    /// Expected embedding length; a model producing another size is reported.
    pub embedding_dim: usize,

    pub match_interval_ms: u64,
    pub search_k: usize,
    pub similarity_threshold: f32,
    pub gallery_id: String,

    /// Searches remembered when confirming an identity.
    pub tracker_window: usize,
    /// Matches of one person within the window needed to confirm them.
    pub tracker_confirm: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            detector_model: "yolov11n-face.onnx".into(),
            landmark_model: "det_10g.onnx".into(),
            embedding_model: "w600k_mbf.onnx".into(),
            intra_threads: 2,
            detector_input_size: DETECTOR_INPUT_SIZE,
            detector_confidence: DETECTOR_CONFIDENCE_THRESHOLD,
            detector_nms: DETECTOR_NMS_THRESHOLD,
            landmark_input_size: LANDMARK_INPUT_SIZE,
            landmark_confidence: LANDMARK_CONFIDENCE_THRESHOLD,
            landmark_nms: LANDMARK_NMS_THRESHOLD,
            strides: LANDMARK_STRIDES.to_vec(),
            crop_margin: 0.0,
            embedding_input_size: ARCFACE_INPUT_SIZE,
            embedding_dim: 512,
            match_interval_ms: DEFAULT_MATCH_INTERVAL.as_millis() as u64,
            search_k: DEFAULT_SEARCH_K,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            gallery_id: "default".into(),
            tracker_window: DEFAULT_TRACKER_WINDOW,
            tracker_confirm: DEFAULT_TRACKER_CONFIRM,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Override fields from `FACESCAN_*` variables resolved by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).map(|v| (format!("{ENV_PREFIX}{name}"), v));

        if let Some((_, v)) = get("MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some((_, v)) = get("DETECTOR_MODEL") {
            self.detector_model = v;
        }
        if let Some((_, v)) = get("LANDMARK_MODEL") {
            self.landmark_model = v;
        }
        if let Some((_, v)) = get("EMBEDDING_MODEL") {
            self.embedding_model = v;
        }
        if let Some((_, v)) = get("GALLERY_ID") {
            self.gallery_id = v;
        }

        parse_into(get("INTRA_THREADS"), &mut self.intra_threads)?;
        parse_into(get("DETECTOR_INPUT_SIZE"), &mut self.detector_input_size)?;
        parse_into(get("DETECTOR_CONFIDENCE"), &mut self.detector_confidence)?;
        parse_into(get("DETECTOR_NMS"), &mut self.detector_nms)?;
        parse_into(get("LANDMARK_INPUT_SIZE"), &mut self.landmark_input_size)?;
        parse_into(get("LANDMARK_CONFIDENCE"), &mut self.landmark_confidence)?;
        parse_into(get("LANDMARK_NMS"), &mut self.landmark_nms)?;
        parse_into(get("CROP_MARGIN"), &mut self.crop_margin)?;
        parse_into(get("EMBEDDING_INPUT_SIZE"), &mut self.embedding_input_size)?;
        parse_into(get("EMBEDDING_DIM"), &mut self.embedding_dim)?;
        parse_into(get("MATCH_INTERVAL_MS"), &mut self.match_interval_ms)?;
        parse_into(get("SEARCH_K"), &mut self.search_k)?;
        parse_into(get("SIMILARITY_THRESHOLD"), &mut self.similarity_threshold)?;
        parse_into(get("TRACKER_WINDOW"), &mut self.tracker_window)?;
        parse_into(get("TRACKER_CONFIRM"), &mut self.tracker_confirm)?;

        if let Some((key, v)) = get("STRIDES") {
            self.strides = v
                .split(',')
                .map(|s| s.trim().parse::<usize>())
                .collect::<Result<_, _>>()
                .map_err(|_| ConfigError::InvalidEnv { key, value: v.clone() })?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = [
            ("detector_confidence", self.detector_confidence),
            ("detector_nms", self.detector_nms),
            ("landmark_confidence", self.landmark_confidence),
            ("landmark_nms", self.landmark_nms),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} must be in [0, 1], got {value}")));
            }
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold must be in [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.strides.is_empty() || self.strides.contains(&0) {
            return Err(ConfigError::Invalid("strides must be non-empty and positive".into()));
        }
        for (name, size) in [
            ("detector_input_size", self.detector_input_size),
            ("landmark_input_size", self.landmark_input_size),
            ("embedding_input_size", self.embedding_input_size),
        ] {
            if size == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if !self.crop_margin.is_finite() || self.crop_margin < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "crop_margin must be non-negative, got {}",
                self.crop_margin
            )));
        }
        if self.search_k == 0 {
            return Err(ConfigError::Invalid("search_k must be at least 1".into()));
        }
        if self.tracker_confirm == 0 || self.tracker_confirm > self.tracker_window {
            return Err(ConfigError::Invalid(format!(
                "tracker_confirm must be in 1..={}, got {}",
                self.tracker_window, self.tracker_confirm
            )));
        }
        Ok(())
    }

    pub fn match_interval(&self) -> Duration {
        Duration::from_millis(self.match_interval_ms)
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn landmark_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.landmark_model)
    }

    pub fn embedding_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedding_model)
    }

    /// Model file stem used to tag embeddings (e.g., "w600k_mbf").
    pub fn embedding_model_version(&self) -> String {
        Path::new(&self.embedding_model)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.embedding_model.clone())
    }
}

fn parse_into<T: FromStr>(entry: Option<(String, String)>, slot: &mut T) -> Result<(), ConfigError> {
    if let Some((key, value)) = entry {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { key, value })?;
    }
    Ok(())
}

/// `$XDG_DATA_HOME/facescan`, falling back to `~/.local/share/facescan`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facescan")
}

pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}
