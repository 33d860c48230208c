//! facescan-core: face detection, alignment and embedding engine.
//!
//! A YOLO-style detector finds face boxes, an SCRFD-style model recovers
//! five landmarks per crop, faces are warped to the ArcFace pose and embedded.
//! Models run through ONNX Runtime behind the [`InferenceModel`] seam.

pub mod alignment;
pub mod config;
pub mod crop;
pub mod detector;
pub mod geometry;
pub mod landmarks;
pub mod model;
pub mod nms;
pub mod pipeline;
pub mod recognizer;
pub mod search;
pub mod selector;
pub mod throttle;
pub mod tracker;
pub mod types;

pub use config::{default_data_dir, default_model_dir, ConfigError, PipelineConfig};
pub use model::{InferenceError, InferenceModel, ModelOutputs, OrtModel, Tensor};
pub use pipeline::{FacePipeline, FrameOutcome, OrtPipeline};
pub use search::{FaceRecord, Gallery, GalleryStore, SearchError, SearchRequest, SearchResponse, SimilaritySearch};
pub use throttle::MatchThrottle;
pub use tracker::DetectionTracker;
pub use types::{BoundingBox, Embedding, FaceCandidate, Landmarks, MatchResult, MatchStatus, Point};
