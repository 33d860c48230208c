//! End-to-end face pipeline: detect → crop → landmarks → align → embed → search.
//!
//! [`FacePipeline`] owns every model and the match throttle. Callers build
//! one per frame loop and feed it frames in order; nothing is shared
//! process-wide.

use crate::alignment::{align_face, AlignedFace};
use crate::config::PipelineConfig;
use crate::crop::crop_region;
use crate::detector::FaceDetector;
use crate::landmarks::LandmarkDetector;
use crate::model::{InferenceError, InferenceModel, OrtModel};
use crate::nms::nms;
use crate::recognizer::EmbeddingExtractor;
use crate::search::{SearchRequest, SimilaritySearch};
use crate::selector::into_best_face;
use crate::throttle::MatchThrottle;
use crate::types::{Embedding, FaceCandidate, MatchResult};
use image::RgbImage;

/// Everything one frame produced. Stages that found nothing leave `None`.
#[derive(Debug, Clone, Default)]
pub struct FrameOutcome {
    /// Detector boxes after NMS, in frame coordinates.
    pub detections: Vec<FaceCandidate>,
    /// The selected face, with frame-space landmarks.
    pub face: Option<FaceCandidate>,
    pub aligned: Option<AlignedFace>,
    pub embedding: Option<Embedding>,
}

impl FrameOutcome {
    pub fn has_face(&self) -> bool {
        self.face.is_some()
    }
}

/// Pipeline backed by ONNX Runtime sessions.
pub type OrtPipeline = FacePipeline<OrtModel, OrtModel, OrtModel>;

pub struct FacePipeline<D, L, E> {
    config: PipelineConfig,
    detector: FaceDetector<D>,
    landmarks: LandmarkDetector<L>,
    extractor: EmbeddingExtractor<E>,
    throttle: MatchThrottle,
}

impl OrtPipeline {
    /// Load all three models named by `config`.
    ///
    /// Any missing or unloadable model fails the whole pipeline.
    pub fn load(config: PipelineConfig) -> Result<Self, InferenceError> {
        let detector = OrtModel::load(&config.detector_model_path(), config.intra_threads)?;
        let landmarks = OrtModel::load(&config.landmark_model_path(), config.intra_threads)?;
        let embedder = OrtModel::load(&config.embedding_model_path(), config.intra_threads)?;
        Self::new(config, detector, landmarks, embedder)
    }
}

impl<D, L, E> FacePipeline<D, L, E>
where
    D: InferenceModel,
    L: InferenceModel,
    E: InferenceModel,
{
    /// Wire the three models together. The configuration is validated first.
    pub fn new(config: PipelineConfig, detector: D, landmarks: L, embedder: E) -> Result<Self, InferenceError> {
        config.validate()?;
        let detector = FaceDetector::new(
            detector,
            config.detector_input_size,
            config.detector_confidence,
            config.detector_nms,
        );
        let landmarks = LandmarkDetector::new(
            landmarks,
            config.landmark_input_size,
            config.strides.clone(),
            config.landmark_confidence,
            config.landmark_nms,
        )?;
        let extractor = EmbeddingExtractor::new(embedder, config.embedding_input_size)
            .with_model_version(config.embedding_model_version());
        let throttle = MatchThrottle::new(config.match_interval());

        Ok(Self {
            config,
            detector,
            landmarks,
            extractor,
            throttle,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn throttle(&self) -> &MatchThrottle {
        &self.throttle
    }

    /// Detector boxes refined into faces with landmarks, in frame coordinates.
    ///
    /// Each detector box is cropped and searched for landmarks; a crop whose
    /// landmark pass fails is skipped. Results from all crops go through a
    /// final NMS.
    pub async fn detect_faces(&mut self, frame: &RgbImage) -> Result<(Vec<FaceCandidate>, Vec<FaceCandidate>), InferenceError> {
        let detections = self.detector.detect(frame).await?;

        let mut faces = Vec::new();
        for detection in &detections {
            let Some(crop) = crop_region(frame, &detection.bbox, self.config.crop_margin) else {
                tracing::debug!(bbox = ?detection.bbox, "detection outside frame; skipping");
                continue;
            };

            match self.landmarks.detect(&crop.image).await {
                Ok(found) => {
                    let (ox, oy) = crop.origin();
                    faces.extend(found.into_iter().map(|f| f.translated(ox, oy)));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "landmark inference failed; skipping crop");
                }
            }
        }

        let faces = nms(faces, self.config.landmark_nms);
        tracing::debug!(boxes = detections.len(), faces = faces.len(), "faces detected");
        Ok((detections, faces))
    }

    /// Run every stage short of search on one frame.
    pub async fn process_frame(&mut self, frame: &RgbImage) -> Result<FrameOutcome, InferenceError> {
        let (detections, faces) = self.detect_faces(frame).await?;

        let Some(face) = into_best_face(faces) else {
            return Ok(FrameOutcome {
                detections,
                ..Default::default()
            });
        };

        let aligned = face.landmarks.as_ref().and_then(|lm| align_face(frame, lm));
        let embedding = self.extractor.extract(aligned.as_ref()).await;

        if let Some(embedding) = &embedding {
            if embedding.dimension() != self.config.embedding_dim {
                tracing::warn!(
                    expected = self.config.embedding_dim,
                    actual = embedding.dimension(),
                    "embedding model produced unexpected dimension"
                );
            }
        }

        Ok(FrameOutcome {
            detections,
            face: Some(face),
            aligned,
            embedding,
        })
    }

    /// Search `embedding` through the throttle.
    ///
    /// `None` if the call was throttled or the search failed.
    pub async fn search_embedding<S: SimilaritySearch>(
        &self,
        embedding: &Embedding,
        search: &S,
    ) -> Option<MatchResult> {
        let request = SearchRequest {
            gallery_id: self.config.gallery_id.clone(),
            embedding: embedding.values.clone(),
            k: self.config.search_k,
            threshold: self.config.similarity_threshold,
        };

        match self.throttle.call(|| search.search(&request)).await? {
            Ok(response) => {
                let result = MatchResult::from(response);
                tracing::debug!(person = ?result.person, similarity = ?result.similarity, "search completed");
                Some(result)
            }
            Err(e) => {
                tracing::warn!(error = %e, "similarity search failed");
                None
            }
        }
    }

    /// Process a frame and search its embedding, if any.
    pub async fn identify<S: SimilaritySearch>(&mut self, frame: &RgbImage, search: &S) -> Option<MatchResult> {
        let outcome = match self.process_frame(frame).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "frame processing failed");
                return None;
            }
        };
        let embedding = outcome.embedding?;
        self.search_embedding(&embedding, search).await
    }
}
