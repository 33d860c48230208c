use facescan_core::{
    DetectionTracker, Embedding, FacePipeline, Gallery, InferenceError, InferenceModel, MatchResult, MatchStatus,
    SearchError, SimilaritySearch,
};
use facescan_source::{Frame, FrameError, FrameSource, StillImageSource};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("frame source error: {0}")]
    Source(#[from] FrameError),
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),
    #[error("search error: {0}")]
    Search(#[from] SearchError),
    #[error("no face detected in any frame")]
    NoFaceDetected,
}

/// Result of an enrollment operation.
pub struct EnrollResult {
    pub embedding: Embedding,
    pub quality_score: f32,
    /// Index of the frame the embedding came from.
    pub frame: usize,
}

/// Result of a verification operation.
pub struct VerifyResult {
    pub result: MatchResult,
    pub best_quality: f32,
}

/// Decode each image file into a frame, in order.
pub fn load_frames(paths: &[PathBuf]) -> Result<Vec<Frame>, EngineError> {
    let mut frames = Vec::with_capacity(paths.len());
    for path in paths {
        let mut source = StillImageSource::open(path, Some(1))?;
        if let Some(frame) = source.next_frame()? {
            frames.push(frame);
        }
    }
    Ok(frames)
}

/// Pick the most confident face across `frames` and return its embedding.
pub async fn enroll_from_frames<D, L, E>(
    pipeline: &mut FacePipeline<D, L, E>,
    frames: &[Frame],
) -> Result<EnrollResult, EngineError>
where
    D: InferenceModel,
    L: InferenceModel,
    E: InferenceModel,
{
    let mut best: Option<EnrollResult> = None;

    for (i, frame) in frames.iter().enumerate() {
        let outcome = pipeline.process_frame(&frame.image).await?;
        let (Some(face), Some(embedding)) = (outcome.face, outcome.embedding) else {
            tracing::debug!(frame = i, "enroll: no usable face");
            continue;
        };
        if best.as_ref().map_or(true, |b| face.confidence > b.quality_score) {
            best = Some(EnrollResult {
                embedding,
                quality_score: face.confidence,
                frame: i,
            });
        }
    }

    let best = best.ok_or(EngineError::NoFaceDetected)?;
    tracing::info!(confidence = best.quality_score, frame = best.frame, "enroll: best face selected");
    Ok(best)
}

/// Compare every frame's face against `gallery` and keep the closest result.
///
/// `k` and the match threshold come from the pipeline configuration.
pub async fn verify_frames<D, L, E>(
    pipeline: &mut FacePipeline<D, L, E>,
    frames: &[Frame],
    gallery: &Gallery,
) -> Result<VerifyResult, EngineError>
where
    D: InferenceModel,
    L: InferenceModel,
    E: InferenceModel,
{
    let k = pipeline.config().search_k;
    let threshold = pipeline.config().similarity_threshold;
    let mut best: Option<VerifyResult> = None;

    for frame in frames {
        let outcome = pipeline.process_frame(&frame.image).await?;
        let (Some(face), Some(embedding)) = (outcome.face, outcome.embedding) else {
            continue;
        };

        let result = MatchResult::from(gallery.search_embedding(&embedding.values, k, threshold)?);
        let is_better = match &best {
            None => true,
            Some(prev) => result.similarity.unwrap_or(f32::MIN) > prev.result.similarity.unwrap_or(f32::MIN),
        };
        if is_better {
            best = Some(VerifyResult {
                result,
                best_quality: face.confidence,
            });
        }
    }

    best.ok_or(EngineError::NoFaceDetected)
}

#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Time between frame pulls.
    pub frame_interval: Duration,
    /// Skip frames whose pixels are almost all near-black.
    pub skip_dark: bool,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(100),
            skip_dark: true,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: usize,
    pub dark_skipped: usize,
    pub faces: usize,
    pub searches: usize,
    pub matches: usize,
    pub confirmed: usize,
}

/// A person recognized often enough within the tracker window.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub person: String,
    /// Similarity of the search that completed the confirmation.
    pub similarity: Option<f32>,
}

/// Pull frames from `source` until it runs dry or `stop` turns true.
///
/// Each tick runs one frame through the whole pipeline before the next
/// frame is pulled. Every completed search feeds a [`DetectionTracker`] (a
/// match as its person, `no_match` as nobody), as does every frame without
/// a face; searches dropped by the throttle are not counted. `on_confirmed`
/// is called only when the tracker confirms a person. A stop observed while
/// a frame is in flight discards that frame's result. Dropping the stop
/// sender also stops the loop. The source is released before this returns.
pub async fn run_frame_loop<S, D, L, E, Q, F>(
    mut source: S,
    pipeline: &mut FacePipeline<D, L, E>,
    search: &Q,
    mut stop: watch::Receiver<bool>,
    options: &LoopOptions,
    mut on_confirmed: F,
) -> LoopStats
where
    S: FrameSource,
    D: InferenceModel,
    L: InferenceModel,
    E: InferenceModel,
    Q: SimilaritySearch,
    F: FnMut(&Frame, &Confirmation),
{
    let mut ticker = tokio::time::interval(options.frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats = LoopStats::default();
    let config = pipeline.config();
    let mut tracker = DetectionTracker::new(config.tracker_window, config.tracker_confirm);

    tracing::info!(source = source.name(), interval_ms = options.frame_interval.as_millis() as u64, "frame loop started");

    loop {
        if *stop.borrow_and_update() {
            tracing::info!("stop requested");
            break;
        }

        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() {
                    tracing::info!("stop handle dropped");
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!("frame source exhausted");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to read frame; skipping");
                continue;
            }
        };
        stats.frames += 1;

        if options.skip_dark && frame.is_dark {
            stats.dark_skipped += 1;
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
            continue;
        }

        let outcome = match pipeline.process_frame(&frame.image).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "frame processing failed");
                continue;
            }
        };
        if outcome.has_face() {
            stats.faces += 1;
        }

        let result = match &outcome.embedding {
            Some(embedding) => pipeline.search_embedding(embedding, search).await,
            None => None,
        };

        if *stop.borrow() {
            tracing::debug!(seq = frame.sequence, "stop requested mid-frame; result discarded");
            break;
        }

        let verdict = match (&result, outcome.has_face()) {
            (Some(result), _) => {
                stats.searches += 1;
                if result.status == MatchStatus::Success {
                    stats.matches += 1;
                }
                tracing::debug!(seq = frame.sequence, person = ?result.person, similarity = ?result.similarity, "frame matched");
                Some(result.person.as_deref())
            }
            (None, false) => Some(None),
            // Face present but no search ran (throttled or no embedding).
            (None, true) => None,
        };

        if let Some(person) = verdict {
            if let Some(person) = tracker.observe(person) {
                stats.confirmed += 1;
                let confirmation = Confirmation {
                    person,
                    similarity: result.as_ref().and_then(|r| r.similarity),
                };
                tracing::info!(seq = frame.sequence, person = %confirmation.person, "identity confirmed");
                on_confirmed(&frame, &confirmation);
            }
        }
    }

    drop(source);
    tracing::info!(
        frames = stats.frames,
        dark_skipped = stats.dark_skipped,
        faces = stats.faces,
        searches = stats.searches,
        matches = stats.matches,
        confirmed = stats.confirmed,
        "frame loop stopped"
    );
    stats
}
