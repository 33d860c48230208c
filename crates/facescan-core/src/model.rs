//! Inference-engine seam.
//!
//! Every network in the pipeline is reached through [`InferenceModel`]: one
//! float32 NCHW input in, an ordered list of named float32 tensors out. The
//! pipeline owns no knowledge of the model graph beyond that contract.
//! [`OrtModel`] is the ONNX Runtime implementation.

use crate::config::ConfigError;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("model file not found: {0}; download it and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("model returned no output at index {0}")]
    MissingOutput(usize),
    #[error("model exposes {actual} outputs, expected at least {expected}")]
    UnexpectedOutputs { expected: usize, actual: usize },
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A dense float32 tensor copied out of the inference engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Output tensors of one forward pass, in the model's declared order.
#[derive(Debug, Clone, Default)]
pub struct ModelOutputs {
    tensors: Vec<(String, Tensor)>,
}

impl ModelOutputs {
    pub fn new(tensors: Vec<(String, Tensor)>) -> Self {
        Self { tensors }
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Tensor> {
        self.tensors.get(index).map(|(_, t)| t)
    }

    pub fn by_name(&self, name: &str) -> Option<&Tensor> {
        self.tensors.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.iter().map(|(n, _)| n.as_str())
    }
}

/// A loaded network the pipeline can run forward passes on.
///
/// `run` is an asynchronous suspension point; implementations may block
/// (ONNX Runtime does) or hand off to an accelerator.
#[allow(async_fn_in_trait)]
pub trait InferenceModel {
    /// Output tensor names in declared order.
    fn output_names(&self) -> &[String];

    async fn run(&mut self, input: Array4<f32>) -> Result<ModelOutputs, InferenceError>;
}

/// ONNX Runtime session wrapper.
pub struct OrtModel {
    session: Session,
    input_name: String,
    output_names: Vec<String>,
}

impl OrtModel {
    /// Load an ONNX model from the given path.
    ///
    /// Load failures are fatal for the caller: nothing should run against a
    /// half-initialized engine.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, InferenceError> {
        if !model_path.exists() {
            return Err(InferenceError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .ok_or_else(|| InferenceError::InferenceFailed("model declares no inputs".into()))?;
        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            input = %input_name,
            outputs = ?output_names,
            "loaded ONNX model"
        );

        Ok(Self {
            session,
            input_name,
            output_names,
        })
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }
}

impl InferenceModel for OrtModel {
    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    async fn run(&mut self, input: Array4<f32>) -> Result<ModelOutputs, InferenceError> {
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut tensors = Vec::with_capacity(self.output_names.len());
        for (idx, name) in self.output_names.iter().enumerate() {
            let (shape, data) = outputs[idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| InferenceError::InferenceFailed(format!("output {name}: {e}")))?;
            let shape = shape.iter().map(|&d| d.max(0) as usize).collect();
            tensors.push((name.clone(), Tensor::new(shape, data.to_vec())));
        }

        Ok(ModelOutputs::new(tensors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_model() {
        let err = OrtModel::load(Path::new("/nonexistent/model.onnx"), 1)
            .err()
            .expect("missing model must fail");
        assert!(matches!(err, InferenceError::ModelNotFound(_)));
    }

    #[test]
    fn test_outputs_lookup() {
        let outputs = ModelOutputs::new(vec![
            ("score_8".into(), Tensor::new(vec![1, 2], vec![0.1, 0.2])),
            ("bbox_8".into(), Tensor::new(vec![1, 4], vec![1.0; 4])),
        ]);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs.get(1).unwrap().len(), 4);
        assert_eq!(outputs.by_name("score_8").unwrap().data, vec![0.1, 0.2]);
        assert!(outputs.by_name("kps_8").is_none());
        assert!(outputs.get(2).is_none());
        assert_eq!(outputs.names().collect::<Vec<_>>(), vec!["score_8", "bbox_8"]);
    }
}
