use crate::distance::Embedding;
use crate::preprocess::{PreprocessedFace, TargetSize};
use crate::runtime::OnnxRuntime;
use crate::threshold::ModelName;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Invalid embedding dimension, expected {expected} but got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// Produces an embedding for a preprocessed face
///
/// Inference takes `&self`: a constructed provider is treated as read-only
/// for as long as it is in use.
pub trait EmbeddingProvider {
    /// The recognition model whose vectors this provider emits
    fn model(&self) -> ModelName;

    fn represent(&self, face: &PreprocessedFace) -> Result<Embedding, EmbedError>;

    /// Input size faces must be preprocessed to
    fn input_size(&self) -> TargetSize {
        TargetSize::square(self.model().input_size())
    }
}

/// Recognition network exported to ONNX, NHWC float input in `[0, 1]`
pub struct OnnxEmbedder {
    model: ModelName,
    session: Mutex<Session>,
}

impl OnnxEmbedder {
    pub fn new<P: AsRef<Path>>(
        model: ModelName,
        model_path: P,
        runtime: &OnnxRuntime,
    ) -> Result<Self, EmbedError> {
        let session = runtime
            .create_session(model_path)
            .map_err(|e| EmbedError::ModelLoad(e.to_string()))?;

        Ok(Self {
            model,
            session: Mutex::new(session),
        })
    }
}

impl EmbeddingProvider for OnnxEmbedder {
    fn model(&self) -> ModelName {
        self.model
    }

    fn represent(&self, face: &PreprocessedFace) -> Result<Embedding, EmbedError> {
        let expected = self.input_size();
        let [_, height, width, _] = face.shape();
        if width != expected.width as usize || height != expected.height as usize {
            return Err(EmbedError::Inference(format!(
                "{} expects {}x{} input, got {}x{}",
                self.model, expected.width, expected.height, width, height
            )));
        }

        let input_value = Value::from_array(face.to_tensor())
            .map_err(|e| EmbedError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| EmbedError::Inference("embedding session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| EmbedError::Inference(e.to_string()))?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::Inference(format!("Failed to extract embedding: {}", e)))?;

        let dim = self.model.embedding_dim();
        if data.len() != dim {
            return Err(EmbedError::InvalidDimension {
                expected: dim,
                actual: data.len(),
            });
        }

        Ok(Embedding::from_vec(data.to_vec()))
    }
}
