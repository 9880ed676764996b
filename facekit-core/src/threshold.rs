use crate::distance::DistanceMetric;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("Invalid model name: {0}")]
    Model(String),
    #[error("Invalid distance metric: {0}")]
    Metric(String),
    #[error("Invalid action: {0}")]
    Action(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum ThresholdError {
    #[error("No verification threshold for model {model} with {metric} distance")]
    Unknown {
        model: ModelName,
        metric: DistanceMetric,
    },
}

/// Face recognition backends that produce embeddings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelName {
    #[serde(rename = "VGG-Face")]
    VggFace,
    #[serde(rename = "OpenFace")]
    OpenFace,
    #[serde(rename = "Facenet")]
    Facenet,
    #[serde(rename = "DeepFace")]
    DeepFace,
}

impl ModelName {
    pub const ALL: [ModelName; 4] = [
        ModelName::VggFace,
        ModelName::OpenFace,
        ModelName::Facenet,
        ModelName::DeepFace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelName::VggFace => "VGG-Face",
            ModelName::OpenFace => "OpenFace",
            ModelName::Facenet => "Facenet",
            ModelName::DeepFace => "DeepFace",
        }
    }

    /// Square input size (pixels) the network expects
    pub fn input_size(&self) -> u32 {
        match self {
            ModelName::VggFace => 224,
            ModelName::OpenFace => 96,
            ModelName::Facenet => 160,
            ModelName::DeepFace => 152,
        }
    }

    /// Length of the embedding vector the network emits
    pub fn embedding_dim(&self) -> usize {
        match self {
            ModelName::VggFace => 2622,
            ModelName::OpenFace => 128,
            ModelName::Facenet => 128,
            ModelName::DeepFace => 4096,
        }
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|model| model.as_str() == s)
            .ok_or_else(|| ParseError::Model(s.to_string()))
    }
}

/// Cutoffs tuned per model and metric. A pair verifies when its distance is at
/// or below the entry.
const THRESHOLDS: &[(ModelName, DistanceMetric, f64)] = &[
    (ModelName::VggFace, DistanceMetric::Cosine, 0.40),
    (ModelName::VggFace, DistanceMetric::Euclidean, 0.55),
    (ModelName::VggFace, DistanceMetric::EuclideanL2, 0.75),
    (ModelName::OpenFace, DistanceMetric::Cosine, 0.10),
    (ModelName::OpenFace, DistanceMetric::Euclidean, 0.55),
    (ModelName::OpenFace, DistanceMetric::EuclideanL2, 0.55),
    (ModelName::Facenet, DistanceMetric::Cosine, 0.40),
    (ModelName::Facenet, DistanceMetric::Euclidean, 10.0),
    (ModelName::Facenet, DistanceMetric::EuclideanL2, 0.80),
    (ModelName::DeepFace, DistanceMetric::Cosine, 0.23),
    (ModelName::DeepFace, DistanceMetric::Euclidean, 64.0),
    (ModelName::DeepFace, DistanceMetric::EuclideanL2, 0.64),
];

/// Look up the verification threshold for a model/metric pair
pub fn find_threshold(model: ModelName, metric: DistanceMetric) -> Result<f64, ThresholdError> {
    THRESHOLDS
        .iter()
        .find(|(m, d, _)| *m == model && *d == metric)
        .map(|&(_, _, threshold)| threshold)
        .ok_or(ThresholdError::Unknown { model, metric })
}
