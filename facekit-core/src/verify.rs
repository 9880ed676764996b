use crate::distance::{find_distance, DistanceMetric, Embedding};
use crate::embed::EmbeddingProvider;
use crate::preprocess::FacePreprocessor;
use crate::report::{Batch, Output};
use crate::source::ImageSource;
use crate::threshold::{find_threshold, ModelName};
use crate::Error;
use serde::Serialize;

/// Image pairs to verify
#[derive(Debug, Clone)]
pub enum PairInput {
    Single(ImageSource, ImageSource),
    /// Each entry must hold exactly two images
    Bulk(Vec<Vec<ImageSource>>),
}

/// Verdict for one image pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub verified: bool,
    pub distance: f64,
    #[serde(rename = "max_threshold_to_verify")]
    pub threshold: f64,
    pub model: ModelName,
    #[serde(rename = "similarity_metric")]
    pub metric: DistanceMetric,
}

impl VerificationResult {
    pub fn new(distance: f64, threshold: f64, model: ModelName, metric: DistanceMetric) -> Self {
        Self {
            verified: distance <= threshold,
            distance,
            threshold,
            model,
            metric,
        }
    }
}

/// Verifies image pairs with one model, metric and threshold
pub struct Verifier<'a> {
    model: ModelName,
    metric: DistanceMetric,
    threshold: f64,
    embedder: &'a dyn EmbeddingProvider,
    preprocessor: &'a dyn FacePreprocessor,
}

impl<'a> Verifier<'a> {
    pub fn new(
        model: ModelName,
        metric: DistanceMetric,
        embedder: &'a dyn EmbeddingProvider,
        preprocessor: &'a dyn FacePreprocessor,
    ) -> Result<Self, Error> {
        let threshold = find_threshold(model, metric)?;

        if embedder.model() != model {
            return Err(Error::InvalidArgument(format!(
                "embedding provider serves {}, but {} was requested",
                embedder.model(),
                model
            )));
        }

        Ok(Self {
            model,
            metric,
            threshold,
            embedder,
            preprocessor,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn represent(&self, source: &ImageSource) -> Result<Embedding, Error> {
        let image = source.load()?;
        let face = self
            .preprocessor
            .detect_face(&image, self.embedder.input_size(), false)?;
        Ok(self.embedder.represent(&face)?)
    }

    /// Verify a single pair of images
    pub fn verify_pair(&self, first: &ImageSource, second: &ImageSource) -> Result<VerificationResult, Error> {
        let first_embedding = self.represent(first)?;
        let second_embedding = self.represent(second)?;

        let distance = find_distance(&first_embedding, &second_embedding, self.metric)?;
        let result = VerificationResult::new(distance, self.threshold, self.model, self.metric);

        log::debug!(
            "{} vs {}: {} distance {:.4} (threshold {}) -> verified={}",
            first.describe(),
            second.describe(),
            self.metric,
            distance,
            self.threshold,
            result.verified
        );
        Ok(result)
    }

    fn verify_entry(&self, entry: &[ImageSource]) -> Result<VerificationResult, Error> {
        match entry {
            [first, second] => self.verify_pair(first, second),
            _ => Err(Error::InvalidArgument(format!(
                "a pair needs exactly two images, got {}",
                entry.len()
            ))),
        }
    }

    /// Single input propagates its failure; bulk input records failures per pair
    pub fn run(&self, input: &PairInput) -> Result<Output<VerificationResult>, Error> {
        match input {
            PairInput::Single(first, second) => Ok(Output::Single(self.verify_pair(first, second)?)),
            PairInput::Bulk(pairs) => {
                log::info!(
                    "Verifying {} pairs with {} and {} distance",
                    pairs.len(),
                    self.model,
                    self.metric
                );
                let batch = Batch::collect("pair", pairs, |entry| self.verify_entry(entry))?;
                Ok(Output::Bulk(batch))
            }
        }
    }
}

/// Verify one pair or a batch of pairs
pub fn verify(
    input: &PairInput,
    model: ModelName,
    metric: DistanceMetric,
    embedder: &dyn EmbeddingProvider,
    preprocessor: &dyn FacePreprocessor,
) -> Result<Output<VerificationResult>, Error> {
    Verifier::new(model, metric, embedder, preprocessor)?.run(input)
}
