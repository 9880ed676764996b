pub mod analyze;
pub mod attributes;
pub mod config;
pub mod detect;
pub mod distance;
pub mod embed;
pub mod preprocess;
pub mod realtime;
pub mod report;
pub mod runtime;
pub mod source;
pub mod threshold;
pub mod verify;

pub use analyze::{AttributeModels, FaceAnalysis, ImageInput};
pub use distance::{DistanceMetric, Embedding};
pub use realtime::FaceReport;
pub use report::{Batch, ItemError, Output};
pub use source::ImageSource;
pub use threshold::ModelName;
pub use verify::{PairInput, VerificationResult};

use attributes::{Action, AttributePredictor, OnnxClassifier};
use detect::{FaceDetector, FaceLocator};
use embed::{EmbeddingProvider, OnnxEmbedder};
use preprocess::{FaceCropper, FacePreprocessor};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] threshold::ThresholdError),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid image: {0}")]
    InvalidImage(#[from] source::ImageError),
    #[error("{0}")]
    Preprocess(#[from] preprocess::PreprocessError),
    #[error("Detection error: {0}")]
    Detection(#[from] detect::DetectionError),
    #[error("Distance error: {0}")]
    Distance(#[from] distance::DistanceError),
    #[error("Embedding error: {0}")]
    Embedding(#[from] embed::EmbedError),
    #[error("Prediction error: {0}")]
    Prediction(#[from] attributes::PredictError),
}

impl From<threshold::ParseError> for Error {
    fn from(e: threshold::ParseError) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

impl Error {
    /// Upstream contract violations that must not be folded into a batch entry
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            Error::Distance(distance::DistanceError::DimensionMismatch { .. })
                | Error::Embedding(embed::EmbedError::InvalidDimension { .. })
        )
    }

    pub fn is_face_not_detected(&self) -> bool {
        matches!(self, Error::Preprocess(preprocess::PreprocessError::FaceNotDetected))
    }
}

/// Owns every constructed model for the lifetime of the handle
///
/// Models are built from the configuration on first use and then reused
/// read-only by every later call. Providers can also be injected up front,
/// in which case nothing is loaded for them.
pub struct FaceKit {
    config: config::Config,
    runtime: runtime::OnnxRuntime,
    locator: Option<Arc<dyn FaceLocator>>,
    preprocessor: Option<Box<dyn FacePreprocessor>>,
    embedders: HashMap<ModelName, Box<dyn EmbeddingProvider>>,
    attributes: AttributeModels,
}

impl FaceKit {
    /// Create a new handle with the given configuration; no model is loaded yet
    pub fn new(config: config::Config) -> Result<Self, Error> {
        config.validate()?;
        let runtime = runtime::OnnxRuntime::new(&config.runtime);

        Ok(Self {
            config,
            runtime,
            locator: None,
            preprocessor: None,
            embedders: HashMap::new(),
            attributes: AttributeModels::new(),
        })
    }

    pub fn config(&self) -> &config::Config {
        &self.config
    }

    pub fn with_locator(mut self, locator: Arc<dyn FaceLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: Box<dyn FacePreprocessor>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    /// Register an embedding provider under the model it serves
    pub fn with_embedder(mut self, embedder: Box<dyn EmbeddingProvider>) -> Self {
        self.embedders.insert(embedder.model(), embedder);
        self
    }

    pub fn with_predictor(mut self, action: Action, predictor: Box<dyn AttributePredictor>) -> Self {
        self.attributes.insert(action, predictor);
        self
    }

    fn ensure_locator(&mut self) -> Result<Option<Arc<dyn FaceLocator>>, Error> {
        if self.locator.is_none() {
            if let Some(path) = &self.config.detection.model_path {
                log::info!("Loading face detection model...");
                let detector = FaceDetector::new(
                    path,
                    &self.runtime,
                    self.config.detection.confidence_threshold,
                )?;
                self.locator = Some(Arc::new(detector));
            }
        }
        Ok(self.locator.clone())
    }

    fn ensure_preprocessor(&mut self) -> Result<(), Error> {
        if self.preprocessor.is_none() {
            let locator = self.ensure_locator()?;
            let cropper = FaceCropper::new(locator, self.config.detection.enforce);
            self.preprocessor = Some(Box::new(cropper));
        }
        Ok(())
    }

    fn ensure_embedder(&mut self, model: ModelName) -> Result<(), Error> {
        if !self.embedders.contains_key(&model) {
            log::info!("Loading {} embedding model...", model);
            let embedder = OnnxEmbedder::new(model, self.config.models.embedding(model), &self.runtime)?;
            self.embedders.insert(model, Box::new(embedder));
        }
        Ok(())
    }

    fn ensure_predictors(&mut self, actions: &[Action]) -> Result<(), Error> {
        for &action in actions {
            if !self.attributes.contains(action) {
                log::info!("Loading {} model...", action);
                let classifier =
                    OnnxClassifier::new(action, self.config.models.attribute(action), &self.runtime)?;
                self.attributes.insert(action, Box::new(classifier));
            }
        }
        Ok(())
    }

    fn preprocessor(&self) -> Result<&dyn FacePreprocessor, Error> {
        self.preprocessor
            .as_deref()
            .ok_or_else(|| Error::InvalidArgument("no face preprocessor available".to_string()))
    }

    /// Verify one pair or a batch of pairs by model and metric name
    pub fn verify(
        &mut self,
        input: &PairInput,
        model_name: &str,
        metric_name: &str,
    ) -> Result<Output<VerificationResult>, Error> {
        let model: ModelName = model_name.parse()?;
        let metric: DistanceMetric = metric_name.parse()?;
        self.verify_with(input, model, metric)
    }

    /// Verify with the configured default model and metric
    pub fn verify_default(&mut self, input: &PairInput) -> Result<Output<VerificationResult>, Error> {
        let model = self.config.verification.model;
        let metric = self.config.verification.metric;
        self.verify_with(input, model, metric)
    }

    pub fn verify_with(
        &mut self,
        input: &PairInput,
        model: ModelName,
        metric: DistanceMetric,
    ) -> Result<Output<VerificationResult>, Error> {
        // Fail on a missing threshold before loading anything
        threshold::find_threshold(model, metric)?;

        self.ensure_preprocessor()?;
        self.ensure_embedder(model)?;

        let embedder = self
            .embedders
            .get(&model)
            .ok_or_else(|| Error::InvalidArgument(format!("no {} embedding provider", model)))?;
        verify::verify(input, model, metric, embedder.as_ref(), self.preprocessor()?)
    }

    /// Analyze one image or a batch of images; no action names means the
    /// configured default actions
    pub fn analyze(&mut self, input: &ImageInput, action_names: &[&str]) -> Result<Output<FaceAnalysis>, Error> {
        let requested = action_names
            .iter()
            .map(|name| name.parse::<Action>())
            .collect::<Result<Vec<_>, _>>()?;
        let actions = if requested.is_empty() {
            attributes::resolve_actions(&self.config.analysis.actions)
        } else {
            attributes::resolve_actions(&requested)
        };
        log::debug!("Actions to do: {:?}", actions);

        self.ensure_preprocessor()?;
        self.ensure_predictors(&actions)?;

        analyze::analyze(input, &actions, &self.attributes, self.preprocessor()?)
    }

    /// Detect and crop the face in an image, sized for the configured
    /// verification model
    pub fn detect_face(&mut self, source: &ImageSource) -> Result<image::RgbImage, Error> {
        self.ensure_preprocessor()?;

        let image = source.load()?;
        let target = preprocess::TargetSize::square(self.config.verification.model.input_size());
        let face = self.preprocessor()?.detect_face(&image, target, false)?;
        log::debug!("{}: face extracted at {}x{}", source.describe(), target.width, target.height);
        Ok(face.to_rgb_image())
    }

    /// Report emotion, age and gender for every face found in each image
    pub fn analyze_faces(&mut self, sources: &[ImageSource]) -> Result<Vec<Vec<FaceReport>>, Error> {
        let locator = self.ensure_locator()?.ok_or_else(|| {
            Error::Config(config::ConfigError::Validation(
                "face analysis needs a detection model".to_string(),
            ))
        })?;
        self.ensure_predictors(&[Action::Emotion, Action::Age, Action::Gender])?;

        sources
            .iter()
            .map(|source| {
                let image = source.load()?;
                realtime::analyze_faces(&image, locator.as_ref(), &self.attributes)
            })
            .collect()
    }
}
