use crate::attributes::Action;
use crate::distance::DistanceMetric;
use crate::threshold::{find_threshold, ModelName};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub verification: VerificationConfig,
    pub analysis: AnalysisConfig,
    pub detection: DetectionConfig,
    pub models: ModelPaths,
    pub runtime: RuntimeConfig,
}

/// Defaults for `verify` when the caller names no model or metric
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub model: ModelName,
    pub metric: DistanceMetric,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            model: ModelName::VggFace,
            metric: DistanceMetric::Cosine,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Actions run when the caller requests none
    pub actions: Vec<Action>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            actions: Action::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// SCRFD model; without one, inputs are treated as pre-cropped faces
    pub model_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    /// Fail with "face not detected" instead of falling back to the whole frame
    pub enforce: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_path: Some(PathBuf::from("models/scrfd_500m.onnx")),
            confidence_threshold: 0.5,
            enforce: true,
        }
    }
}

/// ONNX exports of every recognition and attribute model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    pub vgg_face: PathBuf,
    pub openface: PathBuf,
    pub facenet: PathBuf,
    pub deepface: PathBuf,
    pub emotion: PathBuf,
    pub age: PathBuf,
    pub gender: PathBuf,
    pub race: PathBuf,
}

impl ModelPaths {
    pub fn embedding(&self, model: ModelName) -> &Path {
        match model {
            ModelName::VggFace => &self.vgg_face,
            ModelName::OpenFace => &self.openface,
            ModelName::Facenet => &self.facenet,
            ModelName::DeepFace => &self.deepface,
        }
    }

    pub fn attribute(&self, action: Action) -> &Path {
        match action {
            Action::Emotion => &self.emotion,
            Action::Age => &self.age,
            Action::Gender => &self.gender,
            Action::Race => &self.race,
        }
    }
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            vgg_face: PathBuf::from("models/vgg_face.onnx"),
            openface: PathBuf::from("models/openface.onnx"),
            facenet: PathBuf::from("models/facenet.onnx"),
            deepface: PathBuf::from("models/deepface.onnx"),
            emotion: PathBuf::from("models/facial_expression.onnx"),
            age: PathBuf::from("models/age.onnx"),
            gender: PathBuf::from("models/gender.onnx"),
            race: PathBuf::from("models/race.onnx"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Intra-op threads per ONNX session; runtime default when unset
    pub intra_threads: Option<usize>,
}

impl Config {
    /// Load configuration with fallback chain:
    /// 1. /etc/facekit/facekit.toml (system-wide)
    /// 2. ~/.config/facekit/facekit.toml (user)
    /// 3. Compiled defaults
    pub fn load() -> Result<Self, ConfigError> {
        let mut candidates = vec![PathBuf::from("/etc/facekit/facekit.toml")];
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(
                PathBuf::from(home)
                    .join(".config")
                    .join("facekit")
                    .join("facekit.toml"),
            );
        }

        for path in &candidates {
            match Self::load_from_path(path) {
                Ok(config) => {
                    log::debug!("Using configuration from {}", path.display());
                    return Ok(config);
                }
                Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a specific file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if find_threshold(self.verification.model, self.verification.metric).is_err() {
            return Err(ConfigError::Validation(format!(
                "No verification threshold for {} with {} distance",
                self.verification.model, self.verification.metric
            )));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::Validation(
                "Detection confidence threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if let Some(path) = &self.detection.model_path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(
                    "Detection model path cannot be empty".to_string(),
                ));
            }
        }

        if self.runtime.intra_threads == Some(0) {
            return Err(ConfigError::Validation(
                "Intra-op thread count must be greater than 0".to_string(),
            ));
        }

        let embedding_paths = ModelName::ALL.into_iter().map(|m| (m.as_str(), self.models.embedding(m)));
        let attribute_paths = Action::ALL.into_iter().map(|a| (a.as_str(), self.models.attribute(a)));
        for (name, path) in embedding_paths.chain(attribute_paths) {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(format!("Model path for {} cannot be empty", name)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.verification.model, ModelName::VggFace);
        assert_eq!(config.verification.metric, DistanceMetric::Cosine);
        assert_eq!(config.analysis.actions, Action::ALL.to_vec());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [verification]
            model = "Facenet"
            metric = "euclidean_l2"

            [analysis]
            actions = ["age", "gender"]

            [detection]
            enforce = false
            "#,
        )
        .unwrap();

        assert_eq!(config.verification.model, ModelName::Facenet);
        assert_eq!(config.verification.metric, DistanceMetric::EuclideanL2);
        assert_eq!(config.analysis.actions, vec![Action::Age, Action::Gender]);
        assert!(!config.detection.enforce);
        assert_eq!(config.detection.confidence_threshold, 0.5);
        assert_eq!(config.models.embedding(ModelName::Facenet), Path::new("models/facenet.onnx"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_model_name_is_rejected() {
        let result: Result<Config, _> = toml::from_str("[verification]\nmodel = \"Dlib\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.detection.confidence_threshold = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = Config::default();
        config.runtime.intra_threads = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.models.race = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load_from_path("/nonexistent/facekit.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
