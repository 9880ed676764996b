use crate::preprocess::{PreprocessedFace, TargetSize};
use crate::runtime::OnnxRuntime;
use crate::threshold::ParseError;
use ndarray::Array1;
use ort::session::Session;
use ort::value::Value;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PredictError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("{action} predictor returned {actual} scores, expected {expected}")]
    ScoreLength {
        action: Action,
        expected: usize,
        actual: usize,
    },
    #[error("{action} scores cannot be normalized: {reason}")]
    DegenerateScores { action: Action, reason: String },
}

pub const EMOTION_LABELS: [&str; 7] = ["angry", "disgust", "fear", "happy", "sad", "surprise", "neutral"];
pub const RACE_LABELS: [&str; 6] = ["asian", "indian", "black", "white", "middle eastern", "latino hispanic"];

/// Emotion labels as reported by realtime face analysis
pub const EMOTION_CATEGORIES: [&str; 7] = ["Angry", "Disgust", "Fear", "Happy", "Sad", "Surprise", "Neutral"];

/// Number of age bins (0..=100 years) the age model scores
pub const AGE_BINS: usize = 101;

/// Facial attribute an analysis can be asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Emotion,
    Age,
    Gender,
    Race,
}

impl Action {
    /// Default action order when the caller requests none
    pub const ALL: [Action; 4] = [Action::Emotion, Action::Age, Action::Gender, Action::Race];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Emotion => "emotion",
            Action::Age => "age",
            Action::Gender => "gender",
            Action::Race => "race",
        }
    }

    /// Face size and color mode the action's model consumes
    pub fn input_spec(&self) -> (TargetSize, bool) {
        match self {
            Action::Emotion => (TargetSize::square(48), true),
            Action::Age | Action::Gender | Action::Race => (TargetSize::square(224), false),
        }
    }

    /// Length of the raw score vector the action's model emits
    pub fn output_len(&self) -> usize {
        match self {
            Action::Emotion => EMOTION_LABELS.len(),
            Action::Age => AGE_BINS,
            Action::Gender => 2,
            Action::Race => RACE_LABELS.len(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ParseError::Action(s.to_string()))
    }
}

/// Resolve the requested actions: empty means all four, repeats keep their
/// first position
pub fn resolve_actions(requested: &[Action]) -> Vec<Action> {
    if requested.is_empty() {
        return Action::ALL.to_vec();
    }
    let mut actions = Vec::with_capacity(requested.len());
    for &action in requested {
        if !actions.contains(&action) {
            actions.push(action);
        }
    }
    actions
}

/// Which label set gender is reported with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenderConvention {
    /// `Woman` / `Man`, used by batch analysis
    Word,
    /// `F` / `M`, used by realtime face analysis
    Letter,
}

/// Raw per-class scores from an attribute model
pub type Scores = Array1<f32>;

/// Runs one attribute model on a preprocessed face
pub trait AttributePredictor {
    fn predict(&self, face: &PreprocessedFace) -> Result<Scores, PredictError>;
}

/// Labeled confidence scores normalized to a fixed total
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    labels: &'static [&'static str],
    scores: Vec<f64>,
    dominant: usize,
}

impl Distribution {
    pub fn labels(&self) -> &'static [&'static str] {
        self.labels
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.labels
            .iter()
            .position(|&l| l == label)
            .map(|idx| self.scores[idx])
    }

    pub fn dominant(&self) -> &'static str {
        self.labels[self.dominant]
    }

    pub fn total(&self) -> f64 {
        self.scores.iter().sum()
    }

    /// Labels paired with scores, highest score first; ties keep label order
    pub fn ranked(&self) -> Vec<(&'static str, f64)> {
        let mut ranked: Vec<_> = self.labels.iter().copied().zip(self.scores.iter().copied()).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }
}

impl Serialize for Distribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.labels.len()))?;
        for (label, score) in self.labels.iter().zip(&self.scores) {
            map.serialize_entry(label, score)?;
        }
        map.end()
    }
}

fn check_len(action: Action, scores: &Scores) -> Result<(), PredictError> {
    if scores.len() != action.output_len() {
        return Err(PredictError::ScoreLength {
            action,
            expected: action.output_len(),
            actual: scores.len(),
        });
    }
    Ok(())
}

/// Index of the first maximum score
pub fn argmax(scores: &Scores) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (idx, &score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((idx, score)),
        })
        .map(|(idx, _)| idx)
}

/// Divide raw scores by their sum and scale to `total`
pub fn normalize_scores(
    action: Action,
    scores: &Scores,
    labels: &'static [&'static str],
    total: f64,
) -> Result<Distribution, PredictError> {
    check_len(action, scores)?;

    if let Some(bad) = scores.iter().find(|s| !s.is_finite() || **s < 0.0) {
        return Err(PredictError::DegenerateScores {
            action,
            reason: format!("score {} is negative or not finite", bad),
        });
    }

    let sum: f64 = scores.iter().map(|&s| s as f64).sum();
    if sum <= 0.0 {
        return Err(PredictError::DegenerateScores {
            action,
            reason: "scores sum to zero".to_string(),
        });
    }

    let dominant = argmax(scores).unwrap_or(0);
    Ok(Distribution {
        labels,
        scores: scores.iter().map(|&s| total * s as f64 / sum).collect(),
        dominant,
    })
}

/// Emotion percentages over [`EMOTION_LABELS`]
pub fn emotion_distribution(scores: &Scores) -> Result<Distribution, PredictError> {
    normalize_scores(Action::Emotion, scores, &EMOTION_LABELS, 100.0)
}

/// Race percentages over [`RACE_LABELS`]
pub fn race_distribution(scores: &Scores) -> Result<Distribution, PredictError> {
    normalize_scores(Action::Race, scores, &RACE_LABELS, 100.0)
}

/// Apparent age as the expected value over the age bins
pub fn apparent_age(scores: &Scores) -> Result<f64, PredictError> {
    check_len(Action::Age, scores)?;
    Ok(scores
        .iter()
        .enumerate()
        .map(|(age, &p)| age as f64 * p as f64)
        .sum())
}

/// Apparent age floored to whole years
pub fn age_years(scores: &Scores) -> Result<u32, PredictError> {
    let age = apparent_age(scores)?;
    if !age.is_finite() || age < 0.0 {
        return Err(PredictError::DegenerateScores {
            action: Action::Age,
            reason: format!("apparent age {} is out of range", age),
        });
    }
    Ok(age.floor() as u32)
}

pub fn gender_label(scores: &Scores, convention: GenderConvention) -> Result<&'static str, PredictError> {
    check_len(Action::Gender, scores)?;
    let woman = argmax(scores) == Some(0);
    Ok(match (convention, woman) {
        (GenderConvention::Word, true) => "Woman",
        (GenderConvention::Word, false) => "Man",
        (GenderConvention::Letter, true) => "F",
        (GenderConvention::Letter, false) => "M",
    })
}

/// Attribute classifier exported to ONNX
pub struct OnnxClassifier {
    action: Action,
    session: Mutex<Session>,
}

impl OnnxClassifier {
    pub fn new<P: AsRef<Path>>(
        action: Action,
        model_path: P,
        runtime: &OnnxRuntime,
    ) -> Result<Self, PredictError> {
        let session = runtime
            .create_session(model_path)
            .map_err(|e| PredictError::ModelLoad(e.to_string()))?;

        Ok(Self {
            action,
            session: Mutex::new(session),
        })
    }
}

impl AttributePredictor for OnnxClassifier {
    fn predict(&self, face: &PreprocessedFace) -> Result<Scores, PredictError> {
        let input_value = Value::from_array(face.to_tensor())
            .map_err(|e| PredictError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| PredictError::Inference(format!("{} session lock poisoned", self.action)))?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| PredictError::Inference(e.to_string()))?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PredictError::Inference(format!("Failed to extract scores: {}", e)))?;

        let scores = Scores::from_vec(data.to_vec());
        check_len(self.action, &scores)?;
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_emotion_distribution() {
        let scores = arr1(&[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 94.0]);
        let dist = emotion_distribution(&scores).unwrap();
        assert_eq!(dist.dominant(), "neutral");
        assert!((dist.get("neutral").unwrap() - 94.0).abs() < 1e-6);
        assert!((dist.total() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_distributions_sum_to_hundred() {
        let cases = [
            arr1(&[0.03, 0.2, 0.11, 0.4, 0.07, 0.09, 0.1]),
            arr1(&[3.0, 9.0, 0.0, 7.5, 1e-4, 22.0, 0.5]),
        ];
        for scores in &cases {
            let dist = emotion_distribution(scores).unwrap();
            assert!((dist.total() - 100.0).abs() < 1e-6);
            assert!(dist.scores().iter().all(|&s| s >= 0.0));
            assert_eq!(dist.dominant(), EMOTION_LABELS[argmax(scores).unwrap()]);
        }

        let race = race_distribution(&arr1(&[0.1, 0.1, 0.5, 0.2, 0.05, 0.05])).unwrap();
        assert_eq!(race.dominant(), "black");
        assert!((race.total() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_argmax_takes_first_maximum() {
        assert_eq!(argmax(&arr1(&[0.2, 0.5, 0.5])), Some(1));
        assert_eq!(argmax(&Scores::zeros(0)), None);
    }

    #[test]
    fn test_degenerate_scores() {
        let zeros = Scores::zeros(7);
        assert!(matches!(
            emotion_distribution(&zeros),
            Err(PredictError::DegenerateScores { action: Action::Emotion, .. })
        ));

        let negative = arr1(&[0.5, -0.1, 0.1, 0.1, 0.1, 0.1, 0.2]);
        assert!(emotion_distribution(&negative).is_err());

        assert_eq!(
            race_distribution(&arr1(&[1.0, 2.0])),
            Err(PredictError::ScoreLength {
                action: Action::Race,
                expected: 6,
                actual: 2
            })
        );
    }

    #[test]
    fn test_gender_conventions() {
        let man = arr1(&[0.2, 0.8]);
        assert_eq!(gender_label(&man, GenderConvention::Word).unwrap(), "Man");
        assert_eq!(gender_label(&man, GenderConvention::Letter).unwrap(), "M");

        let woman = arr1(&[0.9, 0.1]);
        assert_eq!(gender_label(&woman, GenderConvention::Word).unwrap(), "Woman");
        assert_eq!(gender_label(&woman, GenderConvention::Letter).unwrap(), "F");

        assert!(gender_label(&arr1(&[1.0]), GenderConvention::Word).is_err());
    }

    #[test]
    fn test_apparent_age() {
        let mut scores = Scores::zeros(AGE_BINS);
        scores[30] = 0.5;
        scores[31] = 0.5;
        assert!((apparent_age(&scores).unwrap() - 30.5).abs() < 1e-6);
        assert_eq!(age_years(&scores).unwrap(), 30);

        assert!(age_years(&Scores::zeros(10)).is_err());
    }

    #[test]
    fn test_ranked_is_descending_and_stable() {
        let dist = emotion_distribution(&arr1(&[1.0, 3.0, 1.0, 3.0, 0.0, 0.0, 2.0])).unwrap();
        let ranked: Vec<_> = dist.ranked().into_iter().map(|(label, _)| label).collect();
        assert_eq!(ranked, vec!["disgust", "happy", "neutral", "angry", "fear", "sad", "surprise"]);
    }

    #[test]
    fn test_resolve_actions() {
        assert_eq!(resolve_actions(&[]), Action::ALL.to_vec());
        assert_eq!(
            resolve_actions(&[Action::Age, Action::Emotion, Action::Age]),
            vec![Action::Age, Action::Emotion]
        );
        assert_eq!("race".parse::<Action>().unwrap(), Action::Race);
        assert!("beauty".parse::<Action>().is_err());
    }

    #[test]
    fn test_distribution_serializes_in_label_order() {
        let dist = race_distribution(&arr1(&[1.0, 1.0, 1.0, 1.0, 1.0, 5.0])).unwrap();
        let json = serde_json::to_string(&dist).unwrap();
        assert!(json.starts_with("{\"asian\":"));
        assert!(json.contains("\"latino hispanic\":50.0"));
    }
}
