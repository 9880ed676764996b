use crate::attributes::{
    age_years, emotion_distribution, gender_label, race_distribution, resolve_actions, Action,
    AttributePredictor, Distribution, GenderConvention,
};
use crate::preprocess::{FacePreprocessor, PreprocessedFace, TargetSize};
use crate::report::{Batch, Output};
use crate::source::ImageSource;
use crate::Error;
use image::RgbImage;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Images to analyze
#[derive(Debug, Clone)]
pub enum ImageInput {
    Single(ImageSource),
    Bulk(Vec<ImageSource>),
}

/// Constructed attribute predictors, reused read-only across calls
#[derive(Default)]
pub struct AttributeModels {
    predictors: HashMap<Action, Box<dyn AttributePredictor>>,
}

impl AttributeModels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, action: Action, predictor: Box<dyn AttributePredictor>) {
        self.predictors.insert(action, predictor);
    }

    pub fn contains(&self, action: Action) -> bool {
        self.predictors.contains_key(&action)
    }

    pub fn get(&self, action: Action) -> Result<&dyn AttributePredictor, Error> {
        self.predictors
            .get(&action)
            .map(|predictor| predictor.as_ref())
            .ok_or_else(|| Error::InvalidArgument(format!("no {} predictor available", action)))
    }
}

/// Attribute results for one image, holding only the requested actions
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FaceAnalysis {
    actions: Vec<Action>,
    pub emotion: Option<Distribution>,
    pub age: Option<u32>,
    pub gender: Option<&'static str>,
    pub race: Option<Distribution>,
}

impl FaceAnalysis {
    /// Actions in the order they were run
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }
}

impl Serialize for FaceAnalysis {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for action in &self.actions {
            match action {
                Action::Emotion => {
                    if let Some(emotion) = &self.emotion {
                        map.serialize_entry("emotion", emotion)?;
                        map.serialize_entry("dominant_emotion", emotion.dominant())?;
                    }
                }
                Action::Age => {
                    if let Some(age) = self.age {
                        map.serialize_entry("age", &age)?;
                    }
                }
                Action::Gender => {
                    if let Some(gender) = self.gender {
                        map.serialize_entry("gender", gender)?;
                    }
                }
                Action::Race => {
                    if let Some(race) = &self.race {
                        map.serialize_entry("race", race)?;
                        map.serialize_entry("dominant_race", race.dominant())?;
                    }
                }
            }
        }
        map.end()
    }
}

/// Preprocessed faces of one image, keyed by input size and color mode
struct FaceCache<'a> {
    image: RgbImage,
    preprocessor: &'a dyn FacePreprocessor,
    faces: HashMap<(TargetSize, bool), PreprocessedFace>,
}

impl<'a> FaceCache<'a> {
    fn new(image: RgbImage, preprocessor: &'a dyn FacePreprocessor) -> Self {
        Self {
            image,
            preprocessor,
            faces: HashMap::new(),
        }
    }

    fn face_for(&mut self, action: Action) -> Result<&PreprocessedFace, Error> {
        let (target, grayscale) = action.input_spec();
        match self.faces.entry((target, grayscale)) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let face = self.preprocessor.detect_face(&self.image, target, grayscale)?;
                Ok(entry.insert(face))
            }
        }
    }
}

/// Runs a fixed list of attribute actions over images
pub struct Analyzer<'a> {
    actions: Vec<Action>,
    models: &'a AttributeModels,
    preprocessor: &'a dyn FacePreprocessor,
}

impl<'a> Analyzer<'a> {
    pub fn new(
        actions: &[Action],
        models: &'a AttributeModels,
        preprocessor: &'a dyn FacePreprocessor,
    ) -> Result<Self, Error> {
        let actions = resolve_actions(actions);
        for &action in &actions {
            models.get(action)?;
        }

        Ok(Self {
            actions,
            models,
            preprocessor,
        })
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Analyze one image, running each action in order
    pub fn analyze_image(&self, source: &ImageSource) -> Result<FaceAnalysis, Error> {
        let mut cache = FaceCache::new(source.load()?, self.preprocessor);
        let mut analysis = FaceAnalysis {
            actions: self.actions.clone(),
            ..FaceAnalysis::default()
        };

        for &action in &self.actions {
            let face = cache.face_for(action)?;
            let scores = self.models.get(action)?.predict(face)?;

            match action {
                Action::Emotion => analysis.emotion = Some(emotion_distribution(&scores)?),
                Action::Age => analysis.age = Some(age_years(&scores)?),
                Action::Gender => analysis.gender = Some(gender_label(&scores, GenderConvention::Word)?),
                Action::Race => analysis.race = Some(race_distribution(&scores)?),
            }
            log::debug!("{}: {} done", source.describe(), action);
        }

        Ok(analysis)
    }

    /// Single input propagates its failure; bulk input records failures per image
    pub fn run(&self, input: &ImageInput) -> Result<Output<FaceAnalysis>, Error> {
        match input {
            ImageInput::Single(source) => Ok(Output::Single(self.analyze_image(source)?)),
            ImageInput::Bulk(sources) => {
                log::info!("Analyzing {} images for {:?}", sources.len(), self.actions);
                let batch = Batch::collect("instance", sources, |source| self.analyze_image(source))?;
                Ok(Output::Bulk(batch))
            }
        }
    }
}

/// Analyze one image or a batch of images; no actions means all four
pub fn analyze(
    input: &ImageInput,
    actions: &[Action],
    models: &AttributeModels,
    preprocessor: &dyn FacePreprocessor,
) -> Result<Output<FaceAnalysis>, Error> {
    Analyzer::new(actions, models, preprocessor)?.run(input)
}
