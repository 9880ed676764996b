use crate::analyze::AttributeModels;
use crate::attributes::{
    age_years, gender_label, normalize_scores, Action, GenderConvention, EMOTION_CATEGORIES,
};
use crate::detect::FaceLocator;
use crate::preprocess::to_face_tensor;
use crate::Error;
use image::{imageops, RgbImage};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEmotion {
    pub category: &'static str,
    /// Fraction of 1.0
    pub score: f64,
}

/// Attributes of one located face in a frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceReport {
    pub bbox_x: u32,
    pub bbox_y: u32,
    pub bbox_w: u32,
    pub bbox_h: u32,
    /// Highest score first
    pub emotion: Vec<RankedEmotion>,
    pub age: u32,
    pub gender: &'static str,
}

/// Locate every face in the frame and report emotion, age and gender for each
pub fn analyze_faces(
    image: &RgbImage,
    locator: &dyn FaceLocator,
    models: &AttributeModels,
) -> Result<Vec<FaceReport>, Error> {
    let emotion_model = models.get(Action::Emotion)?;
    let age_model = models.get(Action::Age)?;
    let gender_model = models.get(Action::Gender)?;

    let (width, height) = image.dimensions();
    let regions = locator.locate(image)?;
    log::debug!("Located {} faces in {}x{} frame", regions.len(), width, height);

    let mut reports = Vec::with_capacity(regions.len());
    for region in regions {
        let Some((x, y, w, h)) = region.pixel_rect(width, height) else {
            continue;
        };
        let face = imageops::crop_imm(image, x, y, w, h).to_image();

        let (emotion_size, emotion_gray) = Action::Emotion.input_spec();
        let gray_face = to_face_tensor(&face, emotion_size, emotion_gray)?;
        let emotion_scores = emotion_model.predict(&gray_face)?;
        let emotion = normalize_scores(Action::Emotion, &emotion_scores, &EMOTION_CATEGORIES, 1.0)?
            .ranked()
            .into_iter()
            .map(|(category, score)| RankedEmotion { category, score })
            .collect();

        // Age and gender share one crop
        let (size, gray) = Action::Age.input_spec();
        let color_face = to_face_tensor(&face, size, gray)?;
        let age = age_years(&age_model.predict(&color_face)?)?;
        let gender = gender_label(&gender_model.predict(&color_face)?, GenderConvention::Letter)?;

        reports.push(FaceReport {
            bbox_x: x,
            bbox_y: y,
            bbox_w: w,
            bbox_h: h,
            emotion,
            age,
            gender,
        });
    }

    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributePredictor, PredictError, Scores, AGE_BINS};
    use crate::detect::{DetectionError, FaceRegion};
    use crate::preprocess::PreprocessedFace;
    use image::Rgb;
    use ndarray::arr1;

    struct Fixed(Scores);

    impl AttributePredictor for Fixed {
        fn predict(&self, _face: &PreprocessedFace) -> Result<Scores, PredictError> {
            Ok(self.0.clone())
        }
    }

    struct Regions(Vec<FaceRegion>);

    impl FaceLocator for Regions {
        fn locate(&self, _image: &RgbImage) -> Result<Vec<FaceRegion>, DetectionError> {
            Ok(self.0.clone())
        }
    }

    fn models() -> AttributeModels {
        let mut age = Scores::zeros(AGE_BINS);
        age[33] = 0.4;
        age[34] = 0.6;

        let mut models = AttributeModels::new();
        models.insert(Action::Emotion, Box::new(Fixed(arr1(&[2.0, 0.0, 1.0, 5.0, 0.0, 0.0, 2.0]))));
        models.insert(Action::Age, Box::new(Fixed(age)));
        models.insert(Action::Gender, Box::new(Fixed(arr1(&[0.2, 0.8]))));
        models
    }

    fn region(x: f32, y: f32, size: f32) -> FaceRegion {
        FaceRegion {
            x,
            y,
            width: size,
            height: size,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_reports_per_face() {
        let frame = RgbImage::from_pixel(100, 80, Rgb([120, 110, 100]));
        let locator = Regions(vec![region(10.0, 10.0, 30.0), region(80.0, 20.0, 30.0)]);

        let reports = analyze_faces(&frame, &locator, &models()).unwrap();
        assert_eq!(reports.len(), 2);

        let first = &reports[0];
        assert_eq!((first.bbox_x, first.bbox_y, first.bbox_w, first.bbox_h), (10, 10, 30, 30));
        assert_eq!(first.age, 33);
        assert_eq!(first.gender, "M");

        let categories: Vec<_> = first.emotion.iter().map(|e| e.category).collect();
        assert_eq!(
            categories,
            vec!["Happy", "Angry", "Neutral", "Fear", "Disgust", "Sad", "Surprise"]
        );
        assert!((first.emotion[0].score - 0.5).abs() < 1e-9);
        let total: f64 = first.emotion.iter().map(|e| e.score).sum();
        assert!((total - 1.0).abs() < 1e-9);

        // Second box runs past the right edge and is clipped
        assert_eq!(reports[1].bbox_w, 20);
    }

    #[test]
    fn test_no_faces() {
        let frame = RgbImage::new(32, 32);
        let reports = analyze_faces(&frame, &Regions(Vec::new()), &models()).unwrap();
        assert!(reports.is_empty());
    }

    #[test]
    fn test_requires_all_three_models() {
        let mut partial = AttributeModels::new();
        partial.insert(Action::Emotion, Box::new(Fixed(Scores::ones(7))));
        let frame = RgbImage::new(32, 32);
        let result = analyze_faces(&frame, &Regions(Vec::new()), &partial);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_report_wire_format() {
        let frame = RgbImage::from_pixel(50, 50, Rgb([1, 2, 3]));
        let reports = analyze_faces(&frame, &Regions(vec![region(5.0, 5.0, 20.0)]), &models()).unwrap();
        let json = serde_json::to_value(&reports[0]).unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["bbox_x", "bbox_y", "bbox_w", "bbox_h", "emotion", "age", "gender"]);
        assert_eq!(json["emotion"][0]["category"], "Happy");
    }
}
