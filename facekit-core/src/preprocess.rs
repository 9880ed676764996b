use crate::detect::{DetectionError, FaceLocator};
use image::{imageops, Rgb, RgbImage};
use ndarray::Array4;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Face could not be detected. Please confirm that the picture is a face photo")]
    FaceNotDetected,
    #[error("Face detection failed: {0}")]
    Detection(#[from] DetectionError),
    #[error("Invalid target size {0}x{1}")]
    InvalidTargetSize(u32, u32),
}

/// Width and height a model expects its face input at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub const fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }
}

/// Model-ready face crop: NHWC tensor `(1, height, width, channels)` in `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedFace {
    pub pixels: Array4<f32>,
}

impl PreprocessedFace {
    pub fn shape(&self) -> [usize; 4] {
        let s = self.pixels.shape();
        [s[0], s[1], s[2], s[3]]
    }

    pub fn channels(&self) -> usize {
        self.pixels.shape()[3]
    }

    /// Shape and flat data, the form ONNX Runtime takes tensors in
    pub fn to_tensor(&self) -> ([usize; 4], Vec<f32>) {
        (self.shape(), self.pixels.iter().copied().collect())
    }

    /// Back to 8-bit RGB; a grayscale face repeats its channel
    pub fn to_rgb_image(&self) -> RgbImage {
        let [_, height, width, channels] = self.shape();
        let level = |y: u32, x: u32, c: usize| {
            let value = self.pixels[[0, y as usize, x as usize, c.min(channels - 1)]];
            (value * 255.0).round().clamp(0.0, 255.0) as u8
        };
        RgbImage::from_fn(width as u32, height as u32, |x, y| {
            Rgb([level(y, x, 0), level(y, x, 1), level(y, x, 2)])
        })
    }
}

/// Turns a decoded image into a model-ready face crop
pub trait FacePreprocessor {
    fn detect_face(
        &self,
        image: &RgbImage,
        target: TargetSize,
        grayscale: bool,
    ) -> Result<PreprocessedFace, PreprocessError>;
}

/// Crops the best located face, or the whole frame when no locator is set
pub struct FaceCropper {
    locator: Option<Arc<dyn FaceLocator>>,
    enforce_detection: bool,
}

impl FaceCropper {
    pub fn new(locator: Option<Arc<dyn FaceLocator>>, enforce_detection: bool) -> Self {
        Self {
            locator,
            enforce_detection,
        }
    }

    /// Cropper for inputs that are already tight face crops
    pub fn whole_frame() -> Self {
        Self::new(None, false)
    }

    fn crop(&self, image: &RgbImage) -> Result<RgbImage, PreprocessError> {
        let Some(locator) = &self.locator else {
            return Ok(image.clone());
        };

        let (width, height) = image.dimensions();
        let best = locator
            .locate(image)?
            .into_iter()
            .find_map(|region| region.pixel_rect(width, height));

        match best {
            Some((x, y, w, h)) => Ok(imageops::crop_imm(image, x, y, w, h).to_image()),
            None if self.enforce_detection => Err(PreprocessError::FaceNotDetected),
            None => {
                log::debug!("No face located, using the whole {}x{} frame", width, height);
                Ok(image.clone())
            }
        }
    }
}

impl FacePreprocessor for FaceCropper {
    fn detect_face(
        &self,
        image: &RgbImage,
        target: TargetSize,
        grayscale: bool,
    ) -> Result<PreprocessedFace, PreprocessError> {
        let face = self.crop(image)?;
        to_face_tensor(&face, target, grayscale)
    }
}

/// Resize a face crop and lay it out as a normalized NHWC tensor
pub fn to_face_tensor(
    face: &RgbImage,
    target: TargetSize,
    grayscale: bool,
) -> Result<PreprocessedFace, PreprocessError> {
    if target.width == 0 || target.height == 0 || face.width() == 0 || face.height() == 0 {
        return Err(PreprocessError::InvalidTargetSize(target.width, target.height));
    }

    let resized = imageops::resize(face, target.width, target.height, imageops::FilterType::Triangle);
    let (w, h) = (target.width as usize, target.height as usize);

    let pixels = if grayscale {
        let gray = imageops::grayscale(&resized);
        Array4::from_shape_fn((1, h, w, 1), |(_, y, x, _)| {
            gray.get_pixel(x as u32, y as u32)[0] as f32 / 255.0
        })
    } else {
        Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        })
    };

    Ok(PreprocessedFace { pixels })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FaceRegion;

    struct FixedLocator(Vec<FaceRegion>);

    impl FaceLocator for FixedLocator {
        fn locate(&self, _image: &RgbImage) -> Result<Vec<FaceRegion>, DetectionError> {
            Ok(self.0.clone())
        }
    }

    fn two_tone() -> RgbImage {
        // Left half white, right half black
        RgbImage::from_fn(40, 20, |x, _| if x < 20 { Rgb([255, 255, 255]) } else { Rgb([0, 0, 0]) })
    }

    #[test]
    fn test_rgb_tensor_layout() {
        let face = RgbImage::from_pixel(10, 10, Rgb([255, 0, 51]));
        let tensor = to_face_tensor(&face, TargetSize::square(4), false).unwrap();
        assert_eq!(tensor.shape(), [1, 4, 4, 3]);
        assert!((tensor.pixels[[0, 2, 1, 0]] - 1.0).abs() < 1e-6);
        assert!(tensor.pixels[[0, 2, 1, 1]].abs() < 1e-6);
        assert!((tensor.pixels[[0, 2, 1, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_grayscale_tensor_layout() {
        let face = RgbImage::from_pixel(96, 96, Rgb([128, 128, 128]));
        let tensor = to_face_tensor(&face, TargetSize::square(48), true).unwrap();
        assert_eq!(tensor.shape(), [1, 48, 48, 1]);
        assert_eq!(tensor.channels(), 1);
        assert!(tensor.pixels.iter().all(|&p| (p - 128.0 / 255.0).abs() < 1e-6));
    }

    #[test]
    fn test_crop_uses_best_region() {
        let locator = FixedLocator(vec![FaceRegion {
            x: 20.0,
            y: 0.0,
            width: 20.0,
            height: 20.0,
            confidence: 0.9,
        }]);
        let cropper = FaceCropper::new(Some(Arc::new(locator)), true);
        let face = cropper
            .detect_face(&two_tone(), TargetSize::square(8), true)
            .unwrap();
        assert!(face.pixels.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_enforced_detection_fails_without_face() {
        let cropper = FaceCropper::new(Some(Arc::new(FixedLocator(Vec::new()))), true);
        let result = cropper.detect_face(&two_tone(), TargetSize::square(8), false);
        assert!(matches!(result, Err(PreprocessError::FaceNotDetected)));
    }

    #[test]
    fn test_relaxed_detection_falls_back_to_frame() {
        let cropper = FaceCropper::new(Some(Arc::new(FixedLocator(Vec::new()))), false);
        let face = cropper
            .detect_face(&two_tone(), TargetSize::square(8), false)
            .unwrap();
        assert_eq!(face.shape(), [1, 8, 8, 3]);
        assert!((face.pixels[[0, 4, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_face_back_to_rgb() {
        let face = RgbImage::from_pixel(12, 12, Rgb([200, 40, 90]));
        let color = to_face_tensor(&face, TargetSize::square(6), false).unwrap().to_rgb_image();
        assert_eq!(color.dimensions(), (6, 6));
        assert_eq!(*color.get_pixel(3, 3), Rgb([200, 40, 90]));

        let gray = to_face_tensor(&face, TargetSize::square(5), true).unwrap().to_rgb_image();
        let pixel = gray.get_pixel(0, 0);
        assert_eq!(pixel[0], pixel[1]);
        assert_eq!(pixel[1], pixel[2]);
    }

    #[test]
    fn test_zero_target_size() {
        let result = FaceCropper::whole_frame().detect_face(&two_tone(), TargetSize::square(0), false);
        assert!(matches!(result, Err(PreprocessError::InvalidTargetSize(0, 0))));
    }
}
