use crate::runtime::OnnxRuntime;
use image::{imageops, RgbImage};
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
}

const INPUT_SIZE: u32 = 640;

/// SCRFD feature pyramid strides, two anchors per location
const FEATURE_STRIDES: [usize; 3] = [8, 16, 32];
const NUM_ANCHORS: usize = 2;

const NMS_IOU_THRESHOLD: f32 = 0.4;

/// Axis-aligned face box in source image pixels
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceRegion {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn iou(&self, other: &FaceRegion) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Integer pixel rectangle `(x, y, w, h)` clipped to an image of the given
    /// size, or `None` when nothing of the box lies inside it
    pub fn pixel_rect(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x.max(0.0).floor() as u32;
        let y1 = self.y.max(0.0).floor() as u32;
        let x2 = ((self.x + self.width).ceil().max(0.0) as u32).min(image_width);
        let y2 = ((self.y + self.height).ceil().max(0.0) as u32).min(image_height);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// Finds face boxes in a frame, best candidate first
pub trait FaceLocator {
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectionError>;
}

/// SCRFD face detector running through ONNX Runtime
pub struct FaceDetector {
    session: Mutex<Session>,
    confidence_threshold: f32,
}

impl FaceDetector {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        runtime: &OnnxRuntime,
        confidence_threshold: f32,
    ) -> Result<Self, DetectionError> {
        let session = runtime
            .create_session(model_path)
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            confidence_threshold,
        })
    }

    fn run(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectionError> {
        let (input_tensor, scale_x, scale_y) = preprocess(image);

        let input_value = Value::from_array(input_tensor)
            .map_err(|e| DetectionError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectionError::Inference("detector session lock poisoned".to_string()))?;

        // SCRFD exports name their input "input.1"
        let outputs = session
            .run(ort::inputs!["input.1" => input_value])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        // Outputs are grouped as all scores, then all boxes, then all keypoints
        if outputs.len() < FEATURE_STRIDES.len() * 2 {
            return Err(DetectionError::Inference(format!(
                "Expected at least {} outputs, got {}",
                FEATURE_STRIDES.len() * 2,
                outputs.len()
            )));
        }

        let mut detections = Vec::new();

        for (stride_idx, &stride) in FEATURE_STRIDES.iter().enumerate() {
            let feat_size = INPUT_SIZE as usize / stride;
            let anchors = generate_anchors(stride, feat_size);

            let (_, scores) = outputs[stride_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::Inference(format!("Failed to extract scores for stride {}: {}", stride, e)))?;
            let (_, boxes) = outputs[stride_idx + FEATURE_STRIDES.len()]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectionError::Inference(format!("Failed to extract boxes for stride {}: {}", stride, e)))?;

            for (anchor_idx, &anchor) in anchors.iter().enumerate() {
                for anchor_num in 0..NUM_ANCHORS {
                    let idx = anchor_idx * NUM_ANCHORS + anchor_num;
                    let Some(&score) = scores.get(idx) else {
                        continue;
                    };
                    if score < self.confidence_threshold {
                        continue;
                    }

                    let Some(pred) = boxes.get(idx * 4..idx * 4 + 4) else {
                        continue;
                    };
                    let (x, y, w, h) = decode_bbox(anchor, pred, stride as f32);

                    detections.push(FaceRegion {
                        x: x / scale_x,
                        y: y / scale_y,
                        width: w / scale_x,
                        height: h / scale_y,
                        confidence: score,
                    });
                }
            }
        }

        log::debug!("Found {} detections before NMS", detections.len());

        let mut detections = nms(detections, NMS_IOU_THRESHOLD);

        // Prefer larger, more confident faces
        detections.sort_by(|a, b| {
            let score_a = a.confidence * a.area().sqrt();
            let score_b = b.confidence * b.area().sqrt();
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(detections)
    }
}

impl FaceLocator for FaceDetector {
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectionError> {
        self.run(image)
    }
}

/// Anchor centers for one stride level
fn generate_anchors(stride: usize, feat_size: usize) -> Vec<(f32, f32)> {
    (0..feat_size)
        .flat_map(|i| {
            (0..feat_size).map(move |j| {
                (
                    (j as f32 + 0.5) * stride as f32,
                    (i as f32 + 0.5) * stride as f32,
                )
            })
        })
        .collect()
}

/// Box predictions are (left, top, right, bottom) distances in stride units
fn decode_bbox(anchor: (f32, f32), pred: &[f32], stride: f32) -> (f32, f32, f32, f32) {
    let (cx, cy) = anchor;
    let x1 = cx - pred[0] * stride;
    let y1 = cy - pred[1] * stride;
    let x2 = cx + pred[2] * stride;
    let y2 = cy + pred[3] * stride;
    (x1, y1, x2 - x1, y2 - y1)
}

/// Resize to 640x640 NCHW with (p - 127.5) / 128 normalization
fn preprocess(image: &RgbImage) -> (([usize; 4], Vec<f32>), f32, f32) {
    let (orig_width, orig_height) = image.dimensions();
    let resized = imageops::resize(image, INPUT_SIZE, INPUT_SIZE, imageops::FilterType::Triangle);

    let scale_x = INPUT_SIZE as f32 / orig_width as f32;
    let scale_y = INPUT_SIZE as f32 / orig_height as f32;

    let size = INPUT_SIZE as usize;
    let mut input_data = Vec::with_capacity(size * size * 3);
    for c in 0..3 {
        for y in 0..INPUT_SIZE {
            for x in 0..INPUT_SIZE {
                let pixel = resized.get_pixel(x, y);
                input_data.push((pixel[c] as f32 - 127.5) / 128.0);
            }
        }
    }

    (([1, 3, size, size], input_data), scale_x, scale_y)
}

/// Non-Maximum Suppression
fn nms(mut detections: Vec<FaceRegion>, iou_threshold: f32) -> Vec<FaceRegion> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceRegion> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| kept.iou(&candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> FaceRegion {
        FaceRegion {
            x,
            y,
            width,
            height,
            confidence,
        }
    }

    #[test]
    fn test_region_iou() {
        let a = region(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = region(5.0, 5.0, 10.0, 10.0, 0.8);
        // 25 / 175
        assert!((a.iou(&b) - 0.1428).abs() < 0.01);
        assert_eq!(a.area(), 100.0);
    }

    #[test]
    fn test_pixel_rect_clipping() {
        let r = region(-4.2, 10.5, 20.0, 100.0, 0.9);
        assert_eq!(r.pixel_rect(64, 64), Some((0, 10, 16, 54)));

        let outside = region(70.0, 70.0, 5.0, 5.0, 0.9);
        assert_eq!(outside.pixel_rect(64, 64), None);
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let detections = vec![
            region(0.0, 0.0, 10.0, 10.0, 0.7),
            region(1.0, 1.0, 10.0, 10.0, 0.9),
            region(50.0, 50.0, 10.0, 10.0, 0.6),
        ];
        let kept = nms(detections, NMS_IOU_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.6);
    }

    #[test]
    fn test_anchor_grid() {
        let anchors = generate_anchors(32, 2);
        assert_eq!(anchors, vec![(16.0, 16.0), (48.0, 16.0), (16.0, 48.0), (48.0, 48.0)]);
    }

    #[test]
    fn test_decode_bbox() {
        let (x, y, w, h) = decode_bbox((16.0, 16.0), &[1.0, 1.0, 2.0, 2.0], 8.0);
        assert_eq!((x, y, w, h), (8.0, 8.0, 24.0, 24.0));
    }

    #[test]
    #[ignore] // Requires model file
    fn test_face_detection() {
        let runtime = OnnxRuntime::default();
        let detector = FaceDetector::new("models/scrfd_500m.onnx", &runtime, 0.5).unwrap();
        let blank = RgbImage::new(320, 240);
        assert!(detector.locate(&blank).unwrap().is_empty());
    }
}
