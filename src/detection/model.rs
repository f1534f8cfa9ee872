use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use image::{DynamicImage, GenericImageView};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{
    annotate::draw_boxes,
    geometry::{round_to, unit_coordinates},
    onnx::OnnxDetector,
    DetectionPoint, DetectionStrategy, Located,
};
use crate::error::PipelineError;

/// Axis-aligned box in the pixel space of the image handed to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0) * (self.y_max - self.y_min).max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x_min.max(other.x_min);
        let y1 = self.y_min.max(other.y_min);
        let x2 = self.x_max.min(other.x_max);
        let y2 = self.y_max.min(other.y_max);
        let intersection = if x2 > x1 && y2 > y1 {
            (x2 - x1) * (y2 - y1)
        } else {
            0.0
        };
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// A pretrained object detector. Implementations must be safe to share
/// between concurrent detection calls.
pub trait ObjectDetector: Send + Sync {
    fn detect_boxes(
        &self,
        image: &DynamicImage,
        min_confidence: f32,
    ) -> anyhow::Result<Vec<BoundingBox>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            iou_threshold: 0.45,
        }
    }
}

enum DetectorSource {
    Artifact(PathBuf),
    Fixed,
}

/// Runs a YOLO-style detector and reports box centers.
///
/// The artifact is loaded on first use and kept for the life of the process.
/// A failed load is not cached, so dropping the file in place later recovers
/// without a restart.
pub struct ModelStrategy {
    config: ModelConfig,
    source: DetectorSource,
    detector: Mutex<Option<Arc<dyn ObjectDetector>>>,
}

impl ModelStrategy {
    pub fn from_artifact(path: impl Into<PathBuf>, config: ModelConfig) -> Self {
        Self {
            config,
            source: DetectorSource::Artifact(path.into()),
            detector: Mutex::new(None),
        }
    }

    pub fn with_detector(detector: Arc<dyn ObjectDetector>, config: ModelConfig) -> Self {
        Self {
            config,
            source: DetectorSource::Fixed,
            detector: Mutex::new(Some(detector)),
        }
    }

    fn detector(&self) -> Result<Arc<dyn ObjectDetector>, PipelineError> {
        let mut slot = self
            .detector
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(detector) = slot.as_ref() {
            return Ok(Arc::clone(detector));
        }

        let DetectorSource::Artifact(path) = &self.source else {
            return Err(PipelineError::ModelUnavailable(
                "no detector configured".to_string(),
            ));
        };
        if !path.exists() {
            warn!("model artifact missing at {}", path.display());
            return Err(PipelineError::ModelUnavailable(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let detector = OnnxDetector::load(path, self.config.iou_threshold).map_err(|err| {
            PipelineError::ModelUnavailable(format!(
                "failed to load model {}: {err:#}",
                path.display()
            ))
        })?;
        info!("loaded detection model from {}", path.display());

        let detector: Arc<dyn ObjectDetector> = Arc::new(detector);
        *slot = Some(Arc::clone(&detector));
        Ok(detector)
    }
}

impl DetectionStrategy for ModelStrategy {
    fn name(&self) -> &'static str {
        "model"
    }

    fn locate(&self, image: &DynamicImage) -> Result<Located, PipelineError> {
        let detector = self.detector()?;
        let threshold = self.config.confidence_threshold;

        let boxes: Vec<BoundingBox> = detector
            .detect_boxes(image, threshold)
            .map_err(|err| PipelineError::ModelUnavailable(format!("inference failed: {err:#}")))?
            .into_iter()
            .filter(|b| b.confidence >= threshold)
            .collect();

        let (width, height) = image.dimensions();
        let points = boxes
            .iter()
            .map(|b| {
                let cx = f64::from(b.x_min + b.x_max) / 2.0;
                let cy = f64::from(b.y_min + b.y_max) / 2.0;
                let (x, y) = unit_coordinates(cx, cy, width, height);
                DetectionPoint {
                    x: round_to(x, 4),
                    y: round_to(y, 4),
                    confidence: Some(round_to(f64::from(b.confidence), 2)),
                }
            })
            .collect();

        let mut annotated = image.to_rgb8();
        draw_boxes(&mut annotated, &boxes);

        Ok(Located {
            points,
            annotated: DynamicImage::ImageRgb8(annotated),
        })
    }
}
