pub mod annotate;
pub mod contour;
pub mod geometry;
pub mod model;
pub mod onnx;

use std::{sync::Arc, time::Duration};

use image::DynamicImage;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub use contour::{ContourConfig, ContourStrategy};
pub use geometry::{normalize_and_sort, DetectionPoint, SortAxis};
pub use model::{BoundingBox, ModelConfig, ModelStrategy, ObjectDetector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Contour,
    Model,
}

/// Raw strategy output, before normalization and encoding.
#[derive(Debug)]
pub struct Located {
    pub points: Vec<DetectionPoint>,
    pub annotated: DynamicImage,
}

pub trait DetectionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn locate(&self, image: &DynamicImage) -> Result<Located, PipelineError>;
}

#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// PNG-encoded annotated copy of the input.
    pub annotated_image: Vec<u8>,
    pub points: Vec<DetectionPoint>,
}

pub struct DetectionEngine {
    contour: ContourStrategy,
    model: ModelStrategy,
    axis: SortAxis,
    timeout: Duration,
}

impl DetectionEngine {
    pub fn new(
        contour: ContourStrategy,
        model: ModelStrategy,
        axis: SortAxis,
        timeout: Duration,
    ) -> Self {
        Self {
            contour,
            model,
            axis,
            timeout,
        }
    }

    fn strategy(&self, strategy: Strategy) -> &dyn DetectionStrategy {
        match strategy {
            Strategy::Contour => &self.contour,
            Strategy::Model => &self.model,
        }
    }

    pub fn detect(&self, image: &[u8], strategy: Strategy) -> Result<DetectionResult, PipelineError> {
        let decoded = image::load_from_memory(image)
            .map_err(|err| PipelineError::Decode(format!("failed to decode image: {err}")))?;

        let strategy = self.strategy(strategy);
        let located = strategy.locate(&decoded)?;
        let points = normalize_and_sort(located.points, self.axis);
        debug!("{} strategy produced {} points", strategy.name(), points.len());

        let annotated_image = annotate::encode_png(&located.annotated)
            .map_err(|err| PipelineError::Internal(format!("{err:#}")))?;

        Ok(DetectionResult {
            annotated_image,
            points,
        })
    }

    /// Run [`detect`](Self::detect) on the blocking pool, bounded by the
    /// configured timeout.
    pub async fn detect_blocking(
        self: &Arc<Self>,
        image: Vec<u8>,
        strategy: Strategy,
    ) -> Result<DetectionResult, PipelineError> {
        let engine = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || engine.detect(&image, strategy));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(PipelineError::Internal(format!(
                "detection worker failed: {join_err}"
            ))),
            Err(_) => Err(PipelineError::Timeout {
                operation: "detection",
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}
