use std::{collections::HashMap, path::Path, sync::Mutex};

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use log::debug;
use ndarray::{Array, IxDyn};
use ort::{session::Session, value::Value};

use super::model::{BoundingBox, ObjectDetector};

const DEFAULT_INPUT_SIZE: u32 = 640;
const LETTERBOX_FILL: Rgb<u8> = Rgb([114, 114, 114]);

/// YOLOv8 detector backed by an ONNX Runtime session.
pub struct OnnxDetector {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    input_size: u32,
    iou_threshold: f32,
}

impl OnnxDetector {
    pub fn load(path: &Path, iou_threshold: f32) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| anyhow!("Failed to create session builder: {}", e))?
            .commit_from_file(path)
            .map_err(|e| anyhow!("Failed to load model {}: {}", path.display(), e))?;

        let input = session
            .inputs
            .first()
            .context("model declares no inputs")?;
        let input_size = match &input.input_type {
            ort::value::ValueType::Tensor { shape, .. } => {
                let dims = shape.to_vec();
                match dims.get(3) {
                    Some(&side) if side > 0 => side as u32,
                    _ => DEFAULT_INPUT_SIZE,
                }
            }
            other => {
                debug!("Unexpected input type: {other:?}. Defaulting to {DEFAULT_INPUT_SIZE}");
                DEFAULT_INPUT_SIZE
            }
        };
        let input_name = input.name.clone();
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .context("model declares no outputs")?;

        debug!("model input {input_name} ({input_size}px), output {output_name}");

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            input_size,
            iou_threshold,
        })
    }
}

impl ObjectDetector for OnnxDetector {
    fn detect_boxes(&self, image: &DynamicImage, min_confidence: f32) -> Result<Vec<BoundingBox>> {
        let (width, height) = image.dimensions();
        let (tensor, letterbox) = preprocess(image, self.input_size)?;
        let input_value =
            Value::from_array(tensor).map_err(|e| anyhow!("Failed to create input value: {}", e))?;

        let output = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| anyhow!("detector session lock poisoned"))?;
            let outputs = session
                .run(ort::inputs![self.input_name.as_str() => &input_value])
                .map_err(|e| anyhow!("Failed to run inference: {}", e))?;
            let view = outputs[self.output_name.as_str()]
                .try_extract_array::<f32>()
                .map_err(|e| anyhow!("Failed to extract output array: {}", e))?;
            let owned = Array::from_shape_vec(view.shape(), view.iter().cloned().collect())?;
            owned
        };

        let candidates = decode_output(&output, min_confidence, &letterbox, width, height)?;
        Ok(nms(candidates, self.iou_threshold))
    }
}

/// Placement of the resized image inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    x_offset: f32,
    y_offset: f32,
}

fn preprocess(image: &DynamicImage, target: u32) -> Result<(Array<f32, IxDyn>, Letterbox)> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let scale = target as f32 / width.max(height) as f32;
    let new_width = ((width as f32 * scale) as u32).clamp(1, target);
    let new_height = ((height as f32 * scale) as u32).clamp(1, target);

    let resized = image::imageops::resize(&rgb, new_width, new_height, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(target, target, LETTERBOX_FILL);
    let x_offset = (target - new_width) / 2;
    let y_offset = (target - new_height) / 2;
    image::imageops::replace(&mut canvas, &resized, i64::from(x_offset), i64::from(y_offset));

    let side = target as usize;
    let mut data = Vec::with_capacity(3 * side * side);
    for c in 0..3 {
        for pixel in canvas.pixels() {
            data.push(f32::from(pixel[c]) / 255.0);
        }
    }
    let tensor = Array::from_shape_vec(IxDyn(&[1, 3, side, side]), data)?;

    Ok((
        tensor,
        Letterbox {
            scale,
            x_offset: x_offset as f32,
            y_offset: y_offset as f32,
        },
    ))
}

/// Decode a `[1, 4 + classes, anchors]` YOLOv8 head into boxes in the
/// original image's pixel space.
fn decode_output(
    output: &Array<f32, IxDyn>,
    min_confidence: f32,
    letterbox: &Letterbox,
    width: u32,
    height: u32,
) -> Result<Vec<BoundingBox>> {
    let shape = output.shape();
    if shape.len() != 3 || shape[1] < 5 {
        return Err(anyhow!("Unexpected output shape {:?}", shape));
    }
    let classes = shape[1] - 4;
    let anchors = shape[2];
    let (max_x, max_y) = (width as f32, height as f32);

    let mut boxes = Vec::new();
    for i in 0..anchors {
        let (class_id, confidence) = (0..classes)
            .map(|c| (c as u32, output[[0, 4 + c, i]]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if confidence < min_confidence {
            continue;
        }

        let cx = output[[0, 0, i]];
        let cy = output[[0, 1, i]];
        let w = output[[0, 2, i]];
        let h = output[[0, 3, i]];
        let unpad = |v: f32, offset: f32| (v - offset) / letterbox.scale;

        boxes.push(BoundingBox {
            x_min: unpad(cx - w / 2.0, letterbox.x_offset).clamp(0.0, max_x),
            y_min: unpad(cy - h / 2.0, letterbox.y_offset).clamp(0.0, max_y),
            x_max: unpad(cx + w / 2.0, letterbox.x_offset).clamp(0.0, max_x),
            y_max: unpad(cy + h / 2.0, letterbox.y_offset).clamp(0.0, max_y),
            confidence,
            class_id,
        });
    }
    Ok(boxes)
}

/// Class-wise non-maximum suppression; survivors ordered by descending confidence.
fn nms(boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    let mut by_class: HashMap<u32, Vec<BoundingBox>> = HashMap::new();
    for b in boxes {
        by_class.entry(b.class_id).or_default().push(b);
    }

    let mut kept = Vec::new();
    for (_, mut group) in by_class {
        group.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        let mut suppressed = vec![false; group.len()];
        for i in 0..group.len() {
            if suppressed[i] {
                continue;
            }
            kept.push(group[i]);
            for j in (i + 1)..group.len() {
                if !suppressed[j] && group[i].iou(&group[j]) > iou_threshold {
                    suppressed[j] = true;
                }
            }
        }
    }
    kept.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    kept
}
