use serde::{Deserialize, Serialize};

/// One detected flower, in unit-square coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "PointRepr")]
pub struct DetectionPoint {
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

// Rovers have historically uploaded contour points as bare `[x, y]` pairs,
// and model points as `[x, y, confidence]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PointRepr {
    Object {
        x: f64,
        y: f64,
        #[serde(default)]
        confidence: Option<f64>,
    },
    Pair(f64, f64),
    Triple(f64, f64, f64),
}

impl From<PointRepr> for DetectionPoint {
    fn from(repr: PointRepr) -> Self {
        match repr {
            PointRepr::Object { x, y, confidence } => DetectionPoint { x, y, confidence },
            PointRepr::Pair(x, y) => DetectionPoint {
                x,
                y,
                confidence: None,
            },
            PointRepr::Triple(x, y, confidence) => DetectionPoint {
                x,
                y,
                confidence: Some(confidence),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortAxis {
    X,
    #[default]
    Y,
}

impl SortAxis {
    fn key(self, point: &DetectionPoint) -> f64 {
        match self {
            SortAxis::X => point.x,
            SortAxis::Y => point.y,
        }
    }
}

/// Divide pixel coordinates by the image dimensions.
pub fn unit_coordinates(px: f64, py: f64, width: u32, height: u32) -> (f64, f64) {
    let w = f64::from(width.max(1));
    let h = f64::from(height.max(1));
    (px / w, py / h)
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Clamp every point into the unit square and order by `axis`, ascending.
///
/// The sort is stable, so points sharing a key keep their detection order.
/// Running it twice yields the same sequence.
pub fn normalize_and_sort(points: Vec<DetectionPoint>, axis: SortAxis) -> Vec<DetectionPoint> {
    let mut points: Vec<DetectionPoint> = points
        .into_iter()
        .map(|p| DetectionPoint {
            x: clamp_unit(p.x),
            y: clamp_unit(p.y),
            confidence: p.confidence.map(clamp_unit),
        })
        .collect();

    points.sort_by(|a, b| axis.key(a).total_cmp(&axis.key(b)));
    points
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
