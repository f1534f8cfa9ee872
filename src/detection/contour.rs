use image::{imageops::FilterType, DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::{
    contours::{find_contours, BorderType, Contour},
    drawing::draw_filled_circle_mut,
};
use log::debug;
use serde::{Deserialize, Serialize};

use super::{geometry::unit_coordinates, DetectionPoint, DetectionStrategy, Located};
use crate::error::PipelineError;

/// Tunables for the color-mask strategy. Bounds are inclusive, in OpenCV's
/// 8-bit HSV convention (hue 0..=180, saturation and value 0..=255).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContourConfig {
    pub canonical_width: u32,
    pub canonical_height: u32,
    pub lower_hsv: [u8; 3],
    pub upper_hsv: [u8; 3],
    pub marker_radius: i32,
}

impl Default for ContourConfig {
    fn default() -> Self {
        Self {
            canonical_width: 500,
            canonical_height: 500,
            lower_hsv: [0, 0, 200],
            upper_hsv: [180, 30, 255],
            marker_radius: 10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContourStrategy {
    config: ContourConfig,
}

impl ContourStrategy {
    pub fn new(config: ContourConfig) -> Self {
        Self { config }
    }

    fn mask(&self, rgb: &RgbImage) -> GrayImage {
        let lower = self.config.lower_hsv;
        let upper = self.config.upper_hsv;
        GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            let hsv = rgb_to_hsv(*rgb.get_pixel(x, y));
            let inside = (0..3).all(|c| hsv[c] >= lower[c] && hsv[c] <= upper[c]);
            Luma([if inside { 255 } else { 0 }])
        })
    }
}

impl DetectionStrategy for ContourStrategy {
    fn name(&self) -> &'static str {
        "contour"
    }

    fn locate(&self, image: &DynamicImage) -> Result<Located, PipelineError> {
        let (width, height) = (self.config.canonical_width, self.config.canonical_height);
        let rgb = image.to_rgb8();
        let rgb = if rgb.dimensions() == (width, height) {
            rgb
        } else {
            image::imageops::resize(&rgb, width, height, FilterType::Triangle)
        };

        let mask = self.mask(&rgb);
        let mut canvas = RgbImage::new(width, height);
        let mut points = Vec::new();

        for contour in find_contours::<i32>(&mask) {
            if !is_external(&contour) {
                continue;
            }
            let Some((cx, cy)) = centroid(&contour) else {
                continue;
            };
            let (x, y) = unit_coordinates(f64::from(cx), f64::from(cy), width, height);
            points.push(DetectionPoint {
                x,
                y,
                confidence: None,
            });
            draw_filled_circle_mut(
                &mut canvas,
                (cx, cy),
                self.config.marker_radius,
                Rgb([255, 255, 255]),
            );
        }

        debug!("contour strategy found {} regions", points.len());

        Ok(Located {
            points,
            annotated: DynamicImage::ImageRgb8(canvas),
        })
    }
}

fn is_external(contour: &Contour<i32>) -> bool {
    contour.border_type == BorderType::Outer && contour.parent.is_none()
}

/// Integer centroid from the polygon's zeroth and first moments, or `None`
/// when the enclosed area is zero (single pixels, one-pixel-wide strokes).
fn centroid(contour: &Contour<i32>) -> Option<(i32, i32)> {
    let moments = PolygonMoments::of(&contour.points)?;
    // Truncates toward zero; m00 is nonzero, so both quotients are finite.
    let cx = (moments.m10 / moments.m00) as i32;
    let cy = (moments.m01 / moments.m00) as i32;
    Some((cx, cy))
}

struct PolygonMoments {
    m00: f64,
    m10: f64,
    m01: f64,
}

impl PolygonMoments {
    /// Green's theorem over the closed boundary. Orientation is normalized so
    /// the area is always positive.
    fn of(points: &[imageproc::point::Point<i32>]) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }

        let (mut a00, mut a10, mut a01) = (0.0f64, 0.0f64, 0.0f64);
        let mut prev = points[points.len() - 1];
        for &current in points {
            let (xp, yp) = (f64::from(prev.x), f64::from(prev.y));
            let (xc, yc) = (f64::from(current.x), f64::from(current.y));
            let cross = xp * yc - xc * yp;
            a00 += cross;
            a10 += cross * (xp + xc);
            a01 += cross * (yp + yc);
            prev = current;
        }

        if a00.abs() <= f64::EPSILON {
            return None;
        }
        let sign = a00.signum();
        Some(Self {
            m00: a00 * 0.5 * sign,
            m10: a10 / 6.0 * sign,
            m01: a01 / 6.0 * sign,
        })
    }
}

/// RGB to 8-bit HSV using OpenCV's scaling: hue is halved into 0..=180.
fn rgb_to_hsv(Rgb([r, g, b]): Rgb<u8>) -> [u8; 3] {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = v - min;

    let s = if v > 0.0 { 255.0 * delta / v } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / delta
    } else if v == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    [(h / 2.0).round() as u8, s.round() as u8, v as u8]
}
