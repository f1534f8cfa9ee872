use std::io::Cursor;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut},
    rect::Rect,
};

use super::model::BoundingBox;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;
const GLYPH_SCALE: i32 = 2;
const LABEL_GAP: i32 = 10;

// 3x5 bitmaps for the characters a confidence label can contain.
// Each row is three bits, most significant bit on the left.
fn glyph(c: char) -> Option<[u8; 5]> {
    Some(match c {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b010, 0b010, 0b010],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        _ => return None,
    })
}

/// Burn each box and its confidence (two decimals) into `canvas`.
pub fn draw_boxes(canvas: &mut RgbImage, boxes: &[BoundingBox]) {
    for b in boxes {
        let x = b.x_min as i32;
        let y = b.y_min as i32;
        let w = (b.x_max - b.x_min) as i32;
        let h = (b.y_max - b.y_min) as i32;

        for t in 0..BOX_THICKNESS {
            let (rw, rh) = (w - 2 * t, h - 2 * t);
            if rw <= 0 || rh <= 0 {
                break;
            }
            draw_hollow_rect_mut(canvas, Rect::at(x + t, y + t).of_size(rw as u32, rh as u32), BOX_COLOR);
        }

        let label = format!("{:.2}", b.confidence);
        let label_height = 5 * GLYPH_SCALE;
        let label_y = (y - LABEL_GAP).max(0).min(canvas.height() as i32 - label_height);
        draw_label(canvas, &label, x, label_y);
    }
}

fn draw_label(canvas: &mut RgbImage, text: &str, x: i32, y: i32) {
    let advance = 4 * GLYPH_SCALE;
    for (i, c) in text.chars().enumerate() {
        let Some(rows) = glyph(c) else { continue };
        let origin_x = x + i as i32 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..3 {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                let px = origin_x + col * GLYPH_SCALE;
                let py = y + row as i32 * GLYPH_SCALE;
                draw_filled_rect_mut(
                    canvas,
                    Rect::at(px, py).of_size(GLYPH_SCALE as u32, GLYPH_SCALE as u32),
                    BOX_COLOR,
                );
            }
        }
    }
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode annotated image as PNG")?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_box_outline_and_label() {
        let mut canvas = RgbImage::new(100, 100);
        let b = BoundingBox {
            x_min: 20.0,
            y_min: 40.0,
            x_max: 60.0,
            y_max: 80.0,
            confidence: 0.91,
            class_id: 0,
        };
        draw_boxes(&mut canvas, &[b]);

        assert_eq!(*canvas.get_pixel(20, 40), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(21, 60), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(40, 60), Rgb([0, 0, 0]));
        // first glyph row of the leading '0' sits ten pixels above the box
        assert_eq!(*canvas.get_pixel(20, 30), BOX_COLOR);
    }

    #[test]
    fn degenerate_boxes_do_not_panic() {
        let mut canvas = RgbImage::new(10, 10);
        let b = BoundingBox {
            x_min: 9.0,
            y_min: 0.0,
            x_max: 9.0,
            y_max: 0.5,
            confidence: 0.4,
            class_id: 0,
        };
        draw_boxes(&mut canvas, &[b]);
    }

    #[test]
    fn png_round_trips_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(7, 3));
        let bytes = encode_png(&img).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (7, 3));
    }
}
