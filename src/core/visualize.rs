//! 指纹叠加图：在帧上画出网格，每个块画一根指向特征角度的箭头

use crate::core::config::FingerprintParams;
use crate::core::error::{FingerprintError, Result};
use crate::core::fingerprint::FeatureVector;
use crate::core::video::GrayFrame;
use image::{Rgb, RgbImage};
use std::f64::consts::PI;
use std::path::Path;

const GRID_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const ARROW_LEN: f64 = 25.0;
const TIP_RATIO: f64 = 0.3;

pub fn render_overlay(frame: &GrayFrame, vector: &FeatureVector, params: &FingerprintParams) -> Result<RgbImage> {
    if frame.width != params.width || frame.height != params.height {
        return Err(FingerprintError::dims(
            format!("{}x{}", params.width, params.height),
            format!("{}x{}", frame.width, frame.height),
        ));
    }
    if vector.len() != params.dim() {
        return Err(FingerprintError::dims(params.dim(), vector.len()));
    }

    let (w, h) = (params.width, params.height);
    let mut img = RgbImage::from_fn(w, h, |x, y| {
        let v = frame.get(x, y);
        Rgb([v, v, v])
    });

    let (block_w, block_h) = params.block_size();
    for r in 1..params.rows {
        let y = (r * block_h) as i64;
        draw_line(&mut img, (0, y), (w as i64 - 1, y), GRID_COLOR);
    }
    for c in 1..params.cols {
        let x = (c * block_w) as i64;
        draw_line(&mut img, (x, 0), (x, h as i64 - 1), GRID_COLOR);
    }

    let arrow_len = ARROW_LEN.min(block_w.min(block_h) as f64 / 2.0 - 1.0).max(2.0);
    for (i, &angle) in vector.as_slice().iter().enumerate() {
        let (r, c) = (i as u32 / params.cols, i as u32 % params.cols);
        let cx = (c * block_w + block_w / 2) as f64;
        let cy = (r * block_h + block_h / 2) as f64;
        draw_arrow(&mut img, (cx, cy), angle, arrow_len, angle_color(angle));
    }

    Ok(img)
}

pub fn save_overlay(img: &RgbImage, path: impl AsRef<Path>) -> Result<()> {
    img.save(path)
        .map_err(|e| FingerprintError::Io(std::io::Error::other(e)))
}

/// 角度 -π..π 映射到色相
fn angle_color(angle: f64) -> Rgb<u8> {
    let hue = ((angle + PI) / (2.0 * PI)).clamp(0.0, 1.0);
    hsv_to_rgb(hue)
}

fn hsv_to_rgb(hue: f64) -> Rgb<u8> {
    let h = (hue * 6.0) % 6.0;
    let x = 1.0 - ((h % 2.0) - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
}

fn draw_arrow(img: &mut RgbImage, from: (f64, f64), angle: f64, len: f64, color: Rgb<u8>) {
    let tip = (from.0 + len * angle.cos(), from.1 + len * angle.sin());
    let start = (from.0.round() as i64, from.1.round() as i64);
    let end = (tip.0.round() as i64, tip.1.round() as i64);
    draw_line(img, start, end, color);

    let head = len * TIP_RATIO;
    for side in [PI / 6.0, -PI / 6.0] {
        let back = angle + PI + side;
        let wing = (
            (tip.0 + head * back.cos()).round() as i64,
            (tip.1 + head * back.sin()).round() as i64,
        );
        draw_line(img, end, wing, color);
    }
}

/// Bresenham，超出画布的点直接丢弃
fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
            img.put_pixel(x as u32, y as u32, color);
        }
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}
