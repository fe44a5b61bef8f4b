//! Post-upscale enhancement filters.
//!
//! Every adjustment blends the image against a degenerate version of itself:
//! `out = degenerate + factor * (image - degenerate)`. A factor of 0 yields the
//! degenerate image, 1 leaves the image unchanged and 2 doubles the effect.

use image::{DynamicImage, Rgb, RgbImage};

use crate::models::error::AppError;
use crate::models::params::{factor_in_range, FineTuning, NEUTRAL_FACTOR};

const SMOOTH_KERNEL: [[u32; 3]; 3] = [[1, 1, 1], [1, 5, 1], [1, 1, 1]];
const SMOOTH_WEIGHT: u32 = 13;

/// Applies sharpness, contrast, brightness and color balance in that order.
///
/// Failures are logged and the input is returned unmodified.
pub fn apply_fine_tuning(img: &DynamicImage, tuning: &FineTuning) -> DynamicImage {
    match try_fine_tuning(img, tuning) {
        Ok(tuned) => tuned,
        Err(e) => {
            tracing::warn!(error = %e, "fine tuning skipped");
            img.clone()
        }
    }
}

pub fn try_fine_tuning(img: &DynamicImage, tuning: &FineTuning) -> Result<DynamicImage, AppError> {
    for (name, factor) in tuning.named() {
        if !factor_in_range(factor) {
            return Err(AppError::Encoding(format!(
                "{} factor {} is outside the supported range",
                name, factor
            )));
        }
    }

    let mut rgb = img.to_rgb8();
    if tuning.is_neutral() {
        return Ok(DynamicImage::ImageRgb8(rgb));
    }

    if tuning.sharpness != NEUTRAL_FACTOR {
        rgb = adjust_sharpness(&rgb, tuning.sharpness);
    }
    if tuning.contrast != NEUTRAL_FACTOR {
        rgb = adjust_contrast(&rgb, tuning.contrast);
    }
    if tuning.brightness != NEUTRAL_FACTOR {
        rgb = adjust_brightness(&rgb, tuning.brightness);
    }
    if tuning.color_balance != NEUTRAL_FACTOR {
        rgb = adjust_color(&rgb, tuning.color_balance);
    }

    Ok(DynamicImage::ImageRgb8(rgb))
}

fn adjust_sharpness(img: &RgbImage, factor: f32) -> RgbImage {
    blend(&smooth(img), img, factor)
}

/// 3x3 smoothing; the one-pixel border is copied through unfiltered.
fn smooth(img: &RgbImage) -> RgbImage {
    let (w, h) = img.dimensions();
    let mut out = img.clone();
    if w < 3 || h < 3 {
        return out;
    }
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut acc = [0u32; 3];
            for (ky, row) in SMOOTH_KERNEL.iter().enumerate() {
                for (kx, weight) in row.iter().enumerate() {
                    let p = img.get_pixel(x + kx as u32 - 1, y + ky as u32 - 1);
                    for c in 0..3 {
                        acc[c] += p[c] as u32 * weight;
                    }
                }
            }
            let px = out.get_pixel_mut(x, y);
            for c in 0..3 {
                px[c] = ((acc[c] + SMOOTH_WEIGHT / 2) / SMOOTH_WEIGHT) as u8;
            }
        }
    }
    out
}

fn adjust_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let pixels = (img.width() as u64 * img.height() as u64).max(1);
    let sum: u64 = img.pixels().map(|p| luma(p) as u64).sum();
    let mean = ((sum as f64 / pixels as f64) + 0.5) as u8;
    let gray = RgbImage::from_pixel(img.width(), img.height(), Rgb([mean, mean, mean]));
    blend(&gray, img, factor)
}

fn adjust_brightness(img: &RgbImage, factor: f32) -> RgbImage {
    let black = RgbImage::new(img.width(), img.height());
    blend(&black, img, factor)
}

fn adjust_color(img: &RgbImage, factor: f32) -> RgbImage {
    let mut gray = img.clone();
    for pixel in gray.pixels_mut() {
        let l = luma(pixel);
        *pixel = Rgb([l, l, l]);
    }
    blend(&gray, img, factor)
}

/// ITU-R 601-2 luma.
fn luma(p: &Rgb<u8>) -> u8 {
    let [r, g, b] = p.0;
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114 + 500) / 1000) as u8
}

fn blend(degenerate: &RgbImage, img: &RgbImage, factor: f32) -> RgbImage {
    let mut out = img.clone();
    for (dst, (d, s)) in out.pixels_mut().zip(degenerate.pixels().zip(img.pixels())) {
        for c in 0..3 {
            let base = d[c] as f32;
            let v = base + factor * (s[c] as f32 - base);
            dst[c] = v.clamp(0.0, 255.0) as u8;
        }
    }
    out
}
