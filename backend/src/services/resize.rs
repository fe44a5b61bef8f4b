use image::{imageops::FilterType, DynamicImage, GenericImageView};

use crate::models::error::AppError;
use crate::models::params::ScaleFactor;

/// Downsamples `img` so that `width * height <= max_pixels`, keeping the aspect ratio.
pub fn resize_to_pixel_budget(img: &DynamicImage, max_pixels: u64) -> DynamicImage {
    let (w, h) = img.dimensions();
    let pixels = w as u64 * h as u64;
    if pixels <= max_pixels {
        return img.clone();
    }

    let ratio = (max_pixels as f64 / pixels as f64).sqrt();
    let mut nw = ((w as f64 * ratio) as u32).max(1);
    let mut nh = ((h as f64 * ratio) as u32).max(1);
    // float rounding can land one step over the budget
    while nw as u64 * nh as u64 > max_pixels && (nw > 1 || nh > 1) {
        if nw >= nh {
            nw -= 1;
        } else {
            nh -= 1;
        }
    }

    tracing::debug!(from_w = w, from_h = h, to_w = nw, to_h = nh, "resizing to pixel budget");
    img.resize_exact(nw, nh, FilterType::Lanczos3)
}

/// Rejects images whose upscaled size would exceed `max_pixels`.
pub fn ensure_output_budget(
    width: u32,
    height: u32,
    scale: ScaleFactor,
    max_pixels: u64,
) -> Result<(), AppError> {
    let s = scale.as_u32() as u64;
    let total = width as u64 * height as u64 * s * s;
    if total > max_pixels {
        return Err(AppError::PixelBudgetExceeded {
            width,
            height,
            scale: scale.as_u32(),
            ceiling: max_pixels,
        });
    }
    Ok(())
}
