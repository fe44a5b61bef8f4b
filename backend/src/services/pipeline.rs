use image::{DynamicImage, GenericImageView};
use tracing::info;

use crate::models::error::AppError;
use crate::models::params::ProcessingParameters;
use crate::services::encoder::{self, EncodedOutput};
use crate::services::fine_tune;
use crate::services::resize;
use crate::services::upscaler::{UpscaleRequest, Upscaler};

/// Resize, check the output budget, upscale remotely, fine-tune, encode.
pub async fn process<U: Upscaler>(
    upscaler: &U,
    original: &DynamicImage,
    params: &ProcessingParameters,
    max_pixels: u64,
) -> Result<EncodedOutput, AppError> {
    params.validate()?;

    let input = resize::resize_to_pixel_budget(original, max_pixels);
    let (w, h) = input.dimensions();
    resize::ensure_output_budget(w, h, params.scale_factor, max_pixels)?;

    let upscaled = upscaler.upscale(&input, &UpscaleRequest::from(params)).await?;

    let tuned = fine_tune::apply_fine_tuning(&upscaled, &params.fine_tuning);

    let output = encoder::encode_output(tuned, params.output_format, params.jpeg_quality)?;
    let (ow, oh) = output.image.dimensions();
    info!(
        input_w = w,
        input_h = h,
        output_w = ow,
        output_h = oh,
        format = ?params.output_format,
        bytes = output.bytes.len(),
        "Image processed"
    );
    Ok(output)
}
