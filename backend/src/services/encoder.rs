use std::io::Cursor;

use base64::Engine as _;
use image::{DynamicImage, ImageFormat};

use crate::models::error::AppError;
use crate::models::params::OutputFormat;

#[derive(Debug, Clone)]
pub struct EncodedOutput {
    /// Image as it will be displayed; for JPEG this is the re-decoded result.
    pub image: DynamicImage,
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
}

impl EncodedOutput {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// Encodes the final result. JPEG drops any alpha channel and is decoded back
/// so the caller sees the lossy image it is about to download.
pub fn encode_output(
    img: DynamicImage,
    format: OutputFormat,
    jpeg_quality: u8,
) -> Result<EncodedOutput, AppError> {
    match format {
        OutputFormat::Png => {
            let bytes = encode_png(&img)?;
            Ok(EncodedOutput { image: img, bytes, format })
        }
        OutputFormat::Jpeg => {
            let bytes = encode_jpeg(&img, jpeg_quality)?;
            let image = image::load_from_memory_with_format(&bytes, ImageFormat::Jpeg)
                .map_err(|e| AppError::Encoding(format!("JPEG decode error: {}", e)))?;
            Ok(EncodedOutput { image, bytes, format })
        }
    }
}

pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, AppError> {
    let mut buf = Cursor::new(Vec::new());
    let rgb = img.to_rgb8();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
        .map_err(|e| AppError::Encoding(format!("JPEG encode error: {}", e)))?;
    Ok(buf.into_inner())
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, AppError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| AppError::Encoding(format!("PNG encode error: {}", e)))?;
    Ok(buf.into_inner())
}

pub fn data_uri(bytes: &[u8], mime_type: &str) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// HTML anchor that downloads `bytes` as `filename` when clicked.
pub fn download_link(bytes: &[u8], mime_type: &str, filename: &str, text: &str) -> String {
    format!(
        "<a href=\"{}\" download=\"{}\">{}</a>",
        data_uri(bytes, mime_type),
        sanitize_filename(filename),
        text
    )
}

/// `enhanced_<stem>.<ext>`, with the extension matching the output format.
pub fn download_filename(original_name: &str, format: OutputFormat) -> String {
    let name = sanitize_filename(original_name);
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name.as_str(),
    };
    let ext = match format {
        OutputFormat::Png => "png",
        OutputFormat::Jpeg => "jpg",
    };
    format!("enhanced_{}.{}", stem, ext)
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '"' | '<' | '>' | '/' | '\\'))
        .collect()
}
