use serde::{Deserialize, Serialize};

use crate::models::error::AppError;

pub const FACTOR_MIN: f32 = 0.0;
pub const FACTOR_MAX: f32 = 2.0;
pub const NEUTRAL_FACTOR: f32 = 1.0;
pub const JPEG_QUALITY_MIN: u8 = 60;
pub const JPEG_QUALITY_MAX: u8 = 100;
pub const MAX_DENOISE_LEVEL: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ScaleFactor {
    X2,
    X3,
}

impl ScaleFactor {
    pub fn as_u32(self) -> u32 {
        match self {
            ScaleFactor::X2 => 2,
            ScaleFactor::X3 => 3,
        }
    }
}

impl TryFrom<u32> for ScaleFactor {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(ScaleFactor::X2),
            3 => Ok(ScaleFactor::X3),
            other => Err(format!("scale factor must be 2 or 3, got {}", other)),
        }
    }
}

impl From<ScaleFactor> for u32 {
    fn from(value: ScaleFactor) -> Self {
        value.as_u32()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    #[serde(rename = "PNG", alias = "png")]
    Png,
    #[serde(rename = "JPEG", alias = "jpeg", alias = "JPG", alias = "jpg")]
    Jpeg,
}

impl OutputFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }
}

/// Post-upscale adjustments. Each factor is neutral at 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FineTuning {
    pub sharpness: f32,
    pub contrast: f32,
    pub brightness: f32,
    pub color_balance: f32,
}

impl Default for FineTuning {
    fn default() -> Self {
        Self {
            sharpness: NEUTRAL_FACTOR,
            contrast: NEUTRAL_FACTOR,
            brightness: NEUTRAL_FACTOR,
            color_balance: NEUTRAL_FACTOR,
        }
    }
}

impl FineTuning {
    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }

    pub fn named(&self) -> [(&'static str, f32); 4] {
        [
            ("sharpness", self.sharpness),
            ("contrast", self.contrast),
            ("brightness", self.brightness),
            ("colorBalance", self.color_balance),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingParameters {
    pub scale_factor: ScaleFactor,
    pub face_enhance: bool,
    pub denoise_level: u8,
    pub output_format: OutputFormat,
    pub jpeg_quality: u8,
    #[serde(flatten)]
    pub fine_tuning: FineTuning,
}

impl Default for ProcessingParameters {
    fn default() -> Self {
        Self {
            scale_factor: ScaleFactor::X2,
            face_enhance: true,
            denoise_level: 1,
            output_format: OutputFormat::Png,
            jpeg_quality: 95,
            fine_tuning: FineTuning::default(),
        }
    }
}

impl ProcessingParameters {
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let params: Self = serde_json::from_str(raw)
            .map_err(|e| AppError::Validation(format!("Invalid parameters: {}", e)))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.denoise_level > MAX_DENOISE_LEVEL {
            return Err(AppError::Validation(format!(
                "denoiseLevel must be between 0 and {}, got {}",
                MAX_DENOISE_LEVEL, self.denoise_level
            )));
        }
        if self.output_format == OutputFormat::Jpeg
            && !(JPEG_QUALITY_MIN..=JPEG_QUALITY_MAX).contains(&self.jpeg_quality)
        {
            return Err(AppError::Validation(format!(
                "jpegQuality must be between {} and {}, got {}",
                JPEG_QUALITY_MIN, JPEG_QUALITY_MAX, self.jpeg_quality
            )));
        }
        for (name, factor) in self.fine_tuning.named() {
            if !factor_in_range(factor) {
                return Err(AppError::Validation(format!(
                    "{} must be between {:.1} and {:.1}, got {}",
                    name, FACTOR_MIN, FACTOR_MAX, factor
                )));
            }
        }
        Ok(())
    }
}

pub fn factor_in_range(factor: f32) -> bool {
    factor.is_finite() && (FACTOR_MIN..=FACTOR_MAX).contains(&factor)
}
