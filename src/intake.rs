//! Image intake and validation.
//!
//! The gatekeeping stage: no analysis or recognition happens here. Input
//! that cannot possibly be processed (corrupted, unsupported format, too
//! small, blank) is rejected with a typed error before any pipeline work
//! begins, with no partial result.

use crate::core::config::IntakeConfig;
use crate::core::errors::PipelineError;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use tracing::{debug, info};

/// A decoded, validated image owned by a single request.
///
/// Both buffers are derived once at intake; later stages read them but never
/// mutate them, so the originals stay available for re-analysis.
#[derive(Debug)]
pub struct ValidatedImage {
    /// Full-color view of the input.
    pub rgb: RgbImage,
    /// Grayscale working copy.
    pub gray: GrayImage,
    /// True when the source had a single channel.
    pub is_grayscale: bool,
    /// Resolution reported by the container, when present.
    pub source_dpi: Option<u32>,
}

impl ValidatedImage {
    /// Image width in pixels.
    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    /// Image height in pixels.
    pub fn height(&self) -> u32 {
        self.gray.height()
    }
}

/// Validates raw image bytes and prepares per-request working buffers.
#[derive(Debug, Clone)]
pub struct ImageValidator {
    config: IntakeConfig,
}

impl ImageValidator {
    /// Creates a validator with the given limits.
    pub fn new(config: IntakeConfig) -> Self {
        Self { config }
    }

    /// Decodes and validates `bytes`, returning owned working buffers.
    ///
    /// # Errors
    ///
    /// Returns a rejection-class [`PipelineError`] when the payload is too
    /// large, not decodable, in an unsupported format, undersized, or blank.
    pub fn validate(&self, bytes: &[u8]) -> Result<ValidatedImage, PipelineError> {
        if bytes.len() > self.config.max_bytes {
            return Err(PipelineError::ImageTooLarge {
                size_bytes: bytes.len(),
                max_bytes: self.config.max_bytes,
            });
        }

        self.check_format(bytes)?;

        let decoded = image::load_from_memory(bytes)?;
        let (width, height) = (decoded.width(), decoded.height());
        if width < self.config.min_width || height < self.config.min_height {
            return Err(PipelineError::ImageTooSmall {
                width,
                height,
                min_width: self.config.min_width,
                min_height: self.config.min_height,
            });
        }

        let is_grayscale = matches!(
            decoded,
            DynamicImage::ImageLuma8(_)
                | DynamicImage::ImageLumaA8(_)
                | DynamicImage::ImageLuma16(_)
                | DynamicImage::ImageLumaA16(_)
        );

        let rgb = decoded.to_rgb8();
        let gray = decoded.to_luma8();
        self.check_not_blank(&gray)?;

        info!(
            target: "intake",
            width,
            height,
            is_grayscale,
            "input validated"
        );

        Ok(ValidatedImage {
            rgb,
            gray,
            is_grayscale,
            source_dpi: None,
        })
    }

    fn check_format(&self, bytes: &[u8]) -> Result<(), PipelineError> {
        let format = image::guess_format(bytes)
            .map_err(PipelineError::ImageCorrupted)?;
        let supported = matches!(
            format,
            ImageFormat::Jpeg
                | ImageFormat::Png
                | ImageFormat::WebP
                | ImageFormat::Tiff
                | ImageFormat::Bmp
        );
        if !supported {
            return Err(PipelineError::UnsupportedFormat {
                format: format!("{format:?}").to_lowercase(),
            });
        }
        debug!(target: "intake", format = ?format, "format accepted");
        Ok(())
    }

    /// Rejects frames that are uniformly dark or uniformly light: there is
    /// nothing to recognize and downstream metrics would be meaningless.
    fn check_not_blank(&self, gray: &GrayImage) -> Result<(), PipelineError> {
        let n = (gray.width() as u64 * gray.height() as u64) as f64;
        let mut sum = 0.0f64;
        for p in gray.pixels() {
            sum += p.0[0] as f64;
        }
        let mean = sum / n;
        let mut var = 0.0f64;
        for p in gray.pixels() {
            let d = p.0[0] as f64 - mean;
            var += d * d;
        }
        let stddev = (var / n).sqrt() as f32;
        let mean = mean as f32;

        if stddev < self.config.blank_stddev
            && (mean < self.config.blank_dark_mean || mean > self.config.blank_light_mean)
        {
            return Err(PipelineError::BlankImage { mean, stddev });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::io::Cursor;

    fn png_bytes(img: &GrayImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn textured_image(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]))
    }

    fn validator() -> ImageValidator {
        ImageValidator::new(IntakeConfig::default())
    }

    #[test]
    fn accepts_valid_png() {
        let bytes = png_bytes(&textured_image(200, 200));
        let validated = validator().validate(&bytes).unwrap();
        assert_eq!(validated.width(), 200);
        assert!(validated.is_grayscale);
    }

    #[test]
    fn rejects_garbage_bytes() {
        let err = validator().validate(&[0xde, 0xad, 0xbe, 0xef]).unwrap_err();
        assert!(matches!(err, PipelineError::ImageCorrupted(_)));
        assert!(err.is_rejection());
    }

    #[test]
    fn rejects_undersized_image_before_any_analysis() {
        let bytes = png_bytes(&textured_image(40, 40));
        let err = validator().validate(&bytes).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ImageTooSmall {
                width: 40,
                height: 40,
                ..
            }
        ));
    }

    #[test]
    fn rejects_all_white_frame() {
        let bytes = png_bytes(&GrayImage::from_pixel(200, 200, Luma([255])));
        let err = validator().validate(&bytes).unwrap_err();
        assert!(matches!(err, PipelineError::BlankImage { .. }));
    }

    #[test]
    fn rejects_all_black_frame() {
        let bytes = png_bytes(&GrayImage::from_pixel(200, 200, Luma([0])));
        let err = validator().validate(&bytes).unwrap_err();
        assert!(matches!(err, PipelineError::BlankImage { .. }));
    }

    #[test]
    fn uniform_midtone_frame_is_not_blank() {
        // Low variance but a midtone mean: pathological yet not blank by the
        // configured rule; quality analysis deals with it downstream.
        let bytes = png_bytes(&GrayImage::from_pixel(200, 200, Luma([128])));
        assert!(validator().validate(&bytes).is_ok());
    }

    #[test]
    fn rejects_oversized_payload() {
        let mut config = IntakeConfig::default();
        config.max_bytes = 16;
        let validator = ImageValidator::new(config);
        let bytes = png_bytes(&textured_image(200, 200));
        let err = validator.validate(&bytes).unwrap_err();
        assert!(matches!(err, PipelineError::ImageTooLarge { .. }));
    }
}
