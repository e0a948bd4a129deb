//! # Stage Definition: Preprocessing & Enhancement
//!
//! This stage is considered "Done" when it fulfills the following contract:
//!
//! - **Inputs**: validated image buffers plus the [`QualityRecord`] measured
//!   on them. The inputs are never mutated.
//! - **Outputs**: [`EnhancedImage`] holding a corrected grayscale buffer and
//!   a binarized buffer (ink = white), both derived copies.
//! - **Logging**: one event per applied correction.
//! - **Invariants**:
//!     - Only corrections flagged in `recommended_actions` are applied, in
//!       the fixed order deskew → denoise → contrast → sharpen.
//!     - With no recommended actions the grayscale output is bit-identical
//!       to the input.
//!     - Deskew fills revealed borders with the page background intensity,
//!       never black, and expands the canvas so no content is cropped.
//!
//! The rule that governs everything here: never destroy text to make the
//! image prettier.

use crate::core::config::PreprocessConfig;
use crate::intake::ValidatedImage;
use crate::quality::{EnhanceAction, QualityRecord};
use image::{GrayImage, Luma};
use imageproc::contrast::adaptive_threshold;
use imageproc::distance_transform::Norm;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::morphology::{close, open};
use tracing::debug;

/// Derived working buffers handed to layout detection and recognition.
#[derive(Debug)]
pub struct EnhancedImage {
    /// Corrected grayscale buffer; recognition crops from this.
    pub gray: GrayImage,
    /// Binarized buffer with ink as foreground (255); layout detection
    /// operates on this.
    pub binary: GrayImage,
}

/// Applies quality-driven corrections. There is no fixed recipe: every
/// operation is gated by the analyzer's recommendations.
#[derive(Debug, Clone)]
pub struct Enhancer {
    config: PreprocessConfig,
}

impl Enhancer {
    /// Creates an enhancer with the given operator parameters.
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Produces corrected grayscale and binary buffers for `image`.
    pub fn enhance(&self, image: &ValidatedImage, quality: &QualityRecord) -> EnhancedImage {
        let mut gray = image.gray.clone();

        // Deskew before binarization avoids jagged glyph edges; denoise
        // before contrast enhancement avoids amplifying the noise floor.
        if quality.recommended_actions.contains(&EnhanceAction::Deskew) {
            gray = deskew(&gray, quality.skew_angle);
            debug!(target: "preprocess", angle = quality.skew_angle, "deskewed");
        }
        if quality.recommended_actions.contains(&EnhanceAction::Denoise) {
            let r = self.config.denoise_median_radius;
            gray = median_filter(&gray, r, r);
            debug!(target: "preprocess", radius = r, "denoised");
        }
        if quality
            .recommended_actions
            .contains(&EnhanceAction::EnhanceContrast)
        {
            gray = imageproc::contrast::equalize_histogram(&gray);
            debug!(target: "preprocess", "contrast enhanced");
        }
        if quality.recommended_actions.contains(&EnhanceAction::Sharpen) {
            gray = unsharp_mask(&gray, self.config.sharpen_sigma, self.config.sharpen_amount);
            debug!(target: "preprocess", "sharpened");
        }

        let binary = self.binarize(&gray);
        EnhancedImage { gray, binary }
    }

    /// Locally-adaptive binarization followed by conservative morphological
    /// cleanup. A single global cutoff fails on unevenly lit photographs, so
    /// the threshold is the neighborhood mean around each pixel.
    fn binarize(&self, gray: &GrayImage) -> GrayImage {
        let thresholded = adaptive_threshold(gray, self.config.adaptive_threshold_radius);

        // Ink is darker than its surroundings, so it lands at 0; flip to the
        // foreground-white convention used by morphology and contours.
        let mut binary = thresholded;
        for p in binary.pixels_mut() {
            p.0[0] = 255 - p.0[0];
        }

        // Opening removes binarization speckle, closing re-fills small gaps
        // inside strokes. The element stays small so thin glyph strokes
        // survive.
        let r = self.config.cleanup_radius;
        if r > 0 {
            binary = close(&open(&binary, Norm::LInf, r), Norm::LInf, r);
        }
        binary
    }
}

/// Rotates `gray` by the negated measured skew about its center, expanding
/// the canvas so no content is cropped and filling revealed borders with the
/// estimated page background.
fn deskew(gray: &GrayImage, angle_degrees: f32) -> GrayImage {
    let background = border_median(gray);
    let theta = -angle_degrees.to_radians();

    let (w, h) = (gray.width() as f32, gray.height() as f32);
    let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
    // Canvas must hold both the pasted original and the rotated content.
    let new_w = ((w * cos + h * sin).ceil() as u32).max(gray.width());
    let new_h = ((w * sin + h * cos).ceil() as u32).max(gray.height());

    let mut canvas = GrayImage::from_pixel(new_w, new_h, Luma([background]));
    let dx = ((new_w - gray.width()) / 2) as i64;
    let dy = ((new_h - gray.height()) / 2) as i64;
    image::imageops::replace(&mut canvas, gray, dx, dy);

    rotate_about_center(&canvas, theta, Interpolation::Bilinear, Luma([background]))
}

/// Median intensity of the one-pixel border, used as the page background
/// estimate when rotation reveals new area.
fn border_median(gray: &GrayImage) -> u8 {
    let (w, h) = gray.dimensions();
    let mut values = Vec::with_capacity((2 * (w + h)) as usize);
    for x in 0..w {
        values.push(gray.get_pixel(x, 0).0[0]);
        values.push(gray.get_pixel(x, h - 1).0[0]);
    }
    for y in 0..h {
        values.push(gray.get_pixel(0, y).0[0]);
        values.push(gray.get_pixel(w - 1, y).0[0]);
    }
    values.sort_unstable();
    values[values.len() / 2]
}

/// Unsharp mask: `(1 + amount) * original - amount * blurred`.
fn unsharp_mask(gray: &GrayImage, sigma: f32, amount: f32) -> GrayImage {
    let blurred = gaussian_blur_f32(gray, sigma);
    let mut out = GrayImage::new(gray.width(), gray.height());
    for ((po, pg), pb) in out.pixels_mut().zip(gray.pixels()).zip(blurred.pixels()) {
        let sharpened =
            (1.0 + amount) * pg.0[0] as f32 - amount * pb.0[0] as f32;
        po.0[0] = sharpened.clamp(0.0, 255.0) as u8;
    }
    out
}
