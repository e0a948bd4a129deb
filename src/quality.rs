//! # Stage Definition: Quality Analysis
//!
//! This stage is considered "Done" when it fulfills the following contract:
//!
//! - **Inputs**: validated grayscale buffer (read-only; never mutated).
//! - **Outputs**: [`QualityRecord`] with measured blur, contrast, skew and
//!   noise, plus the set of recommended corrective actions.
//! - **Logging**: one summary event per analysis with all scores.
//! - **Error Behavior**: fails only on the fatal-blur condition; every other
//!   quality state is advisory.
//! - **Invariants**:
//!     - `recommended_actions` is a pure function of the measured fields.
//!     - Skew is reported as 0.0 when too few consistent lines exist.
//!     - Scores are computed on the input as-is; no preprocessing happens
//!       before measurement.

use crate::core::config::QualityConfig;
use crate::core::errors::PipelineError;
use image::GrayImage;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::hough::{detect_lines, LineDetectionOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Blur classification. `Low` means little blur, i.e. a sharp image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlurLevel {
    Low,
    Medium,
    High,
}

/// Contrast classification. `High` signals possible over-saturation, not a
/// desirable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContrastLevel {
    Low,
    Ok,
    High,
}

/// A corrective action the preprocessor may apply. The enhancer applies
/// exactly the recommended set, nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhanceAction {
    Deskew,
    Denoise,
    EnhanceContrast,
    Sharpen,
}

/// Measured quality profile of an input image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityRecord {
    /// Laplacian variance; higher is sharper.
    pub blur_score: f32,
    /// Classified blur level.
    pub blur: BlurLevel,
    /// Intensity standard deviation.
    pub contrast_score: f32,
    /// Classified contrast level.
    pub contrast: ContrastLevel,
    /// Estimated page skew in degrees, clamped to ±45°.
    pub skew_angle: f32,
    /// Resolution from container metadata, when known.
    pub estimated_dpi: Option<u32>,
    /// True when the source image had a single channel.
    pub is_grayscale: bool,
    /// Robust noise estimate (MAD of the Laplacian response).
    pub noise_level: f32,
    /// Corrections the preprocessor should apply, derived deterministically
    /// from the fields above.
    pub recommended_actions: BTreeSet<EnhanceAction>,
}

impl QualityRecord {
    /// True when preprocessing has nothing to do.
    pub fn needs_no_enhancement(&self) -> bool {
        self.recommended_actions.is_empty()
    }
}

/// Measures image quality and decides how aggressive preprocessing should
/// be. Never mutates the buffer it is given.
#[derive(Debug, Clone)]
pub struct QualityAnalyzer {
    config: QualityConfig,
}

impl QualityAnalyzer {
    /// Creates an analyzer with the given thresholds.
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Analyzes `gray` and produces a [`QualityRecord`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::TooBlurry`] when the image is so blurry that
    /// no downstream stage could produce trustworthy output: blur classified
    /// `High` with a raw score below half the high threshold.
    pub fn analyze(
        &self,
        gray: &GrayImage,
        is_grayscale: bool,
        estimated_dpi: Option<u32>,
    ) -> Result<QualityRecord, PipelineError> {
        let laplacian = laplacian_response(gray);

        let blur_score = variance(&laplacian);
        let blur = self.classify_blur(blur_score);

        let contrast_score = intensity_stddev(gray);
        let contrast = self.classify_contrast(contrast_score);

        let skew_angle = self.detect_skew(gray);
        let noise_level = noise_mad(&laplacian);

        info!(
            target: "quality",
            blur = ?blur,
            blur_score,
            contrast = ?contrast,
            contrast_score,
            skew_angle,
            noise_level,
            "quality analysis complete"
        );

        // Fail fast on unusable input; everything milder is advisory.
        if blur == BlurLevel::High && blur_score < self.config.blur_threshold_high / 2.0 {
            return Err(PipelineError::TooBlurry {
                blur_score,
                threshold: self.config.blur_threshold_high,
            });
        }

        let fatal_candidate = blur == BlurLevel::High;
        let recommended_actions = self.recommend(
            blur,
            contrast,
            skew_angle,
            noise_level,
            fatal_candidate,
        );

        Ok(QualityRecord {
            blur_score,
            blur,
            contrast_score,
            contrast,
            skew_angle,
            estimated_dpi,
            is_grayscale,
            noise_level,
            recommended_actions,
        })
    }

    fn classify_blur(&self, score: f32) -> BlurLevel {
        if score >= self.config.blur_threshold_low {
            BlurLevel::Low
        } else if score >= self.config.blur_threshold_high {
            BlurLevel::Medium
        } else {
            BlurLevel::High
        }
    }

    fn classify_contrast(&self, score: f32) -> ContrastLevel {
        if score < self.config.contrast_threshold_low {
            ContrastLevel::Low
        } else if score > self.config.contrast_threshold_high {
            ContrastLevel::High
        } else {
            ContrastLevel::Ok
        }
    }

    /// Derives the corrective action set. Pure in the measured values: same
    /// metrics, same recommendations.
    fn recommend(
        &self,
        blur: BlurLevel,
        contrast: ContrastLevel,
        skew_angle: f32,
        noise_level: f32,
        blur_is_high: bool,
    ) -> BTreeSet<EnhanceAction> {
        let mut actions = BTreeSet::new();
        if skew_angle.abs() > self.config.deskew_min_angle
            && skew_angle.abs() <= self.config.max_skew_angle
        {
            actions.insert(EnhanceAction::Deskew);
        }
        if contrast == ContrastLevel::Low {
            actions.insert(EnhanceAction::EnhanceContrast);
        }
        if noise_level > self.config.noise_threshold {
            actions.insert(EnhanceAction::Denoise);
        }
        if blur == BlurLevel::Medium || blur_is_high {
            actions.insert(EnhanceAction::Sharpen);
        }
        actions
    }

    /// Estimates page skew from the median deviation of near-horizontal
    /// Hough lines. Returns 0.0 when fewer than the configured number of
    /// consistent lines exist; sparse input must not trigger a rotation.
    fn detect_skew(&self, gray: &GrayImage) -> f32 {
        let blurred = gaussian_blur_f32(gray, 2.0);
        let edges = canny(&blurred, self.config.canny_low, self.config.canny_high);

        // Vote threshold scales with resolution so detection behaves the
        // same across camera DPI ranges.
        let diagonal =
            ((gray.width() as f64).powi(2) + (gray.height() as f64).powi(2)).sqrt();
        let options = LineDetectionOptions {
            vote_threshold: (diagonal * 0.2).max(60.0) as u32,
            suppression_radius: 8,
        };
        let lines = detect_lines(&edges, options);

        // A polar line's angle is the direction of its normal: a horizontal
        // line has angle 90. Deviation from 90 is the page skew.
        let mut deviations: Vec<f32> = lines
            .iter()
            .filter_map(|line| {
                let deviation = line.angle_in_degrees as f32 - 90.0;
                (deviation.abs() < 45.0).then_some(deviation)
            })
            .collect();

        if deviations.len() < self.config.min_skew_lines {
            debug!(
                target: "quality",
                line_count = deviations.len(),
                "too few consistent lines for a skew estimate"
            );
            return 0.0;
        }

        deviations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = deviations[deviations.len() / 2];
        median.clamp(-45.0, 45.0)
    }
}

/// 3x3 Laplacian response over the whole frame, one value per interior
/// pixel. Used for both the blur score (variance) and the noise estimate
/// (median absolute deviation).
fn laplacian_response(gray: &GrayImage) -> Vec<f32> {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(((width - 2) * (height - 2)) as usize);
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = gray.get_pixel(x, y).0[0] as f32;
            let up = gray.get_pixel(x, y - 1).0[0] as f32;
            let down = gray.get_pixel(x, y + 1).0[0] as f32;
            let left = gray.get_pixel(x - 1, y).0[0] as f32;
            let right = gray.get_pixel(x + 1, y).0[0] as f32;
            out.push(up + down + left + right - 4.0 * center);
        }
    }
    out
}

fn variance(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean: f64 = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var: f64 = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    var as f32
}

fn intensity_stddev(gray: &GrayImage) -> f32 {
    let n = (gray.width() as u64 * gray.height() as u64) as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean: f64 = gray.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n;
    let var: f64 = gray
        .pixels()
        .map(|p| {
            let d = p.0[0] as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    var.sqrt() as f32
}

/// Robust noise estimate: median absolute deviation of the Laplacian
/// response, scaled by the usual 0.6745 normal-consistency constant.
fn noise_mad(laplacian: &[f32]) -> f32 {
    if laplacian.is_empty() {
        return 0.0;
    }
    let mut magnitudes: Vec<f32> = laplacian.iter().map(|v| v.abs()).collect();
    magnitudes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    magnitudes[magnitudes.len() / 2] / 0.6745
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn analyzer() -> QualityAnalyzer {
        QualityAnalyzer::new(QualityConfig::default())
    }

    /// Sharp checkerboard: strong edges everywhere.
    fn sharp_image(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    /// Gentle gradient: almost no second-derivative response.
    fn flat_image(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, _| Luma([(x % 2 + 120) as u8]))
    }

    #[test]
    fn sharp_image_classifies_low_blur() {
        let record = analyzer().analyze(&sharp_image(128), true, None).unwrap();
        assert_eq!(record.blur, BlurLevel::Low);
        assert!(record.blur_score >= QualityConfig::default().blur_threshold_low);
        assert!(!record.recommended_actions.contains(&EnhanceAction::Sharpen));
    }

    #[test]
    fn very_flat_image_is_fatal_blurry() {
        let err = analyzer()
            .analyze(&flat_image(128), true, None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::TooBlurry { .. }));
    }

    #[test]
    fn medium_blur_recommends_sharpen() {
        // Blur score between the two thresholds: widen the threshold window
        // instead of trying to synthesize an exactly-medium image.
        let mut config = QualityConfig::default();
        config.blur_threshold_high = 0.1;
        config.blur_threshold_low = 1.0e9;
        let analyzer = QualityAnalyzer::new(config);
        let record = analyzer.analyze(&sharp_image(128), true, None).unwrap();
        assert_eq!(record.blur, BlurLevel::Medium);
        assert!(record.recommended_actions.contains(&EnhanceAction::Sharpen));
    }

    #[test]
    fn checkerboard_has_high_contrast() {
        let record = analyzer().analyze(&sharp_image(128), true, None).unwrap();
        assert_eq!(record.contrast, ContrastLevel::Ok);
        assert!(record.contrast_score > 100.0);
    }

    #[test]
    fn low_contrast_recommends_enhancement() {
        let mut config = QualityConfig::default();
        // Keep the blur gate out of the way for this fixture.
        config.blur_threshold_high = 0.0001;
        config.blur_threshold_low = 0.001;
        let analyzer = QualityAnalyzer::new(config);
        let record = analyzer.analyze(&flat_image(128), true, None).unwrap();
        assert_eq!(record.contrast, ContrastLevel::Low);
        assert!(record
            .recommended_actions
            .contains(&EnhanceAction::EnhanceContrast));
    }

    #[test]
    fn sparse_input_reports_zero_skew() {
        // A uniform frame has no lines at all; the estimate must be 0.0,
        // not a spurious correction.
        let gray = GrayImage::from_pixel(128, 128, Luma([200]));
        assert_eq!(analyzer().detect_skew(&gray), 0.0);
    }

    #[test]
    fn recommendations_are_pure_in_the_metrics() {
        let analyzer = analyzer();
        let a = analyzer.recommend(BlurLevel::Low, ContrastLevel::Low, 12.0, 2.0, false);
        let b = analyzer.recommend(BlurLevel::Low, ContrastLevel::Low, 12.0, 2.0, false);
        assert_eq!(a, b);
    }

    #[test]
    fn skewed_low_contrast_scenario_recommends_deskew_and_contrast_only() {
        // A tilted, washed-out photo needs exactly {deskew, enhance_contrast}:
        // no sharpen, no denoise.
        let analyzer = analyzer();
        let actions = analyzer.recommend(BlurLevel::Low, ContrastLevel::Low, 12.0, 2.0, false);
        assert!(actions.contains(&EnhanceAction::Deskew));
        assert!(actions.contains(&EnhanceAction::EnhanceContrast));
        assert!(!actions.contains(&EnhanceAction::Sharpen));
        assert!(!actions.contains(&EnhanceAction::Denoise));
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn tiny_skew_is_not_corrected() {
        let actions = analyzer().recommend(BlurLevel::Low, ContrastLevel::Ok, 0.3, 2.0, false);
        assert!(!actions.contains(&EnhanceAction::Deskew));
    }

    #[test]
    fn extreme_skew_is_not_corrected() {
        // Beyond the correction range rotation would do more harm than good.
        let mut config = QualityConfig::default();
        config.max_skew_angle = 45.0;
        let analyzer = QualityAnalyzer::new(config);
        let actions = analyzer.recommend(BlurLevel::Low, ContrastLevel::Ok, 46.0, 2.0, false);
        assert!(!actions.contains(&EnhanceAction::Deskew));
    }

    #[test]
    fn noise_above_threshold_recommends_denoise() {
        let actions = analyzer().recommend(BlurLevel::Low, ContrastLevel::Ok, 0.0, 11.0, false);
        assert!(actions.contains(&EnhanceAction::Denoise));
    }

    #[test]
    fn noise_mad_of_constant_signal_is_zero() {
        assert_eq!(noise_mad(&[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn quality_record_serializes_levels_lowercase() {
        let record = analyzer().analyze(&sharp_image(128), false, Some(300)).unwrap();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"blur\":\"low\""));
        assert!(json.contains("\"estimated_dpi\":300"));
    }
}
