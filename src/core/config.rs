//! Configuration for the OCR pipeline.
//!
//! Every empirically tuned threshold in the pipeline lives here rather than
//! being hardcoded at its point of use: the cutoffs were calibrated against a
//! specific camera/DPI range and deployments should be able to re-tune them
//! against their own image corpus. All structs deserialize with per-field
//! defaults, so a partial config file overrides only what it names.

use crate::core::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration aggregating every stage's tunables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Intake validation limits.
    #[serde(default)]
    pub intake: IntakeConfig,
    /// Quality measurement thresholds.
    #[serde(default)]
    pub quality: QualityConfig,
    /// Preprocessing operator parameters.
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    /// Layout and table detection parameters.
    #[serde(default)]
    pub layout: LayoutConfig,
    /// Recognition orchestration parameters.
    #[serde(default)]
    pub recognition: RecognitionConfig,
    /// Confidence aggregation thresholds and weights.
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    /// Parallelism policy for region fan-out.
    #[serde(default)]
    pub parallel: ParallelPolicy,
}

impl PipelineConfig {
    /// Validates the configuration, rejecting values that would make the
    /// pipeline behave nonsensically.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.intake.min_width == 0 || self.intake.min_height == 0 {
            return Err(PipelineError::config(
                "intake minimum dimensions must be positive",
            ));
        }
        if self.quality.blur_threshold_high <= 0.0
            || self.quality.blur_threshold_low <= self.quality.blur_threshold_high
        {
            return Err(PipelineError::config(
                "blur thresholds must satisfy 0 < high < low (low = sharp)",
            ));
        }
        if self.quality.contrast_threshold_low >= self.quality.contrast_threshold_high {
            return Err(PipelineError::config(
                "contrast thresholds must satisfy low < high",
            ));
        }
        if !(0.0..=45.0).contains(&self.quality.deskew_min_angle) {
            return Err(PipelineError::config(
                "deskew_min_angle must lie in [0, 45] degrees",
            ));
        }
        if !(0.0..0.5).contains(&self.layout.header_band_ratio)
            || !(0.0..0.5).contains(&self.layout.footer_band_ratio)
        {
            return Err(PipelineError::config(
                "header/footer band ratios must lie in [0, 0.5)",
            ));
        }
        if self.recognition.retry.max_attempts == 0 {
            return Err(PipelineError::config("retry max_attempts must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.recognition.script_ratio_threshold) {
            return Err(PipelineError::config(
                "script_ratio_threshold must lie in [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence.document_medium_threshold)
            || !(0.0..=1.0).contains(&self.confidence.line_low_threshold)
            || !(0.0..=1.0).contains(&self.confidence.low_line_fraction)
        {
            return Err(PipelineError::config(
                "confidence thresholds must lie in [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Limits applied by the intake validator before any processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeConfig {
    /// Minimum acceptable image width in pixels.
    #[serde(default = "IntakeConfig::default_min_dimension")]
    pub min_width: u32,
    /// Minimum acceptable image height in pixels.
    #[serde(default = "IntakeConfig::default_min_dimension")]
    pub min_height: u32,
    /// Maximum accepted payload size in bytes.
    #[serde(default = "IntakeConfig::default_max_bytes")]
    pub max_bytes: usize,
    /// A frame whose intensity stddev falls below this is a blank candidate.
    #[serde(default = "IntakeConfig::default_blank_stddev")]
    pub blank_stddev: f32,
    /// Mean below this (with low stddev) means an all-black frame.
    #[serde(default = "IntakeConfig::default_blank_dark_mean")]
    pub blank_dark_mean: f32,
    /// Mean above this (with low stddev) means an all-white frame.
    #[serde(default = "IntakeConfig::default_blank_light_mean")]
    pub blank_light_mean: f32,
}

impl IntakeConfig {
    fn default_min_dimension() -> u32 {
        100
    }
    fn default_max_bytes() -> usize {
        50 * 1024 * 1024
    }
    fn default_blank_stddev() -> f32 {
        5.0
    }
    fn default_blank_dark_mean() -> f32 {
        10.0
    }
    fn default_blank_light_mean() -> f32 {
        245.0
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            min_width: Self::default_min_dimension(),
            min_height: Self::default_min_dimension(),
            max_bytes: Self::default_max_bytes(),
            blank_stddev: Self::default_blank_stddev(),
            blank_dark_mean: Self::default_blank_dark_mean(),
            blank_light_mean: Self::default_blank_light_mean(),
        }
    }
}

/// Quality analysis thresholds.
///
/// Blur scores are Laplacian variances: *higher is sharper*, so
/// `blur_threshold_low` (the cutoff for the "low blur" = sharp class) is the
/// larger of the two values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Laplacian variance at or above this is a sharp image ("low" blur).
    #[serde(default = "QualityConfig::default_blur_low")]
    pub blur_threshold_low: f32,
    /// Laplacian variance below this is very blurry ("high" blur).
    #[serde(default = "QualityConfig::default_blur_high")]
    pub blur_threshold_high: f32,
    /// Intensity stddev below this is low contrast.
    #[serde(default = "QualityConfig::default_contrast_low")]
    pub contrast_threshold_low: f32,
    /// Intensity stddev above this suggests over-saturation.
    #[serde(default = "QualityConfig::default_contrast_high")]
    pub contrast_threshold_high: f32,
    /// Noise estimate (MAD of the Laplacian response) above this gates
    /// denoising on.
    #[serde(default = "QualityConfig::default_noise_threshold")]
    pub noise_threshold: f32,
    /// Smallest absolute skew angle worth correcting, in degrees.
    #[serde(default = "QualityConfig::default_deskew_min_angle")]
    pub deskew_min_angle: f32,
    /// Largest skew angle the deskewer will attempt, in degrees.
    #[serde(default = "QualityConfig::default_max_skew_angle")]
    pub max_skew_angle: f32,
    /// Canny low hysteresis threshold for edge extraction.
    #[serde(default = "QualityConfig::default_canny_low")]
    pub canny_low: f32,
    /// Canny high hysteresis threshold for edge extraction.
    #[serde(default = "QualityConfig::default_canny_high")]
    pub canny_high: f32,
    /// Minimum number of consistent near-horizontal lines required before a
    /// skew estimate is trusted; fewer yields 0.0 (no false correction on
    /// sparse input).
    #[serde(default = "QualityConfig::default_min_skew_lines")]
    pub min_skew_lines: usize,
}

impl QualityConfig {
    fn default_blur_low() -> f32 {
        100.0
    }
    fn default_blur_high() -> f32 {
        50.0
    }
    fn default_contrast_low() -> f32 {
        30.0
    }
    fn default_contrast_high() -> f32 {
        200.0
    }
    fn default_noise_threshold() -> f32 {
        10.0
    }
    fn default_deskew_min_angle() -> f32 {
        0.5
    }
    fn default_max_skew_angle() -> f32 {
        45.0
    }
    fn default_canny_low() -> f32 {
        50.0
    }
    fn default_canny_high() -> f32 {
        150.0
    }
    fn default_min_skew_lines() -> usize {
        5
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            blur_threshold_low: Self::default_blur_low(),
            blur_threshold_high: Self::default_blur_high(),
            contrast_threshold_low: Self::default_contrast_low(),
            contrast_threshold_high: Self::default_contrast_high(),
            noise_threshold: Self::default_noise_threshold(),
            deskew_min_angle: Self::default_deskew_min_angle(),
            max_skew_angle: Self::default_max_skew_angle(),
            canny_low: Self::default_canny_low(),
            canny_high: Self::default_canny_high(),
            min_skew_lines: Self::default_min_skew_lines(),
        }
    }
}

/// Preprocessing operator parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Neighborhood radius for locally-adaptive binarization.
    #[serde(default = "PreprocessConfig::default_threshold_radius")]
    pub adaptive_threshold_radius: u32,
    /// Median filter radius for conservative denoising.
    #[serde(default = "PreprocessConfig::default_median_radius")]
    pub denoise_median_radius: u32,
    /// Gaussian sigma used by the unsharp mask.
    #[serde(default = "PreprocessConfig::default_sharpen_sigma")]
    pub sharpen_sigma: f32,
    /// Unsharp mask blend amount (original weighted `1 + amount`,
    /// blurred weighted `-amount`).
    #[serde(default = "PreprocessConfig::default_sharpen_amount")]
    pub sharpen_amount: f32,
    /// Radius of the structuring element for post-binarization cleanup.
    /// Kept small: cleanup must remove speckle without eating thin strokes.
    #[serde(default = "PreprocessConfig::default_morph_radius")]
    pub cleanup_radius: u8,
}

impl PreprocessConfig {
    fn default_threshold_radius() -> u32 {
        7
    }
    fn default_median_radius() -> u32 {
        1
    }
    fn default_sharpen_sigma() -> f32 {
        3.0
    }
    fn default_sharpen_amount() -> f32 {
        0.5
    }
    fn default_morph_radius() -> u8 {
        1
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            adaptive_threshold_radius: Self::default_threshold_radius(),
            denoise_median_radius: Self::default_median_radius(),
            sharpen_sigma: Self::default_sharpen_sigma(),
            sharpen_amount: Self::default_sharpen_amount(),
            cleanup_radius: Self::default_morph_radius(),
        }
    }
}

/// Layout and table detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Minimum pixel area for any text block candidate.
    #[serde(default = "LayoutConfig::default_min_block_area")]
    pub min_block_area: u32,
    /// Table candidates must exceed `min_block_area * table_area_factor`.
    #[serde(default = "LayoutConfig::default_table_area_factor")]
    pub table_area_factor: u32,
    /// Minimum table width in pixels.
    #[serde(default = "LayoutConfig::default_table_min_width")]
    pub table_min_width: u32,
    /// Minimum table height in pixels.
    #[serde(default = "LayoutConfig::default_table_min_height")]
    pub table_min_height: u32,
    /// Line-extraction kernel length is `dimension / line_kernel_divisor`.
    #[serde(default = "LayoutConfig::default_line_kernel_divisor")]
    pub line_kernel_divisor: u32,
    /// Fraction of the page height treated as the header band.
    #[serde(default = "LayoutConfig::default_band_ratio")]
    pub header_band_ratio: f32,
    /// Fraction of the page height treated as the footer band.
    #[serde(default = "LayoutConfig::default_band_ratio")]
    pub footer_band_ratio: f32,
    /// Aspect ratio (w/h) above which a short footer block reads as a
    /// signature.
    #[serde(default = "LayoutConfig::default_signature_aspect")]
    pub signature_min_aspect: f32,
    /// Absolute height cap for signature blocks, in pixels.
    #[serde(default = "LayoutConfig::default_signature_max_height")]
    pub signature_max_height: u32,
    /// Width of the horizontal dilation kernel that fuses glyphs into
    /// line-sized blobs.
    #[serde(default = "LayoutConfig::default_fuse_width")]
    pub text_fuse_width: u32,
    /// Height of the glyph-fusing kernel.
    #[serde(default = "LayoutConfig::default_fuse_height")]
    pub text_fuse_height: u32,
    /// Grid line positions closer than this many pixels merge into one
    /// boundary.
    #[serde(default = "LayoutConfig::default_grid_merge_gap")]
    pub grid_merge_gap: u32,
    /// Fraction of a table's span a projected line must cover to count as a
    /// grid boundary.
    #[serde(default = "LayoutConfig::default_grid_coverage")]
    pub grid_coverage_fraction: f32,
}

impl LayoutConfig {
    fn default_min_block_area() -> u32 {
        100
    }
    fn default_table_area_factor() -> u32 {
        100
    }
    fn default_table_min_width() -> u32 {
        100
    }
    fn default_table_min_height() -> u32 {
        50
    }
    fn default_line_kernel_divisor() -> u32 {
        10
    }
    fn default_band_ratio() -> f32 {
        0.15
    }
    fn default_signature_aspect() -> f32 {
        2.0
    }
    fn default_signature_max_height() -> u32 {
        100
    }
    fn default_fuse_width() -> u32 {
        20
    }
    fn default_fuse_height() -> u32 {
        5
    }
    fn default_grid_merge_gap() -> u32 {
        10
    }
    fn default_grid_coverage() -> f32 {
        0.3
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            min_block_area: Self::default_min_block_area(),
            table_area_factor: Self::default_table_area_factor(),
            table_min_width: Self::default_table_min_width(),
            table_min_height: Self::default_table_min_height(),
            line_kernel_divisor: Self::default_line_kernel_divisor(),
            header_band_ratio: Self::default_band_ratio(),
            footer_band_ratio: Self::default_band_ratio(),
            signature_min_aspect: Self::default_signature_aspect(),
            signature_max_height: Self::default_signature_max_height(),
            text_fuse_width: Self::default_fuse_width(),
            text_fuse_height: Self::default_fuse_height(),
            grid_merge_gap: Self::default_grid_merge_gap(),
            grid_coverage_fraction: Self::default_grid_coverage(),
        }
    }
}

/// Bounded retry policy for transient engine failures.
///
/// Applied uniformly by the orchestrator; never retries a missing-script
/// error, which is not transient.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (must be >= 1).
    #[serde(default = "RetryPolicy::default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between attempts, in milliseconds.
    #[serde(default = "RetryPolicy::default_backoff_ms")]
    pub backoff_ms: u64,
}

impl RetryPolicy {
    fn default_max_attempts() -> u32 {
        2
    }
    fn default_backoff_ms() -> u64 {
        50
    }

    /// Backoff between attempts as a [`Duration`].
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            backoff_ms: Self::default_backoff_ms(),
        }
    }
}

/// Recognition orchestration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Pixel margin added around every region crop before recognition.
    /// Glyphs flush against the box edge would otherwise be clipped.
    #[serde(default = "RecognitionConfig::default_padding")]
    pub region_padding: u32,
    /// Dominant-script ratio above which a second, script-hinted pass runs.
    #[serde(default = "RecognitionConfig::default_script_ratio")]
    pub script_ratio_threshold: f32,
    /// Wall-clock budget for a single engine invocation, in milliseconds.
    #[serde(default = "RecognitionConfig::default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retry policy for transient engine failures.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Words whose vertical centers differ by less than this factor of the
    /// median word height share a line.
    #[serde(default = "RecognitionConfig::default_line_band")]
    pub line_band_factor: f32,
    /// Maximum horizontal gap, in pixels, for merging an orphan combining
    /// mark into its neighboring word during normalization.
    #[serde(default = "RecognitionConfig::default_merge_gap")]
    pub word_merge_gap: u32,
}

impl RecognitionConfig {
    fn default_padding() -> u32 {
        4
    }
    fn default_script_ratio() -> f32 {
        0.5
    }
    fn default_timeout_ms() -> u64 {
        10_000
    }
    fn default_line_band() -> f32 {
        0.6
    }
    fn default_merge_gap() -> u32 {
        10
    }

    /// Per-call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            region_padding: Self::default_padding(),
            script_ratio_threshold: Self::default_script_ratio(),
            timeout_ms: Self::default_timeout_ms(),
            retry: RetryPolicy::default(),
            line_band_factor: Self::default_line_band(),
            word_merge_gap: Self::default_merge_gap(),
        }
    }
}

/// Confidence aggregation thresholds and structural weights.
///
/// Weighting is configuration, not per-document logic: a deployment that
/// cares more about dosage tables than footers raises `table_weight` here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceConfig {
    /// Document confidence below this sets `needs_review`.
    #[serde(default = "ConfidenceConfig::default_medium")]
    pub document_medium_threshold: f32,
    /// Lines below this confidence count toward the low-line fraction.
    #[serde(default = "ConfidenceConfig::default_low")]
    pub line_low_threshold: f32,
    /// `needs_review` triggers when more than this fraction of lines is low.
    #[serde(default = "ConfidenceConfig::default_fraction")]
    pub low_line_fraction: f32,
    /// Weight of lines inside table regions.
    #[serde(default = "ConfidenceConfig::default_table_weight")]
    pub table_weight: f32,
    /// Weight of lines inside footer regions.
    #[serde(default = "ConfidenceConfig::default_footer_weight")]
    pub footer_weight: f32,
    /// Weight of all other lines.
    #[serde(default = "ConfidenceConfig::default_base_weight")]
    pub base_weight: f32,
}

impl ConfidenceConfig {
    fn default_medium() -> f32 {
        0.6
    }
    fn default_low() -> f32 {
        0.4
    }
    fn default_fraction() -> f32 {
        0.3
    }
    fn default_table_weight() -> f32 {
        1.5
    }
    fn default_footer_weight() -> f32 {
        0.5
    }
    fn default_base_weight() -> f32 {
        1.0
    }
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            document_medium_threshold: Self::default_medium(),
            line_low_threshold: Self::default_low(),
            low_line_fraction: Self::default_fraction(),
            table_weight: Self::default_table_weight(),
            footer_weight: Self::default_footer_weight(),
            base_weight: Self::default_base_weight(),
        }
    }
}

/// Parallel processing policy for the recognition fan-out.
///
/// Region recognition calls are independent and dominated by the external
/// engine's cost, so they are dispatched across a bounded rayon pool. Tiny
/// workloads skip the pool entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelPolicy {
    /// Maximum number of worker threads. None uses rayon's default
    /// (typically the number of CPU cores).
    #[serde(default)]
    pub max_threads: Option<usize>,
    /// Region counts at or below this are processed sequentially.
    #[serde(default = "ParallelPolicy::default_sequential_threshold")]
    pub sequential_threshold: usize,
}

impl ParallelPolicy {
    fn default_sequential_threshold() -> usize {
        2
    }

    /// Sets the maximum worker thread count.
    pub fn with_max_threads(mut self, max_threads: Option<usize>) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Installs the global rayon thread pool with the configured size.
    ///
    /// Call once at startup, before the first document is processed. Returns
    /// `Ok(false)` when no explicit size is configured.
    pub fn install_global_thread_pool(&self) -> Result<bool, rayon::ThreadPoolBuildError> {
        if let Some(num_threads) = self.max_threads {
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

impl Default for ParallelPolicy {
    fn default() -> Self {
        Self {
            max_threads: None,
            sequential_threshold: Self::default_sequential_threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn inverted_blur_thresholds_are_rejected() {
        let mut config = PipelineConfig::default();
        config.quality.blur_threshold_low = 10.0;
        config.quality.blur_threshold_high = 100.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_retry_attempts_are_rejected() {
        let mut config = PipelineConfig::default();
        config.recognition.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_confidence_threshold_is_rejected() {
        let mut config = PipelineConfig::default();
        config.confidence.document_medium_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"quality": {"blur_threshold_low": 120.0}}"#).unwrap();
        assert_eq!(config.quality.blur_threshold_low, 120.0);
        assert_eq!(
            config.quality.blur_threshold_high,
            QualityConfig::default().blur_threshold_high
        );
        assert_eq!(config.layout.min_block_area, 100);
    }

    #[test]
    fn retry_backoff_converts_to_duration() {
        let retry = RetryPolicy {
            max_attempts: 3,
            backoff_ms: 25,
        };
        assert_eq!(retry.backoff(), Duration::from_millis(25));
    }
}
