//! Error types for the OCR pipeline.
//!
//! The taxonomy follows how far processing got before failing:
//!
//! - **Rejection errors** fail before any processing begins (malformed or
//!   undersized input). No partial result exists.
//! - **Fatal quality errors** fail after quality analysis only, and carry the
//!   measured metrics so a caller can advise the user to retake the photo.
//! - **Systemic errors** abort a document mid-pipeline (every region failed,
//!   or a structural invariant was violated) and carry the partial
//!   stage-timing trace for diagnostics.
//!
//! Per-region recognition failures (timeout, missing script data) are *not*
//! errors at this level: they are recorded in place as zero-confidence
//! regions and the document completes (see [`crate::recognition`]).

use std::collections::BTreeMap;
use thiserror::Error;

/// Errors surfaced by the document pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The image bytes could not be decoded at all.
    #[error("image could not be decoded")]
    ImageCorrupted(#[source] image::ImageError),

    /// The image decoded into a format outside the allow-list.
    #[error("unsupported image format: {format}")]
    UnsupportedFormat {
        /// The detected format name.
        format: String,
    },

    /// The image dimensions are below the configured minimum.
    #[error("image too small: {width}x{height} (minimum {min_width}x{min_height})")]
    ImageTooSmall {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },

    /// The input byte payload exceeds the configured cap.
    #[error("image too large: {size_bytes} bytes (maximum {max_bytes})")]
    ImageTooLarge { size_bytes: usize, max_bytes: usize },

    /// The frame is uniformly black or white; there is nothing to read.
    #[error("image appears blank (mean {mean:.1}, stddev {stddev:.1})")]
    BlankImage { mean: f32, stddev: f32 },

    /// The image is too blurry for any recognition to be trustworthy.
    ///
    /// Raised only when the blur classification is `High` *and* the raw
    /// score falls below half the high threshold; everything milder is
    /// advisory and handled by preprocessing instead.
    #[error("image too blurry for reliable OCR (score {blur_score:.1}, threshold {threshold:.1})")]
    TooBlurry { blur_score: f32, threshold: f32 },

    /// Every region's recognition call failed; no usable text exists.
    #[error("recognition failed for all {region_count} regions")]
    AllRegionsFailed {
        region_count: usize,
        /// Per-stage wall time collected before the failure, for diagnostics.
        stage_times: BTreeMap<String, f64>,
    },

    /// A structural invariant was violated (e.g. a zero-area region).
    #[error("invalid region: {message}")]
    InvalidRegion { message: String },

    /// The request was cancelled mid-pipeline; partial state was discarded.
    #[error("request cancelled")]
    Cancelled,

    /// A configuration value is out of range or inconsistent.
    #[error("configuration: {message}")]
    Config { message: String },
}

impl PipelineError {
    /// Creates a configuration error from anything stringable.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True for rejection-class errors raised before any processing began.
    /// These carry no partial result by construction.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ImageCorrupted(_)
                | Self::UnsupportedFormat { .. }
                | Self::ImageTooSmall { .. }
                | Self::ImageTooLarge { .. }
                | Self::BlankImage { .. }
        )
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(error: image::ImageError) -> Self {
        Self::ImageCorrupted(error)
    }
}

/// Errors raised by the external recognition capability.
///
/// The orchestrator never converts these into silent fallbacks: a missing
/// script pack is surfaced per region as a typed outcome so callers must
/// explicitly opt into degraded operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecognitionError {
    /// The requested script's recognition data is not installed.
    #[error("script data not available: {script}")]
    ScriptUnavailable {
        /// Name of the missing script (e.g. "khmer").
        script: String,
    },

    /// Any other engine-side failure; treated as transient and retried
    /// within the configured retry budget.
    #[error("recognition engine: {message}")]
    Engine { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_classification() {
        let err = PipelineError::ImageTooSmall {
            width: 40,
            height: 40,
            min_width: 100,
            min_height: 100,
        };
        assert!(err.is_rejection());

        let err = PipelineError::TooBlurry {
            blur_score: 12.0,
            threshold: 50.0,
        };
        assert!(!err.is_rejection());

        let err = PipelineError::AllRegionsFailed {
            region_count: 3,
            stage_times: BTreeMap::new(),
        };
        assert!(!err.is_rejection());
    }

    #[test]
    fn error_messages_carry_measurements() {
        let err = PipelineError::TooBlurry {
            blur_score: 12.3,
            threshold: 50.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("12.3"));
        assert!(msg.contains("50.0"));
    }

    #[test]
    fn script_unavailable_names_the_script() {
        let err = RecognitionError::ScriptUnavailable {
            script: "khmer".to_string(),
        };
        assert!(err.to_string().contains("khmer"));
    }
}
