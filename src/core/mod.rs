//! Core infrastructure for the OCR pipeline.
//!
//! This module provides the error taxonomy and configuration types shared by
//! every pipeline stage.

pub mod config;
pub mod errors;

pub use config::{ParallelPolicy, PipelineConfig};
pub use errors::{PipelineError, RecognitionError};
