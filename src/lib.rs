//! rx-ocr: a quality-adaptive OCR pipeline for photographed medical
//! prescriptions mixing Khmer, English and French text.
//!
//! The crate turns a raw photograph into bounding-boxed, confidence-scored,
//! script-aware text blocks ready for downstream AI correction. Processing is
//! a strictly sequential chain of stages, each driven by the output of the
//! previous one:
//!
//! 1. **Intake** ([`intake`]) decodes and validates the image.
//! 2. **Quality analysis** ([`quality`]) measures blur, contrast, skew and
//!    noise, and decides which corrections the image actually needs.
//! 3. **Preprocessing** ([`preprocess`]) applies only the recommended
//!    corrections and produces a grayscale and a binarized working buffer.
//! 4. **Layout detection** ([`layout`]) finds tables, text blocks, headers,
//!    footers, signatures and QR codes from pixel geometry alone.
//! 5. **Recognition** ([`recognition`]) crops each region and drives an
//!    external [`RecognitionEngine`] with script hints, collecting word-level
//!    results with positions and confidences.
//! 6. **Normalization** ([`normalize`]) repairs acquisition artifacts
//!    (encoding, segmentation) without ever guessing at content.
//! 7. **Aggregation** ([`confidence`], [`result`]) combines everything into
//!    an immutable [`DocumentResult`].
//!
//! The character-recognition engine itself is not part of this crate: callers
//! inject any implementation of [`RecognitionEngine`]. The pipeline holds no
//! global mutable state; every request owns its buffers.
//!
//! # Example
//!
//! ```rust,no_run
//! use rx_ocr::{DocumentPipeline, PipelineConfig};
//! use std::sync::Arc;
//!
//! # fn engine() -> Arc<dyn rx_ocr::RecognitionEngine> { unimplemented!() }
//! let pipeline = DocumentPipeline::new(PipelineConfig::default(), engine()).unwrap();
//! let bytes = std::fs::read("prescription.jpg").unwrap();
//! match pipeline.process(&bytes) {
//!     Ok(doc) => println!("{}", doc.raw_text),
//!     Err(err) => eprintln!("rejected: {err}"),
//! }
//! ```

pub mod confidence;
pub mod core;
pub mod intake;
pub mod layout;
pub mod normalize;
pub mod pipeline;
pub mod preprocess;
pub mod processors;
pub mod quality;
pub mod recognition;
pub mod result;

pub use crate::core::config::PipelineConfig;
pub use crate::core::errors::{PipelineError, RecognitionError};
pub use crate::pipeline::{CancelToken, DocumentPipeline};
pub use crate::quality::{EnhanceAction, QualityRecord};
pub use crate::recognition::{EngineWord, RecognitionEngine, ScriptHint};
pub use crate::result::DocumentResult;
