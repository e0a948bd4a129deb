//! The document pipeline: strictly sequential stages per request.
//!
//! One image produces one [`DocumentResult`] through intake → quality →
//! preprocessing → layout → recognition → normalization → aggregation. Each
//! stage depends on the full output of the previous one, so stages never
//! overlap within a request; parallelism lives across requests (every
//! request owns its buffers) and inside the recognition fan-out.
//!
//! The pipeline is an explicitly constructed value owning its configuration
//! and a shared handle to the external recognition engine. There is no
//! global mutable state anywhere in the crate.

use crate::core::config::PipelineConfig;
use crate::core::errors::PipelineError;
use crate::intake::ImageValidator;
use crate::layout::LayoutDetector;
use crate::normalize::TextNormalizer;
use crate::preprocess::Enhancer;
use crate::quality::{QualityAnalyzer, QualityRecord};
use crate::recognition::{
    RecognitionEngine, RecognitionOrchestrator, RegionOutcome, RegionRecognition,
};
use crate::result::{DocumentResult, ImageSize, OutputBuilder};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub use crate::recognition::CancelToken;

/// The quality-adaptive OCR pipeline.
#[derive(Debug)]
pub struct DocumentPipeline {
    validator: ImageValidator,
    analyzer: QualityAnalyzer,
    enhancer: Enhancer,
    detector: LayoutDetector,
    orchestrator: RecognitionOrchestrator,
    normalizer: TextNormalizer,
    builder: OutputBuilder,
}

impl DocumentPipeline {
    /// Builds a pipeline from a validated configuration and the
    /// process-owned recognition engine.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] when the configuration is inconsistent.
    pub fn new(
        config: PipelineConfig,
        engine: Arc<dyn RecognitionEngine>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            validator: ImageValidator::new(config.intake.clone()),
            analyzer: QualityAnalyzer::new(config.quality.clone()),
            enhancer: Enhancer::new(config.preprocess.clone()),
            detector: LayoutDetector::new(config.layout.clone()),
            orchestrator: RecognitionOrchestrator::new(
                config.recognition.clone(),
                config.parallel.clone(),
                engine,
            ),
            normalizer: TextNormalizer::new(config.recognition.word_merge_gap),
            builder: OutputBuilder::new(config.confidence.clone()),
        })
    }

    /// Processes one photographed document end to end.
    pub fn process(&self, bytes: &[u8]) -> Result<DocumentResult, PipelineError> {
        self.process_with_cancel(bytes, &CancelToken::new())
    }

    /// Processes one document, aborting (and discarding partial state) as
    /// soon as `cancel` fires.
    pub fn process_with_cancel(
        &self,
        bytes: &[u8],
        cancel: &CancelToken,
    ) -> Result<DocumentResult, PipelineError> {
        let start = Instant::now();
        let mut stage_times: BTreeMap<String, f64> = BTreeMap::new();

        info!(target: "pipeline", size_bytes = bytes.len(), "processing started");

        let validated = run_stage("intake", &mut stage_times, || {
            self.validator.validate(bytes)
        })?;
        check_cancel(cancel)?;

        let quality = run_stage("quality_analysis", &mut stage_times, || {
            self.analyzer.analyze(
                &validated.gray,
                validated.is_grayscale,
                validated.source_dpi,
            )
        })?;
        check_cancel(cancel)?;

        let enhanced = run_stage("preprocessing", &mut stage_times, || {
            Ok(self.enhancer.enhance(&validated, &quality))
        })?;
        check_cancel(cancel)?;

        let layout = run_stage("layout_analysis", &mut stage_times, || {
            self.detector.detect(&enhanced.binary, &enhanced.gray)
        })?;
        check_cancel(cancel)?;

        let recognitions = run_stage("recognition", &mut stage_times, || {
            self.orchestrator
                .recognize_regions(&enhanced.gray, &layout.regions, cancel)
        })?;

        // Partial failures are tolerated; a fully failed document is not.
        let attempted = recognitions.len();
        if attempted > 0 && recognitions.iter().all(|r| r.outcome.is_failure()) {
            return Err(PipelineError::AllRegionsFailed {
                region_count: attempted,
                stage_times,
            });
        }

        let normalized = run_stage("normalization", &mut stage_times, || {
            Ok(self.normalize(recognitions))
        })?;
        check_cancel(cancel)?;

        let image_size = ImageSize {
            width: validated.width(),
            height: validated.height(),
        };
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let result = self.builder.build(
            &quality,
            &layout,
            &normalized,
            image_size,
            elapsed_ms,
            stage_times,
        );

        info!(
            target: "pipeline",
            elapsed_ms,
            blocks = result.blocks.len(),
            confidence = result.overall_confidence,
            "processing complete"
        );
        Ok(result)
    }

    /// Runs only validation and quality analysis: a cheap preview that lets
    /// a caller advise retaking the photo before paying for recognition.
    pub fn analyze_quality(&self, bytes: &[u8]) -> Result<QualityRecord, PipelineError> {
        let validated = self.validator.validate(bytes)?;
        self.analyzer.analyze(
            &validated.gray,
            validated.is_grayscale,
            validated.source_dpi,
        )
    }

    fn normalize(&self, recognitions: Vec<RegionRecognition>) -> Vec<RegionRecognition> {
        recognitions
            .into_iter()
            .map(|recognition| match recognition.outcome {
                RegionOutcome::Recognized(lines) => RegionRecognition {
                    region_id: recognition.region_id,
                    outcome: RegionOutcome::Recognized(self.normalizer.normalize_lines(&lines)),
                },
                other => RegionRecognition {
                    region_id: recognition.region_id,
                    outcome: other,
                },
            })
            .collect()
    }
}

fn check_cancel(cancel: &CancelToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

fn run_stage<T>(
    name: &str,
    stage_times: &mut BTreeMap<String, f64>,
    f: impl FnOnce() -> Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    let start = Instant::now();
    let result = f();
    let elapsed = start.elapsed().as_secs_f64() * 1000.0;
    stage_times.insert(name.to_string(), elapsed);
    match &result {
        Ok(_) => debug!(target: "pipeline", stage = name, elapsed_ms = elapsed, "stage complete"),
        Err(err) => {
            debug!(target: "pipeline", stage = name, elapsed_ms = elapsed, error = %err, "stage failed")
        }
    }
    result
}
