//! # Stage Definition: Recognition Orchestration
//!
//! This stage is considered "Done" when it fulfills the following contract:
//!
//! - **Inputs**: grayscale working buffer plus the layout's region list; an
//!   external [`RecognitionEngine`] injected at construction.
//! - **Outputs**: one [`RegionRecognition`] per recognizable region, in the
//!   same reading order, each carrying a [`RegionOutcome`].
//! - **Logging**: per-region outcome (word count, script hint or failure).
//! - **Error Behavior**: a timed-out or script-less region becomes a
//!   zero-confidence outcome, never a silent fallback; cancellation aborts
//!   the request.
//! - **Invariants**:
//!     - Every crop is padded before recognition; glyphs flush against the
//!       region edge are never clipped.
//!     - Word coordinates in the output are page coordinates.
//!     - Retries are bounded by the configured policy and never apply to
//!       missing-script errors.

pub mod script;

use crate::core::config::{ParallelPolicy, RecognitionConfig};
use crate::core::errors::{PipelineError, RecognitionError};
use crate::layout::Region;
use crate::processors::BoundingBox;
use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{debug, warn};

pub use script::ScriptHint;

/// A word as returned by the external engine, in crop-local coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineWord {
    /// Recognized text.
    pub text: String,
    /// Position inside the submitted crop.
    pub bbox: BoundingBox,
    /// Engine confidence in [0, 1].
    pub confidence: f32,
}

/// The external character-recognition capability.
///
/// Implementations are constructed once, immutable afterwards, and shared by
/// reference across requests; the orchestrator never mutates or re-creates
/// the engine. Implementations must be safe to call from multiple threads.
pub trait RecognitionEngine: Send + Sync {
    /// Recognizes text in `region`, prioritizing `hint`'s writing system.
    ///
    /// # Errors
    ///
    /// [`RecognitionError::ScriptUnavailable`] when the hinted script's data
    /// is not installed; [`RecognitionError::Engine`] for transient faults.
    fn recognize(
        &self,
        region: &GrayImage,
        hint: ScriptHint,
    ) -> Result<Vec<EngineWord>, RecognitionError>;
}

/// A recognized word in page coordinates.
///
/// Created here and never mutated in place afterwards; the normalizer works
/// on copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizedWord {
    /// Recognized text.
    pub text: String,
    /// Position on the page.
    pub bbox: BoundingBox,
    /// Confidence in [0, 1].
    pub confidence: f32,
    /// Script hint that produced this word.
    pub script: ScriptHint,
    /// Region this word belongs to.
    pub region_id: usize,
}

/// A line of recognized words, left-to-right.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizedLine {
    /// Line text (words joined by single spaces).
    pub text: String,
    /// Union of the word boxes.
    pub bbox: BoundingBox,
    /// Mean of the word confidences.
    pub confidence: f32,
    /// The words, sorted left-to-right.
    pub words: Vec<RecognizedWord>,
}

/// Outcome of recognizing one region. A sum type rather than an exception:
/// partial failures are data, and the document completes around them.
#[derive(Debug, Clone)]
pub enum RegionOutcome {
    /// Words were produced (possibly none, for genuinely empty regions).
    Recognized(Vec<RecognizedLine>),
    /// The engine call exceeded its wall-clock budget.
    TimedOut,
    /// The dominant script's recognition data is not installed.
    ScriptUnavailable(String),
}

impl RegionOutcome {
    /// True for timeouts and missing scripts.
    pub fn is_failure(&self) -> bool {
        !matches!(self, RegionOutcome::Recognized(_))
    }
}

/// Per-region recognition result.
#[derive(Debug, Clone)]
pub struct RegionRecognition {
    /// Region id from layout analysis.
    pub region_id: usize,
    /// What happened.
    pub outcome: RegionOutcome,
}

/// Request-scoped cancellation flag.
///
/// Cancelling discards the request: in-flight region calls are abandoned and
/// no partial result is returned.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Drives the external engine across the detected regions.
pub struct RecognitionOrchestrator {
    config: RecognitionConfig,
    parallel: ParallelPolicy,
    engine: Arc<dyn RecognitionEngine>,
}

impl std::fmt::Debug for RecognitionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionOrchestrator")
            .field("config", &self.config)
            .field("parallel", &self.parallel)
            .field("engine", &"<dyn RecognitionEngine>")
            .finish()
    }
}

impl RecognitionOrchestrator {
    /// Creates an orchestrator borrowing the process-owned engine.
    pub fn new(
        config: RecognitionConfig,
        parallel: ParallelPolicy,
        engine: Arc<dyn RecognitionEngine>,
    ) -> Self {
        Self {
            config,
            parallel,
            engine,
        }
    }

    /// Recognizes every recognizable region.
    ///
    /// Region calls are independent and dominated by the engine's cost, so
    /// they fan out across the rayon pool; workloads at or below the
    /// sequential threshold skip it.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Cancelled`] when the token fires mid-request.
    pub fn recognize_regions(
        &self,
        gray: &GrayImage,
        regions: &[Region],
        cancel: &CancelToken,
    ) -> Result<Vec<RegionRecognition>, PipelineError> {
        let targets: Vec<&Region> = regions.iter().filter(|r| r.is_recognizable()).collect();

        let results: Vec<Result<RegionRecognition, PipelineError>> =
            if targets.len() <= self.parallel.sequential_threshold {
                targets
                    .iter()
                    .map(|region| self.recognize_region(gray, region, cancel))
                    .collect()
            } else {
                targets
                    .par_iter()
                    .map(|region| self.recognize_region(gray, region, cancel))
                    .collect()
            };

        results.into_iter().collect()
    }

    fn recognize_region(
        &self,
        gray: &GrayImage,
        region: &Region,
        cancel: &CancelToken,
    ) -> Result<RegionRecognition, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let padded = region
            .bbox
            .padded(self.config.region_padding, gray.width(), gray.height());
        let crop =
            image::imageops::crop_imm(gray, padded.x, padded.y, padded.width, padded.height)
                .to_image();

        // First pass: broad recognition, no script preference.
        let first = match self.call_engine(&crop, ScriptHint::Any) {
            CallResult::Words(words) => words,
            CallResult::TimedOut => {
                warn!(target: "recognition", region = region.id, "first pass timed out");
                return Ok(RegionRecognition {
                    region_id: region.id,
                    outcome: RegionOutcome::TimedOut,
                });
            }
            CallResult::ScriptUnavailable(script) => {
                return Ok(RegionRecognition {
                    region_id: region.id,
                    outcome: RegionOutcome::ScriptUnavailable(script),
                });
            }
        };

        // Second pass only when a script clearly dominates; an
        // already-confident single-script region is not re-read.
        let combined: String = first
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let (words, hint) = match script::dominant_script(&combined) {
            Some((script, ratio)) if ratio > self.config.script_ratio_threshold => {
                match self.call_engine(&crop, script) {
                    CallResult::Words(second) => (second, script),
                    CallResult::ScriptUnavailable(name) => {
                        // The dominant script cannot be read at all; surface
                        // it rather than pretending the broad pass is fine.
                        return Ok(RegionRecognition {
                            region_id: region.id,
                            outcome: RegionOutcome::ScriptUnavailable(name),
                        });
                    }
                    CallResult::TimedOut => {
                        // The broad pass already produced usable words; keep
                        // them instead of discarding paid-for work.
                        warn!(
                            target: "recognition",
                            region = region.id,
                            script = script.name(),
                            "hinted pass timed out; keeping broad-pass words"
                        );
                        (first, ScriptHint::Any)
                    }
                }
            }
            _ => (first, ScriptHint::Any),
        };

        debug!(
            target: "recognition",
            region = region.id,
            words = words.len(),
            hint = hint.name(),
            "region recognized"
        );

        let words = to_page_words(words, &padded, hint, region.id);
        let lines = group_into_lines(words, self.config.line_band_factor);
        Ok(RegionRecognition {
            region_id: region.id,
            outcome: RegionOutcome::Recognized(lines),
        })
    }

    /// One engine invocation with timeout and the bounded retry policy.
    /// Only transient engine faults are retried; a missing script is
    /// permanent and a timeout has already consumed the region's budget.
    fn call_engine(&self, crop: &GrayImage, hint: ScriptHint) -> CallResult {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match run_with_timeout(
                Arc::clone(&self.engine),
                crop.clone(),
                hint,
                self.config.timeout(),
            ) {
                Some(Ok(words)) => return CallResult::Words(words),
                Some(Err(RecognitionError::ScriptUnavailable { script })) => {
                    return CallResult::ScriptUnavailable(script);
                }
                Some(Err(RecognitionError::Engine { message })) => {
                    if attempt >= self.config.retry.max_attempts {
                        warn!(
                            target: "recognition",
                            attempts = attempt,
                            error = %message,
                            "engine failed after retries"
                        );
                        return CallResult::TimedOut;
                    }
                    std::thread::sleep(self.config.retry.backoff());
                }
                None => return CallResult::TimedOut,
            }
        }
    }
}

enum CallResult {
    Words(Vec<EngineWord>),
    TimedOut,
    ScriptUnavailable(String),
}

/// Runs one engine call on a worker thread, abandoning it on timeout. The
/// engine is shared behind an `Arc`, so an abandoned call finishes (or
/// fails) on its own without blocking the pipeline.
fn run_with_timeout(
    engine: Arc<dyn RecognitionEngine>,
    crop: GrayImage,
    hint: ScriptHint,
    timeout: Duration,
) -> Option<Result<Vec<EngineWord>, RecognitionError>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = engine.recognize(&crop, hint);
        let _ = tx.send(result);
    });
    rx.recv_timeout(timeout).ok()
}

/// Translates crop-local engine words into page-coordinate words.
fn to_page_words(
    words: Vec<EngineWord>,
    crop_origin: &BoundingBox,
    script: ScriptHint,
    region_id: usize,
) -> Vec<RecognizedWord> {
    words
        .into_iter()
        .filter(|w| !w.text.trim().is_empty())
        .map(|w| RecognizedWord {
            text: w.text,
            bbox: w.bbox.translate(crop_origin.x, crop_origin.y),
            confidence: w.confidence.clamp(0.0, 1.0),
            script,
            region_id,
        })
        .collect()
}

/// Groups words into lines by coarse vertical band and sorts each line
/// left-to-right. A line's confidence is the mean of its words'.
pub(crate) fn group_into_lines(
    mut words: Vec<RecognizedWord>,
    band_factor: f32,
) -> Vec<RecognizedLine> {
    if words.is_empty() {
        return Vec::new();
    }

    let mut heights: Vec<u32> = words.iter().map(|w| w.bbox.height).collect();
    heights.sort_unstable();
    let median_height = heights[heights.len() / 2].max(1);
    let band = (median_height as f32 * band_factor).max(1.0);

    words.sort_by_key(|w| (w.bbox.center_y(), w.bbox.x));

    let mut lines: Vec<Vec<RecognizedWord>> = Vec::new();
    let mut current: Vec<RecognizedWord> = Vec::new();
    let mut anchor_y = 0f32;
    for word in words {
        let center = word.bbox.center_y() as f32;
        if current.is_empty() || (center - anchor_y).abs() <= band {
            if current.is_empty() {
                anchor_y = center;
            }
            current.push(word);
        } else {
            lines.push(std::mem::take(&mut current));
            anchor_y = center;
            current.push(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }

    lines
        .into_iter()
        .map(|mut line_words| {
            line_words.sort_by_key(|w| w.bbox.x);
            let text = line_words
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let bbox = line_words
                .iter()
                .skip(1)
                .fold(line_words[0].bbox, |acc, w| acc.union(&w.bbox));
            let confidence = line_words.iter().map(|w| w.confidence).sum::<f32>()
                / line_words.len() as f32;
            RecognizedLine {
                text,
                bbox,
                confidence,
                words: line_words,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::RegionKind;
    use image::Luma;
    use std::sync::Mutex;

    /// Scriptable engine for tests: replays canned responses and records
    /// the hints it was called with.
    struct MockEngine {
        responses: Mutex<Vec<Result<Vec<EngineWord>, RecognitionError>>>,
        hints: Mutex<Vec<ScriptHint>>,
        delay: Option<Duration>,
    }

    impl MockEngine {
        fn replay(responses: Vec<Result<Vec<EngineWord>, RecognitionError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                hints: Mutex::new(Vec::new()),
                delay: None,
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(Vec::new()),
                hints: Mutex::new(Vec::new()),
                delay: Some(delay),
            })
        }
    }

    impl RecognitionEngine for MockEngine {
        fn recognize(
            &self,
            _region: &GrayImage,
            hint: ScriptHint,
        ) -> Result<Vec<EngineWord>, RecognitionError> {
            self.hints.lock().unwrap().push(hint);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
                return Ok(Vec::new());
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(Vec::new())
            } else {
                responses.remove(0)
            }
        }
    }

    fn word(text: &str, x: u32, y: u32, w: u32, h: u32, conf: f32) -> EngineWord {
        EngineWord {
            text: text.to_string(),
            bbox: BoundingBox::new(x, y, w, h),
            confidence: conf,
        }
    }

    fn body_region(id: usize, bbox: BoundingBox) -> Region {
        Region {
            id,
            kind: RegionKind::BodyText,
            bbox,
            confidence: 0.7,
            children: Vec::new(),
            grid: None,
        }
    }

    fn orchestrator(engine: Arc<dyn RecognitionEngine>) -> RecognitionOrchestrator {
        RecognitionOrchestrator::new(
            RecognitionConfig::default(),
            ParallelPolicy::default(),
            engine,
        )
    }

    fn page() -> GrayImage {
        GrayImage::from_pixel(400, 400, Luma([220]))
    }

    #[test]
    fn single_script_region_gets_a_hinted_second_pass() {
        let engine = MockEngine::replay(vec![
            Ok(vec![word("Paracetamol", 2, 2, 60, 10, 0.7)]),
            Ok(vec![word("Paracetamol", 2, 2, 60, 10, 0.95)]),
        ]);
        let orch = orchestrator(engine.clone());
        let regions = vec![body_region(0, BoundingBox::new(50, 50, 100, 20))];
        let results = orch
            .recognize_regions(&page(), &regions, &CancelToken::new())
            .unwrap();

        assert_eq!(results.len(), 1);
        let hints = engine.hints.lock().unwrap().clone();
        assert_eq!(hints, vec![ScriptHint::Any, ScriptHint::Latin]);
        match &results[0].outcome {
            RegionOutcome::Recognized(lines) => {
                assert_eq!(lines.len(), 1);
                assert_eq!(lines[0].text, "Paracetamol");
                assert!((lines[0].confidence - 0.95).abs() < 1e-6);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn digits_only_region_skips_the_second_pass() {
        let engine = MockEngine::replay(vec![Ok(vec![word("12345", 2, 2, 30, 10, 0.8)])]);
        let orch = orchestrator(engine.clone());
        let regions = vec![body_region(0, BoundingBox::new(50, 50, 100, 20))];
        let _ = orch
            .recognize_regions(&page(), &regions, &CancelToken::new())
            .unwrap();
        assert_eq!(engine.hints.lock().unwrap().len(), 1);
    }

    #[test]
    fn timeout_becomes_a_recorded_outcome_not_an_error() {
        let engine = MockEngine::slow(Duration::from_millis(200));
        let mut config = RecognitionConfig::default();
        config.timeout_ms = 20;
        let orch =
            RecognitionOrchestrator::new(config, ParallelPolicy::default(), engine);
        let regions = vec![body_region(0, BoundingBox::new(50, 50, 100, 20))];
        let results = orch
            .recognize_regions(&page(), &regions, &CancelToken::new())
            .unwrap();
        assert!(matches!(results[0].outcome, RegionOutcome::TimedOut));
    }

    #[test]
    fn script_unavailable_is_surfaced_typed() {
        let engine = MockEngine::replay(vec![Err(RecognitionError::ScriptUnavailable {
            script: "khmer".to_string(),
        })]);
        let orch = orchestrator(engine);
        let regions = vec![body_region(0, BoundingBox::new(50, 50, 100, 20))];
        let results = orch
            .recognize_regions(&page(), &regions, &CancelToken::new())
            .unwrap();
        match &results[0].outcome {
            RegionOutcome::ScriptUnavailable(script) => assert_eq!(script, "khmer"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn transient_engine_error_is_retried_within_budget() {
        let engine = MockEngine::replay(vec![
            Err(RecognitionError::Engine {
                message: "transient".to_string(),
            }),
            Ok(vec![word("ok", 2, 2, 10, 10, 0.9)]),
            // Response for the hinted second pass the Latin text triggers.
            Ok(vec![word("ok", 2, 2, 10, 10, 0.9)]),
        ]);
        let orch = orchestrator(engine.clone());
        let regions = vec![body_region(0, BoundingBox::new(50, 50, 100, 20))];
        let results = orch
            .recognize_regions(&page(), &regions, &CancelToken::new())
            .unwrap();
        assert!(matches!(
            results[0].outcome,
            RegionOutcome::Recognized(ref lines) if !lines.is_empty()
        ));
        // One failed attempt plus the retry (digits-free "ok" text also
        // triggers a hinted pass afterwards).
        assert!(engine.hints.lock().unwrap().len() >= 2);
    }

    #[test]
    fn cancelled_request_aborts_with_typed_error() {
        let engine = MockEngine::replay(vec![]);
        let orch = orchestrator(engine);
        let cancel = CancelToken::new();
        cancel.cancel();
        let regions = vec![body_region(0, BoundingBox::new(50, 50, 100, 20))];
        let err = orch
            .recognize_regions(&page(), &regions, &cancel)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[test]
    fn words_are_translated_to_page_coordinates() {
        let crop_origin = BoundingBox::new(46, 46, 108, 28);
        let words = to_page_words(
            vec![word("a", 10, 5, 8, 10, 0.9)],
            &crop_origin,
            ScriptHint::Latin,
            3,
        );
        assert_eq!(words[0].bbox, BoundingBox::new(56, 51, 8, 10));
        assert_eq!(words[0].region_id, 3);
    }

    #[test]
    fn confidence_is_clamped_to_unit_interval() {
        let crop_origin = BoundingBox::new(0, 0, 100, 100);
        let words = to_page_words(
            vec![word("a", 0, 0, 5, 5, 1.7), word("b", 10, 0, 5, 5, -0.2)],
            &crop_origin,
            ScriptHint::Any,
            0,
        );
        assert_eq!(words[0].confidence, 1.0);
        assert_eq!(words[1].confidence, 0.0);
    }

    #[test]
    fn line_grouping_splits_vertical_bands_and_sorts_left_to_right() {
        let mk = |text: &str, x, y, conf| RecognizedWord {
            text: text.to_string(),
            bbox: BoundingBox::new(x, y, 20, 10),
            confidence: conf,
            script: ScriptHint::Latin,
            region_id: 0,
        };
        let words = vec![
            mk("world", 40, 10, 0.8),
            mk("hello", 10, 11, 0.6),
            mk("second", 10, 40, 1.0),
        ];
        let lines = group_into_lines(words, 0.6);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "hello world");
        assert!((lines[0].confidence - 0.7).abs() < 1e-6);
        assert_eq!(lines[1].text, "second");
    }

    #[test]
    fn empty_word_list_produces_no_lines() {
        assert!(group_into_lines(Vec::new(), 0.6).is_empty());
    }
}
