//! The document result: the pipeline's single output contract.
//!
//! This is the exact shape handed (JSON-serialized) to the downstream AI
//! correction service. Everything the later stages might need is preserved:
//! bounding boxes, per-line confidences, language tags, table structure and
//! the quality profile. The result is built once per request and never
//! mutated afterwards.

use crate::confidence::ConfidenceAggregator;
use crate::core::config::ConfidenceConfig;
use crate::layout::{LayoutAnalysis, QrCode, Region, RegionKind, TableGrid};
use crate::processors::BoundingBox;
use crate::quality::{BlurLevel, ContrastLevel, QualityRecord};
use crate::recognition::script::line_language;
use crate::recognition::{RecognizedLine, RegionOutcome, RegionRecognition};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// Processing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingMeta {
    /// Language tags observed in the document (`kh`, `en`, `fr`), sorted.
    pub languages: Vec<String>,
    /// Source resolution, when known.
    pub dpi: Option<u32>,
    /// Total wall time in milliseconds.
    pub processing_time_ms: f64,
    /// Per-stage wall times in milliseconds.
    pub stage_times: BTreeMap<String, f64>,
    /// Input dimensions in pixels.
    pub image_size: ImageSize,
}

/// Input image dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Quality metrics in the output contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySummary {
    pub blur: BlurLevel,
    pub blur_score: f32,
    pub contrast: ContrastLevel,
    pub contrast_score: f32,
    pub skew_angle: f32,
    pub dpi: Option<u32>,
    pub is_grayscale: bool,
}

impl From<&QualityRecord> for QualitySummary {
    fn from(record: &QualityRecord) -> Self {
        Self {
            blur: record.blur,
            blur_score: record.blur_score,
            contrast: record.contrast,
            contrast_score: record.contrast_score,
            skew_angle: record.skew_angle,
            dpi: record.estimated_dpi,
            is_grayscale: record.is_grayscale,
        }
    }
}

/// A recognized, normalized text line in the output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextLine {
    pub text: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// `kh`, `en` or `fr`; absent for lines without letters.
    pub language: Option<String>,
    /// Additive hints for the AI service (`time_candidate`,
    /// `quantity_candidate`, `medicine_candidate`). Tags never modify text.
    pub tags: Vec<String>,
}

/// One table cell. Cells with no detected content are present with empty
/// text rather than omitted, so the grid is always fully addressable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCell {
    pub row: usize,
    pub col: usize,
    pub text: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Recovered table structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStructure {
    pub row_count: usize,
    pub column_count: usize,
    pub cells: Vec<TableCell>,
}

/// A structural block with its recognized text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Structural classification.
    #[serde(rename = "type")]
    pub kind: RegionKind,
    pub bbox: BoundingBox,
    pub lines: Vec<TextLine>,
    /// Mean line confidence; 0.0 for failed or empty regions.
    pub confidence: f32,
    /// Present for table blocks with a recovered grid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<TableStructure>,
    /// Block text, lines joined by newlines.
    pub raw_text: String,
}

/// The immutable result of processing one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResult {
    pub meta: ProcessingMeta,
    pub quality: QualitySummary,
    pub qr_codes: Vec<QrCode>,
    /// Blocks in reading order.
    pub blocks: Vec<Block>,
    /// All block texts concatenated in reading order, blank-line separated.
    /// Never reordered downstream.
    pub raw_text: String,
    pub overall_confidence: f32,
    pub needs_review: bool,
}

impl fmt::Display for DocumentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Document: {}x{} px, {} blocks, {} QR codes",
            self.meta.image_size.width,
            self.meta.image_size.height,
            self.blocks.len(),
            self.qr_codes.len()
        )?;
        writeln!(
            f,
            "Confidence: {:.3}{}",
            self.overall_confidence,
            if self.needs_review {
                " (needs review)"
            } else {
                ""
            }
        )?;
        for block in &self.blocks {
            writeln!(
                f,
                "  [{:?}] {} lines, confidence {:.3}",
                block.kind,
                block.lines.len(),
                block.confidence
            )?;
        }
        Ok(())
    }
}

/// Assembles the final [`DocumentResult`] from the stage outputs.
#[derive(Debug)]
pub struct OutputBuilder {
    aggregator: ConfidenceAggregator,
}

impl OutputBuilder {
    /// Creates a builder with the given confidence policy.
    pub fn new(config: ConfidenceConfig) -> Self {
        Self {
            aggregator: ConfidenceAggregator::new(config),
        }
    }

    /// Builds the result. `recognitions` carry the normalized lines for each
    /// recognized region; regions without an entry were not recognizable.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        quality: &QualityRecord,
        layout: &LayoutAnalysis,
        recognitions: &[RegionRecognition],
        image_size: ImageSize,
        processing_time_ms: f64,
        stage_times: BTreeMap<String, f64>,
    ) -> DocumentResult {
        let by_region: BTreeMap<usize, &RegionOutcome> = recognitions
            .iter()
            .map(|r| (r.region_id, &r.outcome))
            .collect();

        let mut blocks = Vec::new();
        let mut any_failed = false;
        // Regions are already in reading order; blocks inherit it.
        for region in &layout.regions {
            if region.kind == RegionKind::MachineCode {
                continue;
            }
            let outcome = by_region.get(&region.id);
            let block = match outcome {
                Some(RegionOutcome::Recognized(lines)) => self.build_block(region, lines),
                Some(RegionOutcome::TimedOut) | Some(RegionOutcome::ScriptUnavailable(_)) => {
                    any_failed = true;
                    self.build_block(region, &[])
                }
                None => self.build_block(region, &[]),
            };
            blocks.push(block);
        }

        let raw_text = blocks
            .iter()
            .filter(|b| !b.raw_text.is_empty())
            .map(|b| b.raw_text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let scored: Vec<(RegionKind, f32)> = blocks
            .iter()
            .flat_map(|block| {
                block
                    .lines
                    .iter()
                    .map(move |line| (block.kind, line.confidence))
            })
            .collect();
        let mut verdict = self.aggregator.aggregate(&scored);
        // Any failed region forces review, however well the rest reads.
        if any_failed {
            verdict.needs_review = true;
        }

        let mut languages: Vec<String> = blocks
            .iter()
            .flat_map(|b| b.lines.iter())
            .filter_map(|l| l.language.clone())
            .collect();
        languages.sort();
        languages.dedup();

        info!(
            target: "pipeline",
            blocks = blocks.len(),
            confidence = verdict.overall,
            needs_review = verdict.needs_review,
            "document result assembled"
        );

        DocumentResult {
            meta: ProcessingMeta {
                languages,
                dpi: quality.estimated_dpi,
                processing_time_ms,
                stage_times,
                image_size,
            },
            quality: QualitySummary::from(quality),
            qr_codes: layout.qr_codes.clone(),
            blocks,
            raw_text,
            overall_confidence: verdict.overall,
            needs_review: verdict.needs_review,
        }
    }

    fn build_block(&self, region: &Region, lines: &[RecognizedLine]) -> Block {
        let text_lines: Vec<TextLine> = lines
            .iter()
            .map(|line| TextLine {
                text: line.text.clone(),
                bbox: line.bbox,
                confidence: line.confidence.clamp(0.0, 1.0),
                language: line_language(&line.text).map(str::to_string),
                tags: semantic_tags(&line.text),
            })
            .collect();

        let confidence = if text_lines.is_empty() {
            0.0
        } else {
            text_lines.iter().map(|l| l.confidence).sum::<f32>() / text_lines.len() as f32
        };

        let table = region
            .grid
            .as_ref()
            .map(|grid| build_table(grid, lines));

        let raw_text = text_lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Block {
            kind: region.kind,
            bbox: region.bbox,
            lines: text_lines,
            confidence,
            table,
            raw_text,
        }
    }
}

/// Builds the cell matrix for a table: every grid cell is emitted, each
/// holding the text of the lines whose centers fall inside it. Cell content
/// that is only dashes is a drawn "empty" marker, not text.
fn build_table(grid: &TableGrid, lines: &[RecognizedLine]) -> TableStructure {
    let row_count = grid.row_count();
    let column_count = grid.col_count();

    let mut content: BTreeMap<(usize, usize), (Vec<String>, Vec<f32>)> = BTreeMap::new();
    for line in lines {
        // Assign word-by-word: one visual line often spans several columns.
        for word in &line.words {
            if let Some((row, col)) = grid.cell_at(word.bbox.center_x(), word.bbox.center_y()) {
                let entry = content.entry((row, col)).or_default();
                entry.0.push(word.text.clone());
                entry.1.push(word.confidence);
            }
        }
    }

    let mut cells = Vec::with_capacity(row_count * column_count);
    for row in 0..row_count {
        for col in 0..column_count {
            let bbox = grid
                .cell_rect(row, col)
                .unwrap_or(BoundingBox::new(0, 0, 0, 0));
            let (text, confidence) = match content.get(&(row, col)) {
                Some((texts, confs)) => {
                    let joined = texts.join(" ");
                    let conf = confs.iter().sum::<f32>() / confs.len() as f32;
                    if is_dash_marker(&joined) {
                        (String::new(), conf)
                    } else {
                        (joined, conf)
                    }
                }
                None => (String::new(), 0.0),
            };
            cells.push(TableCell {
                row,
                col,
                text,
                bbox,
                confidence,
            });
        }
    }

    TableStructure {
        row_count,
        column_count,
        cells,
    }
}

/// True when cell content is only dash-like marks (the conventional way an
/// empty dose slot is drawn on prescription charts).
fn is_dash_marker(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| matches!(c, '-' | '–' | '—' | '_' | ' '))
}

static TIME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    // Khmer dose-timing words: morning, evening, night, day/noon,
    // before/after meal.
    Regex::new(r"ព្រឹក|ល្ងាច|យប់|ថ្ងៃ|មុន\s*បាយ|ក្រោយ\s*បាយ").expect("static pattern")
});

static QUANTITY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\d+\s*(គ្រាប់|ស្លាបព្រា|mg|ml|tab|cap)").expect("static pattern")
});

static MEDICINE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][a-z]+(?:ol|in|ine|ide|ate|cin|fen)e?\b").expect("static pattern")
});

/// Semantic hints for the AI service. Purely additive: tags point at lines
/// worth attention, they never change or remove anything.
fn semantic_tags(text: &str) -> Vec<String> {
    let mut tags = Vec::new();
    if TIME_PATTERN.is_match(text) {
        tags.push("time_candidate".to_string());
    }
    if QUANTITY_PATTERN.is_match(text) {
        tags.push("quantity_candidate".to_string());
    }
    if MEDICINE_PATTERN.is_match(text) {
        tags.push("medicine_candidate".to_string());
    }
    tags
}
