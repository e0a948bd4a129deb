//! Confidence aggregation.
//!
//! Combines per-line confidences into one explainable document-level score
//! and the needs-review flag. Structural weighting (tables over footers)
//! comes from configuration, never from per-document logic.

use crate::core::config::ConfidenceConfig;
use crate::layout::RegionKind;
use serde::{Deserialize, Serialize};

/// Document-level confidence verdict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DocumentConfidence {
    /// Weighted mean of line confidences, in [0, 1].
    pub overall: f32,
    /// True when the result should not be trusted without human inspection.
    pub needs_review: bool,
}

/// Computes document confidence from line confidences and their structural
/// context.
#[derive(Debug, Clone)]
pub struct ConfidenceAggregator {
    config: ConfidenceConfig,
}

impl ConfidenceAggregator {
    /// Creates an aggregator with the given thresholds and weights.
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    /// Aggregates `(region kind, line confidence)` pairs.
    ///
    /// `needs_review` is set when any of these hold:
    /// - the weighted document confidence falls below the medium threshold;
    /// - more than the configured fraction of lines falls below the low
    ///   threshold;
    /// - any line inside a table falls below the medium threshold on its
    ///   own (dosage rows are structurally critical).
    pub fn aggregate(&self, lines: &[(RegionKind, f32)]) -> DocumentConfidence {
        if lines.is_empty() {
            return DocumentConfidence {
                overall: 0.0,
                needs_review: true,
            };
        }

        let mut weighted_sum = 0.0f64;
        let mut weight_total = 0.0f64;
        let mut low_lines = 0usize;
        let mut critical_low = false;

        for &(kind, confidence) in lines {
            let confidence = confidence.clamp(0.0, 1.0);
            let weight = self.weight_for(kind) as f64;
            weighted_sum += confidence as f64 * weight;
            weight_total += weight;

            if confidence < self.config.line_low_threshold {
                low_lines += 1;
            }
            if matches!(kind, RegionKind::Table | RegionKind::TableCell)
                && confidence < self.config.document_medium_threshold
            {
                critical_low = true;
            }
        }

        let overall = if weight_total > 0.0 {
            (weighted_sum / weight_total) as f32
        } else {
            0.0
        }
        .clamp(0.0, 1.0);

        let low_fraction = low_lines as f32 / lines.len() as f32;
        let needs_review = overall < self.config.document_medium_threshold
            || low_fraction > self.config.low_line_fraction
            || critical_low;

        DocumentConfidence {
            overall,
            needs_review,
        }
    }

    fn weight_for(&self, kind: RegionKind) -> f32 {
        match kind {
            RegionKind::Table | RegionKind::TableCell => self.config.table_weight,
            RegionKind::Footer | RegionKind::Signature => self.config.footer_weight,
            RegionKind::Header | RegionKind::BodyText | RegionKind::MachineCode => {
                self.config.base_weight
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> ConfidenceAggregator {
        ConfidenceAggregator::new(ConfidenceConfig::default())
    }

    #[test]
    fn empty_document_needs_review_at_zero_confidence() {
        let verdict = aggregator().aggregate(&[]);
        assert_eq!(verdict.overall, 0.0);
        assert!(verdict.needs_review);
    }

    #[test]
    fn confident_document_passes() {
        let lines = vec![
            (RegionKind::Header, 0.9),
            (RegionKind::BodyText, 0.85),
            (RegionKind::BodyText, 0.92),
        ];
        let verdict = aggregator().aggregate(&lines);
        assert!(verdict.overall > 0.8);
        assert!(!verdict.needs_review);
    }

    #[test]
    fn needs_review_below_medium_threshold_is_a_property() {
        // Any document whose weighted confidence lands below the medium
        // threshold must be flagged, whatever the mix of lines.
        let fixtures = vec![
            vec![(RegionKind::BodyText, 0.5)],
            vec![(RegionKind::Header, 0.59), (RegionKind::BodyText, 0.55)],
            vec![(RegionKind::Footer, 0.1), (RegionKind::BodyText, 0.58)],
        ];
        for lines in fixtures {
            let verdict = aggregator().aggregate(&lines);
            if verdict.overall < ConfidenceConfig::default().document_medium_threshold {
                assert!(verdict.needs_review, "unflagged at {}", verdict.overall);
            }
        }
    }

    #[test]
    fn low_line_fraction_triggers_review_despite_good_mean() {
        // Two very confident lines and two very poor ones: the mean can sit
        // above medium while 50% of lines are unreliable.
        let lines = vec![
            (RegionKind::BodyText, 1.0),
            (RegionKind::BodyText, 1.0),
            (RegionKind::BodyText, 0.3),
            (RegionKind::BodyText, 0.3),
        ];
        let verdict = aggregator().aggregate(&lines);
        assert!(verdict.overall >= 0.6);
        assert!(verdict.needs_review);
    }

    #[test]
    fn weak_table_line_triggers_review_alone() {
        let lines = vec![
            (RegionKind::BodyText, 0.95),
            (RegionKind::BodyText, 0.95),
            (RegionKind::BodyText, 0.95),
            (RegionKind::Table, 0.5),
        ];
        let verdict = aggregator().aggregate(&lines);
        assert!(verdict.needs_review);
    }

    #[test]
    fn table_lines_weigh_more_than_footers() {
        let table_doc = aggregator().aggregate(&[
            (RegionKind::Table, 0.9),
            (RegionKind::Footer, 0.2),
        ]);
        let footer_doc = aggregator().aggregate(&[
            (RegionKind::Table, 0.2),
            (RegionKind::Footer, 0.9),
        ]);
        assert!(table_doc.overall > footer_doc.overall);
    }

    #[test]
    fn overall_confidence_stays_in_unit_interval() {
        let lines = vec![
            (RegionKind::BodyText, 3.0),  // out-of-range inputs get clamped
            (RegionKind::Table, -1.0),
            (RegionKind::Header, 0.7),
        ];
        let verdict = aggregator().aggregate(&lines);
        assert!((0.0..=1.0).contains(&verdict.overall));
    }

    #[test]
    fn zero_confidence_region_keeps_document_alive() {
        // A timed-out region contributes a zero-confidence line; the
        // document still aggregates rather than erroring.
        let lines = vec![(RegionKind::BodyText, 0.0), (RegionKind::BodyText, 0.9)];
        let verdict = aggregator().aggregate(&lines);
        assert!(verdict.needs_review);
        assert!(verdict.overall > 0.0);
    }
}
