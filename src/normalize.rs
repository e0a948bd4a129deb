//! Script-aware text normalization.
//!
//! Repairs only what the acquisition process itself broke: encoding form,
//! stray format characters, and glyphs the recognizer segmented into
//! spurious standalone tokens. Nothing here guesses at intended words:
//! spelling and vocabulary belong to the downstream AI service.
//!
//! All fixes are local and copy-on-modify: the recognition output is never
//! mutated in place.

use crate::recognition::script::is_khmer_combining_sign;
use crate::recognition::{RecognizedLine, RecognizedWord};
use unicode_normalization::UnicodeNormalization;

/// Khmer coeng: joins a subscript consonant to its base. A word starting
/// with it is the tail of its predecessor, split by the recognizer.
const COENG: char = '\u{17D2}';

/// Normalizes recognized lines: Unicode canonicalization, whitespace and
/// format-character cleanup, and merging of incorrectly segmented Khmer
/// combining marks. Empty lines are dropped.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    merge_gap: u32,
}

impl TextNormalizer {
    /// Creates a normalizer; `merge_gap` is the maximum pixel gap for
    /// rejoining a split glyph to its neighbor.
    pub fn new(merge_gap: u32) -> Self {
        Self { merge_gap }
    }

    /// Returns cleaned copies of `lines`, preserving order.
    pub fn normalize_lines(&self, lines: &[RecognizedLine]) -> Vec<RecognizedLine> {
        lines
            .iter()
            .filter_map(|line| self.normalize_line(line))
            .collect()
    }

    fn normalize_line(&self, line: &RecognizedLine) -> Option<RecognizedLine> {
        let cleaned: Vec<RecognizedWord> = line
            .words
            .iter()
            .filter_map(|word| {
                let text = clean_text(&word.text);
                (!text.is_empty()).then(|| RecognizedWord {
                    text,
                    ..word.clone()
                })
            })
            .collect();

        let merged = self.merge_split_glyphs(cleaned);
        if merged.is_empty() {
            return None;
        }

        let text = merged
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let bbox = merged
            .iter()
            .skip(1)
            .fold(merged[0].bbox, |acc, w| acc.union(&w.bbox));
        let confidence = merged.iter().map(|w| w.confidence).sum::<f32>() / merged.len() as f32;

        Some(RecognizedLine {
            text,
            bbox,
            confidence,
            words: merged,
        })
    }

    /// Merges tokens that are not standalone words: short all-combining-mark
    /// tokens and coeng-led fragments, glued to the adjacent word when the
    /// geometry says they came from one glyph cluster.
    fn merge_split_glyphs(&self, words: Vec<RecognizedWord>) -> Vec<RecognizedWord> {
        let mut merged: Vec<RecognizedWord> = Vec::with_capacity(words.len());
        for word in words {
            let attach = is_glyph_fragment(&word.text)
                && matches!(merged.last(), Some(prev) if self.is_adjacent(prev, &word));
            if attach {
                if let Some(prev) = merged.last_mut() {
                    prev.text.push_str(&word.text);
                    prev.bbox = prev.bbox.union(&word.bbox);
                    prev.confidence = (prev.confidence + word.confidence) / 2.0;
                }
            } else {
                merged.push(word);
            }
        }
        merged
    }

    /// Adjacency test: a small horizontal gap and compatible vertical
    /// alignment. Marks sit on or next to their base glyph; anything further
    /// away is a genuine token.
    fn is_adjacent(&self, prev: &RecognizedWord, word: &RecognizedWord) -> bool {
        let gap = word.bbox.x.saturating_sub(prev.bbox.right());
        if gap > self.merge_gap {
            return false;
        }
        let y_diff = prev.bbox.y.abs_diff(word.bbox.y);
        y_diff <= (prev.bbox.height as f32 * 0.5) as u32
    }
}

/// A token the recognizer should not have emitted on its own: one or two
/// symbols that are all Khmer combining marks, or a fragment starting with
/// the coeng subscript joiner.
fn is_glyph_fragment(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        None => false,
        Some(first) => {
            if first == COENG {
                return true;
            }
            let count = text.chars().count();
            count <= 2 && text.chars().all(is_khmer_combining_sign)
        }
    }
}

/// Canonicalizes one token: NFC form, zero-width/format characters removed,
/// internal space runs collapsed, surrounding whitespace trimmed.
fn clean_text(text: &str) -> String {
    let composed: String = text.nfc().collect();
    let stripped: String = composed
        .chars()
        .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}'))
        .collect();

    let mut out = String::with_capacity(stripped.len());
    let mut last_was_space = false;
    for c in stripped.trim().chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::BoundingBox;
    use crate::recognition::ScriptHint;

    fn word(text: &str, x: u32, width: u32, conf: f32) -> RecognizedWord {
        RecognizedWord {
            text: text.to_string(),
            bbox: BoundingBox::new(x, 100, width, 20),
            confidence: conf,
            script: ScriptHint::Khmer,
            region_id: 0,
        }
    }

    fn line_of(words: Vec<RecognizedWord>) -> RecognizedLine {
        crate::recognition::group_into_lines(words, 0.6)
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn nfc_composes_decomposed_sequences() {
        // e + combining acute accent composes to é.
        assert_eq!(clean_text("cafe\u{0301}"), "café");
    }

    #[test]
    fn zero_width_characters_are_stripped() {
        assert_eq!(clean_text("ab\u{200B}cd\u{FEFF}"), "abcd");
        assert_eq!(clean_text("ក\u{200D}ខ"), "កខ");
    }

    #[test]
    fn space_runs_collapse() {
        assert_eq!(clean_text("  a   b  "), "a b");
    }

    #[test]
    fn orphan_vowel_sign_merges_into_previous_word() {
        let base = word("ព្រក", 10, 40, 0.8);
        let orphan = word("ឹ", 52, 8, 0.6); // 2px gap
        let normalizer = TextNormalizer::new(10);
        let out = normalizer.normalize_lines(&[line_of(vec![base, orphan])]);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].words.len(), 1);
        assert_eq!(out[0].words[0].text, "ព្រកឹ");
        assert!((out[0].words[0].confidence - 0.7).abs() < 1e-6);
        // Merged bbox spans both tokens.
        assert_eq!(out[0].words[0].bbox.right(), 60);
    }

    #[test]
    fn distant_sign_is_not_merged() {
        let base = word("ព្រក", 10, 40, 0.8);
        let orphan = word("ឹ", 80, 8, 0.6); // 30px gap
        let normalizer = TextNormalizer::new(10);
        let out = normalizer.normalize_lines(&[line_of(vec![base, orphan])]);
        assert_eq!(out[0].words.len(), 2);
    }

    #[test]
    fn coeng_fragment_rejoins_its_base() {
        let base = word("ស", 10, 14, 0.9);
        let fragment = word("្រី", 26, 16, 0.7);
        let normalizer = TextNormalizer::new(10);
        let out = normalizer.normalize_lines(&[line_of(vec![base, fragment])]);
        assert_eq!(out[0].words.len(), 1);
        assert_eq!(out[0].words[0].text, "ស្រី");
    }

    #[test]
    fn ordinary_words_are_never_merged() {
        let a = word("មុន", 10, 30, 0.9);
        let b = word("បាយ", 42, 30, 0.9); // 2px gap but a real word
        let normalizer = TextNormalizer::new(10);
        let out = normalizer.normalize_lines(&[line_of(vec![a, b])]);
        assert_eq!(out[0].words.len(), 2);
        assert_eq!(out[0].text, "មុន បាយ");
    }

    #[test]
    fn words_that_clean_to_empty_are_dropped() {
        let a = word("dose", 10, 30, 0.9);
        let b = word("\u{200B}\u{200B}", 45, 5, 0.1);
        let normalizer = TextNormalizer::new(10);
        let out = normalizer.normalize_lines(&[line_of(vec![a, b])]);
        assert_eq!(out[0].words.len(), 1);
        assert_eq!(out[0].text, "dose");
    }

    #[test]
    fn fully_empty_line_is_dropped() {
        let a = word("\u{FEFF}", 10, 5, 0.1);
        let normalizer = TextNormalizer::new(10);
        let out = normalizer.normalize_lines(&[line_of(vec![a])]);
        assert!(out.is_empty());
    }

    #[test]
    fn input_lines_are_not_mutated() {
        let base = word("ព្រក", 10, 40, 0.8);
        let orphan = word("ឹ", 52, 8, 0.6);
        let input = vec![line_of(vec![base, orphan])];
        let normalizer = TextNormalizer::new(10);
        let _ = normalizer.normalize_lines(&input);
        // Copy-on-modify: the originals keep their split tokens.
        assert_eq!(input[0].words.len(), 2);
    }

    #[test]
    fn no_characters_are_invented() {
        // Every output character must come from the input (after NFC);
        // normalization repairs segmentation, never content.
        let tokens = vec![word("Amoxicilline", 10, 90, 0.9), word("ា", 102, 8, 0.5)];
        let input_chars: String = tokens.iter().map(|w| w.text.clone()).collect();
        let normalizer = TextNormalizer::new(10);
        let out = normalizer.normalize_lines(&[line_of(tokens)]);
        for w in &out[0].words {
            for c in w.text.chars() {
                assert!(input_chars.contains(c), "character {c:?} was invented");
            }
        }
    }

    #[test]
    fn glyph_fragment_detection() {
        assert!(is_glyph_fragment("ា"));
        assert!(is_glyph_fragment("ាំ"));
        assert!(is_glyph_fragment("្ក"));
        assert!(!is_glyph_fragment("ាាា")); // three marks: suspicious but kept
        assert!(!is_glyph_fragment("ក"));
        assert!(!is_glyph_fragment("mg"));
        assert!(!is_glyph_fragment(""));
    }
}
