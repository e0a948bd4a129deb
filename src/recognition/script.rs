//! Script detection from recognized text.
//!
//! The recognition engine accepts a script hint; this module picks one by
//! analyzing which Unicode blocks the characters of a broad first pass fall
//! into. It also provides the per-line language tag carried in the output
//! for the downstream AI service.

use serde::{Deserialize, Serialize};

/// Khmer Unicode block.
const KHMER_START: u32 = 0x1780;
const KHMER_END: u32 = 0x17FF;

/// A hint telling the recognition capability which writing system to
/// prioritize. English and French share the Latin script; the finer split
/// happens per line in the output, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptHint {
    /// No preference; the engine considers all installed scripts.
    Any,
    /// Khmer script.
    Khmer,
    /// Latin script.
    Latin,
}

impl ScriptHint {
    /// Lowercase name used in logs and error payloads.
    pub fn name(&self) -> &'static str {
        match self {
            ScriptHint::Any => "any",
            ScriptHint::Khmer => "khmer",
            ScriptHint::Latin => "latin",
        }
    }
}

/// True for code points in the Khmer block.
pub fn is_khmer(c: char) -> bool {
    (KHMER_START..=KHMER_END).contains(&(c as u32))
}

/// Khmer dependent vowels, diacritic signs and the coeng subscript marker:
/// the characters a recognizer may emit as spurious standalone tokens.
pub fn is_khmer_combining_sign(c: char) -> bool {
    matches!(c as u32, 0x17B6..=0x17D3)
}

/// Analyzes text and returns the dominant script with its ratio among
/// script-classifiable characters. Digits and punctuation don't vote.
pub fn dominant_script(text: &str) -> Option<(ScriptHint, f32)> {
    let mut khmer = 0usize;
    let mut latin = 0usize;
    for c in text.chars() {
        if is_khmer(c) {
            khmer += 1;
        } else if c.is_alphabetic() {
            latin += 1;
        }
    }
    let total = khmer + latin;
    if total == 0 {
        return None;
    }
    if khmer >= latin {
        Some((ScriptHint::Khmer, khmer as f32 / total as f32))
    } else {
        Some((ScriptHint::Latin, latin as f32 / total as f32))
    }
}

/// Per-line language tag for the output contract: `kh`, `fr` or `en`.
///
/// French is separated from English only by accented characters; plain
/// ASCII text tags as English. Lines without letters get no tag.
pub fn line_language(text: &str) -> Option<&'static str> {
    let mut khmer = 0usize;
    let mut latin = 0usize;
    let mut accented = false;
    for c in text.chars() {
        if is_khmer(c) {
            khmer += 1;
        } else if c.is_alphabetic() {
            latin += 1;
            if "àâäéèêëïîôùûüÿœæç".contains(c.to_ascii_lowercase()) {
                accented = true;
            }
        }
    }
    let total = khmer + latin;
    if total == 0 {
        return None;
    }
    if khmer * 2 > total {
        Some("kh")
    } else if accented {
        Some("fr")
    } else {
        Some("en")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn khmer_block_membership() {
        assert!(is_khmer('ក'));
        assert!(is_khmer('ា'));
        assert!(!is_khmer('a'));
        assert!(!is_khmer('é'));
    }

    #[test]
    fn combining_signs_are_a_subset_of_khmer() {
        assert!(is_khmer_combining_sign('ា'));
        assert!(is_khmer_combining_sign('្'));
        assert!(!is_khmer_combining_sign('ក'));
        assert!(!is_khmer_combining_sign('x'));
    }

    #[test]
    fn dominant_script_khmer_text() {
        let (script, ratio) = dominant_script("ថ្នាំពេទ្យ").unwrap();
        assert_eq!(script, ScriptHint::Khmer);
        assert!(ratio > 0.9);
    }

    #[test]
    fn dominant_script_latin_text() {
        let (script, ratio) = dominant_script("Paracetamol 500mg").unwrap();
        assert_eq!(script, ScriptHint::Latin);
        assert!((ratio - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn dominant_script_mixed_leans_to_majority() {
        let (script, ratio) = dominant_script("ថ្នាំ Paracetamol ព្រឹកល្ងាច").unwrap();
        assert_eq!(script, ScriptHint::Khmer);
        assert!(ratio < 1.0);
    }

    #[test]
    fn digits_only_text_has_no_dominant_script() {
        assert!(dominant_script("123 456 - -").is_none());
    }

    #[test]
    fn line_language_tags() {
        assert_eq!(line_language("ព្រឹក ១ គ្រាប់"), Some("kh"));
        assert_eq!(line_language("take one tablet"), Some("en"));
        assert_eq!(line_language("après le repas"), Some("fr"));
        assert_eq!(line_language("1 - 2 - 3"), None);
    }
}
