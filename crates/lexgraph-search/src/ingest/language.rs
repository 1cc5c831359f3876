//! Language detection capability.
//!
//! Detection is an optional collaborator: when no detector is configured
//! (or it abstains), chunks fall back to the caller's hint, then to "und".

/// Language code used when neither hint nor detection applies.
pub const UNDETERMINED: &str = "und";

/// Optional language detection capability.
pub trait LanguageDetector: Send + Sync {
    /// Detect the language of `text`, or None to abstain.
    fn detect(&self, text: &str) -> Option<String>;
}

/// Script-range heuristic detector.
///
/// Counts letters per script and applies a few character-level cues to
/// separate Ukrainian from other Cyrillic text. Abstains on short or
/// mixed input.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptDetector;

impl ScriptDetector {
    pub fn new() -> Self {
        Self
    }
}

impl LanguageDetector for ScriptDetector {
    fn detect(&self, text: &str) -> Option<String> {
        let mut latin = 0usize;
        let mut cyrillic = 0usize;
        let mut ukrainian_cues = 0usize;

        for c in text.chars() {
            if c.is_ascii_alphabetic() {
                latin += 1;
            } else if ('\u{0400}'..='\u{04FF}').contains(&c) {
                cyrillic += 1;
                // Letters absent from the Russian alphabet
                if matches!(c, 'і' | 'ї' | 'є' | 'ґ' | 'І' | 'Ї' | 'Є' | 'Ґ') {
                    ukrainian_cues += 1;
                }
            }
        }

        let letters = latin + cyrillic;
        if letters < 4 {
            return None;
        }

        if cyrillic * 2 > letters {
            if ukrainian_cues > 0 {
                Some("uk".to_string())
            } else {
                Some("ru".to_string())
            }
        } else if latin * 2 > letters {
            Some("en".to_string())
        } else {
            None
        }
    }
}

/// Resolve a chunk's language: hint wins, then detection, then "und".
pub fn resolve_language(
    hint: Option<&str>,
    detector: Option<&dyn LanguageDetector>,
    text: &str,
) -> String {
    if let Some(hint) = hint {
        if !hint.trim().is_empty() {
            return hint.trim().to_string();
        }
    }
    detector
        .and_then(|d| d.detect(text))
        .unwrap_or_else(|| UNDETERMINED.to_string())
}
