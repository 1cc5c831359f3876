//! Text normalization and chunk fingerprinting.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Separator between language and content inside the fingerprint preimage.
const FINGERPRINT_SEPARATOR: u8 = 0x1f;

/// Normalize raw document text: Unicode NFC, control characters stripped,
/// whitespace runs collapsed to single spaces, ends trimmed.
pub fn normalize_text(text: &str) -> String {
    let nfc: String = text.nfc().collect();

    let mut out = String::with_capacity(nfc.len());
    let mut pending_space = false;
    for c in nfc.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if c.is_control() {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }
    out
}

/// Stable fingerprint of a normalized chunk:
/// `sha256(language ‖ 0x1f ‖ normalized_content)`, hex-encoded.
///
/// Identical (language, content) pairs always coalesce to one node.
pub fn chunk_fingerprint(language: &str, normalized_content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(language.as_bytes());
    hasher.update([FINGERPRINT_SEPARATOR]);
    hasher.update(normalized_content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(normalize_text("hello   world"), "hello world");
        assert_eq!(normalize_text("  a\n\tb  "), "a b");
        assert_eq!(normalize_text("\n\n"), "");
    }

    #[test]
    fn test_strips_control_characters() {
        assert_eq!(normalize_text("he\u{0000}llo\u{0007}"), "hello");
    }

    #[test]
    fn test_nfc_composition() {
        // "é" as 'e' + combining acute composes to a single code point
        let decomposed = "e\u{0301}";
        let normalized = normalize_text(decomposed);
        assert_eq!(normalized, "\u{00e9}");
    }

    #[test]
    fn test_cyrillic_passthrough() {
        assert_eq!(
            normalize_text("Україна  розвиває  штучний інтелект."),
            "Україна розвиває штучний інтелект."
        );
    }

    #[test]
    fn test_fingerprint_is_stable_and_language_scoped() {
        let a = chunk_fingerprint("uk", "текст");
        let b = chunk_fingerprint("uk", "текст");
        let c = chunk_fingerprint("en", "текст");
        let d = chunk_fingerprint("uk", "інший текст");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }
}
