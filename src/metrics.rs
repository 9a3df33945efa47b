//! Text width estimation across scripts.
//!
//! A rendered CJK glyph occupies roughly two Latin advance widths, Arabic
//! sits slightly above Latin. The estimator reduces a string to an
//! "equivalent width" in Latin units so two strings in different scripts
//! become comparable. This is a layout heuristic, not a font metrics engine.

/// Per-script advance width relative to a Latin glyph.
const WIDE_WIDTH: f64 = 2.0;
const ARABIC_WIDTH: f64 = 1.1;
const LATIN_WIDTH: f64 = 1.0;

/// Ratio of target equivalent width to source equivalent width.
///
/// `1.0` means the translated text should occupy about the same box as the
/// source. Empty input on either side yields `1.0` (no adjustment signal).
#[must_use]
pub fn estimate_length_ratio(
    source_text: &str,
    target_text: &str,
    source_lang: &str,
    target_lang: &str,
) -> f64 {
    if source_text.is_empty() || target_text.is_empty() {
        return 1.0;
    }
    let src = equivalent_width(source_text, source_lang);
    let tgt = equivalent_width(target_text, target_lang);
    if src <= 0.0 {
        return 1.0;
    }
    tgt / src
}

/// Sum of per-character widths over non-whitespace characters.
///
/// Characters whose script is recognizable get a fixed width; anything else
/// falls back to the language's average glyph width so that a string of
/// unrecognized punctuation still scales with its language.
#[must_use]
pub fn equivalent_width(text: &str, lang: &str) -> f64 {
    let fallback = average_glyph_width(lang);
    let mut total = 0.0;
    for ch in text.chars() {
        if ch.is_whitespace() {
            continue;
        }
        total += char_width(ch).unwrap_or(fallback);
    }
    total
}

fn char_width(ch: char) -> Option<f64> {
    if is_wide(ch) {
        Some(WIDE_WIDTH)
    } else if is_arabic(ch) {
        Some(ARABIC_WIDTH)
    } else if ch.is_ascii() {
        Some(LATIN_WIDTH)
    } else {
        None
    }
}

/// Average glyph width for script-neutral characters of a language.
#[must_use]
pub fn average_glyph_width(lang: &str) -> f64 {
    let lang = lang.trim().to_ascii_lowercase();
    if lang.starts_with("zh") || lang.starts_with("ja") || lang.starts_with("ko") {
        WIDE_WIDTH
    } else if is_rtl_lang(&lang) {
        ARABIC_WIDTH
    } else {
        LATIN_WIDTH
    }
}

/// Right-to-left language codes the layout adjuster treats specially.
#[must_use]
pub fn is_rtl_lang(lang: &str) -> bool {
    let lang = lang.trim().to_ascii_lowercase();
    lang.starts_with("ar")
        || lang.starts_with("he")
        || lang.starts_with("fa")
        || lang.starts_with("ur")
}

fn is_wide(ch: char) -> bool {
    is_han(ch) || is_kana(ch) || is_hangul(ch) || is_fullwidth(ch)
}

pub fn is_han(ch: char) -> bool {
    let u = ch as u32;
    (0x3400..=0x4DBF).contains(&u)
        || (0x4E00..=0x9FFF).contains(&u)
        || (0xF900..=0xFAFF).contains(&u)
        || (0x20000..=0x2A6DF).contains(&u)
        || (0x2A700..=0x2EBEF).contains(&u)
}

pub fn is_kana(ch: char) -> bool {
    let u = ch as u32;
    (0x3040..=0x309F).contains(&u)
        || (0x30A0..=0x30FF).contains(&u)
        || (0x31F0..=0x31FF).contains(&u)
}

pub fn is_hangul(ch: char) -> bool {
    let u = ch as u32;
    (0xAC00..=0xD7AF).contains(&u)
        || (0x1100..=0x11FF).contains(&u)
        || (0x3130..=0x318F).contains(&u)
}

pub fn is_arabic(ch: char) -> bool {
    let u = ch as u32;
    (0x0600..=0x06FF).contains(&u)
        || (0x0750..=0x077F).contains(&u)
        || (0x08A0..=0x08FF).contains(&u)
        || (0xFB50..=0xFDFF).contains(&u)
        || (0xFE70..=0xFEFF).contains(&u)
}

fn is_fullwidth(ch: char) -> bool {
    let u = ch as u32;
    // CJK punctuation and fullwidth forms.
    (0x3000..=0x303F).contains(&u) || (0xFF00..=0xFF60).contains(&u)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ratio_is_one() {
        for (text, lang) in [
            ("Quarterly results", "en"),
            ("日本語テキスト", "ja"),
            ("ملخص تنفيذي", "ar"),
            ("", "en"),
        ] {
            assert_eq!(estimate_length_ratio(text, text, lang, lang), 1.0);
        }
    }

    #[test]
    fn empty_side_yields_one() {
        assert_eq!(estimate_length_ratio("", "Hello", "ja", "en"), 1.0);
        assert_eq!(estimate_length_ratio("Hello", "", "en", "ja"), 1.0);
    }

    #[test]
    fn ja_to_en_compresses() {
        let r = estimate_length_ratio("日本語テキスト", "Japanese Text", "ja", "en");
        assert!(r < 1.0, "expected compression, got {r}");
    }

    #[test]
    fn en_to_ja_expands() {
        let r = estimate_length_ratio("English Text", "英語テキスト", "en", "ja");
        assert!(r > 1.0, "expected expansion, got {r}");
    }

    #[test]
    fn script_detectors() {
        assert!(is_han('語'));
        assert!(is_kana('テ'));
        assert!(is_hangul('한'));
        assert!(is_arabic('م'));
        assert!(!is_han('a'));
        assert!(!is_arabic('z'));
    }

    #[test]
    fn rtl_language_codes() {
        assert!(is_rtl_lang("ar"));
        assert!(is_rtl_lang("ar-EG"));
        assert!(is_rtl_lang("he"));
        assert!(!is_rtl_lang("en"));
        assert!(!is_rtl_lang("ja"));
    }

    #[test]
    fn neutral_chars_use_language_average() {
        // Curly quotes are script-neutral; in a Japanese string they count wide.
        let ja = equivalent_width("\u{201C}引用\u{201D}", "ja");
        assert_eq!(ja, 8.0);
        let en = equivalent_width("\u{201C}ab\u{201D}", "en");
        assert_eq!(en, 4.0);
    }
}
