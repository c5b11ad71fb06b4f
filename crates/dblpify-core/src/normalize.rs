//! Canonicalization of free text (titles, author lists) before comparison.
//!
//! Local BibTeX entries and dblp records disagree on punctuation, case and
//! typesetting escapes. [`normalize`] maps both sides onto lowercase ASCII
//! letters separated by single spaces.

use deunicode::deunicode_char;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// LaTeX spellings of the ring-above "a": `\aa`, `\r{a}`, `\r a` (either case).
static RING_A_LOWER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\aa|\\r\s*\{\s*a\s*\}|\\r\s+a\b").unwrap());
static RING_A_UPPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\AA|\\r\s*\{\s*A\s*\}|\\r\s+A\b").unwrap());

/// Phrase dropped from titles; dblp lists the paper without it.
const EXTENDED_ABSTRACT: &str = "extended abstract";

/// Strip accents and transliterate other scripts to the closest ASCII spelling.
///
/// Characters NFKD reduces to an ASCII base keep that base; combining marks
/// are dropped; everything else (`ø`, `ß`, Cyrillic, Greek, CJK) goes through
/// `deunicode`'s transliteration tables.
fn fold_to_ascii(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.nfkd() {
        if c.is_ascii() {
            out.push(c);
        } else if !is_combining_mark(c) {
            out.push_str(deunicode_char(c).unwrap_or(""));
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a title or author string for comparison.
///
/// Steps (order matters):
/// 1. Replace LaTeX escapes for "å"/"Å" with "a"/"A"
/// 2. Fold accented characters and other scripts to ASCII
/// 3. Replace hyphens with spaces
/// 4. Drop everything that is neither a letter nor whitespace
/// 5. Lowercase
/// 6. Collapse whitespace runs
/// 7. Remove "extended abstract" (repeated until gone)
/// 8. Trim
pub fn normalize(text: &str) -> String {
    let text = RING_A_LOWER.replace_all(text, "a");
    let text = RING_A_UPPER.replace_all(&text, "A");

    let text = fold_to_ascii(&text).replace('-', " ");

    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    let mut text = collapse_whitespace(&kept);
    // Removing the phrase can splice a new occurrence together or leave a
    // double space behind, so loop until stable.
    while text.contains(EXTENDED_ABSTRACT) {
        text = collapse_whitespace(&text.replace(EXTENDED_ABSTRACT, ""));
    }
    text.trim().to_string()
}
