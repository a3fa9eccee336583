use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonicalizes user input and entity names for comparison.
///
/// Lower-cases, strips diacritics (canonical decomposition with combining
/// marks dropped), trims, and collapses whitespace runs into one space.
/// Never fails: blank input yields an empty string.
///
/// Lower-casing runs before decomposition because some lower-case mappings
/// (`İ` → `i̇`) introduce combining marks of their own; doing it first keeps
/// the function idempotent.
pub fn normalize(raw: &str) -> String {
    let stripped: String = raw
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();

    let mut out = String::with_capacity(stripped.len());
    for word in stripped.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}
