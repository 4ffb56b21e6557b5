//! Pure string-matching helpers for terminology validation.
//!
//! Everything here is a deterministic function of its inputs, which keeps
//! the threshold logic trivial to test without a loaded reference table.

/// Similarity above which two descriptions are considered the same
pub(crate) const MATCH_THRESHOLD: f64 = 0.8;

/// Similarity above which two descriptions are considered related
pub(crate) const SIMILAR_THRESHOLD: f64 = 0.6;

/// Normalize text for comparison: trimmed and lowercased
pub(crate) fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Normalized edit-distance similarity between two strings.
///
/// Case-insensitive, symmetric, 1.0 for identical inputs (including two
/// empty strings), 0.0 for fully dissimilar ones.
pub(crate) fn similarity_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize(a), &normalize(b))
}

/// Classify a similarity score into (matches, note)
pub(crate) fn classify_similarity(similarity: f64) -> (bool, &'static str) {
    if similarity > MATCH_THRESHOLD {
        (true, "Descriptions match")
    } else if similarity > SIMILAR_THRESHOLD {
        (false, "Descriptions are similar")
    } else {
        (false, "Descriptions do not match")
    }
}

/// The portion of a code before the first `.` separator.
///
/// Codes without a separator are their own prefix.
pub(crate) fn code_prefix(code: &str) -> &str {
    match code.find('.') {
        Some(index) => &code[..index],
        None => code,
    }
}
