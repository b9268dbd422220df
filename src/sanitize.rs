//! Filename derivation for untrusted item titles.

/// Name used when a title is missing or sanitizes down to nothing usable.
pub const FALLBACK_NAME: &str = "untitled";

/// Derives a filesystem-safe name from an item title.
///
/// Every character outside `[a-z0-9.\- ]` (case-insensitive) becomes a space,
/// then leading/trailing spaces are dropped. Titles that are empty or reduce
/// to a bare dot sequence fall back to [`FALLBACK_NAME`] so the result is a
/// valid path component everywhere. Sanitizing an already-sanitized name is a
/// no-op.
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| if is_allowed(c) { c } else { ' ' })
        .collect();
    let trimmed = replaced.trim_matches(' ');
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        return FALLBACK_NAME.to_owned();
    }
    trimmed.to_owned()
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ' ')
}
