use lazy_static::lazy_static;
use regex::Regex;

use crate::shared::constants::MAX_FILENAME_LENGTH;

lazy_static! {
    /// Runs of whitespace inside a filename, collapsed to a single space
    /// - "claim   form.pdf" -> "claim form.pdf"
    pub static ref WHITESPACE_RUN_REGEX: Regex = Regex::new(r"\s+").unwrap();

    /// Characters that are never kept in a stored filename
    /// - control characters and reserved Windows characters
    pub static ref UNSAFE_FILENAME_CHARS_REGEX: Regex =
        Regex::new(r#"[\x00-\x1f\x7f<>:"|?*]"#).unwrap();
}

/// Reduce a client supplied filename to a safe, single path component.
///
/// Directory components are dropped (both `/` and `\` separators), unsafe
/// characters removed, whitespace collapsed and the result capped at
/// [`MAX_FILENAME_LENGTH`] bytes. Returns `None` when nothing usable is left.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    let cleaned = UNSAFE_FILENAME_CHARS_REGEX.replace_all(base, "");
    let collapsed = WHITESPACE_RUN_REGEX.replace_all(&cleaned, " ");
    let trimmed = collapsed.trim();

    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return None;
    }

    let mut end = trimmed.len().min(MAX_FILENAME_LENGTH);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }

    Some(trimmed[..end].to_string())
}
