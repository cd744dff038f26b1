//! Output-name cleanup.
//!
//! Output names end up in two places: `{name}-d{id}-part-{i}.tmp` in the
//! scratch directory and `{name}` (or `{stem}(n){ext}`) in the save
//! directory. Both must stay a single path component.

/// Room left for the temp-file suffix under NAME_MAX (255).
const MAX_NAME_BYTES: usize = 200;

/// Reduce `name` to one safe path component. Returns None if nothing usable is left.
pub fn sanitize_output_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = last
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if cleaned.is_empty() {
        return None;
    }

    let mut end = cleaned.len().min(MAX_NAME_BYTES);
    while !cleaned.is_char_boundary(end) {
        end -= 1;
    }
    Some(cleaned[..end].to_string())
}
