//! Citation lookup over a record's retained excerpt.

/// Characters of context kept on each side of a match.
pub const CONTEXT_CHARS: usize = 100;

/// Find `query` in `excerpt` (case-insensitive) and return the match with up
/// to [`CONTEXT_CHARS`] characters of surrounding text.
///
/// Returns `None` for an empty query or when nothing matches.
pub fn find_citation(excerpt: &str, query: &str) -> Option<String> {
    let needle: Vec<char> = query.trim().chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return None;
    }

    let chars: Vec<char> = excerpt.chars().collect();
    let (start, len) = (0..chars.len())
        .find_map(|start| match_len(&chars[start..], &needle).map(|len| (start, len)))?;

    let from = start.saturating_sub(CONTEXT_CHARS);
    let to = (start + len + CONTEXT_CHARS).min(chars.len());
    Some(chars[from..to].iter().collect())
}

/// Number of haystack chars consumed if `haystack` starts with `needle`
/// (compared lowercase), else `None`.
fn match_len(haystack: &[char], needle: &[char]) -> Option<usize> {
    let mut wanted = needle.iter();
    let mut pending = wanted.next()?;
    for (consumed, c) in haystack.iter().enumerate() {
        for lower in c.to_lowercase() {
            if lower != *pending {
                return None;
            }
            match wanted.next() {
                Some(next) => pending = next,
                None => return Some(consumed + 1),
            }
        }
    }
    None
}
