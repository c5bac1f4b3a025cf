//! Glob-style key pattern matching
//!
//! `*` matches any run of characters; every other regex metacharacter is
//! treated literally. The full key must match.

/// Match a key against a glob pattern
pub fn glob_match(pattern: &str, key: &str) -> bool {
    // Split on '*' and match the literal segments in order, anchored at
    // both ends.
    let segments: Vec<&str> = pattern.split('*').collect();

    if segments.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;

    // Anchored prefix
    let first = segments[0];
    if !first.is_empty() {
        match rest.strip_prefix(first) {
            Some(r) => rest = r,
            None => return false,
        }
    }

    // Anchored suffix
    let last = segments[segments.len() - 1];
    if !last.is_empty() {
        match rest.strip_suffix(last) {
            Some(r) => rest = r,
            None => return false,
        }
    }

    // Middle segments must appear in order
    for seg in &segments[1..segments.len() - 1] {
        if seg.is_empty() {
            continue;
        }
        match rest.find(seg) {
            Some(idx) => rest = &rest[idx + seg.len()..],
            None => return false,
        }
    }

    true
}
