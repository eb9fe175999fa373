//! Shared primitive types used across the entire pipeline.

/// A normalized player tag (`#`-prefixed, uppercase).
pub type PlayerTag = String;

/// A normalized clan tag (`#`-prefixed, uppercase).
pub type ClanTag = String;

/// The alphabet the upstream uses for tags. Letter `O` never appears;
/// it is always the digit `0`.
pub const TAG_ALPHABET: &str = "0289PYLQGRJCUV";

/// Normalize a raw tag to the canonical form used everywhere downstream:
/// trimmed, uppercased, `O` mapped to `0`, exactly one leading `#`.
pub fn normalize_tag(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .trim_start_matches('#')
        .chars()
        .map(|c| match c.to_ascii_uppercase() {
            'O' => '0',
            up => up,
        })
        .collect();
    format!("#{cleaned}")
}

/// A tag carries an identity when anything at all follows the `#`.
/// Derivation requires this and nothing more — historical snapshots can
/// hold tags from before the upstream settled on its alphabet.
pub fn has_identity(tag: &str) -> bool {
    tag.strip_prefix('#').is_some_and(|body| !body.is_empty())
}

/// Strict validity for tags arriving at the outer boundary: non-empty
/// after the `#` and every character in the upstream tag alphabet.
/// Callers normalize first.
pub fn is_valid_tag(tag: &str) -> bool {
    let body = match tag.strip_prefix('#') {
        Some(b) => b,
        None => return false,
    };
    !body.is_empty() && body.chars().all(|c| TAG_ALPHABET.contains(c))
}
