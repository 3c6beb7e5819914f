// src/ingest/fingerprint.rs
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// How much of the description takes part in identity.
pub const DESCRIPTION_PREFIX_CHARS: usize = 50;

const DELIMITER: &str = "|";

/// Content hash identifying an event (64 lowercase hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 over trimmed title, date text, source and description prefix.
pub fn fingerprint(title: &str, start_raw: &str, description: &str, source: &str) -> Fingerprint {
    let desc_prefix: String = description
        .trim()
        .chars()
        .take(DESCRIPTION_PREFIX_CHARS)
        .collect();

    let mut hasher = Sha256::new();
    for (i, part) in [title.trim(), start_raw.trim(), source.trim(), desc_prefix.as_str()]
        .iter()
        .enumerate()
    {
        if i > 0 {
            hasher.update(DELIMITER.as_bytes());
        }
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();

    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    Fingerprint(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_and_trim_insensitive() {
        let a = fingerprint("Story Hour", "Aug 14", "Songs and books", "Library");
        let b = fingerprint("  Story Hour ", "Aug 14\n", " Songs and books", "Library ");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn only_description_prefix_counts() {
        let base = "x".repeat(DESCRIPTION_PREFIX_CHARS);
        let a = fingerprint("T", "D", &format!("{base} first tail"), "S");
        let b = fingerprint("T", "D", &format!("{base} other tail"), "S");
        assert_eq!(a, b);
    }

    #[test]
    fn single_byte_changes_hash() {
        let a = fingerprint("Story Hour", "Aug 14", "Songs", "Library");
        assert_ne!(a, fingerprint("Story Hour", "Aug 15", "Songs", "Library"));
        assert_ne!(a, fingerprint("Story Hour", "Aug 14", "Songs", "Librarx"));
        assert_ne!(a, fingerprint("Story hour", "Aug 14", "Songs", "Library"));
        assert_ne!(a, fingerprint("Story Hour", "Aug 14", "Song", "Library"));
    }

    #[test]
    fn delimiter_keeps_fields_apart() {
        assert_ne!(fingerprint("ab", "c", "", "s"), fingerprint("a", "bc", "", "s"));
    }
}
