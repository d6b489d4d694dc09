//! Content fingerprints for item deduplication.

use sha2::{Digest, Sha256};

/// Length of a fingerprint in hex characters (128 bits).
pub const FINGERPRINT_LEN: usize = 32;

/// Fingerprint an item by its URL and title.
///
/// The hash input is exactly `url|title`. Excerpt and thumbnail are left
/// out so body edits never look like a new item, while a title change does.
pub fn fingerprint(url: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"|");
    hasher.update(title.as_bytes());
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(FINGERPRINT_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_fixed_length_hex() {
        let fp = fingerprint("https://example.com/a", "Title");
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint("https://example.com/a", "Title");
        let b = fingerprint("https://example.com/a", "Title");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_title() {
        let a = fingerprint("https://example.com/a", "Title");
        let b = fingerprint("https://example.com/a", "Title (updated)");
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_changes_with_url() {
        let a = fingerprint("https://example.com/a", "Title");
        let b = fingerprint("https://example.com/b", "Title");
        assert_ne!(a, b);
    }

    #[test]
    fn test_separator_is_part_of_input() {
        // The input is the literal `url|title` string.
        assert_eq!(fingerprint("a|b", "c"), fingerprint("a", "b|c"));
        assert_ne!(fingerprint("ab", "c"), fingerprint("a", "bc"));
    }
}
