//! BLAKE3 digests of declared documents.

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// First 12 hex characters of a `blake3:` digest, for progress lines.
pub fn short_digest(digest: &str) -> &str {
    let hex = digest.strip_prefix("blake3:").unwrap_or(digest);
    hex.get(..12).unwrap_or(hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_string() {
        let h1 = hash_string("hello");
        let h2 = hash_string("hello");
        let h3 = hash_string("world");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert!(h1.starts_with("blake3:"));
        assert_eq!(h1.len(), 7 + 64); // "blake3:" + 64 hex chars
    }

    #[test]
    fn test_whitespace_changes_digest() {
        assert_ne!(hash_string("{\"a\":1}"), hash_string("{\"a\": 1}"));
    }

    #[test]
    fn test_short_digest() {
        let h = hash_string("doc");
        let short = short_digest(&h);
        assert_eq!(short.len(), 12);
        assert!(h.ends_with(&h[7..]) && h[7..].starts_with(short));
        assert_eq!(short_digest("abc"), "abc");
    }
}
