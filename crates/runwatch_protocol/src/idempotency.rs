use blake3::Hasher;

const SEP: u8 = 0x1f;

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[SEP]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Dedup fingerprint for a canonical job key.
///
/// Used as the dedup-gate cache key so arbitrary project/location text never
/// reaches the cache key space directly.
pub fn fingerprint(canonical_key: &str) -> String {
    hash_parts(&[canonical_key])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(fingerprint("[US] p1:j1"), fingerprint("[US] p1:j1"));
        assert_eq!(fingerprint("[US] p1:j1").len(), 64);
    }

    #[test]
    fn test_fingerprint_differs_per_key() {
        assert_ne!(fingerprint("[US] p1:j1"), fingerprint("[US] p1:j2"));
    }
}
