use sha2::{Digest, Sha256};

const SEPARATOR: &str = ":::";

/// Hex SHA-256 of `parts` joined with `:::`.
pub fn sha256_hash<S: AsRef<str>>(parts: &[S]) -> String {
    let joined = parts
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join(SEPARATOR);
    hex::encode(Sha256::digest(joined.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hash_empty() {
        let empty: [&str; 0] = [];
        assert_eq!(
            sha256_hash(&empty),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_hash_joins_parts() {
        assert_eq!(sha256_hash(&["a", "b"]), sha256_hash(&["a:::b"]));
        assert_ne!(sha256_hash(&["a", "b"]), sha256_hash(&["b", "a"]));
        assert_eq!(sha256_hash(&["x"]).len(), 64);
    }
}
