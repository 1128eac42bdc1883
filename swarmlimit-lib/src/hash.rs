use sha2::{Digest, Sha256};

/// Fixed-width fingerprint of an opaque client key.
///
/// The digest is part of the redis key, so it must be identical on every
/// cooperating proxy: a keyed or per-process hash would split one client's
/// bucket across hosts. Truncating sha-256 to 64 bits keeps the key short
/// while spreading keys evenly over the ring shards.
pub fn hashed_key(clear_text: &str) -> String {
    format!("{:016x}", fingerprint64(clear_text))
}

pub(crate) fn fingerprint64(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_across_calls() {
        assert_eq!(hashed_key("u1"), "bb82030dbc2bcaba");
        assert_eq!(hashed_key("u1"), hashed_key("u1"));
    }

    #[test]
    fn digest_is_sixteen_hex_chars() {
        for key in ["", "a", "some-rather-long-client-identifier@example.com"] {
            let digest = hashed_key(key);
            assert_eq!(digest.len(), 16, "digest for {key:?} has wrong width");
            assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn nearby_keys_diverge() {
        assert_ne!(hashed_key("u1"), hashed_key("u2"));
        assert_ne!(hashed_key("a"), hashed_key("a "));
    }
}
