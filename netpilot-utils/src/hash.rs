use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a configuration text.
///
/// Callers normalize first; the digest is taken over the exact bytes given.
///
/// ```
/// use netpilot_utils::hash::fingerprint;
///
/// let fp = fingerprint("hostname r1\n");
/// assert_eq!(fp.len(), 64);
/// assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
/// ```
pub fn fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}
