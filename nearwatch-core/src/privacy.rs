use sha2::{Digest, Sha256};

/// One-way digest of an email address, used to correlate verification state
/// without keeping the plaintext. Input is trimmed and lowercased first;
/// blank input hashes to the empty string.
pub fn email_hash(email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    if normalized.is_empty() {
        return String::new();
    }
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}
