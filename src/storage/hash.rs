use sha2::{Digest, Sha256};

pub fn compute_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Signature binding an object key to an expiry timestamp.
pub fn sign_download(secret: &str, key: &str, expires: i64) -> String {
    compute_hash(&format!("{secret}|{}|{expires}", key.trim_start_matches('/')))
}

pub fn verify_download(secret: &str, key: &str, expires: i64, signature: &str, now: i64) -> bool {
    if secret.is_empty() || expires < now {
        return false;
    }
    let expected = sign_download(secret, key, expires);
    // Constant-time compare over equal-length hex strings.
    expected.len() == signature.len()
        && expected
            .bytes()
            .zip(signature.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
