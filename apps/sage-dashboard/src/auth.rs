use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hex SHA-256 of the trimmed password, the form the dashboard secret is stored in.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.trim().as_bytes()))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let trimmed = password.trim();
    if trimmed.is_empty() {
        return false;
    }
    let expected = match hex::decode(stored_hash.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let derived = Sha256::digest(trimmed.as_bytes());
    derived.as_slice().ct_eq(expected.as_slice()).into()
}
