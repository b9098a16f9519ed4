//! Stored password hashes: `algorithm$salt$hexdigest`.
//!
//! Only `sha256` is understood, with digest = SHA-256(salt ‖ password).
//! A hash with any other algorithm never verifies.

use sha2::{Digest, Sha256};

const ALGORITHM: &str = "sha256";

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Produces a new hash with a random 128-bit salt.
pub fn hash_password(password: &str) -> String {
    let salt: [u8; 16] = rand::random();
    let salt: String = salt.iter().map(|b| format!("{b:02x}")).collect();
    format!("{ALGORITHM}${salt}${}", digest(&salt, password))
}

/// Checks `password` against a stored hash in constant time.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let (Some(algorithm), Some(salt), Some(expected)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if algorithm != ALGORITHM {
        return false;
    }
    constant_time_eq(
        digest(salt, password).as_bytes(),
        expected.to_ascii_lowercase().as_bytes(),
    )
}

/// Byte comparison whose running time depends only on the lengths.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
