//! Cryptographic primitives for Wavetalk.
//!
//! This module provides:
//! - X25519 key agreement
//! - HKDF-SHA256 key derivation
//! - AES-128-GCM payload protection with counter nonces and replay detection
//! - SHA-256 / HMAC-SHA256 helpers

mod context;
mod kdf;
mod keys;

pub use context::{CryptoContext, CryptoStats, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use kdf::{KeySchedule, SessionKeyMaterial};
pub use keys::{KeyPair, PublicKey, SecretKey};

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Hash data using SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// HMAC-SHA256 for message authentication.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Generate cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    bytes
}

/// Constant-time comparison of byte slices.
pub fn secure_compare(a: &[u8], b: &[u8]) -> bool {
    constant_time_eq::constant_time_eq(a, b)
}
