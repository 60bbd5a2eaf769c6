//! Per-session payload protection: AES-128-GCM with counter nonces.

use std::fmt;
use std::time::{Duration, Instant};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Nonce};
use byteorder::{ByteOrder, LittleEndian};
use zeroize::Zeroize;

use crate::config::KeyPolicyConfig;
use crate::error::{CryptoError, Result};

use super::kdf::{KeySchedule, SessionKeyMaterial};

/// AES-128 key size.
pub const KEY_SIZE: usize = 16;

/// GCM nonce size.
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Bytes a sealed payload adds over the plaintext: counter prefix plus tag.
pub const SEAL_OVERHEAD: usize = 8 + TAG_SIZE;

/// Counters kept per context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CryptoStats {
    pub packets_encrypted: u64,
    pub packets_decrypted: u64,
    pub auth_failures: u64,
    pub replays_rejected: u64,
    pub key_refreshes: u32,
    pub key_age: Duration,
}

/// Encryption state for one session direction pair.
///
/// Sealed payload layout: `counter (8 bytes LE) ‖ ciphertext ‖ tag`. The
/// nonce is the derived base with its first 8 bytes XORed with the counter,
/// so both sides derive identical nonces without transmitting them whole.
pub struct CryptoContext {
    key: [u8; KEY_SIZE],
    nonce_base: [u8; NONCE_SIZE],
    key_id: u32,
    /// Next counter value to seal with; starts at 1 and only moves forward.
    counter: u64,
    /// Highest counter accepted from the peer under this key.
    replay_floor: u64,
    key_created: Instant,
    agreed: bool,
    policy: KeyPolicyConfig,
    packets_encrypted: u64,
    packets_decrypted: u64,
    auth_failures: u64,
    replays_rejected: u64,
    key_refreshes: u32,
}

impl CryptoContext {
    /// Create a context with no agreed key.
    pub fn new(policy: KeyPolicyConfig) -> Self {
        Self {
            key: [0u8; KEY_SIZE],
            nonce_base: [0u8; NONCE_SIZE],
            key_id: 0,
            counter: 1,
            replay_floor: 0,
            key_created: Instant::now(),
            agreed: false,
            policy,
            packets_encrypted: 0,
            packets_decrypted: 0,
            auth_failures: 0,
            replays_rejected: 0,
            key_refreshes: 0,
        }
    }

    /// Install derived key material, resetting counters for the new epoch.
    pub fn install(&mut self, material: SessionKeyMaterial) {
        if self.agreed {
            self.key_refreshes += 1;
        }
        self.key.zeroize();
        self.nonce_base.zeroize();
        self.key = material.key;
        self.nonce_base = material.nonce_base;
        self.key_id = material.key_id;
        self.counter = 1;
        self.replay_floor = 0;
        self.key_created = Instant::now();
        self.agreed = true;
    }

    /// Agree a key from an X25519 shared secret.
    pub fn agree_from_shared(&mut self, shared: &[u8; 32], salt: Option<&[u8]>) {
        self.install(KeySchedule::from_shared_secret(shared, salt));
    }

    /// Bypass ECDH with a pre-shared 16-byte key.
    pub fn set_psk(&mut self, key: [u8; KEY_SIZE]) {
        let material = SessionKeyMaterial {
            key,
            nonce_base: super::random_bytes(),
            key_id: u32::from_le_bytes(super::random_bytes()),
        };
        self.install(material);
    }

    /// Agree a key from a password and salt.
    pub fn agree_from_password(&mut self, password: &[u8], salt: &[u8]) {
        self.install(KeySchedule::from_password(password, salt));
    }

    pub fn is_agreed(&self) -> bool {
        self.agreed
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    /// True once the key has outlived its packet budget or age limit.
    pub fn needs_refresh(&self) -> bool {
        self.agreed
            && (self.packets_encrypted >= self.policy.max_packets
                || self.key_created.elapsed() > self.policy.max_age)
    }

    fn nonce_for(&self, counter: u64) -> [u8; NONCE_SIZE] {
        let mut nonce = self.nonce_base;
        let mut ctr = [0u8; 8];
        LittleEndian::write_u64(&mut ctr, counter);
        for (n, c) in nonce.iter_mut().zip(ctr.iter()) {
            *n ^= c;
        }
        nonce
    }

    /// Encrypt a payload. Output: `counter ‖ ciphertext ‖ tag`.
    ///
    /// Every successful call advances the nonce counter exactly once.
    pub fn seal(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if !self.agreed {
            return Err(CryptoError::NotAgreed.into());
        }
        if self.counter == u64::MAX {
            return Err(CryptoError::KeyExpired.into());
        }

        let counter = self.counter;
        let nonce_bytes = self.nonce_for(counter);

        let cipher = Aes128Gcm::new_from_slice(&self.key)
            .map_err(|_| CryptoError::InvalidKey)?;
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::BufferSize)?;

        self.counter += 1;
        self.packets_encrypted += 1;

        let mut out = Vec::with_capacity(8 + ciphertext.len());
        out.extend_from_slice(&counter.to_le_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a sealed payload.
    ///
    /// Rejects counters at or below the replay watermark before touching the
    /// cipher; the watermark advances only after the tag authenticates.
    pub fn open(&mut self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let floor = self.replay_floor;
        let (plaintext, counter) = self.open_at(sealed, aad, floor)?;
        self.replay_floor = counter;
        Ok(plaintext)
    }

    /// Decrypt with a caller-held replay watermark.
    ///
    /// Group sessions have one counter stream per sender, so the session
    /// keeps a watermark per member and passes it here.
    pub fn open_with_floor(
        &mut self,
        sealed: &[u8],
        aad: &[u8],
        floor: &mut u64,
    ) -> Result<Vec<u8>> {
        let (plaintext, counter) = self.open_at(sealed, aad, *floor)?;
        *floor = counter;
        Ok(plaintext)
    }

    fn open_at(&mut self, sealed: &[u8], aad: &[u8], floor: u64) -> Result<(Vec<u8>, u64)> {
        if !self.agreed {
            return Err(CryptoError::NotAgreed.into());
        }
        if sealed.len() < SEAL_OVERHEAD {
            return Err(CryptoError::BufferSize.into());
        }

        let counter = LittleEndian::read_u64(&sealed[..8]);
        if counter <= floor {
            self.replays_rejected += 1;
            return Err(CryptoError::ReplayNonce.into());
        }

        let nonce_bytes = self.nonce_for(counter);
        let cipher = Aes128Gcm::new_from_slice(&self.key)
            .map_err(|_| CryptoError::InvalidKey)?;

        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &sealed[8..],
                    aad,
                },
            )
            .map_err(|_| {
                self.auth_failures += 1;
                CryptoError::AuthFailed
            })?;

        self.packets_decrypted += 1;
        Ok((plaintext, counter))
    }

    pub fn stats(&self) -> CryptoStats {
        CryptoStats {
            packets_encrypted: self.packets_encrypted,
            packets_decrypted: self.packets_decrypted,
            auth_failures: self.auth_failures,
            replays_rejected: self.replays_rejected,
            key_refreshes: self.key_refreshes,
            key_age: self.key_created.elapsed(),
        }
    }
}

impl Drop for CryptoContext {
    fn drop(&mut self) {
        self.key.zeroize();
        self.nonce_base.zeroize();
    }
}

impl fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoContext")
            .field("key_id", &self.key_id)
            .field("agreed", &self.agreed)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}
