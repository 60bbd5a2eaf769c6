//! Key derivation: HKDF-SHA256 schedule for session keys.

use byteorder::{ByteOrder, LittleEndian};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::context::{KEY_SIZE, NONCE_SIZE};

/// Derived material for one session key epoch.
#[derive(ZeroizeOnDrop)]
pub struct SessionKeyMaterial {
    /// AES-128 key.
    pub key: [u8; KEY_SIZE],
    /// Base value the nonce counter is XORed into.
    pub nonce_base: [u8; NONCE_SIZE],
    /// Identifier for this key epoch.
    #[zeroize(skip)]
    pub key_id: u32,
}

/// Key schedule deriving all session key material.
pub struct KeySchedule;

impl KeySchedule {
    /// Domain separation prefix for all Wavetalk keys.
    const DOMAIN: &'static [u8] = b"wavetalk/v1/";

    fn expand(ikm: &[u8], salt: Option<&[u8]>) -> SessionKeyMaterial {
        let hk = Hkdf::<Sha256>::new(salt, ikm);

        // One expand per output keeps the info strings domain-separated.
        let mut key = [0u8; KEY_SIZE];
        hk.expand(&Self::info(b"aes-key"), &mut key)
            .expect("16-byte HKDF output should be valid");

        let mut nonce_base = [0u8; NONCE_SIZE];
        hk.expand(&Self::info(b"nonce-base"), &mut nonce_base)
            .expect("12-byte HKDF output should be valid");

        let mut id_bytes = [0u8; 4];
        hk.expand(&Self::info(b"key-id"), &mut id_bytes)
            .expect("4-byte HKDF output should be valid");
        let key_id = LittleEndian::read_u32(&id_bytes);
        id_bytes.zeroize();

        SessionKeyMaterial {
            key,
            nonce_base,
            key_id,
        }
    }

    fn info(label: &[u8]) -> Vec<u8> {
        let mut info = Vec::with_capacity(Self::DOMAIN.len() + label.len());
        info.extend_from_slice(Self::DOMAIN);
        info.extend_from_slice(label);
        info
    }

    /// Derive session material from an X25519 shared secret.
    pub fn from_shared_secret(shared: &[u8; 32], salt: Option<&[u8]>) -> SessionKeyMaterial {
        Self::expand(shared, salt)
    }

    /// Derive session material from a password and salt.
    ///
    /// A single HKDF step, matching the wire peers; not a slow
    /// password-hash KDF.
    pub fn from_password(password: &[u8], salt: &[u8]) -> SessionKeyMaterial {
        Self::expand(password, Some(salt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let shared = [0x42u8; 32];
        let a = KeySchedule::from_shared_secret(&shared, Some(b"salt"));
        let b = KeySchedule::from_shared_secret(&shared, Some(b"salt"));
        assert_eq!(a.key, b.key);
        assert_eq!(a.nonce_base, b.nonce_base);
        assert_eq!(a.key_id, b.key_id);
    }

    #[test]
    fn test_salt_changes_output() {
        let shared = [0x42u8; 32];
        let a = KeySchedule::from_shared_secret(&shared, Some(b"salt-a"));
        let b = KeySchedule::from_shared_secret(&shared, Some(b"salt-b"));
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_key_and_nonce_differ() {
        let m = KeySchedule::from_shared_secret(&[7u8; 32], None);
        let overlap = KEY_SIZE.min(NONCE_SIZE);
        assert_ne!(&m.key[..overlap], &m.nonce_base[..overlap]);
    }

    #[test]
    fn test_password_derivation() {
        let a = KeySchedule::from_password(b"hunter2", b"salt");
        let b = KeySchedule::from_password(b"hunter2", b"salt");
        let c = KeySchedule::from_password(b"hunter3", b"salt");
        assert_eq!(a.key, b.key);
        assert_ne!(a.key, c.key);
    }
}
