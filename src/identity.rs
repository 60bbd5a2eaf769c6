//! Device identity: derivation, persistence, and auth tokens.
//!
//! The 8-digit device id is derived once from the best available hardware
//! source and persisted; later boots use the stored record verbatim. Only
//! `generate(force = true)` replaces an existing id.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crypto::{hmac_sha256, secure_compare, sha256};
use crate::error::Result;
use crate::storage::Storage;
use crate::types::DeviceId;

/// Raw identity source size kept on record.
pub const RAW_SIZE: usize = 16;

/// Build-time secret for auth-token HMACs. Deployments override it via
/// [`DeviceIdentity::with_secret`].
const DEFAULT_TOKEN_SECRET: &[u8] = b"wavetalk-device-auth-v1";

/// Where the raw identity bytes came from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdSource {
    WifiMac,
    BtMac,
    Efuse,
    Flash,
    Random,
    Custom,
}

/// Hardware unique-id providers, queried in priority order.
///
/// Each probe returns `None` when that source does not exist on the
/// platform; the engine falls back to the OS RNG when all fail.
pub trait HardwareSources: Send + Sync {
    fn wifi_mac(&self) -> Option<[u8; 6]> {
        None
    }
    fn bt_mac(&self) -> Option<[u8; 6]> {
        None
    }
    fn efuse_uid(&self) -> Option<[u8; 8]> {
        None
    }
    fn flash_uid(&self) -> Option<[u8; 8]> {
        None
    }
}

/// A platform with no readable hardware ids; derivation uses the RNG.
pub struct NoHardware;

impl HardwareSources for NoHardware {}

/// The persisted identity record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityRecord {
    /// Raw source bytes, zero-padded to [`RAW_SIZE`].
    pub raw: Vec<u8>,
    /// Derived 8-digit decimal id.
    pub id: DeviceId,
    /// Raw bytes as uppercase hex.
    pub hex: String,
    pub source: IdSource,
    /// Count of verification tokens issued.
    pub verify_counter: u32,
}

/// Device identity handle bound to a storage backend.
pub struct DeviceIdentity {
    record: IdentityRecord,
    storage: Arc<dyn Storage>,
    token_secret: Vec<u8>,
}

impl DeviceIdentity {
    /// Load the persisted identity or derive one at first boot.
    pub fn init(storage: Arc<dyn Storage>, hardware: &dyn HardwareSources) -> Result<Self> {
        let mut state = storage.load()?;

        let record = match state.identity.take() {
            Some(record) => record,
            None => {
                let record = derive_record(hardware);
                let mut state = storage.load()?;
                state.identity = Some(record.clone());
                storage.save(&state)?;
                info!(id = %record.id, source = ?record.source, "Derived device identity");
                record
            }
        };

        Ok(Self {
            record,
            storage,
            token_secret: DEFAULT_TOKEN_SECRET.to_vec(),
        })
    }

    /// Replace the build-time token secret.
    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.token_secret = secret.into();
        self
    }

    pub fn id(&self) -> DeviceId {
        self.record.id
    }

    pub fn hex(&self) -> &str {
        &self.record.hex
    }

    pub fn source(&self) -> IdSource {
        self.record.source
    }

    pub fn record(&self) -> &IdentityRecord {
        &self.record
    }

    /// Re-derive the identity. A stored id survives unless `force` is set.
    pub fn generate(&mut self, force: bool, hardware: &dyn HardwareSources) -> Result<DeviceId> {
        if !force {
            return Ok(self.record.id);
        }
        self.record = derive_record(hardware);
        self.persist()?;
        info!(id = %self.record.id, "Regenerated device identity");
        Ok(self.record.id)
    }

    /// Install a caller-chosen 8-digit id.
    pub fn set_custom(&mut self, id: &str) -> Result<()> {
        let id: DeviceId = id.parse()?;
        let mut raw = vec![0u8; RAW_SIZE];
        raw[..id.as_bytes().len()].copy_from_slice(id.as_bytes());
        self.record = IdentityRecord {
            hex: raw_to_hex(&raw),
            raw,
            id,
            source: IdSource::Custom,
            verify_counter: 0,
        };
        self.persist()
    }

    /// Create an auth token: `ID.TIMESTAMP.SIG16HEX`.
    ///
    /// The signature is the first 8 bytes of HMAC-SHA256 over
    /// `id ‖ timestamp_le`, hex-encoded.
    pub fn auth_token(&mut self, timestamp: u32) -> Result<String> {
        let sig = self.token_sig(self.record.id, timestamp);
        self.record.verify_counter += 1;
        self.persist()?;
        Ok(format!("{}.{}.{}", self.record.id, timestamp, sig))
    }

    /// Verify a token against an expected id and maximum age.
    ///
    /// Signature comparison is constant-time; time skew up to
    /// `max_age_seconds` past the embedded timestamp is accepted.
    pub fn verify_auth_token(
        &self,
        token: &str,
        expected_id: DeviceId,
        max_age_seconds: u32,
        now: u32,
    ) -> bool {
        let mut parts = token.splitn(3, '.');
        let (Some(id_part), Some(ts_part), Some(sig_part)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };

        let Ok(id) = id_part.parse::<DeviceId>() else {
            return false;
        };
        if id != expected_id {
            return false;
        }

        let Ok(timestamp) = ts_part.parse::<u32>() else {
            return false;
        };
        if now > timestamp && now - timestamp > max_age_seconds {
            return false;
        }

        let expected_sig = self.token_sig(id, timestamp);
        secure_compare(sig_part.as_bytes(), expected_sig.as_bytes())
    }

    fn token_sig(&self, id: DeviceId, timestamp: u32) -> String {
        let mut data = Vec::with_capacity(id.as_bytes().len() + 4);
        data.extend_from_slice(id.as_bytes());
        data.extend_from_slice(&timestamp.to_le_bytes());
        let mac = hmac_sha256(&self.token_secret, &data);
        hex::encode(&mac[..8])
    }

    fn persist(&self) -> Result<()> {
        let mut state = self.storage.load()?;
        state.identity = Some(self.record.clone());
        self.storage.save(&state)
    }
}

fn derive_record(hardware: &dyn HardwareSources) -> IdentityRecord {
    let (raw, source) = probe_sources(hardware);
    IdentityRecord {
        id: raw_to_id(&raw),
        hex: raw_to_hex(&raw),
        raw,
        source,
        verify_counter: 0,
    }
}

fn probe_sources(hardware: &dyn HardwareSources) -> (Vec<u8>, IdSource) {
    let mut raw = vec![0u8; RAW_SIZE];

    if let Some(mac) = hardware.wifi_mac() {
        raw[..6].copy_from_slice(&mac);
        return (raw, IdSource::WifiMac);
    }
    if let Some(mac) = hardware.bt_mac() {
        raw[..6].copy_from_slice(&mac);
        return (raw, IdSource::BtMac);
    }
    if let Some(uid) = hardware.efuse_uid() {
        raw[..8].copy_from_slice(&uid);
        return (raw, IdSource::Efuse);
    }
    if let Some(uid) = hardware.flash_uid() {
        raw[..8].copy_from_slice(&uid);
        return (raw, IdSource::Flash);
    }

    let random: [u8; RAW_SIZE] = crate::crypto::random_bytes();
    raw.copy_from_slice(&random);
    (raw, IdSource::Random)
}

/// Reduce raw source bytes to the 8-digit decimal id.
///
/// SHA-256 of the raw bytes; the first 4 digest bytes read big-endian, then
/// mapped into [10000000, 99999999]. Total over all inputs.
pub fn raw_to_id(raw: &[u8]) -> DeviceId {
    let digest = sha256(raw);
    let value = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    let id = (value % 90_000_000) + 10_000_000;
    format!("{id:08}")
        .parse()
        .expect("reduction always yields 8 digits")
}

/// Uppercase hex rendering of the raw bytes.
pub fn raw_to_hex(raw: &[u8]) -> String {
    hex::encode_upper(raw)
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("id", &self.record.id)
            .field("source", &self.record.source)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    struct FakeHw;

    impl HardwareSources for FakeHw {
        fn wifi_mac(&self) -> Option<[u8; 6]> {
            Some([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])
        }
    }

    struct EfuseOnly;

    impl HardwareSources for EfuseOnly {
        fn efuse_uid(&self) -> Option<[u8; 8]> {
            Some([1, 2, 3, 4, 5, 6, 7, 8])
        }
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = raw_to_id(&[1, 2, 3, 4]);
        let b = raw_to_id(&[1, 2, 3, 4]);
        assert_eq!(a, b);
        assert_ne!(a, raw_to_id(&[1, 2, 3, 5]));
    }

    #[test]
    fn test_id_range() {
        for seed in 0u32..64 {
            let id = raw_to_id(&seed.to_le_bytes());
            let v: u32 = id.as_str().parse().unwrap();
            assert!((10_000_000..=99_999_999).contains(&v));
            assert!(DeviceId::validate_format(id.as_str()));
        }
    }

    #[test]
    fn test_source_priority() {
        let storage = Arc::new(MemoryStore::new());
        let ident = DeviceIdentity::init(storage, &FakeHw).unwrap();
        assert_eq!(ident.source(), IdSource::WifiMac);

        let storage = Arc::new(MemoryStore::new());
        let ident = DeviceIdentity::init(storage, &EfuseOnly).unwrap();
        assert_eq!(ident.source(), IdSource::Efuse);

        let storage = Arc::new(MemoryStore::new());
        let ident = DeviceIdentity::init(storage, &NoHardware).unwrap();
        assert_eq!(ident.source(), IdSource::Random);
    }

    #[test]
    fn test_stable_across_restarts() {
        let storage = Arc::new(MemoryStore::new());
        let first = DeviceIdentity::init(storage.clone(), &NoHardware)
            .unwrap()
            .id();
        // Second boot: random source would differ, persisted record wins.
        let second = DeviceIdentity::init(storage.clone(), &NoHardware)
            .unwrap()
            .id();
        assert_eq!(first, second);

        // generate(false) keeps the id; generate(true) may replace it.
        let mut ident = DeviceIdentity::init(storage, &NoHardware).unwrap();
        assert_eq!(ident.generate(false, &NoHardware).unwrap(), first);
        ident.generate(true, &NoHardware).unwrap();
    }

    #[test]
    fn test_custom_id() {
        let storage = Arc::new(MemoryStore::new());
        let mut ident = DeviceIdentity::init(storage.clone(), &FakeHw).unwrap();
        ident.set_custom("42424242").unwrap();
        assert_eq!(ident.id().as_str(), "42424242");
        assert_eq!(ident.source(), IdSource::Custom);

        // Custom id survives a reboot.
        let again = DeviceIdentity::init(storage, &FakeHw).unwrap();
        assert_eq!(again.id().as_str(), "42424242");
    }

    #[test]
    fn test_auth_token_roundtrip() {
        let storage = Arc::new(MemoryStore::new());
        let mut ident = DeviceIdentity::init(storage, &FakeHw).unwrap();
        let id = ident.id();

        let token = ident.auth_token(1_000).unwrap();
        assert!(ident.verify_auth_token(&token, id, 60, 1_030));

        // Expired.
        assert!(!ident.verify_auth_token(&token, id, 60, 1_100));

        // Wrong id.
        let other: DeviceId = "10000001".parse().unwrap();
        assert!(!ident.verify_auth_token(&token, other, 60, 1_030));

        // Tampered signature.
        let mut bad = token.clone();
        let tail = bad.pop().unwrap();
        bad.push(if tail == '0' { '1' } else { '0' });
        assert!(!ident.verify_auth_token(&bad, id, 60, 1_030));

        // Garbage.
        assert!(!ident.verify_auth_token("not-a-token", id, 60, 1_030));
    }

    #[test]
    fn test_token_format() {
        let storage = Arc::new(MemoryStore::new());
        let mut ident = DeviceIdentity::init(storage, &FakeHw).unwrap();
        let token = ident.auth_token(12_345).unwrap();
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], ident.id().as_str());
        assert_eq!(parts[1], "12345");
        assert_eq!(parts[2].len(), 16);
    }

    #[test]
    fn test_hex_rendering() {
        assert_eq!(raw_to_hex(&[0xAB, 0x01]), "AB01");
    }
}
