//! Device-identity derivation, persistence, and auth tokens.

use std::sync::Arc;

use wavetalk::identity::{raw_to_id, DeviceIdentity, HardwareSources, IdSource, NoHardware};
use wavetalk::storage::{FileStore, MemoryStore, Storage};
use wavetalk::types::DeviceId;

struct WithMac;

impl HardwareSources for WithMac {
    fn wifi_mac(&self) -> Option<[u8; 6]> {
        Some([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01])
    }
}

#[test]
fn test_derivation_total_and_in_range() {
    for seed in 0u32..256 {
        let id = raw_to_id(&seed.to_be_bytes());
        assert!(DeviceId::validate_format(id.as_str()));
        let v: u32 = id.as_str().parse().unwrap();
        assert!((10_000_000..=99_999_999).contains(&v));
    }
}

#[test]
fn test_same_hardware_same_id() {
    let a = DeviceIdentity::init(Arc::new(MemoryStore::new()), &WithMac).unwrap();
    let b = DeviceIdentity::init(Arc::new(MemoryStore::new()), &WithMac).unwrap();
    assert_eq!(a.id(), b.id());
    assert_eq!(a.source(), IdSource::WifiMac);
}

#[test]
fn test_persisted_id_wins_over_recomputation() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());

    let first = DeviceIdentity::init(storage.clone(), &NoHardware).unwrap().id();
    // A second boot with a *different* hardware story must not change it.
    let second = DeviceIdentity::init(storage, &WithMac).unwrap().id();
    assert_eq!(first, second);
}

#[test]
fn test_generate_force_is_the_only_mutation() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());
    let mut identity = DeviceIdentity::init(storage.clone(), &NoHardware).unwrap();
    let original = identity.id();

    assert_eq!(identity.generate(false, &NoHardware).unwrap(), original);

    // Forced regeneration from the RNG persists a new record.
    let forced = identity.generate(true, &NoHardware).unwrap();
    let reloaded = DeviceIdentity::init(storage, &NoHardware).unwrap();
    assert_eq!(reloaded.id(), forced);
}

#[test]
fn test_identity_survives_file_reboot() {
    let dir = std::env::temp_dir().join(format!("wavetalk-ident-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("state.toml");

    let first = {
        let storage: Arc<dyn Storage> = Arc::new(FileStore::new(&path));
        DeviceIdentity::init(storage, &NoHardware).unwrap().id()
    };

    let storage: Arc<dyn Storage> = Arc::new(FileStore::new(&path));
    let second = DeviceIdentity::init(storage, &NoHardware).unwrap().id();
    assert_eq!(first, second);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_auth_token_lifecycle() {
    let mut identity = DeviceIdentity::init(Arc::new(MemoryStore::new()), &WithMac).unwrap();
    let id = identity.id();

    let token = identity.auth_token(50_000).unwrap();

    // Format: ID.TIMESTAMP.SIG16HEX.
    let parts: Vec<&str> = token.split('.').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], id.as_str());
    assert_eq!(parts[1], "50000");
    assert_eq!(parts[2].len(), 16);
    assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));

    // Valid within the skew window.
    assert!(identity.verify_auth_token(&token, id, 300, 50_200));
    // Expired beyond it.
    assert!(!identity.verify_auth_token(&token, id, 300, 50_400));
    // Wrong expected id.
    let other: DeviceId = "10000001".parse().unwrap();
    assert!(!identity.verify_auth_token(&token, other, 300, 50_200));

    // Any signature change fails closed.
    let last = token.chars().last().unwrap();
    let flipped = if last == '0' { "1" } else { "0" };
    let mut forged = token.clone();
    forged.replace_range(token.len() - 1.., flipped);
    assert!(!identity.verify_auth_token(&forged, id, 300, 50_200));

    // Garbage never verifies.
    assert!(!identity.verify_auth_token("11111111.notanumber.abcd", id, 300, 50_200));
    assert!(!identity.verify_auth_token("", id, 300, 50_200));
}
