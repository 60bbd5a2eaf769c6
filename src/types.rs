//! Core types used throughout Wavetalk.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length of device and frequency identifiers: 8 ASCII digits.
pub const ID_LENGTH: usize = 8;

/// Maximum password length for protected frequencies.
pub const PASSWORD_MAX_LENGTH: usize = 16;

/// Maximum display-name length carried on the wire.
pub const NAME_MAX_LENGTH: usize = 16;

fn check_digits(s: &str) -> Result<[u8; ID_LENGTH]> {
    let bytes = s.as_bytes();
    if bytes.len() != ID_LENGTH || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(Error::Identity(format!("not an 8-digit id: {s:?}")));
    }
    let mut arr = [0u8; ID_LENGTH];
    arr.copy_from_slice(bytes);
    Ok(arr)
}

/// Permanent 8-digit device identifier (ASCII digits).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId([u8; ID_LENGTH]);

impl DeviceId {
    /// Create from raw ASCII digit bytes without validation.
    ///
    /// Used when reading off the wire, where the bytes were produced by a
    /// validated peer id; display falls back to replacement on bad input.
    pub fn from_wire(bytes: [u8; ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????????")
    }

    /// Check that an id string is exactly 8 ASCII digits.
    pub fn validate_format(s: &str) -> bool {
        s.len() == ID_LENGTH && s.bytes().all(|b| b.is_ascii_digit())
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        check_digits(s).map(Self)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.as_str())
    }
}

impl Serialize for DeviceId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Ephemeral 8-digit frequency identifier (ASCII digits).
///
/// Valid only while the frequency exists; the code returns to the free pool
/// once the frequency is closed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrequencyId([u8; ID_LENGTH]);

impl FrequencyId {
    pub fn from_wire(bytes: [u8; ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Generate a uniform-random frequency id in [10000000, 99999999].
    pub fn generate() -> Self {
        let v: u32 = rand::thread_rng().gen_range(10_000_000..=99_999_999);
        let s = format!("{v:08}");
        let mut arr = [0u8; ID_LENGTH];
        arr.copy_from_slice(s.as_bytes());
        Self(arr)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????????")
    }
}

impl FromStr for FrequencyId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        check_digits(s).map(Self)
    }
}

impl fmt::Display for FrequencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for FrequencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrequencyId({})", self.as_str())
    }
}

impl Serialize for FrequencyId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FrequencyId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Either endpoint a session can be bound to.
///
/// Used as the routing key for inbound packets: a call session is keyed by
/// the peer device id, a frequency session by the frequency id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerKey {
    Device(DeviceId),
    Frequency(FrequencyId),
}

impl PeerKey {
    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        match self {
            Self::Device(id) => id.as_bytes(),
            Self::Frequency(id) => id.as_bytes(),
        }
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(id) => write!(f, "dev:{id}"),
            Self::Frequency(id) => write!(f, "freq:{id}"),
        }
    }
}

/// What kind of endpoint a saved code dials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// 1-on-1 call to a device.
    #[default]
    Device,
    /// Group frequency membership.
    Frequency,
}

/// Frequency visibility class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum FrequencyType {
    /// Announced in discovery scans.
    #[default]
    Visible = 1,
    /// Joinable by code only.
    Hidden = 2,
}

impl FrequencyType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Visible),
            2 => Some(Self::Hidden),
            _ => None,
        }
    }
}

/// Join protection applied by a frequency admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum FrequencyProtection {
    #[default]
    None = 1,
    Password = 2,
    Approval = 3,
    /// Password and admin approval.
    Both = 4,
}

impl FrequencyProtection {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::None),
            2 => Some(Self::Password),
            3 => Some(Self::Approval),
            4 => Some(Self::Both),
            _ => None,
        }
    }

    pub fn wants_password(self) -> bool {
        matches!(self, Self::Password | Self::Both)
    }

    pub fn wants_approval(self) -> bool {
        matches!(self, Self::Approval | Self::Both)
    }
}

/// A discovered peer device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    /// Received signal strength in dBm, if known.
    pub signal_dbm: i8,
    pub available: bool,
}

/// A discovered or joined frequency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyInfo {
    pub id: FrequencyId,
    pub freq_type: FrequencyType,
    pub protection: FrequencyProtection,
    pub member_count: u8,
    pub signal_dbm: i8,
}

/// What a session is connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    Call(DeviceInfo),
    Frequency(FrequencyInfo),
}

impl Connection {
    pub fn peer_key(&self) -> PeerKey {
        match self {
            Self::Call(d) => PeerKey::Device(d.id),
            Self::Frequency(f) => PeerKey::Frequency(f.id),
        }
    }
}

/// One entry in the scan-results snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    Device(DeviceInfo),
    Frequency(FrequencyInfo),
}

/// Role of the local device within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionRole {
    #[default]
    Client,
    /// We created the frequency (or were designated admin).
    Admin,
}

/// One member of a frequency, as carried in member-list updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub id: DeviceId,
    pub name: String,
    pub is_admin: bool,
    pub is_muted: bool,
    pub signal_dbm: i8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_parse() {
        let id: DeviceId = "12345678".parse().unwrap();
        assert_eq!(id.as_str(), "12345678");
        assert_eq!(id.to_string(), "12345678");

        assert!("1234567".parse::<DeviceId>().is_err());
        assert!("123456789".parse::<DeviceId>().is_err());
        assert!("1234567a".parse::<DeviceId>().is_err());
    }

    #[test]
    fn test_validate_format() {
        assert!(DeviceId::validate_format("00000000"));
        assert!(DeviceId::validate_format("99999999"));
        assert!(!DeviceId::validate_format(""));
        assert!(!DeviceId::validate_format("1234-678"));
    }

    #[test]
    fn test_frequency_id_generate_range() {
        for _ in 0..32 {
            let id = FrequencyId::generate();
            let v: u32 = id.as_str().parse().unwrap();
            assert!((10_000_000..=99_999_999).contains(&v));
        }
    }

    #[test]
    fn test_peer_key_display() {
        let d: DeviceId = "12345678".parse().unwrap();
        let f: FrequencyId = "87654321".parse().unwrap();
        assert_eq!(PeerKey::Device(d).to_string(), "dev:12345678");
        assert_eq!(PeerKey::Frequency(f).to_string(), "freq:87654321");
    }

    #[test]
    fn test_protection_flags() {
        assert!(FrequencyProtection::Both.wants_password());
        assert!(FrequencyProtection::Both.wants_approval());
        assert!(!FrequencyProtection::None.wants_password());
        assert!(FrequencyProtection::Approval.wants_approval());
    }
}
