//! Error types for Wavetalk.

use thiserror::Error;

/// Result type alias for Wavetalk operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Wavetalk.
#[derive(Error, Debug)]
pub enum Error {
    // Framing errors
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    // Cryptographic errors
    #[error("cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    // Session errors
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    // Dial manager errors
    #[error("dial error: {0}")]
    Dial(#[from] DialError),

    // Transport errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // Audio buffer errors
    #[error("audio error: {0}")]
    Audio(#[from] AudioError),

    // Identity errors
    #[error("identity error: {0}")]
    Identity(String),

    // Persistence errors
    #[error("storage error: {0}")]
    Storage(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // General errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Packet framing and parsing errors.
///
/// These never surface past the dispatcher; they increment counters and the
/// offending packet is dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    #[error("buffer too short for a packet")]
    ShortBuffer,

    #[error("bad magic: 0x{0:04X}")]
    BadMagic(u16),

    #[error("bad version: expected {expected}, got {got}")]
    BadVersion { expected: u8, got: u8 },

    #[error("payload length overflow: {len} bytes (max {max})")]
    LengthOverflow { len: usize, max: usize },

    #[error("CRC mismatch: computed 0x{computed:04X}, stored 0x{stored:04X}")]
    CrcMismatch { computed: u16, stored: u16 },

    #[error("malformed payload")]
    Malformed,
}

/// Cryptographic operation errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key")]
    InvalidKey,

    #[error("no key agreed for this context")]
    NotAgreed,

    #[error("authentication failed")]
    AuthFailed,

    #[error("replayed nonce")]
    ReplayNonce,

    #[error("key expired")]
    KeyExpired,

    #[error("buffer too small for ciphertext")]
    BufferSize,
}

/// Session-level errors, surfaced on the event stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no response within the call timeout")]
    Timeout,

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("wrong password")]
    WrongPassword,

    #[error("frequency is full")]
    FrequencyFull,

    #[error("frequency was closed")]
    FrequencyClosed,

    #[error("permission denied")]
    PermissionDenied,

    #[error("link lost")]
    LinkLoss,
}

/// Dial manager errors, returned to the caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialError {
    #[error("slot {0} has no saved code")]
    SlotUnconfigured(usize),

    #[error("all dial workers are in use")]
    SlotLimitReached,

    #[error("position {0} out of range")]
    InvalidPosition(usize),

    #[error("slot {0} is busy with an incoming request")]
    SlotBusy(usize),
}

/// Audio ring-buffer errors. Both are recoverable: a full ring drops the
/// incoming frame, an empty ring yields silence.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioError {
    #[error("ring buffer full")]
    Full,

    #[error("ring buffer empty")]
    Empty,
}

/// Radio transport errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transmit failed: {0}")]
    TxError(String),

    #[error("transmit timed out")]
    TxTimeout,
}

impl Error {
    /// Check if this error only warrants a counter bump and a dropped packet.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            Error::Framing(_)
                | Error::Crypto(CryptoError::AuthFailed | CryptoError::ReplayNonce)
        )
    }

    /// Check if this error should tear the session down to IDLE.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::Session(_) | Error::Crypto(CryptoError::InvalidKey | CryptoError::NotAgreed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_errors() {
        assert!(Error::from(FramingError::ShortBuffer).is_silent());
        assert!(Error::from(CryptoError::AuthFailed).is_silent());
        assert!(Error::from(CryptoError::ReplayNonce).is_silent());
        assert!(!Error::from(SessionError::Timeout).is_silent());
    }

    #[test]
    fn test_session_fatal() {
        assert!(Error::from(SessionError::LinkLoss).is_session_fatal());
        assert!(Error::from(CryptoError::NotAgreed).is_session_fatal());
        assert!(!Error::from(FramingError::ShortBuffer).is_session_fatal());
    }
}
