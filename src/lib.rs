//! # Wavetalk
//!
//! Real-time communication engine for a handheld long-range radio.
//!
//! Wavetalk is the firmware core of a walkie-talkie built on a LoRa-class
//! link: 1-on-1 voice calls, multi-party group "frequencies", a fixed bank
//! of 15 dial slots each holding an independent session, and end-to-end
//! payload protection.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     UI / Front Panel (external)                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                      Engine (event stream)                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                 Dial Manager (15 slots, 1 cursor)               │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐         │
//! │  │ Worker 1 │  │ Worker 2 │  │ Worker 3 │  │ Worker N │         │
//! │  │ (session)│  │ (session)│  │ (session)│  │   ...    │         │
//! │  └──────────┘  └──────────┘  └──────────┘  └──────────┘         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        Audio Rings (SPSC) │ Crypto (X25519 + AES-128-GCM)       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │            Protocol Dispatcher / Framing (CRC-16)               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                 Radio Transport (SX1276-class)                  │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)] // Wire fields are width-checked at the boundaries
#![allow(clippy::cast_sign_loss)]           // RSSI/sample conversions are intentional
#![allow(clippy::struct_excessive_bools)]   // Slot flags mirror the hardware state
#![allow(clippy::cognitive_complexity)]     // Message routing matches are long but flat
#![allow(clippy::too_many_lines)]           // Complete state machines
#![allow(clippy::match_same_arms)]          // Explicit arm per message type is clearer

pub mod audio;
pub mod config;
pub mod crypto;
pub mod dial;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod transport;
pub mod types;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use events::EngineEvent;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version for wire compatibility.
pub const PROTOCOL_VERSION: u8 = 1;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::audio::{AudioHal, AudioRing, JitterGate, NullAudio};
    pub use crate::config::EngineConfig;
    pub use crate::crypto::{CryptoContext, KeyPair, PublicKey, SecretKey};
    pub use crate::dial::{DialManager, SlotState, DIAL_POSITIONS};
    pub use crate::engine::Engine;
    pub use crate::error::{Error, Result};
    pub use crate::events::EngineEvent;
    pub use crate::identity::{DeviceIdentity, HardwareSources, NoHardware};
    pub use crate::protocol::{MsgType, Packet, PacketHeader};
    pub use crate::storage::{FileStore, MemoryStore, Storage};
    pub use crate::transport::{LoopbackRadio, RadioTransport, RxFrame};
    pub use crate::types::*;
}
