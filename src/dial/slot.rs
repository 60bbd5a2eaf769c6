//! Dial slot state.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::{FrameConsumer, FrameProducer};
use crate::session::SessionCommand;
use crate::types::{ConnectionKind, PeerKey};

/// Positions on the dial wheel.
pub const DIAL_POSITIONS: usize = 15;

/// Maximum concurrent slot workers.
pub const MAX_DIAL_WORKERS: usize = 15;

/// Runtime state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// No saved code.
    #[default]
    Empty,
    /// Saved code, not connected.
    Saved,
    /// Worker is establishing the session.
    Connecting,
    /// Session is live.
    Connected,
    /// Worker died; cleared only by an explicit disconnect.
    Error,
}

/// Persisted slot metadata. Runtime state never lands here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub kind: ConnectionKind,
    /// The saved 8-digit code.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Password for protected frequencies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Ring halves the audio HAL consumes when this slot holds audio focus.
pub struct HalAudio {
    /// Capture sink: microphone frames land in the session's TX ring.
    pub capture: FrameProducer,
    /// Playback source: decoded frames come out of the session's RX ring.
    pub playback: FrameConsumer,
}

/// Handle to a live slot worker.
pub struct WorkerHandle {
    pub cmd_tx: mpsc::Sender<SessionCommand>,
    /// Taken by `disconnect` to await quiescence.
    pub join: Option<JoinHandle<()>>,
    pub peer: PeerKey,
}

/// One dial position.
#[derive(Default)]
pub struct DialSlot {
    pub config: Option<SlotConfig>,
    pub state: SlotState,
    pub muted: bool,
    pub audio_active: bool,
    pub is_admin: bool,
    pub member_count: u8,
    pub signal_dbm: i8,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connected_at: Option<Instant>,
    pub worker: Option<WorkerHandle>,
    pub hal_audio: Option<HalAudio>,
}

impl DialSlot {
    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// State a stopped slot settles into.
    pub fn resting_state(&self) -> SlotState {
        if self.is_configured() {
            SlotState::Saved
        } else {
            SlotState::Empty
        }
    }
}

/// The whole dial: 15 slots plus the cursor.
pub struct DialState {
    pub slots: [DialSlot; DIAL_POSITIONS],
    pub position: usize,
    pub active_workers: usize,
}

impl DialState {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| DialSlot::default()),
            position: 0,
            active_workers: 0,
        }
    }
}

impl Default for DialState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a slot for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub index: usize,
    pub configured: bool,
    pub kind: Option<ConnectionKind>,
    pub code: Option<String>,
    pub name: Option<String>,
    pub state: SlotState,
    pub muted: bool,
    pub audio_active: bool,
    pub is_admin: bool,
    pub member_count: u8,
    pub signal_dbm: i8,
    pub is_current: bool,
}

impl SlotSnapshot {
    pub fn from_slot(index: usize, slot: &DialSlot, current: usize) -> Self {
        Self {
            index,
            configured: slot.is_configured(),
            kind: slot.config.as_ref().map(|c| c.kind),
            code: slot.config.as_ref().map(|c| c.code.clone()),
            name: slot.config.as_ref().map(|c| c.name.clone()),
            state: slot.state,
            muted: slot.muted,
            audio_active: slot.audio_active,
            is_admin: slot.is_admin,
            member_count: slot.member_count,
            signal_dbm: slot.signal_dbm,
            is_current: index == current,
        }
    }
}
