//! Typed event stream the core produces for its UI collaborator.

use crate::error::SessionError;
use crate::types::{DeviceId, FrequencyId, MemberInfo, PeerKey, ScanResult};

/// Events surfaced on the engine's broadcast channel.
///
/// The UI subscribes via [`crate::engine::Engine::subscribe`]; events are
/// fire-and-forget, lagging subscribers miss old entries.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Somebody is calling us; bound to the given slot pending accept/reject.
    IncomingCall { slot: usize, from: DeviceId },

    /// A join request awaits the local admin's decision.
    JoinPending {
        slot: usize,
        freq: FrequencyId,
        from: DeviceId,
    },

    /// We were invited to a frequency.
    Invited {
        freq: FrequencyId,
        inviter: DeviceId,
        inviter_name: String,
    },

    /// A slot reached CONNECTED.
    Connected { slot: usize, peer: PeerKey },

    /// Our outbound request was rejected.
    Rejected { slot: usize, reason: SessionError },

    /// WAITING expired without a response.
    Timeout { slot: usize },

    /// The peer ended the call, kicked us, or closed the frequency.
    Ended { slot: usize, reason: SessionError },

    /// Retransmissions exhausted or the inactivity watchdog fired.
    LinkLost { slot: usize },

    /// A fatal error froze the slot until an explicit disconnect.
    SlotError { slot: usize, message: String },

    /// Updated member roster for a joined frequency.
    MemberList {
        slot: usize,
        freq: FrequencyId,
        members: Vec<MemberInfo>,
    },

    /// The peer started or stopped a talk burst.
    PeerTalking { slot: usize, talking: bool },

    /// A discovery response landed in the scan snapshot.
    ScanResult(ScanResult),

    /// Another admin announced the same frequency id with an earlier
    /// creation time; their announcement takes precedence.
    FrequencyCollision {
        slot: usize,
        freq: FrequencyId,
        earlier_created_ms: u64,
    },

    /// A session rotated to a fresh key epoch.
    KeyRefreshed { slot: usize, key_id: u32 },
}
