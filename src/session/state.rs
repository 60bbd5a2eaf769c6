//! Session state machine.

use std::fmt;
use std::time::Instant;

use tracing::debug;

/// States a session moves through.
///
/// ```text
///         CallReq/JoinReq         Accept
/// IDLE ─────────────────► WAITING ─────► CONNECTED
///  ▲                        │               │
///  │                        │ Reject/Timeout│ End/Close/Kick/LinkLoss
///  └────────────────────────┴───────────────┘
///
///         IncomingReq              Accept
/// IDLE ─────────────────► INCOMING ─────► CONNECTED
/// ```
///
/// IDLE is terminal for tear-down; a worker whose session returns to IDLE
/// exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// Outbound request sent, awaiting the peer's answer.
    Waiting,
    /// Unsolicited request received, awaiting the local user's answer.
    Incoming,
    Connected,
}

impl SessionState {
    /// Whether `to` is a legal successor of `self`.
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::{Connected, Idle, Incoming, Waiting};
        matches!(
            (self, to),
            (Idle, Waiting)
                | (Idle, Incoming)
                | (Idle, Connected)      // admin creating a frequency
                | (Waiting, Connected)
                | (Waiting, Idle)
                | (Incoming, Connected)
                | (Incoming, Idle)
                | (Connected, Idle)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Waiting => "WAITING",
            Self::Incoming => "INCOMING",
            Self::Connected => "CONNECTED",
        };
        write!(f, "{s}")
    }
}

/// Current state plus the instant it was entered.
#[derive(Debug, Clone)]
pub struct StateTracker {
    state: SessionState,
    entered_at: Instant,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            entered_at: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn entered_at(&self) -> Instant {
        self.entered_at
    }

    /// Move to a new state, recording the entry timestamp.
    ///
    /// Illegal transitions are refused and left in place.
    pub fn transition(&mut self, to: SessionState) -> bool {
        if self.state == to {
            return true;
        }
        if !self.state.can_transition(to) {
            debug!(from = %self.state, to = %to, "Refused illegal session transition");
            return false;
        }
        debug!(from = %self.state, to = %to, "Session state change");
        self.state = to;
        self.entered_at = Instant::now();
        true
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
