//! Sessions: one logical conversation per dial slot.

mod session;
mod state;
pub mod worker;

pub use session::{
    voice_aad, Action, Session, SessionCounters, MAX_FREQ_MEMBERS, WIRE_VOICE_BYTES,
};
pub use state::{SessionState, StateTracker};
pub use worker::{SessionCommand, StartMode, WorkerContext};
