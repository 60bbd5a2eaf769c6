//! The 15-position dial: slots, cursor, and the worker lifecycle.

mod manager;
mod slot;

pub use manager::DialManager;
pub use slot::{
    DialSlot, DialState, HalAudio, SlotConfig, SlotSnapshot, SlotState, WorkerHandle,
    DIAL_POSITIONS, MAX_DIAL_WORKERS,
};
