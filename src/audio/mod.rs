//! Audio pipeline: fixed-duration PCM frames, a lock-free SPSC ring buffer,
//! and the jitter gate that delays playback until enough frames arrived.

mod frame;
mod hal;
mod jitter;
mod ring;

pub use frame::AudioFrame;
pub use hal::{AudioHal, NullAudio};
pub use jitter::JitterGate;
pub use ring::{sequence_gap, AudioRing, AudioStats, FrameConsumer, FrameProducer};

use std::sync::OnceLock;
use std::time::Instant;

/// Samples per frame: 20 ms at 8 kHz.
pub const FRAME_SAMPLES: usize = 160;

/// Bytes per frame: 16-bit mono PCM.
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

/// Frames held by one ring buffer.
pub const RING_FRAMES: usize = 32;

/// Frame duration in milliseconds.
pub const FRAME_DURATION_MS: u32 = 20;

/// Default jitter-buffer depth in frames.
pub const DEFAULT_JITTER_DEPTH: usize = 3;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic milliseconds since the first call; used to stamp frames when
/// the capture side supplies no timestamp.
pub fn now_ms() -> u32 {
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u32
}
