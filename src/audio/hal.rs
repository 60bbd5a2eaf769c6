//! Audio HAL seam.
//!
//! The codec/I2S driver lives outside the core. It is handed the ring halves
//! of the active-audio slot: capture writes 20 ms PCM16 frames into the
//! producer, playback drains the consumer. Stop calls return the halves so
//! the engine can re-bind audio when the dial moves.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{FrameConsumer, FrameProducer};

#[async_trait]
pub trait AudioHal: Send + Sync {
    /// Begin writing captured frames into `sink`.
    async fn start_capture(&self, sink: FrameProducer);

    /// Stop capture, returning the producer if one was bound.
    async fn stop_capture(&self) -> Option<FrameProducer>;

    /// Begin draining `source` to the speaker.
    async fn start_playback(&self, source: FrameConsumer);

    /// Stop playback, returning the consumer if one was bound.
    async fn stop_playback(&self) -> Option<FrameConsumer>;

    fn set_volume(&self, _volume: u8) {}
    fn set_input_gain(&self, _gain: u8) {}
    fn set_mute(&self, _muted: bool) {}
}

/// HAL stub that parks the ring halves and moves no audio.
#[derive(Default)]
pub struct NullAudio {
    capture: Mutex<Option<FrameProducer>>,
    playback: Mutex<Option<FrameConsumer>>,
}

impl NullAudio {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AudioHal for NullAudio {
    async fn start_capture(&self, sink: FrameProducer) {
        *self.capture.lock() = Some(sink);
    }

    async fn stop_capture(&self) -> Option<FrameProducer> {
        self.capture.lock().take()
    }

    async fn start_playback(&self, source: FrameConsumer) {
        *self.playback.lock() = Some(source);
    }

    async fn stop_playback(&self) -> Option<FrameConsumer> {
        self.playback.lock().take()
    }
}
