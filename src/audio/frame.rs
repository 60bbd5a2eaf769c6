//! Fixed-size PCM audio frame.

use super::FRAME_BYTES;

/// One 20 ms audio frame with its sequence and capture timestamp.
#[derive(Clone)]
pub struct AudioFrame {
    /// Capture time in milliseconds.
    pub timestamp_ms: u32,
    /// Frame sequence number, wrapping mod 2^16.
    pub sequence: u16,
    /// Bytes of `samples` that carry audio.
    pub len: u16,
    /// PCM16 sample bytes.
    pub samples: [u8; FRAME_BYTES],
    /// False once the slot has been consumed.
    pub valid: bool,
}

impl AudioFrame {
    /// Build a frame from raw sample bytes, truncating to capacity.
    pub fn from_samples(samples: &[u8], sequence: u16, timestamp_ms: u32) -> Self {
        let len = samples.len().min(FRAME_BYTES);
        let mut buf = [0u8; FRAME_BYTES];
        buf[..len].copy_from_slice(&samples[..len]);
        Self {
            timestamp_ms,
            sequence,
            len: len as u16,
            samples: buf,
            valid: true,
        }
    }

    /// A silent full-length frame; played on underrun.
    pub fn silence(sequence: u16, timestamp_ms: u32) -> Self {
        Self {
            timestamp_ms,
            sequence,
            len: FRAME_BYTES as u16,
            samples: [0u8; FRAME_BYTES],
            valid: true,
        }
    }

    /// The occupied sample bytes.
    pub fn audio(&self) -> &[u8] {
        &self.samples[..self.len as usize]
    }
}

impl Default for AudioFrame {
    fn default() -> Self {
        Self {
            timestamp_ms: 0,
            sequence: 0,
            len: 0,
            samples: [0u8; FRAME_BYTES],
            valid: false,
        }
    }
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("timestamp_ms", &self.timestamp_ms)
            .field("sequence", &self.sequence)
            .field("len", &self.len)
            .field("valid", &self.valid)
            .finish_non_exhaustive()
    }
}
