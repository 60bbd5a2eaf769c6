//! Lock-free SPSC ring buffer of audio frames.
//!
//! One producer (capture ISR or the RX dispatcher) and one consumer (the
//! playback task). Because each index is written by exactly one side, no
//! lock is needed: the producer publishes a slot with a release store of the
//! write index after the payload copy, and the consumer observes it with an
//! acquire load.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::AudioError;

use super::{now_ms, AudioFrame, DEFAULT_JITTER_DEPTH, FRAME_DURATION_MS, RING_FRAMES};

/// Snapshot of ring statistics. All counters are monotonic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStats {
    pub frames_written: u64,
    pub frames_read: u64,
    pub frames_dropped: u64,
    pub frames_missed: u64,
    pub overruns: u64,
    pub underruns: u64,
    pub max_fill: usize,
    pub last_sequence: u16,
}

#[derive(Default)]
struct RingCounters {
    frames_written: AtomicU64,
    frames_read: AtomicU64,
    frames_dropped: AtomicU64,
    frames_missed: AtomicU64,
    overruns: AtomicU64,
    underruns: AtomicU64,
    max_fill: AtomicUsize,
    last_sequence: AtomicU16,
}

/// Fixed ring of [`RING_FRAMES`] audio frames.
///
/// Construct with [`AudioRing::new`], then [`AudioRing::split`] once to get
/// the producer and consumer handles. Capacity is `RING_FRAMES - 1`: the
/// ring is full when advancing the write index would meet the read index.
pub struct AudioRing {
    frames: Box<[UnsafeCell<AudioFrame>]>,
    write_idx: AtomicUsize,
    read_idx: AtomicUsize,
    next_sequence: AtomicU16,
    jitter_depth: AtomicUsize,
    stats: RingCounters,
    split_taken: AtomicBool,
}

// Slots are only touched by the side that owns the corresponding index.
unsafe impl Send for AudioRing {}
unsafe impl Sync for AudioRing {}

impl AudioRing {
    pub fn new() -> Arc<Self> {
        Self::with_jitter_depth(DEFAULT_JITTER_DEPTH)
    }

    pub fn with_jitter_depth(depth: usize) -> Arc<Self> {
        let frames = (0..RING_FRAMES)
            .map(|_| UnsafeCell::new(AudioFrame::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Arc::new(Self {
            frames,
            write_idx: AtomicUsize::new(0),
            read_idx: AtomicUsize::new(0),
            next_sequence: AtomicU16::new(0),
            jitter_depth: AtomicUsize::new(depth.min(RING_FRAMES / 2)),
            stats: RingCounters::default(),
            split_taken: AtomicBool::new(false),
        })
    }

    /// Take the producer/consumer pair. Returns `None` after the first call.
    pub fn split(self: &Arc<Self>) -> Option<(FrameProducer, FrameConsumer)> {
        if self.split_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some((
            FrameProducer {
                ring: Arc::clone(self),
            },
            FrameConsumer {
                ring: Arc::clone(self),
            },
        ))
    }

    /// Frames currently buffered.
    pub fn count(&self) -> usize {
        let write = self.write_idx.load(Ordering::Acquire);
        let read = self.read_idx.load(Ordering::Acquire);
        (write + RING_FRAMES - read) % RING_FRAMES
    }

    pub fn is_empty(&self) -> bool {
        self.write_idx.load(Ordering::Acquire) == self.read_idx.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        let write = self.write_idx.load(Ordering::Acquire);
        let read = self.read_idx.load(Ordering::Acquire);
        (write + 1) % RING_FRAMES == read
    }

    /// Fill level as a percentage of capacity.
    pub fn fill_percent(&self) -> u8 {
        (self.count() * 100 / RING_FRAMES) as u8
    }

    /// Buffered audio duration in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        self.count() as u32 * FRAME_DURATION_MS
    }

    /// True once enough frames accumulated to absorb arrival jitter.
    pub fn jitter_ready(&self) -> bool {
        self.count() >= self.jitter_depth.load(Ordering::Relaxed)
    }

    /// Set the jitter depth, capped at half the ring.
    pub fn set_jitter_depth(&self, depth: usize) {
        self.jitter_depth
            .store(depth.min(RING_FRAMES / 2), Ordering::Relaxed);
    }

    pub fn jitter_depth(&self) -> usize {
        self.jitter_depth.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> AudioStats {
        AudioStats {
            frames_written: self.stats.frames_written.load(Ordering::Relaxed),
            frames_read: self.stats.frames_read.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            frames_missed: self.stats.frames_missed.load(Ordering::Relaxed),
            overruns: self.stats.overruns.load(Ordering::Relaxed),
            underruns: self.stats.underruns.load(Ordering::Relaxed),
            max_fill: self.stats.max_fill.load(Ordering::Relaxed),
            last_sequence: self.stats.last_sequence.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.stats.frames_written.store(0, Ordering::Relaxed);
        self.stats.frames_read.store(0, Ordering::Relaxed);
        self.stats.frames_dropped.store(0, Ordering::Relaxed);
        self.stats.frames_missed.store(0, Ordering::Relaxed);
        self.stats.overruns.store(0, Ordering::Relaxed);
        self.stats.underruns.store(0, Ordering::Relaxed);
        self.stats.max_fill.store(0, Ordering::Relaxed);
    }

    fn record_fill(&self) {
        let fill = self.count();
        self.stats.max_fill.fetch_max(fill, Ordering::Relaxed);
    }
}

/// Writer half of an [`AudioRing`]. One per ring; not cloneable.
pub struct FrameProducer {
    ring: Arc<AudioRing>,
}

impl FrameProducer {
    /// Write raw samples as a new frame.
    ///
    /// Stamps the next locally generated sequence number and the supplied
    /// timestamp (or the monotonic clock). Fails with `Full` when the next
    /// write would meet the read index; the frame is dropped, never
    /// overwritten.
    pub fn write(&self, samples: &[u8], timestamp_ms: Option<u32>) -> Result<(), AudioError> {
        let ring = &*self.ring;
        let sequence = ring.next_sequence.fetch_add(1, Ordering::Relaxed);
        let frame = AudioFrame::from_samples(
            samples,
            sequence,
            timestamp_ms.unwrap_or_else(now_ms),
        );
        self.push(&frame)?;
        ring.stats.last_sequence.store(sequence, Ordering::Relaxed);
        Ok(())
    }

    /// Write a received frame, preserving its sequence number.
    ///
    /// Detects gaps against the last seen sequence and adds the gap to
    /// `frames_missed`; this is the only path that does gap accounting.
    pub fn write_frame(&self, frame: &AudioFrame) -> Result<(), AudioError> {
        let ring = &*self.ring;

        if ring.stats.frames_written.load(Ordering::Relaxed) > 0 {
            let expected = ring
                .stats
                .last_sequence
                .load(Ordering::Relaxed)
                .wrapping_add(1);
            if frame.sequence != expected {
                let gap = sequence_gap(expected, frame.sequence);
                ring.stats
                    .frames_missed
                    .fetch_add(u64::from(gap), Ordering::Relaxed);
            }
        }
        ring.stats
            .last_sequence
            .store(frame.sequence, Ordering::Relaxed);

        self.push(frame)
    }

    fn push(&self, frame: &AudioFrame) -> Result<(), AudioError> {
        let ring = &*self.ring;
        let write = ring.write_idx.load(Ordering::Relaxed);
        let read = ring.read_idx.load(Ordering::Acquire);
        let next = (write + 1) % RING_FRAMES;

        if next == read {
            ring.stats.overruns.fetch_add(1, Ordering::Relaxed);
            ring.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return Err(AudioError::Full);
        }

        // Safety: SPSC discipline — only this producer touches the slot at
        // write_idx, and the consumer cannot observe it until the release
        // store below.
        unsafe {
            let slot = &mut *ring.frames[write].get();
            slot.clone_from(frame);
            slot.valid = true;
        }

        ring.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        ring.write_idx.store(next, Ordering::Release);
        ring.record_fill();
        Ok(())
    }

    pub fn ring(&self) -> &Arc<AudioRing> {
        &self.ring
    }
}

/// Reader half of an [`AudioRing`]. One per ring; not cloneable.
pub struct FrameConsumer {
    ring: Arc<AudioRing>,
}

impl FrameConsumer {
    /// Pop the oldest frame. Fails with `Empty` on underrun.
    pub fn read(&self) -> Result<AudioFrame, AudioError> {
        let ring = &*self.ring;
        let write = ring.write_idx.load(Ordering::Acquire);
        let read = ring.read_idx.load(Ordering::Relaxed);

        if write == read {
            ring.stats.underruns.fetch_add(1, Ordering::Relaxed);
            return Err(AudioError::Empty);
        }

        // Safety: SPSC discipline — see push().
        let frame = unsafe {
            let slot = &mut *ring.frames[read].get();
            let frame = slot.clone();
            slot.valid = false;
            frame
        };

        ring.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        ring.read_idx
            .store((read + 1) % RING_FRAMES, Ordering::Release);
        Ok(frame)
    }

    /// Look at the oldest frame without consuming it.
    pub fn peek(&self) -> Result<AudioFrame, AudioError> {
        let ring = &*self.ring;
        let write = ring.write_idx.load(Ordering::Acquire);
        let read = ring.read_idx.load(Ordering::Relaxed);

        if write == read {
            return Err(AudioError::Empty);
        }

        // Safety: SPSC discipline — see push().
        Ok(unsafe { (*ring.frames[read].get()).clone() })
    }

    /// Discard the oldest frame.
    pub fn skip(&self) -> Result<(), AudioError> {
        let ring = &*self.ring;
        let write = ring.write_idx.load(Ordering::Acquire);
        let read = ring.read_idx.load(Ordering::Relaxed);

        if write == read {
            return Err(AudioError::Empty);
        }

        // Safety: SPSC discipline — see push().
        unsafe {
            (*ring.frames[read].get()).valid = false;
        }
        ring.read_idx
            .store((read + 1) % RING_FRAMES, Ordering::Release);
        Ok(())
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        let ring = &*self.ring;
        let write = ring.write_idx.load(Ordering::Acquire);
        ring.read_idx.store(write, Ordering::Release);
    }

    pub fn ring(&self) -> &Arc<AudioRing> {
        &self.ring
    }
}

/// Frames missing between an expected and a received sequence, mod 2^16.
pub fn sequence_gap(expected: u16, received: u16) -> u16 {
    if received >= expected {
        received - expected
    } else {
        (0xFFFF - expected) + received + 1
    }
}
