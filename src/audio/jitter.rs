//! Playback gating with hysteresis.

/// Decides when playback may consume frames.
///
/// The bare ring predicate (`count >= depth`) re-arms on every underrun,
/// which stutters on marginal links. The gate primes once the buffer reaches
/// the configured depth and stays open until the buffer fully drains.
#[derive(Debug, Clone)]
pub struct JitterGate {
    depth: usize,
    primed: bool,
}

impl JitterGate {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            primed: false,
        }
    }

    /// Feed the current buffer fill level; returns whether to play.
    pub fn poll(&mut self, count: usize) -> bool {
        if self.primed {
            if count == 0 {
                self.primed = false;
            }
        } else if count >= self.depth {
            self.primed = true;
        }
        self.primed
    }

    /// Force re-buffering, e.g. after a talk burst ended.
    pub fn reset(&mut self) {
        self.primed = false;
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }
}
