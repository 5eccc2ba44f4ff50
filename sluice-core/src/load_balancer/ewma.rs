//! Exponentially weighted moving average of a node's response time.
//!
//! Each new sample is blended with the running average:
//! `next = alpha * sample + (1 - alpha) * current`. The value is stored as
//! the bits of an `f64` in an `AtomicU64` so concurrent reporters never take
//! a lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Bit pattern marking "no sample yet". It is a NaN payload, and NaN is never stored.
const UNSET: u64 = u64::MAX;

/// Lock-free response-time average for a single node.
#[derive(Debug)]
pub struct ResponseTimeEwma {
    /// Current average, as `f64` bits, or [`UNSET`].
    ewma: AtomicU64,

    /// Weight of the newest sample.
    alpha: f64,

    /// When set, the first sample becomes the average as-is. Otherwise it is
    /// blended against zero, which biases the first few samples low.
    seed_with_first: bool,
}

impl ResponseTimeEwma {
    /// Create an empty average. `alpha` is clamped into `(0, 1]`.
    pub fn new(alpha: f64, seed_with_first: bool) -> Self {
        let alpha = if alpha.is_finite() && alpha > 0.0 {
            alpha.min(1.0)
        } else {
            1.0
        };
        Self {
            ewma: AtomicU64::new(UNSET),
            alpha,
            seed_with_first,
        }
    }

    /// Current average in milliseconds, `0.0` before the first sample.
    pub fn get(&self) -> f64 {
        match self.ewma.load(Ordering::Acquire) {
            UNSET => 0.0,
            bits => f64::from_bits(bits),
        }
    }

    /// Whether at least one sample has been observed.
    pub fn is_seeded(&self) -> bool {
        self.ewma.load(Ordering::Acquire) != UNSET
    }

    /// Fold a new response-time sample into the average.
    ///
    /// Negative samples count as zero; non-finite samples are ignored.
    pub fn observe(&self, sample_ms: f64) {
        if !sample_ms.is_finite() {
            return;
        }
        let sample = sample_ms.max(0.0);
        let mut current_bits = self.ewma.load(Ordering::Acquire);

        loop {
            let next = match current_bits {
                UNSET if self.seed_with_first => sample,
                UNSET => self.alpha * sample,
                bits => self.alpha * sample + (1.0 - self.alpha) * f64::from_bits(bits),
            };

            match self.ewma.compare_exchange_weak(
                current_bits,
                next.to_bits(),
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(updated_bits) => current_bits = updated_bits,
            }
        }
    }
}
