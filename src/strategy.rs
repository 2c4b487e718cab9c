//! Queuing strategies: how buffered chunks are measured and when
//! backpressure kicks in.
//!
//! A strategy is a high-water mark plus a pure sizing function. The
//! controller computes `desired_size = high_water_mark - total_size`;
//! a non-positive result tells the producer to stop until reads make
//! room. Strategies are immutable once attached to a stream.

/// Measures chunks and sets the backpressure threshold for a stream.
pub trait QueuingStrategy<C>: Send {
    /// Buffered-size threshold above which backpressure is applied.
    fn high_water_mark(&self) -> f64;

    /// The size of one chunk. Must return a finite, non-negative number;
    /// anything else is treated as a fatal strategy error by the owning
    /// stream.
    fn size(&self, chunk: &C) -> f64;
}

/// Counts every chunk as size 1.
#[derive(Debug, Clone, Copy)]
pub struct CountQueuingStrategy {
    high_water_mark: f64,
}

impl CountQueuingStrategy {
    /// Strategy that applies backpressure once `high_water_mark` chunks
    /// are buffered.
    #[must_use]
    pub fn new(high_water_mark: f64) -> Self {
        Self { high_water_mark }
    }
}

impl Default for CountQueuingStrategy {
    /// One buffered chunk before backpressure.
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl<C> QueuingStrategy<C> for CountQueuingStrategy {
    fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }

    fn size(&self, _chunk: &C) -> f64 {
        1.0
    }
}

/// Sizes each chunk by its byte length.
#[derive(Debug, Clone, Copy)]
pub struct ByteLengthQueuingStrategy {
    high_water_mark: f64,
}

impl ByteLengthQueuingStrategy {
    /// Strategy that applies backpressure once `high_water_mark` bytes
    /// are buffered.
    #[must_use]
    pub fn new(high_water_mark: f64) -> Self {
        Self { high_water_mark }
    }
}

impl<C: AsRef<[u8]>> QueuingStrategy<C> for ByteLengthQueuingStrategy {
    fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }

    #[allow(clippy::cast_precision_loss)]
    fn size(&self, chunk: &C) -> f64 {
        chunk.as_ref().len() as f64
    }
}

/// Validates a size produced by a strategy.
pub(crate) fn valid_size(size: f64) -> bool {
    size.is_finite() && size >= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_strategy_sizes_everything_as_one() {
        let s = CountQueuingStrategy::new(4.0);
        assert_eq!(QueuingStrategy::<&str>::high_water_mark(&s), 4.0);
        assert_eq!(s.size(&"anything"), 1.0);
        assert_eq!(s.size(&""), 1.0);
    }

    #[test]
    fn byte_length_strategy_uses_len() {
        let s = ByteLengthQueuingStrategy::new(1024.0);
        assert_eq!(s.size(&vec![0u8; 16]), 16.0);
        assert_eq!(s.size(&Vec::<u8>::new()), 0.0);
    }

    #[test]
    fn size_validation() {
        assert!(valid_size(0.0));
        assert!(valid_size(10.5));
        assert!(!valid_size(-1.0));
        assert!(!valid_size(f64::NAN));
        assert!(!valid_size(f64::INFINITY));
    }
}
