//! Bridge configuration.

use crate::error::{Result, StreamError};

/// Demand watermarks of a [`SinkSubscriber`](crate::sink::SinkSubscriber).
///
/// Requesting one element per write would cost a round trip per element.
/// Instead the sink tops outstanding demand up to `high` in one
/// `request(high - outstanding)` whenever it has fallen to `low` or below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
  low: u64,
  high: u64,
}

impl Watermarks {
  pub const DEFAULT_LOW: u64 = 4;
  pub const DEFAULT_HIGH: u64 = 16;

  /// Fails unless `low < high`.
  pub fn new(low: u64, high: u64) -> Result<Self> {
    if low >= high {
      return Err(StreamError::InvalidWatermarks { low, high });
    }
    Ok(Self { low, high })
  }

  #[inline]
  pub fn low(&self) -> u64 { self.low }

  #[inline]
  pub fn high(&self) -> u64 { self.high }

  /// How much to request given the current outstanding demand, if anything.
  #[inline]
  pub fn refill(&self, outstanding: u64) -> Option<u64> {
    (outstanding <= self.low).then(|| self.high - outstanding)
  }
}

impl Default for Watermarks {
  fn default() -> Self { Self { low: Self::DEFAULT_LOW, high: Self::DEFAULT_HIGH } }
}
