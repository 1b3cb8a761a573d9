use std::sync::{
  atomic::{AtomicBool, Ordering},
  Weak,
};

use super::Subscription;

/// Outstanding demand of one subscriber.
///
/// Saturates at [`Demand::UNBOUNDED`]. Once there, the counter is treated as
/// "deliver everything" and [`Demand::take_one`] stops decrementing it, the
/// same convention reactive streams uses for `Long.MAX_VALUE`.
///
/// ```rust
/// use rxbridge::subscription::Demand;
///
/// let mut demand = Demand::default();
/// demand.add(2);
/// assert!(demand.take_one());
/// assert!(demand.take_one());
/// assert!(!demand.take_one());
///
/// demand.add(u64::MAX);
/// assert!(demand.is_unbounded());
/// assert!(demand.take_one());
/// assert!(demand.is_unbounded());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Demand(u64);

impl Demand {
  /// The "effectively infinite" sentinel.
  pub const UNBOUNDED: u64 = i64::MAX as u64;

  /// Adds `n`, saturating at [`Demand::UNBOUNDED`].
  #[inline]
  pub fn add(&mut self, n: u64) { self.0 = self.0.saturating_add(n).min(Self::UNBOUNDED); }

  /// Consumes one unit. Returns `false` when there is none.
  #[inline]
  pub fn take_one(&mut self) -> bool {
    match self.0 {
      0 => false,
      Self::UNBOUNDED => true,
      _ => {
        self.0 -= 1;
        true
      }
    }
  }

  #[inline]
  pub fn get(&self) -> u64 { self.0 }

  #[inline]
  pub fn is_zero(&self) -> bool { self.0 == 0 }

  #[inline]
  pub fn is_unbounded(&self) -> bool { self.0 == Self::UNBOUNDED }

  /// Drops all outstanding demand.
  #[inline]
  pub fn clear(&mut self) { self.0 = 0; }
}

/// The publisher half behind a [`DemandSubscription`].
///
/// A handler records each call as a contribution to its work loop and
/// returns; delivery happens later, serialized, possibly on another thread.
pub trait DemandHandler: Send + Sync {
  /// `n` more elements were requested, `n > 0`.
  fn on_request(&self, n: u64);

  /// `request` was called with a non-positive argument.
  fn on_illegal_request(&self, requested: i64);

  /// The subscriber cancelled. Called at most once.
  fn on_cancel(&self);
}

/// Subscription that validates demand and deduplicates cancellation before
/// forwarding to its publisher.
///
/// The publisher is held weakly: a subscriber keeping its subscription alive
/// must not keep a finished bridge (and its buffers) alive with it.
pub struct DemandSubscription<H: ?Sized> {
  handler: Weak<H>,
  cancelled: AtomicBool,
}

impl<H: ?Sized> DemandSubscription<H> {
  pub fn new(handler: Weak<H>) -> Self { Self { handler, cancelled: AtomicBool::new(false) } }

  #[inline]
  pub fn is_cancelled(&self) -> bool { self.cancelled.load(Ordering::Acquire) }
}

impl<H> Subscription for DemandSubscription<H>
where
  H: DemandHandler + ?Sized,
{
  fn request(&self, n: i64) {
    if self.is_cancelled() {
      return;
    }
    let Some(handler) = self.handler.upgrade() else { return };
    match u64::try_from(n) {
      Ok(n) if n > 0 => handler.on_request(n),
      _ => handler.on_illegal_request(n),
    }
  }

  fn cancel(&self) {
    if self.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(handler) = self.handler.upgrade() {
      handler.on_cancel();
    }
  }
}
