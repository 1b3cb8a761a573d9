//! The `Subscription` side of the reactive streams contract.
//!
//! A subscription is the only channel through which a subscriber talks back
//! to its publisher. Both methods may be called from any thread, at any
//! time, including from inside one of the subscriber's own callbacks, so
//! implementations take `&self`, never block and never panic.

use std::{
  fmt::{Debug, Formatter},
  sync::Arc,
};

mod demand;
pub use demand::{Demand, DemandHandler, DemandSubscription};

/// Handle given to a subscriber in `on_subscribe`.
pub trait Subscription: Send + Sync {
  /// Authorises the publisher to deliver `n` more elements.
  ///
  /// `n <= 0` is a protocol violation. It terminates the stream with
  /// [`StreamError::IllegalDemand`](crate::error::StreamError::IllegalDemand)
  /// delivered through `on_error`; it is never reported by panicking here.
  fn request(&self, n: i64);

  /// Asks the publisher to stop. Idempotent.
  fn cancel(&self);
}

/// Shared subscription handle.
pub type SubscriptionRef = Arc<dyn Subscription>;

impl Debug for dyn Subscription {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("dyn Subscription").finish_non_exhaustive()
  }
}

/// A subscription that ignores everything.
///
/// Handed to subscribers that are rejected before they ever get a real
/// subscription, so that `on_subscribe` still precedes `on_error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySubscription;

impl EmptySubscription {
  #[inline]
  pub fn shared() -> SubscriptionRef { Arc::new(EmptySubscription) }
}

impl Subscription for EmptySubscription {
  #[inline]
  fn request(&self, _n: i64) {}

  #[inline]
  fn cancel(&self) {}
}

impl<S: Subscription + ?Sized> Subscription for Arc<S> {
  #[inline]
  fn request(&self, n: i64) { (**self).request(n) }

  #[inline]
  fn cancel(&self) { (**self).cancel() }
}
