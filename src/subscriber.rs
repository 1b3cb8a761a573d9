//! `Subscriber` and `Publisher`, the other two roles of the contract.
//!
//! Unlike the subscription, a subscriber is *not* required to be thread-safe:
//! a publisher must call it from one thread at a time and never reentrantly.
//! The bridges in this crate guarantee that through
//! [`WorkLoop`](crate::work_loop::WorkLoop). All callbacks take `&mut self`
//! so a subscriber can live behind a `Box<dyn Subscriber<T>>` without extra
//! allocation per signal.

use crate::{error::StreamError, subscription::SubscriptionRef};

/// Consumer of a stream.
///
/// Signals arrive as `on_subscribe (on_next)* (on_complete | on_error)?`.
pub trait Subscriber<T>: Send {
  /// First signal. The subscriber requests elements through `subscription`.
  fn on_subscribe(&mut self, subscription: SubscriptionRef);

  fn on_next(&mut self, item: T);

  /// Terminal. Nothing follows.
  fn on_error(&mut self, err: StreamError);

  /// Terminal. Nothing follows.
  fn on_complete(&mut self);
}

/// Type-erased subscriber.
pub type BoxedSubscriber<T> = Box<dyn Subscriber<T>>;

impl<T, S: Subscriber<T> + ?Sized> Subscriber<T> for Box<S> {
  #[inline]
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    (**self).on_subscribe(subscription)
  }

  #[inline]
  fn on_next(&mut self, item: T) { (**self).on_next(item) }

  #[inline]
  fn on_error(&mut self, err: StreamError) { (**self).on_error(err) }

  #[inline]
  fn on_complete(&mut self) { (**self).on_complete() }
}

/// Producer of a stream.
pub trait Publisher<T> {
  /// Attaches a subscriber. Never panics; every failure reaches the
  /// subscriber as `on_error`.
  fn subscribe_boxed(&self, subscriber: BoxedSubscriber<T>);

  #[inline]
  fn subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<T> + 'static,
    Self: Sized,
  {
    self.subscribe_boxed(Box::new(subscriber))
  }
}
