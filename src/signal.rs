//! Signals and owned elements.
//!
//! Elements crossing a bridge may own resources from a pool (pooled buffers,
//! leased slots, file handles). Dropping such an element is not enough: the
//! pool needs to hear about it. Every element type therefore implements
//! [`Release`], and a bridge calls it on every path that discards an element
//! instead of delivering it.

use std::{borrow::Cow, sync::Arc};

use crate::error::StreamError;

/// A value flowing through a pipeline.
#[derive(Debug, Clone)]
pub enum Signal<T> {
  Next(T),
  Complete,
  Error(StreamError),
}

impl<T> Signal<T> {
  /// `Complete` or `Error`.
  #[inline]
  pub fn is_terminal(&self) -> bool { !matches!(self, Signal::Next(_)) }

  /// Releases the element carried by a `Next`; terminals are dropped.
  pub fn release(self)
  where
    T: Release,
  {
    if let Signal::Next(item) = self {
      item.release();
    }
  }
}

/// Explicit disposal of an element that will never be delivered.
///
/// Implementations hand pooled resources back to their owner. Plain values
/// use the empty default.
pub trait Release: Sized {
  /// Gives the element's resources back. Called at most once per element.
  #[inline]
  fn release(self) {}
}

macro_rules! impl_noop_release {
  ($($t:ty),* $(,)?) => {
    $(impl Release for $t {})*
  };
}

impl_noop_release!(
  (),
  bool,
  char,
  u8,
  u16,
  u32,
  u64,
  u128,
  usize,
  i8,
  i16,
  i32,
  i64,
  i128,
  isize,
  f32,
  f64,
  String,
  &'static str,
);

impl<T> Release for Vec<T> {}
impl<T: ?Sized> Release for Arc<T> {}
impl<'a, T: ToOwned + ?Sized> Release for Cow<'a, T> {}

impl<T: Release> Release for Box<T> {
  #[inline]
  fn release(self) { (*self).release() }
}

impl<T: Release> Release for Option<T> {
  #[inline]
  fn release(self) {
    if let Some(inner) = self {
      inner.release();
    }
  }
}

impl<A: Release, B: Release> Release for (A, B) {
  fn release(self) {
    self.0.release();
    self.1.release();
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::testing::Tracked;

  #[test]
  fn terminal_signals() {
    assert!(!Signal::Next(1).is_terminal());
    assert!(Signal::<i32>::Complete.is_terminal());
    assert!(Signal::<i32>::Error(StreamError::Closed).is_terminal());
  }

  #[test]
  fn releasing_a_next_releases_its_element() {
    let (item, released) = Tracked::new(7);
    Signal::Next(item).release();
    assert_eq!(released.count(), 1);

    Signal::<Tracked>::Complete.release();
    assert_eq!(released.count(), 1);
  }

  #[test]
  fn boxed_and_optional_elements_forward_release() {
    let (item, released) = Tracked::new(1);
    Box::new(Some(item)).release();
    assert_eq!(released.count(), 1);
  }
}
