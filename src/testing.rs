//! Fixtures shared by the unit tests: a recording subscriber, recording
//! transport contexts and a release-counting element.

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use crate::{
  error::{Result, StreamError},
  executor::ExecutorRef,
  signal::Release,
  sink::{SinkContext, WriteCompletion},
  source::SourceContext,
  subscriber::Subscriber,
  subscription::{Subscription, SubscriptionRef},
};

// ==================== Tracked ====================

/// Counts releases of [`Tracked`] elements.
#[derive(Debug, Clone, Default)]
pub struct Releases(Arc<AtomicUsize>);

impl Releases {
  pub fn count(&self) -> usize { self.0.load(Ordering::SeqCst) }
}

/// An element holding a (pretend) pooled resource.
#[derive(Debug, Clone)]
pub struct Tracked {
  value: i32,
  releases: Releases,
}

impl Tracked {
  pub fn new(value: i32) -> (Self, Releases) {
    let releases = Releases::default();
    (Self::with(&releases, value), releases)
  }

  pub fn with(releases: &Releases, value: i32) -> Self { Self { value, releases: releases.clone() } }
}

impl PartialEq for Tracked {
  fn eq(&self, other: &Self) -> bool { self.value == other.value }
}

impl Release for Tracked {
  fn release(self) { self.releases.0.fetch_add(1, Ordering::SeqCst); }
}

// ==================== Recorder ====================

#[derive(Debug, Clone, PartialEq)]
pub enum Event<T> {
  Subscribe,
  Next(T),
  Complete,
  /// The error's message.
  Error(String),
}

/// Subscriber recording every signal. Clones share the record.
///
/// Tracks how many callbacks are executing at once, across threads and
/// through reentrancy, in [`Recorder::max_depth`].
pub struct Recorder<T> {
  inner: Arc<RecorderInner<T>>,
}

struct RecorderInner<T> {
  events: Mutex<Vec<Event<T>>>,
  subscription: Mutex<Option<SubscriptionRef>>,
  depth: AtomicUsize,
  max_depth: AtomicUsize,
  request_on_next: AtomicI64,
  panic_on_next: AtomicBool,
}

impl<T> Clone for Recorder<T> {
  fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<T> Recorder<T> {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(RecorderInner {
        events: Mutex::new(vec![]),
        subscription: Mutex::new(None),
        depth: AtomicUsize::new(0),
        max_depth: AtomicUsize::new(0),
        request_on_next: AtomicI64::new(0),
        panic_on_next: AtomicBool::new(false),
      }),
    }
  }

  pub fn events(&self) -> Vec<Event<T>>
  where
    T: Clone,
  {
    self.inner.events.lock().clone()
  }

  pub fn items(&self) -> Vec<T>
  where
    T: Clone,
  {
    let events = self.inner.events.lock();
    events
      .iter()
      .filter_map(|e| match e {
        Event::Next(item) => Some(item.clone()),
        _ => None,
      })
      .collect()
  }

  pub fn terminal_count(&self) -> usize {
    let events = self.inner.events.lock();
    events.iter().filter(|e| matches!(e, Event::Complete | Event::Error(_))).count()
  }

  pub fn max_depth(&self) -> usize { self.inner.max_depth.load(Ordering::SeqCst) }

  /// Live clones of this recorder, including any held by a publisher.
  pub fn handles(&self) -> usize { Arc::strong_count(&self.inner) }

  pub fn request(&self, n: i64) {
    let subscription = self.inner.subscription.lock().clone();
    if let Some(subscription) = subscription {
      subscription.request(n);
    }
  }

  pub fn cancel(&self) {
    let subscription = self.inner.subscription.lock().clone();
    if let Some(subscription) = subscription {
      subscription.cancel();
    }
  }

  /// Requests `n` more from inside every `on_next`.
  pub fn request_on_next(&self, n: i64) { self.inner.request_on_next.store(n, Ordering::SeqCst); }

  pub fn panic_on_next(&self) { self.inner.panic_on_next.store(true, Ordering::SeqCst); }

  fn enter(&self) {
    let depth = self.inner.depth.fetch_add(1, Ordering::SeqCst) + 1;
    self.inner.max_depth.fetch_max(depth, Ordering::SeqCst);
  }

  fn exit(&self) { self.inner.depth.fetch_sub(1, Ordering::SeqCst); }

  fn record(&self, event: Event<T>) { self.inner.events.lock().push(event); }
}

impl<T: Send + 'static> Subscriber<T> for Recorder<T> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.enter();
    *self.inner.subscription.lock() = Some(subscription);
    self.record(Event::Subscribe);
    self.exit();
  }

  fn on_next(&mut self, item: T) {
    self.enter();
    if self.inner.panic_on_next.load(Ordering::SeqCst) {
      panic!("subscriber failure");
    }
    self.record(Event::Next(item));
    let n = self.inner.request_on_next.load(Ordering::SeqCst);
    if n != 0 {
      self.request(n);
    }
    self.exit();
  }

  fn on_error(&mut self, err: StreamError) {
    self.enter();
    self.record(Event::Error(err.to_string()));
    self.exit();
  }

  fn on_complete(&mut self) {
    self.enter();
    self.record(Event::Complete);
    self.exit();
  }
}

// ==================== RecordingSubscription ====================

/// Upstream stand-in for a sink: records what it is asked for.
#[derive(Default)]
pub struct RecordingSubscription {
  requests: Mutex<Vec<i64>>,
  cancels: AtomicUsize,
}

impl RecordingSubscription {
  pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

  pub fn requests(&self) -> Vec<i64> { self.requests.lock().clone() }

  pub fn cancels(&self) -> usize { self.cancels.load(Ordering::SeqCst) }
}

impl Subscription for RecordingSubscription {
  fn request(&self, n: i64) { self.requests.lock().push(n); }

  fn cancel(&self) { self.cancels.fetch_add(1, Ordering::SeqCst); }
}

// ==================== MockSource ====================

pub struct MockSource<T> {
  executor: ExecutorRef,
  reads: AtomicUsize,
  closes: AtomicUsize,
  forwarded: Mutex<Vec<T>>,
}

impl<T> MockSource<T> {
  pub fn new(executor: ExecutorRef) -> Arc<Self> {
    Arc::new(Self {
      executor,
      reads: AtomicUsize::new(0),
      closes: AtomicUsize::new(0),
      forwarded: Mutex::new(vec![]),
    })
  }

  pub fn reads(&self) -> usize { self.reads.load(Ordering::SeqCst) }

  pub fn closes(&self) -> usize { self.closes.load(Ordering::SeqCst) }

  pub fn forwarded(&self) -> Vec<T>
  where
    T: Clone,
  {
    self.forwarded.lock().clone()
  }
}

impl<T: Send> SourceContext<T> for MockSource<T> {
  fn executor(&self) -> ExecutorRef { self.executor.clone() }

  fn read(&self) { self.reads.fetch_add(1, Ordering::SeqCst); }

  fn close(&self) { self.closes.fetch_add(1, Ordering::SeqCst); }

  fn forward(&self, item: T)
  where
    T: Release,
  {
    self.forwarded.lock().push(item);
  }
}

// ==================== MockSink ====================

/// Transport stand-in for a sink. Writes stay in flight until completed with
/// [`MockSink::complete_next`], unless [`MockSink::auto_complete`] is set.
pub struct MockSink<T> {
  executor: ExecutorRef,
  active: AtomicBool,
  writable: AtomicBool,
  auto_complete: AtomicBool,
  written: Mutex<Vec<T>>,
  pending: Mutex<VecDeque<WriteCompletion>>,
  closes: AtomicUsize,
  aborts: Mutex<Vec<String>>,
}

impl<T> MockSink<T> {
  pub fn new(executor: ExecutorRef) -> Arc<Self> {
    Arc::new(Self {
      executor,
      active: AtomicBool::new(true),
      writable: AtomicBool::new(true),
      auto_complete: AtomicBool::new(false),
      written: Mutex::new(vec![]),
      pending: Mutex::new(VecDeque::new()),
      closes: AtomicUsize::new(0),
      aborts: Mutex::new(vec![]),
    })
  }

  pub fn set_active(&self, active: bool) { self.active.store(active, Ordering::SeqCst); }

  pub fn set_writable(&self, writable: bool) { self.writable.store(writable, Ordering::SeqCst); }

  /// Completes every write successfully, before `write` returns.
  pub fn auto_complete(&self) { self.auto_complete.store(true, Ordering::SeqCst); }

  /// Completes the oldest in-flight write. `false` when none is in flight.
  pub fn complete_next(&self, result: Result<()>) -> bool {
    let completion = self.pending.lock().pop_front();
    match completion {
      Some(completion) => {
        completion.complete(result);
        true
      }
      None => false,
    }
  }

  /// Drops every in-flight completion without completing it.
  pub fn drop_pending(&self) {
    let pending = std::mem::take(&mut *self.pending.lock());
    drop(pending);
  }

  pub fn written(&self) -> Vec<T>
  where
    T: Clone,
  {
    self.written.lock().clone()
  }

  pub fn closes(&self) -> usize { self.closes.load(Ordering::SeqCst) }

  pub fn aborts(&self) -> Vec<String> { self.aborts.lock().clone() }
}

impl<T: Send> SinkContext<T> for MockSink<T> {
  fn executor(&self) -> ExecutorRef { self.executor.clone() }

  fn is_active(&self) -> bool { self.active.load(Ordering::SeqCst) }

  fn is_writable(&self) -> bool { self.writable.load(Ordering::SeqCst) }

  fn write(&self, item: T, completion: WriteCompletion) {
    self.written.lock().push(item);
    if self.auto_complete.load(Ordering::SeqCst) {
      completion.succeed();
    } else {
      self.pending.lock().push_back(completion);
    }
  }

  fn close(&self) { self.closes.fetch_add(1, Ordering::SeqCst); }

  fn abort(&self, err: StreamError) { self.aborts.lock().push(err.to_string()); }
}
