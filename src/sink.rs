//! Publisher → Sink bridge.
//!
//! [`SinkSubscriber`] subscribes to a [`Publisher`](crate::subscriber::Publisher)
//! and writes every element into a push-based sink (an outbound transport).
//! Demand is replenished in batches between two [`Watermarks`], and only
//! while the sink is active and writable.

use std::{
  collections::VecDeque,
  fmt::{Debug, Formatter},
  sync::{Arc, Weak},
};

use tracing::{debug, trace, warn};

use crate::{
  config::Watermarks,
  error::{Result, StreamError},
  executor::{assert_same_executor, ExecutorRef},
  signal::Release,
  subscriber::Subscriber,
  subscription::SubscriptionRef,
  work_loop::{Drain, WorkLoop},
};

/// The transport a [`SinkSubscriber`] writes into.
pub trait SinkContext<T>: Send + Sync {
  /// The serial executor the transport's events are raised on.
  fn executor(&self) -> ExecutorRef;

  fn is_active(&self) -> bool;

  fn is_writable(&self) -> bool;

  /// Writes `item`. The transport reports the outcome through `completion`,
  /// from any thread, possibly before `write` returns.
  fn write(&self, item: T, completion: WriteCompletion);

  /// The stream completed: flush and close.
  fn close(&self);

  /// The stream failed.
  fn abort(&self, err: StreamError) {
    warn!(error = %err, "aborting sink");
    self.close();
  }
}

pub type SinkContextRef<T> = Arc<dyn SinkContext<T>>;

/// Callback for the outcome of one [`SinkContext::write`].
///
/// Dropping it without completing counts as a failed write.
#[must_use = "a write that is never completed stalls the sink"]
pub struct WriteCompletion {
  callback: Option<Box<dyn FnOnce(Result<()>) + Send>>,
}

impl WriteCompletion {
  pub fn new<F>(callback: F) -> Self
  where
    F: FnOnce(Result<()>) + Send + 'static,
  {
    Self { callback: Some(Box::new(callback)) }
  }

  pub fn complete(mut self, result: Result<()>) {
    if let Some(callback) = self.callback.take() {
      callback(result);
    }
  }

  #[inline]
  pub fn succeed(self) { self.complete(Ok(())) }

  #[inline]
  pub fn fail(self, err: StreamError) { self.complete(Err(err)) }
}

impl Drop for WriteCompletion {
  fn drop(&mut self) {
    if let Some(callback) = self.callback.take() {
      callback(Err(StreamError::Closed));
    }
  }
}

impl Debug for WriteCompletion {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("WriteCompletion").field("pending", &self.callback.is_some()).finish()
  }
}

/// Lifecycle of a [`SinkSubscriber`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkState {
  NoSubscriptionOrContext,
  /// Context attached, waiting for `on_subscribe`.
  NoSubscription,
  /// Subscribed, waiting for the context.
  NoContext,
  Running,
  /// Subscribed and attached, but the transport is not active yet.
  Inactive,
  Cancelled,
  Complete,
}

/// Subscriber writing into a push-based sink.
///
/// ```text
/// NoSubscriptionOrContext ─┬─► NoSubscription ─┬─► Running ⇄ Inactive
///                          └─► NoContext ──────┘        │
///                                                       ▼
///                                           Cancelled | Complete
/// ```
///
/// Subscribe it with `publisher.subscribe(sink.clone())`; the transport side
/// drives it through [`attach`](Self::attach), [`on_active`](Self::on_active),
/// [`on_inactive`](Self::on_inactive),
/// [`on_writability_changed`](Self::on_writability_changed) and
/// [`detach`](Self::detach).
pub struct SinkSubscriber<T: Release> {
  me: Weak<Self>,
  executor: ExecutorRef,
  work: WorkLoop<Machine<T>>,
}

impl<T> SinkSubscriber<T>
where
  T: Release + Send + 'static,
{
  pub fn new(executor: ExecutorRef) -> Arc<Self> {
    Self::with_watermarks(executor, Watermarks::default())
  }

  pub fn with_watermarks(executor: ExecutorRef, marks: Watermarks) -> Arc<Self> {
    Arc::new_cyclic(|me| Self {
      me: me.clone(),
      executor,
      work: WorkLoop::new(Machine::new(marks)),
    })
  }

  pub fn state(&self) -> SinkState { self.work.inspect(|m| m.phase) }

  /// Requested but not yet written elements.
  pub fn outstanding_demand(&self) -> u64 { self.work.inspect(|m| m.outstanding) }

  // ==================== Transport events ====================

  /// Attaches the transport context. A second context is ignored.
  ///
  /// # Panics
  ///
  /// When `context` runs on a different executor than the subscriber was
  /// built with.
  pub fn attach(&self, context: SinkContextRef<T>) {
    assert_same_executor(&self.executor, &context.executor(), "SinkSubscriber");
    let (active, writable) = (context.is_active(), context.is_writable());
    self.signal(|m| m.provide_context(context, active, writable));
  }

  pub fn on_active(&self) { self.signal(Machine::on_active); }

  /// The transport went away for good.
  pub fn on_inactive(&self) { self.signal(Machine::on_inactive); }

  pub fn on_writability_changed(&self, writable: bool) {
    self.signal(|m| m.on_writability_changed(writable));
  }

  /// The sink was removed from its transport.
  pub fn detach(&self) {
    debug!("sink detached");
    self.signal(Machine::cancel);
  }

  fn signal(&self, contribution: impl FnOnce(&mut Machine<T>)) {
    self.work.drive(contribution, |effect| self.perform(effect));
  }

  fn perform(&self, effect: Effect<T>) {
    match effect {
      Effect::Request(subscription, n) => subscription.request(n),
      Effect::Cancel(subscription) => subscription.cancel(),
      Effect::Write(ctx, item) => ctx.write(item, self.completion()),
      Effect::Release(item) => item.release(),
      Effect::Close(ctx) => ctx.close(),
      Effect::Abort(ctx, err) => ctx.abort(err),
    }
  }

  fn completion(&self) -> WriteCompletion {
    let me = self.me.clone();
    WriteCompletion::new(move |result| {
      if let Some(sink) = me.upgrade() {
        sink.signal(|m| m.on_write_complete(result));
      }
    })
  }
}

impl<T> Subscriber<T> for Arc<SinkSubscriber<T>>
where
  T: Release + Send + 'static,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    let me = self.me.clone();
    self.executor.execute(Box::new(move || match me.upgrade() {
      Some(sink) => sink.signal(|m| m.provide_subscription(subscription)),
      None => subscription.cancel(),
    }));
  }

  fn on_next(&mut self, item: T) { self.signal(|m| m.on_next(item)); }

  fn on_error(&mut self, err: StreamError) { self.signal(|m| m.on_terminal(Closing::Abort(err))); }

  fn on_complete(&mut self) { self.signal(|m| m.on_terminal(Closing::Close)); }
}

impl<T: Release> Drop for SinkSubscriber<T> {
  fn drop(&mut self) {
    for effect in self.work.get_mut().effects.drain(..) {
      if let Effect::Write(_, item) | Effect::Release(item) = effect {
        item.release();
      }
    }
  }
}

impl<T: Release> Debug for SinkSubscriber<T> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let (state, outstanding) = self.work.inspect(|m| (m.phase, m.outstanding));
    f.debug_struct("SinkSubscriber")
      .field("state", &state)
      .field("outstanding", &outstanding)
      .finish_non_exhaustive()
  }
}

// ============================================================================
// State machine
// ============================================================================

enum Closing {
  Close,
  Abort(StreamError),
}

enum Effect<T> {
  Request(SubscriptionRef, i64),
  Cancel(SubscriptionRef),
  Write(SinkContextRef<T>, T),
  Release(T),
  Close(SinkContextRef<T>),
  Abort(SinkContextRef<T>, StreamError),
}

struct Machine<T> {
  phase: SinkState,
  marks: Watermarks,
  subscription: Option<SubscriptionRef>,
  context: Option<SinkContextRef<T>>,
  active: bool,
  writable: bool,
  /// Requested from upstream, not yet written.
  outstanding: u64,
  in_flight: usize,
  /// Set by the upstream terminal; performed once no write is in flight.
  closing: Option<Closing>,
  effects: VecDeque<Effect<T>>,
}

impl<T> Drain for Machine<T> {
  type Effect = Effect<T>;

  fn next_effect(&mut self) -> Option<Effect<T>> { self.effects.pop_front() }
}

impl<T: Release> Machine<T> {
  fn new(marks: Watermarks) -> Self {
    Self {
      phase: SinkState::NoSubscriptionOrContext,
      marks,
      subscription: None,
      context: None,
      active: false,
      writable: false,
      outstanding: 0,
      in_flight: 0,
      closing: None,
      effects: VecDeque::new(),
    }
  }

  fn set(&mut self, phase: SinkState) {
    trace!(from = ?self.phase, to = ?phase, "sink subscriber transition");
    self.phase = phase;
  }

  fn provide_subscription(&mut self, subscription: SubscriptionRef) {
    match self.phase {
      SinkState::NoSubscriptionOrContext => {
        self.subscription = Some(subscription);
        self.set(SinkState::NoContext);
      }
      SinkState::NoSubscription => {
        self.subscription = Some(subscription);
        self.start();
      }
      SinkState::Cancelled => self.effects.push_back(Effect::Cancel(subscription)),
      SinkState::Complete => trace!("subscription after completion, ignoring"),
      SinkState::NoContext | SinkState::Running | SinkState::Inactive => {
        warn!("second on_subscribe, cancelling the new subscription");
        self.effects.push_back(Effect::Cancel(subscription));
      }
    }
  }

  fn provide_context(&mut self, context: SinkContextRef<T>, active: bool, writable: bool) {
    if self.context.is_some() {
      debug!("context attached twice, ignoring");
      return;
    }
    debug!(state = ?self.phase, active, writable, "sink context attached");
    self.context = Some(context);
    self.active = active;
    self.writable = writable;
    match self.phase {
      SinkState::NoSubscriptionOrContext => self.set(SinkState::NoSubscription),
      SinkState::NoContext => self.start(),
      SinkState::Complete => self.try_close(),
      _ => {}
    }
  }

  /// Both halves are present.
  fn start(&mut self) {
    if self.active {
      self.set(SinkState::Running);
      self.maybe_request();
    } else {
      self.set(SinkState::Inactive);
    }
  }

  fn on_active(&mut self) {
    self.active = true;
    if self.phase == SinkState::Inactive {
      self.set(SinkState::Running);
      self.maybe_request();
    }
  }

  fn on_inactive(&mut self) {
    self.active = false;
    self.cancel();
  }

  fn on_writability_changed(&mut self, writable: bool) {
    self.writable = writable;
    self.maybe_request();
  }

  fn on_next(&mut self, item: T) {
    match (&self.phase, &self.context) {
      (SinkState::Running | SinkState::Inactive, Some(ctx)) => {
        self.in_flight += 1;
        self.effects.push_back(Effect::Write(ctx.clone(), item));
      }
      (phase, _) => {
        trace!(state = ?phase, "element not writable, releasing");
        self.effects.push_back(Effect::Release(item));
      }
    }
  }

  fn on_write_complete(&mut self, result: Result<()>) {
    self.in_flight = self.in_flight.saturating_sub(1);
    self.outstanding = self.outstanding.saturating_sub(1);
    match result {
      Ok(()) => self.maybe_request(),
      // Upstream already finished: the pending close becomes an abort.
      Err(err) if self.phase == SinkState::Complete => {
        warn!(error = %err, "write failed after completion");
        if matches!(self.closing, Some(Closing::Close)) {
          self.closing = Some(Closing::Abort(err));
        }
      }
      Err(err) => {
        warn!(error = %err, "write failed, cancelling upstream");
        self.cancel();
      }
    }
    self.try_close();
  }

  fn on_terminal(&mut self, closing: Closing) {
    match self.phase {
      SinkState::Cancelled | SinkState::Complete => {
        trace!(state = ?self.phase, "terminal after termination, ignoring");
      }
      _ => {
        self.subscription = None;
        self.closing = Some(closing);
        self.set(SinkState::Complete);
        self.try_close();
      }
    }
  }

  fn cancel(&mut self) {
    match self.phase {
      SinkState::Cancelled | SinkState::Complete => return,
      SinkState::Running | SinkState::Inactive | SinkState::NoContext => {
        if let Some(subscription) = self.subscription.take() {
          self.effects.push_back(Effect::Cancel(subscription));
        }
      }
      // The subscription is cancelled when it arrives.
      SinkState::NoSubscriptionOrContext | SinkState::NoSubscription => {}
    }
    debug!(state = ?self.phase, "sink cancelled");
    self.set(SinkState::Cancelled);
  }

  fn maybe_request(&mut self) {
    if self.phase != SinkState::Running || !self.writable {
      return;
    }
    let Some(subscription) = &self.subscription else { return };
    if let Some(n) = self.marks.refill(self.outstanding) {
      self.outstanding += n;
      let n = i64::try_from(n).unwrap_or(i64::MAX);
      self.effects.push_back(Effect::Request(subscription.clone(), n));
    }
  }

  fn try_close(&mut self) {
    if self.phase != SinkState::Complete || self.in_flight > 0 {
      return;
    }
    let Some(ctx) = &self.context else { return };
    match self.closing.take() {
      Some(Closing::Close) => self.effects.push_back(Effect::Close(ctx.clone())),
      Some(Closing::Abort(err)) => self.effects.push_back(Effect::Abort(ctx.clone(), err)),
      None => {}
    }
  }
}
