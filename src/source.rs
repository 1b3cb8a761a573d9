//! Source → Publisher bridge.
//!
//! [`SourcePublisher`] turns a push-based source (an inbound transport
//! handler delivering messages as they arrive) into a single-subscriber
//! [`Publisher`]. Elements arriving before there is demand are buffered;
//! the source is only asked for more input (`read`) while the subscriber
//! has demand and the buffer is empty, so backpressure reaches the
//! transport.
//!
//! ```text
//!                     attach            subscribe
//!  NoSubscriberOrContext ──► NoSubscriber ──► Idle ◄──────┐
//!          │ subscribe                   element │  ▲      │ demand hits 0
//!          ▼                                     ▼  │ flush│
//!      NoContext ── attach ──► Idle          Buffering   Demanding
//!                                                │ complete/error
//!                                                ▼
//!                                            Draining ──► Done
//! ```
//!
//! All events, whichever thread raises them, go through one
//! [`WorkLoop`]; the subscriber is only ever called by the thread currently
//! draining it.

use std::{
  collections::VecDeque,
  fmt::{Debug, Formatter},
  panic::{catch_unwind, AssertUnwindSafe},
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
  },
};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use crate::{
  error::StreamError,
  executor::{assert_same_executor, ExecutorRef},
  signal::{Release, Signal},
  subscriber::{BoxedSubscriber, Publisher},
  subscription::{Demand, DemandHandler, DemandSubscription, EmptySubscription, SubscriptionRef},
  work_loop::{Drain, WorkLoop},
};

/// The transport a [`SourcePublisher`] reads from.
pub trait SourceContext<T>: Send + Sync {
  /// The serial executor the transport's events are raised on.
  fn executor(&self) -> ExecutorRef;

  /// More input is wanted (resume reading).
  fn read(&self);

  /// No more input is wanted, ever (close the upstream channel).
  fn close(&self);

  /// Passes a message the publisher does not accept to the next stage.
  fn forward(&self, item: T)
  where
    T: Release,
  {
    item.release()
  }
}

pub type SourceContextRef<T> = Arc<dyn SourceContext<T>>;

/// Lifecycle of a [`SourcePublisher`], as reported by [`SourcePublisher::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceState {
  /// Neither a subscriber nor a transport context is attached.
  NoSubscriberOrContext,
  /// Subscriber attached, waiting for the context.
  NoContext,
  /// Context attached, waiting for the subscriber.
  NoSubscriber,
  /// The source failed before anyone subscribed; the error is replayed to
  /// the first subscriber.
  NoSubscriberError,
  Idle,
  /// No demand, elements buffered.
  Buffering,
  /// Demand, empty buffer, reading from the source.
  Demanding,
  /// Source finished, buffered elements still owed to the subscriber.
  Draining,
  Done,
}

type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Single-subscriber publisher fed by a push-based source.
///
/// Built with [`SourcePublisher::new`]; the transport side attaches with
/// [`attach`](Self::attach) and pushes through [`on_element`](Self::on_element),
/// [`on_read_complete`](Self::on_read_complete),
/// [`on_source_complete`](Self::on_source_complete) and
/// [`on_source_error`](Self::on_source_error).
pub struct SourcePublisher<T: Release> {
  me: Weak<Self>,
  executor: ExecutorRef,
  filter: Option<Filter<T>>,
  subscribed: AtomicBool,
  work: WorkLoop<Machine<T>>,
  /// Only touched by the thread draining `work`, and empty while one of the
  /// subscriber's callbacks runs.
  subscriber: Mutex<Option<BoxedSubscriber<T>>>,
}

impl<T> SourcePublisher<T>
where
  T: Release + Send + 'static,
{
  /// A publisher bound to `executor`. The context attached later must run on
  /// the same executor.
  pub fn new(executor: ExecutorRef) -> Arc<Self> { Self::build(executor, None) }

  /// Like [`new`](Self::new), but only messages matching `accept` are
  /// published; the others are forwarded through
  /// [`SourceContext::forward`].
  pub fn with_filter<F>(executor: ExecutorRef, accept: F) -> Arc<Self>
  where
    F: Fn(&T) -> bool + Send + Sync + 'static,
  {
    Self::build(executor, Some(Box::new(accept)))
  }

  fn build(executor: ExecutorRef, filter: Option<Filter<T>>) -> Arc<Self> {
    Arc::new_cyclic(|me| Self {
      me: me.clone(),
      executor,
      filter,
      subscribed: AtomicBool::new(false),
      work: WorkLoop::new(Machine::default()),
      subscriber: Mutex::new(None),
    })
  }

  pub fn state(&self) -> SourceState { self.work.inspect(|m| m.phase.kind()) }

  /// Elements buffered waiting for demand.
  pub fn buffered(&self) -> usize {
    self.work.inspect(|m| m.buffer.iter().filter(|s| !s.is_terminal()).count())
  }

  // ==================== Transport events ====================

  /// Attaches the transport context.
  ///
  /// # Panics
  ///
  /// When `context` runs on a different executor than the publisher was
  /// built with.
  pub fn attach(&self, context: SourceContextRef<T>) {
    assert_same_executor(&self.executor, &context.executor(), "SourcePublisher");
    self.signal(|m| m.provide_context(context));
  }

  /// A message arrived from the source.
  pub fn on_element(&self, item: T) {
    let accepted = self.filter.as_ref().is_none_or(|accept| accept(&item));
    if accepted {
      self.signal(|m| m.on_element(item));
    } else {
      self.signal(|m| m.forward(item));
    }
  }

  /// The source finished delivering the batch produced by the last `read`.
  pub fn on_read_complete(&self) { self.signal(Machine::on_read_complete); }

  pub fn on_source_complete(&self) { self.signal(|m| m.on_terminal(Signal::Complete)); }

  pub fn on_source_error(&self, err: StreamError) {
    self.signal(|m| m.on_terminal(Signal::Error(err)));
  }

  // ==================== Delivery ====================

  fn signal(&self, contribution: impl FnOnce(&mut Machine<T>)) {
    self.work.drive(contribution, |effect| self.perform(effect));
  }

  fn perform(&self, effect: Effect<T>) {
    match effect {
      Effect::Subscribe(subscriber) => {
        let subscription: SubscriptionRef = Arc::new(DemandSubscription::new(self.me.clone()));
        self.deliver("on_subscribe", subscriber, |sub| sub.on_subscribe(subscription));
      }
      Effect::Next(item) => {
        let current = self.subscriber.lock().take();
        match current {
          Some(sub) => self.deliver("on_next", sub, |sub| sub.on_next(item)),
          None => item.release(),
        }
      }
      Effect::Complete => self.terminate("on_complete", |sub| sub.on_complete()),
      Effect::Error(err) => self.terminate("on_error", move |sub| sub.on_error(err)),
      Effect::Read(ctx) => ctx.read(),
      Effect::Close(ctx) => ctx.close(),
      Effect::Forward(ctx, item) => ctx.forward(item),
      Effect::Release(items) => items.into_iter().for_each(Release::release),
      Effect::Detach => {
        let subscriber = self.subscriber.lock().take();
        if subscriber.is_some() {
          trace!("dropping cancelled subscriber");
        }
        drop(subscriber);
      }
    }
  }

  /// Calls the subscriber with no lock held, then puts it back in its slot.
  fn deliver(
    &self,
    callback: &'static str,
    mut sub: BoxedSubscriber<T>,
    f: impl FnOnce(&mut BoxedSubscriber<T>),
  ) {
    if catch_unwind(AssertUnwindSafe(|| f(&mut sub))).is_ok() {
      *self.subscriber.lock() = Some(sub);
    } else {
      drop(sub);
      self.downstream_failed(callback);
    }
  }

  fn terminate(&self, callback: &'static str, f: impl FnOnce(&mut BoxedSubscriber<T>)) {
    // The subscriber is dropped after its terminal signal, whatever happens.
    let Some(mut sub) = self.subscriber.lock().take() else { return };
    if catch_unwind(AssertUnwindSafe(|| f(&mut sub))).is_err() {
      error!(error = %StreamError::SubscriberPanicked { context: callback }, "terminal signal lost");
    }
  }

  fn downstream_failed(&self, callback: &'static str) {
    error!(error = %StreamError::SubscriberPanicked { context: callback }, "cancelling the stream");
    self.signal(Machine::on_downstream_failure);
  }

  fn reject(mut subscriber: BoxedSubscriber<T>) {
    debug!("rejecting second subscriber");
    let res = catch_unwind(AssertUnwindSafe(|| {
      subscriber.on_subscribe(EmptySubscription::shared());
      subscriber.on_error(StreamError::AlreadySubscribed);
    }));
    if res.is_err() {
      error!("rejected subscriber panicked");
    }
  }
}

impl<T> Publisher<T> for SourcePublisher<T>
where
  T: Release + Send + 'static,
{
  fn subscribe_boxed(&self, subscriber: BoxedSubscriber<T>) {
    if self.subscribed.swap(true, Ordering::AcqRel) {
      Self::reject(subscriber);
      return;
    }
    let me = self.me.clone();
    self.executor.execute(Box::new(move || match me.upgrade() {
      Some(publisher) => publisher.signal(|m| m.provide_subscriber(subscriber)),
      None => {
        let mut subscriber = subscriber;
        subscriber.on_subscribe(EmptySubscription::shared());
        subscriber.on_error(StreamError::Closed);
      }
    }));
  }
}

impl<T> DemandHandler for SourcePublisher<T>
where
  T: Release + Send + 'static,
{
  fn on_request(&self, n: u64) { self.signal(|m| m.on_request(n)); }

  fn on_illegal_request(&self, requested: i64) {
    self.signal(|m| m.on_illegal_request(requested));
  }

  fn on_cancel(&self) { self.signal(Machine::on_cancel); }
}

impl<T: Release> Drop for SourcePublisher<T> {
  fn drop(&mut self) { self.work.get_mut().release_all(); }
}

impl<T: Release> Debug for SourcePublisher<T> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SourcePublisher")
      .field("state", &self.work.inspect(|m| m.phase.kind()))
      .finish_non_exhaustive()
  }
}

// ============================================================================
// State machine
// ============================================================================

enum Phase<T> {
  NoSubscriberOrContext,
  /// Holds the subscriber until the context arrives.
  NoContext(BoxedSubscriber<T>),
  NoSubscriber,
  NoSubscriberError(StreamError),
  Idle,
  Buffering,
  Demanding,
  Draining,
  Done,
}

impl<T> Phase<T> {
  fn kind(&self) -> SourceState {
    match self {
      Phase::NoSubscriberOrContext => SourceState::NoSubscriberOrContext,
      Phase::NoContext(_) => SourceState::NoContext,
      Phase::NoSubscriber => SourceState::NoSubscriber,
      Phase::NoSubscriberError(_) => SourceState::NoSubscriberError,
      Phase::Idle => SourceState::Idle,
      Phase::Buffering => SourceState::Buffering,
      Phase::Demanding => SourceState::Demanding,
      Phase::Draining => SourceState::Draining,
      Phase::Done => SourceState::Done,
    }
  }

  /// States in which the source is still producing for a subscriber.
  fn source_active(&self) -> bool {
    matches!(self, Phase::Idle | Phase::Buffering | Phase::Demanding)
  }
}

enum Effect<T> {
  Subscribe(BoxedSubscriber<T>),
  Next(T),
  Complete,
  Error(StreamError),
  Read(SourceContextRef<T>),
  Close(SourceContextRef<T>),
  Forward(SourceContextRef<T>, T),
  Release(SmallVec<[T; 4]>),
  /// Drops the subscriber once its in-progress callback has returned.
  Detach,
}

struct Machine<T> {
  phase: Phase<T>,
  /// Draining can be entered before anyone subscribed.
  subscribed: bool,
  buffer: VecDeque<Signal<T>>,
  demand: Demand,
  context: Option<SourceContextRef<T>>,
  effects: VecDeque<Effect<T>>,
}

impl<T> Default for Machine<T> {
  fn default() -> Self {
    Self {
      phase: Phase::NoSubscriberOrContext,
      subscribed: false,
      buffer: VecDeque::new(),
      demand: Demand::default(),
      context: None,
      effects: VecDeque::new(),
    }
  }
}

impl<T> Drain for Machine<T> {
  type Effect = Effect<T>;

  fn next_effect(&mut self) -> Option<Effect<T>> { self.effects.pop_front() }
}

impl<T: Release> Machine<T> {
  fn set(&mut self, phase: Phase<T>) {
    trace!(from = ?self.phase.kind(), to = ?phase.kind(), "source publisher transition");
    self.phase = phase;
  }

  fn provide_subscriber(&mut self, subscriber: BoxedSubscriber<T>) {
    match std::mem::replace(&mut self.phase, Phase::Done) {
      Phase::NoSubscriberOrContext => {
        self.subscribed = true;
        self.set(Phase::NoContext(subscriber));
      }
      Phase::NoSubscriber => {
        self.subscribed = true;
        self.effects.push_back(Effect::Subscribe(subscriber));
        let next = if self.buffer.is_empty() { Phase::Idle } else { Phase::Buffering };
        self.set(next);
      }
      Phase::Draining if !self.subscribed => {
        self.subscribed = true;
        self.effects.push_back(Effect::Subscribe(subscriber));
        self.phase = Phase::Draining;
        self.flush();
      }
      Phase::NoSubscriberError(err) => {
        self.subscribed = true;
        self.effects.push_back(Effect::Subscribe(subscriber));
        self.effects.push_back(Effect::Error(err));
      }
      other => {
        // The single-assignment guard makes this unreachable.
        warn!(state = ?other.kind(), "subscriber provided twice");
        self.phase = other;
        drop(subscriber);
      }
    }
  }

  fn provide_context(&mut self, context: SourceContextRef<T>) {
    if self.context.is_some() {
      debug!("context attached twice, ignoring");
      return;
    }
    debug!(state = ?self.phase.kind(), "source context attached");
    self.context = Some(context);
    match std::mem::replace(&mut self.phase, Phase::Done) {
      Phase::NoSubscriberOrContext => self.set(Phase::NoSubscriber),
      Phase::NoContext(subscriber) => {
        self.effects.push_back(Effect::Subscribe(subscriber));
        self.set(Phase::Idle);
      }
      other => self.phase = other,
    }
  }

  fn on_request(&mut self, n: u64) {
    match self.phase {
      Phase::Idle => {
        self.demand.add(n);
        self.set(Phase::Demanding);
        self.read();
      }
      Phase::Demanding => self.demand.add(n),
      Phase::Buffering | Phase::Draining => {
        self.demand.add(n);
        self.flush();
      }
      _ => {}
    }
  }

  fn on_illegal_request(&mut self, requested: i64) {
    if !self.subscribed || matches!(self.phase, Phase::Done) {
      return;
    }
    warn!(requested, "illegal demand, terminating the stream");
    let close = self.phase.source_active();
    self.discard();
    self.effects.push_back(Effect::Error(StreamError::IllegalDemand { requested }));
    if close {
      self.close();
    }
    self.set(Phase::Done);
  }

  fn on_cancel(&mut self) {
    let close = self.phase.source_active();
    self.discard();
    if close {
      self.close();
    }
    self.effects.push_back(Effect::Detach);
    if !matches!(self.phase, Phase::Done) {
      debug!(state = ?self.phase.kind(), "subscriber cancelled");
      self.set(Phase::Done);
    }
  }

  /// Cancel without telling anyone but the source: the subscriber is gone.
  fn on_downstream_failure(&mut self) { self.on_cancel(); }

  fn on_element(&mut self, item: T) {
    match self.phase {
      Phase::Demanding => {
        if self.demand.take_one() {
          self.effects.push_back(Effect::Next(item));
        } else {
          self.buffer.push_back(Signal::Next(item));
        }
        if self.demand.is_zero() {
          let next = if self.buffer.is_empty() { Phase::Idle } else { Phase::Buffering };
          self.set(next);
        }
      }
      Phase::Idle => {
        self.buffer.push_back(Signal::Next(item));
        self.set(Phase::Buffering);
      }
      Phase::NoSubscriber | Phase::Buffering => self.buffer.push_back(Signal::Next(item)),
      Phase::Draining | Phase::Done | Phase::NoSubscriberError(_) => {
        trace!("element after termination, releasing");
        self.release(item);
      }
      Phase::NoSubscriberOrContext | Phase::NoContext(_) => {
        warn!("element received before a context was attached, releasing");
        self.release(item);
      }
    }
  }

  fn forward(&mut self, item: T) {
    match &self.context {
      Some(ctx) => self.effects.push_back(Effect::Forward(ctx.clone(), item)),
      None => self.release(item),
    }
  }

  fn on_read_complete(&mut self) {
    if matches!(self.phase, Phase::Demanding) {
      self.read();
    }
  }

  fn on_terminal(&mut self, terminal: Signal<T>) {
    match std::mem::replace(&mut self.phase, Phase::Done) {
      Phase::NoSubscriberOrContext | Phase::NoSubscriber => match terminal {
        Signal::Error(err) if self.buffer.is_empty() => self.set(Phase::NoSubscriberError(err)),
        terminal => {
          self.buffer.push_back(terminal);
          self.set(Phase::Draining);
        }
      },
      Phase::NoContext(subscriber) => {
        self.effects.push_back(Effect::Subscribe(subscriber));
        self.push_terminal(terminal);
      }
      Phase::Buffering => {
        self.buffer.push_back(terminal);
        self.set(Phase::Draining);
      }
      Phase::Idle | Phase::Demanding => {
        self.push_terminal(terminal);
        self.set(Phase::Done);
      }
      other => {
        trace!(state = ?other.kind(), "terminal after termination, ignoring");
        self.phase = other;
      }
    }
  }

  /// Delivers buffered elements while there is demand, then a terminal
  /// sitting at the head of the buffer, which needs no demand.
  fn flush(&mut self) {
    while matches!(self.buffer.front(), Some(Signal::Next(_))) && self.demand.take_one() {
      if let Some(Signal::Next(item)) = self.buffer.pop_front() {
        self.effects.push_back(Effect::Next(item));
      }
    }
    if self.buffer.front().is_some_and(Signal::is_terminal) {
      if let Some(terminal) = self.buffer.pop_front() {
        self.push_terminal(terminal);
      }
      self.set(Phase::Done);
      return;
    }
    if matches!(self.phase, Phase::Draining) {
      return;
    }
    if !self.buffer.is_empty() {
      self.set(Phase::Buffering);
    } else if self.demand.is_zero() {
      self.set(Phase::Idle);
    } else {
      self.set(Phase::Demanding);
      self.read();
    }
  }

  fn push_terminal(&mut self, terminal: Signal<T>) {
    match terminal {
      Signal::Complete => self.effects.push_back(Effect::Complete),
      Signal::Error(err) => self.effects.push_back(Effect::Error(err)),
      Signal::Next(item) => self.release(item),
    }
  }

  fn read(&mut self) {
    if let Some(ctx) = &self.context {
      self.effects.push_back(Effect::Read(ctx.clone()));
    }
  }

  fn close(&mut self) {
    if let Some(ctx) = &self.context {
      self.effects.push_back(Effect::Close(ctx.clone()));
    }
  }

  fn release(&mut self, item: T) {
    let mut items = SmallVec::new();
    items.push(item);
    self.effects.push_back(Effect::Release(items));
  }

  /// Drops everything owed to the subscriber: the buffer, demand and any
  /// signal queued but not yet delivered. Owned elements are released.
  fn discard(&mut self) {
    let mut dropped: SmallVec<[T; 4]> = self
      .buffer
      .drain(..)
      .filter_map(|s| match s {
        Signal::Next(item) => Some(item),
        _ => None,
      })
      .collect();
    for effect in std::mem::take(&mut self.effects) {
      match effect {
        Effect::Next(item) => dropped.push(item),
        Effect::Complete | Effect::Error(_) | Effect::Read(_) => {}
        other => self.effects.push_back(other),
      }
    }
    self.demand.clear();
    if !dropped.is_empty() {
      trace!(count = dropped.len(), "releasing discarded elements");
      self.effects.push_back(Effect::Release(dropped));
    }
  }

  /// Releases every element still owned, without performing anything else.
  fn release_all(&mut self) {
    self.buffer.drain(..).for_each(Signal::release);
    for effect in self.effects.drain(..) {
      match effect {
        Effect::Next(item) | Effect::Forward(_, item) => item.release(),
        Effect::Release(items) => items.into_iter().for_each(Release::release),
        _ => {}
      }
    }
  }
}
