//! Single-writer work loop.
//!
//! Every bridge receives events from several independent sources: the
//! transport's thread (elements, completion), the subscriber's threads
//! (`request`, `cancel`) and write completions. A reactive streams subscriber
//! is not thread-safe, so at most one of those threads may be calling into it
//! at any instant, and it must never be called reentrantly.
//!
//! A lock held across the subscriber callback does not work: subscribers
//! routinely call `request` from inside `on_next`, which would deadlock (or,
//! with a reentrant lock, recurse). Instead the loop keeps a `running` flag
//! next to the state, both behind a mutex that is only ever held for a few
//! instructions:
//!
//! 1. every event is a *contribution* applied to the state inside the
//!    critical section;
//! 2. if another thread is already running the loop, the contributor returns
//!    and that thread picks the contribution up;
//! 3. otherwise the contributor claims the flag and repeatedly pulls the next
//!    [`Drain::Effect`] out of the state, performing it with the mutex
//!    released, until the state has nothing left to do.
//!
//! The state decides *what* happens (it is a plain state machine); the caller
//! of [`WorkLoop::drive`] decides *how* an effect is carried out.

use parking_lot::Mutex;

/// State that can be drained one effect at a time.
pub trait Drain {
  /// A unit of work performed outside the critical section: calling the
  /// subscriber, asking the source for more input, releasing elements.
  type Effect;

  /// Pops the next effect, or `None` when the state is quiescent.
  ///
  /// Runs inside the critical section: must not call out to user code.
  fn next_effect(&mut self) -> Option<Self::Effect>;
}

pub struct WorkLoop<S> {
  slot: Mutex<Slot<S>>,
}

struct Slot<S> {
  running: bool,
  state: S,
}

impl<S: Drain> WorkLoop<S> {
  pub fn new(state: S) -> Self { Self { slot: Mutex::new(Slot { running: false, state }) } }

  /// Applies `contribution` and, unless another thread is already draining,
  /// performs every pending effect with `perform`.
  ///
  /// `perform` may call back into `drive` (directly or through a reentrant
  /// subscriber): the nested call records its contribution and returns
  /// immediately, and the outer loop picks it up on its next iteration.
  ///
  /// Returns `true` when this call did the draining.
  pub fn drive<C, P>(&self, contribution: C, mut perform: P) -> bool
  where
    C: FnOnce(&mut S),
    P: FnMut(S::Effect),
  {
    {
      let mut slot = self.slot.lock();
      contribution(&mut slot.state);
      if slot.running {
        return false;
      }
      slot.running = true;
    }

    let mut claim = Claim { slot: &self.slot, held: true };
    loop {
      let effect = {
        let mut slot = self.slot.lock();
        match slot.state.next_effect() {
          Some(effect) => effect,
          None => {
            slot.running = false;
            claim.held = false;
            return true;
          }
        }
      };
      perform(effect);
    }
  }

  /// Reads the state inside the critical section.
  pub fn inspect<R>(&self, f: impl FnOnce(&S) -> R) -> R { f(&self.slot.lock().state) }

  /// Exclusive access, for teardown.
  pub fn get_mut(&mut self) -> &mut S { &mut self.slot.get_mut().state }

  /// Whether some thread is currently draining.
  pub fn is_running(&self) -> bool { self.slot.lock().running }
}

impl<S: Drain + Default> Default for WorkLoop<S> {
  fn default() -> Self { Self::new(S::default()) }
}

/// Releases the running flag if `perform` unwinds, so a panicking effect
/// cannot wedge the loop for every later contributor.
struct Claim<'a, S> {
  slot: &'a Mutex<Slot<S>>,
  held: bool,
}

impl<S> Drop for Claim<'_, S> {
  fn drop(&mut self) {
    if self.held {
      self.slot.lock().running = false;
    }
  }
}
