//! Initialization lock backing [`Lazy`](crate::Lazy).
//!
//! The state is packed into a single `AtomicU8`:
//! - Bit 0: DONE - the slot holds a published value
//! - Bit 1: LOCKED - some caller is running the factory
//! - Bit 2: WAITING - at least one thread is parked on the state byte
//! - Bits 3-7: EPOCH - generation counter, bumped on every release
//!
//! Next to the state byte the lock records which thread holds LOCKED. A
//! `lock()` from that same thread is a recursive call made by the factory and
//! is reported as [`Acquire::Reentered`] instead of parking forever.

use core::mem;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use parking_lot_core::{DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

/// Owner value meaning "no thread owns the lock" (or an async task does).
const NO_OWNER: usize = 0;

/// Returns a token identifying the calling thread.
///
/// The address of a thread-local is unique among live threads and never zero.
#[inline]
fn current_thread() -> usize {
   thread_local!(static TOKEN: u8 = const { 0 });
   TOKEN.with(|token| token as *const u8 as usize)
}

/// Outcome of [`InitLock::lock`].
pub(crate) enum Acquire<'a> {
   /// The value was published, possibly while we were parked.
   Done,
   /// The calling thread already holds the lock further up its stack.
   Reentered,
   /// Exclusive access was acquired.
   Owned(InitGuard<'a>),
}

pub(crate) struct InitLock {
   state: AtomicU8,
   owner: AtomicUsize,
}

impl InitLock {
   const DONE: u8 = 1;
   const LOCKED: u8 = 2;
   const WAITING: u8 = 4;
   const EPOCH_1: u8 = 8;
   const EPOCH_MASK: u8 = !(Self::DONE | Self::LOCKED | Self::WAITING);

   #[inline(always)]
   const fn next_epoch(current_state: u8) -> u8 {
      (current_state & Self::EPOCH_MASK).wrapping_add(Self::EPOCH_1) & Self::EPOCH_MASK
   }

   #[inline]
   pub(crate) const fn new() -> Self {
      Self {
         state: AtomicU8::new(0),
         owner: AtomicUsize::new(NO_OWNER),
      }
   }

   #[inline]
   pub(crate) const fn done() -> Self {
      Self {
         state: AtomicU8::new(Self::DONE),
         owner: AtomicUsize::new(NO_OWNER),
      }
   }

   #[inline]
   pub(crate) fn is_done(&self, ordering: Ordering) -> bool {
      self.state.load(ordering) & Self::DONE != 0
   }

   #[inline]
   fn notify_all(&self) {
      // SAFETY: park and unpark both key on the address of the state byte.
      unsafe {
         parking_lot_core::unpark_all(self.state.as_ptr() as usize, DEFAULT_UNPARK_TOKEN);
      }
   }

   /// Parks until the state byte differs from `expected_state`.
   #[inline]
   fn wait(&self, expected_state: u8) {
      // SAFETY: see `notify_all`.
      unsafe {
         // Wake-ups may be spurious; callers re-check the state in a loop.
         let _ = parking_lot_core::park(
            self.state.as_ptr() as usize,
            || self.state.load(Ordering::Acquire) == expected_state,
            || {},
            |_, _| {},
            DEFAULT_PARK_TOKEN,
            None,
         );
      }
   }

   /// Publishes DONE and wakes waiters. Returns `true` if the lock was not
   /// already DONE.
   #[inline]
   fn set_done(&self) -> bool {
      self.owner.store(NO_OWNER, Ordering::Relaxed);
      let current_state = self.state.load(Ordering::Relaxed);
      let new_state = Self::DONE | Self::next_epoch(current_state);

      // Release: the slot write happens-before any Acquire load seeing DONE.
      let prev_state = self.state.swap(new_state, Ordering::Release);
      if prev_state & Self::WAITING != 0 {
         self.notify_all();
      }
      prev_state & Self::DONE == 0
   }

   /// Drops LOCKED without publishing and wakes waiters so one of them can
   /// retry the computation.
   #[inline]
   fn set_uninit(&self) {
      self.owner.store(NO_OWNER, Ordering::Relaxed);
      let current_state = self.state.load(Ordering::Relaxed);
      let prev_state = self
         .state
         .swap(Self::next_epoch(current_state), Ordering::Release);
      if prev_state & Self::WAITING != 0 {
         self.notify_all();
      }
   }

   /// One attempt at taking LOCKED.
   ///
   /// - `Ok(true)`: the lock is DONE.
   /// - `Ok(false)`: LOCKED was acquired.
   /// - `Err(state)`: someone else holds LOCKED; WAITING is set in `state`.
   #[inline]
   fn lock_step(&self) -> Result<bool, u8> {
      loop {
         // Acquire pairs with the Release swap in `set_done`.
         let current_state = self.state.load(Ordering::Acquire);
         if current_state & Self::DONE != 0 {
            return Ok(true);
         }

         if current_state & Self::LOCKED == 0 {
            match self.state.compare_exchange_weak(
               current_state,
               current_state | Self::LOCKED,
               Ordering::Acquire,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Ok(false),
               Err(_) => {
                  std::hint::spin_loop();
                  continue;
               }
            }
         }

         if current_state & Self::WAITING == 0 {
            let new_state = current_state | Self::WAITING;
            match self.state.compare_exchange_weak(
               current_state,
               new_state,
               Ordering::Relaxed,
               Ordering::Relaxed,
            ) {
               Ok(_) => return Err(new_state),
               Err(_) => {
                  std::hint::spin_loop();
                  continue;
               }
            }
         }
         return Err(current_state);
      }
   }

   /// Acquires exclusive access, parking while another thread computes.
   #[inline]
   pub(crate) fn lock(&self) -> Acquire<'_> {
      let me = current_thread();
      // Only this thread ever stores `me`, so a stale read can't match it.
      if self.owner.load(Ordering::Relaxed) == me {
         return Acquire::Reentered;
      }

      let mut observed = match self.lock_step() {
         Ok(true) => return Acquire::Done,
         Ok(false) => return Acquire::Owned(InitGuard::new(self, me)),
         Err(state) => state,
      };
      loop {
         self.wait(observed);
         match self.lock_step() {
            Ok(true) => return Acquire::Done,
            Ok(false) => return Acquire::Owned(InitGuard::new(self, me)),
            Err(state) => observed = state,
         }
      }
   }

   /// Acquires exclusive access from an async task.
   ///
   /// Spins and yields first, then falls back to `block_in_place` on the
   /// multi-threaded runtime. Returns `None` if the value was published. The
   /// guard carries no owner token: a task may hop threads across `.await`.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   #[inline]
   pub(crate) async fn lock_async(&self) -> Option<InitGuard<'_>> {
      #[allow(clippy::never_loop)]
      loop {
         for _ in 0..16 {
            match self.lock_step() {
               Ok(true) => return None,
               Ok(false) => return Some(InitGuard::new(self, NO_OWNER)),
               Err(state) => {
                  for _ in 0..32 {
                     tokio::task::yield_now().await;
                     if self.state.load(Ordering::Relaxed) != state {
                        break;
                     }
                  }
               }
            }
         }

         #[cfg(feature = "async-tokio-mt")]
         {
            return match self.lock_step() {
               Ok(true) => None,
               Ok(false) => Some(InitGuard::new(self, NO_OWNER)),
               Err(state) => tokio::task::block_in_place(|| {
                  self.wait(state);
                  loop {
                     match self.lock_step() {
                        Ok(true) => return None,
                        Ok(false) => return Some(InitGuard::new(self, NO_OWNER)),
                        Err(state) => self.wait(state),
                     }
                  }
               }),
            };
         }
      }
   }
}

/// Exclusive access to an [`InitLock`].
///
/// Must be `commit()`ed once the slot is Ready. Dropping it instead releases
/// the lock without publishing, so the next caller computes again.
pub(crate) struct InitGuard<'a> {
   lock: &'a InitLock,
}

impl<'a> InitGuard<'a> {
   /// Assumes LOCKED was just set by the caller.
   #[inline(always)]
   fn new(lock: &'a InitLock, owner: usize) -> Self {
      lock.owner.store(owner, Ordering::Relaxed);
      Self { lock }
   }

   /// Publishes DONE and wakes waiters.
   #[inline(always)]
   pub(crate) fn commit(self) -> bool {
      let published = self.lock.set_done();
      mem::forget(self);
      published
   }
}

impl Drop for InitGuard<'_> {
   #[inline(always)]
   fn drop(&mut self) {
      self.lock.set_uninit();
   }
}
