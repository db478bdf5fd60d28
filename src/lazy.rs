//! Memoizing lazy value bound to its factory at construction.
//!
//! This module provides the [`Lazy<T, F>`] type. The factory `F` is stored
//! until the first successful computation, then dropped; the computed `T` is
//! kept for the remaining lifetime of the holder and handed out by reference.
//!
//! Reads after initialization are a single atomic load. The slow path parks
//! on the holder's own [`InitLock`], which is re-entrant for the thread running
//! the factory so that recursive requests can be checked for consistency.

use core::cell::UnsafeCell;
use core::convert::Infallible;
use core::fmt;
#[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
use core::future::Future;
use core::sync::atomic::Ordering;
use std::panic::{RefUnwindSafe, UnwindSafe};

use crate::error::{CircularDependency, Error, InvalidConstruction};
use crate::state::{Acquire, InitGuard, InitLock};

/// A thread-safe value computed by its factory at most once, on first access.
///
/// Every caller of [`get`](Lazy::get) receives a reference to the same value.
/// The factory runs synchronously on the first caller's thread while the other
/// callers park; once the value is published the factory is dropped and no
/// further synchronization takes place.
///
/// If the factory panics or fails, nothing is stored and the next caller runs
/// it again.
///
/// # Recursion
///
/// The factory may call back into the same holder. The recursive call runs the
/// factory again on the same thread (the lock is re-entrant) and, when the
/// outer invocation returns, the two results are compared: equal results
/// converge on the value already stored, different ones produce a
/// [`CircularDependency`] error. The holder then keeps the value stored by the
/// inner call. Unbounded recursion is not detected.
///
/// Results are compared with `PartialEq`, not by identity. A value that is not
/// equal to itself, such as `f64::NAN`, is reported as a [`CircularDependency`]
/// even when both calls produced it.
///
/// ```
/// use scoped_lazy::Lazy;
///
/// static GREETING: Lazy<String> = Lazy::new(|| "hello".to_uppercase());
///
/// assert_eq!(GREETING.get().map(String::as_str), Ok("HELLO"));
/// ```
pub struct Lazy<T, F = fn() -> T> {
   slot: UnsafeCell<Option<T>>,
   factory: UnsafeCell<Option<F>>,
   lock: InitLock,
}

/// One activation of the slow path.
///
/// Only the outermost activation holds the guard; it publishes the slot when it
/// ends, whichever way the factory call ended.
struct Frame<'a, T, F> {
   lazy: &'a Lazy<T, F>,
   guard: Option<InitGuard<'a>>,
}

impl<'a, T, F> Frame<'a, T, F> {
   #[inline]
   fn ready(&self) -> Option<&'a T> {
      // SAFETY: we have exclusive access; a Ready slot is never written again.
      unsafe { (*self.lazy.slot.get()).as_ref() }
   }

   #[inline]
   fn factory(&self) -> &'a F {
      // SAFETY: the factory is only taken by the outermost frame on drop, after
      // every invocation through this reference has returned.
      match unsafe { (*self.lazy.factory.get()).as_ref() } {
         Some(factory) => factory,
         None => unreachable!("lazy value factory released before a value was stored"),
      }
   }

   /// Stores `value`, checking it against a value stored by a re-entrant call.
   fn store(&self, value: T) -> Result<&'a T, CircularDependency>
   where
      T: PartialEq + fmt::Debug,
   {
      match self.ready() {
         None => Ok(self.fill(value)),
         Some(current) if *current == value => {
            trace!("recursive computation converged on the stored value");
            Ok(current)
         }
         Some(current) => Err(CircularDependency::new(current, &value)),
      }
   }

   /// Stores `value` unless the slot is already Ready.
   #[inline]
   fn fill(&self, value: T) -> &'a T {
      // SAFETY: we have exclusive access, and no reference into the slot
      // exists while it is empty.
      unsafe { (*self.lazy.slot.get()).get_or_insert(value) }
   }
}

impl<T, F> Drop for Frame<'_, T, F> {
   fn drop(&mut self) {
      let Some(guard) = self.guard.take() else {
         return;
      };
      // SAFETY: we still hold the lock and the factory is no longer running.
      unsafe {
         if (*self.lazy.slot.get()).is_some() {
            let factory = (*self.lazy.factory.get()).take();
            let published = guard.commit();
            debug_assert!(published, "lazy value published twice");
            trace!("lazy value published");
            // Dropped outside the lock; it may hold the last handle to something
            // that reads this holder again.
            drop(factory);
         } else {
            trace!("lazy value computation ended without a value");
            drop(guard);
         }
      }
   }
}

impl<T, F> Lazy<T, F> {
   /// Creates a new holder that will compute its value with `factory`.
   ///
   /// The factory is not invoked until the first [`get`](Lazy::get).
   #[inline]
   #[must_use]
   pub const fn new(factory: F) -> Self {
      Self {
         slot: UnsafeCell::new(None),
         factory: UnsafeCell::new(Some(factory)),
         lock: InitLock::new(),
      }
   }

   /// Creates a new holder from an optional factory.
   ///
   /// Fails with [`InvalidConstruction`] if `factory` is `None`.
   #[inline]
   pub fn try_new(factory: Option<F>) -> Result<Self, InvalidConstruction> {
      factory.map(Self::new).ok_or(InvalidConstruction)
   }

   /// Creates a holder that is already initialized with `value` and has no factory.
   #[inline]
   #[must_use]
   pub const fn with_value(value: T) -> Self {
      Self {
         slot: UnsafeCell::new(Some(value)),
         factory: UnsafeCell::new(None),
         lock: InitLock::done(),
      }
   }

   /// Checks if the value has been published.
   ///
   /// This method never blocks.
   #[inline]
   pub fn is_done(&self) -> bool {
      self.lock.is_done(Ordering::Relaxed)
   }

   /// Returns the value if it has been published, without computing it.
   ///
   /// This method never blocks.
   #[inline]
   pub fn peek(&self) -> Option<&T> {
      if self.lock.is_done(Ordering::Acquire) {
         // SAFETY: DONE was observed with Acquire ordering.
         Some(unsafe { self.get_unchecked() })
      } else {
         None
      }
   }

   /// Returns a mutable reference to the value if it has been computed.
   ///
   /// Requires exclusive access (`&mut self`), so it never blocks.
   #[inline]
   pub fn get_mut(&mut self) -> Option<&mut T> {
      self.slot.get_mut().as_mut()
   }

   /// Consumes the holder, returning the value or, if it was never computed,
   /// the factory.
   pub fn into_inner(self) -> Result<T, F> {
      let Self { slot, factory, .. } = self;
      match (slot.into_inner(), factory.into_inner()) {
         (Some(value), _) => Ok(value),
         (None, Some(factory)) => Err(factory),
         (None, None) => unreachable!("lazy value has neither a value nor a factory"),
      }
   }

   /// # Safety
   ///
   /// The value must have been published and observed with Acquire ordering.
   #[inline]
   unsafe fn get_unchecked(&self) -> &T {
      debug_assert!(self.is_done(), "get_unchecked called on uninitialized Lazy");
      // SAFETY: a published slot is always Ready.
      unsafe { (*self.slot.get()).as_ref().unwrap_unchecked() }
   }

   /// Returns the value, computing it with the factory if needed. Blocks if
   /// another thread is computing it.
   ///
   /// Fails only if the factory recursively requested this holder and the
   /// results disagreed; see [`CircularDependency`].
   #[inline]
   pub fn get(&self) -> Result<&T, CircularDependency>
   where
      F: Fn() -> T,
      T: PartialEq + fmt::Debug,
   {
      if let Some(value) = self.peek() {
         return Ok(value);
      }
      self
         .initialize(|factory| Ok::<T, Infallible>(factory()))
         .map_err(|err| match err {
            Error::Factory(never) => match never {},
            Error::CircularDependency(err) => err,
         })
   }

   /// Returns the value, computing it with the fallible factory if needed.
   /// Blocks if another thread is computing it.
   ///
   /// - If published, returns `Ok(&value)`.
   /// - If the factory returns `Err(e)`, returns `Err(Error::Factory(e))` and
   ///   leaves the holder uninitialized, so the next call tries again.
   #[inline]
   pub fn try_get<E>(&self) -> Result<&T, Error<E>>
   where
      F: Fn() -> Result<T, E>,
      T: PartialEq + fmt::Debug,
   {
      if let Some(value) = self.peek() {
         return Ok(value);
      }
      self.initialize(|factory| factory())
   }

   /// Returns the value, awaiting the factory's future if needed.
   ///
   /// If multiple tasks call this concurrently, only one future is awaited.
   /// The factory must not request this holder again: async computations are
   /// not re-entrant and such a request never completes.
   ///
   /// With the `async-tokio-mt` feature, a caller that finds the computation
   /// still running after spinning falls back to `block_in_place`, which panics
   /// on a `current_thread` runtime. Use a multi-threaded runtime when callers
   /// may contend, or enable only `async-tokio`.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub async fn get_async<Fut>(&self) -> &T
   where
      F: Fn() -> Fut,
      Fut: Future<Output = T>,
   {
      if let Some(value) = self.peek() {
         return value;
      }
      let Some(guard) = self.lock.lock_async().await else {
         // SAFETY: `lock_async` observed DONE with Acquire ordering.
         return unsafe { self.get_unchecked() };
      };
      let frame = Frame {
         lazy: self,
         guard: Some(guard),
      };
      if let Some(value) = frame.ready() {
         return value;
      }
      trace!("computing lazy value asynchronously");
      let value = (frame.factory())().await;
      frame.fill(value)
   }

   /// Returns the value, awaiting the fallible factory's future if needed.
   ///
   /// On `Err(e)` the holder stays uninitialized and `e` is returned.
   /// Runtime requirements are the same as for [`get_async`](Lazy::get_async).
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub async fn try_get_async<Fut, E>(&self) -> Result<&T, E>
   where
      F: Fn() -> Fut,
      Fut: Future<Output = Result<T, E>>,
   {
      if let Some(value) = self.peek() {
         return Ok(value);
      }
      let Some(guard) = self.lock.lock_async().await else {
         // SAFETY: `lock_async` observed DONE with Acquire ordering.
         return Ok(unsafe { self.get_unchecked() });
      };
      let frame = Frame {
         lazy: self,
         guard: Some(guard),
      };
      if let Some(value) = frame.ready() {
         return Ok(value);
      }
      trace!("computing lazy value asynchronously");
      let value = (frame.factory())().await?;
      Ok(frame.fill(value))
   }

   /// Cold path shared by `get` and `try_get`.
   #[cold]
   fn initialize<E>(
      &self,
      produce: impl FnOnce(&F) -> Result<T, E>,
   ) -> Result<&T, Error<E>>
   where
      T: PartialEq + fmt::Debug,
   {
      let frame = match self.lock.lock() {
         // SAFETY: `lock` observed DONE with Acquire ordering.
         Acquire::Done => return Ok(unsafe { self.get_unchecked() }),
         Acquire::Reentered => {
            trace!("lazy value requested recursively by its own factory");
            Frame {
               lazy: self,
               guard: None,
            }
         }
         Acquire::Owned(guard) => {
            trace!("computing lazy value");
            Frame {
               lazy: self,
               guard: Some(guard),
            }
         }
      };
      if let Some(value) = frame.ready() {
         return Ok(value);
      }
      let value = produce(frame.factory()).map_err(Error::Factory)?;
      Ok(frame.store(value)?)
   }
}

// SAFETY:
// `&Lazy<T, F>` hands out `&T` to any thread, so `T: Sync`, and the value may be
// produced on one thread and dropped on another, so `T: Send`. The factory is
// only ever used by the thread holding the lock, so `F: Send` is enough.
unsafe impl<T: Send + Sync, F: Send> Sync for Lazy<T, F> {}

// A panicking factory leaves the holder uninitialized and retryable.
impl<T: RefUnwindSafe + UnwindSafe, F: UnwindSafe> RefUnwindSafe for Lazy<T, F> {}

impl<T: Default> Default for Lazy<T> {
   /// Creates a holder whose factory is `T::default`.
   #[inline]
   fn default() -> Self {
      Self::new(T::default)
   }
}

impl<T, F> From<T> for Lazy<T, F> {
   /// Creates a holder already initialized with `value`.
   #[inline]
   fn from(value: T) -> Self {
      Self::with_value(value)
   }
}

impl<T: fmt::Display, F> fmt::Display for Lazy<T, F> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self.peek() {
         Some(v) => fmt::Display::fmt(v, f),
         None => f.write_str("<uninit>"),
      }
   }
}

impl<T: fmt::Debug, F> fmt::Debug for Lazy<T, F> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let mut d = f.debug_tuple("Lazy");
      match self.peek() {
         Some(v) => d.field(v),
         None => d.field(&format_args!("<uninit>")),
      };
      d.finish()
   }
}
