//! A thread-safe memoizing lazy value for singleton-scoped computations.
//!
//! [`Lazy<T, F>`] owns a factory and calls it at most once, on first access,
//! no matter how many threads ask for the value at the same time. Every caller
//! receives a reference to the same value, and the factory is dropped as soon
//! as the value is stored so that anything it captured is released.
//!
//! # Features
//!
//! - **Lock-free fast path**: reading a computed value is a single atomic load.
//! - **Efficient blocking**: callers racing the first computation park on a
//!   futex through `parking_lot_core` until it finishes.
//! - **Recursion guard**: a factory that requests its own holder is detected;
//!   inconsistent results surface as [`CircularDependency`].
//! - **Fallible factories**: a failed or panicking factory stores nothing and
//!   the next caller retries.
//! - **Async factories**: with the `async-tokio` features, factories may return
//!   futures.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use scoped_lazy::Lazy;
//!
//! let calls = AtomicUsize::new(0);
//! let config = Lazy::new(|| {
//!    calls.fetch_add(1, Ordering::Relaxed);
//!    "production".to_string()
//! });
//!
//! assert!(!config.is_done());
//! assert_eq!(config.get(), Ok(&"production".to_string()));
//! assert_eq!(config.get(), Ok(&"production".to_string()));
//! assert_eq!(calls.load(Ordering::Relaxed), 1);
//! ```
//!
//! ## Fallible factory
//!
//! ```rust
//! use scoped_lazy::{Error, Lazy};
//!
//! let port = Lazy::new(|| "8080".parse::<u16>());
//! assert_eq!(port.try_get().ok(), Some(&8080));
//!
//! let broken = Lazy::new(|| "eighty".parse::<u16>());
//! assert!(matches!(broken.try_get(), Err(Error::Factory(_))));
//! assert!(!broken.is_done());
//! ```

/// Slow-path trace events, compiled out without the `tracing` feature.
macro_rules! trace {
   ($($arg:tt)*) => {
      #[cfg(feature = "tracing")]
      tracing::trace!($($arg)*);
   };
}

/// Error types.
mod error;

/// Memoizing lazy holder.
mod lazy;

/// Internal synchronization state management.
mod state;

pub use error::{CircularDependency, Error, InvalidConstruction};
pub use lazy::Lazy;
