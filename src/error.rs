//! Errors reported by [`Lazy`](crate::Lazy).

use core::fmt;

/// The factory was absent when the holder was constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("lazy value factory must be present at construction")]
pub struct InvalidConstruction;

/// A recursive computation produced a value different from the one already
/// stored by an inner, re-entrant computation on the same holder.
///
/// Both values are rendered with their `Debug` representation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
   "scoped value was computed recursively returning different results: {current} & {rejected}. \
    This is likely due to a circular dependency."
)]
pub struct CircularDependency {
   /// The value stored by the re-entrant computation. The holder keeps it.
   pub current: String,
   /// The value produced afterwards by the enclosing computation. Discarded.
   pub rejected: String,
}

impl CircularDependency {
   pub(crate) fn new<T: fmt::Debug>(current: &T, rejected: &T) -> Self {
      Self {
         current: format!("{current:?}"),
         rejected: format!("{rejected:?}"),
      }
   }
}

/// Error returned by the fallible accessors of [`Lazy`](crate::Lazy).
#[derive(Debug, thiserror::Error)]
pub enum Error<E> {
   /// The factory failed. The holder stays uninitialized unless a re-entrant
   /// computation already stored a value.
   #[error("lazy value factory failed: {0}")]
   Factory(E),
   /// See [`CircularDependency`].
   #[error(transparent)]
   CircularDependency(#[from] CircularDependency),
}

impl<E> Error<E> {
   /// Returns the factory's own error, if that is what this is.
   pub fn into_factory(self) -> Option<E> {
      match self {
         Self::Factory(err) => Some(err),
         Self::CircularDependency(_) => None,
      }
   }
}
