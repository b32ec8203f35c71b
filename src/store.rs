//! Storage contracts and built-in store implementations for session tokens.
//!
//! Stores are keyed by an optional [`SubjectId`]: user-scoped tokens live under the
//! subject learned from their first successful validation, app-only tokens under `None`.
//! Sessions hold two stores—one for validated credentials, one for refresh tokens—so the
//! two lifetimes stay independent.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, auth::SubjectId};

/// Future type returned by [`TokenStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence contract for session-issued tokens.
///
/// One value of `T` is stored per subject key; `store` replaces any previous value and
/// `remove` is idempotent. Implementations own their thread-safety.
pub trait TokenStore<T>
where
	Self: Send + Sync,
{
	/// Fetches the value stored under the subject key, if present.
	fn fetch<'a>(&'a self, subject: Option<&'a SubjectId>) -> StoreFuture<'a, Option<T>>;

	/// Persists or replaces the value stored under the subject key.
	fn store<'a>(&'a self, value: T, subject: Option<&'a SubjectId>) -> StoreFuture<'a, ()>;

	/// Removes the value stored under the subject key, if any.
	fn remove<'a>(&'a self, subject: Option<&'a SubjectId>) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`TokenStore`] implementations and store-backed lookups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// No value is stored under the requested subject key.
	#[error("No stored token was found for the requested subject.")]
	NotFound,
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
