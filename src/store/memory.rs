//! Thread-safe in-memory [`TokenStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::SubjectId,
	store::{StoreError, StoreFuture, TokenStore},
};

type StoreMap<T> = Arc<RwLock<HashMap<Option<SubjectId>, T>>>;

/// Thread-safe storage backend that keeps tokens in-process for tests and demos.
#[derive(Debug)]
pub struct MemoryStore<T>(StoreMap<T>);
impl<T> MemoryStore<T> {
	/// Returns the number of stored entries.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns true if nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl<T> Default for MemoryStore<T> {
	fn default() -> Self {
		Self(Default::default())
	}
}
impl<T> Clone for MemoryStore<T> {
	fn clone(&self) -> Self {
		Self(self.0.clone())
	}
}
impl<T> TokenStore<T> for MemoryStore<T>
where
	T: 'static + Clone + Send + Sync,
{
	fn fetch<'a>(&'a self, subject: Option<&'a SubjectId>) -> StoreFuture<'a, Option<T>> {
		let map = self.0.clone();
		let key = subject.cloned();

		Box::pin(async move { Ok(map.read().get(&key).cloned()) })
	}

	fn store<'a>(&'a self, value: T, subject: Option<&'a SubjectId>) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let key = subject.cloned();

		Box::pin(async move {
			map.write().insert(key, value);

			Ok(())
		})
	}

	fn remove<'a>(&'a self, subject: Option<&'a SubjectId>) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let key = subject.cloned();

		Box::pin(async move {
			map.write().remove(&key);

			Ok(())
		})
	}
}
