//! Thread-safe in-memory [`DurableStore`] shared by every context holding a clone.

// self
use crate::{
	_prelude::*,
	store::{DurableStore, PersistedRefresh, StoreError},
};

type EntryMap = Arc<RwLock<HashMap<String, PersistedRefresh>>>;

/// In-process storage backend; clones share the same entries, so several
/// [`TokenStore`](crate::store::TokenStore)s built from clones behave like tabs of one origin.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(EntryMap);
impl MemoryStore {
	/// Number of stored entries.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` if nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl DurableStore for MemoryStore {
	fn load(&self, key: &str) -> Result<Option<PersistedRefresh>, StoreError> {
		Ok(self.0.read().get(key).cloned())
	}

	fn save(&self, key: &str, entry: PersistedRefresh) -> Result<(), StoreError> {
		self.0.write().insert(key.to_owned(), entry);

		Ok(())
	}

	fn remove(&self, key: &str) -> Result<(), StoreError> {
		self.0.write().remove(key);

		Ok(())
	}
}
