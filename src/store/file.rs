//! File-backed [`DurableStore`] whose entries are visible to every process sharing the path.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	store::{DurableStore, PersistedRefresh, StoreError},
};

/// Persists entries to a JSON file, re-reading it on every load so writes from other
/// processes are observed.
#[derive(Debug)]
pub struct FileStore {
	path: PathBuf,
	write_lock: Mutex<()>,
}
impl FileStore {
	/// Opens a store at `path`, creating parent directories and validating existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;
		Self::read_entries(&path)?;

		Ok(Self { path, write_lock: Mutex::new(()) })
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn read_entries(path: &Path) -> Result<BTreeMap<String, PersistedRefresh>, StoreError> {
		if !path.exists() {
			return Ok(BTreeMap::new());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(BTreeMap::new());
		}

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn write_entries(
		&self,
		entries: &BTreeMap<String, PersistedRefresh>,
	) -> Result<(), StoreError> {
		let serialized =
			serde_json::to_vec_pretty(entries).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn update(
		&self,
		apply: impl FnOnce(&mut BTreeMap<String, PersistedRefresh>) -> bool,
	) -> Result<(), StoreError> {
		let _guard = self.write_lock.lock();
		let mut entries = Self::read_entries(&self.path)?;

		if apply(&mut entries) { self.write_entries(&entries) } else { Ok(()) }
	}
}
impl DurableStore for FileStore {
	fn load(&self, key: &str) -> Result<Option<PersistedRefresh>, StoreError> {
		Ok(Self::read_entries(&self.path)?.remove(key))
	}

	fn save(&self, key: &str, entry: PersistedRefresh) -> Result<(), StoreError> {
		self.update(|entries| {
			entries.insert(key.to_owned(), entry);

			true
		})
	}

	fn remove(&self, key: &str) -> Result<(), StoreError> {
		self.update(|entries| entries.remove(key).is_some())
	}
}
