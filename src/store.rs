//! Token store: the single source of truth for the session's tokens.
//!
//! [`TokenStore`] keeps the access token in memory only and writes the refresh token through
//! to a [`DurableStore`]. Every logical mutation that changes state fires exactly one
//! [`StoreChange`] notification, delivered after the new state is visible to
//! [`TokenStore::get`]. Writes that leave the state untouched are no-ops and notify nobody.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// std
use std::sync::Weak;
// crates.io
use time::PrimitiveDateTime;
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Session, TokenSecret},
	config::SessionConfig,
	obs::{self, NoteLevel, SessionOp},
};

/// Durable, cross-context persistence for the refresh token.
///
/// Only refresh tokens ever reach this trait; access tokens stay in process memory.
pub trait DurableStore
where
	Self: Send + Sync,
{
	/// Reads the entry stored under `key`, if any.
	fn load(&self, key: &str) -> Result<Option<PersistedRefresh>, StoreError>;

	/// Persists or replaces the entry stored under `key`.
	fn save(&self, key: &str, entry: PersistedRefresh) -> Result<(), StoreError>;

	/// Removes the entry stored under `key`; removing a missing entry succeeds.
	fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Refresh token persisted with its expiration horizon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRefresh {
	/// Persisted refresh token.
	pub token: TokenSecret,
	/// Instant after which the entry reads as absent.
	pub expires_at: OffsetDateTime,
}
impl PersistedRefresh {
	/// Returns `true` once the entry has outlived its horizon.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}
}

/// Error type produced by [`DurableStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
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

/// Result of [`TokenStore::compare_and_swap_refresh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareAndSwapOutcome {
	/// The refresh token matched the expected value and the grant was written.
	Updated,
	/// A different refresh token is held; the store was left untouched.
	RefreshMismatch,
	/// No refresh token is held; the store was left untouched.
	Missing,
}

/// Which side of a context boundary produced a mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeOrigin {
	/// Mutation performed by this context.
	Local,
	/// Mutation mirrored in from another context.
	Remote,
}

/// Notification payload describing one logical mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreChange {
	/// State before the mutation.
	pub previous: Session,
	/// State after the mutation.
	pub current: Session,
	/// Where the mutation came from.
	pub origin: ChangeOrigin,
	/// Whether the mutation committed a refresh grant.
	pub granted: bool,
}
impl StoreChange {
	/// Returns `true` if the access token differs.
	pub fn access_changed(&self) -> bool {
		self.previous.access_token != self.current.access_token
	}

	/// Returns `true` if the refresh token differs.
	pub fn refresh_changed(&self) -> bool {
		self.previous.refresh_token != self.current.refresh_token
	}

	/// Returns `true` if the mutation ended an authenticated session.
	pub fn ended_session(&self) -> bool {
		self.previous.is_authenticated() && !self.current.is_authenticated()
	}
}

type Listener = Arc<dyn Fn(&StoreChange) + Send + Sync>;

#[derive(Default)]
struct Listeners {
	next_id: u64,
	entries: BTreeMap<u64, Listener>,
}

/// Registration handle returned by [`TokenStore::on_change`].
///
/// The listener stays attached until the handle is dropped or [`unsubscribe`]d.
///
/// [`unsubscribe`]: Subscription::unsubscribe
#[must_use = "dropping a Subscription detaches its listener"]
pub struct Subscription {
	id: u64,
	listeners: Weak<Mutex<Listeners>>,
}
impl Subscription {
	/// Detaches the listener.
	pub fn unsubscribe(self) {}
}
impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(listeners) = self.listeners.upgrade() {
			listeners.lock().entries.remove(&self.id);
		}
	}
}
impl Debug for Subscription {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Subscription").field("id", &self.id).finish()
	}
}

/// In-memory access token, write-through refresh token, and change notifications.
pub struct TokenStore {
	state: RwLock<Session>,
	listeners: Arc<Mutex<Listeners>>,
	durable: Arc<dyn DurableStore>,
	key: String,
	horizon: Duration,
}
impl TokenStore {
	/// Creates a store, loading any unexpired refresh token persisted under `key`.
	pub fn new(durable: Arc<dyn DurableStore>, key: impl Into<String>, horizon: Duration) -> Self {
		let key = key.into();
		let refresh_token = Self::load_persisted(durable.as_ref(), &key);

		Self {
			state: RwLock::new(Session { access_token: None, refresh_token }),
			listeners: Default::default(),
			durable,
			key,
			horizon,
		}
	}

	/// Creates a store using the key and horizon from `config`.
	pub fn from_config(durable: Arc<dyn DurableStore>, config: &SessionConfig) -> Self {
		Self::new(durable, config.refresh_token_key.clone(), config.refresh_token_horizon)
	}

	/// Returns a snapshot of the current session.
	pub fn get(&self) -> Session {
		self.state.read().clone()
	}

	/// Returns the current access token.
	pub fn access_token(&self) -> Option<AccessToken> {
		self.state.read().access_token.clone()
	}

	/// Returns the current refresh token.
	pub fn refresh_token(&self) -> Option<TokenSecret> {
		self.state.read().refresh_token.clone()
	}

	/// Authentication status is a function of refresh-token presence alone.
	pub fn is_authenticated(&self) -> bool {
		self.state.read().is_authenticated()
	}

	/// Replaces the access token. Returns `true` if the state changed.
	pub fn set_access(&self, token: AccessToken) -> bool {
		self.mutate(ChangeOrigin::Local, |session| session.access_token = Some(token))
	}

	/// Replaces the refresh token and persists it. Returns `true` if the state changed.
	pub fn set_refresh(&self, token: TokenSecret) -> bool {
		self.mutate(ChangeOrigin::Local, |session| session.refresh_token = Some(token))
	}

	/// Writes both tokens as one logical mutation; `None` keeps the current refresh token.
	pub fn set_tokens(&self, access: AccessToken, refresh: Option<TokenSecret>) -> bool {
		self.mutate(ChangeOrigin::Local, |session| {
			session.access_token = Some(access);

			if let Some(refresh) = refresh {
				session.refresh_token = Some(refresh);
			}
		})
	}

	/// Writes a refresh grant only if the session still holds `expected`.
	///
	/// A grant obtained with a refresh token that has since been replaced (re-login,
	/// adopted rotation) or cleared (logout) must not overwrite the newer state.
	pub fn compare_and_swap_refresh(
		&self,
		expected: &TokenSecret,
		access: AccessToken,
		refresh: Option<TokenSecret>,
	) -> CompareAndSwapOutcome {
		let mut outcome = CompareAndSwapOutcome::Updated;

		self.commit(ChangeOrigin::Local, true, |session| match &session.refresh_token {
			None => outcome = CompareAndSwapOutcome::Missing,
			Some(current) if current != expected =>
				outcome = CompareAndSwapOutcome::RefreshMismatch,
			Some(_) => {
				session.access_token = Some(access);

				if let Some(refresh) = refresh {
					session.refresh_token = Some(refresh);
				}
			},
		});

		outcome
	}

	/// Returns the store to its initial, empty state. Never fails; persistence errors are
	/// logged. Returns `true` if there was anything to clear.
	pub fn clear(&self) -> bool {
		self.mutate(ChangeOrigin::Local, |session| *session = Session::default())
	}

	/// Registers a listener invoked once per state-changing mutation.
	pub fn on_change<F>(&self, listener: F) -> Subscription
	where
		F: 'static + Fn(&StoreChange) + Send + Sync,
	{
		let mut listeners = self.listeners.lock();
		let id = listeners.next_id;

		listeners.next_id += 1;
		listeners.entries.insert(id, Arc::new(listener));

		Subscription { id, listeners: Arc::downgrade(&self.listeners) }
	}

	/// Mirrors a refresh token written by another context.
	pub(crate) fn adopt_refresh(&self, token: TokenSecret) -> bool {
		self.mutate(ChangeOrigin::Remote, |session| session.refresh_token = Some(token))
	}

	/// Mirrors a logout performed by another context.
	pub(crate) fn clear_remote(&self) -> bool {
		self.mutate(ChangeOrigin::Remote, |session| *session = Session::default())
	}

	fn mutate(&self, origin: ChangeOrigin, apply: impl FnOnce(&mut Session)) -> bool {
		self.commit(origin, false, apply)
	}

	fn commit(
		&self,
		origin: ChangeOrigin,
		granted: bool,
		apply: impl FnOnce(&mut Session),
	) -> bool {
		let change = {
			let mut state = self.state.write();
			let previous = state.clone();

			apply(&mut state);

			if *state == previous {
				return false;
			}

			StoreChange { previous, current: state.clone(), origin, granted }
		};

		// Remote mutations mirror state the originating context already persisted.
		if origin == ChangeOrigin::Local && change.refresh_changed() {
			self.persist(change.current.refresh_token.as_ref());
		}

		self.notify(&change);

		true
	}

	fn persist(&self, refresh_token: Option<&TokenSecret>) {
		let result = match refresh_token {
			Some(token) => self.durable.save(
				&self.key,
				PersistedRefresh {
					token: token.clone(),
					expires_at: OffsetDateTime::now_utc()
						.checked_add(self.horizon)
						.unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc()),
				},
			),
			None => self.durable.remove(&self.key),
		};

		if let Err(e) = result {
			obs::note(SessionOp::Storage, NoteLevel::Warn, "refresh token persistence failed", &e);
		}
	}

	fn notify(&self, change: &StoreChange) {
		let snapshot = self.listeners.lock().entries.values().cloned().collect::<Vec<_>>();

		for listener in snapshot {
			listener(change);
		}
	}

	fn load_persisted(durable: &dyn DurableStore, key: &str) -> Option<TokenSecret> {
		match durable.load(key) {
			Ok(Some(entry)) if entry.is_expired_at(OffsetDateTime::now_utc()) => {
				if let Err(e) = durable.remove(key) {
					obs::note(
						SessionOp::Storage,
						NoteLevel::Warn,
						"expired refresh token could not be purged",
						&e,
					);
				}

				None
			},
			Ok(entry) => entry.map(|entry| entry.token),
			Err(e) => {
				obs::note(SessionOp::Storage, NoteLevel::Warn, "refresh token not loaded", &e);

				None
			},
		}
	}
}
impl Debug for TokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let session = self.state.read();

		f.debug_struct("TokenStore")
			.field("key", &self.key)
			.field("has_access_token", &session.access_token.is_some())
			.field("has_refresh_token", &session.refresh_token.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;

	const KEY: &str = "refreshToken";

	fn store_with(durable: &MemoryStore) -> TokenStore {
		TokenStore::new(Arc::new(durable.clone()), KEY, Duration::days(7))
	}

	fn counting(store: &TokenStore) -> (Arc<AtomicUsize>, Subscription) {
		let count = Arc::new(AtomicUsize::new(0));
		let subscription = store.on_change({
			let count = count.clone();

			move |_| {
				count.fetch_add(1, Ordering::SeqCst);
			}
		});

		(count, subscription)
	}

	#[test]
	fn clear_twice_notifies_once() {
		let durable = MemoryStore::default();
		let store = store_with(&durable);
		let (count, _subscription) = counting(&store);

		store.set_tokens(AccessToken::new("access"), Some(TokenSecret::new("refresh")));

		assert_eq!(count.load(Ordering::SeqCst), 1);
		assert!(store.clear());
		assert!(!store.clear());
		assert_eq!(count.load(Ordering::SeqCst), 2);
		assert_eq!(store.get(), Session::default());
	}

	#[test]
	fn identical_writes_are_noops() {
		let store = store_with(&MemoryStore::default());
		let (count, _subscription) = counting(&store);

		assert!(store.set_refresh(TokenSecret::new("r")));
		assert!(!store.set_refresh(TokenSecret::new("r")));
		assert!(store.set_access(AccessToken::new("a")));
		assert!(!store.set_access(AccessToken::new("a")));
		assert_eq!(count.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn batched_write_notifies_once_with_both_fields() {
		let store = store_with(&MemoryStore::default());
		let seen = Arc::new(Mutex::new(Vec::new()));
		let _subscription = store.on_change({
			let seen = seen.clone();

			move |change: &StoreChange| seen.lock().push(change.clone())
		});

		store.set_tokens(AccessToken::new("a"), Some(TokenSecret::new("r")));

		let seen = seen.lock();

		assert_eq!(seen.len(), 1);
		assert!(seen[0].access_changed());
		assert!(seen[0].refresh_changed());
		assert_eq!(seen[0].origin, ChangeOrigin::Local);
	}

	#[test]
	fn listeners_observe_state_already_visible() {
		let store = Arc::new(store_with(&MemoryStore::default()));
		let observed = Arc::new(Mutex::new(None));
		let _subscription = store.on_change({
			let store = Arc::downgrade(&store);
			let observed = observed.clone();

			move |_| {
				if let Some(store) = store.upgrade() {
					*observed.lock() = store.refresh_token();
				}
			}
		});

		store.set_refresh(TokenSecret::new("visible"));

		assert_eq!(observed.lock().clone(), Some(TokenSecret::new("visible")));
	}

	#[test]
	fn refresh_token_is_written_through_and_reloaded() {
		let durable = MemoryStore::default();
		let store = store_with(&durable);

		store.set_tokens(AccessToken::new("access"), Some(TokenSecret::new("durable")));

		let persisted = durable
			.load(KEY)
			.expect("Memory store load should succeed.")
			.expect("Refresh token should be persisted.");

		assert_eq!(persisted.token.expose(), "durable");

		let reopened = store_with(&durable);

		assert_eq!(reopened.refresh_token(), Some(TokenSecret::new("durable")));
		assert_eq!(reopened.access_token(), None);
		assert!(reopened.is_authenticated());
	}

	#[test]
	fn access_token_never_reaches_durable_storage() {
		let durable = MemoryStore::default();
		let store = store_with(&durable);

		store.set_access(AccessToken::new("access-only"));

		assert_eq!(durable.load(KEY).expect("Memory store load should succeed."), None);
		assert!(!store.is_authenticated());
	}

	#[test]
	fn expired_persisted_token_reads_as_absent() {
		let durable = MemoryStore::default();

		durable
			.save(
				KEY,
				PersistedRefresh {
					token: TokenSecret::new("stale"),
					expires_at: OffsetDateTime::now_utc() - Duration::seconds(1),
				},
			)
			.expect("Memory store save should succeed.");

		let store = store_with(&durable);

		assert_eq!(store.refresh_token(), None);
		assert_eq!(durable.load(KEY).expect("Memory store load should succeed."), None);
	}

	#[test]
	fn dropped_subscription_stops_notifications() {
		let store = store_with(&MemoryStore::default());
		let (count, subscription) = counting(&store);

		store.set_refresh(TokenSecret::new("one"));
		subscription.unsubscribe();
		store.set_refresh(TokenSecret::new("two"));

		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn remote_mutations_are_tagged_and_not_persisted() {
		let durable = MemoryStore::default();
		let store = store_with(&durable);
		let origins = Arc::new(Mutex::new(Vec::new()));
		let _subscription = store.on_change({
			let origins = origins.clone();

			move |change: &StoreChange| origins.lock().push(change.origin)
		});

		assert!(store.adopt_refresh(TokenSecret::new("from-elsewhere")));
		assert_eq!(durable.load(KEY).expect("Memory store load should succeed."), None);
		assert!(store.clear_remote());
		assert_eq!(origins.lock().clone(), vec![ChangeOrigin::Remote, ChangeOrigin::Remote]);
	}

	#[test]
	fn refresh_grant_is_swapped_only_over_the_expected_token() {
		let durable = MemoryStore::default();
		let store = store_with(&durable);
		let (count, _subscription) = counting(&store);

		assert_eq!(
			store.compare_and_swap_refresh(
				&TokenSecret::new("r-1"),
				AccessToken::new("a-1"),
				Some(TokenSecret::new("r-2")),
			),
			CompareAndSwapOutcome::Missing
		);

		store.set_tokens(AccessToken::new("a-fresh"), Some(TokenSecret::new("r-fresh")));

		assert_eq!(
			store.compare_and_swap_refresh(
				&TokenSecret::new("r-stale"),
				AccessToken::new("a-stale"),
				Some(TokenSecret::new("r-stale-2")),
			),
			CompareAndSwapOutcome::RefreshMismatch
		);
		assert_eq!(store.access_token(), Some(AccessToken::new("a-fresh")));
		assert_eq!(store.refresh_token(), Some(TokenSecret::new("r-fresh")));
		assert_eq!(count.load(Ordering::SeqCst), 1);

		assert_eq!(
			store.compare_and_swap_refresh(
				&TokenSecret::new("r-fresh"),
				AccessToken::new("a-next"),
				None,
			),
			CompareAndSwapOutcome::Updated
		);
		assert_eq!(store.access_token(), Some(AccessToken::new("a-next")));
		assert_eq!(store.refresh_token(), Some(TokenSecret::new("r-fresh")));
		assert_eq!(count.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn unbounded_horizon_saturates_instead_of_overflowing() {
		let durable = MemoryStore::default();
		let store = TokenStore::new(Arc::new(durable.clone()), KEY, Duration::MAX);

		store.set_refresh(TokenSecret::new("forever"));

		let persisted = durable
			.load(KEY)
			.expect("Memory store load should succeed.")
			.expect("Refresh token should be persisted.");

		assert_eq!(persisted.expires_at, PrimitiveDateTime::MAX.assume_utc());
	}
}
