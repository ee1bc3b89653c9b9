//! Explicit session context wiring the token store, refresh engine, and cross-context sync.
//!
//! One [`SessionContext`] corresponds to one running client (a tab, a window, a process). It
//! owns every piece of mutable session state, so nothing in the crate relies on process-wide
//! singletons; dropping the context stops its timer and its signal listener.

// crates.io
use tokio::{sync::broadcast, task::JoinHandle};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Credentials, Session, UserProfile},
	config::SessionConfig,
	events::{EndReason, SessionEvent, SessionEvents},
	flows::{
		ContextId, CrossTabSync, ProtectedClient, ProtectedTransport, RefreshCoordinator,
		RefreshPolicy, RefreshScheduler, SignalHub, UserSlot,
	},
	obs::{self, NoteLevel, OpOutcome, OpSpan, SessionOp},
	service::AuthService,
	store::{DurableStore, StoreChange, Subscription, TokenStore},
};

struct SessionInner {
	config: SessionConfig,
	store: Arc<TokenStore>,
	service: Arc<dyn AuthService>,
	coordinator: Arc<RefreshCoordinator>,
	scheduler: RefreshScheduler,
	events: SessionEvents,
	user: UserSlot,
	gate: AsyncMutex<()>,
}
impl SessionInner {
	fn on_store_change(&self, change: &StoreChange) {
		if !change.current.is_authenticated() {
			self.scheduler.disarm();
			*self.user.write() = None;

			return;
		}
		if !change.access_changed() {
			return;
		}
		let armed = change.current.access_token.as_ref().map(|token| self.scheduler.arm(token));

		if let Some(Err(e)) = armed {
			obs::note(SessionOp::ScheduledRefresh, NoteLevel::Warn, "refresh timer not armed", &e);
		}
	}
}

/// One client's authenticated session.
pub struct SessionContext {
	inner: Arc<SessionInner>,
	sync: Arc<CrossTabSync>,
	listener: Mutex<Option<JoinHandle<()>>>,
	_subscriptions: [Subscription; 2],
}
impl SessionContext {
	/// Builds a context whose refresh token persists in `durable` and whose signals travel
	/// over `hub`.
	///
	/// A refresh token already persisted under the configured key is loaded immediately; call
	/// [`restore`](Self::restore) to exchange it for an access token.
	pub fn new(
		config: SessionConfig,
		service: Arc<dyn AuthService>,
		durable: Arc<dyn DurableStore>,
		hub: SignalHub,
	) -> Result<Self> {
		config.validate()?;

		let store = Arc::new(TokenStore::from_config(durable, &config));
		let events = SessionEvents::default();
		let coordinator =
			Arc::new(RefreshCoordinator::new(store.clone(), service.clone(), events.clone()));
		let scheduler =
			RefreshScheduler::new(coordinator.clone(), RefreshPolicy::from_config(&config));
		let user = UserSlot::default();
		let sync = Arc::new(CrossTabSync::new(
			store.clone(),
			service.clone(),
			user.clone(),
			coordinator.clone(),
			scheduler.clone(),
			events.clone(),
			hub,
		));
		let inner = Arc::new(SessionInner {
			config,
			store,
			service,
			coordinator,
			scheduler,
			events,
			user,
			gate: AsyncMutex::new(()),
		});
		let timer_subscription = inner.store.on_change({
			let inner = Arc::downgrade(&inner);

			move |change| {
				if let Some(inner) = inner.upgrade() {
					inner.on_store_change(change);
				}
			}
		});
		let signal_subscription = sync.attach();

		Ok(Self {
			inner,
			sync,
			listener: Default::default(),
			_subscriptions: [timer_subscription, signal_subscription],
		})
	}

	/// Starts listening for signals from sibling contexts. Calling it again is a no-op.
	pub fn start(&self) -> Result<()> {
		let mut listener = self.listener.lock();

		if listener.is_none() {
			*listener = Some(self.sync.spawn_listener()?);
		}

		Ok(())
	}

	/// Configuration in effect.
	pub fn config(&self) -> &SessionConfig {
		&self.inner.config
	}

	/// Identifier this context stamps on outgoing signals.
	pub fn id(&self) -> ContextId {
		self.sync.id()
	}

	/// Token store backing this context.
	pub fn store(&self) -> &Arc<TokenStore> {
		&self.inner.store
	}

	/// Refresh coordinator backing this context.
	pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
		&self.inner.coordinator
	}

	/// Proactive refresh scheduler of this context.
	pub fn scheduler(&self) -> &RefreshScheduler {
		&self.inner.scheduler
	}

	/// Cross-context synchronizer of this context.
	pub fn sync(&self) -> &Arc<CrossTabSync> {
		&self.sync
	}

	/// Subscribes to lifecycle events emitted after this call.
	pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
		self.inner.events.subscribe()
	}

	/// Snapshot of the current tokens.
	pub fn session(&self) -> Session {
		self.inner.store.get()
	}

	/// Returns `true` while a refresh token is held.
	pub fn is_authenticated(&self) -> bool {
		self.inner.store.is_authenticated()
	}

	/// Profile of the signed-in user, if the session is still active and the profile is known.
	pub fn user(&self) -> Option<UserProfile> {
		self.inner.user.read().clone()
	}

	/// Builds a protected-resource client bound to this session.
	pub fn client<T>(&self, transport: T) -> ProtectedClient<T>
	where
		T: ProtectedTransport,
	{
		ProtectedClient::new(self.inner.store.clone(), self.inner.coordinator.clone(), transport)
	}

	/// Exchanges credentials for a session.
	///
	/// A rejected login leaves the context signed out.
	pub async fn login(&self, credentials: &Credentials) -> Result<UserProfile> {
		const OP: SessionOp = SessionOp::Login;

		let _gate = self.inner.gate.lock().await;

		obs::record_op_outcome(OP, OpOutcome::Attempt);

		let result = OpSpan::new(OP, "login")
			.instrument(async {
				match self.inner.service.login(credentials).await {
					Ok(grant) => {
						*self.inner.user.write() = Some(grant.user.clone());
						self.inner.store.set_tokens(grant.access_token, Some(grant.refresh_token));
						self.inner
							.events
							.emit(SessionEvent::Started { user: Some(grant.user.clone()) });

						Ok(grant.user)
					},
					Err(e) => {
						self.end(EndReason::Logout);

						Err(Error::from(e))
					},
				}
			})
			.await;

		obs::record_result(OP, &result);

		result
	}

	/// Ends the session in this and every sibling context.
	///
	/// The server-side logout is best-effort; local teardown always happens.
	pub async fn logout(&self) {
		const OP: SessionOp = SessionOp::Logout;

		let _gate = self.inner.gate.lock().await;

		obs::record_op_outcome(OP, OpOutcome::Attempt);

		let access_token = self.inner.store.access_token();
		let result = OpSpan::new(OP, "logout")
			.instrument(self.inner.service.logout(access_token.as_ref().map(|token| &token.secret)))
			.await;

		if let Err(e) = &result {
			obs::note(OP, NoteLevel::Warn, "server logout failed", e);
		}

		obs::record_result(OP, &result);
		self.end(EndReason::Logout);
	}

	/// Resumes a persisted session at process start.
	///
	/// Returns `Ok(false)` when no refresh token is persisted. After the refresh the user profile
	/// is loaded with the new access token. A persisted token that can no longer be refreshed,
	/// or a profile that cannot be loaded, ends the session and returns the error.
	pub async fn restore(&self) -> Result<bool> {
		let _gate = self.inner.gate.lock().await;
		let store = &self.inner.store;

		if !store.is_authenticated() {
			return Ok(false);
		}
		if store.get().has_usable_access_at(OffsetDateTime::now_utc()) {
			return Ok(true);
		}

		let token = self.inner.coordinator.request_refresh().await?;

		match self.inner.service.current_user(&token.secret).await {
			Ok(user) => {
				// A sibling may have logged out while the lookup was in flight.
				if !self.inner.store.is_authenticated() {
					return Ok(false);
				}

				*self.inner.user.write() = Some(user.clone());
				self.inner.events.emit(SessionEvent::Started { user: Some(user) });

				Ok(true)
			},
			Err(e) => {
				obs::note(SessionOp::Refresh, NoteLevel::Warn, "profile not loaded", &e);
				self.end(EndReason::RefreshFailed);

				Err(Error::from(e))
			},
		}
	}

	/// Refreshes the access token now, joining any refresh already in flight.
	pub async fn refresh(&self) -> Result<AccessToken> {
		Ok(self.inner.coordinator.request_refresh().await?)
	}

	fn end(&self, reason: EndReason) {
		self.inner.scheduler.disarm();
		*self.inner.user.write() = None;

		if self.inner.store.clear() {
			self.inner.events.emit(SessionEvent::Ended { reason });
		}
	}
}
impl Drop for SessionContext {
	fn drop(&mut self) {
		self.inner.scheduler.disarm();

		if let Some(listener) = self.listener.lock().take() {
			listener.abort();
		}
	}
}
impl Debug for SessionContext {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionContext")
			.field("id", &self.id())
			.field("store", &self.inner.store)
			.field("scheduler", &self.inner.scheduler)
			.finish()
	}
}
