//! Cross-context session synchronization.
//!
//! Contexts sharing one durable refresh token exchange two signals over a [`SignalHub`]:
//! `auth:token-update` whenever a context writes a refresh token or commits a refresh grant,
//! and `auth:logout` whenever a context drops it. Access-only writes are never announced.
//! [`CrossTabSync`] publishes the local side of that protocol from token store notifications
//! and reconciles incoming signals into the local store, scheduler, and event stream. Envelopes carry the sender's [`ContextId`] and a per-sender sequence number so
//! echoes and duplicate deliveries are dropped before they have any effect.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::{
	runtime::Handle,
	sync::broadcast::{self, error::RecvError},
	task::JoinHandle,
};
// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, UserProfile},
	error::{ConfigError, SignalError},
	events::{EndReason, SessionEvent, SessionEvents},
	flows::{RefreshCoordinator, RefreshScheduler},
	obs::{self, NoteLevel, OpOutcome, OpSpan, SessionOp},
	service::AuthService,
	store::{ChangeOrigin, StoreChange, Subscription, TokenStore},
};

/// Random identifier of one session context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(u64);
impl ContextId {
	/// Draws a fresh identifier.
	pub fn random() -> Self {
		Self(rand::random())
	}

	/// Raw identifier value.
	pub fn get(self) -> u64 {
		self.0
	}
}
impl From<u64> for ContextId {
	fn from(value: u64) -> Self {
		Self(value)
	}
}
impl Display for ContextId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{:016x}", self.0)
	}
}

/// The two-message cross-context protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum TabSignal {
	/// Another context wrote a refresh token.
	#[serde(rename = "auth:token-update", rename_all = "camelCase")]
	TokenUpdated {
		/// The refresh token now persisted.
		refresh_token: TokenSecret,
	},
	/// Another context ended the session.
	#[serde(rename = "auth:logout")]
	LoggedOut,
}
impl TabSignal {
	/// Wire name of the signal.
	pub const fn name(&self) -> &'static str {
		match self {
			TabSignal::TokenUpdated { .. } => "auth:token-update",
			TabSignal::LoggedOut => "auth:logout",
		}
	}
}

/// A [`TabSignal`] stamped with its sender and sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEnvelope {
	/// Sending context.
	pub origin: ContextId,
	/// Per-origin sequence number, starting at 1.
	pub sequence: u64,
	/// Payload.
	pub signal: TabSignal,
}
impl SignalEnvelope {
	/// Encodes the envelope for an out-of-process channel.
	pub fn to_json(&self) -> Result<String, SignalError> {
		Ok(serde_json::to_string(self)?)
	}

	/// Decodes an envelope, reporting the path of the first offending field.
	pub fn from_json(raw: &str) -> Result<Self, SignalError> {
		let de = &mut serde_json::Deserializer::from_str(raw);

		serde_path_to_error::deserialize(de).map_err(|e| SignalError::Malformed {
			path: e.path().to_string(),
			message: e.inner().to_string(),
		})
	}
}

/// In-process broadcast channel connecting session contexts.
#[derive(Clone, Debug)]
pub struct SignalHub(broadcast::Sender<SignalEnvelope>);
impl SignalHub {
	const DEFAULT_CAPACITY: usize = 64;

	/// Creates a hub buffering up to `capacity` envelopes per receiver.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));

		Self(sender)
	}

	/// Sends `envelope` to every subscribed context.
	pub fn publish(&self, envelope: SignalEnvelope) {
		let _ = self.0.send(envelope);
	}

	/// Receives envelopes published after this call.
	pub fn subscribe(&self) -> broadcast::Receiver<SignalEnvelope> {
		self.0.subscribe()
	}
}
impl Default for SignalHub {
	fn default() -> Self {
		Self::new(Self::DEFAULT_CAPACITY)
	}
}

/// What [`CrossTabSync::deliver`] did with an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncOutcome {
	/// Own echo or an already-seen sequence number.
	Ignored,
	/// The signal matched local state already.
	Unchanged,
	/// The local session was cleared.
	Cleared,
	/// The refresh token was adopted; the local access token is still usable.
	Adopted,
	/// The refresh token was adopted and exchanged for a local access token.
	Refreshed,
}

/// Outbound half: turns local store mutations into signals.
#[derive(Clone, Debug)]
struct SignalPublisher {
	origin: ContextId,
	hub: SignalHub,
	sequence: Arc<AtomicU64>,
}
impl SignalPublisher {
	fn publish(&self, signal: TabSignal) -> SignalEnvelope {
		let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
		let envelope = SignalEnvelope { origin: self.origin, sequence, signal };

		obs::note(SessionOp::CrossTab, NoteLevel::Debug, "signal published", &envelope.origin);
		self.hub.publish(envelope.clone());

		envelope
	}

	fn on_store_change(&self, change: &StoreChange) {
		// Mirrored mutations were already announced by the context that made them.
		if change.origin != ChangeOrigin::Local {
			return;
		}

		let signal = match &change.current.refresh_token {
			Some(token) if change.refresh_changed() || change.granted =>
				TabSignal::TokenUpdated { refresh_token: token.clone() },
			None if change.ended_session() => TabSignal::LoggedOut,
			_ => return,
		};

		self.publish(signal);
	}
}

/// Profile slot shared between a session context and its synchronizer.
pub type UserSlot = Arc<RwLock<Option<UserProfile>>>;

/// Reconciles this context with signals from its siblings.
pub struct CrossTabSync {
	store: Arc<TokenStore>,
	service: Arc<dyn AuthService>,
	user: UserSlot,
	coordinator: Arc<RefreshCoordinator>,
	scheduler: RefreshScheduler,
	events: SessionEvents,
	publisher: SignalPublisher,
	seen: Mutex<HashMap<ContextId, u64>>,
}
impl CrossTabSync {
	/// Creates a synchronizer for one context with a fresh [`ContextId`].
	///
	/// `user` is filled from `service` when an adopted session is refreshed without a known
	/// profile.
	pub fn new(
		store: Arc<TokenStore>,
		service: Arc<dyn AuthService>,
		user: UserSlot,
		coordinator: Arc<RefreshCoordinator>,
		scheduler: RefreshScheduler,
		events: SessionEvents,
		hub: SignalHub,
	) -> Self {
		let publisher =
			SignalPublisher { origin: ContextId::random(), hub, sequence: Default::default() };

		Self {
			store,
			service,
			user,
			coordinator,
			scheduler,
			events,
			publisher,
			seen: Default::default(),
		}
	}

	/// Identifier stamped on outgoing envelopes.
	pub fn id(&self) -> ContextId {
		self.publisher.origin
	}

	/// Hub this context publishes to.
	pub fn hub(&self) -> &SignalHub {
		&self.publisher.hub
	}

	/// Starts broadcasting local refresh-token mutations; stops when the guard is dropped.
	pub fn attach(&self) -> Subscription {
		let publisher = self.publisher.clone();

		self.store.on_change(move |change| publisher.on_store_change(change))
	}

	/// Publishes `signal` from this context.
	pub fn publish(&self, signal: TabSignal) -> SignalEnvelope {
		self.publisher.publish(signal)
	}

	/// Applies one incoming envelope.
	pub async fn deliver(&self, envelope: SignalEnvelope) -> Result<SyncOutcome> {
		const OP: SessionOp = SessionOp::CrossTab;

		if !self.accept(&envelope) {
			return Ok(SyncOutcome::Ignored);
		}

		obs::record_op_outcome(OP, OpOutcome::Attempt);

		let result = OpSpan::new(OP, envelope.signal.name())
			.instrument(self.reconcile(envelope.signal))
			.await;

		obs::record_result(OP, &result);

		result
	}

	/// Decodes and applies an envelope received from an out-of-process channel.
	pub async fn deliver_json(&self, raw: &str) -> Result<SyncOutcome> {
		self.deliver(SignalEnvelope::from_json(raw)?).await
	}

	/// Drives [`deliver`](Self::deliver) from the hub on the current runtime.
	///
	/// The task holds only a weak reference and exits once the synchronizer is dropped.
	pub fn spawn_listener(self: &Arc<Self>) -> Result<JoinHandle<()>> {
		const OP: SessionOp = SessionOp::CrossTab;

		let runtime = Handle::try_current().map_err(|_| ConfigError::RuntimeUnavailable)?;
		let mut receiver = self.hub().subscribe();
		let sync = Arc::downgrade(self);

		Ok(runtime.spawn(async move {
			loop {
				match receiver.recv().await {
					Ok(envelope) => {
						let Some(sync) = sync.upgrade() else { break };

						if let Err(e) = sync.deliver(envelope).await {
							obs::note(OP, NoteLevel::Warn, "signal not applied", &e);
						}
					},
					Err(RecvError::Lagged(skipped)) => obs::note(
						OP,
						NoteLevel::Warn,
						"signals dropped by slow listener",
						&skipped,
					),
					Err(RecvError::Closed) => break,
				}
			}
		}))
	}

	fn accept(&self, envelope: &SignalEnvelope) -> bool {
		if envelope.origin == self.id() {
			return false;
		}

		let mut seen = self.seen.lock();

		match seen.get(&envelope.origin) {
			Some(&last) if envelope.sequence <= last => false,
			_ => {
				seen.insert(envelope.origin, envelope.sequence);

				true
			},
		}
	}

	async fn reconcile(&self, signal: TabSignal) -> Result<SyncOutcome> {
		match signal {
			TabSignal::LoggedOut => {
				let cleared = self.store.clear_remote();

				self.scheduler.disarm();

				if !cleared {
					return Ok(SyncOutcome::Unchanged);
				}

				self.events.emit(SessionEvent::Ended { reason: EndReason::RemoteLogout });

				Ok(SyncOutcome::Cleared)
			},
			TabSignal::TokenUpdated { refresh_token } => {
				let was_authenticated = self.store.is_authenticated();
				let adopted = self.store.adopt_refresh(refresh_token);

				if self.store.get().has_usable_access_at(OffsetDateTime::now_utc()) {
					return Ok(if adopted { SyncOutcome::Adopted } else { SyncOutcome::Unchanged });
				}

				// Access tokens never cross contexts; mint our own.
				let token = self.coordinator.request_refresh().await?;

				self.scheduler.arm(&token)?;

				let user = self.recover_user(&token.secret).await;

				if !was_authenticated {
					self.events.emit(SessionEvent::Started { user });
				}

				Ok(SyncOutcome::Refreshed)
			},
		}
	}

	async fn recover_user(&self, access_token: &TokenSecret) -> Option<UserProfile> {
		let known = self.user.read().clone();

		if known.is_some() {
			return known;
		}

		match self.service.current_user(access_token).await {
			// A logout may have landed while the lookup was in flight.
			Ok(user) if self.store.is_authenticated() => {
				*self.user.write() = Some(user.clone());

				Some(user)
			},
			Ok(_) => None,
			Err(e) => {
				obs::note(SessionOp::CrossTab, NoteLevel::Warn, "profile not loaded", &e);

				None
			},
		}
	}
}
impl Debug for CrossTabSync {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CrossTabSync")
			.field("id", &self.id())
			.field("known_origins", &self.seen.lock().len())
			.finish()
	}
}
