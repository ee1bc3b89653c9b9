//! Single-flight refresh coordination.
//!
//! [`RefreshCoordinator::request_refresh`] guarantees at most one outstanding call to
//! [`AuthService::refresh`] per coordinator. The first caller while idle leads the refresh;
//! callers arriving while it is in flight are parked as waiters and receive a clone of the
//! leader's outcome, in enqueue order. Terminal failures tear the session down exactly once:
//! the token store is cleared (which in turn disarms the scheduler and broadcasts the
//! cross-context logout through store listeners) and [`SessionEvent::Ended`] is emitted.

mod metrics;

pub use metrics::RefreshMetrics;

// std
use std::mem;
// crates.io
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, TokenSecret},
	error::RefreshError,
	events::{EndReason, SessionEvent, SessionEvents},
	obs::{self, NoteLevel, OpOutcome, OpSpan, SessionOp},
	service::AuthService,
	store::{CompareAndSwapOutcome, TokenStore},
};

/// Outcome delivered to every caller of one refresh.
pub type RefreshOutcome = std::result::Result<AccessToken, RefreshError>;

/// Coordinator state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RefreshPhase {
	/// No refresh has run yet, or the last one succeeded.
	#[default]
	Idle,
	/// A refresh call is outstanding.
	InFlight,
	/// The last refresh failed; the next request starts a new one.
	Failed,
}

#[derive(Default)]
struct RefreshState {
	phase: RefreshPhase,
	waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

enum Superseded {
	/// A newer session already holds a usable access token.
	Access(AccessToken),
	/// A newer refresh token replaced the one the call was made with.
	Refresh(TokenSecret),
	/// The session ended.
	Gone,
}

enum Admission {
	Lead(TokenSecret),
	Join(oneshot::Receiver<RefreshOutcome>),
	Refuse(RefreshError),
}

/// Deduplicates concurrent refresh demand into one auth-service call.
pub struct RefreshCoordinator {
	store: Arc<TokenStore>,
	service: Arc<dyn AuthService>,
	events: SessionEvents,
	metrics: RefreshMetrics,
	state: Mutex<RefreshState>,
}
impl RefreshCoordinator {
	/// Creates a coordinator that refreshes `store` through `service`.
	pub fn new(
		store: Arc<TokenStore>,
		service: Arc<dyn AuthService>,
		events: SessionEvents,
	) -> Self {
		Self { store, service, events, metrics: Default::default(), state: Default::default() }
	}

	/// Current phase.
	pub fn phase(&self) -> RefreshPhase {
		self.state.lock().phase
	}

	/// Number of callers parked behind the in-flight refresh.
	pub fn waiting(&self) -> usize {
		self.state.lock().waiters.len()
	}

	/// Coordination counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Resolves to a fresh access token, joining the in-flight refresh when there is one.
	pub async fn request_refresh(&self) -> RefreshOutcome {
		const OP: SessionOp = SessionOp::Refresh;

		obs::record_op_outcome(OP, OpOutcome::Attempt);
		self.metrics.record_attempt();

		let outcome = match self.admit() {
			Admission::Lead(refresh_token) =>
				OpSpan::new(OP, "lead").instrument(self.lead(refresh_token)).await,
			Admission::Join(waiter) => {
				self.metrics.record_joined();

				waiter.await.unwrap_or(Err(RefreshError::Abandoned))
			},
			Admission::Refuse(err) => {
				self.teardown(&err);

				Err(err)
			},
		};

		match &outcome {
			Ok(_) => self.metrics.record_success(),
			Err(_) => self.metrics.record_failure(),
		}

		obs::record_result(OP, &outcome);

		outcome
	}

	fn admit(&self) -> Admission {
		let mut state = self.state.lock();

		if state.phase == RefreshPhase::InFlight {
			let (tx, rx) = oneshot::channel();

			state.waiters.push(tx);

			return Admission::Join(rx);
		}

		match self.store.refresh_token() {
			Some(refresh_token) => {
				state.phase = RefreshPhase::InFlight;

				Admission::Lead(refresh_token)
			},
			None => Admission::Refuse(RefreshError::NoRefreshToken),
		}
	}

	async fn lead(&self, mut refresh_token: TokenSecret) -> RefreshOutcome {
		let mut flight = Flight { coordinator: self, settled: false };
		let outcome = loop {
			self.metrics.record_external_call();
			obs::note(
				SessionOp::Refresh,
				NoteLevel::Debug,
				"refreshing",
				&refresh_token.fingerprint(),
			);

			match self.service.refresh(&refresh_token).await {
				Ok(grant) => {
					let access = grant.access_token.clone();

					match self.store.compare_and_swap_refresh(
						&refresh_token,
						grant.access_token,
						grant.refresh_token,
					) {
						CompareAndSwapOutcome::Updated => {
							self.events.emit(SessionEvent::Refreshed);

							break Ok(access);
						},
						// A logout landed while the call was outstanding.
						CompareAndSwapOutcome::Missing => break Err(RefreshError::NoRefreshToken),
						CompareAndSwapOutcome::RefreshMismatch => (),
					}
				},
				Err(e) => {
					let e = RefreshError::from(e);

					// Only a verdict on the token the session still holds can end it.
					if self.store.refresh_token().as_ref() == Some(&refresh_token) {
						break Err(e);
					}

					obs::note(SessionOp::Refresh, NoteLevel::Debug, "stale refresh failed", &e);
				},
			}

			match self.superseded_by() {
				Superseded::Access(token) => break Ok(token),
				Superseded::Refresh(token) => refresh_token = token,
				Superseded::Gone => break Err(RefreshError::NoRefreshToken),
			}
		};

		if let Err(err) = &outcome {
			self.teardown(err);
		}

		flight.settle(&outcome);

		outcome
	}

	/// Inspects a session that moved on while a refresh call was outstanding.
	fn superseded_by(&self) -> Superseded {
		let session = self.store.get();

		match (session.access_token, session.refresh_token) {
			(_, None) => Superseded::Gone,
			(Some(access), Some(_)) if !access.is_expired_at(OffsetDateTime::now_utc()) =>
				Superseded::Access(access),
			(_, Some(refresh)) => Superseded::Refresh(refresh),
		}
	}

	fn teardown(&self, err: &RefreshError) {
		if !err.is_terminal() {
			return;
		}

		obs::note(SessionOp::Refresh, NoteLevel::Warn, "refresh failed terminally", err);

		if self.store.clear() {
			self.events.emit(SessionEvent::Ended { reason: EndReason::RefreshFailed });
		}
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.state.lock();

		f.debug_struct("RefreshCoordinator")
			.field("phase", &state.phase)
			.field("waiters", &state.waiters.len())
			.finish()
	}
}

/// Settles waiters exactly once, including when the leading future is dropped mid-flight.
struct Flight<'a> {
	coordinator: &'a RefreshCoordinator,
	settled: bool,
}
impl Flight<'_> {
	fn settle(&mut self, outcome: &RefreshOutcome) {
		let waiters = {
			let mut state = self.coordinator.state.lock();

			state.phase = if outcome.is_ok() { RefreshPhase::Idle } else { RefreshPhase::Failed };

			mem::take(&mut state.waiters)
		};

		self.settled = true;

		for waiter in waiters {
			let _ = waiter.send(outcome.clone());
		}
	}
}
impl Drop for Flight<'_> {
	fn drop(&mut self) {
		if !self.settled {
			self.settle(&Err(RefreshError::Abandoned));
		}
	}
}
