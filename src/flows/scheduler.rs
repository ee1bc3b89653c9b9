//! Proactive refresh scheduling ahead of access-token expiry.
//!
//! [`RefreshScheduler`] keeps exactly one timer alive. Each [`arm`](RefreshScheduler::arm) or
//! [`disarm`](RefreshScheduler::disarm) bumps a generation counter and aborts the previous
//! timer task; a timer that wakes up under a stale generation exits without touching the
//! coordinator, so a cancelled timer can never be resurrected. A timer that fires detaches
//! itself before refreshing, which makes `disarm` safe to call from anything that runs while
//! the refresh is in flight.

// crates.io
use tokio::{
	runtime::Handle,
	task::JoinHandle,
	time::{self, Instant},
};
// self
use crate::{
	_prelude::*,
	auth::AccessToken,
	config::SessionConfig,
	error::ConfigError,
	flows::RefreshCoordinator,
	obs::{self, NoteLevel, OpOutcome, OpSpan, SessionOp},
};

/// Timing policy used to turn an access token into a refresh delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshPolicy {
	/// Time reserved before expiry.
	pub safety_margin: Duration,
	/// Delay used when the token carries no expiry hint.
	pub fallback_delay: Duration,
}
impl RefreshPolicy {
	/// Longest delay a plan may carry; later expiries are refreshed early.
	pub const MAX_DELAY: Duration = Duration::days(365);

	/// Derives the policy from session configuration.
	pub fn from_config(config: &SessionConfig) -> Self {
		Self { safety_margin: config.safety_margin, fallback_delay: config.fallback_delay() }
	}

	/// Computes when `token` should be refreshed, relative to `now`.
	///
	/// The delay is clamped to `0..=`[`MAX_DELAY`](Self::MAX_DELAY).
	pub fn plan(&self, token: &AccessToken, now: OffsetDateTime) -> RefreshPlan {
		let Some(remaining) = token.remaining_at(now) else {
			let delay = self.fallback_delay.clamp(Duration::ZERO, Self::MAX_DELAY);

			return RefreshPlan { delay, basis: PlanBasis::Fallback };
		};
		let delay = remaining.saturating_sub(self.safety_margin);

		if delay.is_positive() {
			RefreshPlan { delay: delay.min(Self::MAX_DELAY), basis: PlanBasis::Expiry }
		} else {
			RefreshPlan { delay: Duration::ZERO, basis: PlanBasis::Overdue }
		}
	}
}
impl Default for RefreshPolicy {
	fn default() -> Self {
		Self::from_config(&SessionConfig::default())
	}
}

/// What a [`RefreshPlan`] delay was derived from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlanBasis {
	/// Expiry hint minus the safety margin.
	Expiry,
	/// No expiry hint; the fixed fallback delay applies.
	Fallback,
	/// The token is already inside the safety margin; refresh immediately.
	Overdue,
}

/// Delay until the next proactive refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshPlan {
	/// Non-negative delay from the moment the plan was computed.
	pub delay: Duration,
	/// Source of the delay.
	pub basis: PlanBasis,
}

struct ArmedTimer {
	plan: RefreshPlan,
	deadline: Instant,
	handle: JoinHandle<()>,
}

#[derive(Default)]
struct TimerState {
	generation: u64,
	armed: Option<ArmedTimer>,
}

struct SchedulerInner {
	coordinator: Arc<RefreshCoordinator>,
	policy: RefreshPolicy,
	timer: Mutex<TimerState>,
}

/// Cloneable handle to the single refresh timer of a session.
#[derive(Clone)]
pub struct RefreshScheduler(Arc<SchedulerInner>);
impl RefreshScheduler {
	/// Creates a disarmed scheduler that refreshes through `coordinator`.
	pub fn new(coordinator: Arc<RefreshCoordinator>, policy: RefreshPolicy) -> Self {
		Self(Arc::new(SchedulerInner { coordinator, policy, timer: Default::default() }))
	}

	/// Timing policy in effect.
	pub fn policy(&self) -> RefreshPolicy {
		self.0.policy
	}

	/// Replaces any live timer with one derived from `token`.
	///
	/// Must be called from within a Tokio runtime.
	pub fn arm(&self, token: &AccessToken) -> Result<RefreshPlan> {
		let runtime = Handle::try_current().map_err(|_| ConfigError::RuntimeUnavailable)?;
		let mut timer = self.0.timer.lock();

		Ok(self.schedule(&mut timer, &runtime, token))
	}

	/// Cancels the live timer, if any. Safe to call at any time.
	pub fn disarm(&self) {
		let mut timer = self.0.timer.lock();

		timer.generation += 1;

		if let Some(armed) = timer.armed.take() {
			armed.handle.abort();
		}
	}

	/// Returns `true` while a timer is waiting to fire.
	pub fn is_armed(&self) -> bool {
		self.0.timer.lock().armed.is_some()
	}

	/// Plan of the live timer.
	pub fn next_refresh(&self) -> Option<RefreshPlan> {
		self.0.timer.lock().armed.as_ref().map(|armed| armed.plan)
	}

	/// Runtime instant at which the live timer fires.
	pub fn deadline(&self) -> Option<Instant> {
		self.0.timer.lock().armed.as_ref().map(|armed| armed.deadline)
	}

	fn schedule(
		&self,
		timer: &mut TimerState,
		runtime: &Handle,
		token: &AccessToken,
	) -> RefreshPlan {
		let plan = self.0.policy.plan(token, OffsetDateTime::now_utc());
		let deadline = Instant::now() + plan.delay.unsigned_abs();

		timer.generation += 1;

		if let Some(previous) = timer.armed.take() {
			previous.handle.abort();
		}

		let handle = runtime.spawn(Self::fire(Arc::downgrade(&self.0), timer.generation, deadline));

		timer.armed = Some(ArmedTimer { plan, deadline, handle });

		obs::note(
			SessionOp::ScheduledRefresh,
			NoteLevel::Debug,
			"refresh timer armed",
			&format_args!("{:?} in {}s", plan.basis, plan.delay.whole_seconds()),
		);

		plan
	}

	async fn fire(inner: std::sync::Weak<SchedulerInner>, generation: u64, deadline: Instant) {
		const OP: SessionOp = SessionOp::ScheduledRefresh;

		time::sleep_until(deadline).await;

		let Some(inner) = inner.upgrade() else { return };

		{
			let mut timer = inner.timer.lock();

			if timer.generation != generation {
				return;
			}

			// Dropping our own handle detaches rather than aborts this task.
			timer.armed = None;
		}

		obs::record_op_outcome(OP, OpOutcome::Attempt);

		let outcome = OpSpan::new(OP, "fire").instrument(inner.coordinator.request_refresh()).await;

		obs::record_result(OP, &outcome);

		let scheduler = Self(inner);

		match outcome {
			Ok(token) => {
				let mut timer = scheduler.0.timer.lock();

				// Someone re-armed or disarmed while the refresh was in flight; theirs wins.
				if timer.generation != generation {
					return;
				}

				match Handle::try_current() {
					Ok(runtime) => {
						scheduler.schedule(&mut timer, &runtime, &token);
					},
					Err(e) => obs::note(OP, NoteLevel::Warn, "refresh timer cannot re-arm", &e),
				}
			},
			Err(e) => {
				// Already detached; the coordinator owns any teardown.
				obs::note(OP, NoteLevel::Warn, "scheduled refresh failed", &e);
			},
		}
	}
}
impl Debug for RefreshScheduler {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let timer = self.0.timer.lock();

		f.debug_struct("RefreshScheduler")
			.field("policy", &self.0.policy)
			.field("generation", &timer.generation)
			.field("next_refresh", &timer.armed.as_ref().map(|armed| armed.plan))
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn now() -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}

	fn far_future() -> OffsetDateTime {
		::time::PrimitiveDateTime::MAX.assume_utc()
	}

	#[test]
	fn expiry_minus_margin() {
		let now = now();
		let token = AccessToken::with_expiry("a", now + Duration::seconds(900));
		let plan = RefreshPolicy::default().plan(&token, now);

		assert_eq!(plan, RefreshPlan { delay: Duration::seconds(780), basis: PlanBasis::Expiry });
	}

	#[test]
	fn opaque_tokens_use_fallback() {
		let plan = RefreshPolicy::default().plan(&AccessToken::new("opaque"), now());

		assert_eq!(plan, RefreshPlan { delay: Duration::minutes(13), basis: PlanBasis::Fallback });
	}

	#[test]
	fn tokens_inside_margin_are_overdue() {
		let now = now();

		for remaining in [Duration::seconds(120), Duration::seconds(30), Duration::seconds(-5)] {
			let token = AccessToken::with_expiry("a", now + remaining);
			let plan = RefreshPolicy::default().plan(&token, now);

			assert_eq!(plan, RefreshPlan { delay: Duration::ZERO, basis: PlanBasis::Overdue });
		}
	}

	#[test]
	fn distant_expiries_and_fallbacks_are_clamped() {
		let now = now();
		let far = AccessToken::with_expiry("a", far_future());
		let policy = RefreshPolicy { safety_margin: Duration::MIN, fallback_delay: Duration::MAX };

		assert_eq!(
			RefreshPolicy::default().plan(&far, now),
			RefreshPlan { delay: RefreshPolicy::MAX_DELAY, basis: PlanBasis::Expiry }
		);
		assert_eq!(
			policy.plan(&AccessToken::new("opaque"), now),
			RefreshPlan { delay: RefreshPolicy::MAX_DELAY, basis: PlanBasis::Fallback }
		);
		assert_eq!(policy.plan(&far, now).delay, RefreshPolicy::MAX_DELAY);
	}

	#[test]
	fn custom_policy_follows_config() {
		let config = SessionConfig::default()
			.with_safety_margin(Duration::seconds(30))
			.with_assumed_access_lifetime(Duration::minutes(5));
		let policy = RefreshPolicy::from_config(&config);

		assert_eq!(policy.fallback_delay, Duration::seconds(270));
	}
}
