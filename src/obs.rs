//! Optional observability helpers for session operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `bearer_session.op` with the `op` and `stage`
//!   (call site) fields, plus debug/warn events for failures that are logged instead of returned.
//! - Enable `metrics` to increment the `bearer_session_op_total` counter for every
//!   attempt/success/failure, labeled by `op` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Session operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionOp {
	/// Credential login.
	Login,
	/// Explicit logout.
	Logout,
	/// On-demand refresh through the coordinator.
	Refresh,
	/// Timer-driven refresh.
	ScheduledRefresh,
	/// Protected request through the retry pipeline.
	ProtectedCall,
	/// Cross-context signal handling.
	CrossTab,
	/// Token store persistence.
	Storage,
}
impl SessionOp {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			SessionOp::Login => "login",
			SessionOp::Logout => "logout",
			SessionOp::Refresh => "refresh",
			SessionOp::ScheduledRefresh => "scheduled_refresh",
			SessionOp::ProtectedCall => "protected_call",
			SessionOp::CrossTab => "cross_tab",
			SessionOp::Storage => "storage",
		}
	}
}
impl Display for SessionOp {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Severity of an [`note`] event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoteLevel {
	/// Routine state transition.
	Debug,
	/// Failure that was absorbed rather than returned.
	Warn,
}
