// self
use crate::obs::{OpOutcome, SessionOp};

/// Records an operation outcome via the global metrics recorder (when enabled).
pub fn record_op_outcome(op: SessionOp, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"bearer_session_op_total",
			"op" => op.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (op, outcome);
	}
}

/// Records success or failure of a completed operation.
pub fn record_result<T, E>(op: SessionOp, result: &Result<T, E>) {
	match result {
		Ok(_) => record_op_outcome(op, OpOutcome::Success),
		Err(_) => record_op_outcome(op, OpOutcome::Failure),
	}
}
