// self
use crate::{
	_prelude::*,
	obs::{NoteLevel, SessionOp},
};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedOp<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOp<F> = F;

/// A span builder used by session operations.
#[derive(Clone, Debug)]
pub struct OpSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OpSpan {
	/// Creates a new span tagged with the provided operation + stage.
	pub fn new(op: SessionOp, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("bearer_session.op", op = op.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (op, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOp<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a structured event for state transitions and absorbed failures.
///
/// Secrets must never be passed as `detail`; use [`TokenSecret::fingerprint`] instead.
///
/// [`TokenSecret::fingerprint`]: crate::auth::TokenSecret::fingerprint
pub fn note(op: SessionOp, level: NoteLevel, message: &str, detail: &dyn Display) {
	#[cfg(feature = "tracing")]
	{
		match level {
			NoteLevel::Debug => tracing::debug!(op = op.as_str(), detail = %detail, "{message}"),
			NoteLevel::Warn => tracing::warn!(op = op.as_str(), detail = %detail, "{message}"),
		}
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (op, level, message, detail);
	}
}
