//! Session-level error types shared by the store, the refresh engine, and collaborators.

// self
use crate::{_prelude::*, service::AuthServiceError, store::StoreError};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Durable storage failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure while calling a protected resource.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Refresh failed; see [`RefreshError::is_terminal`].
	#[error(transparent)]
	Refresh(#[from] RefreshError),
	/// Cross-context signal could not be encoded or decoded.
	#[error(transparent)]
	Signal(#[from] SignalError),
	/// Auth service failed outside of the refresh path.
	#[error(transparent)]
	Service(AuthServiceError),

	/// Login was rejected by the auth service.
	#[error("Login was rejected: {reason}.")]
	InvalidCredentials {
		/// Service-supplied reason string.
		reason: String,
	},
	/// Protected request was still unauthorized right after a successful refresh.
	#[error("Request remained unauthorized (HTTP {status}) after the access token was refreshed.")]
	RetryExhausted {
		/// Status returned by the replayed request.
		status: u16,
	},
}
impl Error {
	/// Returns `true` when the error ended (or requires ending) the session.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Refresh(err) if err.is_terminal())
	}
}
impl From<AuthServiceError> for Error {
	fn from(e: AuthServiceError) -> Self {
		match e {
			AuthServiceError::InvalidCredentials { reason } => Self::InvalidCredentials { reason },
			other => Self::Service(other),
		}
	}
}

/// Refresh outcome error; cloned to every caller waiting on the same refresh.
#[derive(Clone, Debug, ThisError)]
pub enum RefreshError {
	/// No durable refresh credential is present.
	#[error("No refresh token is available.")]
	NoRefreshToken,
	/// Auth service explicitly rejected the refresh token.
	#[error("Refresh token was rejected: {reason}.")]
	Rejected {
		/// Service-supplied reason string.
		reason: String,
	},
	/// Network or transport failure while refreshing.
	#[error("Refresh endpoint is unreachable: {message}.")]
	Unreachable {
		/// Summary of the failure.
		message: String,
		/// Underlying failure, when one was captured.
		#[source]
		source: Option<SharedError>,
	},
	/// The caller driving the refresh was dropped before the outcome was known.
	#[error("Refresh was abandoned before it completed.")]
	Abandoned,
}
impl RefreshError {
	/// Returns `true` when the failure ends the session.
	pub fn is_terminal(&self) -> bool {
		!matches!(self, Self::Abandoned)
	}
}
impl From<AuthServiceError> for RefreshError {
	fn from(e: AuthServiceError) -> Self {
		match e {
			AuthServiceError::InvalidOrExpiredRefreshToken { reason }
			| AuthServiceError::InvalidCredentials { reason } => Self::Rejected { reason },
			AuthServiceError::Unreachable { source } =>
				Self::Unreachable { message: source.to_string(), source: Some(source) },
			AuthServiceError::Unexpected { status, message } => Self::Unreachable {
				message: match status {
					Some(status) => format!("HTTP {status}: {message}"),
					None => message,
				},
				source: None,
			},
		}
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Endpoint URL cannot be parsed.
	#[error("Endpoint URL `{value}` is invalid.")]
	InvalidUrl {
		/// Offending value.
		value: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Configuration document could not be parsed.
	#[error("Configuration is invalid at `{path}`: {message}.")]
	Parse {
		/// Path of the offending field.
		path: String,
		/// Parser message.
		message: String,
	},
	/// Safety margin is negative.
	#[error("The refresh safety margin must not be negative.")]
	NegativeSafetyMargin,
	/// Assumed access-token lifetime does not leave room for the safety margin.
	#[error("The assumed access-token lifetime must exceed the safety margin.")]
	LifetimeWithinMargin,
	/// Refresh token persistence horizon is not positive.
	#[error("The refresh-token horizon must be positive.")]
	NonPositiveHorizon,
	/// A duration exceeds the largest value the session engine accepts.
	#[error("`{field}` must not exceed {max}.")]
	DurationOutOfRange {
		/// Offending field.
		field: &'static str,
		/// Largest accepted value.
		max: Duration,
	},
	/// Storage key is empty.
	#[error("The refresh-token storage key must not be empty.")]
	EmptyStorageKey,
	/// A timer was requested outside of a Tokio runtime.
	#[error("No Tokio runtime is available to drive session timers.")]
	RuntimeUnavailable,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling a protected resource.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling a protected resource.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Cross-context signal encoding failures.
#[derive(Debug, ThisError)]
pub enum SignalError {
	/// Incoming payload did not match the signal protocol.
	#[error("Malformed session signal at `{path}`: {message}.")]
	Malformed {
		/// Path of the offending field.
		path: String,
		/// Parser message.
		message: String,
	},
	/// Outgoing payload could not be serialized.
	#[error("Session signal could not be encoded.")]
	Encode(#[from] serde_json::Error),
}
