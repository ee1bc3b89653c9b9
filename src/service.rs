//! Auth service collaborator contract (login, refresh, logout, current user).
//!
//! The session engine never talks to the network directly for authentication; it calls an
//! [`AuthService`] implementation. The crate ships a reqwest-backed implementation in
//! [`crate::http`] and tests drive the engine with scripted implementations.

// self
use crate::{
	_prelude::*,
	auth::{Credentials, LoginGrant, RefreshGrant, TokenSecret, UserProfile},
};

type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Boxed future returned by [`AuthService`] operations.
pub type AuthFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AuthServiceError>> + 'a + Send>>;

/// External authentication service.
pub trait AuthService
where
	Self: Send + Sync,
{
	/// Exchanges credentials for an access token, refresh token, and user profile.
	fn login<'a>(&'a self, credentials: &'a Credentials) -> AuthFuture<'a, LoginGrant>;

	/// Exchanges a refresh token for a new access token (and optionally a rotated refresh
	/// token).
	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> AuthFuture<'a, RefreshGrant>;

	/// Ends the server-side session; callers treat failures as best-effort.
	fn logout<'a>(&'a self, access_token: Option<&'a TokenSecret>) -> AuthFuture<'a, ()>;

	/// Loads the profile of the user the access token was issued to.
	fn current_user<'a>(&'a self, access_token: &'a TokenSecret) -> AuthFuture<'a, UserProfile>;
}

/// Failures reported by an [`AuthService`].
#[derive(Clone, Debug, ThisError)]
pub enum AuthServiceError {
	/// Login credentials were rejected.
	#[error("Credentials were rejected: {reason}.")]
	InvalidCredentials {
		/// Service-supplied reason string.
		reason: String,
	},
	/// Refresh token is unknown, revoked, or past its lifetime.
	#[error("Refresh token is invalid or expired: {reason}.")]
	InvalidOrExpiredRefreshToken {
		/// Service-supplied reason string.
		reason: String,
	},
	/// Service could not be reached.
	#[error("Auth service is unreachable.")]
	Unreachable {
		/// Underlying network failure.
		#[source]
		source: SharedError,
	},
	/// Service answered with something the client cannot interpret.
	#[error("Auth service returned an unexpected response: {message}.")]
	Unexpected {
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Summary of the response.
		message: String,
	},
}
impl AuthServiceError {
	/// Wraps a network failure.
	pub fn unreachable(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Unreachable { source: Arc::new(src) }
	}
}
