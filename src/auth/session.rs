//! Session snapshot and the payloads exchanged with the auth service.

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, TokenSecret},
};

/// Point-in-time view of the session held by the [`TokenStore`](crate::store::TokenStore).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
	/// Volatile access token for the current context.
	pub access_token: Option<AccessToken>,
	/// Durable refresh token shared across contexts.
	pub refresh_token: Option<TokenSecret>,
}
impl Session {
	/// Authentication status depends on the refresh token alone.
	pub fn is_authenticated(&self) -> bool {
		self.refresh_token.is_some()
	}

	/// Expiry hint of the current access token.
	pub fn expiry_hint(&self) -> Option<OffsetDateTime> {
		self.access_token.as_ref().and_then(|token| token.expires_at)
	}

	/// Returns `true` if an access token is held and not known to be expired at `now`.
	pub fn has_usable_access_at(&self, now: OffsetDateTime) -> bool {
		self.access_token.as_ref().is_some_and(|token| !token.is_expired_at(now))
	}
}

/// Login credentials; the secret is redacted in debug output.
#[derive(Clone, Debug)]
pub struct Credentials {
	/// Account identifier (e-mail address).
	pub identifier: String,
	/// Account password.
	pub secret: TokenSecret,
}
impl Credentials {
	/// Creates credentials for the provided identifier and secret.
	pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
		Self { identifier: identifier.into(), secret: TokenSecret::new(secret) }
	}
}

/// Profile returned by a successful login.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
	/// Stable user identifier.
	pub id: String,
	/// E-mail address.
	pub email: String,
	/// Display name.
	pub name: String,
	/// Role label assigned by the service.
	pub role: String,
	/// Account creation timestamp as reported by the service.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<String>,
}

/// Successful login result.
#[derive(Clone, Debug)]
pub struct LoginGrant {
	/// Fresh access token.
	pub access_token: AccessToken,
	/// Refresh token to persist.
	pub refresh_token: TokenSecret,
	/// Authenticated user.
	pub user: UserProfile,
}

/// Successful refresh result.
#[derive(Clone, Debug)]
pub struct RefreshGrant {
	/// Replacement access token.
	pub access_token: AccessToken,
	/// Rotated refresh token, when the service rotates.
	pub refresh_token: Option<TokenSecret>,
}
