//! Access tokens and the expiry hint used to schedule proactive refreshes.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::{_prelude::*, auth::TokenSecret};

/// Short-lived bearer credential plus the instant it is known to expire, if any.
///
/// Access tokens live only in memory; nothing in this crate hands them to a
/// [`DurableStore`](crate::store::DurableStore).
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
	/// Bearer secret attached to protected requests.
	pub secret: TokenSecret,
	/// Expiry hint, supplied by the auth service or decoded from a JWT `exp` claim.
	pub expires_at: Option<OffsetDateTime>,
}
impl AccessToken {
	/// Wraps a token and decodes its expiry from the JWT `exp` claim when possible.
	pub fn new(value: impl Into<String>) -> Self {
		let secret = TokenSecret::new(value);
		let expires_at = decode_jwt_expiry(secret.expose());

		Self { secret, expires_at }
	}

	/// Wraps a token with an explicit expiry instant.
	pub fn with_expiry(value: impl Into<String>, expires_at: OffsetDateTime) -> Self {
		Self { secret: TokenSecret::new(value), expires_at: Some(expires_at) }
	}

	/// Builds a token from a service response, preferring a supplied `expires_in` over the
	/// JWT claim. A lifetime that does not fit the calendar falls back to the claim.
	pub fn from_grant(
		value: impl Into<String>,
		expires_in: Option<Duration>,
		issued_at: OffsetDateTime,
	) -> Self {
		match expires_in.and_then(|lifetime| issued_at.checked_add(lifetime)) {
			Some(expires_at) => Self::with_expiry(value, expires_at),
			None => Self::new(value),
		}
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		self.secret.expose()
	}

	/// Time left before expiry at `now`, when the expiry is known.
	pub fn remaining_at(&self, now: OffsetDateTime) -> Option<Duration> {
		self.expires_at.map(|expiry| expiry - now)
	}

	/// Returns `true` if the expiry is known and has passed at `now`.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|expiry| now >= expiry)
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessToken")
			.field("secret", &"<redacted>")
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

#[derive(Deserialize)]
struct ExpiryClaims {
	exp: Option<i64>,
}

/// Decodes the `exp` claim of a compact JWT without verifying its signature.
///
/// Opaque tokens, malformed segments, and payloads without `exp` all yield `None`.
pub fn decode_jwt_expiry(token: &str) -> Option<OffsetDateTime> {
	let mut segments = token.split('.');
	let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);

	if segments.next().is_some() {
		return None;
	}

	let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
	let claims = serde_json::from_slice::<ExpiryClaims>(&bytes).ok()?;

	OffsetDateTime::from_unix_timestamp(claims.exp?).ok()
}
