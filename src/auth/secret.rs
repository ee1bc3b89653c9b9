//! Bearer and refresh token material.
//!
//! Token strings only leave [`TokenSecret`] through [`TokenSecret::expose`]; every formatter
//! prints a placeholder and logs identify a secret by its [`fingerprint`](TokenSecret::fingerprint).

// crates.io
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Opaque token string that never formats its contents.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Wraps `value` unless it is empty or whitespace; servers send `""` for "no rotation".
	pub fn non_empty(value: impl Into<String>) -> Option<Self> {
		let value = value.into();

		if value.trim().is_empty() {
			return None;
		}

		Some(Self(value))
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Short SHA-256 fingerprint that identifies the secret in logs without revealing it.
	pub fn fingerprint(&self) -> String {
		Sha256::digest(self.0.as_bytes()).iter().take(6).map(|byte| format!("{byte:02x}")).collect()
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}
