//! Session configuration: refresh timing, persistence, and HTTP defaults.

// self
use crate::{_prelude::*, error::ConfigError};

/// Tunables shared by the token store, scheduler, and HTTP backends.
///
/// Durations are expressed in whole seconds when (de)serialized so configuration files stay
/// readable. Missing fields fall back to [`SessionConfig::default`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
	/// Time reserved before expiry so a refresh completes under network latency.
	#[serde(with = "seconds")]
	pub safety_margin: Duration,
	/// Access-token lifetime assumed when no expiry can be determined.
	#[serde(with = "seconds")]
	pub assumed_access_lifetime: Duration,
	/// Well-known key under which the refresh token is persisted.
	pub refresh_token_key: String,
	/// Expiration horizon applied to the persisted refresh token.
	#[serde(with = "seconds")]
	pub refresh_token_horizon: Duration,
	/// Timeout applied to each HTTP request made by the reqwest backends.
	#[serde(with = "seconds")]
	pub request_timeout: Duration,
	/// Base URL of the auth service and protected API; [`DEFAULT_BASE_URL`] when unset.
	///
	/// [`DEFAULT_BASE_URL`]: SessionConfig::DEFAULT_BASE_URL
	pub base_url: Option<Url>,
}
impl SessionConfig {
	/// Default safety margin (2 minutes).
	pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::minutes(2);
	/// Default assumed access-token lifetime (15 minutes).
	pub const DEFAULT_ACCESS_LIFETIME: Duration = Duration::minutes(15);
	/// Default refresh-token persistence horizon (7 days).
	pub const DEFAULT_REFRESH_HORIZON: Duration = Duration::days(7);
	/// Default per-request timeout (10 seconds).
	pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::seconds(10);
	/// Default refresh-token storage key.
	pub const DEFAULT_REFRESH_TOKEN_KEY: &'static str = "refreshToken";
	/// Default API base URL.
	pub const DEFAULT_BASE_URL: &'static str = "http://localhost:3000/api";
	/// Longest accepted assumed access-token lifetime (30 days).
	pub const MAX_ACCESS_LIFETIME: Duration = Duration::days(30);
	/// Longest accepted refresh-token persistence horizon (365 days).
	pub const MAX_REFRESH_HORIZON: Duration = Duration::days(365);

	/// Parses a JSON document, reporting the path of the first invalid field.
	pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
		let de = &mut serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(de).map_err(|e| {
			ConfigError::Parse { path: e.path().to_string(), message: e.inner().to_string() }
		})?;

		config.validate()?;

		Ok(config)
	}

	/// Base URL the HTTP backends resolve endpoints against.
	pub fn base_url(&self) -> Result<Url, ConfigError> {
		match &self.base_url {
			Some(url) => Ok(url.clone()),
			None => Url::parse(Self::DEFAULT_BASE_URL).map_err(|source| ConfigError::InvalidUrl {
				value: Self::DEFAULT_BASE_URL.into(),
				source,
			}),
		}
	}

	/// Delay used when the access token carries no usable expiry hint.
	pub fn fallback_delay(&self) -> Duration {
		self.assumed_access_lifetime - self.safety_margin
	}

	/// Overrides the safety margin.
	pub fn with_safety_margin(mut self, margin: Duration) -> Self {
		self.safety_margin = margin;

		self
	}

	/// Overrides the assumed access-token lifetime.
	pub fn with_assumed_access_lifetime(mut self, lifetime: Duration) -> Self {
		self.assumed_access_lifetime = lifetime;

		self
	}

	/// Overrides the refresh-token storage key.
	pub fn with_refresh_token_key(mut self, key: impl Into<String>) -> Self {
		self.refresh_token_key = key.into();

		self
	}

	/// Overrides the refresh-token persistence horizon.
	pub fn with_refresh_token_horizon(mut self, horizon: Duration) -> Self {
		self.refresh_token_horizon = horizon;

		self
	}

	/// Overrides the HTTP request timeout.
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Overrides the base URL.
	pub fn with_base_url(mut self, base_url: Url) -> Self {
		self.base_url = Some(base_url);

		self
	}

	/// Checks cross-field constraints.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.safety_margin.is_negative() {
			return Err(ConfigError::NegativeSafetyMargin);
		}
		if self.assumed_access_lifetime <= self.safety_margin {
			return Err(ConfigError::LifetimeWithinMargin);
		}
		if self.assumed_access_lifetime > Self::MAX_ACCESS_LIFETIME {
			return Err(ConfigError::DurationOutOfRange {
				field: "assumed_access_lifetime",
				max: Self::MAX_ACCESS_LIFETIME,
			});
		}
		if !self.refresh_token_horizon.is_positive() {
			return Err(ConfigError::NonPositiveHorizon);
		}
		if self.refresh_token_horizon > Self::MAX_REFRESH_HORIZON {
			return Err(ConfigError::DurationOutOfRange {
				field: "refresh_token_horizon",
				max: Self::MAX_REFRESH_HORIZON,
			});
		}
		if self.refresh_token_key.trim().is_empty() {
			return Err(ConfigError::EmptyStorageKey);
		}

		Ok(())
	}
}
impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			safety_margin: Self::DEFAULT_SAFETY_MARGIN,
			assumed_access_lifetime: Self::DEFAULT_ACCESS_LIFETIME,
			refresh_token_key: Self::DEFAULT_REFRESH_TOKEN_KEY.into(),
			refresh_token_horizon: Self::DEFAULT_REFRESH_HORIZON,
			request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
			base_url: None,
		}
	}
}

mod seconds {
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_i64(value.whole_seconds())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::seconds)
	}
}
