//! Client-side bearer session manager: single-flight refresh coordination, a retry-once request
//! pipeline, proactive refresh scheduling, and cross-context session synchronization.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod flows;
#[cfg(feature = "reqwest")] pub mod http;
pub mod obs;
pub mod service;
pub mod session;
pub mod store;
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and scripted collaborators shared by integration tests.

	pub use crate::_prelude::*;

	// std
	use std::{
		collections::{HashSet, VecDeque},
		sync::atomic::{AtomicUsize, Ordering},
	};
	// crates.io
	use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
	// self
	use crate::{
		auth::{AccessToken, Credentials, LoginGrant, RefreshGrant, TokenSecret, UserProfile},
		config::SessionConfig,
		error::TransportError,
		flows::{
			ProtectedRequest, ProtectedResponse, ProtectedTransport, SignalHub, TransportFuture,
		},
		service::{AuthFuture, AuthService, AuthServiceError},
		session::SessionContext,
		store::MemoryStore,
	};

	/// Builds an unsigned JWT whose payload carries the provided `exp` claim.
	pub fn jwt_with_exp(label: &str, exp: OffsetDateTime) -> String {
		let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
		let payload = URL_SAFE_NO_PAD
			.encode(format!(r#"{{"sub":"{label}","exp":{}}}"#, exp.unix_timestamp()).as_bytes());

		format!("{header}.{payload}.")
	}

	/// Demo profile returned by scripted logins.
	pub fn demo_user() -> UserProfile {
		UserProfile {
			id: "2".into(),
			email: "user@example.com".into(),
			name: "Regular User".into(),
			role: "user".into(),
			created_at: None,
		}
	}

	/// Demo credentials matching [`demo_user`].
	pub fn demo_credentials() -> Credentials {
		Credentials::new("user@example.com", "user123")
	}

	/// Login grant with an access token that expires `expires_in` from now.
	pub fn login_grant(access: &str, refresh: &str, expires_in: Duration) -> LoginGrant {
		LoginGrant {
			access_token: AccessToken::with_expiry(access, OffsetDateTime::now_utc() + expires_in),
			refresh_token: TokenSecret::new(refresh),
			user: demo_user(),
		}
	}

	/// Refresh grant with an optional rotated refresh token.
	pub fn refresh_grant(
		access: &str,
		rotated: Option<&str>,
		expires_in: Duration,
	) -> RefreshGrant {
		RefreshGrant {
			access_token: AccessToken::with_expiry(access, OffsetDateTime::now_utc() + expires_in),
			refresh_token: rotated.map(TokenSecret::new),
		}
	}

	/// Builds a context with default configuration over the provided collaborators.
	pub fn session_with(
		service: &Arc<ScriptedAuthService>,
		durable: &MemoryStore,
		hub: &SignalHub,
	) -> SessionContext {
		SessionContext::new(
			SessionConfig::default(),
			service.clone(),
			Arc::new(durable.clone()),
			hub.clone(),
		)
		.expect("Default session config should be valid.")
	}

	/// Builds an isolated context that already holds `refresh_token` but no access token.
	pub fn seeded_session(
		service: &Arc<ScriptedAuthService>,
		refresh_token: &str,
	) -> SessionContext {
		let context = session_with(service, &MemoryStore::default(), &SignalHub::default());

		context.store().set_refresh(TokenSecret::new(refresh_token));

		context
	}

	/// Scripted [`AuthService`] that replays queued outcomes and counts every call.
	#[derive(Debug, Default)]
	pub struct ScriptedAuthService {
		logins: Mutex<VecDeque<Result<LoginGrant, AuthServiceError>>>,
		refreshes: Mutex<VecDeque<Result<RefreshGrant, AuthServiceError>>>,
		logout_failure: Mutex<Option<AuthServiceError>>,
		current_user_failure: Mutex<Option<AuthServiceError>>,
		latency: Mutex<std::time::Duration>,
		refresh_tokens_seen: Mutex<Vec<String>>,
		logout_tokens_seen: Mutex<Vec<Option<String>>>,
		current_user_tokens_seen: Mutex<Vec<String>>,
		login_calls: AtomicUsize,
		refresh_calls: AtomicUsize,
		logout_calls: AtomicUsize,
		current_user_calls: AtomicUsize,
	}
	impl ScriptedAuthService {
		/// Queues the outcome of the next login call.
		pub fn push_login(&self, outcome: Result<LoginGrant, AuthServiceError>) -> &Self {
			self.logins.lock().push_back(outcome);

			self
		}

		/// Queues the outcome of the next refresh call.
		pub fn push_refresh(&self, outcome: Result<RefreshGrant, AuthServiceError>) -> &Self {
			self.refreshes.lock().push_back(outcome);

			self
		}

		/// Makes every subsequent logout call fail with the provided error.
		pub fn fail_logout(&self, error: AuthServiceError) -> &Self {
			*self.logout_failure.lock() = Some(error);

			self
		}

		/// Makes every subsequent profile lookup fail with the provided error.
		pub fn fail_current_user(&self, error: AuthServiceError) -> &Self {
			*self.current_user_failure.lock() = Some(error);

			self
		}

		/// Simulated network latency applied to login and refresh calls.
		pub fn set_latency(&self, latency: std::time::Duration) -> &Self {
			*self.latency.lock() = latency;

			self
		}

		/// Number of login calls observed.
		pub fn login_calls(&self) -> usize {
			self.login_calls.load(Ordering::SeqCst)
		}

		/// Number of refresh calls observed.
		pub fn refresh_calls(&self) -> usize {
			self.refresh_calls.load(Ordering::SeqCst)
		}

		/// Number of logout calls observed.
		pub fn logout_calls(&self) -> usize {
			self.logout_calls.load(Ordering::SeqCst)
		}

		/// Number of profile lookups observed.
		pub fn current_user_calls(&self) -> usize {
			self.current_user_calls.load(Ordering::SeqCst)
		}

		/// Access tokens presented on profile lookups, in call order.
		pub fn current_user_tokens_seen(&self) -> Vec<String> {
			self.current_user_tokens_seen.lock().clone()
		}

		/// Refresh tokens presented to the service, in call order.
		pub fn refresh_tokens_seen(&self) -> Vec<String> {
			self.refresh_tokens_seen.lock().clone()
		}

		/// Access tokens presented on logout, in call order.
		pub fn logout_tokens_seen(&self) -> Vec<Option<String>> {
			self.logout_tokens_seen.lock().clone()
		}

		async fn simulate_latency(&self) {
			let latency = *self.latency.lock();

			if !latency.is_zero() {
				tokio::time::sleep(latency).await;
			}
		}
	}
	impl AuthService for ScriptedAuthService {
		fn login<'a>(&'a self, _credentials: &'a Credentials) -> AuthFuture<'a, LoginGrant> {
			Box::pin(async move {
				self.login_calls.fetch_add(1, Ordering::SeqCst);
				self.simulate_latency().await;
				self.logins.lock().pop_front().unwrap_or_else(|| {
					Err(AuthServiceError::InvalidCredentials { reason: "no scripted login".into() })
				})
			})
		}

		fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> AuthFuture<'a, RefreshGrant> {
			Box::pin(async move {
				self.refresh_calls.fetch_add(1, Ordering::SeqCst);
				self.refresh_tokens_seen.lock().push(refresh_token.expose().to_owned());
				self.simulate_latency().await;
				self.refreshes.lock().pop_front().unwrap_or_else(|| {
					Err(AuthServiceError::InvalidOrExpiredRefreshToken {
						reason: "no scripted refresh".into(),
					})
				})
			})
		}

		fn logout<'a>(&'a self, access_token: Option<&'a TokenSecret>) -> AuthFuture<'a, ()> {
			Box::pin(async move {
				self.logout_calls.fetch_add(1, Ordering::SeqCst);
				self.logout_tokens_seen
					.lock()
					.push(access_token.map(|token| token.expose().to_owned()));

				match self.logout_failure.lock().clone() {
					Some(err) => Err(err),
					None => Ok(()),
				}
			})
		}

		fn current_user<'a>(
			&'a self,
			access_token: &'a TokenSecret,
		) -> AuthFuture<'a, UserProfile> {
			Box::pin(async move {
				self.current_user_calls.fetch_add(1, Ordering::SeqCst);
				self.current_user_tokens_seen.lock().push(access_token.expose().to_owned());

				match self.current_user_failure.lock().clone() {
					Some(err) => Err(err),
					None => Ok(demo_user()),
				}
			})
		}
	}

	/// Scripted protected resource that accepts a configurable set of bearer tokens.
	#[derive(Debug, Default)]
	pub struct ScriptedTransport {
		accepted: Mutex<HashSet<String>>,
		forced: Mutex<VecDeque<u16>>,
		bearers: Mutex<Vec<Option<String>>>,
		replays: Mutex<Vec<bool>>,
	}
	impl ScriptedTransport {
		/// Creates a transport that accepts the provided tokens.
		pub fn accepting<I, S>(tokens: I) -> Self
		where
			I: IntoIterator<Item = S>,
			S: Into<String>,
		{
			let transport = Self::default();

			transport.accepted.lock().extend(tokens.into_iter().map(Into::into));

			transport
		}

		/// Starts accepting `token`.
		pub fn accept(&self, token: impl Into<String>) {
			self.accepted.lock().insert(token.into());
		}

		/// Stops accepting `token`.
		pub fn reject(&self, token: &str) {
			self.accepted.lock().remove(token);
		}

		/// Forces the next response to carry `status` regardless of the bearer.
		pub fn force_status(&self, status: u16) {
			self.forced.lock().push_back(status);
		}

		/// Bearer tokens attached to each dispatched request, in order.
		pub fn bearers(&self) -> Vec<Option<String>> {
			self.bearers.lock().clone()
		}

		/// Whether each dispatched request was a replay, in order.
		pub fn replays(&self) -> Vec<bool> {
			self.replays.lock().clone()
		}

		/// Number of dispatched requests.
		pub fn calls(&self) -> usize {
			self.bearers.lock().len()
		}
	}
	impl ProtectedTransport for ScriptedTransport {
		fn send<'a>(
			&'a self,
			request: &'a ProtectedRequest,
			bearer: Option<&'a TokenSecret>,
		) -> TransportFuture<'a> {
			Box::pin(async move {
				let bearer = bearer.map(|token| token.expose().to_owned());

				self.bearers.lock().push(bearer.clone());
				self.replays.lock().push(request.is_retried());

				if let Some(status) = self.forced.lock().pop_front() {
					return Ok(ProtectedResponse::new(status, Vec::new()));
				}

				let authorized =
					bearer.as_ref().is_some_and(|token| self.accepted.lock().contains(token));

				if authorized {
					let body = format!(r#"{{"path":"{}","ok":true}}"#, request.path);

					Ok(ProtectedResponse::new(200, body.into_bytes()))
				} else {
					Ok(ProtectedResponse::new(401, br#"{"message":"Unauthorized"}"#.to_vec()))
				}
			})
		}
	}

	/// Transport whose every call fails at the network layer.
	#[derive(Debug, Default)]
	pub struct UnreachableTransport;
	impl ProtectedTransport for UnreachableTransport {
		fn send<'a>(
			&'a self,
			_request: &'a ProtectedRequest,
			_bearer: Option<&'a TokenSecret>,
		) -> TransportFuture<'a> {
			Box::pin(async move {
				Err(TransportError::Io(std::io::Error::new(
					std::io::ErrorKind::ConnectionRefused,
					"connection refused",
				)))
			})
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
