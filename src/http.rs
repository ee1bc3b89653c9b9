//! Reqwest-backed collaborators: the JSON auth service and the protected-resource transport.
//!
//! Both types share one [`ReqwestClient`] built from [`SessionConfig`] (per-request timeout,
//! no redirect following) and resolve endpoints against the configured base URL, so
//! `http://host/api` + `auth/login` becomes `http://host/api/auth/login`.

// crates.io
use reqwest::{Response, StatusCode, redirect::Policy};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Credentials, LoginGrant, RefreshGrant, TokenSecret, UserProfile},
	config::SessionConfig,
	error::{ConfigError, TransportError},
	flows::{Method, ProtectedRequest, ProtectedResponse, ProtectedTransport, TransportFuture},
	obs::{self, NoteLevel, SessionOp},
	service::{AuthFuture, AuthService, AuthServiceError},
};

const LOGIN_PATH: &str = "auth/login";
const REFRESH_PATH: &str = "auth/refresh";
const LOGOUT_PATH: &str = "auth/logout";
const ME_PATH: &str = "auth/me";

/// Builds the HTTP client shared by the reqwest backends.
pub fn build_client(config: &SessionConfig) -> Result<ReqwestClient, ConfigError> {
	Ok(ReqwestClient::builder()
		.timeout(config.request_timeout.unsigned_abs())
		.redirect(Policy::none())
		.build()?)
}

/// Resolves `path` below `base`, keeping any path prefix the base carries.
pub fn endpoint(base: &Url, path: &str) -> Result<Url, ConfigError> {
	let value = format!("{}/{}", base.as_str().trim_end_matches('/'), path.trim_start_matches('/'));

	Url::parse(&value).map_err(|source| ConfigError::InvalidUrl { value, source })
}

/// Accepts a server-supplied `expiresIn` only when it is a plausible access-token lifetime.
fn lifetime_hint(expires_in: Option<i64>) -> Option<Duration> {
	let seconds = expires_in?;
	let lifetime = Duration::seconds(seconds);

	if !lifetime.is_positive() || lifetime > SessionConfig::MAX_ACCESS_LIFETIME {
		obs::note(SessionOp::Refresh, NoteLevel::Warn, "expiresIn ignored", &seconds);

		return None;
	}

	Some(lifetime)
}

#[derive(Serialize)]
struct LoginBody<'a> {
	email: &'a str,
	password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginPayload {
	user: UserProfile,
	access_token: String,
	refresh_token: String,
	#[serde(default)]
	expires_in: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody<'a> {
	refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
}

#[derive(Default, Deserialize)]
struct FailurePayload {
	#[serde(default)]
	message: Option<String>,
}

/// JSON auth service speaking `POST {base}/auth/{login,refresh,logout}` and
/// `GET {base}/auth/me`.
#[derive(Clone, Debug)]
pub struct HttpAuthService {
	client: ReqwestClient,
	login_url: Url,
	refresh_url: Url,
	logout_url: Url,
	me_url: Url,
}
impl HttpAuthService {
	/// Creates a service for [`SessionConfig::base_url()`] with a client built from `config`.
	pub fn new(config: &SessionConfig) -> Result<Self, ConfigError> {
		Self::with_client(build_client(config)?, &config.base_url()?)
	}

	/// Creates a service that reuses an existing client.
	pub fn with_client(client: ReqwestClient, base_url: &Url) -> Result<Self, ConfigError> {
		Ok(Self {
			client,
			login_url: endpoint(base_url, LOGIN_PATH)?,
			refresh_url: endpoint(base_url, REFRESH_PATH)?,
			logout_url: endpoint(base_url, LOGOUT_PATH)?,
			me_url: endpoint(base_url, ME_PATH)?,
		})
	}

	async fn post_json<B, T>(&self, url: &Url, body: &B) -> Result<T, Rejection>
	where
		B: Serialize,
		T: serde::de::DeserializeOwned,
	{
		let response = self
			.client
			.post(url.clone())
			.json(body)
			.send()
			.await
			.map_err(|e| Rejection::Service(AuthServiceError::unreachable(e)))?;

		if !response.status().is_success() {
			return Err(Rejection::from_response(response).await);
		}

		response.json::<T>().await.map_err(|e| {
			Rejection::Service(AuthServiceError::Unexpected {
				status: None,
				message: format!("undecodable response body: {e}"),
			})
		})
	}
}
impl AuthService for HttpAuthService {
	fn login<'a>(&'a self, credentials: &'a Credentials) -> AuthFuture<'a, LoginGrant> {
		Box::pin(async move {
			let issued_at = OffsetDateTime::now_utc();
			let body = LoginBody {
				email: &credentials.identifier,
				password: credentials.secret.expose(),
			};
			let payload = self
				.post_json::<_, LoginPayload>(&self.login_url, &body)
				.await
				.map_err(|rejection| {
					rejection.into_error(|reason| AuthServiceError::InvalidCredentials { reason })
				})?;

			Ok(LoginGrant {
				access_token: AccessToken::from_grant(
					payload.access_token,
					lifetime_hint(payload.expires_in),
					issued_at,
				),
				refresh_token: TokenSecret::new(payload.refresh_token),
				user: payload.user,
			})
		})
	}

	fn refresh<'a>(&'a self, refresh_token: &'a TokenSecret) -> AuthFuture<'a, RefreshGrant> {
		Box::pin(async move {
			let issued_at = OffsetDateTime::now_utc();
			let body = RefreshBody { refresh_token: refresh_token.expose() };
			let payload = self
				.post_json::<_, RefreshPayload>(&self.refresh_url, &body)
				.await
				.map_err(|rejection| {
					rejection.into_error(|reason| AuthServiceError::InvalidOrExpiredRefreshToken {
						reason,
					})
				})?;

			Ok(RefreshGrant {
				access_token: AccessToken::from_grant(
					payload.access_token,
					lifetime_hint(payload.expires_in),
					issued_at,
				),
				refresh_token: payload.refresh_token.and_then(TokenSecret::non_empty),
			})
		})
	}

	fn logout<'a>(&'a self, access_token: Option<&'a TokenSecret>) -> AuthFuture<'a, ()> {
		Box::pin(async move {
			let mut request = self.client.post(self.logout_url.clone());

			if let Some(token) = access_token {
				request = request.bearer_auth(token.expose());
			}

			let response = request.send().await.map_err(AuthServiceError::unreachable)?;

			if response.status().is_success() {
				Ok(())
			} else {
				Err(Rejection::from_response(response).await.into_error(|reason| {
					AuthServiceError::Unexpected { status: None, message: reason }
				}))
			}
		})
	}

	fn current_user<'a>(&'a self, access_token: &'a TokenSecret) -> AuthFuture<'a, UserProfile> {
		Box::pin(async move {
			let response = self
				.client
				.get(self.me_url.clone())
				.bearer_auth(access_token.expose())
				.send()
				.await
				.map_err(AuthServiceError::unreachable)?;

			if !response.status().is_success() {
				let status = response.status().as_u16();

				return Err(Rejection::from_response(response).await.into_error(|reason| {
					AuthServiceError::Unexpected { status: Some(status), message: reason }
				}));
			}

			response.json::<UserProfile>().await.map_err(|e| AuthServiceError::Unexpected {
				status: None,
				message: format!("undecodable response body: {e}"),
			})
		})
	}
}

/// Failed auth call before it is mapped onto the operation-specific rejection.
enum Rejection {
	/// 400/401/403: the service refused the presented credential.
	Refused(String),
	Service(AuthServiceError),
}
impl Rejection {
	async fn from_response(response: Response) -> Self {
		let status = response.status();
		let body = response.bytes().await.unwrap_or_default();
		let message = serde_json::from_slice::<FailurePayload>(&body)
			.unwrap_or_default()
			.message
			.unwrap_or_else(|| {
				status.canonical_reason().unwrap_or("request failed").to_owned()
			});

		match status {
			StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN =>
				Self::Refused(message),
			_ => Self::Service(AuthServiceError::Unexpected {
				status: Some(status.as_u16()),
				message,
			}),
		}
	}

	fn into_error(self, refused: impl FnOnce(String) -> AuthServiceError) -> AuthServiceError {
		match self {
			Self::Refused(reason) => refused(reason),
			Self::Service(e) => e,
		}
	}
}

/// [`ProtectedTransport`] that sends requests below a base URL with bearer authorization.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
	client: ReqwestClient,
	base_url: Url,
}
impl ReqwestTransport {
	/// Creates a transport for [`SessionConfig::base_url()`] with a client built from `config`.
	pub fn new(config: &SessionConfig) -> Result<Self, ConfigError> {
		Ok(Self::with_client(build_client(config)?, config.base_url()?))
	}

	/// Creates a transport that reuses an existing client.
	pub fn with_client(client: ReqwestClient, base_url: Url) -> Self {
		Self { client, base_url }
	}

	/// Base URL requests are resolved against.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}
}
impl ProtectedTransport for ReqwestTransport {
	fn send<'a>(
		&'a self,
		request: &'a ProtectedRequest,
		bearer: Option<&'a TokenSecret>,
	) -> TransportFuture<'a> {
		Box::pin(async move {
			let url = endpoint(&self.base_url, &request.path).map_err(TransportError::network)?;
			let method = match request.method {
				Method::Get => reqwest::Method::GET,
				Method::Post => reqwest::Method::POST,
				Method::Put => reqwest::Method::PUT,
				Method::Patch => reqwest::Method::PATCH,
				Method::Delete => reqwest::Method::DELETE,
			};
			let mut builder = self.client.request(method, url);

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if let Some(token) = bearer {
				builder = builder.bearer_auth(token.expose());
			}
			if let Some(body) = &request.body {
				builder = builder.json(body);
			}

			let response = builder.send().await?;
			let status = response.status().as_u16();
			let body = response.bytes().await?;

			Ok(ProtectedResponse::new(status, body.to_vec()))
		})
	}
}
