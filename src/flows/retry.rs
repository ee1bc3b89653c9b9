//! Retry-once pipeline for calls to protected resources.
//!
//! [`ProtectedClient::execute`] attaches the current access token, dispatches the request
//! through a [`ProtectedTransport`], and on an authorization failure asks the
//! [`RefreshCoordinator`] for a new token before replaying the request exactly once.
//! Concurrent failures each call into the coordinator; its single-flight guard collapses them
//! into one refresh.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::TransportError,
	flows::RefreshCoordinator,
	obs::{self, NoteLevel, OpOutcome, OpSpan, SessionOp},
	store::TokenStore,
};

/// Boxed future returned by [`ProtectedTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ProtectedResponse, TransportError>> + 'a + Send>>;

/// HTTP status treated as an authorization failure.
pub const UNAUTHORIZED: u16 = 401;

/// Transport that dispatches protected requests.
///
/// Implementations attach `bearer` as the request's authorization credential when present and
/// report every HTTP status as a [`ProtectedResponse`]; only failures to obtain a response at
/// all become [`TransportError`]s.
pub trait ProtectedTransport
where
	Self: Send + Sync,
{
	/// Sends `request`, authorized with `bearer` when provided.
	fn send<'a>(
		&'a self,
		request: &'a ProtectedRequest,
		bearer: Option<&'a TokenSecret>,
	) -> TransportFuture<'a>;
}
impl<T> ProtectedTransport for Arc<T>
where
	T: ?Sized + ProtectedTransport,
{
	fn send<'a>(
		&'a self,
		request: &'a ProtectedRequest,
		bearer: Option<&'a TokenSecret>,
	) -> TransportFuture<'a> {
		(**self).send(request, bearer)
	}
}

/// Request methods supported by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
	/// `GET`
	Get,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
}
impl Method {
	/// Upper-case method name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
		}
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Replayable description of a protected call.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtectedRequest {
	/// Request method.
	pub method: Method,
	/// Path relative to the API base URL.
	pub path: String,
	/// JSON body, if any.
	pub body: Option<serde_json::Value>,
	/// Extra headers; the authorization header is managed by the pipeline.
	pub headers: BTreeMap<String, String>,
	retried: bool,
}
impl ProtectedRequest {
	/// Creates a request without a body.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self { method, path: path.into(), body: None, headers: BTreeMap::new(), retried: false }
	}

	/// Shorthand for a `GET` request.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::Get, path)
	}

	/// Shorthand for a `POST` request with a JSON body.
	pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
		Self::new(Method::Post, path).with_body(body)
	}

	/// Attaches a JSON body.
	pub fn with_body(mut self, body: serde_json::Value) -> Self {
		self.body = Some(body);

		self
	}

	/// Adds a header.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());

		self
	}

	/// Returns `true` once the request has been replayed after a refresh.
	pub fn is_retried(&self) -> bool {
		self.retried
	}
}

/// Status and raw body of a protected call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtectedResponse {
	/// HTTP status code.
	pub status: u16,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl ProtectedResponse {
	/// Creates a response.
	pub fn new(status: u16, body: Vec<u8>) -> Self {
		Self { status, body }
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Returns `true` when the status signals an authorization failure.
	pub fn is_unauthorized(&self) -> bool {
		self.status == UNAUTHORIZED
	}

	/// Deserializes the body as JSON.
	pub fn json<T>(&self) -> Result<T, serde_json::Error>
	where
		T: serde::de::DeserializeOwned,
	{
		serde_json::from_slice(&self.body)
	}

	/// Body decoded as UTF-8, lossily.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}
}

/// Protected-resource client bound to one session.
pub struct ProtectedClient<T> {
	store: Arc<TokenStore>,
	coordinator: Arc<RefreshCoordinator>,
	transport: T,
}
impl<T> ProtectedClient<T>
where
	T: ProtectedTransport,
{
	/// Creates a client that reads tokens from `store` and refreshes through `coordinator`.
	pub fn new(store: Arc<TokenStore>, coordinator: Arc<RefreshCoordinator>, transport: T) -> Self {
		Self { store, coordinator, transport }
	}

	/// Underlying transport.
	pub fn transport(&self) -> &T {
		&self.transport
	}

	/// Sends `request`, refreshing and replaying it once on an authorization failure.
	///
	/// Non-authorization statuses come back as `Ok` for the caller to interpret. A failed
	/// refresh is returned as [`Error::Refresh`]; a replay that is still unauthorized is
	/// returned as [`Error::RetryExhausted`].
	pub async fn execute(&self, request: ProtectedRequest) -> Result<ProtectedResponse> {
		const OP: SessionOp = SessionOp::ProtectedCall;

		obs::record_op_outcome(OP, OpOutcome::Attempt);

		let result = OpSpan::new(OP, "execute").instrument(self.execute_inner(request)).await;

		obs::record_result(OP, &result);

		result
	}

	async fn execute_inner(&self, mut request: ProtectedRequest) -> Result<ProtectedResponse> {
		let bearer = self.store.access_token().map(|token| token.secret);
		let response = self.transport.send(&request, bearer.as_ref()).await?;

		if !response.is_unauthorized() {
			return Ok(response);
		}

		request.retried = true;

		obs::note(SessionOp::ProtectedCall, NoteLevel::Debug, "retrying after 401", &request.path);

		let token = self.coordinator.request_refresh().await?;
		let response = self.transport.send(&request, Some(&token.secret)).await?;

		if response.is_unauthorized() {
			return Err(Error::RetryExhausted { status: response.status });
		}

		Ok(response)
	}
}
impl<T> Debug for ProtectedClient<T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ProtectedClient").field("store", &self.store).finish()
	}
}
