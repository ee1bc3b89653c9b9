#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use bearer_session::{
	_preludet::*,
	auth::{Credentials, TokenSecret},
	config::SessionConfig,
	flows::{ProtectedRequest, SignalHub},
	http::{HttpAuthService, ReqwestTransport},
	service::{AuthService, AuthServiceError},
	session::SessionContext,
	store::MemoryStore,
};

fn config_for(server: &MockServer) -> SessionConfig {
	SessionConfig::default().with_base_url(
		Url::parse(&server.url("/api")).expect("Mock base URL should parse successfully."),
	)
}

fn service_for(server: &MockServer) -> HttpAuthService {
	HttpAuthService::new(&config_for(server)).expect("HTTP auth service should build.")
}

#[tokio::test]
async fn login_posts_credentials_and_parses_grant() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/api/auth/login")
				.json_body(json!({ "email": "user@example.com", "password": "user123" }));
			then.status(200).header("content-type", "application/json").json_body(json!({
				"user": {
					"id": "2",
					"email": "user@example.com",
					"name": "Regular User",
					"role": "user",
					"createdAt": "2024-01-01T00:00:00.000Z"
				},
				"accessToken": "access-1",
				"refreshToken": "refresh-1",
				"expiresIn": 900
			}));
		})
		.await;
	let before = OffsetDateTime::now_utc();
	let grant = service_for(&server)
		.login(&demo_credentials())
		.await
		.expect("Login should succeed against the mock.");

	mock.assert_async().await;

	assert_eq!(grant.access_token.expose(), "access-1");
	assert_eq!(grant.refresh_token, TokenSecret::new("refresh-1"));
	assert_eq!(grant.user.role, "user");
	assert_eq!(grant.user.created_at.as_deref(), Some("2024-01-01T00:00:00.000Z"));

	let expires_at = grant.access_token.expires_at.expect("expiresIn should set an expiry.");

	assert!(expires_at >= before + Duration::seconds(900));
	assert!(expires_at <= OffsetDateTime::now_utc() + Duration::seconds(900));
}

#[tokio::test]
async fn rejected_login_surfaces_service_message() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/login");
			then.status(401).json_body(json!({ "message": "Invalid email or password" }));
		})
		.await;

	let err = service_for(&server)
		.login(&Credentials::new("user@example.com", "wrong"))
		.await
		.expect_err("Login should be rejected.");

	assert!(matches!(
		err,
		AuthServiceError::InvalidCredentials { ref reason } if reason == "Invalid email or password"
	));
}

#[tokio::test]
async fn refresh_without_rotation_keeps_no_refresh_token() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/refresh").json_body(json!({ "refreshToken": "refresh-1" }));
			then.status(200).json_body(json!({ "accessToken": "access-2" }));
		})
		.await;
	let grant = service_for(&server)
		.refresh(&TokenSecret::new("refresh-1"))
		.await
		.expect("Refresh should succeed against the mock.");

	mock.assert_async().await;

	assert_eq!(grant.access_token.expose(), "access-2");
	assert_eq!(grant.access_token.expires_at, None);
	assert_eq!(grant.refresh_token, None);
}

#[tokio::test]
async fn oversized_expires_in_is_ignored_instead_of_panicking() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/api/auth/refresh")
				.json_body(json!({ "refreshToken": "huge" }));
			then.status(200).json_body(json!({ "accessToken": "a", "expiresIn": i64::MAX }));
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/api/auth/refresh")
				.json_body(json!({ "refreshToken": "neg" }));
			then.status(200).json_body(json!({ "accessToken": "b", "expiresIn": -5 }));
		})
		.await;

	let service = service_for(&server);
	let huge = service
		.refresh(&TokenSecret::new("huge"))
		.await
		.expect("An implausible lifetime should not fail the grant.");
	let negative = service
		.refresh(&TokenSecret::new("neg"))
		.await
		.expect("A negative lifetime should not fail the grant.");

	assert_eq!(huge.access_token.expose(), "a");
	assert_eq!(huge.access_token.expires_at, None);
	assert_eq!(negative.access_token.expose(), "b");
	assert_eq!(negative.access_token.expires_at, None);
}

#[tokio::test]
async fn refresh_failures_are_classified_by_status() {
	let server = MockServer::start_async().await;

	server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/refresh").json_body(json!({ "refreshToken": "revoked" }));
			then.status(401).json_body(json!({ "message": "Invalid or expired refresh token" }));
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/refresh").json_body(json!({ "refreshToken": "busy" }));
			then.status(503).body("maintenance");
		})
		.await;

	let service = service_for(&server);
	let rejected = service
		.refresh(&TokenSecret::new("revoked"))
		.await
		.expect_err("Revoked token should be rejected.");
	let unavailable =
		service.refresh(&TokenSecret::new("busy")).await.expect_err("503 should fail the refresh.");

	assert!(matches!(rejected, AuthServiceError::InvalidOrExpiredRefreshToken { .. }));
	assert!(matches!(unavailable, AuthServiceError::Unexpected { status: Some(503), .. }));
}

#[tokio::test]
async fn unreachable_service_is_reported_as_such() {
	let config = SessionConfig::default().with_base_url(
		Url::parse("http://127.0.0.1:9/api").expect("Closed-port URL should parse successfully."),
	);
	let service = HttpAuthService::new(&config).expect("HTTP auth service should build.");
	let err = service
		.refresh(&TokenSecret::new("refresh-1"))
		.await
		.expect_err("Closed port should be unreachable.");

	assert!(matches!(err, AuthServiceError::Unreachable { .. }));
}

#[tokio::test]
async fn logout_sends_bearer_token() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/logout").header("authorization", "Bearer access-1");
			then.status(200).json_body(json!({ "message": "Logged out successfully" }));
		})
		.await;

	service_for(&server)
		.logout(Some(&TokenSecret::new("access-1")))
		.await
		.expect("Logout should succeed against the mock.");
	mock.assert_async().await;
}

#[tokio::test]
async fn current_user_presents_bearer_and_classifies_failures() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/auth/me").header("authorization", "Bearer access-1");
			then.status(200).json_body(json!({
				"id": "2",
				"email": "user@example.com",
				"name": "Regular User",
				"role": "user"
			}));
		})
		.await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/api/auth/me").header("authorization", "Bearer expired");
			then.status(401).json_body(json!({ "message": "Invalid or expired access token" }));
		})
		.await;

	let service = service_for(&server);
	let user = service
		.current_user(&TokenSecret::new("access-1"))
		.await
		.expect("Profile lookup should succeed against the mock.");

	mock.assert_async().await;

	assert_eq!(user, demo_user());

	let err = service
		.current_user(&TokenSecret::new("expired"))
		.await
		.expect_err("Expired access token should be refused.");

	assert!(matches!(
		err,
		AuthServiceError::Unexpected { status: Some(401), ref message }
			if message == "Invalid or expired access token"
	));
}

#[tokio::test]
async fn reqwest_pipeline_refreshes_and_replays_protected_calls() {
	let server = MockServer::start_async().await;
	let config = config_for(&server);

	server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/login");
			then.status(200).json_body(json!({
				"user": { "id": "1", "email": "admin@example.com", "name": "Admin User", "role": "admin" },
				"accessToken": "access-1",
				"refreshToken": "refresh-1",
				"expiresIn": 900
			}));
		})
		.await;

	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/refresh").json_body(json!({ "refreshToken": "refresh-1" }));
			then.status(200).json_body(json!({ "accessToken": "access-2", "expiresIn": 900 }));
		})
		.await;
	let stale = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/protected/data").header("authorization", "Bearer access-1");
			then.status(401).json_body(json!({ "message": "Invalid or expired access token" }));
		})
		.await;
	let fresh = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/api/protected/data")
				.header("authorization", "Bearer access-2")
				.header("x-request-id", "42");
			then.status(200).json_body(json!({ "message": "This is protected data" }));
		})
		.await;
	let context = SessionContext::new(
		config.clone(),
		Arc::new(HttpAuthService::new(&config).expect("HTTP auth service should build.")),
		Arc::new(MemoryStore::default()),
		SignalHub::default(),
	)
	.expect("Session context should build.");
	let user = context
		.login(&Credentials::new("admin@example.com", "admin123"))
		.await
		.expect("Login should succeed.");

	assert_eq!(user.role, "admin");

	let client = context.client(ReqwestTransport::new(&config).expect("Transport should build."));
	let response = client
		.execute(ProtectedRequest::get("protected/data").with_header("x-request-id", "42"))
		.await
		.expect("Protected call should succeed after refresh.");

	assert_eq!(response.status, 200);
	assert_eq!(
		response.json::<serde_json::Value>().expect("Body should be JSON.")["message"],
		"This is protected data"
	);

	stale.assert_async().await;
	refresh.assert_async().await;
	fresh.assert_async().await;
}
