// crates.io
use tokio::task::JoinSet;
// self
use bearer_session::{
	_preludet::*,
	auth::{AccessToken, TokenSecret},
	error::RefreshError,
	events::{EndReason, SessionEvent},
	flows::{RefreshPhase, SignalEnvelope, SignalHub, TabSignal},
	service::AuthServiceError,
	store::{DurableStore, MemoryStore},
};

const CALLERS: usize = 25;

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_refresh() {
	let service = Arc::new(ScriptedAuthService::default());

	service
		.set_latency(std::time::Duration::from_millis(300))
		.push_refresh(Ok(refresh_grant("access-new", Some("refresh-new"), Duration::minutes(15))));

	let context = seeded_session(&service, "refresh-old");
	let coordinator = context.coordinator().clone();
	let mut callers = JoinSet::new();

	for _ in 0..CALLERS {
		let coordinator = coordinator.clone();

		callers.spawn(async move { coordinator.request_refresh().await });
	}

	let mut tokens = Vec::new();

	while let Some(joined) = callers.join_next().await {
		let token = joined
			.expect("Caller task should not panic.")
			.expect("Every caller should receive the refreshed token.");

		tokens.push(token.expose().to_owned());
	}

	assert_eq!(tokens.len(), CALLERS);
	assert!(tokens.iter().all(|token| token == "access-new"));
	assert_eq!(service.refresh_calls(), 1);
	assert_eq!(service.refresh_tokens_seen(), vec!["refresh-old".to_owned()]);
	assert_eq!(coordinator.metrics().external_calls(), 1);
	assert_eq!(coordinator.metrics().joined(), (CALLERS - 1) as u64);
	assert_eq!(coordinator.phase(), RefreshPhase::Idle);
	assert_eq!(coordinator.waiting(), 0);
	assert_eq!(context.store().refresh_token(), Some(TokenSecret::new("refresh-new")));
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_rejection() {
	let service = Arc::new(ScriptedAuthService::default());

	service.set_latency(std::time::Duration::from_millis(300)).push_refresh(Err(
		AuthServiceError::InvalidOrExpiredRefreshToken { reason: "revoked".into() },
	));

	let context = seeded_session(&service, "refresh-revoked");
	let coordinator = context.coordinator().clone();
	let mut callers = JoinSet::new();

	for _ in 0..CALLERS {
		let coordinator = coordinator.clone();

		callers.spawn(async move { coordinator.request_refresh().await });
	}

	while let Some(joined) = callers.join_next().await {
		let err = joined
			.expect("Caller task should not panic.")
			.expect_err("Every caller should observe the rejection.");

		assert!(matches!(err, RefreshError::Rejected { ref reason } if reason == "revoked"));
	}

	assert_eq!(service.refresh_calls(), 1);
	assert_eq!(coordinator.phase(), RefreshPhase::Failed);
	assert_eq!(coordinator.metrics().failures(), CALLERS as u64);
}

#[tokio::test(start_paused = true)]
async fn failed_phase_admits_a_fresh_attempt() {
	let service = Arc::new(ScriptedAuthService::default());

	service.push_refresh(Err(AuthServiceError::unreachable(std::io::Error::new(
		std::io::ErrorKind::TimedOut,
		"timed out",
	))));

	let context = seeded_session(&service, "refresh-1");
	let err = context.refresh().await.expect_err("Unreachable refresh should fail.");

	assert!(matches!(err, Error::Refresh(RefreshError::Unreachable { .. })));
	assert!(err.is_terminal());
	assert_eq!(context.coordinator().phase(), RefreshPhase::Failed);

	// Session is gone, so the next request is refused without another service call.
	let err = context.refresh().await.expect_err("Refresh without a token should fail.");

	assert!(matches!(err, Error::Refresh(RefreshError::NoRefreshToken)));
	assert_eq!(service.refresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn terminal_failure_clears_store_and_signals_logout_once() {
	let service = Arc::new(ScriptedAuthService::default());

	service.set_latency(std::time::Duration::from_millis(300)).push_refresh(Err(
		AuthServiceError::InvalidOrExpiredRefreshToken { reason: "expired".into() },
	));

	let durable = MemoryStore::default();
	let hub = SignalHub::default();
	let context = session_with(&service, &durable, &hub);

	context.store().set_tokens(
		AccessToken::with_expiry("access-old", OffsetDateTime::now_utc() + Duration::minutes(15)),
		Some(TokenSecret::new("refresh-old")),
	);

	let mut signals = hub.subscribe();
	let mut events = context.events();
	let (first, second) =
		tokio::join!(context.coordinator().request_refresh(), context.coordinator().request_refresh());

	assert!(matches!(first, Err(RefreshError::Rejected { .. })));
	assert!(matches!(second, Err(RefreshError::Rejected { .. })));
	assert_eq!(context.session(), Default::default());
	assert!(durable.is_empty());
	assert!(!context.scheduler().is_armed());

	let envelope = signals.try_recv().expect("A logout signal should be broadcast.");

	assert_eq!(envelope.origin, context.id());
	assert_eq!(envelope.signal, TabSignal::LoggedOut);
	assert!(signals.try_recv().is_err(), "Logout must be broadcast exactly once.");
	assert_eq!(
		events.try_recv().ok(),
		Some(SessionEvent::Ended { reason: EndReason::RefreshFailed })
	);
	assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn missing_refresh_token_is_terminal_without_service_call() {
	let service = Arc::new(ScriptedAuthService::default());
	let hub = SignalHub::default();
	let context = session_with(&service, &MemoryStore::default(), &hub);
	let mut signals = hub.subscribe();
	let err = context.refresh().await.expect_err("Refresh should fail.");

	assert!(matches!(err, Error::Refresh(RefreshError::NoRefreshToken)));
	assert_eq!(service.refresh_calls(), 0);
	assert_eq!(context.coordinator().phase(), RefreshPhase::Idle);
	// Nothing to tear down, so nothing is broadcast.
	assert!(signals.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn refresh_outliving_its_session_leaves_the_next_one_alone() {
	let service = Arc::new(ScriptedAuthService::default());

	service
		.set_latency(std::time::Duration::from_millis(300))
		.push_refresh(Ok(refresh_grant(
			"stale-access",
			Some("stale-refresh"),
			Duration::minutes(15),
		)))
		.push_login(Ok(login_grant("fresh-access", "fresh-refresh", Duration::minutes(15))));

	let durable = MemoryStore::default();
	let hub = SignalHub::default();
	let context = Arc::new(session_with(&service, &durable, &hub));

	context.store().set_refresh(TokenSecret::new("old-refresh"));

	let pending = tokio::spawn({
		let context = context.clone();

		async move { context.refresh().await }
	});

	tokio::time::sleep(std::time::Duration::from_millis(10)).await;
	service.set_latency(std::time::Duration::ZERO);
	context.logout().await;
	context.login(&demo_credentials()).await.expect("Login should succeed.");

	let mut signals = hub.subscribe();
	let mut events = context.events();
	let token = pending
		.await
		.expect("Refresh task should not panic.")
		.expect("The newer session's token should be handed out.");

	assert_eq!(token.expose(), "fresh-access");
	assert_eq!(
		context.store().access_token().map(|token| token.expose().to_owned()).as_deref(),
		Some("fresh-access")
	);
	assert_eq!(context.store().refresh_token(), Some(TokenSecret::new("fresh-refresh")));
	assert_eq!(
		durable.load("refreshToken").expect("Memory store load should succeed.").map(|e| e.token),
		Some(TokenSecret::new("fresh-refresh"))
	);
	assert_eq!(service.refresh_calls(), 1);
	assert!(signals.try_recv().is_err(), "A stale grant must not be broadcast.");
	assert!(events.try_recv().is_err(), "A stale grant must not end or refresh the session.");
	assert!(context.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn rotation_adopted_mid_flight_is_retried_instead_of_ending_the_session() {
	let service = Arc::new(ScriptedAuthService::default());

	service
		.set_latency(std::time::Duration::from_millis(300))
		.push_refresh(Err(AuthServiceError::InvalidOrExpiredRefreshToken {
			reason: "rotated".into(),
		}))
		.push_refresh(Ok(refresh_grant("access-2", None, Duration::minutes(15))));

	let hub = SignalHub::default();
	let context = session_with(&service, &MemoryStore::default(), &hub);

	context.store().set_refresh(TokenSecret::new("refresh-1"));

	let mut events = context.events();
	let rotation = async {
		tokio::time::sleep(std::time::Duration::from_millis(10)).await;

		let signal = TabSignal::TokenUpdated { refresh_token: TokenSecret::new("refresh-2") };

		context.sync().deliver(SignalEnvelope { origin: 99.into(), sequence: 1, signal }).await
	};
	let (refreshed, delivered) = tokio::join!(context.refresh(), rotation);

	let token = refreshed.expect("Refresh should recover with the adopted token.");

	assert_eq!(token.expose(), "access-2");
	assert!(delivered.is_ok());
	assert_eq!(
		service.refresh_tokens_seen(),
		vec!["refresh-1".to_owned(), "refresh-2".to_owned()]
	);
	assert_eq!(context.store().refresh_token(), Some(TokenSecret::new("refresh-2")));
	assert_eq!(context.coordinator().phase(), RefreshPhase::Idle);
	assert!(
		!std::iter::from_fn(|| events.try_recv().ok())
			.any(|event| matches!(event, SessionEvent::Ended { .. })),
		"A rejected stale token must not end the session."
	);
}
