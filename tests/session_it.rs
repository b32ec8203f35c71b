#![cfg(feature = "reqwest")]

// std
use std::sync::Arc;
// crates.io
use httpmock::prelude::*;
// self
use oauth2_sessions::{
	auth::{ClientKey, ScopeSet, SubjectId, TokenSecret, ValidatedCredential, Validation},
	error::Error,
	flow::{
		AuthFlow, ClaimsRequest, FlowError, FlowFuture, FlowOutput, FlowRequest,
		InteractiveFlowEngine,
	},
	service::{ReqwestIdentityClient, ServiceEndpoints},
	session::{ClientSession, ServerAppSession, ServerUserSession, SessionConfig},
	store::{MemoryStore, TokenStore},
	url::Url,
};
use time::{Duration, OffsetDateTime};

const CLIENT_ID: &str = "client-it";
const CLIENT_SECRET: &str = "secret-it";

/// Flow engine stub resolving every start with one preloaded output.
struct OneShotEngine(std::sync::Mutex<Option<Result<FlowOutput, FlowError>>>);
impl OneShotEngine {
	fn new(output: Result<FlowOutput, FlowError>) -> Arc<Self> {
		Arc::new(Self(std::sync::Mutex::new(Some(output))))
	}
}
impl InteractiveFlowEngine for OneShotEngine {
	fn start<'a>(&'a self, _: FlowRequest) -> FlowFuture<'a, FlowOutput> {
		let output = self.0.lock().expect("Engine stub lock should not be poisoned.").take();

		Box::pin(async move { output.expect("Unexpected second flow start.") })
	}

	fn cancel(&self) {}
}

fn build_service(server: &MockServer) -> Arc<ReqwestIdentityClient> {
	let endpoints = ServiceEndpoints {
		validate: Url::parse(&server.url("/oauth2/validate"))
			.expect("Mock validate endpoint should parse successfully."),
		token: Url::parse(&server.url("/oauth2/token"))
			.expect("Mock token endpoint should parse successfully."),
		revoke: Url::parse(&server.url("/oauth2/revoke"))
			.expect("Mock revoke endpoint should parse successfully."),
		authorize: Url::parse(&server.url("/oauth2/authorize"))
			.expect("Mock authorize endpoint should parse successfully."),
	};

	Arc::new(ReqwestIdentityClient::new(endpoints).expect("Reqwest identity client should build."))
}

fn config() -> SessionConfig {
	SessionConfig::new(
		ClientKey::new(CLIENT_ID).expect("Client identifier should be valid."),
		ScopeSet::new(["user:read"]).expect("Scope fixture should be valid."),
	)
}

fn fake_id_token(nonce: &str) -> String {
	use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

	let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"RS256\",\"typ\":\"JWT\"}");
	let payload = URL_SAFE_NO_PAD
		.encode(format!("{{\"sub\":\"U1\",\"nonce\":\"{nonce}\"}}").as_bytes());

	format!("{header}.{payload}.fixture-signature")
}

fn stale_user_credential(token: &str, subject: &SubjectId) -> ValidatedCredential {
	ValidatedCredential::new(
		oauth2_sessions::auth::Credential::new(token),
		Validation {
			subject: Some(subject.clone()),
			client_key: ClientKey::new(CLIENT_ID).expect("Client identifier should be valid."),
			scope: ScopeSet::new(["user:read"]).expect("Scope fixture should be valid."),
			validated_at: OffsetDateTime::now_utc() - Duration::hours(1),
		},
	)
}

#[tokio::test]
async fn open_id_grant_flows_from_empty_store_to_validated_storage() {
	let server = MockServer::start_async().await;
	let service = build_service(&server);
	let validate_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/oauth2/validate").header("authorization", "Bearer AT1");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"client_id\":\"client-it\",\"user_id\":\"U1\",\"scopes\":[\"user:read\"]}");
		})
		.await;
	let store = Arc::new(MemoryStore::<ValidatedCredential>::default());
	let id_token = oauth2_sessions::auth::IdentityToken::parse(fake_id_token("n1"))
		.expect("Identity token fixture should parse.");
	let engine = OneShotEngine::new(Ok(FlowOutput::IdAndAccessToken {
		access_token: TokenSecret::new("AT1"),
		id_token,
	}));
	let session = ClientSession::new(
		store.clone(),
		service,
		engine,
		Url::parse("https://app.example.com/cb").expect("Redirect fixture should parse."),
		AuthFlow::open_id(ClaimsRequest::new()),
		config(),
	);
	let grant = session.new_credential().await.expect("OpenID grant should resolve.");

	validate_mock.assert_async().await;

	assert_eq!(grant.access_token().expose(), "AT1");
	assert_eq!(grant.id_token.as_ref().and_then(|token| token.nonce()), Some("n1"));
	assert_eq!(
		grant.response.as_ref().map(|response| response.status),
		Some(200),
		"The last HTTP response must ride along in the completion payload.",
	);

	let subject = SubjectId::new("U1").expect("Subject fixture should be valid.");
	let stored = store
		.fetch(Some(&subject))
		.await
		.expect("Store fetch should succeed.")
		.expect("The validated credential should be stored under the learned subject.");

	assert_eq!(stored.token.expose(), "AT1");

	let current = session
		.current_credential()
		.await
		.expect("The learned subject should make the credential discoverable.");

	assert_eq!(current.token.expose(), "AT1");
}

#[tokio::test]
async fn dead_refresh_token_is_deleted_end_to_end() {
	let server = MockServer::start_async().await;
	let service = build_service(&server);

	server
		.mock_async(|when, then| {
			when.method(GET).path("/oauth2/validate");
			then.status(401)
				.header("content-type", "application/json")
				.body("{\"status\":401,\"message\":\"invalid access token\"}");
		})
		.await;

	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth2/token");
			then.status(401)
				.header("content-type", "application/json")
				.body("{\"status\":401,\"message\":\"Invalid refresh token\"}");
		})
		.await;
	let credentials = Arc::new(MemoryStore::<ValidatedCredential>::default());
	let refresh_tokens = Arc::new(MemoryStore::<TokenSecret>::default());
	let subject = SubjectId::new("U1").expect("Subject fixture should be valid.");

	credentials
		.store(stale_user_credential("AT-stale", &subject), Some(&subject))
		.await
		.expect("Seeding the credential should succeed.");
	refresh_tokens
		.store(TokenSecret::new("RT-dead"), Some(&subject))
		.await
		.expect("Seeding the refresh token should succeed.");

	let session = ServerUserSession::new(
		credentials,
		refresh_tokens.clone(),
		service,
		Url::parse("https://app.example.com/cb").expect("Redirect fixture should parse."),
		config().with_client_secret(CLIENT_SECRET).with_subject(subject.clone()),
	);
	let err = session
		.credential()
		.await
		.expect_err("The dead refresh token must surface the refresh error.");

	token_mock.assert_async().await;

	assert!(matches!(err, Error::Service { status: 401, .. }));
	assert!(
		refresh_tokens
			.fetch(Some(&subject))
			.await
			.expect("Refresh token fetch should succeed.")
			.is_none(),
		"The dead refresh token must no longer be stored.",
	);
}

#[tokio::test]
async fn app_session_round_trips_through_the_token_and_validate_endpoints() {
	let server = MockServer::start_async().await;
	let service = build_service(&server);
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth2/token");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"AT-app\",\"token_type\":\"bearer\",\"expires_in\":3600}");
		})
		.await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/oauth2/validate");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"client_id\":\"client-it\",\"scopes\":[\"user:read\"]}");
		})
		.await;

	let store = Arc::new(MemoryStore::<ValidatedCredential>::default());
	let session = ServerAppSession::new(
		store.clone(),
		service,
		config().with_client_secret(CLIENT_SECRET),
	);
	let token = session.access_token().await.expect("App access token should resolve.");

	token_mock.assert_async().await;

	assert_eq!(token.expose(), "AT-app");

	let stored = store
		.fetch(None)
		.await
		.expect("Store fetch should succeed.")
		.expect("The app credential should be stored under the None subject key.");

	assert!(stored.subject().is_none());

	// A second read is a recent store hit; the token endpoint must not be called again.
	let second = session.access_token().await.expect("Recent store hit should resolve.");

	assert_eq!(second.expose(), "AT-app");

	token_mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn revocation_removes_the_stored_credential_only_after_success() {
	let server = MockServer::start_async().await;
	let service = build_service(&server);
	let revoke_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth2/revoke");
			then.status(200).body("");
		})
		.await;
	let store = Arc::new(MemoryStore::<ValidatedCredential>::default());
	let subject = SubjectId::new("U1").expect("Subject fixture should be valid.");

	store
		.store(stale_user_credential("AT1", &subject), Some(&subject))
		.await
		.expect("Seeding the credential should succeed.");

	let session = ServerUserSession::new(
		store.clone(),
		Arc::new(MemoryStore::<TokenSecret>::default()),
		service,
		Url::parse("https://app.example.com/cb").expect("Redirect fixture should parse."),
		config().with_client_secret(CLIENT_SECRET).with_subject(subject.clone()),
	);

	session.revoke_current_credential().await.expect("Revocation should resolve.");

	revoke_mock.assert_async().await;

	assert!(
		store.fetch(Some(&subject)).await.expect("Store fetch should succeed.").is_none(),
		"The stored credential must be removed after a successful revoke.",
	);
}
