//! Server-side auth session acting on behalf of a single end user.
//!
//! Resolution is an explicit state machine: a stored credential enters as `Recent` or
//! `StaleCandidate`, a stale candidate either re-validates (`Validated`) or moves to
//! `RefreshNeeded`, and a refresh attempt terminates in `Refreshed`,
//! `RefreshTokenDead` (HTTP 400/401, stored refresh token deleted before the error
//! surfaces), or `Failed` (any other error, refresh token retained). There is no retry
//! loop; callers re-enter via a fresh [`credential`](ServerUserSession::credential)
//! call. An async guard serializes refresh resolution per session instance so
//! concurrent callers never rotate the same refresh token twice.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, ValidatedCredential},
	obs::{self, OpKind, OpOutcome, OpSpan},
	service::{CodeGrant, IdentityServiceClient, ServiceResponse},
	session::{self, CredentialGrant, SessionConfig, SessionCore},
	store::{StoreError, TokenStore},
};

/// Auth session for server-side processes acting for one end user.
///
/// Cheaply cloneable; clones share the subject cache, the refresh guard, and the
/// refresh statistics.
#[derive(Clone, Debug)]
pub struct ServerUserSession {
	inner: Arc<ServerUserInner>,
}
impl ServerUserSession {
	/// Creates a session over the provided collaborators.
	pub fn new(
		credentials: Arc<dyn TokenStore<ValidatedCredential>>,
		refresh_tokens: Arc<dyn TokenStore<TokenSecret>>,
		service: Arc<dyn IdentityServiceClient>,
		redirect_url: Url,
		config: SessionConfig,
	) -> Self {
		Self {
			inner: Arc::new(ServerUserInner {
				core: SessionCore::new(config, credentials, service),
				refresh_tokens,
				redirect_url,
				refresh_guard: AsyncMutex::new(()),
				stats: RefreshStats::default(),
			}),
		}
	}

	/// Refresh attempt counters shared across clones of this session.
	pub fn refresh_stats(&self) -> &RefreshStats {
		&self.inner.stats
	}

	/// Store-only lookup of the current credential.
	pub async fn current_credential(&self) -> Result<ValidatedCredential> {
		self.inner.core.fetch_current().await
	}

	/// Callback form of [`current_credential`](Self::current_credential).
	pub fn current_credential_with(
		&self,
		callback: impl FnOnce(Result<ValidatedCredential>) + Send + 'static,
	) {
		let session = self.clone();

		session::deliver(async move { session.current_credential().await }, callback);
	}

	/// Resolves a usable credential: recent store hits are returned unchanged, stale
	/// ones re-validated, and failed validations fall back to the refresh grant.
	///
	/// With an empty store the session cannot mint a credential on its own; it fails
	/// with [`Error::AuthorizationCodeRequired`] and the caller bootstraps via
	/// [`new_credential_with_auth_code`](Self::new_credential_with_auth_code).
	pub async fn credential(&self) -> Result<CredentialGrant> {
		self.resolve(false).await
	}

	/// Callback form of [`credential`](Self::credential).
	pub fn credential_with(&self, callback: impl FnOnce(Result<CredentialGrant>) + Send + 'static) {
		let session = self.clone();

		session::deliver(async move { session.credential().await }, callback);
	}

	/// Forces the refresh grant, bypassing the store read and validation probe.
	pub async fn refreshed_credential(&self) -> Result<CredentialGrant> {
		self.resolve(true).await
	}

	/// Callback form of [`refreshed_credential`](Self::refreshed_credential).
	pub fn refreshed_credential_with(
		&self,
		callback: impl FnOnce(Result<CredentialGrant>) + Send + 'static,
	) {
		let session = self.clone();

		session::deliver(async move { session.refreshed_credential().await }, callback);
	}

	/// Exchanges a caller-supplied authorization code for credentials, validating and
	/// storing the result (access credential and refresh token both).
	///
	/// `nonce` is the value generated by the interactive flow that produced the code;
	/// when provided, the identity token minted by the exchange must echo it.
	pub async fn new_credential_with_auth_code(
		&self,
		code: &str,
		nonce: Option<&str>,
	) -> Result<CredentialGrant> {
		const KIND: OpKind = OpKind::AuthorizationCode;

		let span = OpSpan::new(KIND, "new_credential_with_auth_code");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let _serial = self.inner.refresh_guard.lock().await;
				let core = &self.inner.core;
				let CodeGrant { credential, refresh_token, id_token, response: _ } = core
					.service
					.authorize_with_code(
						&core.config.client_key,
						core.client_secret(),
						code,
						&self.inner.redirect_url,
						nonce,
					)
					.await?;
				let (credential, response) = core.validate_and_store(credential).await?;

				if let Some(refresh_token) = refresh_token {
					self.inner
						.refresh_tokens
						.store(refresh_token, credential.subject())
						.await
						.map_err(Error::from)?;
				}

				Ok(CredentialGrant { credential, id_token, response: Some(response) })
			})
			.await;

		obs::record_op_outcome(KIND, session::outcome_of(&result));

		result
	}

	/// Callback form of [`new_credential_with_auth_code`](Self::new_credential_with_auth_code).
	pub fn new_credential_with_auth_code_with(
		&self,
		code: impl Into<String>,
		nonce: Option<String>,
		callback: impl FnOnce(Result<CredentialGrant>) + Send + 'static,
	) {
		let session = self.clone();
		let code = code.into();

		session::deliver(
			async move { session.new_credential_with_auth_code(&code, nonce.as_deref()).await },
			callback,
		);
	}

	/// Revokes the current credential, removing it from the store only after the
	/// service acknowledged the revocation.
	pub async fn revoke_current_credential(&self) -> Result<ServiceResponse> {
		self.inner.core.revoke_current().await
	}

	/// Callback form of [`revoke_current_credential`](Self::revoke_current_credential).
	pub fn revoke_current_credential_with(
		&self,
		callback: impl FnOnce(Result<ServiceResponse>) + Send + 'static,
	) {
		let session = self.clone();

		session::deliver(async move { session.revoke_current_credential().await }, callback);
	}

	async fn resolve(&self, force_refresh: bool) -> Result<CredentialGrant> {
		let _serial = self.inner.refresh_guard.lock().await;
		let mut state =
			if force_refresh { ResolveState::RefreshNeeded } else { self.probe().await? };

		loop {
			state = match state {
				ResolveState::Recent(credential) => return Ok(CredentialGrant::stored(credential)),
				ResolveState::StaleCandidate(stale) =>
					match self.inner.core.validate_and_store(stale.strip()).await {
						Ok((credential, response)) =>
							ResolveState::Validated(CredentialGrant {
								credential,
								id_token: None,
								response: Some(response),
							}),
						Err(_) => ResolveState::RefreshNeeded,
					},
				ResolveState::RefreshNeeded => match self.mint_refreshed().await {
					Ok(grant) => ResolveState::Refreshed(grant),
					Err(RefreshFailure::TokenDead(err)) => ResolveState::RefreshTokenDead(err),
					Err(RefreshFailure::Other(err)) => ResolveState::Failed(err),
				},
				ResolveState::Validated(grant) | ResolveState::Refreshed(grant) =>
					return Ok(grant),
				ResolveState::RefreshTokenDead(err) => {
					// The dead token is deleted regardless of caller retry behavior;
					// a deletion failure is swallowed so the refresh error survives.
					let subject = self.inner.core.cached_subject();
					let _ = self.inner.refresh_tokens.remove(subject.as_ref()).await;

					return Err(err);
				},
				ResolveState::Failed(err) => return Err(err),
			};
		}
	}

	async fn probe(&self) -> Result<ResolveState> {
		let core = &self.inner.core;
		let subject = core.cached_subject();
		let Some(stored) = core.credentials.fetch(subject.as_ref()).await.map_err(Error::from)?
		else {
			return Err(Error::AuthorizationCodeRequired);
		};

		if stored.is_recent_at(OffsetDateTime::now_utc(), core.config.freshness_window) {
			Ok(ResolveState::Recent(stored))
		} else {
			Ok(ResolveState::StaleCandidate(stored))
		}
	}

	/// One refresh grant: fetch the stored refresh token, call the service, re-validate
	/// and store the minted credential, and persist the rotated (or retained) refresh
	/// token.
	async fn mint_refreshed(&self) -> Result<CredentialGrant, RefreshFailure> {
		const KIND: OpKind = OpKind::Refresh;

		let span = OpSpan::new(KIND, "mint_refreshed");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);
		self.inner.stats.record_attempt();

		let result = span
			.instrument(async move {
				let core = &self.inner.core;
				let subject = core.cached_subject();
				let refresh_token = self
					.inner
					.refresh_tokens
					.fetch(subject.as_ref())
					.await
					.map_err(|err| RefreshFailure::Other(err.into()))?
					.ok_or(RefreshFailure::Other(Error::Storage(StoreError::NotFound)))?;
				let refreshed = core
					.service
					.refresh(
						&refresh_token,
						&core.config.client_key,
						core.client_secret(),
						&core.config.scope,
					)
					.await
					.map_err(|err| {
						// Only the grant call itself decides the token's fate.
						if err.invalidates_refresh_token() {
							RefreshFailure::TokenDead(err)
						} else {
							RefreshFailure::Other(err)
						}
					})?;
				let (credential, response) = core
					.validate_and_store(refreshed.credential)
					.await
					.map_err(RefreshFailure::Other)?;
				let rotated = refreshed.refresh_token.unwrap_or(refresh_token);

				self.inner
					.refresh_tokens
					.store(rotated, credential.subject())
					.await
					.map_err(|err| RefreshFailure::Other(err.into()))?;

				Ok(CredentialGrant { credential, id_token: None, response: Some(response) })
			})
			.await;

		match &result {
			Ok(_) => {
				self.inner.stats.record_success();
				obs::record_op_outcome(KIND, OpOutcome::Success);
			},
			Err(_) => {
				self.inner.stats.record_failure();
				obs::record_op_outcome(KIND, OpOutcome::Failure);
			},
		}

		result
	}
}

struct ServerUserInner {
	core: SessionCore,
	refresh_tokens: Arc<dyn TokenStore<TokenSecret>>,
	redirect_url: Url,
	refresh_guard: AsyncMutex<()>,
	stats: RefreshStats,
}
impl Debug for ServerUserInner {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ServerUserSession")
			.field("core", &self.core)
			.field("redirect_url", &self.redirect_url)
			.finish()
	}
}

/// Resolution states for the server-user credential machine.
enum ResolveState {
	/// Stored credential validated within the freshness window; returned unchanged.
	Recent(ValidatedCredential),
	/// Stored credential past the freshness window; must be re-validated.
	StaleCandidate(ValidatedCredential),
	/// Re-validation succeeded; terminal.
	Validated(CredentialGrant),
	/// Validation failed (or a refresh was forced); attempt the refresh grant.
	RefreshNeeded,
	/// Refresh grant succeeded, re-validated and stored; terminal.
	Refreshed(CredentialGrant),
	/// Service reported the refresh token dead (HTTP 400/401); terminal.
	RefreshTokenDead(Error),
	/// Refresh failed for any other reason; terminal, refresh token retained.
	Failed(Error),
}

enum RefreshFailure {
	TokenDead(Error),
	Other(Error),
}

/// Thread-safe counters for refresh attempts.
#[derive(Debug, Default)]
pub struct RefreshStats {
	attempts: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
}
impl RefreshStats {
	/// Returns the total number of refresh attempts.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of successful refresh grants.
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Returns the number of failed refresh grants.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{
			ScriptedIdentityClient, recent_credential, refreshed_response, stale_credential,
			test_config, validated_response,
		},
		auth::{Credential, SubjectId},
		service::Refreshed,
		store::MemoryStore,
	};

	struct Fixture {
		credentials: Arc<MemoryStore<ValidatedCredential>>,
		refresh_tokens: Arc<MemoryStore<TokenSecret>>,
		service: Arc<ScriptedIdentityClient>,
		session: ServerUserSession,
		subject: SubjectId,
	}

	fn fixture() -> Fixture {
		let credentials = Arc::new(MemoryStore::default());
		let refresh_tokens = Arc::new(MemoryStore::default());
		let service = Arc::new(ScriptedIdentityClient::default());
		let subject = SubjectId::new("U1").expect("Subject fixture should be valid.");
		let session = ServerUserSession::new(
			credentials.clone(),
			refresh_tokens.clone(),
			service.clone(),
			Url::parse("https://app.example.com/cb").expect("Redirect fixture should parse."),
			test_config().with_client_secret("s3cret").with_subject(subject.clone()),
		);

		Fixture { credentials, refresh_tokens, service, session, subject }
	}

	#[tokio::test]
	async fn recent_store_hit_returns_unchanged_with_zero_network_calls() {
		let fx = fixture();

		fx.credentials
			.store(recent_credential("AT-stored", &fx.subject), Some(&fx.subject))
			.await
			.expect("Seeding the store should succeed.");

		let grant = fx.session.credential().await.expect("Recent store hit should resolve.");

		assert_eq!(grant.access_token().expose(), "AT-stored");
		assert_eq!(fx.service.validate_calls(), 0);
		assert_eq!(fx.service.refresh_calls(), 0);
		assert_eq!(fx.session.refresh_stats().attempts(), 0);
	}

	#[tokio::test]
	async fn stale_credential_revalidates_without_refreshing() {
		let fx = fixture();

		fx.credentials
			.store(stale_credential("AT-stale", &fx.subject), Some(&fx.subject))
			.await
			.expect("Seeding the store should succeed.");
		fx.service.push_validate(Ok(validated_response(Some("U1"))));

		let grant = fx.session.credential().await.expect("Stale credential should re-validate.");

		assert!(grant.response.is_some());
		assert_eq!(fx.service.validate_calls(), 1);
		assert_eq!(fx.service.refresh_calls(), 0);
	}

	#[tokio::test]
	async fn failed_validation_falls_back_to_a_successful_refresh() {
		let fx = fixture();

		fx.credentials
			.store(stale_credential("AT-stale", &fx.subject), Some(&fx.subject))
			.await
			.expect("Seeding the store should succeed.");
		fx.refresh_tokens
			.store(TokenSecret::new("RT-1"), Some(&fx.subject))
			.await
			.expect("Seeding the refresh token should succeed.");
		fx.service.push_validate(Err(Error::Service { status: 401, message: "invalid".into() }));
		fx.service.push_refresh(Ok(refreshed_response("AT-new", Some("RT-2"))));
		fx.service.push_validate(Ok(validated_response(Some("U1"))));

		let grant = fx.session.credential().await.expect("Refresh fallback should resolve.");

		assert_eq!(grant.access_token().expose(), "AT-new");
		assert_eq!(fx.service.refresh_calls(), 1);
		assert_eq!(fx.session.refresh_stats().successes(), 1);

		let rotated = fx
			.refresh_tokens
			.fetch(Some(&fx.subject))
			.await
			.expect("Refresh token fetch should succeed.")
			.expect("Rotated refresh token should be stored.");

		assert_eq!(rotated.expose(), "RT-2");
	}

	#[tokio::test]
	async fn refresh_without_rotation_retains_the_old_token() {
		let fx = fixture();

		fx.credentials
			.store(stale_credential("AT-stale", &fx.subject), Some(&fx.subject))
			.await
			.expect("Seeding the store should succeed.");
		fx.refresh_tokens
			.store(TokenSecret::new("RT-1"), Some(&fx.subject))
			.await
			.expect("Seeding the refresh token should succeed.");
		fx.service.push_refresh(Ok(Refreshed {
			credential: Credential::new("AT-new"),
			refresh_token: None,
			response: crate::service::ServiceResponse { status: 200, body: "{}".into() },
		}));
		fx.service.push_validate(Ok(validated_response(Some("U1"))));

		fx.session.refreshed_credential().await.expect("Forced refresh should resolve.");

		let retained = fx
			.refresh_tokens
			.fetch(Some(&fx.subject))
			.await
			.expect("Refresh token fetch should succeed.")
			.expect("Refresh token should be retained when the service does not rotate.");

		assert_eq!(retained.expose(), "RT-1");
	}

	#[tokio::test]
	async fn dead_refresh_token_is_deleted_and_the_original_error_surfaces() {
		let fx = fixture();

		fx.credentials
			.store(stale_credential("AT-stale", &fx.subject), Some(&fx.subject))
			.await
			.expect("Seeding the store should succeed.");
		fx.refresh_tokens
			.store(TokenSecret::new("RT-dead"), Some(&fx.subject))
			.await
			.expect("Seeding the refresh token should succeed.");
		fx.service.push_validate(Err(Error::Service { status: 401, message: "stale".into() }));
		fx.service
			.push_refresh(Err(Error::Service { status: 401, message: "invalid refresh".into() }));

		let err = fx
			.session
			.credential()
			.await
			.expect_err("Dead refresh token must surface the refresh error.");

		assert!(matches!(err, Error::Service { status: 401, .. }));
		assert!(
			fx.refresh_tokens
				.fetch(Some(&fx.subject))
				.await
				.expect("Refresh token fetch should succeed.")
				.is_none(),
			"The dead refresh token must be deleted.",
		);
		assert_eq!(fx.session.refresh_stats().failures(), 1);
	}

	#[tokio::test]
	async fn transient_refresh_failure_retains_the_token() {
		let fx = fixture();

		fx.credentials
			.store(stale_credential("AT-stale", &fx.subject), Some(&fx.subject))
			.await
			.expect("Seeding the store should succeed.");
		fx.refresh_tokens
			.store(TokenSecret::new("RT-1"), Some(&fx.subject))
			.await
			.expect("Seeding the refresh token should succeed.");
		fx.service.push_validate(Err(Error::Service { status: 401, message: "stale".into() }));
		fx.service
			.push_refresh(Err(Error::Service { status: 503, message: "unavailable".into() }));

		let err = fx
			.session
			.credential()
			.await
			.expect_err("Transient refresh failure must surface.");

		assert!(matches!(err, Error::Service { status: 503, .. }));
		assert!(
			fx.refresh_tokens
				.fetch(Some(&fx.subject))
				.await
				.expect("Refresh token fetch should succeed.")
				.is_some(),
			"The refresh token must be retained on non-4xx failures.",
		);
	}

	#[tokio::test]
	async fn missing_refresh_token_surfaces_the_store_miss() {
		let fx = fixture();

		fx.credentials
			.store(stale_credential("AT-stale", &fx.subject), Some(&fx.subject))
			.await
			.expect("Seeding the store should succeed.");
		fx.service
			.push_validate(Err(Error::Transport(crate::error::TransportError::network(
				std::io::Error::other("connection reset"),
			))));

		let err = fx
			.session
			.credential()
			.await
			.expect_err("Missing refresh token must surface the store miss.");

		assert!(matches!(err, Error::Storage(StoreError::NotFound)));
		assert_eq!(fx.service.refresh_calls(), 0);
	}

	#[tokio::test]
	async fn empty_store_requires_an_authorization_code() {
		let fx = fixture();
		let err = fx
			.session
			.credential()
			.await
			.expect_err("Empty store cannot resolve without a code.");

		assert!(matches!(err, Error::AuthorizationCodeRequired));
	}

	#[tokio::test]
	async fn auth_code_exchange_validates_and_stores_both_tokens() {
		let fx = fixture();

		fx.service.push_authorize_code(Ok(crate::service::CodeGrant {
			credential: Credential::new("AT-code"),
			refresh_token: Some(TokenSecret::new("RT-code")),
			id_token: None,
			response: crate::service::ServiceResponse { status: 200, body: "{}".into() },
		}));
		fx.service.push_validate(Ok(validated_response(Some("U1"))));

		let grant = fx
			.session
			.new_credential_with_auth_code("C1", None)
			.await
			.expect("Code exchange should resolve.");

		assert_eq!(grant.access_token().expose(), "AT-code");

		let stored_credential = fx
			.credentials
			.fetch(Some(&fx.subject))
			.await
			.expect("Credential fetch should succeed.")
			.expect("Exchanged credential should be stored.");

		assert_eq!(stored_credential.token.expose(), "AT-code");

		let stored_refresh = fx
			.refresh_tokens
			.fetch(Some(&fx.subject))
			.await
			.expect("Refresh token fetch should succeed.")
			.expect("Exchanged refresh token should be stored.");

		assert_eq!(stored_refresh.expose(), "RT-code");
	}
}
