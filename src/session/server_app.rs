//! Server-side auth session for app-only (client credentials) processes.
//!
//! App-only credentials have no refresh token; whenever the stored credential cannot be
//! salvaged the session goes straight to the client-credentials grant, re-validates the
//! result, and stores it under the `None` subject key.

// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, ValidatedCredential},
	obs::{self, OpKind, OpOutcome, OpSpan},
	service::{IdentityServiceClient, ServiceResponse},
	session::{self, CredentialGrant, FreshGrant, GrantFuture, SessionConfig, SessionCore},
	store::TokenStore,
};

/// Auth session for server-side processes acting for the application itself.
#[derive(Clone, Debug)]
pub struct ServerAppSession {
	inner: Arc<ServerAppInner>,
}
impl ServerAppSession {
	/// Creates a session over the provided collaborators.
	pub fn new(
		credentials: Arc<dyn TokenStore<ValidatedCredential>>,
		service: Arc<dyn IdentityServiceClient>,
		config: SessionConfig,
	) -> Self {
		Self { inner: Arc::new(ServerAppInner { core: SessionCore::new(config, credentials, service) }) }
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
	/// ones re-validated, and anything else falls back to the client-credentials grant.
	pub async fn credential(&self) -> Result<CredentialGrant> {
		session::resolve_credential(&self.inner.core, self).await
	}

	/// Callback form of [`credential`](Self::credential).
	pub fn credential_with(&self, callback: impl FnOnce(Result<CredentialGrant>) + Send + 'static) {
		let session = self.clone();

		session::deliver(async move { session.credential().await }, callback);
	}

	/// Access-token convenience over [`credential`](Self::credential).
	pub async fn access_token(&self) -> Result<TokenSecret> {
		Ok(self.credential().await?.credential.token)
	}

	/// Callback form of [`access_token`](Self::access_token).
	pub fn access_token_with(&self, callback: impl FnOnce(Result<TokenSecret>) + Send + 'static) {
		let session = self.clone();

		session::deliver(async move { session.access_token().await }, callback);
	}

	/// Forces a fresh client-credentials grant, bypassing the store read.
	pub async fn new_credential(&self) -> Result<CredentialGrant> {
		self.app_grant().await
	}

	/// Callback form of [`new_credential`](Self::new_credential).
	pub fn new_credential_with(
		&self,
		callback: impl FnOnce(Result<CredentialGrant>) + Send + 'static,
	) {
		let session = self.clone();

		session::deliver(async move { session.new_credential().await }, callback);
	}

	/// Access-token convenience over [`new_credential`](Self::new_credential).
	pub async fn new_access_token(&self) -> Result<TokenSecret> {
		Ok(self.new_credential().await?.credential.token)
	}

	/// Callback form of [`new_access_token`](Self::new_access_token).
	pub fn new_access_token_with(
		&self,
		callback: impl FnOnce(Result<TokenSecret>) + Send + 'static,
	) {
		let session = self.clone();

		session::deliver(async move { session.new_access_token().await }, callback);
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

	async fn app_grant(&self) -> Result<CredentialGrant> {
		const KIND: OpKind = OpKind::ClientCredentials;

		let span = OpSpan::new(KIND, "app_grant");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let core = &self.inner.core;
				let grant = core
					.service
					.authorize_with_client_credentials(
						&core.config.client_key,
						core.client_secret(),
						&core.config.scope,
					)
					.await?;
				let (credential, response) = core.validate_and_store(grant.credential).await?;

				Ok(CredentialGrant { credential, id_token: None, response: Some(response) })
			})
			.await;

		obs::record_op_outcome(KIND, session::outcome_of(&result));

		result
	}
}
impl FreshGrant for ServerAppSession {
	fn obtain<'a>(&'a self, _core: &'a SessionCore) -> GrantFuture<'a> {
		Box::pin(self.app_grant())
	}
}

struct ServerAppInner {
	core: SessionCore,
}
impl Debug for ServerAppInner {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ServerAppSession").field("core", &self.core).finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{
			ScriptedIdentityClient, app_grant_response, recent_app_credential,
			stale_app_credential, test_config, validated_response,
		},
		store::MemoryStore,
	};

	struct Fixture {
		credentials: Arc<MemoryStore<ValidatedCredential>>,
		service: Arc<ScriptedIdentityClient>,
		session: ServerAppSession,
	}

	fn fixture() -> Fixture {
		let credentials = Arc::new(MemoryStore::default());
		let service = Arc::new(ScriptedIdentityClient::default());
		let session = ServerAppSession::new(
			credentials.clone(),
			service.clone(),
			test_config().with_client_secret("s3cret"),
		);

		Fixture { credentials, service, session }
	}

	#[tokio::test]
	async fn recent_store_hit_returns_unchanged_with_zero_network_calls() {
		let fx = fixture();

		fx.credentials
			.store(recent_app_credential("AT-app"), None)
			.await
			.expect("Seeding the store should succeed.");

		let grant = fx.session.credential().await.expect("Recent store hit should resolve.");

		assert_eq!(grant.access_token().expose(), "AT-app");
		assert_eq!(fx.service.validate_calls(), 0);
		assert_eq!(fx.service.app_grant_calls(), 0);
	}

	#[tokio::test]
	async fn empty_store_mints_via_the_client_credentials_grant() {
		let fx = fixture();

		fx.service.push_app_grant(Ok(app_grant_response("AT-app-1")));
		fx.service.push_validate(Ok(validated_response(None)));

		let grant = fx.session.credential().await.expect("App grant should resolve.");

		assert_eq!(grant.access_token().expose(), "AT-app-1");
		assert_eq!(fx.service.app_grant_calls(), 1);

		let stored = fx
			.credentials
			.fetch(None)
			.await
			.expect("Store fetch should succeed.")
			.expect("App credential should be stored under the None subject key.");

		assert_eq!(stored.token.expose(), "AT-app-1");
		assert!(stored.subject().is_none());
	}

	#[tokio::test]
	async fn stale_validate_failure_falls_back_to_the_grant() {
		let fx = fixture();

		fx.credentials
			.store(stale_app_credential("AT-stale"), None)
			.await
			.expect("Seeding the store should succeed.");
		fx.service.push_validate(Err(Error::Service { status: 401, message: "expired".into() }));
		fx.service.push_app_grant(Ok(app_grant_response("AT-app-2")));
		fx.service.push_validate(Ok(validated_response(None)));

		let grant = fx.session.credential().await.expect("Fallback grant should resolve.");

		assert_eq!(grant.access_token().expose(), "AT-app-2");
		assert_eq!(fx.service.app_grant_calls(), 1);
		assert_eq!(fx.service.validate_calls(), 2);
	}

	#[tokio::test]
	async fn new_access_token_forces_the_grant() {
		let fx = fixture();

		fx.credentials
			.store(recent_app_credential("AT-old"), None)
			.await
			.expect("Seeding the store should succeed.");
		fx.service.push_app_grant(Ok(app_grant_response("AT-forced")));
		fx.service.push_validate(Ok(validated_response(None)));

		let token =
			fx.session.new_access_token().await.expect("Forced app grant should resolve.");

		assert_eq!(token.expose(), "AT-forced", "The store read must be bypassed.");
	}
}
