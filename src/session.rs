//! Auth session orchestration shared by the three variants.
//!
//! Each variant answers the same three questions—"give me a usable credential," "force a
//! new one," "revoke the current one"—over the same collaborators: a token store, the
//! identity service client, and (for the client variant) an interactive flow engine.
//! The read path is factored into [`resolve_credential`], parameterized over a
//! [`FreshGrant`] strategy supplying the variant-specific way to mint a credential when
//! nothing stored can be salvaged.
//!
//! Every operation is offered in suspension form (`async fn`) and callback form
//! (`*_with`); the callback form spawns the identical future onto the ambient tokio
//! runtime, so both forms share one execution and one set of side effects.

pub mod client;
pub mod server_app;
pub mod server_user;

pub use client::ClientSession;
pub use server_app::ServerAppSession;
pub use server_user::ServerUserSession;

// self
use crate::{
	_prelude::*,
	auth::{ClientKey, Credential, IdentityToken, ScopeSet, SubjectId, TokenSecret, ValidatedCredential},
	obs::{self, OpKind, OpOutcome, OpSpan},
	service::{IdentityServiceClient, ServiceResponse, Validated},
	store::{StoreError, TokenStore},
};

/// Completion payload produced by credential-minting operations.
#[derive(Clone, Debug)]
pub struct CredentialGrant {
	/// The validated credential, as stored.
	pub credential: ValidatedCredential,
	/// Identity token minted alongside the credential, when the flow produced one.
	pub id_token: Option<IdentityToken>,
	/// Last HTTP response observed while minting, absent for pure store hits.
	pub response: Option<ServiceResponse>,
}
impl CredentialGrant {
	/// Access token convenience accessor.
	pub fn access_token(&self) -> &TokenSecret {
		&self.credential.token
	}

	pub(crate) fn stored(credential: ValidatedCredential) -> Self {
		Self { credential, id_token: None, response: None }
	}
}

/// Session construction parameters shared by all variants.
#[derive(Clone)]
pub struct SessionConfig {
	/// Client identifier registered with the identity service.
	pub client_key: ClientKey,
	/// Client secret for confidential grants, if the client is confidential.
	pub client_secret: Option<String>,
	/// Scopes requested by every grant; fixed for the session's lifetime.
	pub scope: ScopeSet,
	/// Subject to resolve stored tokens under before the first validation teaches one.
	pub subject: Option<SubjectId>,
	/// How long a validation keeps a credential "recent" (default one hour).
	pub freshness_window: Duration,
}
impl SessionConfig {
	/// Default freshness window applied by [`SessionConfig::new`].
	pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::hours(1);

	/// Creates a config for the provided client identifier and scope set.
	pub fn new(client_key: ClientKey, scope: ScopeSet) -> Self {
		Self {
			client_key,
			client_secret: None,
			scope,
			subject: None,
			freshness_window: Self::DEFAULT_FRESHNESS_WINDOW,
		}
	}

	/// Sets or replaces the client secret used for confidential grants.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Seeds the subject key used for store lookups before the first validation.
	pub fn with_subject(mut self, subject: SubjectId) -> Self {
		self.subject = Some(subject);

		self
	}

	/// Overrides the freshness window (negative values clamp to zero).
	pub fn with_freshness_window(mut self, window: Duration) -> Self {
		self.freshness_window = if window.is_negative() { Duration::ZERO } else { window };

		self
	}
}
impl Debug for SessionConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionConfig")
			.field("client_key", &self.client_key)
			.field("client_secret_set", &self.client_secret.is_some())
			.field("scope", &self.scope)
			.field("subject", &self.subject)
			.field("freshness_window", &self.freshness_window)
			.finish()
	}
}

/// Collaborators and cached state shared by every session variant.
pub(crate) struct SessionCore {
	pub(crate) config: SessionConfig,
	pub(crate) credentials: Arc<dyn TokenStore<ValidatedCredential>>,
	pub(crate) service: Arc<dyn IdentityServiceClient>,
	subject: Mutex<Option<SubjectId>>,
}
impl SessionCore {
	pub(crate) fn new(
		config: SessionConfig,
		credentials: Arc<dyn TokenStore<ValidatedCredential>>,
		service: Arc<dyn IdentityServiceClient>,
	) -> Self {
		let subject = Mutex::new(config.subject.clone());

		Self { config, credentials, service, subject }
	}

	/// Subject key stored tokens are resolved under; seeded from the config and replaced
	/// by the subject of every successful validation.
	pub(crate) fn cached_subject(&self) -> Option<SubjectId> {
		self.subject.lock().clone()
	}

	pub(crate) fn client_secret(&self) -> Option<&str> {
		self.config.client_secret.as_deref()
	}

	fn remember_subject(&self, subject: Option<&SubjectId>) {
		if let Some(subject) = subject {
			*self.subject.lock() = Some(subject.clone());
		}
	}

	/// Store-only lookup backing `current_credential`.
	pub(crate) async fn fetch_current(&self) -> Result<ValidatedCredential> {
		let subject = self.cached_subject();

		self.credentials
			.fetch(subject.as_ref())
			.await?
			.ok_or(Error::Storage(StoreError::NotFound))
	}

	/// Validates a credential against the service, overwriting the stored entry on
	/// success and learning the subject for subsequent lookups.
	pub(crate) async fn validate_and_store(
		&self,
		credential: Credential,
	) -> Result<(ValidatedCredential, ServiceResponse)> {
		const KIND: OpKind = OpKind::Validate;

		let span = OpSpan::new(KIND, "validate_and_store");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let Validated { validation, response } =
					self.service.validate(&credential).await?;
				let validated = ValidatedCredential::new(credential, validation);

				self.remember_subject(validated.subject());
				self.credentials.store(validated.clone(), validated.subject()).await?;

				Ok((validated, response))
			})
			.await;

		obs::record_op_outcome(KIND, outcome_of(&result));

		result
	}

	/// Fetch → network revoke → remove, sequenced so the store entry is removed only
	/// after the service acknowledged the revocation.
	pub(crate) async fn revoke_current(&self) -> Result<ServiceResponse> {
		const KIND: OpKind = OpKind::Revoke;

		let span = OpSpan::new(KIND, "revoke_current");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let current = self.fetch_current().await?;
				let response =
					self.service.revoke(&current.strip(), &self.config.client_key).await?;
				let subject = self.cached_subject();

				self.credentials.remove(subject.as_ref()).await?;

				Ok(response)
			})
			.await;

		obs::record_op_outcome(KIND, outcome_of(&result));

		result
	}
}
impl Debug for SessionCore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionCore").field("config", &self.config).finish()
	}
}

/// Future type returned by [`FreshGrant`] strategies.
pub(crate) type GrantFuture<'a> = Pin<Box<dyn Future<Output = Result<CredentialGrant>> + 'a + Send>>;

/// Variant-specific strategy for minting a credential when the store cannot help.
pub(crate) trait FreshGrant
where
	Self: Send + Sync,
{
	/// Mints a credential when nothing is stored for the subject.
	fn obtain<'a>(&'a self, core: &'a SessionCore) -> GrantFuture<'a>;

	/// Recovers after a stale stored credential failed validation.
	fn recover<'a>(&'a self, core: &'a SessionCore, stale: ValidatedCredential) -> GrantFuture<'a> {
		let _ = stale;

		self.obtain(core)
	}
}

/// Shared credential resolution: stored-and-recent is returned unchanged with zero
/// network calls; stored-but-stale is re-validated; everything else defers to the
/// variant's [`FreshGrant`] strategy.
pub(crate) async fn resolve_credential(
	core: &SessionCore,
	strategy: &dyn FreshGrant,
) -> Result<CredentialGrant> {
	let subject = core.cached_subject();
	let Some(stored) = core.credentials.fetch(subject.as_ref()).await.map_err(Error::from)?
	else {
		return strategy.obtain(core).await;
	};

	if stored.is_recent_at(OffsetDateTime::now_utc(), core.config.freshness_window) {
		return Ok(CredentialGrant::stored(stored));
	}

	match core.validate_and_store(stored.strip()).await {
		Ok((credential, response)) =>
			Ok(CredentialGrant { credential, id_token: None, response: Some(response) }),
		Err(_) => strategy.recover(core, stored).await,
	}
}

/// Delivers `future`'s output to `callback` on the ambient tokio runtime.
///
/// # Panics
///
/// Panics when called outside a tokio runtime, like any `tokio::spawn`.
pub(crate) fn deliver<T, F, C>(future: F, callback: C)
where
	T: 'static + Send,
	F: 'static + Future<Output = Result<T>> + Send,
	C: 'static + FnOnce(Result<T>) + Send,
{
	tokio::spawn(async move { callback(future.await) });
}

pub(crate) fn outcome_of<T>(result: &Result<T>) -> OpOutcome {
	match result {
		Ok(_) => OpOutcome::Success,
		Err(_) => OpOutcome::Failure,
	}
}
