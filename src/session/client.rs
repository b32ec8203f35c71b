//! Browser-driven auth session for client applications.
//!
//! On top of the shared resolution algorithm this variant adds the interactive pieces:
//! at most one flow engine invocation may be in flight per session instance, a second
//! start fails synchronously with [`Error::OperationInProgress`] before any engine or
//! network contact, and [`cancel_auth`](ClientSession::cancel_auth) tears the running
//! invocation down while still delivering its completion exactly once.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	auth::{Credential, IdentityToken, ValidatedCredential},
	error::ConfigError,
	flow::{AuthFlow, CodeArtifact, FlowError, FlowOutput, FlowRequest, FlowShape, InteractiveFlowEngine},
	obs::{self, OpKind, OpOutcome, OpSpan},
	service::{IdentityServiceClient, ServiceResponse},
	session::{self, CredentialGrant, FreshGrant, GrantFuture, SessionConfig, SessionCore},
	store::TokenStore,
};

/// Auth session driven by browser-based user interaction.
///
/// Cheaply cloneable; clones share the stored subject cache and the single-flight flow
/// guard.
#[derive(Clone, Debug)]
pub struct ClientSession {
	inner: Arc<ClientInner>,
}
impl ClientSession {
	/// Creates a session over the provided collaborators.
	pub fn new(
		credentials: Arc<dyn TokenStore<ValidatedCredential>>,
		service: Arc<dyn IdentityServiceClient>,
		engine: Arc<dyn InteractiveFlowEngine>,
		redirect_url: Url,
		flow: AuthFlow,
		config: SessionConfig,
	) -> Self {
		Self {
			inner: Arc::new(ClientInner {
				core: SessionCore::new(config, credentials, service),
				engine,
				redirect_url,
				flow,
				guard: Mutex::new(None),
				next_flow_id: AtomicU64::new(0),
			}),
		}
	}

	/// `true` iff no interactive flow is currently in flight.
	pub fn can_authorize(&self) -> bool {
		self.inner.guard.lock().is_none()
	}

	/// Cancels the in-flight interactive flow, if any.
	///
	/// The guard is cleared synchronously; the engine resolves the pending invocation
	/// exactly once with [`FlowError::Cancelled`].
	pub fn cancel_auth(&self) {
		if self.inner.guard.lock().take().is_some() {
			self.inner.engine.cancel();
		}
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
	/// ones re-validated, and anything else falls back to a full interactive flow.
	pub async fn credential(&self) -> Result<CredentialGrant> {
		session::resolve_credential(&self.inner.core, self).await
	}

	/// Callback form of [`credential`](Self::credential).
	pub fn credential_with(&self, callback: impl FnOnce(Result<CredentialGrant>) + Send + 'static) {
		let session = self.clone();

		session::deliver(async move { session.credential().await }, callback);
	}

	/// Forces a fresh interactive grant, bypassing the store read.
	pub async fn new_credential(&self) -> Result<CredentialGrant> {
		self.interactive_grant().await
	}

	/// Callback form of [`new_credential`](Self::new_credential).
	pub fn new_credential_with(
		&self,
		callback: impl FnOnce(Result<CredentialGrant>) + Send + 'static,
	) {
		let session = self.clone();

		session::deliver(async move { session.new_credential().await }, callback);
	}

	/// Runs an identity-token-only flow. Requires an OpenID Connect session.
	pub async fn new_id_token(&self) -> Result<IdentityToken> {
		if !self.inner.flow.is_open_id() {
			return Err(ConfigError::OpenIdRequired { operation: "new_id_token" }.into());
		}

		let output = self.run_flow(FlowShape::IdToken).await?;

		output.id_token().cloned().ok_or_else(|| FlowError::MissingIdToken.into())
	}

	/// Callback form of [`new_id_token`](Self::new_id_token).
	pub fn new_id_token_with(&self, callback: impl FnOnce(Result<IdentityToken>) + Send + 'static) {
		let session = self.clone();

		session::deliver(async move { session.new_id_token().await }, callback);
	}

	/// Runs an authorization-code flow, returning the code (and, for OpenID Connect
	/// sessions, the nonce to verify the server-side exchange with).
	pub async fn new_authorization_code(&self) -> Result<CodeArtifact> {
		match self.run_flow(FlowShape::AuthorizationCode).await? {
			FlowOutput::AuthorizationCode(artifact) => Ok(artifact),
			_ => Err(FlowError::MissingAuthCode.into()),
		}
	}

	/// Callback form of [`new_authorization_code`](Self::new_authorization_code).
	pub fn new_authorization_code_with(
		&self,
		callback: impl FnOnce(Result<CodeArtifact>) + Send + 'static,
	) {
		let session = self.clone();

		session::deliver(async move { session.new_authorization_code().await }, callback);
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

	async fn interactive_grant(&self) -> Result<CredentialGrant> {
		let shape = if self.inner.flow.is_open_id() {
			FlowShape::IdAndAccessToken
		} else {
			FlowShape::AccessToken
		};
		let output = self.run_flow(shape).await?;
		let id_token = output.id_token().cloned();
		let access_token =
			output.access_token().cloned().ok_or(Error::Flow(FlowError::MissingAccessToken))?;
		let (credential, response) =
			self.inner.core.validate_and_store(Credential { token: access_token }).await?;

		Ok(CredentialGrant { credential, id_token, response: Some(response) })
	}

	async fn run_flow(&self, shape: FlowShape) -> Result<FlowOutput> {
		const KIND: OpKind = OpKind::Interactive;

		let span = OpSpan::new(KIND, "run_flow");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let permit = self.begin_flow()?;
				let request = FlowRequest {
					client_key: self.inner.core.config.client_key.clone(),
					redirect_url: self.inner.redirect_url.clone(),
					scope: self.inner.core.config.scope.clone(),
					flow: self.inner.flow.clone(),
					shape,
				};
				let result = self.inner.engine.start(request).await;

				permit.finish();

				result.map_err(Error::from)
			})
			.await;

		obs::record_op_outcome(KIND, session::outcome_of(&result));

		result
	}

	/// Claims the single-flight guard, failing synchronously when a flow is in flight.
	fn begin_flow(&self) -> Result<FlowPermit> {
		let mut guard = self.inner.guard.lock();

		if guard.is_some() {
			return Err(Error::OperationInProgress);
		}

		let id = self.inner.next_flow_id.fetch_add(1, Ordering::Relaxed);

		*guard = Some(FlowHandle { id });

		Ok(FlowPermit { inner: self.inner.clone(), id, armed: true })
	}
}
impl FreshGrant for ClientSession {
	fn obtain<'a>(&'a self, _core: &'a SessionCore) -> GrantFuture<'a> {
		Box::pin(self.interactive_grant())
	}
}

struct ClientInner {
	core: SessionCore,
	engine: Arc<dyn InteractiveFlowEngine>,
	redirect_url: Url,
	flow: AuthFlow,
	guard: Mutex<Option<FlowHandle>>,
	next_flow_id: AtomicU64,
}
impl Debug for ClientInner {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientSession")
			.field("core", &self.core)
			.field("redirect_url", &self.redirect_url)
			.field("flow", &self.flow)
			.field("flow_in_flight", &self.guard.lock().is_some())
			.finish()
	}
}

/// In-flight flow marker; its presence in the guard slot is the sole source of truth
/// for "a flow is currently running."
struct FlowHandle {
	id: u64,
}

/// RAII ownership of the guard slot for one invocation.
///
/// Normal completion calls [`finish`](Self::finish), which clears the slot atomically
/// with result delivery. Dropping an unfinished permit (the owning future was dropped
/// mid-flight, e.g. on session teardown) clears the slot and cancels the engine so the
/// presentation is dismissed.
struct FlowPermit {
	inner: Arc<ClientInner>,
	id: u64,
	armed: bool,
}
impl FlowPermit {
	fn finish(mut self) {
		self.armed = false;

		let mut guard = self.inner.guard.lock();

		if guard.as_ref().is_some_and(|handle| handle.id == self.id) {
			*guard = None;
		}
	}
}
impl Drop for FlowPermit {
	fn drop(&mut self) {
		if !self.armed {
			return;
		}

		let mut guard = self.inner.guard.lock();

		if guard.as_ref().is_some_and(|handle| handle.id == self.id) {
			*guard = None;

			drop(guard);
			self.inner.engine.cancel();
		}
	}
}
