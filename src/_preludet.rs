//! Scripted collaborators and fixtures for session tests; enabled via `cfg(test)` or
//! the `test` crate feature.

// std
use std::{
	collections::VecDeque,
	sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use tokio::sync::Notify;
// self
use crate::{
	_prelude::*,
	auth::{ClientKey, Credential, ScopeSet, SubjectId, TokenSecret, ValidatedCredential, Validation},
	flow::{FlowError, FlowFuture, FlowOutput, FlowRequest, InteractiveFlowEngine},
	service::{
		AppGrant, CodeGrant, IdentityServiceClient, Refreshed, ServiceFuture, ServiceResponse,
		Validated,
	},
	session::SessionConfig,
};

/// Session config fixture: public client `client-1` with the `user:read` scope.
pub fn test_config() -> SessionConfig {
	SessionConfig::new(
		ClientKey::new("client-1").expect("Client fixture should be valid."),
		ScopeSet::new(["user:read"]).expect("Scope fixture should be valid."),
	)
}

/// Builds an unsigned compact-form identity token carrying the provided claims.
pub fn fake_id_token(claims: serde_json::Value) -> String {
	let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"RS256\",\"typ\":\"JWT\"}");
	let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());

	format!("{header}.{payload}.fixture-signature")
}

/// Builds a validated credential whose validation happened `age` ago.
pub fn validated_credential(
	token: &str,
	subject: Option<&SubjectId>,
	age: Duration,
) -> ValidatedCredential {
	ValidatedCredential::new(Credential::new(token), Validation {
		subject: subject.cloned(),
		client_key: ClientKey::new("client-1").expect("Client fixture should be valid."),
		scope: ScopeSet::new(["user:read"]).expect("Scope fixture should be valid."),
		validated_at: OffsetDateTime::now_utc() - age,
	})
}

/// User-scoped credential validated just now.
pub fn recent_credential(token: &str, subject: &SubjectId) -> ValidatedCredential {
	validated_credential(token, Some(subject), Duration::ZERO)
}

/// User-scoped credential validated two hours ago (stale under the default window).
pub fn stale_credential(token: &str, subject: &SubjectId) -> ValidatedCredential {
	validated_credential(token, Some(subject), Duration::hours(2))
}

/// App-only credential validated just now.
pub fn recent_app_credential(token: &str) -> ValidatedCredential {
	validated_credential(token, None, Duration::ZERO)
}

/// App-only credential validated two hours ago (stale under the default window).
pub fn stale_app_credential(token: &str) -> ValidatedCredential {
	validated_credential(token, None, Duration::hours(2))
}

/// Successful validate endpoint result for the provided subject.
pub fn validated_response(subject: Option<&str>) -> Validated {
	Validated {
		validation: Validation {
			subject: subject
				.map(|s| SubjectId::new(s).expect("Subject fixture should be valid.")),
			client_key: ClientKey::new("client-1").expect("Client fixture should be valid."),
			scope: ScopeSet::new(["user:read"]).expect("Scope fixture should be valid."),
			validated_at: OffsetDateTime::now_utc(),
		},
		response: ok_response(),
	}
}

/// Successful refresh grant result.
pub fn refreshed_response(access: &str, refresh: Option<&str>) -> Refreshed {
	Refreshed {
		credential: Credential::new(access),
		refresh_token: refresh.map(TokenSecret::new),
		response: ok_response(),
	}
}

/// Successful client-credentials grant result.
pub fn app_grant_response(access: &str) -> AppGrant {
	AppGrant { credential: Credential::new(access), response: ok_response() }
}

/// Plain 200 response fixture.
pub fn ok_response() -> ServiceResponse {
	ServiceResponse { status: 200, body: "{}".into() }
}

/// [`IdentityServiceClient`] stub replaying scripted results and counting calls.
///
/// An operation invoked without a script entry panics, so tests asserting "zero network
/// calls" fail loudly when a call slips through.
#[derive(Default)]
pub struct ScriptedIdentityClient {
	validate: Mutex<VecDeque<Result<Validated>>>,
	refresh: Mutex<VecDeque<Result<Refreshed>>>,
	revoke: Mutex<VecDeque<Result<ServiceResponse>>>,
	authorize_code: Mutex<VecDeque<Result<CodeGrant>>>,
	app_grant: Mutex<VecDeque<Result<AppGrant>>>,
	validate_count: AtomicUsize,
	refresh_count: AtomicUsize,
	revoke_count: AtomicUsize,
	authorize_code_count: AtomicUsize,
	app_grant_count: AtomicUsize,
}
impl ScriptedIdentityClient {
	/// Queues a validate result.
	pub fn push_validate(&self, result: Result<Validated>) {
		self.validate.lock().push_back(result);
	}

	/// Queues a refresh result.
	pub fn push_refresh(&self, result: Result<Refreshed>) {
		self.refresh.lock().push_back(result);
	}

	/// Queues a revoke result.
	pub fn push_revoke(&self, result: Result<ServiceResponse>) {
		self.revoke.lock().push_back(result);
	}

	/// Queues an authorization-code exchange result.
	pub fn push_authorize_code(&self, result: Result<CodeGrant>) {
		self.authorize_code.lock().push_back(result);
	}

	/// Queues a client-credentials grant result.
	pub fn push_app_grant(&self, result: Result<AppGrant>) {
		self.app_grant.lock().push_back(result);
	}

	/// Number of validate calls observed.
	pub fn validate_calls(&self) -> usize {
		self.validate_count.load(Ordering::SeqCst)
	}

	/// Number of refresh calls observed.
	pub fn refresh_calls(&self) -> usize {
		self.refresh_count.load(Ordering::SeqCst)
	}

	/// Number of revoke calls observed.
	pub fn revoke_calls(&self) -> usize {
		self.revoke_count.load(Ordering::SeqCst)
	}

	/// Number of authorization-code exchange calls observed.
	pub fn authorize_code_calls(&self) -> usize {
		self.authorize_code_count.load(Ordering::SeqCst)
	}

	/// Number of client-credentials grant calls observed.
	pub fn app_grant_calls(&self) -> usize {
		self.app_grant_count.load(Ordering::SeqCst)
	}
}
impl IdentityServiceClient for ScriptedIdentityClient {
	fn validate<'a>(&'a self, _: &'a Credential) -> ServiceFuture<'a, Validated> {
		self.validate_count.fetch_add(1, Ordering::SeqCst);

		let scripted = self.validate.lock().pop_front();

		Box::pin(async move { scripted.expect("Unexpected validate call.") })
	}

	fn refresh<'a>(
		&'a self,
		_: &'a TokenSecret,
		_: &'a ClientKey,
		_: Option<&'a str>,
		_: &'a ScopeSet,
	) -> ServiceFuture<'a, Refreshed> {
		self.refresh_count.fetch_add(1, Ordering::SeqCst);

		let scripted = self.refresh.lock().pop_front();

		Box::pin(async move { scripted.expect("Unexpected refresh call.") })
	}

	fn revoke<'a>(
		&'a self,
		_: &'a Credential,
		_: &'a ClientKey,
	) -> ServiceFuture<'a, ServiceResponse> {
		self.revoke_count.fetch_add(1, Ordering::SeqCst);

		let scripted = self.revoke.lock().pop_front();

		Box::pin(async move { scripted.expect("Unexpected revoke call.") })
	}

	fn authorize_with_code<'a>(
		&'a self,
		_: &'a ClientKey,
		_: Option<&'a str>,
		_: &'a str,
		_: &'a Url,
		_: Option<&'a str>,
	) -> ServiceFuture<'a, CodeGrant> {
		self.authorize_code_count.fetch_add(1, Ordering::SeqCst);

		let scripted = self.authorize_code.lock().pop_front();

		Box::pin(async move { scripted.expect("Unexpected authorization-code call.") })
	}

	fn authorize_with_client_credentials<'a>(
		&'a self,
		_: &'a ClientKey,
		_: Option<&'a str>,
		_: &'a ScopeSet,
	) -> ServiceFuture<'a, AppGrant> {
		self.app_grant_count.fetch_add(1, Ordering::SeqCst);

		let scripted = self.app_grant.lock().pop_front();

		Box::pin(async move { scripted.expect("Unexpected client-credentials call.") })
	}
}

/// [`InteractiveFlowEngine`] stub replaying scripted outputs.
///
/// With [`hold`](Self::hold) enabled, `start` parks until [`release`](Self::release) or
/// `cancel`, letting tests observe the single-flight guard mid-flow. Signals are
/// single-use; build a fresh engine per scenario.
#[derive(Default)]
pub struct ScriptedFlowEngine {
	outputs: Mutex<VecDeque<Result<FlowOutput, FlowError>>>,
	start_count: AtomicUsize,
	cancel_count: AtomicUsize,
	held: AtomicBool,
	release_signal: Notify,
	cancel_signal: Notify,
}
impl ScriptedFlowEngine {
	/// Queues a flow output.
	pub fn push_output(&self, output: Result<FlowOutput, FlowError>) {
		self.outputs.lock().push_back(output);
	}

	/// Parks subsequent `start` calls until released or cancelled.
	pub fn hold(&self) {
		self.held.store(true, Ordering::SeqCst);
	}

	/// Releases a held `start` call.
	pub fn release(&self) {
		self.release_signal.notify_one();
	}

	/// Number of start calls observed.
	pub fn starts(&self) -> usize {
		self.start_count.load(Ordering::SeqCst)
	}

	/// Number of cancel calls observed.
	pub fn cancels(&self) -> usize {
		self.cancel_count.load(Ordering::SeqCst)
	}
}
impl InteractiveFlowEngine for ScriptedFlowEngine {
	fn start<'a>(&'a self, _: FlowRequest) -> FlowFuture<'a, FlowOutput> {
		self.start_count.fetch_add(1, Ordering::SeqCst);

		Box::pin(async move {
			if self.held.load(Ordering::SeqCst) {
				tokio::select! {
					_ = self.release_signal.notified() => {},
					_ = self.cancel_signal.notified() => return Err(FlowError::Cancelled),
				}
			}

			self.outputs.lock().pop_front().expect("Unexpected flow start.")
		})
	}

	fn cancel(&self) {
		self.cancel_count.fetch_add(1, Ordering::SeqCst);
		self.cancel_signal.notify_one();
	}
}
