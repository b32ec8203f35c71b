//! Reference [`InteractiveFlowEngine`] for browser-driven authorization.
//!
//! The engine owns the per-invocation CSRF `state` and replay `nonce` values: it
//! generates both, embeds them in the authorize URL, hands the URL to a pluggable
//! [`WebAuthPresenter`] (the actual web-authentication UI), and verifies the callback
//! the presenter returns. At most one invocation should be in flight per engine; the
//! sessions enforce this with their flow guard.

// crates.io
use rand::{Rng, distr::Alphanumeric};
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{IdentityToken, TokenSecret},
	flow::{
		AuthFlow, CodeArtifact, FlowError, FlowFuture, FlowOutput, FlowRequest, FlowShape,
		InteractiveFlowEngine,
	},
};

const STATE_LEN: usize = 32;
const NONCE_LEN: usize = 32;

/// Future type returned by [`WebAuthPresenter::present`].
pub type PresenterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FlowError>> + 'a + Send>>;

/// Pluggable web-authentication UI.
///
/// Implementations open the authorize URL for the end user and resolve with the full
/// redirect (callback) URL the identity service sent the user agent to, or with
/// [`FlowError::MissingOrInvalidCallbackUrl`] / [`FlowError::Presentation`] /
/// [`FlowError::Cancelled`] when the round fails.
pub trait WebAuthPresenter
where
	Self: Send + Sync,
{
	/// Presents the authorize URL and resolves with the callback URL.
	fn present<'a>(&'a self, authorize_url: &'a Url) -> PresenterFuture<'a, Url>;

	/// Dismisses any visible presentation. Idempotent.
	fn cancel(&self);
}

/// State/nonce-guarded flow engine over a pluggable presenter.
pub struct WebFlowEngine {
	authorize_endpoint: Url,
	presenter: Arc<dyn WebAuthPresenter>,
	cancel_slot: Mutex<Option<oneshot::Sender<()>>>,
}
impl WebFlowEngine {
	/// Creates an engine for the provided authorize endpoint and presenter.
	pub fn new(authorize_endpoint: Url, presenter: Arc<dyn WebAuthPresenter>) -> Self {
		Self { authorize_endpoint, presenter, cancel_slot: Mutex::new(None) }
	}

	fn build_authorize_url(&self, request: &FlowRequest, state: &str, nonce: Option<&str>) -> Url {
		let mut url = self.authorize_endpoint.clone();

		{
			let mut pairs = url.query_pairs_mut();

			pairs.append_pair("response_type", request.shape.response_type());
			pairs.append_pair("client_id", request.client_key.as_ref());
			pairs.append_pair("redirect_uri", request.redirect_url.as_str());
			pairs.append_pair("scope", &scope_value(request));
			pairs.append_pair("state", state);

			if let Some(nonce) = nonce {
				pairs.append_pair("nonce", nonce);
			}

			match &request.flow {
				AuthFlow::OAuth { force_verify: true } => {
					pairs.append_pair("force_verify", "true");
				},
				AuthFlow::OAuth { force_verify: false } => {},
				AuthFlow::OpenId { claims } =>
					if let Some(parameter) = claims.to_parameter() {
						pairs.append_pair("claims", &parameter);
					},
			}
		}

		url
	}
}
impl InteractiveFlowEngine for WebFlowEngine {
	fn start<'a>(&'a self, request: FlowRequest) -> FlowFuture<'a, FlowOutput> {
		Box::pin(async move {
			let state = random_string(STATE_LEN);
			let nonce = request.flow.is_open_id().then(|| random_string(NONCE_LEN));
			let authorize_url = self.build_authorize_url(&request, &state, nonce.as_deref());
			let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

			*self.cancel_slot.lock() = Some(cancel_tx);

			let result = tokio::select! {
				_ = cancel_rx => Err(FlowError::Cancelled),
				presented = self.presenter.present(&authorize_url) => presented
					.and_then(|callback| complete(request.shape, &callback, &state, nonce)),
			};

			self.cancel_slot.lock().take();

			result
		})
	}

	fn cancel(&self) {
		if let Some(cancel_tx) = self.cancel_slot.lock().take() {
			let _ = cancel_tx.send(());
		}

		self.presenter.cancel();
	}
}
impl Debug for WebFlowEngine {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("WebFlowEngine")
			.field("authorize_endpoint", &self.authorize_endpoint)
			.finish()
	}
}

fn scope_value(request: &FlowRequest) -> String {
	let normalized = request.scope.normalized();

	if request.flow.is_open_id() && !request.scope.contains("openid") {
		if normalized.is_empty() { "openid".to_owned() } else { format!("openid {normalized}") }
	} else {
		normalized
	}
}

fn complete(
	shape: FlowShape,
	callback: &Url,
	state: &str,
	nonce: Option<String>,
) -> Result<FlowOutput, FlowError> {
	let params = callback_params(callback);

	if let Some(error) = params.get("error") {
		let message = params.get("error_description").unwrap_or(error).clone();

		return Err(FlowError::Presentation { message });
	}
	if params.get("state").map(String::as_str) != Some(state) {
		return Err(FlowError::MismatchedState);
	}

	let access_token = || {
		params
			.get("access_token")
			.map(|token| TokenSecret::new(token.clone()))
			.ok_or(FlowError::MissingAccessToken)
	};
	let id_token = || {
		let compact = params.get("id_token").ok_or(FlowError::MissingIdToken)?;
		let id_token = IdentityToken::parse(compact.clone())?;

		if id_token.nonce() != nonce.as_deref() {
			return Err(FlowError::MismatchedNonce);
		}

		Ok(id_token)
	};

	match shape {
		FlowShape::AccessToken => Ok(FlowOutput::AccessToken { access_token: access_token()? }),
		FlowShape::IdAndAccessToken => Ok(FlowOutput::IdAndAccessToken {
			access_token: access_token()?,
			id_token: id_token()?,
		}),
		FlowShape::IdToken => Ok(FlowOutput::IdToken { id_token: id_token()? }),
		FlowShape::AuthorizationCode => {
			let code = params.get("code").cloned().ok_or(FlowError::MissingAuthCode)?;

			Ok(FlowOutput::AuthorizationCode(CodeArtifact { code, nonce }))
		},
	}
}

// Implicit-grant services return artifacts in the fragment, code-grant services in the
// query; accept both and let the fragment win on key collisions.
fn callback_params(callback: &Url) -> HashMap<String, String> {
	let mut params: HashMap<String, String> =
		callback.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();

	if let Some(fragment) = callback.fragment() {
		params.extend(
			url::form_urlencoded::parse(fragment.as_bytes())
				.map(|(k, v)| (k.into_owned(), v.into_owned())),
		);
	}

	params
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}
