//! Interactive authorization flow contracts.
//!
//! A flow invocation is described by an [`AuthFlow`] selector (plain OAuth vs OpenID
//! Connect) crossed with the requested [`FlowShape`] artifact. Engines resolve to one
//! of the four [`FlowOutput`] shapes or a [`FlowError`]; per-invocation `state` and
//! `nonce` protection is owned by the engine (see [`web::WebFlowEngine`]).

pub mod web;
pub use web::{WebAuthPresenter, WebFlowEngine};

// self
use crate::{
	_prelude::*,
	auth::{ClientKey, IdentityToken, IdentityTokenError, ScopeSet, TokenSecret},
};

/// Future type returned by [`InteractiveFlowEngine::start`].
pub type FlowFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FlowError>> + 'a + Send>>;

/// Requested OpenID Connect claims, split by delivery channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsRequest {
	/// Claims requested for both the identity token and the userinfo endpoint.
	pub shared: Vec<String>,
	/// Claims requested for the identity token only.
	pub id_token: Vec<String>,
	/// Claims requested for the userinfo endpoint only.
	pub userinfo: Vec<String>,
}
impl ClaimsRequest {
	/// Creates an empty claims request.
	pub fn new() -> Self {
		Self::default()
	}

	/// Requests claims on both delivery channels.
	pub fn with_shared<I, S>(mut self, claims: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.shared.extend(claims.into_iter().map(Into::into));

		self
	}

	/// Requests identity-token-only claims.
	pub fn with_id_token<I, S>(mut self, claims: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.id_token.extend(claims.into_iter().map(Into::into));

		self
	}

	/// Requests userinfo-only claims.
	pub fn with_userinfo<I, S>(mut self, claims: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.userinfo.extend(claims.into_iter().map(Into::into));

		self
	}

	/// Renders the OIDC `claims` request parameter, or `None` when nothing was requested.
	pub fn to_parameter(&self) -> Option<String> {
		if self.shared.is_empty() && self.id_token.is_empty() && self.userinfo.is_empty() {
			return None;
		}

		let channel = |only: &[String]| {
			let mut map = serde_json::Map::new();

			for claim in self.shared.iter().chain(only) {
				map.insert(claim.clone(), serde_json::Value::Null);
			}

			serde_json::Value::Object(map)
		};
		let parameter = serde_json::json!({
			"id_token": channel(&self.id_token),
			"userinfo": channel(&self.userinfo),
		});

		Some(parameter.to_string())
	}
}

/// Flow selector chosen at session construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthFlow {
	/// Plain OAuth 2.0 authorization.
	OAuth {
		/// Forces the service to re-prompt the user even with an active grant.
		force_verify: bool,
	},
	/// OpenID Connect authorization.
	OpenId {
		/// Claims requested from the service.
		claims: ClaimsRequest,
	},
}
impl AuthFlow {
	/// Plain OAuth selector.
	pub fn oauth(force_verify: bool) -> Self {
		Self::OAuth { force_verify }
	}

	/// OpenID Connect selector.
	pub fn open_id(claims: ClaimsRequest) -> Self {
		Self::OpenId { claims }
	}

	/// `true` for OpenID Connect flows.
	pub fn is_open_id(&self) -> bool {
		matches!(self, Self::OpenId { .. })
	}
}

/// Artifact requested from a flow invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowShape {
	/// Access token only (implicit grant).
	AccessToken,
	/// Identity token and access token (OIDC implicit grant).
	IdAndAccessToken,
	/// Identity token only.
	IdToken,
	/// One-time authorization code for a server-side exchange.
	AuthorizationCode,
}
impl FlowShape {
	/// OAuth `response_type` value for the shape.
	pub fn response_type(self) -> &'static str {
		match self {
			Self::AccessToken => "token",
			Self::IdAndAccessToken => "token id_token",
			Self::IdToken => "id_token",
			Self::AuthorizationCode => "code",
		}
	}
}

/// One round of interactive authorization, as driven by a session.
#[derive(Clone, Debug)]
pub struct FlowRequest {
	/// Client identifier the authorization is requested for.
	pub client_key: ClientKey,
	/// Redirect URL registered with the identity service.
	pub redirect_url: Url,
	/// Scopes to request.
	pub scope: ScopeSet,
	/// Flow selector.
	pub flow: AuthFlow,
	/// Requested artifact.
	pub shape: FlowShape,
}

/// Authorization code plus the nonce generated for its invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeArtifact {
	/// One-time authorization code to exchange server-side.
	pub code: String,
	/// Nonce to verify against the identity token minted by the exchange.
	pub nonce: Option<String>,
}

/// Successful flow completion, mirroring the four requested shapes.
#[derive(Clone, Debug)]
pub enum FlowOutput {
	/// Access token only.
	AccessToken {
		/// The bearer access token.
		access_token: TokenSecret,
	},
	/// Identity token and access token.
	IdAndAccessToken {
		/// The bearer access token.
		access_token: TokenSecret,
		/// The nonce-verified identity token.
		id_token: IdentityToken,
	},
	/// Identity token only.
	IdToken {
		/// The nonce-verified identity token.
		id_token: IdentityToken,
	},
	/// One-time authorization code.
	AuthorizationCode(CodeArtifact),
}
impl FlowOutput {
	/// Returns the access token, when the shape carries one.
	pub fn access_token(&self) -> Option<&TokenSecret> {
		match self {
			Self::AccessToken { access_token }
			| Self::IdAndAccessToken { access_token, .. } => Some(access_token),
			_ => None,
		}
	}

	/// Returns the identity token, when the shape carries one.
	pub fn id_token(&self) -> Option<&IdentityToken> {
		match self {
			Self::IdAndAccessToken { id_token, .. } | Self::IdToken { id_token } => Some(id_token),
			_ => None,
		}
	}
}

/// Failures produced by interactive flow engines.
#[derive(Debug, ThisError)]
pub enum FlowError {
	/// Callback URL was absent or could not be parsed.
	#[error("Authorization callback URL is missing or invalid.")]
	MissingOrInvalidCallbackUrl,
	/// Callback `state` did not match the value generated for the invocation.
	#[error("Authorization callback state does not match the request.")]
	MismatchedState,
	/// Identity token `nonce` claim did not match the value generated for the invocation.
	#[error("Identity token nonce does not match the request.")]
	MismatchedNonce,
	/// Callback carried no access token.
	#[error("Authorization callback is missing an access token.")]
	MissingAccessToken,
	/// Callback carried no identity token.
	#[error("Authorization callback is missing an identity token.")]
	MissingIdToken,
	/// Callback carried no authorization code.
	#[error("Authorization callback is missing an authorization code.")]
	MissingAuthCode,
	/// Identity token could not be parsed.
	#[error(transparent)]
	IdToken(#[from] IdentityTokenError),
	/// The flow was cancelled before completion.
	#[error("Authorization flow was cancelled.")]
	Cancelled,
	/// The presentation layer failed (user dismissal, transport failure, service error).
	#[error("Authorization presentation failed: {message}.")]
	Presentation {
		/// Presenter- or service-supplied failure summary.
		message: String,
	},
}

/// Drives one round of browser-based user interaction.
///
/// After [`cancel`](Self::cancel) the engine still resolves its in-flight
/// [`start`](Self::start) exactly once, with [`FlowError::Cancelled`].
pub trait InteractiveFlowEngine
where
	Self: Send + Sync,
{
	/// Runs one flow invocation to completion.
	fn start<'a>(&'a self, request: FlowRequest) -> FlowFuture<'a, FlowOutput>;

	/// Cancels the in-flight invocation, if any. Idempotent.
	fn cancel(&self);
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn claims_parameter_merges_shared_claims_into_both_channels() {
		let claims = ClaimsRequest::new()
			.with_shared(["email"])
			.with_id_token(["email_verified"])
			.with_userinfo(["picture"]);
		let parameter = claims.to_parameter().expect("Non-empty claims should render.");
		let value: serde_json::Value =
			serde_json::from_str(&parameter).expect("Rendered claims should be valid JSON.");

		assert!(value["id_token"].get("email").is_some());
		assert!(value["id_token"].get("email_verified").is_some());
		assert!(value["id_token"].get("picture").is_none());
		assert!(value["userinfo"].get("email").is_some());
		assert!(value["userinfo"].get("picture").is_some());
	}

	#[test]
	fn empty_claims_render_nothing() {
		assert_eq!(ClaimsRequest::new().to_parameter(), None);
	}

	#[test]
	fn response_types_cover_all_shapes() {
		assert_eq!(FlowShape::AccessToken.response_type(), "token");
		assert_eq!(FlowShape::IdAndAccessToken.response_type(), "token id_token");
		assert_eq!(FlowShape::IdToken.response_type(), "id_token");
		assert_eq!(FlowShape::AuthorizationCode.response_type(), "code");
	}
}
