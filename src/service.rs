//! Identity service contract consumed by every session variant.
//!
//! The trait covers the five network operations sessions orchestrate—validate, refresh,
//! revoke, and the two non-interactive authorization grants. Implementations surface
//! transport failures as [`TransportError`](crate::error::TransportError) and non-2xx
//! service responses as [`Error::Service`] so status-based handling (dead refresh
//! tokens on 400/401) stays reliable.

#[cfg(feature = "reqwest")] pub mod reqwest;
#[cfg(feature = "reqwest")] pub use self::reqwest::ReqwestIdentityClient;

// self
use crate::{
	_prelude::*,
	auth::{ClientKey, Credential, IdentityToken, ScopeSet, TokenSecret, Validation},
	error::ConfigError,
};

/// Future type returned by [`IdentityServiceClient`] operations.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Last HTTP response observed for an operation, propagated through completion payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResponse {
	/// HTTP status code.
	pub status: u16,
	/// Raw response body.
	pub body: String,
}
impl ServiceResponse {
	/// `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

/// Successful validate result.
#[derive(Clone, Debug)]
pub struct Validated {
	/// Metadata the service asserted for the credential.
	pub validation: Validation,
	/// The validate endpoint's HTTP response.
	pub response: ServiceResponse,
}

/// Successful refresh result.
#[derive(Clone, Debug)]
pub struct Refreshed {
	/// Freshly minted, not yet validated credential.
	pub credential: Credential,
	/// Rotated refresh token, when the service issued one.
	pub refresh_token: Option<TokenSecret>,
	/// The token endpoint's HTTP response.
	pub response: ServiceResponse,
}

/// Successful authorization-code exchange result.
#[derive(Clone, Debug)]
pub struct CodeGrant {
	/// Freshly minted, not yet validated credential.
	pub credential: Credential,
	/// Refresh token, when the service issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Identity token, when the authorization requested OpenID Connect.
	pub id_token: Option<IdentityToken>,
	/// The token endpoint's HTTP response.
	pub response: ServiceResponse,
}

/// Successful client-credentials grant result.
#[derive(Clone, Debug)]
pub struct AppGrant {
	/// Freshly minted, not yet validated app credential.
	pub credential: Credential,
	/// The token endpoint's HTTP response.
	pub response: ServiceResponse,
}

/// Network operations sessions perform against the identity service.
pub trait IdentityServiceClient
where
	Self: Send + Sync,
{
	/// Asks the service to assert subject, client, and scopes for a credential.
	fn validate<'a>(&'a self, credential: &'a Credential) -> ServiceFuture<'a, Validated>;

	/// Mints a new credential from a refresh token.
	fn refresh<'a>(
		&'a self,
		refresh_token: &'a TokenSecret,
		client_key: &'a ClientKey,
		client_secret: Option<&'a str>,
		scope: &'a ScopeSet,
	) -> ServiceFuture<'a, Refreshed>;

	/// Revokes a credential.
	fn revoke<'a>(
		&'a self,
		credential: &'a Credential,
		client_key: &'a ClientKey,
	) -> ServiceFuture<'a, ServiceResponse>;

	/// Exchanges a one-time authorization code for credentials server-side.
	///
	/// When `nonce` is provided and the response carries an identity token, the token's
	/// `nonce` claim must match or the exchange fails with
	/// [`FlowError::MismatchedNonce`](crate::flow::FlowError::MismatchedNonce).
	fn authorize_with_code<'a>(
		&'a self,
		client_key: &'a ClientKey,
		client_secret: Option<&'a str>,
		code: &'a str,
		redirect_url: &'a Url,
		nonce: Option<&'a str>,
	) -> ServiceFuture<'a, CodeGrant>;

	/// Performs the app-only client-credentials grant.
	fn authorize_with_client_credentials<'a>(
		&'a self,
		client_key: &'a ClientKey,
		client_secret: Option<&'a str>,
		scope: &'a ScopeSet,
	) -> ServiceFuture<'a, AppGrant>;
}

/// Endpoint set a concrete identity service exposes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoints {
	/// Credential validation endpoint.
	pub validate: Url,
	/// Token endpoint used for refreshes and code/client-credentials exchanges.
	pub token: Url,
	/// Revocation endpoint.
	pub revoke: Url,
	/// Interactive authorization endpoint end-users are sent to.
	pub authorize: Url,
}
impl ServiceEndpoints {
	/// Derives the conventional endpoint set from a service base URL.
	pub fn from_base(base: &Url) -> Result<Self, ConfigError> {
		let join = |path: &str| {
			base.join(path).map_err(|source| ConfigError::InvalidEndpoint { source })
		};

		Ok(Self {
			validate: join("oauth2/validate")?,
			token: join("oauth2/token")?,
			revoke: join("oauth2/revoke")?,
			authorize: join("oauth2/authorize")?,
		})
	}
}
