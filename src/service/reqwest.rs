//! Reqwest-backed [`IdentityServiceClient`] implementation.
//!
//! Token requests do not follow redirects, matching OAuth 2.0 guidance that token
//! endpoints return results directly instead of delegating to another URI. Pass a
//! custom [`ReqwestClient`] through [`ReqwestIdentityClient::with_client`] only if it is
//! configured the same way.

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{ClientKey, Credential, IdentityToken, ScopeSet, SubjectId, TokenSecret, Validation},
	error::{ConfigError, TransportError},
	flow::FlowError,
	service::{
		AppGrant, CodeGrant, IdentityServiceClient, Refreshed, ServiceEndpoints, ServiceFuture,
		ServiceResponse, Validated,
	},
};

/// [`IdentityServiceClient`] speaking the conventional OAuth 2.0 wire shapes over reqwest.
#[derive(Clone, Debug)]
pub struct ReqwestIdentityClient {
	client: ReqwestClient,
	endpoints: ServiceEndpoints,
}
impl ReqwestIdentityClient {
	/// Builds a client with a redirect-free reqwest transport for the provided endpoints.
	pub fn new(endpoints: ServiceEndpoints) -> Result<Self, ConfigError> {
		let client =
			ReqwestClient::builder().redirect(reqwest::redirect::Policy::none()).build()?;

		Ok(Self::with_client(client, endpoints))
	}

	/// Wraps an existing [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient, endpoints: ServiceEndpoints) -> Self {
		Self { client, endpoints }
	}

	async fn dispatch(&self, request: reqwest::RequestBuilder) -> Result<ServiceResponse> {
		let response = request.send().await.map_err(TransportError::from)?;
		let status = response.status().as_u16();
		let body = response.text().await.map_err(TransportError::from)?;

		Ok(ServiceResponse { status, body })
	}

	fn ensure_success(response: &ServiceResponse) -> Result<()> {
		if response.is_success() {
			Ok(())
		} else {
			Err(Error::Service {
				status: response.status,
				message: extract_message(&response.body),
			})
		}
	}

	fn parse_json<T>(response: &ServiceResponse) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let mut deserializer = serde_json::Deserializer::from_str(&response.body);

		serde_path_to_error::deserialize(&mut deserializer).map_err(|source| {
			Error::ServiceResponseParse { source, status: Some(response.status) }
		})
	}

	fn require_secret<'s>(
		secret: Option<&'s str>,
		operation: &'static str,
	) -> Result<&'s str, ConfigError> {
		secret.ok_or(ConfigError::MissingClientSecret { operation })
	}
}
impl IdentityServiceClient for ReqwestIdentityClient {
	fn validate<'a>(&'a self, credential: &'a Credential) -> ServiceFuture<'a, Validated> {
		Box::pin(async move {
			let request = self
				.client
				.get(self.endpoints.validate.clone())
				.bearer_auth(credential.token.expose());
			let response = self.dispatch(request).await?;

			Self::ensure_success(&response)?;

			let payload: ValidatePayload = Self::parse_json(&response)?;
			let subject = payload
				.user_id
				.map(SubjectId::new)
				.transpose()
				.map_err(ConfigError::from)?;
			let client_key = ClientKey::new(payload.client_id).map_err(ConfigError::from)?;
			let scope =
				ScopeSet::new(payload.scopes.unwrap_or_default()).map_err(ConfigError::from)?;
			let validation = Validation {
				subject,
				client_key,
				scope,
				validated_at: OffsetDateTime::now_utc(),
			};

			Ok(Validated { validation, response })
		})
	}

	fn refresh<'a>(
		&'a self,
		refresh_token: &'a TokenSecret,
		client_key: &'a ClientKey,
		client_secret: Option<&'a str>,
		scope: &'a ScopeSet,
	) -> ServiceFuture<'a, Refreshed> {
		Box::pin(async move {
			let secret = Self::require_secret(client_secret, "refresh")?;
			let mut form = vec![
				("grant_type", "refresh_token".to_owned()),
				("refresh_token", refresh_token.expose().to_owned()),
				("client_id", client_key.to_string()),
				("client_secret", secret.to_owned()),
			];

			if !scope.is_empty() {
				form.push(("scope", scope.normalized()));
			}

			let request = self.client.post(self.endpoints.token.clone()).form(&form);
			let response = self.dispatch(request).await?;

			Self::ensure_success(&response)?;

			let payload: TokenPayload = Self::parse_json(&response)?;

			Ok(Refreshed {
				credential: Credential::new(payload.access_token),
				refresh_token: payload.refresh_token.map(TokenSecret::new),
				response,
			})
		})
	}

	fn revoke<'a>(
		&'a self,
		credential: &'a Credential,
		client_key: &'a ClientKey,
	) -> ServiceFuture<'a, ServiceResponse> {
		Box::pin(async move {
			let form = [
				("client_id", client_key.to_string()),
				("token", credential.token.expose().to_owned()),
			];
			let request = self.client.post(self.endpoints.revoke.clone()).form(&form);
			let response = self.dispatch(request).await?;

			Self::ensure_success(&response)?;

			Ok(response)
		})
	}

	fn authorize_with_code<'a>(
		&'a self,
		client_key: &'a ClientKey,
		client_secret: Option<&'a str>,
		code: &'a str,
		redirect_url: &'a Url,
		nonce: Option<&'a str>,
	) -> ServiceFuture<'a, CodeGrant> {
		Box::pin(async move {
			let secret = Self::require_secret(client_secret, "authorization code exchange")?;
			let form = [
				("grant_type", "authorization_code".to_owned()),
				("code", code.to_owned()),
				("redirect_uri", redirect_url.to_string()),
				("client_id", client_key.to_string()),
				("client_secret", secret.to_owned()),
			];
			let request = self.client.post(self.endpoints.token.clone()).form(&form);
			let response = self.dispatch(request).await?;

			Self::ensure_success(&response)?;

			let payload: TokenPayload = Self::parse_json(&response)?;
			let id_token =
				payload.id_token.map(IdentityToken::parse).transpose().map_err(Error::from)?;

			if let (Some(expected), Some(id_token)) = (nonce, id_token.as_ref())
				&& id_token.nonce() != Some(expected)
			{
				return Err(FlowError::MismatchedNonce.into());
			}

			Ok(CodeGrant {
				credential: Credential::new(payload.access_token),
				refresh_token: payload.refresh_token.map(TokenSecret::new),
				id_token,
				response,
			})
		})
	}

	fn authorize_with_client_credentials<'a>(
		&'a self,
		client_key: &'a ClientKey,
		client_secret: Option<&'a str>,
		scope: &'a ScopeSet,
	) -> ServiceFuture<'a, AppGrant> {
		Box::pin(async move {
			let secret = Self::require_secret(client_secret, "client credentials grant")?;
			let mut form = vec![
				("grant_type", "client_credentials".to_owned()),
				("client_id", client_key.to_string()),
				("client_secret", secret.to_owned()),
			];

			if !scope.is_empty() {
				form.push(("scope", scope.normalized()));
			}

			let request = self.client.post(self.endpoints.token.clone()).form(&form);
			let response = self.dispatch(request).await?;

			Self::ensure_success(&response)?;

			let payload: TokenPayload = Self::parse_json(&response)?;

			Ok(AppGrant { credential: Credential::new(payload.access_token), response })
		})
	}
}

#[derive(Deserialize)]
struct ValidatePayload {
	client_id: String,
	#[serde(default)]
	user_id: Option<String>,
	#[serde(default)]
	scopes: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct TokenPayload {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	id_token: Option<String>,
}

fn extract_message(body: &str) -> String {
	if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
		for key in ["message", "error_description", "error"] {
			if let Some(message) = value.get(key).and_then(serde_json::Value::as_str) {
				return message.to_owned();
			}
		}
	}
	if body.is_empty() {
		return "(empty body)".to_owned();
	}

	body.chars().take(256).collect()
}
