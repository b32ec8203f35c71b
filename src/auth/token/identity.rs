//! Identity token (OIDC ID token) parsing.
//!
//! Claims are decoded from the compact three-part form without verifying the signature;
//! replay protection relies on the `nonce` claim comparison performed by the flow layer.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::_prelude::*;

/// Errors produced while parsing an identity token.
#[derive(Debug, ThisError)]
pub enum IdentityTokenError {
	/// The token was not a three-part compact serialization.
	#[error("Identity token is not a three-part compact serialization.")]
	MalformedCompactForm,
	/// The payload segment was not valid base64url.
	#[error("Identity token payload is not valid base64url.")]
	PayloadEncoding(#[from] base64::DecodeError),
	/// The payload segment was not a valid claims object.
	#[error("Identity token payload is not a valid claims object.")]
	PayloadParse(#[from] serde_path_to_error::Error<serde_json::error::Error>),
}

/// Standard claims carried by an identity token.
///
/// Unknown claims are preserved in [`extra`](Self::extra) so callers can reach
/// provider-specific additions without reparsing the payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
	/// Issuer of the token.
	#[serde(default)]
	pub iss: Option<String>,
	/// Subject the token asserts an identity for.
	#[serde(default)]
	pub sub: Option<String>,
	/// Audience the token was minted for.
	#[serde(default)]
	pub aud: Option<serde_json::Value>,
	/// Expiry as seconds since the Unix epoch.
	#[serde(default)]
	pub exp: Option<i64>,
	/// Issued-at as seconds since the Unix epoch.
	#[serde(default)]
	pub iat: Option<i64>,
	/// Per-flow replay protection value.
	#[serde(default)]
	pub nonce: Option<String>,
	/// Email address, when the `email` claim was requested.
	#[serde(default)]
	pub email: Option<String>,
	/// Preferred username, when requested.
	#[serde(default)]
	pub preferred_username: Option<String>,
	/// Any further claims present in the payload.
	#[serde(flatten)]
	pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Parsed identity token retaining its compact form for resubmission.
#[derive(Clone, PartialEq)]
pub struct IdentityToken {
	compact: String,
	/// Claims decoded from the payload segment.
	pub claims: IdentityClaims,
}
impl IdentityToken {
	/// Parses the compact three-part serialization.
	///
	/// The signature segment is required to be present but is never cryptographically
	/// verified here.
	pub fn parse(compact: impl Into<String>) -> Result<Self, IdentityTokenError> {
		let compact = compact.into();
		let mut segments = compact.split('.');
		let (Some(_), Some(payload), Some(_), None) =
			(segments.next(), segments.next(), segments.next(), segments.next())
		else {
			return Err(IdentityTokenError::MalformedCompactForm);
		};
		let bytes = URL_SAFE_NO_PAD.decode(payload)?;
		let mut deserializer = serde_json::Deserializer::from_slice(&bytes);
		let claims = serde_path_to_error::deserialize(&mut deserializer)?;

		Ok(Self { compact, claims })
	}

	/// Returns the compact serialization the token was parsed from.
	pub fn compact(&self) -> &str {
		&self.compact
	}

	/// Returns the `nonce` claim, if present.
	pub fn nonce(&self) -> Option<&str> {
		self.claims.nonce.as_deref()
	}
}
impl FromStr for IdentityToken {
	type Err = IdentityTokenError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}
impl Debug for IdentityToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IdentityToken")
			.field("compact", &"<redacted>")
			.field("claims", &self.claims)
			.finish()
	}
}
