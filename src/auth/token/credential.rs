//! Credential models and freshness helpers.
//!
//! A [`Credential`] is an opaque bearer token as received from the identity service.
//! Once the validate endpoint has asserted its subject, client, and scopes, the pair
//! becomes a [`ValidatedCredential`] carrying a [`Validation`]. The two forms are kept
//! distinct so a stale validated credential can be stripped back to its unvalidated
//! shape for resubmission.

// self
use crate::{
	_prelude::*,
	auth::{ClientKey, ScopeSet, SubjectId, token::secret::TokenSecret},
};

/// Unvalidated bearer credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	/// Opaque bearer token granting API access.
	pub token: TokenSecret,
}
impl Credential {
	/// Wraps a raw bearer token string.
	pub fn new(token: impl Into<String>) -> Self {
		Self { token: TokenSecret::new(token) }
	}
}

/// Server-asserted metadata describing a credential at validation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
	/// Subject identifier when the credential is user-scoped; `None` for app-only tokens.
	pub subject: Option<SubjectId>,
	/// Client identifier the credential was issued to.
	pub client_key: ClientKey,
	/// Scopes granted to the credential.
	pub scope: ScopeSet,
	/// Instant at which the identity service asserted this metadata.
	pub validated_at: OffsetDateTime,
}

/// Credential plus the validation the identity service asserted for it.
///
/// Superseded, never mutated: every later validate/refresh/authorize success produces a
/// fresh value that overwrites the stored one.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedCredential {
	/// The bearer token.
	pub token: TokenSecret,
	/// Metadata asserted by the identity service.
	pub validation: Validation,
}
impl ValidatedCredential {
	/// Pairs a credential with its validation.
	pub fn new(credential: Credential, validation: Validation) -> Self {
		Self { token: credential.token, validation }
	}

	/// `true` when the validation happened within `window` before `instant`.
	pub fn is_recent_at(&self, instant: OffsetDateTime, window: Duration) -> bool {
		instant - self.validation.validated_at < window
	}

	/// Convenience helper that checks recency against the current UTC instant.
	pub fn is_recent(&self, window: Duration) -> bool {
		self.is_recent_at(OffsetDateTime::now_utc(), window)
	}

	/// Subject identifier the credential is scoped to, if user-scoped.
	pub fn subject(&self) -> Option<&SubjectId> {
		self.validation.subject.as_ref()
	}

	/// Strips the validation, returning the unvalidated form for resubmission.
	pub fn strip(&self) -> Credential {
		Credential { token: self.token.clone() }
	}
}
impl Debug for ValidatedCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ValidatedCredential")
			.field("token", &"<redacted>")
			.field("validation", &self.validation)
			.finish()
	}
}
