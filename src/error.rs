//! Session-level error types shared across sessions, flows, services, and stores.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical session error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Interactive flow failure.
	#[error(transparent)]
	Flow(#[from] crate::flow::FlowError),
	/// Identity token parsing failure.
	#[error(transparent)]
	IdentityToken(#[from] crate::auth::IdentityTokenError),

	/// Identity service rejected the request with a structured status + message.
	#[error("Identity service responded with HTTP {status}: {message}.")]
	Service {
		/// HTTP status code returned by the service.
		status: u16,
		/// Service- or session-supplied message summarizing the failure.
		message: String,
	},
	/// Identity service responded with malformed JSON that could not be parsed.
	#[error("Identity service returned malformed JSON.")]
	ServiceResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// An interactive authorization flow is already in flight for this session.
	#[error("An interactive authorization flow is already in progress.")]
	OperationInProgress,
	/// No stored credential exists and this session variant cannot mint one without a
	/// caller-supplied authorization code.
	#[error("No stored credential is available; supply an authorization code to mint one.")]
	AuthorizationCodeRequired,
}
impl Error {
	/// Returns the HTTP status reported by the identity service, when the error carries one.
	pub fn service_status(&self) -> Option<u16> {
		match self {
			Self::Service { status, .. } => Some(*status),
			Self::ServiceResponseParse { status, .. } => *status,
			_ => None,
		}
	}

	/// `true` when the identity service reported the grant as dead (HTTP 400/401).
	pub fn invalidates_refresh_token(&self) -> bool {
		matches!(self, Self::Service { status: 400 | 401, .. })
	}
}

/// Configuration and validation failures raised by the sessions.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Service endpoint URL cannot be parsed.
	#[error("Service endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Redirect URL cannot be parsed.
	#[error("Redirect URL is invalid.")]
	InvalidRedirect {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},

	/// The requested operation needs a confidential client secret.
	#[error("The {operation} operation requires a client secret.")]
	MissingClientSecret {
		/// Operation label.
		operation: &'static str,
	},
	/// The requested operation needs an OpenID Connect flow selector.
	#[error("The {operation} operation requires an OpenID Connect flow.")]
	OpenIdRequired {
		/// Operation label.
		operation: &'static str,
	},
	/// Request scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Identity service payload carried an invalid identifier.
	#[error("Identity service payload carried an invalid identifier.")]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the identity service.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the identity service.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
