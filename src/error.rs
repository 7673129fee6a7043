//! Crate-level error types shared across the store, flows, limiter, and request pipeline.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Remediation for missing or expired credentials.
pub const ACTION_LOGIN: &str = "Please log in first.";
/// Remediation for failed interactive logins.
pub const ACTION_REGISTRATION: &str = "Check the app registration and try again.";
/// Remediation for throttled calls.
pub const ACTION_RETRY_LATER: &str = "Retry later.";

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// No usable credential is cached and none could be refreshed.
	#[error("Not authenticated. Please log in first.")]
	AuthenticationRequired,
	/// The remote service rejected the credential and a forced refresh could not replace it.
	#[error("Session expired. Please log in again.")]
	SessionExpired,
	/// Returned `state` is unknown or was already consumed.
	#[error("Invalid state parameter, possible CSRF attack.")]
	StateMismatch,
	/// The authorization server redirected back with explicit error parameters.
	#[error("OAuth error: {error} ({description}).")]
	Authorization {
		/// OAuth `error` code.
		error: String,
		/// OAuth `error_description`, or a placeholder when absent.
		description: String,
	},
	/// The redirect receiver stopped without capturing a callback.
	#[error("Login timed out or was cancelled.")]
	LoginTimedOut,
	/// Token endpoint rejected the grant (bad code, burned refresh token).
	#[error("Provider rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// The local request budget is exhausted; nothing was sent.
	#[error("Rate limit exceeded: {max_requests} requests per {window_secs}s window.")]
	RateLimited {
		/// Configured ceiling.
		max_requests: usize,
		/// Configured window length in seconds.
		window_secs: u64,
	},
	/// The remote service throttled the call again after the single allowed retry.
	#[error("Rate limit exceeded after retry.")]
	RateLimitExceededAfterRetry,
	/// Remote API call failed with a non-success status.
	#[error("{status}: {message}")]
	Request {
		/// HTTP status code.
		status: u16,
		/// Best-effort message extracted from the response body.
		message: String,
	},
}
impl Error {
	/// Minimal actionable next step for the end caller, when one exists.
	pub fn action_required(&self) -> Option<&'static str> {
		match self {
			Self::AuthenticationRequired | Self::SessionExpired => Some(ACTION_LOGIN),
			Self::StateMismatch
			| Self::Authorization { .. }
			| Self::InvalidGrant { .. }
			| Self::Config(ConfigError::MissingClientId) => Some(ACTION_REGISTRATION),
			Self::LoginTimedOut | Self::RateLimited { .. } | Self::RateLimitExceededAfterRetry =>
				Some(ACTION_RETRY_LATER),
			_ => None,
		}
	}

	/// Returns `true` for both the local and the remote throttling condition.
	pub fn is_rate_limit(&self) -> bool {
		matches!(self, Self::RateLimited { .. } | Self::RateLimitExceededAfterRetry)
	}

	/// Returns `true` when the caller must sign in again before retrying.
	pub fn requires_login(&self) -> bool {
		matches!(self, Self::AuthenticationRequired | Self::SessionExpired)
	}

	/// HTTP status associated with the failure, when one was observed.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Request { status, .. } => Some(*status),
			Self::RateLimitExceededAfterRetry => Some(429),
			Self::SessionExpired => Some(401),
			Self::Transient(TransientError::TokenEndpoint { status, .. })
			| Self::Transient(TransientError::TokenResponseParse { status, .. }) => *status,
			_ => None,
		}
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Provider descriptor contains an invalid URL.
	#[error("Descriptor contains an invalid URL.")]
	InvalidDescriptor {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Redirect URI cannot be parsed or lacks a listenable host/port.
	#[error("Redirect URI `{uri}` is invalid: {reason}.")]
	InvalidRedirect {
		/// Offending redirect URI.
		uri: String,
		/// Why the URI was rejected.
		reason: &'static str,
	},
	/// Endpoint validation failed.
	#[error(transparent)]
	InvalidEndpoint(#[from] crate::provider::ProviderDescriptorError),
	/// The redirect receiver could not bind its listener.
	#[error("Unable to listen for the OAuth redirect on {address}.")]
	RedirectBind {
		/// Host/port pair the receiver tried to bind.
		address: String,
		/// Underlying socket failure.
		#[source]
		source: std::io::Error,
	},

	/// No client id is configured.
	#[error("AZURE_CLIENT_ID is not configured. Run the setup step first.")]
	MissingClientId,
	/// A setting could not be parsed.
	#[error("Setting `{key}` has an invalid value `{value}`.")]
	InvalidSetting {
		/// Environment key.
		key: &'static str,
		/// Raw value that failed to parse.
		value: String,
	},
	/// Caller-supplied request header is not valid HTTP.
	#[error("Header `{name}` is not a valid HTTP header.")]
	InvalidHeader {
		/// Offending header name.
		name: String,
	},
	/// Request path cannot be joined onto the API base URL.
	#[error("Request path `{path}` cannot be joined onto the API base URL.")]
	InvalidRequestPath {
		/// Offending path.
		path: String,
	},
	/// No per-user configuration directory could be resolved.
	#[error("Unable to resolve a configuration directory; set GRAPH_CONFIG_DIR.")]
	MissingConfigDir,
	/// Caller-supplied encryption key is not base64 for 32 bytes.
	#[error("Token encryption key must be base64 encoding of 32 bytes.")]
	InvalidEncryptionKey,
	/// Requested scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Token record builder validation failed.
	#[error("Unable to build token record.")]
	TokenBuild(#[from] crate::auth::TokenRecordBuilderError),
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Token endpoint returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<std::time::Duration>,
	},
	/// Token endpoint responded with JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// API response claimed success but carried a body that is not JSON.
	#[error("Graph API returned a body that is not valid JSON.")]
	ResponseParse {
		/// Decoding failure.
		#[source]
		source: serde_json::Error,
	},
}
impl TransientError {
	/// Returns `true` when the failure carries an HTTP error status (the server answered).
	pub fn is_error_response(&self) -> bool {
		match self {
			Self::TokenEndpoint { status, .. } | Self::TokenResponseParse { status, .. } =>
				status.is_some_and(|code| code >= 400),
			Self::ResponseParse { .. } => false,
		}
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {target}.")]
	Network {
		/// Which upstream was being called.
		target: &'static str,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The call exceeded the fixed transport timeout.
	#[error("Request to {target} timed out.")]
	Timeout {
		/// Which upstream was being called.
		target: &'static str,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the token endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(target: &'static str, src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { target, source: Box::new(src) }
	}

	/// Classifies a reqwest failure, separating timeouts from other network errors.
	pub fn from_reqwest(target: &'static str, e: ReqwestError) -> Self {
		if e.is_timeout() { Self::Timeout { target } } else { Self::network(target, e) }
	}
}
