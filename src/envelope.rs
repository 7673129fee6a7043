//! Uniform success/error envelopes for agent-facing operations.
//!
//! [`guarded`] wraps any fallible operation so callers never see a raw [`Error`]: failures
//! become `{"error", "action_required"?}` and results become `{"data", "message"}`.

// crates.io
use serde_json::Value;
// self
use crate::_prelude::*;

const SUCCESS: &str = "success";
const GRAPH_ERROR_PREFIX: &str = "Graph API error: ";
const UNEXPECTED_ERROR_PREFIX: &str = "Unexpected error: ";

/// Rendered outcome of one operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResponse {
	/// Successful result.
	Success {
		/// Operation payload.
		data: Value,
		/// Short status message.
		message: String,
	},
	/// Failed result.
	Failure {
		/// Human-readable failure.
		error: String,
		/// Next step for the caller, when one exists.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		action_required: Option<String>,
	},
}
impl ToolResponse {
	/// Wraps `data` with the default `success` message.
	pub fn success(data: impl Serialize) -> Self {
		Self::with_message(data, SUCCESS)
	}

	/// Wraps `data` with a custom message.
	pub fn with_message(data: impl Serialize, message: impl Into<String>) -> Self {
		match serde_json::to_value(data) {
			Ok(data) => Self::Success { data, message: message.into() },
			Err(e) => Self::failure(format!("{UNEXPECTED_ERROR_PREFIX}{e}"), None),
		}
	}

	/// Builds a failure envelope.
	pub fn failure(error: impl Into<String>, action_required: Option<&str>) -> Self {
		Self::Failure { error: error.into(), action_required: action_required.map(Into::into) }
	}

	/// Translates a crate error into its envelope.
	///
	/// Credential failures carry the login hint; remote API and throttling failures are prefixed
	/// as Graph API errors; anything else is reported as unexpected.
	pub fn from_error(error: &Error) -> Self {
		if error.requires_login() {
			return Self::failure(error.to_string(), error.action_required());
		}

		match error {
			Error::Request { .. } | Error::RateLimited { .. } | Error::RateLimitExceededAfterRetry =>
				Self::failure(format!("{GRAPH_ERROR_PREFIX}{error}"), error.action_required()),
			_ => Self::failure(format!("{UNEXPECTED_ERROR_PREFIX}{error}"), error.action_required()),
		}
	}

	/// Returns `true` for [`ToolResponse::Success`].
	pub fn is_success(&self) -> bool {
		matches!(self, Self::Success { .. })
	}

	/// Compact JSON rendering.
	pub fn to_json_string(&self) -> String {
		serde_json::to_string(self).unwrap_or_else(|e| {
			format!(r#"{{"error":"{UNEXPECTED_ERROR_PREFIX}{}"}}"#, e.to_string().replace('"', "'"))
		})
	}
}
impl Display for ToolResponse {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.to_json_string())
	}
}

/// Runs `operation` and renders its outcome as an envelope.
pub async fn guarded<F, T>(operation: F) -> ToolResponse
where
	F: Future<Output = Result<T>>,
	T: Serialize,
{
	match operation.await {
		Ok(data) => ToolResponse::success(data),
		Err(e) => {
			tracing::debug!(error = %e, "Operation failed.");

			ToolResponse::from_error(&e)
		},
	}
}
