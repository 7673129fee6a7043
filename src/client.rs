//! Request pipeline: rate limiting, credential attachment, and one-shot recovery branches.
//!
//! [`GraphClient::execute`] admits the call through the [`RateLimiter`], attaches a bearer
//! credential from the [`AuthCoordinator`], and recovers at most once from each of two
//! conditions: a 429 (server-guided backoff, then retry) and a 401 (forced refresh, then retry).

// std
use std::time::Duration as StdDuration;
// crates.io
use reqwest::Method;
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::{ConfigError, TransientError},
	flows::AuthCoordinator,
	http::{
		ReqwestHttpClient, TokenHttpClient,
		api::{ApiRequest, ApiResponse, ApiTransport, ReqwestApiTransport},
	},
	oauth::{ReqwestTransportErrorMapper, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	ratelimit::RateLimiter,
};

/// Production Graph API base URL.
pub const GRAPH_API_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

const MAX_ERROR_BODY_CHARS: usize = 256;
const STATUS_TOO_MANY_REQUESTS: u16 = 429;
const STATUS_UNAUTHORIZED: u16 = 401;
const STATUS_NO_CONTENT: u16 = 204;

/// One logical API operation.
#[derive(Clone, Debug)]
pub struct ApiCall {
	/// HTTP method.
	pub method: Method,
	/// Path relative to the API base URL, with or without a leading slash.
	pub path: String,
	/// Query parameters.
	pub query: Vec<(String, String)>,
	/// Optional JSON body.
	pub body: Option<Value>,
	/// Extra request headers.
	pub headers: Vec<(String, String)>,
}
impl ApiCall {
	/// Creates a call with no query, body, or extra headers.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self { method, path: path.into(), query: Vec::new(), body: None, headers: Vec::new() }
	}

	/// Appends a query parameter.
	pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Sets the JSON body.
	pub fn body(mut self, body: Value) -> Self {
		self.body = Some(body);

		self
	}

	/// Appends a request header.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}
}

/// Graph API client sharing one coordinator and one limiter across all operations.
pub struct GraphClient<
	T = ReqwestApiTransport,
	C = ReqwestHttpClient,
	M = ReqwestTransportErrorMapper,
> where
	T: ApiTransport,
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	base: Url,
	auth: Arc<AuthCoordinator<C, M>>,
	limiter: Arc<RateLimiter>,
	transport: T,
}
impl<T, C, M> GraphClient<T, C, M>
where
	T: ApiTransport,
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client rooted at `base` (e.g. [`GRAPH_API_BASE_URL`]).
	pub fn new(
		base: Url,
		auth: Arc<AuthCoordinator<C, M>>,
		limiter: Arc<RateLimiter>,
		transport: T,
	) -> Self {
		Self { base, auth, limiter, transport }
	}

	/// API base URL.
	pub fn base(&self) -> &Url {
		&self.base
	}

	/// Coordinator supplying credentials.
	pub fn auth(&self) -> &Arc<AuthCoordinator<C, M>> {
		&self.auth
	}

	/// Limiter gating every call.
	pub fn limiter(&self) -> &Arc<RateLimiter> {
		&self.limiter
	}

	/// `GET path`.
	pub async fn get(&self, path: &str) -> Result<Value> {
		self.execute(ApiCall::new(Method::GET, path)).await
	}

	/// `POST path` with a JSON body.
	pub async fn post(&self, path: &str, body: Value) -> Result<Value> {
		self.execute(ApiCall::new(Method::POST, path).body(body)).await
	}

	/// `PATCH path` with a JSON body.
	pub async fn patch(&self, path: &str, body: Value) -> Result<Value> {
		self.execute(ApiCall::new(Method::PATCH, path).body(body)).await
	}

	/// `DELETE path`.
	pub async fn delete(&self, path: &str) -> Result<Value> {
		self.execute(ApiCall::new(Method::DELETE, path)).await
	}

	/// Executes `call` under the shared rate-limit and credential policy.
	///
	/// Returns [`Value::Null`] for 204 and empty bodies, otherwise the parsed JSON body.
	pub async fn execute(&self, call: ApiCall) -> Result<Value> {
		const KIND: FlowKind = FlowKind::Request;

		let span = FlowSpan::new(KIND, "execute");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.execute_inner(call)).await;

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		result
	}

	async fn execute_inner(&self, call: ApiCall) -> Result<Value> {
		self.limiter.acquire().await?;

		let url = self.resolve(&call.path)?;
		let mut token = self.auth.get_valid_access_token().await?;
		let mut response = self.send(&call, &url, &token).await?;

		if response.status == STATUS_TOO_MANY_REQUESTS {
			let delay = self.limiter.handle_429(response.retry_after);

			tracing::warn!(delay_ms = delay.as_millis() as u64, "Throttled; retrying once.");
			sleep(delay).await;

			token = self.auth.get_valid_access_token().await?;
			response = self.send(&call, &url, &token).await?;

			if response.status == STATUS_TOO_MANY_REQUESTS {
				return Err(Error::RateLimitExceededAfterRetry);
			}
		}
		if response.status == STATUS_UNAUTHORIZED {
			tracing::debug!("Credential rejected; forcing a refresh.");

			if let Err(e) = self.auth.refresh_rejected(&token).await {
				tracing::debug!(error = %e, "Forced refresh failed.");

				return Err(Error::SessionExpired);
			}

			token = self.auth.store.access_token().ok_or(Error::SessionExpired)?;
			response = self.send(&call, &url, &token).await?;

			if response.status == STATUS_UNAUTHORIZED {
				return Err(Error::SessionExpired);
			}
		}

		if !response.is_success() {
			return Err(request_error(&response));
		}

		self.limiter.reset_backoff();

		decode_body(response)
	}

	async fn send(&self, call: &ApiCall, url: &Url, token: &TokenSecret) -> Result<ApiResponse> {
		self.transport
			.send(ApiRequest {
				method: call.method.clone(),
				url: url.clone(),
				query: call.query.clone(),
				body: call.body.clone(),
				headers: call.headers.clone(),
				bearer: token.clone(),
			})
			.await
	}

	fn resolve(&self, path: &str) -> Result<Url> {
		let base = self.base.as_str().trim_end_matches('/');
		let path = path.trim_start_matches('/');
		let raw = format!("{base}/{path}");

		Url::parse(&raw)
			.map_err(|_| ConfigError::InvalidRequestPath { path: path.to_owned() }.into())
	}
}
impl<T, C, M> Debug for GraphClient<T, C, M>
where
	T: ApiTransport,
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("GraphClient")
			.field("base", &self.base.as_str())
			.field("limiter", &self.limiter)
			.finish()
	}
}

async fn sleep(delay: StdDuration) {
	if !delay.is_zero() {
		tokio::time::sleep(delay).await;
	}
}

fn request_error(response: &ApiResponse) -> Error {
	Error::Request { status: response.status, message: error_message(&response.body) }
}

/// Prefers Graph's `error.message`, then `error` as a string, then the truncated raw body.
fn error_message(body: &[u8]) -> String {
	if let Ok(value) = serde_json::from_slice::<Value>(body) {
		let error = value.get("error");
		let message = error
			.and_then(|error| error.get("message"))
			.and_then(Value::as_str)
			.or_else(|| error.and_then(Value::as_str));

		if let Some(message) = message {
			return message.to_owned();
		}
	}

	let text = String::from_utf8_lossy(body);
	let text = text.trim();

	if text.is_empty() {
		return "Empty response body".into();
	}

	text.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

fn decode_body(response: ApiResponse) -> Result<Value> {
	if response.status == STATUS_NO_CONTENT || response.body.iter().all(u8::is_ascii_whitespace) {
		return Ok(Value::Null);
	}

	serde_json::from_slice(&response.body)
		.map_err(|source| TransientError::ResponseParse { source }.into())
}
