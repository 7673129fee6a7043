//! Authenticated transport seam for Graph API calls.
//!
//! The request pipeline builds an [`ApiRequest`] per attempt and inspects the raw
//! [`ApiResponse`]; status handling and retries stay in the pipeline so transports only move
//! bytes.

// std
use std::time::Duration as StdDuration;
// crates.io
use reqwest::{
	Method,
	header::{ACCEPT, AUTHORIZATION, HeaderName, HeaderValue},
	redirect::Policy,
};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::{ConfigError, TransportError},
	http::{self, TRANSPORT_TIMEOUT},
};

const API_TARGET: &str = "the Graph API";

/// Boxed future returned by [`ApiTransport::send`].
pub type ApiFuture<'a> = Pin<Box<dyn Future<Output = Result<ApiResponse>> + 'a + Send>>;

/// One fully-resolved HTTP attempt.
#[derive(Clone, Debug)]
pub struct ApiRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute URL, without query.
	pub url: Url,
	/// Query parameters appended to `url`.
	pub query: Vec<(String, String)>,
	/// Optional JSON body.
	pub body: Option<serde_json::Value>,
	/// Extra headers; `Authorization` is always taken from `bearer`.
	pub headers: Vec<(String, String)>,
	/// Credential attached to the attempt.
	pub bearer: TokenSecret,
}

/// Raw outcome of an attempt.
#[derive(Clone, Debug)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Parsed `Retry-After` hint.
	pub retry_after: Option<StdDuration>,
	/// Response body bytes.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

/// Executes API attempts against the remote service.
pub trait ApiTransport
where
	Self: 'static + Send + Sync,
{
	/// Sends `request` and returns whatever the server answered.
	///
	/// Only failures to obtain a response (DNS, TCP, TLS, timeout) are errors; non-2xx statuses
	/// are returned as [`ApiResponse`] values.
	fn send(&self, request: ApiRequest) -> ApiFuture<'_>;
}

/// Reqwest-backed [`ApiTransport`] with a fixed [`TRANSPORT_TIMEOUT`].
#[derive(Clone)]
pub struct ReqwestApiTransport(ReqwestClient);
impl ReqwestApiTransport {
	/// Builds the default transport.
	pub fn new() -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder()
			.redirect(Policy::limited(5))
			.timeout(TRANSPORT_TIMEOUT)
			.build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse> {
		let mut builder = self
			.0
			.request(request.method, request.url)
			.header(ACCEPT, "application/json")
			.header(AUTHORIZATION, request.bearer.bearer_header());

		if !request.query.is_empty() {
			builder = builder.query(&request.query);
		}

		for (name, value) in &request.headers {
			let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid_header(name))?;
			let value = HeaderValue::from_str(value).map_err(|_| invalid_header(name.as_str()))?;

			if name == AUTHORIZATION {
				continue;
			}

			builder = builder.header(name, value);
		}

		if let Some(body) = &request.body {
			builder = builder.json(body);
		}

		let response =
			builder.send().await.map_err(|e| TransportError::from_reqwest(API_TARGET, e))?;
		let status = response.status().as_u16();
		let retry_after = http::parse_retry_after(response.headers());
		let body = response
			.bytes()
			.await
			.map_err(|e| TransportError::from_reqwest(API_TARGET, e))?
			.to_vec();

		Ok(ApiResponse { status, retry_after, body })
	}
}
impl Debug for ReqwestApiTransport {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ReqwestApiTransport(..)")
	}
}
impl ApiTransport for ReqwestApiTransport {
	fn send(&self, request: ApiRequest) -> ApiFuture<'_> {
		Box::pin(self.dispatch(request))
	}
}

fn invalid_header(name: &str) -> Error {
	ConfigError::InvalidHeader { name: name.to_owned() }.into()
}
