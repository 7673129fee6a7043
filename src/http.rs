//! Transport primitives for token exchanges and API calls.
//!
//! [`TokenHttpClient`] is the token endpoint's only dependency on an HTTP stack: it hands the
//! `oauth2` facade short-lived [`AsyncHttpClient`] handles that publish status and Retry-After
//! hints into a [`ResponseMetadataSlot`] so failures can be classified after `oauth2` resolves.
//! [`api`] holds the equivalent seam for Graph API calls.

pub mod api;

// std
use std::{ops::Deref, time::Duration as StdDuration};
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
use reqwest::{
	header::{HeaderMap, RETRY_AFTER},
	redirect::Policy,
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::ConfigError};

/// Fixed network timeout applied to every outbound call.
pub const TRANSPORT_TIMEOUT: StdDuration = StdDuration::from_secs(30);
/// Upper bound applied to server-supplied `Retry-After` hints.
pub const MAX_RETRY_AFTER: StdDuration = StdDuration::from_secs(3600);

/// Abstraction over HTTP transports capable of executing token exchanges while publishing
/// response metadata.
///
/// Implementations must be `Send + Sync + 'static`, and the handles they return must own
/// whatever state their request futures need so those futures stay `Send`.
pub trait TokenHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// [`AsyncHttpClient`] handle tied to a [`ResponseMetadataSlot`].
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Builds an [`AsyncHttpClient`] handle that records outcomes in `slot`.
	///
	/// Handles call [`ResponseMetadataSlot::take`] before submitting a request and
	/// [`ResponseMetadataSlot::store`] once a status is known.
	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle;
}

/// Captures metadata from the most recent HTTP response for downstream error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the token endpoint, if available.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<StdDuration>,
}

/// Thread-safe slot for sharing [`ResponseMetadata`] between transport and error layers.
///
/// A fresh slot is created for each token request and read immediately after `oauth2` resolves.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Reqwest client used for the token endpoint.
///
/// Token endpoints answer directly, so the client never follows redirects. Custom clients passed
/// to [`with_client`](Self::with_client) should be configured the same way.
#[derive(Clone)]
pub struct ReqwestHttpClient(pub ReqwestClient);
impl ReqwestHttpClient {
	/// Builds the default client: no redirects, [`TRANSPORT_TIMEOUT`].
	pub fn new() -> Result<Self, ConfigError> {
		let client =
			ReqwestClient::builder().redirect(Policy::none()).timeout(TRANSPORT_TIMEOUT).build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	pub(crate) fn instrumented(&self, slot: ResponseMetadataSlot) -> InstrumentedHandle {
		InstrumentedHandle::new(self.0.clone(), slot)
	}
}
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl Debug for ReqwestHttpClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ReqwestHttpClient(..)")
	}
}
impl TokenHttpClient for ReqwestHttpClient {
	type Handle = InstrumentedHandle;
	type TransportError = ReqwestError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		self.instrumented(slot)
	}
}

struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}

/// Handle returned by [`ReqwestHttpClient`] that satisfies [`TokenHttpClient`].
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
impl InstrumentedHandle {
	fn new(client: ReqwestClient, slot: ResponseMetadataSlot) -> Self {
		Self(Arc::new(InstrumentedHttpClient { client, slot }))
	}
}
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = Arc::clone(&self.0);

		Box::pin(async move {
			client.slot.take();

			let response = client
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().to_owned();
			let retry_after = parse_retry_after(&headers);

			client.slot.store(ResponseMetadata { status: Some(status.as_u16()), retry_after });

			let mut response_new =
				HttpResponse::new(response.bytes().await.map_err(Box::new)?.to_vec());

			*response_new.status_mut() = status;
			*response_new.headers_mut() = headers;

			Ok(response_new)
		})
	}
}

/// Reads `Retry-After` as delta-seconds (integer or fractional) or an HTTP date.
///
/// Zero, negative, past, and unparsable values all count as "no hint". Hints are clamped to
/// [`MAX_RETRY_AFTER`].
pub fn parse_retry_after(headers: &HeaderMap) -> Option<StdDuration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	parse_retry_after_value(raw)
		.filter(|delay| !delay.is_zero())
		.map(|delay| delay.min(MAX_RETRY_AFTER))
}

fn parse_retry_after_value(raw: &str) -> Option<StdDuration> {
	if let Ok(secs) = raw.parse::<u64>() {
		return Some(StdDuration::from_secs(secs));
	}
	if let Ok(secs) = raw.parse::<f64>() {
		if secs.is_nan() || secs <= 0. {
			return None;
		}

		return Some(StdDuration::try_from_secs_f64(secs).unwrap_or(MAX_RETRY_AFTER));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return StdDuration::try_from(delta).ok();
		}
	}

	None
}

#[cfg(test)]
mod tests {
	// crates.io
	use reqwest::header::HeaderValue;
	// self
	use super::*;

	fn retry_after(raw: &str) -> Option<StdDuration> {
		let mut headers = HeaderMap::new();

		headers.insert(RETRY_AFTER, HeaderValue::from_str(raw).expect("Header fixture should be valid."));

		parse_retry_after(&headers)
	}

	#[test]
	fn retry_after_accepts_seconds_and_http_dates() {
		assert_eq!(retry_after("7"), Some(StdDuration::from_secs(7)));
		assert_eq!(retry_after("1.5"), Some(StdDuration::from_millis(1500)));

		let future = (OffsetDateTime::now_utc() + Duration::minutes(2))
			.format(&Rfc2822)
			.expect("Future date should format.");
		let parsed = retry_after(&future).expect("Future HTTP date should yield a delay.");

		assert!(parsed > StdDuration::from_secs(60) && parsed <= StdDuration::from_secs(120));
	}

	#[test]
	fn retry_after_ignores_zero_past_and_garbage() {
		assert_eq!(retry_after("0"), None);
		assert_eq!(retry_after("-3"), None);
		assert_eq!(retry_after("soon"), None);
		assert_eq!(retry_after("Mon, 01 Jan 2001 00:00:00 +0000"), None);
		assert_eq!(parse_retry_after(&HeaderMap::new()), None);
		assert_eq!(retry_after("NaN"), None);
	}

	#[test]
	fn oversized_retry_after_hints_are_clamped() {
		assert_eq!(retry_after("1e30"), Some(MAX_RETRY_AFTER));
		assert_eq!(retry_after("inf"), Some(MAX_RETRY_AFTER));
		assert_eq!(retry_after("18446744073709551615"), Some(MAX_RETRY_AFTER));
		assert_eq!(retry_after("3601"), Some(MAX_RETRY_AFTER));
		assert_eq!(retry_after("120"), Some(StdDuration::from_secs(120)));
	}
}
