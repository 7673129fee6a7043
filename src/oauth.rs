//! Internal OAuth client facade over the token endpoint.

pub use oauth2;

// std
use std::time::Duration as StdDuration;
// crates.io
use oauth2::{
	AuthType, AuthUrl, AuthorizationCode, ClientId, EndpointNotSet, EndpointSet, HttpClientError,
	PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse,
	TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError},
};
// self
use crate::{
	_prelude::*,
	auth::{
		DEFAULT_TOKEN_LIFETIME, ScopeSet, TokenRecord, TokenRecordBuilderError, TokenSecret,
	},
	error::{ConfigError, TransientError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	provider::{GrantType, ProviderDescriptor},
};

const TOKEN_ENDPOINT: &str = "the token endpoint";

type ConfiguredBasicClient =
	BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;
type FacadeTokenResponse = oauth2::basic::BasicTokenResponse;
type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a crate error.
	fn map_transport_error(
		&self,
		grant: GrantType,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		grant: GrantType,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(grant, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => map_generic_transport_error(meta, message),
			_ => map_unknown_transport_error(meta),
		}
	}
}

/// Token endpoint operations the coordinator needs.
pub(crate) trait OAuth2Facade {
	fn exchange_authorization_code<'a, 'code, 'pkce, 'scope>(
		&'a self,
		code: &'code str,
		pkce_verifier: &'pkce str,
		requested_scope: &'scope ScopeSet,
	) -> FacadeFuture<'a, TokenRecord>
	where
		'code: 'a,
		'pkce: 'a,
		'scope: 'a;

	fn refresh_token<'a, 'refresh, 'scope>(
		&'a self,
		refresh_token: &'refresh TokenSecret,
		requested_scope: &'scope ScopeSet,
	) -> FacadeFuture<'a, TokenRecord>
	where
		'refresh: 'a,
		'scope: 'a;
}

/// Public-client facade: `client_id` travels in the request body and PKCE replaces a secret.
pub(crate) struct BasicFacade<'h, C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredBasicClient,
	http_client: &'h C,
	error_mapper: &'h M,
}
impl<'h, C, M> BasicFacade<'h, C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) fn from_descriptor(
		descriptor: &ProviderDescriptor,
		client_id: &str,
		redirect_uri: &Url,
		http_client: &'h C,
		error_mapper: &'h M,
	) -> Result<Self> {
		let auth_url = AuthUrl::new(descriptor.endpoints.authorization.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let token_url = TokenUrl::new(descriptor.endpoints.token.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let redirect_url = RedirectUrl::new(redirect_uri.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let oauth_client = BasicClient::new(ClientId::new(client_id.to_owned()))
			.set_auth_uri(auth_url)
			.set_token_uri(token_url)
			.set_redirect_uri(redirect_url)
			.set_auth_type(AuthType::RequestBody);

		Ok(Self { oauth_client, http_client, error_mapper })
	}
}
impl<C, M> OAuth2Facade for BasicFacade<'_, C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn exchange_authorization_code<'a, 'code, 'pkce, 'scope>(
		&'a self,
		code: &'code str,
		pkce_verifier: &'pkce str,
		requested_scope: &'scope ScopeSet,
	) -> FacadeFuture<'a, TokenRecord>
	where
		'code: 'a,
		'pkce: 'a,
		'scope: 'a,
	{
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.with_metadata(meta.clone());
			let mut request = self
				.oauth_client
				.exchange_code(AuthorizationCode::new(code.to_owned()))
				.set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_owned()));

			if !requested_scope.is_empty() {
				request = request.add_extra_param("scope", requested_scope.normalized());
			}

			let response = request.request_async(&instrumented).await.map_err(|err| {
				map_request_error(
					GrantType::AuthorizationCode,
					meta.take(),
					err,
					self.error_mapper,
				)
			})?;

			map_token_response(requested_scope, response, None)
		})
	}

	fn refresh_token<'a, 'refresh, 'scope>(
		&'a self,
		refresh_token: &'refresh TokenSecret,
		requested_scope: &'scope ScopeSet,
	) -> FacadeFuture<'a, TokenRecord>
	where
		'refresh: 'a,
		'scope: 'a,
	{
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.with_metadata(meta.clone());
			let refresh_secret = RefreshToken::new(refresh_token.expose().to_owned());
			let mut request = self.oauth_client.exchange_refresh_token(&refresh_secret);

			for scope in requested_scope.iter() {
				request = request.add_scope(Scope::new(scope.to_owned()));
			}

			let response = request.request_async(&instrumented).await.map_err(|err| {
				map_request_error(GrantType::RefreshToken, meta.take(), err, self.error_mapper)
			})?;

			map_token_response(requested_scope, response, Some(refresh_token))
		})
	}
}

/// Normalizes a token response into a record with an absolute expiry.
///
/// A missing `expires_in` defaults to [`DEFAULT_TOKEN_LIFETIME`]. On refresh, `previous_refresh`
/// is carried over when the issuer does not rotate the refresh token.
fn map_token_response(
	requested_scope: &ScopeSet,
	response: FacadeTokenResponse,
	previous_refresh: Option<&TokenSecret>,
) -> Result<TokenRecord> {
	let lifetime = match response.expires_in() {
		Some(expires_in) => expires_in_to_duration(expires_in)?,
		None => DEFAULT_TOKEN_LIFETIME,
	};
	let scope = match response.scopes() {
		Some(scopes) if !scopes.is_empty() =>
			scopes.iter().map(|scope| scope.as_str()).collect::<Vec<_>>().join(" "),
		_ => requested_scope.normalized(),
	};
	let refresh = response
		.refresh_token()
		.map(|token| TokenSecret::new(token.secret().to_owned()))
		.or_else(|| previous_refresh.cloned());

	TokenRecord::builder()
		.access_token(response.access_token().secret().to_owned())
		.refresh_secret(refresh)
		.scope(scope)
		.issued_now()
		.expires_in(lifetime)
		.build()
		.map_err(|err| match err {
			TokenRecordBuilderError::ExpiryOutOfRange => ConfigError::ExpiresInOutOfRange.into(),
			err => ConfigError::from(err).into(),
		})
}

fn expires_in_to_duration(expires_in: StdDuration) -> Result<Duration> {
	let secs = i64::try_from(expires_in.as_secs()).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

	if secs <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	Ok(Duration::seconds(secs))
}

fn map_request_error<E, M>(
	grant: GrantType,
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
	mapper: &M,
) -> Error
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let meta_ref = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) => map_server_response_error(grant, response),
		RequestTokenError::Request(error) => mapper.map_transport_error(grant, meta_ref, error),
		RequestTokenError::Parse(error, _body) =>
			TransientError::TokenResponseParse { source: error, status: meta_status(meta_ref) }
				.into(),
		RequestTokenError::Other(message) => TransientError::TokenEndpoint {
			message,
			status: meta_status(meta_ref),
			retry_after: meta_retry_after(meta_ref),
		}
		.into(),
	}
}

fn map_server_response_error(grant: GrantType, response: BasicErrorResponse) -> Error {
	let detail = response
		.error_description()
		.cloned()
		.unwrap_or_else(|| response.error().as_ref().to_owned());
	let reason = match grant {
		GrantType::AuthorizationCode => format!("Token exchange failed: {detail}"),
		GrantType::RefreshToken => format!("Refresh token was rejected: {detail}"),
	};

	Error::InvalidGrant { reason }
}

fn map_reqwest_error(grant: GrantType, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}

	tracing::debug!(grant = grant.as_str(), error = %err, "Token endpoint transport failure.");

	TransportError::from_reqwest(TOKEN_ENDPOINT, err).into()
}

fn map_generic_transport_error(meta: Option<&ResponseMetadata>, message: impl Display) -> Error {
	TransientError::TokenEndpoint {
		message: format!("HTTP client error occurred while calling the token endpoint: {message}"),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

fn map_unknown_transport_error(meta: Option<&ResponseMetadata>) -> Error {
	TransientError::TokenEndpoint {
		message: "HTTP client error occurred while calling the token endpoint".into(),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<StdDuration> {
	meta.and_then(|value| value.retry_after)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::http::ReqwestHttpClient;

	fn token_response(json: serde_json::Value) -> FacadeTokenResponse {
		serde_json::from_value(json).expect("Token response fixture should deserialize.")
	}

	fn scope() -> ScopeSet {
		ScopeSet::new(["offline_access", "User.Read"]).expect("Scope fixture should be valid.")
	}

	#[test]
	fn builds_public_client_facade() {
		let descriptor = ProviderDescriptor::builder()
			.authorization_endpoint(
				Url::parse("https://example.com/oauth2/authorize")
					.expect("Failed to parse authorization endpoint URL."),
			)
			.token_endpoint(
				Url::parse("https://example.com/oauth2/token")
					.expect("Failed to parse token endpoint URL."),
			)
			.build()
			.expect("Failed to build provider descriptor.");
		let redirect =
			Url::parse("http://localhost:3000/auth/callback").expect("Failed to parse redirect.");
		let http_client = ReqwestHttpClient::new().expect("Reqwest client should build.");
		let mapper = ReqwestTransportErrorMapper;
		let result = <BasicFacade<ReqwestHttpClient, ReqwestTransportErrorMapper>>::from_descriptor(
			&descriptor,
			"client-id",
			&redirect,
			&http_client,
			&mapper,
		);

		assert!(result.is_ok());
	}

	#[test]
	fn missing_lifetime_and_scope_fall_back_to_defaults() {
		let response = token_response(serde_json::json!({
			"access_token": "access",
			"token_type": "Bearer"
		}));
		let before = OffsetDateTime::now_utc();
		let record = map_token_response(&scope(), response, None)
			.expect("Minimal token response should normalize.");

		assert_eq!(record.scope, "offline_access User.Read");
		assert!(record.expires_at >= before + DEFAULT_TOKEN_LIFETIME - Duration::seconds(1));
		assert!(record.refresh_token.is_none());
	}

	#[test]
	fn refresh_keeps_the_previous_refresh_token_unless_rotated() {
		let previous = TokenSecret::new("refresh-old");
		let unrotated = token_response(serde_json::json!({
			"access_token": "access-2",
			"token_type": "bearer",
			"expires_in": 1200,
			"scope": "User.Read"
		}));
		let record = map_token_response(&scope(), unrotated, Some(&previous))
			.expect("Refresh response should normalize.");

		assert_eq!(record.refresh_token, Some(previous.clone()));
		assert_eq!(record.scope, "User.Read");

		let rotated = token_response(serde_json::json!({
			"access_token": "access-3",
			"token_type": "Bearer",
			"expires_in": 1200,
			"refresh_token": "refresh-new"
		}));
		let record = map_token_response(&scope(), rotated, Some(&previous))
			.expect("Rotated refresh response should normalize.");

		assert_eq!(record.refresh_token.as_ref().map(TokenSecret::expose), Some("refresh-new"));
	}

	#[test]
	fn zero_lifetimes_are_rejected() {
		let response = token_response(serde_json::json!({
			"access_token": "access",
			"token_type": "Bearer",
			"expires_in": 0
		}));

		assert!(matches!(
			map_token_response(&scope(), response, None),
			Err(Error::Config(ConfigError::NonPositiveExpiresIn))
		));
	}

	#[test]
	fn lifetimes_past_the_calendar_range_are_rejected() {
		let response = token_response(serde_json::json!({
			"access_token": "access",
			"token_type": "Bearer",
			"expires_in": 9_000_000_000_000_000_u64
		}));

		assert!(matches!(
			map_token_response(&scope(), response, None),
			Err(Error::Config(ConfigError::ExpiresInOutOfRange))
		));
	}
}
