//! Provider descriptor data structures shared by the login and refresh flows.

/// Builder API for assembling provider descriptors.
pub mod builder;

pub use builder::*;

// self
use crate::_prelude::*;

/// OAuth 2.0 grant types the coordinator performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
	/// Authorization Code grant with PKCE.
	AuthorizationCode,
	/// Refresh Token grant for long-lived sessions.
	RefreshToken,
}
impl GrantType {
	/// Returns the RFC 6749 identifier for the grant type.
	pub fn as_str(self) -> &'static str {
		match self {
			GrantType::AuthorizationCode => "authorization_code",
			GrantType::RefreshToken => "refresh_token",
		}
	}
}
impl Display for GrantType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Endpoint set declared by a provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Authorization endpoint the browser is sent to.
	pub authorization: Url,
	/// Token endpoint used for exchanges and refreshes.
	pub token: Url,
}

/// Immutable provider descriptor consumed by flows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Endpoint definitions exposed by the provider.
	pub endpoints: ProviderEndpoints,
}
impl ProviderDescriptor {
	/// Creates a new builder.
	pub fn builder() -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::default()
	}

	/// Microsoft identity platform v2.0 endpoints for `tenant` under `authority`.
	///
	/// `tenant` may be a directory id, a verified domain, or one of `common`, `organizations`,
	/// `consumers`.
	pub fn microsoft(authority: &Url, tenant: &str) -> Result<Self, ProviderDescriptorError> {
		if tenant.is_empty() || tenant.contains(['/', '?', '#']) || tenant.contains(char::is_whitespace)
		{
			return Err(ProviderDescriptorError::InvalidTenant { tenant: tenant.to_owned() });
		}

		let base = authority.as_str().trim_end_matches('/');

		Self::builder()
			.authorization_endpoint(endpoint_url(
				"authorization",
				format!("{base}/{tenant}/oauth2/v2.0/authorize"),
			)?)
			.token_endpoint(endpoint_url("token", format!("{base}/{tenant}/oauth2/v2.0/token"))?)
			.build()
	}
}

fn endpoint_url(endpoint: &'static str, raw: String) -> Result<Url, ProviderDescriptorError> {
	Url::parse(&raw).map_err(|_| ProviderDescriptorError::MalformedEndpoint { endpoint, url: raw })
}
