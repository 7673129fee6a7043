//! Process settings resolved from the environment.
//!
//! Every key has a default except `AZURE_CLIENT_ID`, whose absence only matters once a login
//! is attempted. [`Settings::from_lookup`] takes any key lookup so tests never touch the real
//! process environment.

// std
use std::{str::FromStr, time::Duration as StdDuration};
// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	client::GRAPH_API_BASE_URL,
	error::ConfigError,
	provider::ProviderDescriptor,
	ratelimit::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW},
	store::StorePaths,
};

/// Default Microsoft identity platform authority.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
/// Default tenant segment.
pub const DEFAULT_TENANT: &str = "common";
/// Default redirect URI registered for the loopback receiver.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:3000/auth/callback";
/// Name of the per-user configuration directory under the home directory.
pub const CONFIG_DIR_NAME: &str = ".graph-mcp";

const DEFAULT_REFRESH_BUFFER_SECS: u64 = 300;
const DEFAULT_SCOPES: &[&str] = &[
	"offline_access",
	"openid",
	"profile",
	"User.Read",
	"User.ReadBasic.All",
	"Chat.Read",
	"Chat.ReadWrite",
	"ChatMessage.Send",
	"ChannelMessage.Read.All",
	"ChannelMessage.Send",
	"Team.ReadBasic.All",
	"Channel.ReadBasic.All",
	"Calendars.Read",
	"Mail.Read",
	"Mail.Send",
	"Presence.Read",
	"Presence.Read.All",
	"Presence.ReadWrite",
];

/// Resolved process settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
	/// Public client id of the app registration (`AZURE_CLIENT_ID`).
	pub client_id: String,
	/// Tenant segment (`AZURE_TENANT_ID`).
	pub tenant_id: String,
	/// Identity platform authority (`GRAPH_AUTHORITY`).
	pub authority: String,
	/// Redirect URI served by the loopback receiver (`GRAPH_REDIRECT_URI`).
	pub redirect_uri: String,
	/// Optional base64 cache key (`GRAPH_TOKEN_ENCRYPTION_KEY`).
	#[serde(skip_serializing)]
	pub encryption_key: Option<String>,
	/// Look-ahead window in seconds (`GRAPH_TOKEN_REFRESH_BUFFER`).
	pub refresh_buffer_secs: u64,
	/// Admission ceiling per window (`GRAPH_RATE_LIMIT_MAX_REQUESTS`).
	pub rate_limit_max_requests: usize,
	/// Window length in seconds (`GRAPH_RATE_LIMIT_WINDOW`).
	pub rate_limit_window_secs: u64,
	/// Verbose logging toggle (`GRAPH_DEBUG`).
	pub debug: bool,
	/// Directory holding the token cache and key (`GRAPH_CONFIG_DIR`).
	pub config_dir: Option<PathBuf>,
	/// Graph API base URL (`GRAPH_API_BASE_URL`).
	pub api_base_url: String,
}
impl Settings {
	/// Reads settings from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Reads settings through `lookup`; blank values count as unset.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let get = |key: &str| {
			lookup(key).map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
		};
		let defaults = Self::default();

		Ok(Self {
			client_id: get("AZURE_CLIENT_ID").unwrap_or(defaults.client_id),
			tenant_id: get("AZURE_TENANT_ID").unwrap_or(defaults.tenant_id),
			authority: get("GRAPH_AUTHORITY").unwrap_or(defaults.authority),
			redirect_uri: get("GRAPH_REDIRECT_URI").unwrap_or(defaults.redirect_uri),
			encryption_key: get("GRAPH_TOKEN_ENCRYPTION_KEY"),
			refresh_buffer_secs: parse_or(
				"GRAPH_TOKEN_REFRESH_BUFFER",
				get("GRAPH_TOKEN_REFRESH_BUFFER"),
				defaults.refresh_buffer_secs,
			)?,
			rate_limit_max_requests: parse_or(
				"GRAPH_RATE_LIMIT_MAX_REQUESTS",
				get("GRAPH_RATE_LIMIT_MAX_REQUESTS"),
				defaults.rate_limit_max_requests,
			)?,
			rate_limit_window_secs: parse_or(
				"GRAPH_RATE_LIMIT_WINDOW",
				get("GRAPH_RATE_LIMIT_WINDOW"),
				defaults.rate_limit_window_secs,
			)?,
			debug: match get("GRAPH_DEBUG") {
				Some(raw) => parse_bool("GRAPH_DEBUG", raw)?,
				None => defaults.debug,
			},
			config_dir: get("GRAPH_CONFIG_DIR").map(PathBuf::from),
			api_base_url: get("GRAPH_API_BASE_URL").unwrap_or(defaults.api_base_url),
		})
	}

	/// Authorization and token endpoints for the configured tenant.
	pub fn descriptor(&self) -> Result<ProviderDescriptor, ConfigError> {
		let authority = self.parse_url("GRAPH_AUTHORITY", &self.authority)?;

		Ok(ProviderDescriptor::microsoft(&authority, &self.tenant_id)?)
	}

	/// Parsed redirect URI.
	pub fn redirect_url(&self) -> Result<Url, ConfigError> {
		self.parse_url("GRAPH_REDIRECT_URI", &self.redirect_uri)
	}

	/// Parsed API base URL.
	pub fn api_base(&self) -> Result<Url, ConfigError> {
		self.parse_url("GRAPH_API_BASE_URL", &self.api_base_url)
	}

	/// Scopes requested at login.
	pub fn scopes(&self) -> Result<ScopeSet, ConfigError> {
		default_scopes()
	}

	/// Look-ahead window before expiry.
	pub fn refresh_buffer(&self) -> Duration {
		Duration::seconds(i64::try_from(self.refresh_buffer_secs).unwrap_or(i64::MAX))
	}

	/// Rate limit window.
	pub fn rate_limit_window(&self) -> StdDuration {
		StdDuration::from_secs(self.rate_limit_window_secs)
	}

	/// Resolved configuration directory: `GRAPH_CONFIG_DIR`, else `~/.graph-mcp`.
	pub fn resolve_config_dir(&self) -> Result<PathBuf, ConfigError> {
		if let Some(dir) = &self.config_dir {
			return Ok(dir.clone());
		}

		dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME)).ok_or(ConfigError::MissingConfigDir)
	}

	/// Token cache and key file locations.
	pub fn store_paths(&self) -> Result<StorePaths, ConfigError> {
		self.resolve_config_dir().map(StorePaths::in_dir)
	}

	fn parse_url(&self, key: &'static str, raw: &str) -> Result<Url, ConfigError> {
		Url::parse(raw).map_err(|_| ConfigError::InvalidSetting { key, value: raw.to_owned() })
	}
}
impl Debug for Settings {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Settings")
			.field("client_id", &self.client_id)
			.field("tenant_id", &self.tenant_id)
			.field("authority", &self.authority)
			.field("redirect_uri", &self.redirect_uri)
			.field("encryption_key_set", &self.encryption_key.is_some())
			.field("refresh_buffer_secs", &self.refresh_buffer_secs)
			.field("rate_limit_max_requests", &self.rate_limit_max_requests)
			.field("rate_limit_window_secs", &self.rate_limit_window_secs)
			.field("debug", &self.debug)
			.field("config_dir", &self.config_dir)
			.field("api_base_url", &self.api_base_url)
			.finish()
	}
}
impl Default for Settings {
	fn default() -> Self {
		Self {
			client_id: String::new(),
			tenant_id: DEFAULT_TENANT.into(),
			authority: DEFAULT_AUTHORITY.into(),
			redirect_uri: DEFAULT_REDIRECT_URI.into(),
			encryption_key: None,
			refresh_buffer_secs: DEFAULT_REFRESH_BUFFER_SECS,
			rate_limit_max_requests: DEFAULT_MAX_REQUESTS,
			rate_limit_window_secs: DEFAULT_WINDOW.as_secs(),
			debug: false,
			config_dir: None,
			api_base_url: GRAPH_API_BASE_URL.into(),
		}
	}
}

/// Delegated scopes the broker asks for at login.
pub fn default_scopes() -> Result<ScopeSet, ConfigError> {
	Ok(ScopeSet::new(DEFAULT_SCOPES.iter().copied())?)
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
	T: FromStr,
{
	match raw {
		Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidSetting { key, value: raw }),
		None => Ok(default),
	}
}

fn parse_bool(key: &'static str, raw: String) -> Result<bool, ConfigError> {
	match raw.to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		_ => Err(ConfigError::InvalidSetting { key, value: raw }),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
		let env = pairs
			.iter()
			.map(|(key, value)| (key.to_string(), value.to_string()))
			.collect::<HashMap<_, _>>();

		Settings::from_lookup(|key| env.get(key).cloned())
	}

	#[test]
	fn defaults_apply_when_nothing_is_set() {
		let settings = settings(&[]).expect("Empty environment should resolve.");

		assert_eq!(settings, Settings::default());
		assert!(settings.client_id.is_empty());
		assert_eq!(settings.refresh_buffer(), Duration::seconds(300));
		assert_eq!(settings.rate_limit_max_requests, 10_000);
		assert_eq!(settings.rate_limit_window(), StdDuration::from_secs(600));
		assert_eq!(
			settings.descriptor().expect("Default descriptor should build.").endpoints.token.as_str(),
			"https://login.microsoftonline.com/common/oauth2/v2.0/token"
		);
	}

	#[test]
	fn environment_overrides_are_parsed() {
		let settings = settings(&[
			("AZURE_CLIENT_ID", " client-123 "),
			("AZURE_TENANT_ID", "contoso.onmicrosoft.com"),
			("GRAPH_TOKEN_REFRESH_BUFFER", "60"),
			("GRAPH_RATE_LIMIT_MAX_REQUESTS", "5"),
			("GRAPH_DEBUG", "true"),
			("GRAPH_CONFIG_DIR", "/tmp/graph"),
			("GRAPH_TOKEN_ENCRYPTION_KEY", ""),
		])
		.expect("Overrides should resolve.");

		assert_eq!(settings.client_id, "client-123");
		assert_eq!(settings.refresh_buffer(), Duration::seconds(60));
		assert_eq!(settings.rate_limit_max_requests, 5);
		assert!(settings.debug);
		assert_eq!(settings.encryption_key, None);
		assert_eq!(
			settings.store_paths().expect("Paths should resolve.").token_file,
			PathBuf::from("/tmp/graph/tokens.enc")
		);
		assert!(
			settings
				.descriptor()
				.expect("Tenant descriptor should build.")
				.endpoints
				.authorization
				.as_str()
				.contains("/contoso.onmicrosoft.com/oauth2/v2.0/authorize")
		);
	}

	#[test]
	fn malformed_numbers_and_flags_are_rejected() {
		assert!(matches!(
			settings(&[("GRAPH_RATE_LIMIT_WINDOW", "ten")]),
			Err(ConfigError::InvalidSetting { key: "GRAPH_RATE_LIMIT_WINDOW", .. })
		));
		assert!(matches!(
			settings(&[("GRAPH_DEBUG", "maybe")]),
			Err(ConfigError::InvalidSetting { key: "GRAPH_DEBUG", .. })
		));
	}

	#[test]
	fn default_scopes_request_offline_access() {
		let scopes = default_scopes().expect("Built-in scopes should be valid.");

		assert!(scopes.contains("offline_access"));
		assert!(scopes.contains("Presence.ReadWrite"));
		assert_eq!(scopes.len(), DEFAULT_SCOPES.len());
	}
}
