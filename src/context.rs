//! One owned context wiring the store, coordinator, limiter, and client from [`Settings`].
//!
//! Embedders hold a single [`GraphContext`] for the life of the process; tests build isolated
//! ones over in-memory stores.

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	client::GraphClient,
	config::Settings,
	envelope::ToolResponse,
	error::ConfigError,
	flows::{AuthCoordinator, AuthStatus},
	http::{ReqwestHttpClient, api::ReqwestApiTransport},
	ratelimit::RateLimiter,
	store::TokenStore,
};

const LOGGED_IN: &str = "Successfully logged in to Microsoft 365.";
const LOGGED_OUT: &str = "Successfully logged out.";

/// Shared components for one signed-in installation.
#[derive(Debug)]
pub struct GraphContext {
	/// Settings the context was built from.
	pub settings: Settings,
	/// Credential store.
	pub store: Arc<TokenStore>,
	/// Credential lifecycle owner.
	pub auth: Arc<AuthCoordinator>,
	/// Process-wide request budget.
	pub limiter: Arc<RateLimiter>,
	/// Request pipeline.
	pub client: GraphClient,
}
impl GraphContext {
	/// Builds the context, configuring the on-disk store under the resolved config directory.
	pub fn from_settings(settings: Settings) -> Result<Self, ConfigError> {
		let store = TokenStore::new(settings.store_paths()?);

		store.configure(settings.encryption_key.as_deref())?;

		Self::with_store(settings, Arc::new(store))
	}

	/// Builds the context around an already configured store.
	pub fn with_store(settings: Settings, store: Arc<TokenStore>) -> Result<Self, ConfigError> {
		let auth = Arc::new(
			AuthCoordinator::new(
				store.clone(),
				settings.descriptor()?,
				settings.client_id.trim(),
				settings.redirect_url()?,
				settings.scopes()?,
				ReqwestHttpClient::new()?,
			)
			.with_refresh_buffer(settings.refresh_buffer()),
		);
		let limiter = Arc::new(RateLimiter::new(
			settings.rate_limit_max_requests,
			settings.rate_limit_window(),
		));
		let client = GraphClient::new(
			settings.api_base()?,
			auth.clone(),
			limiter.clone(),
			ReqwestApiTransport::new()?,
		);

		Ok(Self { settings, store, auth, limiter, client })
	}

	/// Reports the authentication state, refreshing an expired credential when possible.
	pub async fn handle_status(&self) -> ToolResponse {
		ToolResponse::success(self.auth.status().await)
	}

	/// Runs the interactive browser login.
	pub async fn handle_login(&self, timeout: StdDuration) -> ToolResponse {
		login_response(self.auth.login(timeout).await)
	}

	/// Runs the login with a caller-supplied launcher for the authorize URL.
	pub async fn handle_login_with<F>(&self, timeout: StdDuration, launcher: F) -> ToolResponse
	where
		F: FnOnce(&Url) + Send,
	{
		login_response(self.auth.login_with(timeout, launcher).await)
	}

	/// Clears every credential.
	pub fn handle_logout(&self) -> ToolResponse {
		self.auth.logout();

		ToolResponse::success(AuthStatus { authenticated: false, message: LOGGED_OUT.into() })
	}
}

fn login_response(result: Result<()>) -> ToolResponse {
	match result {
		Ok(()) =>
			ToolResponse::success(AuthStatus { authenticated: true, message: LOGGED_IN.into() }),
		Err(e) => ToolResponse::failure(e.to_string(), e.action_required()),
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::error::{ACTION_REGISTRATION, ACTION_RETRY_LATER};

	fn context() -> GraphContext {
		let settings = Settings { client_id: "client".into(), ..Default::default() };

		GraphContext::with_store(settings, Arc::new(TokenStore::in_memory()))
			.expect("Default settings should wire a context.")
	}

	#[tokio::test]
	async fn status_without_credentials_reports_unauthenticated() {
		let response = context().handle_status().await;

		assert_eq!(
			response,
			ToolResponse::success(json!({ "authenticated": false, "message": "Not authenticated" }))
		);
	}

	#[tokio::test]
	async fn logout_is_idempotent() {
		let ctx = context();

		crate::_preludet::seed_record(&ctx.store, "access", Some("refresh"), Duration::hours(1));

		assert_eq!(ctx.handle_logout(), ctx.handle_logout());
		assert!(ctx.store.record().is_none());
		assert_eq!(
			ctx.handle_status().await,
			ToolResponse::success(json!({ "authenticated": false, "message": "Not authenticated" }))
		);
	}

	#[tokio::test]
	async fn login_failures_point_at_the_app_registration() {
		let settings = Settings::default();
		let ctx = GraphContext::with_store(settings, Arc::new(TokenStore::in_memory()))
			.expect("Context should wire without a client id.");
		let response = ctx.handle_login_with(StdDuration::from_secs(1), |_| {}).await;

		assert!(matches!(
			response,
			ToolResponse::Failure { ref error, action_required: Some(ref action) }
				if error.contains("AZURE_CLIENT_ID") && action == ACTION_REGISTRATION
		));
	}

	#[tokio::test]
	async fn login_failures_carry_the_hint_of_their_cause() {
		let settings = Settings {
			client_id: "client".into(),
			redirect_uri: "http://127.0.0.1:0/auth/callback".into(),
			..Default::default()
		};
		let ctx = GraphContext::with_store(settings, Arc::new(TokenStore::in_memory()))
			.expect("Loopback settings should wire a context.");
		let response = ctx.handle_login_with(StdDuration::from_millis(100), |_| {}).await;

		assert_eq!(
			response,
			ToolResponse::failure("Login timed out or was cancelled.", Some(ACTION_RETRY_LATER))
		);
	}
}
