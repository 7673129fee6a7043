//! Authorization Code + PKCE login.
//!
//! [`AuthCoordinator::build_authorization_request`] registers a pending flow and returns the
//! authorize URL. [`AuthCoordinator::exchange_code`] consumes the pending flow for the returned
//! state before any network call, so an unknown or replayed state never reaches the token
//! endpoint.
//! [`AuthCoordinator::login`] drives the whole round trip through the loopback
//! [`RedirectReceiver`].

mod session;

pub use session::*;

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	flows::{AuthCoordinator, CallbackParams, RedirectReceiver},
	http::TokenHttpClient,
	oauth::{OAuth2Facade, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// How long an interactive login waits for the redirect by default.
pub const DEFAULT_LOGIN_TIMEOUT: StdDuration = StdDuration::from_secs(120);

impl<C, M> AuthCoordinator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Generates state + PKCE material, registers the pending flow, and builds the authorize
	/// URL.
	pub fn build_authorization_request(&self) -> AuthorizationRequest {
		let _span = FlowSpan::new(FlowKind::Login, "build_authorization_request").entered();
		let state = session::new_state();
		let (flow, code_challenge) = PendingFlow::generate();
		let authorize_url = session::build_authorize_url(
			&self.descriptor,
			&self.client_id,
			&self.redirect_uri,
			&self.scope,
			&state,
			&code_challenge,
		);

		self.register_pending(state.clone(), flow);

		AuthorizationRequest {
			authorize_url,
			state,
			code_challenge,
			code_challenge_method: PkceCodeChallengeMethod::S256,
		}
	}

	/// Exchanges `code` for a credential using the verifier registered under `state`.
	///
	/// The pending flow is consumed whether or not the exchange succeeds.
	pub async fn exchange_code(&self, code: &str, state: &str) -> Result<()> {
		let Some(flow) = self.take_pending(state) else {
			tracing::warn!("Rejected authorization callback with an unknown or consumed state.");

			return Err(Error::StateMismatch);
		};
		let facade = self.facade()?;
		let record = facade.exchange_authorization_code(code, &flow.verifier, &self.scope).await?;

		self.store.store(record);

		tracing::info!("Authorization code exchanged; credential stored.");

		Ok(())
	}

	/// Waits for the redirect on the configured URI, then exchanges the captured code.
	pub async fn complete_login(&self, timeout: StdDuration) -> Result<()> {
		let receiver = RedirectReceiver::bind(&self.redirect_uri)?;
		let CallbackParams { code, state } = receiver.wait(timeout).await?;

		self.exchange_code(&code, &state).await
	}

	/// Runs the interactive login, opening the authorize URL in the system browser.
	///
	/// When no browser can be launched the URL is logged so the user can open it manually.
	pub async fn login(&self, timeout: StdDuration) -> Result<()> {
		self.login_with(timeout, |url| {
			if let Err(e) = open::that(url.as_str()) {
				tracing::warn!(
					error = %e,
					url = %url,
					"Unable to open a browser; visit the URL manually to sign in."
				);
			}
		})
		.await
	}

	/// Runs the interactive login with a caller-supplied launcher for the authorize URL.
	pub async fn login_with<F>(&self, timeout: StdDuration, launcher: F) -> Result<()>
	where
		F: FnOnce(&Url) + Send,
	{
		const KIND: FlowKind = FlowKind::Login;

		let span = FlowSpan::new(KIND, "login");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				if self.client_id.trim().is_empty() {
					return Err(ConfigError::MissingClientId.into());
				}

				let request = self.build_authorization_request();
				let outcome = self.drive_login(&request, timeout, launcher).await;

				if outcome.is_err() {
					self.take_pending(&request.state);
				}

				outcome
			})
			.await;

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		if let Err(e) = &result {
			tracing::warn!(error = %e, "Login failed.");
		}

		result
	}

	async fn drive_login<F>(
		&self,
		request: &AuthorizationRequest,
		timeout: StdDuration,
		launcher: F,
	) -> Result<()>
	where
		F: FnOnce(&Url) + Send,
	{
		let receiver = RedirectReceiver::bind(&self.redirect_uri)?;

		launcher(&request.authorize_url);

		let CallbackParams { code, state } = receiver.wait(timeout).await?;

		self.exchange_code(&code, &state).await
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::*;

	#[test]
	fn authorize_url_carries_the_pkce_parameters() {
		let rig = build_test_coordinator("http://127.0.0.1:9", "http://localhost:3000/auth/callback");
		let request = rig.auth.build_authorization_request();
		let query = request.authorize_url.query_pairs().into_owned().collect::<HashMap<_, _>>();

		assert_eq!(request.authorize_url.path(), "/common/oauth2/v2.0/authorize");
		assert_eq!(query.get("client_id").map(String::as_str), Some(TEST_CLIENT_ID));
		assert_eq!(query.get("response_type").map(String::as_str), Some("code"));
		assert_eq!(
			query.get("redirect_uri").map(String::as_str),
			Some("http://localhost:3000/auth/callback")
		);
		assert_eq!(query.get("scope").map(String::as_str), Some("offline_access User.Read"));
		assert_eq!(query.get("state"), Some(&request.state));
		assert_eq!(query.get("code_challenge"), Some(&request.code_challenge));
		assert_eq!(query.get("code_challenge_method").map(String::as_str), Some("S256"));
		assert_eq!(rig.auth.pending_flows(), 1);
	}

	#[tokio::test]
	async fn unknown_state_is_rejected_before_any_exchange() {
		let rig = build_test_coordinator("http://127.0.0.1:9", "http://localhost:3000/auth/callback");
		let request = rig.auth.build_authorization_request();
		let err = rig
			.auth
			.exchange_code("code", "forged-state")
			.await
			.expect_err("Unknown state should fail.");

		assert!(matches!(err, Error::StateMismatch));
		assert_eq!(rig.auth.pending_flows(), 1);

		rig.auth.logout();

		let err = rig
			.auth
			.exchange_code("code", &request.state)
			.await
			.expect_err("Logout should discard pending flows.");

		assert!(matches!(err, Error::StateMismatch));
	}

	#[tokio::test]
	async fn login_without_a_client_id_fails_fast() {
		let rig = build_test_coordinator("http://127.0.0.1:9", "http://localhost:3000/auth/callback");
		let auth = AuthCoordinator::new(
			rig.store.clone(),
			rig.auth.descriptor.clone(),
			"",
			rig.auth.redirect_uri.clone(),
			rig.auth.scope.clone(),
			(*rig.auth.http_client).clone(),
		);
		let err = auth
			.login_with(DEFAULT_LOGIN_TIMEOUT, |_| panic!("Launcher must not run."))
			.await
			.expect_err("Missing client id should fail.");

		assert!(matches!(err, Error::Config(ConfigError::MissingClientId)));
		assert_eq!(auth.pending_flows(), 0);
	}
}
