//! Single-flight refresh of the cached credential.
//!
//! All refreshes serialize behind one async mutex. After the lock is taken the cached record is
//! re-checked, so callers that queued behind an in-flight refresh reuse its result instead of
//! presenting the refresh token a second time. A refresh the token endpoint answers with an
//! error, or one attempted without a refresh token, clears the stored credential. Pending logins
//! are left alone so a sign-in already in the browser can still complete.

mod metrics;

pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	auth::{TokenRecord, TokenSecret},
	flows::{AuthCoordinator, AuthStatus},
	http::TokenHttpClient,
	oauth::{OAuth2Facade, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

const AUTHENTICATED: &str = "Authenticated";
const NOT_AUTHENTICATED: &str = "Not authenticated";
const SESSION_EXPIRED: &str = "Session expired. Please log in again.";

impl<C, M> AuthCoordinator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Refreshes the credential unless a concurrent caller already replaced it.
	pub async fn refresh(&self) -> Result<()> {
		self.refresh_inner(None).await
	}

	/// Forced refresh after the remote service rejected `rejected`.
	///
	/// The cached credential only counts as fresh when its access token differs from the
	/// rejected one and has not expired.
	pub async fn refresh_rejected(&self, rejected: &TokenSecret) -> Result<()> {
		self.refresh_inner(Some(rejected)).await
	}

	/// Returns a usable access token, refreshing first when the cached one is near expiry.
	pub async fn get_valid_access_token(&self) -> Result<TokenSecret> {
		if self.store.is_access_token_expired(self.refresh_buffer()) {
			if let Err(e) = self.refresh().await {
				tracing::debug!(error = %e, "No valid credential available.");

				return Err(Error::AuthenticationRequired);
			}
		}

		self.store.access_token().ok_or(Error::AuthenticationRequired)
	}

	/// Reports whether a usable credential exists, refreshing an expired one when possible.
	pub async fn status(&self) -> AuthStatus {
		if self.store.is_access_token_expired(self.refresh_buffer())
			&& self.store.refresh_token().is_some()
			&& self.refresh().await.is_err()
		{
			return AuthStatus { authenticated: false, message: SESSION_EXPIRED.into() };
		}

		let authenticated = self.store.is_authenticated();
		let message = if authenticated { AUTHENTICATED } else { NOT_AUTHENTICATED };

		AuthStatus { authenticated, message: message.into() }
	}

	async fn refresh_inner(&self, rejected: Option<&TokenSecret>) -> Result<()> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, if rejected.is_some() { "refresh_rejected" } else { "refresh" });

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		self.refresh_metrics.record_attempt();

		let result = span
			.instrument(async move {
				let _singleflight = self.refresh_guard.lock().await;

				if self.store.record().is_some_and(|current| self.is_fresh(&current, rejected)) {
					tracing::debug!("Credential already refreshed by a concurrent caller.");

					return Ok(());
				}

				let Some(refresh_token) = self.store.refresh_token() else {
					tracing::warn!("No refresh token available; credential state cleared.");
					self.store.clear();

					return Err(Error::AuthenticationRequired);
				};

				self.refresh_metrics.record_exchange();

				let facade = self.facade()?;

				match facade.refresh_token(&refresh_token, &self.scope).await {
					Ok(record) => {
						self.store.store(record);

						tracing::info!("Access token refreshed.");

						Ok(())
					},
					Err(e) => {
						if clears_credentials(&e) {
							tracing::warn!(error = %e, "Refresh rejected; credential state cleared.");
							self.store.clear();
						} else {
							tracing::warn!(error = %e, "Refresh failed; credential kept.");
						}

						Err(e)
					},
				}
			})
			.await;

		match &result {
			Ok(()) => self.refresh_metrics.record_success(),
			Err(_) => self.refresh_metrics.record_failure(),
		}

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		result
	}

	fn is_fresh(&self, current: &TokenRecord, rejected: Option<&TokenSecret>) -> bool {
		match rejected {
			Some(rejected) =>
				current.access_token != *rejected && !current.is_expired(Duration::ZERO),
			None => !current.is_expired(self.refresh_buffer()),
		}
	}
}

/// The token endpoint answered, so the refresh token it saw is no longer trusted.
fn clears_credentials(error: &Error) -> bool {
	match error {
		Error::InvalidGrant { .. } => true,
		Error::Transient(transient) => transient.is_error_response(),
		_ => false,
	}
}
