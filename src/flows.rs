//! Credential lifecycle orchestration: interactive login, silent refresh, and logout.
//!
//! [`AuthCoordinator`] is the sole writer of credential state. It owns the pending login
//! flows, the single-flight refresh guard, and the handle to the [`TokenStore`].

pub mod auth_code_pkce;
pub mod redirect;
pub mod refresh;

pub use auth_code_pkce::*;
pub use redirect::*;
pub use refresh::*;

// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	http::{ReqwestHttpClient, TokenHttpClient},
	oauth::{BasicFacade, ReqwestTransportErrorMapper, TransportErrorMapper},
	provider::ProviderDescriptor,
	store::TokenStore,
};

/// Default look-ahead window: tokens expiring within it are refreshed before use.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::seconds(300);

/// Coordinates the credential lifecycle against a single Microsoft identity tenant.
///
/// The coordinator owns the HTTP client, token store, and provider descriptor so the
/// individual flows only carry grant-specific logic (state + PKCE generation, code
/// exchanges, refresh serialization).
pub struct AuthCoordinator<C = ReqwestHttpClient, M = ReqwestTransportErrorMapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client wrapper used for every token endpoint request.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors before surfacing them to callers.
	pub transport_mapper: Arc<M>,
	/// Credential store this coordinator writes to.
	pub store: Arc<TokenStore>,
	/// Authorization and token endpoints.
	pub descriptor: ProviderDescriptor,
	/// Public client identifier sent with every grant.
	pub client_id: String,
	/// Registered redirect URI served by the loopback receiver.
	pub redirect_uri: Url,
	/// Scopes requested at login and refresh.
	pub scope: ScopeSet,
	/// Shared counters for refresh outcomes.
	pub refresh_metrics: Arc<RefreshMetrics>,
	refresh_buffer: Duration,
	pending: Mutex<HashMap<String, PendingFlow>>,
	refresh_guard: AsyncMutex<()>,
}
impl<C, M> AuthCoordinator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a coordinator that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		store: Arc<TokenStore>,
		descriptor: ProviderDescriptor,
		client_id: impl Into<String>,
		redirect_uri: Url,
		scope: ScopeSet,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			store,
			descriptor,
			client_id: client_id.into(),
			redirect_uri,
			scope,
			refresh_metrics: Default::default(),
			refresh_buffer: DEFAULT_REFRESH_BUFFER,
			pending: Default::default(),
			refresh_guard: AsyncMutex::new(()),
		}
	}

	/// Replaces the look-ahead window used to decide whether a token needs refreshing.
	pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
		self.refresh_buffer = buffer;

		self
	}

	/// Current look-ahead window.
	pub fn refresh_buffer(&self) -> Duration {
		self.refresh_buffer
	}

	/// Number of login attempts whose state has not been consumed yet.
	pub fn pending_flows(&self) -> usize {
		self.pending.lock().len()
	}

	/// Clears persisted and pending state unconditionally. Idempotent.
	pub fn logout(&self) {
		self.store.clear();
		self.pending.lock().clear();

		tracing::info!("Credential state cleared.");
	}

	pub(crate) fn facade(&self) -> Result<BasicFacade<'_, C, M>> {
		BasicFacade::from_descriptor(
			&self.descriptor,
			&self.client_id,
			&self.redirect_uri,
			&*self.http_client,
			&*self.transport_mapper,
		)
	}

	pub(crate) fn register_pending(&self, state: String, flow: PendingFlow) {
		self.pending.lock().insert(state, flow);
	}

	pub(crate) fn take_pending(&self, state: &str) -> Option<PendingFlow> {
		self.pending.lock().remove(state)
	}
}
impl AuthCoordinator<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a coordinator over the crate's default reqwest transport stack.
	pub fn new(
		store: Arc<TokenStore>,
		descriptor: ProviderDescriptor,
		client_id: impl Into<String>,
		redirect_uri: Url,
		scope: ScopeSet,
		http_client: ReqwestHttpClient,
	) -> Self {
		Self::with_http_client(
			store,
			descriptor,
			client_id,
			redirect_uri,
			scope,
			http_client,
			ReqwestTransportErrorMapper,
		)
	}
}
impl<C, M> Debug for AuthCoordinator<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthCoordinator")
			.field("descriptor", &self.descriptor)
			.field("client_id", &self.client_id)
			.field("redirect_uri", &self.redirect_uri)
			.field("scope", &self.scope)
			.field("refresh_buffer", &self.refresh_buffer)
			.field("pending_flows", &self.pending_flows())
			.finish()
	}
}

/// Authentication state reported by [`AuthCoordinator::status`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
	/// Whether a usable credential exists.
	pub authenticated: bool,
	/// Human-readable summary.
	pub message: String,
}
