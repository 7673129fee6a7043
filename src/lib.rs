//! Credential lifecycle and resilient request pipeline for Microsoft Graph agents: PKCE login,
//! an encrypted token cache, single-flight refresh, and client-side rate limiting composed into
//! one retryable call.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod flows;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod ratelimit;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::{ScopeSet, TokenRecord},
		client::GraphClient,
		flows::AuthCoordinator,
		http::{ReqwestHttpClient, api::ReqwestApiTransport},
		provider::ProviderDescriptor,
		ratelimit::RateLimiter,
		store::TokenStore,
	};

	/// Client id used by every test fixture.
	pub const TEST_CLIENT_ID: &str = "client-graph-test";

	/// Test wiring: the coordinator, its store, and the limiter a test may want to inspect.
	pub struct TestRig {
		/// Shared in-memory token store.
		pub store: Arc<TokenStore>,
		/// Coordinator bound to the mock authority.
		pub auth: Arc<AuthCoordinator>,
		/// Limiter shared with the client.
		pub limiter: Arc<RateLimiter>,
		/// Pipeline pointed at the mock API base URL.
		pub client: GraphClient,
	}

	/// Builds a descriptor whose endpoints live under `authority` (e.g. an `httpmock` server).
	pub fn test_descriptor(authority: &str) -> ProviderDescriptor {
		let base =
			Url::parse(authority).expect("Mock authority should parse as an absolute URL.");

		ProviderDescriptor::builder()
			.authorization_endpoint(
				base.join("/common/oauth2/v2.0/authorize")
					.expect("Authorization endpoint fixture should join onto the authority."),
			)
			.token_endpoint(
				base.join("/common/oauth2/v2.0/token")
					.expect("Token endpoint fixture should join onto the authority."),
			)
			.build()
			.expect("Test descriptor should validate for loopback endpoints.")
	}

	/// Scope set requested by every test coordinator.
	pub fn test_scope() -> ScopeSet {
		ScopeSet::new(["offline_access", "User.Read"]).expect("Test scope fixture should be valid.")
	}

	/// Builds a coordinator over an in-memory store.
	pub fn build_test_coordinator(authority: &str, redirect_uri: &str) -> TestRig {
		build_test_rig(authority, redirect_uri, "http://127.0.0.1:9/v1.0", RateLimiter::default())
	}

	/// Builds the full pipeline against mock authority + API servers.
	pub fn build_test_rig(
		authority: &str,
		redirect_uri: &str,
		api_base: &str,
		limiter: RateLimiter,
	) -> TestRig {
		let store = Arc::new(TokenStore::in_memory());
		let redirect =
			Url::parse(redirect_uri).expect("Redirect URI fixture should parse successfully.");
		let http_client =
			ReqwestHttpClient::new().expect("Token HTTP client should build for tests.");
		let auth = Arc::new(AuthCoordinator::new(
			store.clone(),
			test_descriptor(authority),
			TEST_CLIENT_ID,
			redirect,
			test_scope(),
			http_client,
		));
		let limiter = Arc::new(limiter);
		let transport = ReqwestApiTransport::new().expect("API transport should build for tests.");
		let client = GraphClient::new(
			Url::parse(api_base).expect("API base fixture should parse successfully."),
			auth.clone(),
			limiter.clone(),
			transport,
		);

		TestRig { store, auth, limiter, client }
	}

	/// Seeds `store` with a record that expires `expires_in` from now.
	pub fn seed_record(
		store: &TokenStore,
		access: &str,
		refresh: Option<&str>,
		expires_in: Duration,
	) -> TokenRecord {
		let mut builder = TokenRecord::builder()
			.access_token(access)
			.scope("offline_access User.Read")
			.issued_now()
			.expires_in(expires_in);

		if let Some(refresh) = refresh {
			builder = builder.refresh_token(refresh);
		}

		let record = builder.build().expect("Token record fixture should build successfully.");

		store.store(record.clone());

		record
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		path::{Path, PathBuf},
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _, tempfile as _, tracing_subscriber as _};
