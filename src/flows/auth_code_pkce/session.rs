// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
// self
use crate::{_prelude::*, auth::ScopeSet, provider::ProviderDescriptor};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 96;

/// Supported PKCE challenge methods surfaced via [`AuthorizationRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// Authorize URL and the public half of the PKCE handshake.
///
/// The verifier stays inside the coordinator's pending-flow table, keyed by `state`.
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
	/// Fully-formed authorize URL to send the user to.
	pub authorize_url: Url,
	/// Opaque state value that must round-trip via the redirect.
	pub state: String,
	/// PKCE code challenge derived from the secret verifier.
	pub code_challenge: String,
	/// PKCE challenge method (currently always `S256`).
	pub code_challenge_method: PkceCodeChallengeMethod,
}

/// Ephemeral state of one login attempt.
#[derive(Clone)]
pub struct PendingFlow {
	pub(crate) verifier: String,
	/// When the authorization request was built.
	pub created_at: Instant,
}
impl PendingFlow {
	pub(crate) fn generate() -> (Self, String) {
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let challenge = compute_pkce_challenge(&verifier);

		(Self { verifier, created_at: Instant::now() }, challenge)
	}
}
impl Debug for PendingFlow {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PendingFlow")
			.field("verifier", &"<redacted>")
			.field("created_at", &self.created_at)
			.finish()
	}
}

pub(crate) fn new_state() -> String {
	random_string(STATE_LEN)
}

pub(crate) fn build_authorize_url(
	descriptor: &ProviderDescriptor,
	client_id: &str,
	redirect_uri: &Url,
	scope: &ScopeSet,
	state: &str,
	challenge: &str,
) -> Url {
	let mut url = descriptor.endpoints.authorization.clone();
	let mut pairs = url.query_pairs_mut();

	pairs.append_pair("client_id", client_id);
	pairs.append_pair("response_type", "code");
	pairs.append_pair("redirect_uri", redirect_uri.as_str());

	if !scope.is_empty() {
		pairs.append_pair("scope", &scope.normalized());
	}

	pairs.append_pair("state", state);
	pairs.append_pair("code_challenge", challenge);
	pairs.append_pair("code_challenge_method", PkceCodeChallengeMethod::S256.as_str());

	drop(pairs);

	url
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn compute_pkce_challenge(verifier: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(verifier.as_bytes());
	let digest = hasher.finalize();
	URL_SAFE_NO_PAD.encode(digest)
}
