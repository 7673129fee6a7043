//! Authenticated-encryption envelope for the token cache.

// crates.io
use aes_gcm::{
	Aes256Gcm, Key, Nonce,
	aead::{Aead, KeyInit},
};
use base64::{
	Engine,
	engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use rand::Rng;
// self
use crate::{_prelude::*, store::StoreError};

/// Length in bytes of the symmetric key.
pub const KEY_LEN: usize = 32;

const ENVELOPE_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

/// Raw AES-256 key material.
#[derive(Clone, PartialEq, Eq)]
pub struct CacheKey([u8; KEY_LEN]);
impl CacheKey {
	/// Generates a fresh random key.
	pub fn generate() -> Self {
		let mut bytes = [0_u8; KEY_LEN];

		rand::rng().fill(&mut bytes);

		Self(bytes)
	}

	/// Decodes URL-safe base64 (padded or not) into a key; `None` unless it yields 32 bytes.
	pub fn from_base64(encoded: &str) -> Option<Self> {
		let trimmed = encoded.trim();
		let decoded = URL_SAFE_NO_PAD
			.decode(trimmed.trim_end_matches('='))
			.or_else(|_| URL_SAFE.decode(trimmed))
			.ok()?;
		let bytes: [u8; KEY_LEN] = decoded.try_into().ok()?;

		Some(Self(bytes))
	}

	/// Encodes the key in the on-disk form.
	pub fn to_base64(&self) -> String {
		URL_SAFE.encode(self.0)
	}
}
impl Debug for CacheKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("CacheKey(<redacted>)")
	}
}

/// Seals and opens `version || nonce || ciphertext` envelopes.
#[derive(Clone)]
pub struct EnvelopeCipher {
	aead: Aes256Gcm,
}
impl EnvelopeCipher {
	/// Builds a cipher bound to `key`.
	pub fn new(key: &CacheKey) -> Self {
		Self { aead: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0)) }
	}

	/// Encrypts `plaintext` under a fresh random nonce.
	pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
		let mut nonce = [0_u8; NONCE_LEN];

		rand::rng().fill(&mut nonce);

		let ciphertext = self
			.aead
			.encrypt(Nonce::from_slice(&nonce), plaintext)
			.map_err(|e| StoreError::Crypto { message: format!("Encryption failed: {e}") })?;
		let mut envelope = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());

		envelope.push(ENVELOPE_VERSION);
		envelope.extend_from_slice(&nonce);
		envelope.extend_from_slice(&ciphertext);

		Ok(envelope)
	}

	/// Authenticates and decrypts an envelope produced by [`seal`](Self::seal).
	pub fn open(&self, envelope: &[u8]) -> Result<Vec<u8>, StoreError> {
		let Some((&version, rest)) = envelope.split_first() else {
			return Err(StoreError::Crypto { message: "Envelope is empty".into() });
		};

		if version != ENVELOPE_VERSION {
			return Err(StoreError::Crypto {
				message: format!("Unsupported envelope version {version}"),
			});
		}
		if rest.len() < NONCE_LEN {
			return Err(StoreError::Crypto { message: "Envelope is truncated".into() });
		}

		let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

		self.aead.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| StoreError::Crypto {
			message: "Integrity check failed; wrong key or tampered cache".into(),
		})
	}
}
impl Debug for EnvelopeCipher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("EnvelopeCipher(..)")
	}
}
