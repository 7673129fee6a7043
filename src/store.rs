//! Encrypted, single-record token cache.
//!
//! The store never propagates persistence failures: a cache that cannot be read, decrypted, or
//! parsed loads as empty, and a failed write is logged and leaves the in-memory record in place.

pub mod cipher;

mod file;

pub use cipher::{CacheKey, EnvelopeCipher};

// self
use crate::{
	_prelude::*,
	auth::{TokenRecord, TokenSecret},
	error::ConfigError,
};

/// Error type produced inside the store; always logged and absorbed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Record could not be encoded or decoded as JSON.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// File-system failure.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// Envelope could not be sealed or failed authentication.
	#[error("Crypto failure: {message}.")]
	Crypto {
		/// Human-readable error payload.
		message: String,
	},
}

/// On-disk locations of the cache and its key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorePaths {
	/// Encrypted token blob.
	pub token_file: PathBuf,
	/// Generated key, used when no key is supplied externally.
	pub key_file: PathBuf,
}
impl StorePaths {
	/// Standard file names under `dir`.
	pub fn in_dir(dir: impl AsRef<Path>) -> Self {
		let dir = dir.as_ref();

		Self { token_file: dir.join("tokens.enc"), key_file: dir.join(".key") }
	}
}

/// Holds the installation's single [`TokenRecord`], backed by an encrypted file.
#[derive(Debug)]
pub struct TokenStore {
	paths: Option<StorePaths>,
	record: RwLock<Option<TokenRecord>>,
	cipher: RwLock<Option<EnvelopeCipher>>,
}
impl TokenStore {
	/// Creates a file-backed store. Call [`configure`](Self::configure) before use.
	pub fn new(paths: StorePaths) -> Self {
		Self { paths: Some(paths), record: RwLock::new(None), cipher: RwLock::new(None) }
	}

	/// Creates a store that keeps the record in memory only.
	pub fn in_memory() -> Self {
		Self { paths: None, record: RwLock::new(None), cipher: RwLock::new(None) }
	}

	/// Configured file locations, if the store is file-backed.
	pub fn paths(&self) -> Option<&StorePaths> {
		self.paths.as_ref()
	}

	/// Establishes the encryption key and loads any existing record.
	///
	/// A supplied key must be URL-safe base64 of 32 bytes. Without one, the key file is read or,
	/// when it is absent or unusable, a new key is generated and written with owner-only
	/// permissions.
	pub fn configure(&self, encryption_key: Option<&str>) -> Result<(), ConfigError> {
		let key = match encryption_key {
			Some(encoded) =>
				CacheKey::from_base64(encoded).ok_or(ConfigError::InvalidEncryptionKey)?,
			None => self.load_or_generate_key(),
		};

		*self.cipher.write() = Some(EnvelopeCipher::new(&key));

		self.load();

		Ok(())
	}

	/// Reloads the record from disk; returns `true` if a usable record is now cached.
	pub fn load(&self) -> bool {
		let Some(paths) = &self.paths else {
			return self.record.read().is_some();
		};
		let loaded = match self.read_record(&paths.token_file) {
			Ok(Some(record)) => {
				tracing::debug!(path = %paths.token_file.display(), "Loaded cached credential.");

				Some(record)
			},
			Ok(None) => {
				tracing::debug!(path = %paths.token_file.display(), "No cached credential.");

				None
			},
			Err(e) => {
				tracing::warn!(
					path = %paths.token_file.display(),
					error = %e,
					"Discarding unreadable credential cache."
				);

				None
			},
		};
		let present = loaded.is_some();

		*self.record.write() = loaded;

		present
	}

	/// Replaces the cached record and persists it; write failures are logged.
	pub fn store(&self, record: TokenRecord) {
		let mut guard = self.record.write();

		if let Err(e) = self.persist(&record) {
			tracing::warn!(error = %e, "Failed to persist credential; keeping it in memory only.");
		}

		*guard = Some(record);
	}

	/// Removes the persisted and in-memory record.
	pub fn clear(&self) {
		let mut guard = self.record.write();

		*guard = None;

		let Some(paths) = &self.paths else {
			return;
		};

		if let Err(e) = file::remove_if_exists(&paths.token_file) {
			tracing::warn!(error = %e, "Failed to remove credential cache.");
		}
	}

	/// Snapshot of the cached record.
	pub fn record(&self) -> Option<TokenRecord> {
		self.record.read().clone()
	}

	/// Current access token, if any.
	pub fn access_token(&self) -> Option<TokenSecret> {
		self.record.read().as_ref().map(|record| record.access_token.clone())
	}

	/// Current refresh token, if any.
	pub fn refresh_token(&self) -> Option<TokenSecret> {
		self.record.read().as_ref().and_then(|record| record.refresh_token.clone())
	}

	/// Returns `true` when no record is cached or fewer than `buffer` of validity remain.
	pub fn is_access_token_expired(&self, buffer: Duration) -> bool {
		self.record.read().as_ref().is_none_or(|record| record.is_expired(buffer))
	}

	/// Returns `true` for an unexpired access token, or an expired one that can be refreshed.
	pub fn is_authenticated(&self) -> bool {
		self.record
			.read()
			.as_ref()
			.is_some_and(|record| !record.is_expired(Duration::ZERO) || record.can_refresh())
	}

	fn load_or_generate_key(&self) -> CacheKey {
		let Some(paths) = &self.paths else {
			return CacheKey::generate();
		};

		match file::read_optional(&paths.key_file) {
			Ok(Some(bytes)) => {
				let parsed = std::str::from_utf8(&bytes).ok().and_then(CacheKey::from_base64);

				if let Some(key) = parsed {
					return key;
				}

				tracing::warn!(
					path = %paths.key_file.display(),
					"Encryption key file is corrupt; generating a new key."
				);
			},
			Ok(None) => {},
			Err(e) => {
				tracing::warn!(error = %e, "Encryption key file is unreadable; generating a new key.");
			},
		}

		let key = CacheKey::generate();

		match file::write_private(&paths.key_file, key.to_base64().as_bytes()) {
			Ok(()) => tracing::debug!(path = %paths.key_file.display(), "Generated encryption key."),
			Err(e) => tracing::warn!(
				error = %e,
				"Failed to persist encryption key; cached credentials will not survive a restart."
			),
		}

		key
	}

	fn read_record(&self, path: &Path) -> Result<Option<TokenRecord>, StoreError> {
		let Some(envelope) = file::read_optional(path)? else {
			return Ok(None);
		};
		let cipher = self.cipher.read();
		let cipher = cipher
			.as_ref()
			.ok_or(StoreError::Crypto { message: "Store is not configured".into() })?;
		let plaintext = cipher.open(&envelope)?;
		let record: TokenRecord = serde_json::from_slice(&plaintext)
			.map_err(|e| StoreError::Serialization { message: e.to_string() })?;

		Ok(Some(record).filter(|record| !record.access_token.is_empty()))
	}

	fn persist(&self, record: &TokenRecord) -> Result<(), StoreError> {
		let Some(paths) = &self.paths else {
			return Ok(());
		};
		let cipher = self.cipher.read();
		let cipher = cipher
			.as_ref()
			.ok_or(StoreError::Crypto { message: "Store is not configured".into() })?;
		let plaintext = serde_json::to_vec(record)
			.map_err(|e| StoreError::Serialization { message: e.to_string() })?;
		let envelope = cipher.seal(&plaintext)?;

		file::write_private(&paths.token_file, &envelope)?;
		tracing::debug!(path = %paths.token_file.display(), "Saved credential cache.");

		Ok(())
	}
}
