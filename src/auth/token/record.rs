//! The persisted credential record, its expiry checks, and its builder.

// crates.io
use serde::Deserializer;
// self
use crate::{_prelude::*, auth::token::secret::TokenSecret};

/// Lifetime the issuer is assumed to grant when a token response omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::hours(1);

/// Lifecycle status of a record relative to an instant and a look-ahead buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Token is valid and outside the look-ahead buffer.
	Active,
	/// Token has not expired yet but falls inside the look-ahead buffer.
	Expiring,
	/// Token exceeded its expiry instant.
	Expired,
}

/// Errors produced by [`TokenRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenRecordBuilderError {
	/// Issued when no (or an empty) access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// The declared lifetime puts the expiry outside the representable range.
	#[error("Token expiry is out of range.")]
	ExpiryOutOfRange,
}

/// The single credential record kept per installation.
///
/// The wire form is `{access_token, refresh_token, expires_at, scope}` with `expires_at` in
/// epoch seconds. Expiry is always absolute; relative lifetimes are resolved by the builder at
/// the moment the record is created.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret, if the issuer granted one.
	#[serde(default, deserialize_with = "non_empty_secret")]
	pub refresh_token: Option<TokenSecret>,
	/// Absolute expiry instant, second precision.
	#[serde(with = "time::serde::timestamp")]
	pub expires_at: OffsetDateTime,
	/// Space-delimited scope string granted by the issuer.
	#[serde(default)]
	pub scope: String,
}
impl TokenRecord {
	/// Returns a builder for constructing records from token responses.
	pub fn builder() -> TokenRecordBuilder {
		TokenRecordBuilder::default()
	}

	/// Computes the status at `instant`, treating the last `buffer` of validity as expiring.
	pub fn status_at(&self, instant: OffsetDateTime, buffer: Duration) -> TokenStatus {
		if instant >= self.expires_at {
			return TokenStatus::Expired;
		}
		// A buffer reaching past the representable range covers the whole lifetime.
		if self.expires_at.checked_sub(buffer).is_none_or(|threshold| instant >= threshold) {
			return TokenStatus::Expiring;
		}

		TokenStatus::Active
	}

	/// Returns `true` once fewer than `buffer` of validity remain at `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime, buffer: Duration) -> bool {
		!matches!(self.status_at(instant, buffer), TokenStatus::Active)
	}

	/// Same as [`is_expired_at`](Self::is_expired_at) against the current UTC clock.
	pub fn is_expired(&self, buffer: Duration) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc(), buffer)
	}

	/// Returns `true` if a refresh token is present.
	pub fn can_refresh(&self) -> bool {
		self.refresh_token.is_some()
	}
}
impl Debug for TokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRecord")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.field("scope", &self.scope)
			.finish()
	}
}

/// Builder for [`TokenRecord`].
#[derive(Clone, Debug, Default)]
pub struct TokenRecordBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	scope: String,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl TokenRecordBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value; an empty string counts as absent.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token)).filter(|secret| !secret.is_empty());

		self
	}

	/// Carries an already-wrapped refresh token forward.
	pub fn refresh_secret(mut self, secret: Option<TokenSecret>) -> Self {
		self.refresh_token = secret.filter(|secret| !secret.is_empty());

		self
	}

	/// Sets the granted scope string.
	pub fn scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = scope.into();

		self
	}

	/// Sets the issuance instant relative lifetimes are measured from.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Convenience helper that stamps the issuance instant with the current clock.
	pub fn issued_now(self) -> Self {
		self.issued_at(OffsetDateTime::now_utc())
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets the issuer-declared lifetime.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Consumes the builder and produces a [`TokenRecord`].
	///
	/// Without an explicit expiry the record lives [`DEFAULT_TOKEN_LIFETIME`] from issuance.
	pub fn build(self) -> Result<TokenRecord, TokenRecordBuilderError> {
		let access_token = self
			.access_token
			.filter(|secret| !secret.is_empty())
			.ok_or(TokenRecordBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at
				.checked_add(delta)
				.ok_or(TokenRecordBuilderError::ExpiryOutOfRange)?,
			(None, None) => issued_at + DEFAULT_TOKEN_LIFETIME,
		};

		Ok(TokenRecord {
			access_token,
			refresh_token: self.refresh_token,
			expires_at: truncate_to_seconds(expires_at),
			scope: self.scope,
		})
	}
}

fn truncate_to_seconds(instant: OffsetDateTime) -> OffsetDateTime {
	OffsetDateTime::from_unix_timestamp(instant.unix_timestamp()).unwrap_or(instant)
}

fn non_empty_secret<'de, D>(deserializer: D) -> Result<Option<TokenSecret>, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = <Option<String>>::deserialize(deserializer)?;

	Ok(raw.filter(|value| !value.is_empty()).map(TokenSecret::new))
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn hour_long_record() -> TokenRecord {
		TokenRecord::builder()
			.access_token("access")
			.refresh_token("refresh")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token record builder should succeed for a one hour lifetime.")
	}

	#[test]
	fn look_ahead_buffer_marks_tokens_expired_early() {
		let record = hour_long_record();
		let buffer = Duration::minutes(5);

		assert_eq!(record.expires_at, macros::datetime!(2025-01-01 01:00 UTC));
		assert_eq!(
			record.status_at(macros::datetime!(2025-01-01 00:54 UTC), buffer),
			TokenStatus::Active
		);
		assert!(!record.is_expired_at(macros::datetime!(2025-01-01 00:54:59 UTC), buffer));
		assert_eq!(
			record.status_at(macros::datetime!(2025-01-01 00:56 UTC), buffer),
			TokenStatus::Expiring
		);
		assert!(record.is_expired_at(macros::datetime!(2025-01-01 00:56 UTC), buffer));
		assert_eq!(
			record.status_at(macros::datetime!(2025-01-01 01:00 UTC), buffer),
			TokenStatus::Expired
		);
	}

	#[test]
	fn builder_defaults_lifetime_and_rejects_empty_access_tokens() {
		let issued = macros::datetime!(2025-01-01 00:00 UTC);
		let record = TokenRecord::builder()
			.access_token("access")
			.issued_at(issued)
			.build()
			.expect("Builder should default the lifetime when expires_in is absent.");

		assert_eq!(record.expires_at, issued + DEFAULT_TOKEN_LIFETIME);
		assert!(!record.can_refresh());

		let err = TokenRecord::builder()
			.access_token("")
			.build()
			.expect_err("Empty access tokens must be rejected.");

		assert_eq!(err, TokenRecordBuilderError::MissingAccessToken);
	}

	#[test]
	fn out_of_range_lifetimes_and_buffers_never_overflow() {
		let err = TokenRecord::builder()
			.access_token("access")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::seconds(9_000_000_000_000_000))
			.build()
			.expect_err("Lifetimes past the calendar range must be rejected.");

		assert_eq!(err, TokenRecordBuilderError::ExpiryOutOfRange);

		let record = hour_long_record();

		let huge_buffer = Duration::seconds(i64::MAX / 2);

		assert_eq!(
			record.status_at(macros::datetime!(2025-01-01 00:00 UTC), huge_buffer),
			TokenStatus::Expiring
		);
		assert!(record.is_expired(Duration::MAX));
	}

	#[test]
	fn wire_form_uses_epoch_seconds_and_drops_empty_refresh_tokens() {
		let record = hour_long_record();
		let json = serde_json::to_value(&record).expect("Record should serialize.");

		assert_eq!(json["expires_at"], serde_json::json!(1_735_693_200_i64));
		assert_eq!(json["access_token"], "access");

		let legacy = serde_json::json!({
			"access_token": "a",
			"refresh_token": "",
			"expires_at": 1_735_693_200_i64,
			"scope": ""
		});
		let parsed: TokenRecord =
			serde_json::from_value(legacy).expect("Legacy record should deserialize.");

		assert!(parsed.refresh_token.is_none());
	}

	#[test]
	fn debug_output_redacts_secrets() {
		let rendered = format!("{:?}", hour_long_record());

		assert!(!rendered.contains("\"access\""));
		assert!(rendered.contains("<redacted>"));
	}
}
