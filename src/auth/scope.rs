//! Requested scope lists.

// std
use std::{slice::Iter, str::FromStr};
// crates.io
use serde::{Deserializer, Serializer, de::Error as DeError};
// self
use crate::_prelude::*;

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
}

/// Deduplicated list of OAuth scopes.
///
/// Unlike a set, the list keeps first-seen order so the `scope` parameter sent to the
/// authorization server reads the way it was configured (`offline_access` first). Serde and
/// [`Display`] use the space-delimited wire form.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ScopeSet(Arc<[String]>);
impl ScopeSet {
	/// Creates a scope list from any iterator, dropping duplicates.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut kept: Vec<String> = Vec::new();

		for scope in scopes {
			let owned: String = scope.into();

			if owned.is_empty() {
				return Err(ScopeValidationError::Empty);
			}
			if owned.chars().any(char::is_whitespace) {
				return Err(ScopeValidationError::ContainsWhitespace { scope: owned });
			}
			if !kept.contains(&owned) {
				kept.push(owned);
			}
		}

		Ok(Self(Arc::from(kept)))
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if no scopes are defined.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns true if the list contains the provided scope (case-insensitive, as Graph treats
	/// permission names).
	pub fn contains(&self, scope: &str) -> bool {
		self.0.iter().any(|candidate| candidate.eq_ignore_ascii_case(scope))
	}

	/// Iterator over scopes in configured order.
	pub fn iter(&self) -> Iter<'_, String> {
		self.0.iter()
	}

	/// Space-delimited wire representation.
	pub fn normalized(&self) -> String {
		self.0.join(" ")
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeSet").field(&self.0).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}
impl FromStr for ScopeSet {
	type Err = ScopeValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Ok(Self::default());
		}
		if s.chars().all(char::is_whitespace) {
			return Err(ScopeValidationError::Empty);
		}

		Self::new(s.split_whitespace())
	}
}
impl Serialize for ScopeSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.normalized())
	}
}
impl<'de> Deserialize<'de> for ScopeSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;

		raw.parse().map_err(DeError::custom)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn scopes_keep_first_seen_order_and_drop_duplicates() {
		let scopes = ScopeSet::new(["offline_access", "User.Read", "offline_access", "Mail.Read"])
			.expect("Scope list fixture should be valid.");

		assert_eq!(scopes.len(), 3);
		assert_eq!(scopes.normalized(), "offline_access User.Read Mail.Read");
		assert!(scopes.contains("user.read"));
	}

	#[test]
	fn scopes_reject_empty_and_padded_entries() {
		assert!(matches!(ScopeSet::new([""]), Err(ScopeValidationError::Empty)));
		assert!(matches!(
			ScopeSet::new([" profile "]),
			Err(ScopeValidationError::ContainsWhitespace { .. })
		));
		assert!(ScopeSet::from_str("").is_ok(), "Empty string represents an empty scope list.");
		assert!(ScopeSet::from_str("   ").is_err(), "Whitespace-only input must be rejected.");
	}

	#[test]
	fn serde_uses_space_delimited_form() {
		let scopes = ScopeSet::from_str("openid profile").expect("Scope string should parse.");
		let json = serde_json::to_string(&scopes).expect("Scope list should serialize.");

		assert_eq!(json, "\"openid profile\"");

		let back: ScopeSet = serde_json::from_str(&json).expect("Scope list should deserialize.");

		assert_eq!(back, scopes);
	}
}
