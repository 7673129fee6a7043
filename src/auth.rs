//! Credential-domain models: scope lists, token secrets, and the persisted token record.

pub mod scope;
pub mod token;

pub use scope::*;
pub use token::{record::*, secret::*};
