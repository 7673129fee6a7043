//! Token secret wrapper and the credential record built from token endpoint responses.

pub mod record;
pub mod secret;
