//! Authorization-server metadata consumed by the login and refresh flows.
//!
//! [`ProviderDescriptor`] carries the validated authorization and token endpoints. Endpoints
//! must use HTTPS unless they point at a loopback host.

pub mod descriptor;

pub use descriptor::*;
