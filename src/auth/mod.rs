//! Credential handling for remote sessions.

pub mod credential;
pub mod store;

pub use credential::{Credential, DEFAULT_CREDENTIAL_BUFFER};
pub use store::CredentialStore;
