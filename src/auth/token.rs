//! Token models: secrets, credentials, and identity tokens.

pub mod credential;
pub mod identity;
pub mod secret;
