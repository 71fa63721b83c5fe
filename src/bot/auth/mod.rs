//! Authentication strategies for SSH connections.
//!
//! Each kind of credential material a chat user can supply maps to one
//! strategy:
//!
//! - [`KeyAuth`]: Private key file authentication
//! - [`PasswordAuth`]: Password-based authentication
//!
//! Strategies are produced by
//! [`CredentialMaterial::auth_strategy`](crate::bot::credentials::CredentialMaterial::auth_strategy)
//! and consumed by the russh connector.

mod key;
mod password;
mod traits;

pub use key::KeyAuth;
pub use password::PasswordAuth;
pub use traits::AuthStrategy;
