//! Authentication and account lifecycle.
//!
//! - [`password`]: Argon2 hashing and opaque token generation
//! - [`tokens`]: JWT access token creation and verification
//! - [`current_user`]: request extractor for the authenticated user
//! - [`flows`]: the account flows themselves (register, login, refresh,
//!   email verification, password reset, logout)

pub mod current_user;
pub mod flows;
pub mod password;
pub mod tokens;
