//! Database record structures matching table schemas.

pub mod refresh_tokens;
pub mod users;
pub mod verification_tokens;
