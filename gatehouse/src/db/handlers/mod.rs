//! Repository implementations for each database table.

pub mod refresh_tokens;
pub mod repository;
pub mod users;
pub mod verification_tokens;

pub use refresh_tokens::RefreshTokens;
pub use repository::Repository;
pub use users::Users;
pub use verification_tokens::VerificationTokens;
