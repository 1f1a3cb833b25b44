//! Common type definitions.
//!
//! This module defines:
//! - Type aliases for entity IDs ([`UserId`], [`TokenId`])
//! - The [`abbrev_uuid`] helper for readable IDs in logs and traces

use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type TokenId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id: Uuid = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }
}
