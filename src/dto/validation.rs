//! Validation helpers for DTOs.

use validator::ValidationError;

const PLAYER_ID_MAX_LENGTH: usize = 64;

/// Validates that a player identifier is non-empty, at most 64 characters,
/// and free of whitespace.
pub fn validate_player_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        let mut err = ValidationError::new("player_id_empty");
        err.message = Some("Player ID must not be empty".into());
        return Err(err);
    }

    if id.len() > PLAYER_ID_MAX_LENGTH {
        let mut err = ValidationError::new("player_id_length");
        err.message = Some(
            format!(
                "Player ID must be at most {} characters (got {})",
                PLAYER_ID_MAX_LENGTH,
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if id.chars().any(char::is_whitespace) {
        let mut err = ValidationError::new("player_id_format");
        err.message = Some("Player ID must not contain whitespace".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_player_id_valid() {
        assert!(validate_player_id("alice").is_ok());
        assert!(validate_player_id("c4f1e0").is_ok());
        assert!(validate_player_id(&"x".repeat(64)).is_ok());
    }

    #[test]
    fn test_validate_player_id_invalid() {
        assert!(validate_player_id("").is_err());
        assert!(validate_player_id(&"x".repeat(65)).is_err()); // too long
        assert!(validate_player_id("al ice").is_err()); // inner space
        assert!(validate_player_id("alice\n").is_err()); // trailing newline
    }
}
