//! Validation helpers for DTOs.

use validator::ValidationError;

/// Length of a room join code.
pub const ROOM_CODE_LEN: usize = 6;
const MAX_DISPLAY_NAME_CHARS: usize = 32;

/// Validates that a join code is six ASCII letters or digits. Case is normalised later.
///
/// # Examples
///
/// ```ignore
/// validate_room_code("AB12CD") // Ok
/// validate_room_code("ab12cd") // Ok
/// validate_room_code("AB12C")  // Err - too short
/// ```
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    let code = code.trim();
    if code.chars().count() != ROOM_CODE_LEN {
        let mut err = ValidationError::new("room_code_length");
        err.message = Some(
            format!(
                "Room code must be exactly {ROOM_CODE_LEN} characters (got {})",
                code.chars().count()
            )
            .into(),
        );
        return Err(err);
    }

    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code must contain only letters and digits".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a player display name: 1 to 32 visible characters once trimmed.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    let count = trimmed.chars().count();
    if count == 0 || count > MAX_DISPLAY_NAME_CHARS {
        let mut err = ValidationError::new("display_name_length");
        err.message = Some(
            format!("Display name must be 1 to {MAX_DISPLAY_NAME_CHARS} characters (got {count})")
                .into(),
        );
        return Err(err);
    }

    if trimmed.chars().any(char::is_control) {
        let mut err = ValidationError::new("display_name_format");
        err.message = Some("Display name must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_room_code_valid() {
        assert!(validate_room_code("AB12CD").is_ok());
        assert!(validate_room_code("ab12cd").is_ok());
        assert!(validate_room_code(" 000000 ").is_ok());
    }

    #[test]
    fn test_validate_room_code_invalid() {
        assert!(validate_room_code("AB12C").is_err()); // too short
        assert!(validate_room_code("AB12CDE").is_err()); // too long
        assert!(validate_room_code("AB-2CD").is_err()); // punctuation
        assert!(validate_room_code("ÀB12CD").is_err()); // non-ascii
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Lan").is_ok());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name(&"x".repeat(33)).is_err());
        assert!(validate_display_name("bad\nname").is_err());
    }
}
