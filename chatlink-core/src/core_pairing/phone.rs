//! Phone number validation for the pairing-code flow

use super::PairingError;

const MIN_DIGITS: usize = 10;
const MAX_DIGITS: usize = 15;

/// Validate a phone number before it is sent to the server. The server
/// expects bare digits in international format: no `+`, no separators.
pub fn validate_phone(phone: &str) -> Result<(), PairingError> {
    if phone.is_empty() {
        return Err(PairingError::InvalidPhone("empty".to_string()));
    }
    if !phone.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PairingError::InvalidPhone(format!(
            "'{phone}' contains non-digit characters"
        )));
    }
    if phone.len() < MIN_DIGITS || phone.len() > MAX_DIGITS {
        return Err(PairingError::InvalidPhone(format!(
            "'{phone}' must be {MIN_DIGITS}-{MAX_DIGITS} digits"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_international_numbers() {
        assert!(validate_phone("14155550123").is_ok());
        assert!(validate_phone("4915151234567").is_ok());
        assert!(validate_phone("1234567890").is_ok()); // exactly 10
        assert!(validate_phone("123456789012345").is_ok()); // exactly 15
    }

    #[test]
    fn test_rejects_plus_and_separators() {
        assert!(validate_phone("+14155550123").is_err());
        assert!(validate_phone("1415 555 0123").is_err());
        assert!(validate_phone("1415-555-0123").is_err());
    }

    #[test]
    fn test_rejects_bad_lengths() {
        assert!(validate_phone("").is_err());
        assert!(validate_phone("123456789").is_err()); // 9
        assert!(validate_phone("1234567890123456").is_err()); // 16
    }
}
