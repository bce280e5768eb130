use thiserror::Error;

/// Shortest accepted phone number: country code plus subscriber digits.
pub const MIN_PHONE_DIGITS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneNumberError {
    #[error("phone number must include a country code and at least 10 digits (got {0})")]
    TooFewDigits(usize),
}

/// Strip formatting characters from a user-supplied phone number and
/// validate the remaining digit count. Runs locally; callers must not
/// hit the network with input that fails here.
pub fn normalize_phone_number(input: &str) -> Result<String, PhoneNumberError> {
    let digits: String = input.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < MIN_PHONE_DIGITS {
        return Err(PhoneNumberError::TooFewDigits(digits.len()));
    }
    Ok(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_formatting_characters() {
        assert_eq!(
            normalize_phone_number("+254 750 433 158"),
            Ok("254750433158".to_string())
        );
        assert_eq!(
            normalize_phone_number("(254) 750-433-158"),
            Ok("254750433158".to_string())
        );
    }

    #[test]
    fn rejects_short_numbers() {
        assert_eq!(
            normalize_phone_number("12345"),
            Err(PhoneNumberError::TooFewDigits(5))
        );
        assert_eq!(
            normalize_phone_number("+-() "),
            Err(PhoneNumberError::TooFewDigits(0))
        );
    }

    #[test]
    fn exactly_ten_digits_is_accepted() {
        assert_eq!(
            normalize_phone_number("0750433158"),
            Ok("0750433158".to_string())
        );
    }
}
