use lazy_static::lazy_static;
use regex::Regex;
use time::Date;

use crate::errors::BackendError;

lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").unwrap();
    static ref DATE: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
}

/// Normalizes a name by stripping any surrounding whitespace and
/// composing it into Unicode Normalization Form C.
///
/// ```
/// use cohorts::validation::normalize_name;
/// assert_eq!(normalize_name(" hi\u{308} "), "hï");
/// ```
pub fn normalize_name(name: impl AsRef<str>) -> String {
    use unicode_normalization::UnicodeNormalization;

    name.as_ref().trim().nfc().to_string()
}

/// Normalizes a name and ensures something is left.
pub fn validate_name(name: impl AsRef<str>) -> Result<String, BackendError> {
    let name = normalize_name(name);

    if name.is_empty() {
        Err(BackendError::NameRequired)
    } else {
        Ok(name)
    }
}

/// Trims and lowercases an email, then checks its shape.
pub fn validate_email(email: impl AsRef<str>) -> Result<String, BackendError> {
    let email = email.as_ref().trim().to_lowercase();

    if EMAIL.is_match(&email) {
        Ok(email)
    } else {
        Err(BackendError::InvalidEmail(email))
    }
}

/// Parses a `YYYY-MM-DD` birth date and ensures it isn't after
/// `today`.
pub fn validate_date_of_birth(raw: impl AsRef<str>, today: Date) -> Result<Date, BackendError> {
    let raw = raw.as_ref().trim();

    // `%F` stops at the day and ignores anything after it.
    if !DATE.is_match(raw) {
        return Err(BackendError::InvalidDateOfBirth(raw.to_owned()));
    }

    let date =
        Date::parse(raw, "%F").map_err(|_| BackendError::InvalidDateOfBirth(raw.to_owned()))?;

    if date > today {
        Err(BackendError::DateOfBirthInFuture)
    } else {
        Ok(date)
    }
}
