//! Recipient validation for delivery actions
//!
//! Email addresses are trimmed and lowercased, phone numbers are normalised
//! to E.164. Invalid entries are dropped by [`recipients`] with a warning.

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecipientError {
    #[error("Invalid email address '{0}'")]
    InvalidEmail(String),

    #[error("Invalid phone number '{0}'")]
    InvalidPhone(String),
}

/// Validation result type
pub type ValidationResult<T> = Result<T, RecipientError>;

/// Email validation
pub mod email {
    use super::*;
    use validator::ValidateEmail;

    /// Normalise and validate one address
    pub fn validate(value: &str) -> ValidationResult<String> {
        let email = value.trim().to_lowercase();
        if email.is_empty() || !email.validate_email() {
            return Err(RecipientError::InvalidEmail(value.to_string()));
        }
        Ok(email)
    }
}

/// Phone validation
pub mod phone {
    use super::*;
    use regex::Regex;
    use std::sync::LazyLock;

    static E164: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("E.164 pattern is valid"));

    /// Normalise to E.164: drop spaces, dashes, dots and parentheses; `00` prefix becomes `+`
    pub fn normalize(value: &str) -> ValidationResult<String> {
        let compact: String = value
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
            .collect();

        let candidate = match compact.strip_prefix("00") {
            Some(rest) => format!("+{}", rest),
            None => compact,
        };

        if E164.is_match(&candidate) {
            Ok(candidate)
        } else {
            Err(RecipientError::InvalidPhone(value.to_string()))
        }
    }
}

/// Which kind of recipient a delivery channel expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientKind {
    Email,
    Phone,
}

/// Validate a batch of recipients, keeping the valid ones in order without duplicates
pub fn recipients(values: &[String], kind: RecipientKind) -> Vec<String> {
    let mut valid: Vec<String> = Vec::with_capacity(values.len());

    for value in values {
        let checked = match kind {
            RecipientKind::Email => email::validate(value),
            RecipientKind::Phone => phone::normalize(value),
        };

        match checked {
            Ok(normalized) if !valid.contains(&normalized) => valid.push(normalized),
            Ok(_) => {}
            Err(e) => warn!("Dropping recipient: {}", e),
        }
    }

    valid
}
