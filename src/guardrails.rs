//! Input guardrails applied before classification

use crate::error::OrchestrationError;
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;

pub const MIN_MESSAGE_CHARS: usize = 3;
pub const MAX_MESSAGE_CHARS: usize = 5000;

lazy_static! {
    static ref PII_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("social security number", Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()),
        (
            "credit card number",
            Regex::new(r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b").unwrap()
        ),
        (
            "email address",
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
        ),
        ("phone number", Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").unwrap()),
    ];
}

/// Validates user messages; violations surface as `InvalidInput` with a
/// message safe to show the user.
#[derive(Debug, Clone)]
pub struct InputGuard {
    min_chars: usize,
    max_chars: usize,
}

impl Default for InputGuard {
    fn default() -> Self {
        Self {
            min_chars: MIN_MESSAGE_CHARS,
            max_chars: MAX_MESSAGE_CHARS,
        }
    }
}

impl InputGuard {
    pub fn check(&self, message: &str) -> Result<()> {
        let length = message.trim().chars().count();
        if length < self.min_chars {
            return Err(OrchestrationError::InvalidInput(format!(
                "Your question is too short. Please use at least {} characters.",
                self.min_chars
            )));
        }
        if length > self.max_chars {
            return Err(OrchestrationError::InvalidInput(format!(
                "Your question is too long. Please keep it under {} characters.",
                self.max_chars
            )));
        }

        if let Some(kind) = detect_pii(message) {
            return Err(OrchestrationError::InvalidInput(format!(
                "Your message appears to contain a {}. Please remove personal information and ask again.",
                kind
            )));
        }

        Ok(())
    }
}

/// First kind of personal data found in `text`
pub fn detect_pii(text: &str) -> Option<&'static str> {
    PII_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map(|(kind, _)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_limits() {
        let guard = InputGuard::default();
        assert!(guard.check("hi").is_err());
        assert!(guard.check("   hi   ").is_err());
        assert!(guard.check("What is an ETF?").is_ok());
        assert!(guard.check(&"a".repeat(5001)).is_err());
    }

    #[test]
    fn test_pii_detection() {
        assert_eq!(detect_pii("my ssn is 123-45-6789"), Some("social security number"));
        assert_eq!(detect_pii("card 4111 1111 1111 1111"), Some("credit card number"));
        assert_eq!(detect_pii("mail me at jane@example.com"), Some("email address"));
        assert_eq!(detect_pii("call 555-123-4567"), Some("phone number"));
        assert_eq!(detect_pii("I want to save $200,000 in 10 years"), None);
    }

    #[test]
    fn test_violation_is_invalid_input() {
        let result = InputGuard::default().check("reach me at 555.123.4567 please");
        assert!(matches!(result, Err(OrchestrationError::InvalidInput(_))));
    }
}
