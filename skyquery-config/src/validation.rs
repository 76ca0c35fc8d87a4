// Configuration validation

use crate::{ConfigError, Result};

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Configuration validator with rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }
        Ok(())
    }

    /// Validate URL format
    pub fn is_url(value: &str, field: &str) -> Result<()> {
        if !value.starts_with("http://") && !value.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "{} must be a valid URL",
                field
            )));
        }
        Ok(())
    }

    /// Validate email format (basic)
    pub fn is_email(value: &str, field: &str) -> Result<()> {
        let valid = value
            .split_once('@')
            .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
        if !valid {
            return Err(ConfigError::ValidationError(format!(
                "{} must be a valid email",
                field
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_empty_validation() {
        assert!(ConfigValidator::not_empty("value", "field").is_ok());
        assert!(ConfigValidator::not_empty("", "field").is_err());
        assert!(ConfigValidator::not_empty("  ", "field").is_err());
    }

    #[test]
    fn test_url_validation() {
        assert!(ConfigValidator::is_url("https://example.com", "field").is_ok());
        assert!(ConfigValidator::is_url("http://localhost:8080/", "field").is_ok());
        assert!(ConfigValidator::is_url("example.com", "field").is_err());
    }

    #[test]
    fn test_email_validation() {
        assert!(ConfigValidator::is_email("sa@proj.iam.gserviceaccount.com", "field").is_ok());
        assert!(ConfigValidator::is_email("@proj.iam", "field").is_err());
        assert!(ConfigValidator::is_email("not-an-email", "field").is_err());
    }
}
