// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Token checks for the operator control channel.

use std::collections::HashSet;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing authorization token")]
    Missing,
    #[error("invalid authorization token")]
    Invalid,
}

/// Strip a case-insensitive "Bearer " prefix.
pub fn strip_bearer(value: &str) -> &str {
    let trimmed = value.trim();
    match trimmed.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => trimmed[7..].trim_start(),
        _ => trimmed,
    }
}

/// Decides whether an operator may send commands.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: Option<&str>) -> Result<(), AuthError>;
}

/// Accepts any of a fixed set of tokens. An empty set disables the check.
#[derive(Debug, Clone, Default)]
pub struct SimpleTokenValidator {
    tokens: HashSet<String>,
}

impl SimpleTokenValidator {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(Into::into)
                .filter(|t: &String| !t.trim().is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl TokenValidator for SimpleTokenValidator {
    fn validate(&self, token: Option<&str>) -> Result<(), AuthError> {
        if self.tokens.is_empty() {
            return Ok(());
        }
        let token = token.ok_or(AuthError::Missing)?;
        if self.tokens.contains(strip_bearer(token)) {
            Ok(())
        } else {
            Err(AuthError::Invalid)
        }
    }
}

/// Accepts everything. Used when the control channel has no tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthValidator;

impl TokenValidator for NoAuthValidator {
    fn validate(&self, _token: Option<&str>) -> Result<(), AuthError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_bearer() {
        assert_eq!(strip_bearer("Bearer abc123"), "abc123");
        assert_eq!(strip_bearer("  BeArEr  xyz "), "xyz");
        assert_eq!(strip_bearer("abc123"), "abc123");
        assert_eq!(strip_bearer("bearer"), "bearer");
        assert_eq!(strip_bearer(""), "");
    }

    #[test]
    fn test_token_set() {
        let validator = SimpleTokenValidator::new(["operator", "beamline"]);
        assert_eq!(validator.validate(Some("operator")), Ok(()));
        assert_eq!(validator.validate(Some("Bearer beamline")), Ok(()));
        assert_eq!(validator.validate(Some("guest")), Err(AuthError::Invalid));
        assert_eq!(validator.validate(None), Err(AuthError::Missing));
    }

    #[test]
    fn test_empty_set_disables_check() {
        let validator = SimpleTokenValidator::new(["", "  "]);
        assert!(validator.is_empty());
        assert_eq!(validator.validate(None), Ok(()));
        assert_eq!(NoAuthValidator.validate(Some("x")), Ok(()));
    }
}
