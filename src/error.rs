//! Screener error taxonomy
//!
//! `Config` and `Auth` are fatal to a run. Every other variant is scoped to a
//! single instrument and ends up as a skip entry in the run result.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScreenError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("insufficient history: need {required} bars, have {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("division undefined: {0}")]
    DivisionUndefined(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ScreenError {
    /// Fatal errors abort the whole run instead of skipping one instrument.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Auth(_))
    }

    /// Short machine-friendly label used in skip tallies and reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Auth(_) => "AuthError",
            Self::InsufficientHistory { .. } => "InsufficientHistory",
            Self::DivisionUndefined(_) => "DivisionUndefined",
            Self::NotFound(_) => "NotFound",
            Self::Transient(_) => "Transient",
            Self::RateLimited { .. } => "RateLimited",
            Self::Io(_) => "Io",
            Self::Csv(_) => "Csv",
        }
    }
}

pub type ScreenResult<T> = Result<T, ScreenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classes() {
        assert!(ScreenError::Config("bad".into()).is_fatal());
        assert!(ScreenError::Auth("expired".into()).is_fatal());
        assert!(!ScreenError::NotFound("X".into()).is_fatal());
        assert!(!ScreenError::Transient("timeout".into()).is_fatal());
        assert!(!ScreenError::DivisionUndefined("zero".into()).is_fatal());
        assert!(!ScreenError::InsufficientHistory {
            required: 51,
            available: 15
        }
        .is_fatal());
    }

    #[test]
    fn test_display() {
        let err = ScreenError::InsufficientHistory {
            required: 21,
            available: 15,
        };
        assert_eq!(err.to_string(), "insufficient history: need 21 bars, have 15");
        assert_eq!(err.kind(), "InsufficientHistory");
    }
}
