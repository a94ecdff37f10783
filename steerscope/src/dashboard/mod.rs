//! Dashboard command handlers
//!
//! Each dashboard turns a user command into a [`Transition`]: an optional
//! notice for the user plus an optional effect (a remote call). Effects are
//! executed separately and their outcomes folded back into state, so state
//! transitions can be tested without a network.

mod microscope;
mod steer;

pub use microscope::{MicroscopeCommand, MicroscopeDashboard, MicroscopeEffect, MicroscopeOutcome};
pub use steer::{SteerCommand, SteerDashboard, SteerEffect, SteerOutcome};

use crate::client::ClientError;
use serde::Serialize;

/// User-visible message produced by a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "level", content = "message", rename_all = "lowercase")]
pub enum Notice {
    Info(String),
    Success(String),
    Warning(String),
    Error(String),
}

impl Notice {
    pub fn message(&self) -> &str {
        match self {
            Notice::Info(m) | Notice::Success(m) | Notice::Warning(m) | Notice::Error(m) => m,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Notice::Error(_))
    }
}

/// What a command did to state, and what remote call it needs
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<E> {
    pub notice: Option<Notice>,
    pub effect: Option<E>,
}

impl<E> Transition<E> {
    /// State changed (or not); nothing to report, nothing to run
    pub fn none() -> Self {
        Self {
            notice: None,
            effect: None,
        }
    }

    pub fn notice(notice: Notice) -> Self {
        Self {
            notice: Some(notice),
            effect: None,
        }
    }

    pub fn effect(effect: E) -> Self {
        Self {
            notice: None,
            effect: Some(effect),
        }
    }
}

/// Error notice for a failed remote call
fn client_failure(context: &str, error: &ClientError) -> Notice {
    match error {
        ClientError::Parse(detail) => {
            Notice::Error(format!("Error parsing API response: {}", detail))
        }
        ClientError::QueryTooShort { .. } => Notice::Error(error.to_string()),
        ClientError::Network(_) => Notice::Error(format!("{}: {}", context, error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_serialization() {
        let value = serde_json::to_value(Notice::Warning("careful".to_string())).unwrap();
        assert_eq!(value["level"], "warning");
        assert_eq!(value["message"], "careful");
    }

    #[test]
    fn test_client_failure_messages() {
        let network = client_failure("Search API request failed", &ClientError::Network("HTTP 503".into()));
        assert_eq!(network.message(), "Search API request failed: Network error: HTTP 503");
        assert!(network.is_error());

        let parse = client_failure("ignored", &ClientError::Parse("missing field".into()));
        assert_eq!(parse.message(), "Error parsing API response: missing field");

        let short = client_failure("ignored", &ClientError::QueryTooShort { min: 3 });
        assert_eq!(short.message(), "Query must be at least 3 characters long.");
    }
}
