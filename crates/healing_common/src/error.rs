//! Error taxonomy for healing actions.
//!
//! Every variant crosses the privilege boundary as data (see
//! [`crate::protocol::HealingResponse`]), never as a panic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HealingError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("{0}")]
    Validation(String),

    #[error("Rate limit exceeded for {action}")]
    RateLimitExceeded { action: String },

    #[error("{command} timed out after {timeout_secs}s")]
    ExecutionTimeout { command: String, timeout_secs: u64 },

    #[error("{command} failed: {message}")]
    ExecutionFailed { command: String, message: String },

    #[error("Insufficient privileges")]
    InsufficientPrivileges { manual_command: String },

    #[error("Luminous healing service not running: {0}")]
    ServiceUnavailable(String),

    #[error("Permission denied connecting to {path}")]
    SocketPermissionDenied { path: String, group: String },

    #[error("Invalid request format")]
    InvalidRequest,

    #[error("Invalid response from healing service: {0}")]
    InvalidResponse(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wire tag for a failure, carried next to the human-readable error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AuthenticationFailure,
    UnknownAction,
    ValidationError,
    RateLimitExceeded,
    ExecutionTimeout,
    ExecutionFailed,
    InsufficientPrivileges,
    ServiceUnavailable,
    InvalidRequest,
    InvalidResponse,
    InternalError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationFailure => "authentication_failure",
            Self::UnknownAction => "unknown_action",
            Self::ValidationError => "validation_error",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::ExecutionTimeout => "execution_timeout",
            Self::ExecutionFailed => "execution_failed",
            Self::InsufficientPrivileges => "insufficient_privileges",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InvalidRequest => "invalid_request",
            Self::InvalidResponse => "invalid_response",
            Self::InternalError => "internal_error",
        }
    }
}

impl HealingError {
    pub fn kind(&self) -> FailureKind {
        match self {
            HealingError::AuthenticationFailure(_) => FailureKind::AuthenticationFailure,
            HealingError::UnknownAction(_) => FailureKind::UnknownAction,
            HealingError::Validation(_) => FailureKind::ValidationError,
            HealingError::RateLimitExceeded { .. } => FailureKind::RateLimitExceeded,
            HealingError::ExecutionTimeout { .. } => FailureKind::ExecutionTimeout,
            HealingError::ExecutionFailed { .. } => FailureKind::ExecutionFailed,
            HealingError::InsufficientPrivileges { .. } => FailureKind::InsufficientPrivileges,
            HealingError::ServiceUnavailable(_) | HealingError::SocketPermissionDenied { .. } => {
                FailureKind::ServiceUnavailable
            }
            HealingError::InvalidRequest | HealingError::Json(_) => FailureKind::InvalidRequest,
            HealingError::InvalidResponse(_) => FailureKind::InvalidResponse,
            HealingError::Internal(_) | HealingError::Io(_) => FailureKind::InternalError,
        }
    }

    /// Remediation hint shown to the operator. Every failure has one.
    pub fn suggestion(&self) -> Option<String> {
        Some(self.hint())
    }

    fn hint(&self) -> String {
        match self {
            HealingError::AuthenticationFailure(_) => {
                "Check that client and daemon share the same LUMINOUS_HEALING_SECRET".to_string()
            }
            HealingError::UnknownAction(_) => format!(
                "Supported actions: {}",
                crate::action::ActionName::ALL
                    .iter()
                    .map(|a| a.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            HealingError::Validation(_) => {
                "See supported actions and their parameters: healingctl actions".to_string()
            }
            HealingError::RateLimitExceeded { .. } => {
                "Wait a few minutes before retrying this action".to_string()
            }
            HealingError::InsufficientPrivileges { manual_command } => {
                format!("Run manually: {}", manual_command)
            }
            HealingError::ServiceUnavailable(_) => {
                "Enable the healing service in /etc/nixos/configuration.nix:\n  \
                 services.luminous-healing.enable = true;\n  \
                 Then run: sudo nixos-rebuild switch"
                    .to_string()
            }
            HealingError::SocketPermissionDenied { group, .. } => format!(
                "Add your user to the '{}' group: sudo usermod -aG {} $USER\n  \
                 Then log out and back in",
                group, group
            ),
            HealingError::InvalidRequest | HealingError::InvalidResponse(_) => {
                "Make sure healingctl and healingd are the same version".to_string()
            }
            HealingError::ExecutionTimeout { .. }
            | HealingError::ExecutionFailed { .. }
            | HealingError::Internal(_)
            | HealingError::Io(_)
            | HealingError::Json(_) => {
                "Check logs for details: journalctl -u luminous-healing".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, HealingError>;
