//! Executor abstraction shared by the service and development paths

use async_trait::async_trait;
use healing_common::{FailureKind, HealingError, HealingResponse, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Where healing actions run. Resolved once per `PermissionHandler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Through the privileged daemon (production)
    #[serde(rename = "service")]
    Service,
    /// Locally via root or sudo
    #[serde(rename = "dev")]
    Development,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Service => "service",
            ExecutionMode::Development => "dev",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-side outcome of one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub mode: ExecutionMode,
    pub suggestion: Option<String>,
    pub duration_ms: u32,
}

impl ExecutionResult {
    pub fn success(mode: ExecutionMode, output: impl Into<String>, duration_ms: u32) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            error_kind: None,
            mode,
            suggestion: None,
            duration_ms,
        }
    }

    pub fn from_error(mode: ExecutionMode, err: &HealingError, duration_ms: u32) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            mode,
            suggestion: err.suggestion(),
            duration_ms,
        }
    }

    pub fn from_response(mode: ExecutionMode, response: HealingResponse) -> Self {
        Self {
            success: response.success,
            output: response.output,
            error: response.error,
            error_kind: response.error_kind,
            mode,
            suggestion: response.suggestion,
            duration_ms: response.duration_ms,
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Name reported by `get_status`
    fn executor_type(&self) -> &'static str;

    /// Actions this executor can perform right now
    fn capabilities(&self) -> Vec<String>;

    /// Run one action.
    ///
    /// Refusals by the action pipeline come back as `Ok` with
    /// `success: false`; `Err` means the executor could not run at all.
    async fn execute(&self, action: &str, params: &Map<String, Value>) -> Result<ExecutionResult>;
}
