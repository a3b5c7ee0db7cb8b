//! Permission Handler - picks the execution path once and sticks to it
//!
//! SERVICE mode never falls back to local execution: if the daemon is not
//! reachable the caller gets a `ServiceUnavailable` result with instructions
//! for enabling it.

use crate::development::DevelopmentExecutor;
use crate::executor::{ExecutionMode, ExecutionResult, Executor};
use crate::service::ServiceExecutor;
use futures::FutureExt;
use healing_common::{HealingConfig, HealingError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{error, info, warn};

pub const ENV_DEV_MODE: &str = "LUMINOUS_DEV_MODE";
pub const ENV_NO_SERVICE: &str = "LUMINOUS_NO_SERVICE";

impl ExecutionMode {
    /// DEVELOPMENT when either variable is set to a non-empty value.
    pub fn from_env_values(dev_mode: Option<&str>, no_service: Option<&str>) -> Self {
        let set = |v: Option<&str>| v.map(|s| !s.is_empty()).unwrap_or(false);
        if set(dev_mode) || set(no_service) {
            ExecutionMode::Development
        } else {
            ExecutionMode::Service
        }
    }

    pub fn from_env() -> Self {
        let dev_mode = std::env::var(ENV_DEV_MODE).ok();
        let no_service = std::env::var(ENV_NO_SERVICE).ok();
        Self::from_env_values(dev_mode.as_deref(), no_service.as_deref())
    }

    pub fn description(&self) -> &'static str {
        match self {
            ExecutionMode::Service => "Production mode using systemd service",
            ExecutionMode::Development => "Development mode with direct execution",
        }
    }
}

/// Diagnostic snapshot returned by `get_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerStatus {
    pub mode: ExecutionMode,
    pub mode_description: String,
    pub executor_type: String,
    pub is_production: bool,
    pub capabilities: Vec<String>,
}

pub struct PermissionHandler {
    mode: ExecutionMode,
    executor: Box<dyn Executor>,
}

impl PermissionHandler {
    /// Resolve the mode from the environment and build its executor.
    pub async fn new(config: &HealingConfig) -> Self {
        Self::with_mode(ExecutionMode::from_env(), config).await
    }

    pub async fn with_mode(mode: ExecutionMode, config: &HealingConfig) -> Self {
        let executor: Box<dyn Executor> = match mode {
            ExecutionMode::Service => {
                info!("Running in production mode with systemd service");
                Box::new(ServiceExecutor::new(config))
            }
            ExecutionMode::Development => {
                warn!("Running in DEVELOPMENT mode; not for production use");
                Box::new(DevelopmentExecutor::new().await)
            }
        };
        Self::with_executor(mode, executor)
    }

    pub fn with_executor(mode: ExecutionMode, executor: Box<dyn Executor>) -> Self {
        Self { mode, executor }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Execute a healing action. Always returns a result stamped with the mode,
    /// even when the executor panics.
    pub async fn execute(&self, action: &str, params: &Map<String, Value>) -> ExecutionResult {
        let start = Instant::now();
        let outcome = AssertUnwindSafe(self.executor.execute(action, params))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(mut result)) => {
                result.mode = self.mode;
                result
            }
            Ok(Err(e)) => {
                error!("Execution of {} failed: {}", action, e);
                let elapsed = healing_common::protocol::elapsed_ms(start);
                ExecutionResult::from_error(self.mode, &e, elapsed)
            }
            Err(_) => {
                error!("Executor panicked while running {}", action);
                let e = HealingError::Internal("executor panicked".to_string());
                let elapsed = healing_common::protocol::elapsed_ms(start);
                ExecutionResult::from_error(self.mode, &e, elapsed)
            }
        }
    }

    pub fn get_status(&self) -> HandlerStatus {
        HandlerStatus {
            mode: self.mode,
            mode_description: self.mode.description().to_string(),
            executor_type: self.executor.executor_type().to_string(),
            is_production: self.mode == ExecutionMode::Service,
            capabilities: self.executor.capabilities(),
        }
    }
}
