//! Development Executor - runs the same whitelisted actions locally
//!
//! Only used outside SERVICE mode. Privilege is probed once: root runs
//! commands as-is, passwordless sudo gets a `sudo -n` prefix, anything else is
//! refused with the command the user can run by hand.

use crate::executor::{ExecutionMode, ExecutionResult, Executor};
use async_trait::async_trait;
use healing_common::protocol::elapsed_ms;
use healing_common::{
    Action, ActionName, ActionRegistry, AuditLog, HealingRequest, HealingResponse, Privilege,
    Result, SystemRunner,
};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub const ENV_DEV_AUDIT_LOG: &str = "LUMINOUS_DEV_AUDIT_LOG";

/// Dev audit path: `$LUMINOUS_DEV_AUDIT_LOG`, then `$XDG_STATE_HOME/luminous`,
/// then `~/.local/state/luminous`.
pub fn dev_audit_path(lookup: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(path) = get(ENV_DEV_AUDIT_LOG) {
        return Some(PathBuf::from(path));
    }
    if let Some(state) = get("XDG_STATE_HOME") {
        return Some(PathBuf::from(state).join("luminous/dev-audit.jsonl"));
    }
    get("HOME").map(|home| PathBuf::from(home).join(".local/state/luminous/dev-audit.jsonl"))
}

pub struct DevelopmentExecutor {
    registry: ActionRegistry,
    audit: Option<AuditLog>,
}

impl DevelopmentExecutor {
    /// Probe privilege and open the dev audit log from the environment.
    pub async fn new() -> Self {
        let privilege = Privilege::detect().await;
        info!("Development executor privilege: {}", privilege.as_str());
        if privilege == Privilege::Unprivileged {
            warn!("Neither root nor passwordless sudo; actions will only print manual commands");
        }

        let audit = match dev_audit_path(|key| std::env::var(key).ok()) {
            Some(path) => match AuditLog::open(path).await {
                Ok(log) => Some(log),
                Err(e) => {
                    warn!("Development audit log disabled: {:#}", e);
                    None
                }
            },
            None => None,
        };

        Self::with_registry(ActionRegistry::new(Arc::new(SystemRunner), privilege), audit)
    }

    pub fn with_registry(registry: ActionRegistry, audit: Option<AuditLog>) -> Self {
        Self { registry, audit }
    }

    pub fn privilege(&self) -> Privilege {
        self.registry.privilege()
    }

    pub fn audit(&self) -> Option<&AuditLog> {
        self.audit.as_ref()
    }
}

#[async_trait]
impl Executor for DevelopmentExecutor {
    fn executor_type(&self) -> &'static str {
        "DevelopmentExecutor"
    }

    fn capabilities(&self) -> Vec<String> {
        match self.registry.privilege() {
            Privilege::Root | Privilege::Sudo => ActionName::ALL
                .iter()
                .map(|a| a.as_str().to_string())
                .collect(),
            Privilege::Unprivileged => vec!["provide_manual_commands".to_string()],
        }
    }

    async fn execute(&self, action: &str, params: &Map<String, Value>) -> Result<ExecutionResult> {
        let start = Instant::now();
        let request = HealingRequest::new(action, params.clone());

        let outcome = match Action::parse(action, params) {
            Ok(parsed) => self.registry.execute(&parsed).await,
            Err(e) => Err(e),
        };

        let response = match &outcome {
            Ok(output) => HealingResponse::success(request.id, output.clone(), elapsed_ms(start)),
            Err(e) => HealingResponse::failure(request.id, e, elapsed_ms(start)),
        };

        if let Some(audit) = &self.audit {
            audit.record(&request, &response).await;
        }

        Ok(ExecutionResult::from_response(ExecutionMode::Development, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use healing_common::command_exec::FakeRunner;
    use healing_common::FailureKind;
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_dev_audit_path_fallback_chain() {
        let env: HashMap<&str, &str> = [
            (ENV_DEV_AUDIT_LOG, "/tmp/explicit.jsonl"),
            ("XDG_STATE_HOME", "/home/u/.state"),
            ("HOME", "/home/u"),
        ]
        .into_iter()
        .collect();
        let get = |env: &HashMap<&str, &str>, key: &str| env.get(key).map(|v| v.to_string());

        assert_eq!(
            dev_audit_path(|k| get(&env, k)),
            Some(PathBuf::from("/tmp/explicit.jsonl"))
        );

        let mut env = env;
        env.remove(ENV_DEV_AUDIT_LOG);
        assert_eq!(
            dev_audit_path(|k| get(&env, k)),
            Some(PathBuf::from("/home/u/.state/luminous/dev-audit.jsonl"))
        );

        env.remove("XDG_STATE_HOME");
        assert_eq!(
            dev_audit_path(|k| get(&env, k)),
            Some(PathBuf::from("/home/u/.local/state/luminous/dev-audit.jsonl"))
        );

        assert_eq!(dev_audit_path(|_| None), None);
    }

    #[tokio::test]
    async fn test_sudo_prefix_and_audit() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let audit = AuditLog::open(dir.path().join("dev-audit.jsonl")).await.unwrap();
        let exec = DevelopmentExecutor::with_registry(
            ActionRegistry::new(runner.clone(), Privilege::Sudo),
            Some(audit),
        );

        let result = exec
            .execute("restart_service", &params(json!({"service": "nginx"})))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.mode, ExecutionMode::Development);
        assert_eq!(runner.calls()[0].command_line(), "sudo -n systemctl restart nginx");

        let entries = exec.audit().unwrap().read_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "restart_service");
    }

    #[tokio::test]
    async fn test_unprivileged_gets_manual_command() {
        let runner = Arc::new(FakeRunner::new());
        let exec = DevelopmentExecutor::with_registry(
            ActionRegistry::new(runner.clone(), Privilege::Unprivileged),
            None,
        );

        let result = exec
            .execute("kill_process", &params(json!({"pid": 4242, "signal": "KILL"})))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Insufficient privileges"));
        assert_eq!(
            result.suggestion.as_deref(),
            Some("Run manually: sudo kill -s KILL 4242")
        );
        assert_eq!(result.error_kind, Some(FailureKind::InsufficientPrivileges));
        assert_eq!(runner.call_count(), 0);
        assert_eq!(exec.capabilities(), vec!["provide_manual_commands"]);
    }

    #[tokio::test]
    async fn test_validation_applies_locally() {
        let runner = Arc::new(FakeRunner::new());
        let exec = DevelopmentExecutor::with_registry(
            ActionRegistry::new(runner.clone(), Privilege::Root),
            None,
        );

        let result = exec
            .execute("restart_service", &params(json!({"service": "nginx && reboot"})))
            .await
            .unwrap();
        assert_eq!(result.error_kind, Some(FailureKind::ValidationError));

        let result = exec.execute("reboot", &Map::new()).await.unwrap();
        assert_eq!(result.error_kind, Some(FailureKind::UnknownAction));
        assert_eq!(runner.call_count(), 0);
    }
}
