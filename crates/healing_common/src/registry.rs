//! Action registry - runs validated actions through a command runner
//!
//! The registry is the only place that turns an [`Action`] into processes.
//! It is shared by the privileged daemon and the development executor so both
//! perform exactly the same whitelisted work.

use crate::action::{Action, ActionName, CPU_SYSFS_ROOT};
use crate::command_exec::{CommandRunner, CommandSpec, Privilege};
use crate::error::{HealingError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ActionRegistry {
    runner: Arc<dyn CommandRunner>,
    privilege: Privilege,
    cpu_sysfs_root: PathBuf,
}

impl ActionRegistry {
    pub fn new(runner: Arc<dyn CommandRunner>, privilege: Privilege) -> Self {
        Self {
            runner,
            privilege,
            cpu_sysfs_root: PathBuf::from(CPU_SYSFS_ROOT),
        }
    }

    /// Look for `cpuN/cpufreq/scaling_governor` under `root` instead of sysfs
    pub fn with_cpu_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cpu_sysfs_root = root.into();
        self
    }

    pub fn privilege(&self) -> Privilege {
        self.privilege
    }

    /// Wire names of every action this registry accepts
    pub fn capabilities(&self) -> Vec<&'static str> {
        ActionName::ALL.iter().map(|a| a.as_str()).collect()
    }

    /// Fully elevated commands for an action, in execution order
    pub fn plan(&self, action: &Action) -> Vec<CommandSpec> {
        action
            .commands()
            .into_iter()
            .map(|spec| spec.elevate(self.privilege))
            .collect()
    }

    /// Execute a validated action and return its output text.
    pub async fn execute(&self, action: &Action) -> Result<String> {
        if self.privilege == Privilege::Unprivileged {
            return Err(HealingError::InsufficientPrivileges {
                manual_command: action.manual_command(),
            });
        }

        let plan = self.plan(action);
        let output = match action {
            Action::RestartNetwork => self.run_with_fallback(&plan).await?,
            Action::SetCpuGovernor { governor } => self.set_governor(&plan, governor).await?,
            _ => self.run_sequence(&plan).await?,
        };

        info!("{} completed", action.name());
        let trimmed = output.trim();
        if trimmed.is_empty() {
            Ok(action.success_message())
        } else {
            Ok(format!("{}\n{}", action.success_message(), trimmed))
        }
    }

    /// Run every step; stop at the first failure.
    async fn run_sequence(&self, plan: &[CommandSpec]) -> Result<String> {
        let mut combined = String::new();
        for spec in plan {
            let output = self.runner.run(spec).await?.into_result(spec)?;
            combined.push_str(&output.stdout);
        }
        Ok(combined)
    }

    /// cpupower first; if it fails, write the sysfs files directly.
    async fn set_governor(&self, plan: &[CommandSpec], governor: &str) -> Result<String> {
        let cpupower_error = match self.run_sequence(plan).await {
            Ok(output) => return Ok(output),
            Err(e) => e,
        };

        let files = governor_files(&self.cpu_sysfs_root).await;
        if files.is_empty() {
            return Err(cpupower_error);
        }
        warn!(
            "cpupower failed ({}), writing {} scaling_governor files directly",
            cpupower_error,
            files.len()
        );

        let spec = Action::sysfs_governor_command(governor, &files).elevate(self.privilege);
        self.runner.run(&spec).await?.into_result(&spec)?;
        // tee echoes its input; nothing worth reporting
        Ok(String::new())
    }

    /// Try each alternative in order until one succeeds.
    async fn run_with_fallback(&self, plan: &[CommandSpec]) -> Result<String> {
        let mut last_error = None;
        for spec in plan {
            match self.runner.run(spec).await.and_then(|o| o.into_result(spec)) {
                Ok(output) => return Ok(output.stdout),
                Err(e) => {
                    warn!("{} failed, trying next alternative: {}", spec.command_line(), e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| HealingError::Internal("empty command plan".to_string())))
    }
}

/// `scaling_governor` files of every CPU under `root`, sorted
async fn governor_files(root: &Path) -> Vec<PathBuf> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {}", root.display(), e);
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let is_cpu = name
            .to_str()
            .and_then(|n| n.strip_prefix("cpu"))
            .map(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);
        if !is_cpu {
            continue;
        }
        let file = entry.path().join("cpufreq/scaling_governor");
        if tokio::fs::metadata(&file).await.is_ok() {
            files.push(file);
        }
    }
    files.sort();
    files
}
