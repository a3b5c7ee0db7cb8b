//! Healing actions - closed whitelist with typed, validated parameters
//!
//! The wire carries an action name and a free-form parameter map. Both are
//! resolved here into an [`Action`] before anything privileged happens:
//! unknown names are `UnknownAction`, bad parameters are `Validation`.

use crate::command_exec::CommandSpec;
use crate::error::{HealingError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

/// Valid governors for `set_cpu_governor`
pub const GOVERNORS: &[&str] = &["performance", "powersave", "ondemand", "conservative"];

/// Parent of the per-CPU `cpuN/cpufreq/scaling_governor` files
pub const CPU_SYSFS_ROOT: &str = "/sys/devices/system/cpu";

/// Signals `kill_process` may deliver
pub const KILL_SIGNALS: &[&str] = &["TERM", "KILL", "HUP", "INT"];

const DEFAULT_GOVERNOR: &str = "ondemand";
const DEFAULT_SWAPPINESS: u8 = 60;
const DEFAULT_SIGNAL: &str = "TERM";

fn service_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex is valid"))
}

// =============================================================================
// Action names
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionName {
    RestartService,
    SetCpuGovernor,
    ClearSystemCache,
    RollbackGeneration,
    KillProcess,
    AdjustSwappiness,
    RestartNetwork,
    CleanNixStore,
}

impl ActionName {
    pub const ALL: [ActionName; 8] = [
        ActionName::RestartService,
        ActionName::SetCpuGovernor,
        ActionName::ClearSystemCache,
        ActionName::RollbackGeneration,
        ActionName::KillProcess,
        ActionName::AdjustSwappiness,
        ActionName::RestartNetwork,
        ActionName::CleanNixStore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionName::RestartService => "restart_service",
            ActionName::SetCpuGovernor => "set_cpu_governor",
            ActionName::ClearSystemCache => "clear_system_cache",
            ActionName::RollbackGeneration => "rollback_generation",
            ActionName::KillProcess => "kill_process",
            ActionName::AdjustSwappiness => "adjust_swappiness",
            ActionName::RestartNetwork => "restart_network",
            ActionName::CleanNixStore => "clean_nix_store",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ActionName::RestartService => "Restart a systemd service",
            ActionName::SetCpuGovernor => "Set the CPU frequency governor",
            ActionName::ClearSystemCache => "Drop page, dentry and inode caches",
            ActionName::RollbackGeneration => "Roll back to the previous NixOS generation",
            ActionName::KillProcess => "Send a signal to a process",
            ActionName::AdjustSwappiness => "Set vm.swappiness",
            ActionName::RestartNetwork => "Restart NetworkManager or systemd-networkd",
            ActionName::CleanNixStore => "Garbage-collect the Nix store",
        }
    }

    /// Upper bound on how long the action may run in total
    pub fn timeout(&self) -> Duration {
        let secs = match self {
            ActionName::KillProcess => 5,
            ActionName::SetCpuGovernor | ActionName::AdjustSwappiness => 10,
            ActionName::RestartService => 30,
            ActionName::ClearSystemCache => 40,
            ActionName::RestartNetwork => 60,
            ActionName::RollbackGeneration => 300,
            ActionName::CleanNixStore => 600,
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionName {
    type Err = HealingError;

    /// Exact match only; no trimming, no case folding.
    fn from_str(s: &str) -> Result<Self> {
        ActionName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| HealingError::UnknownAction(s.to_string()))
    }
}

// =============================================================================
// Typed actions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    RestartService { service: String },
    SetCpuGovernor { governor: String },
    ClearSystemCache,
    RollbackGeneration,
    KillProcess { pid: u32, signal: String },
    AdjustSwappiness { value: u8 },
    RestartNetwork,
    CleanNixStore { older_than_days: Option<u32> },
}

impl Action {
    /// Resolve a wire request into a validated action.
    pub fn parse(name: &str, params: &Map<String, Value>) -> Result<Self> {
        let name = ActionName::from_str(name)?;
        Self::from_params(name, params)
    }

    pub fn from_params(name: ActionName, params: &Map<String, Value>) -> Result<Self> {
        match name {
            ActionName::RestartService => {
                let service = required_str(params, "service", "No service specified")?;
                validate_service_name(service)?;
                Ok(Action::RestartService {
                    service: service.to_string(),
                })
            }
            ActionName::SetCpuGovernor => {
                let governor = optional_str(params, "governor")?.unwrap_or(DEFAULT_GOVERNOR);
                if !GOVERNORS.contains(&governor) {
                    return Err(HealingError::Validation(format!(
                        "Invalid governor: {} (expected one of {})",
                        governor,
                        GOVERNORS.join(", ")
                    )));
                }
                Ok(Action::SetCpuGovernor {
                    governor: governor.to_string(),
                })
            }
            ActionName::ClearSystemCache => Ok(Action::ClearSystemCache),
            ActionName::RollbackGeneration => Ok(Action::RollbackGeneration),
            ActionName::KillProcess => {
                let pid = match params.get("pid") {
                    None | Some(Value::Null) => {
                        return Err(HealingError::Validation("No PID specified".to_string()))
                    }
                    Some(value) => integer(value, "pid")?,
                };
                if pid <= 1 || pid > i64::from(u32::MAX) {
                    return Err(HealingError::Validation(format!("Invalid PID: {}", pid)));
                }
                let signal = optional_str(params, "signal")?.unwrap_or(DEFAULT_SIGNAL);
                if !KILL_SIGNALS.contains(&signal) {
                    return Err(HealingError::Validation(format!(
                        "Invalid signal: {} (expected one of {})",
                        signal,
                        KILL_SIGNALS.join(", ")
                    )));
                }
                Ok(Action::KillProcess {
                    pid: pid as u32,
                    signal: signal.to_string(),
                })
            }
            ActionName::AdjustSwappiness => {
                let value = match params.get("value") {
                    None | Some(Value::Null) => i64::from(DEFAULT_SWAPPINESS),
                    Some(value) => integer(value, "value")?,
                };
                if !(0..=100).contains(&value) {
                    return Err(HealingError::Validation(
                        "Swappiness must be 0-100".to_string(),
                    ));
                }
                Ok(Action::AdjustSwappiness { value: value as u8 })
            }
            ActionName::RestartNetwork => Ok(Action::RestartNetwork),
            ActionName::CleanNixStore => {
                let older_than_days = match params.get("older_than_days") {
                    None | Some(Value::Null) => None,
                    Some(value) => {
                        let days = integer(value, "older_than_days")?;
                        if days < 0 || days > i64::from(u32::MAX) {
                            return Err(HealingError::Validation(format!(
                                "Invalid older_than_days: {}",
                                days
                            )));
                        }
                        Some(days as u32)
                    }
                };
                Ok(Action::CleanNixStore { older_than_days })
            }
        }
    }

    pub fn name(&self) -> ActionName {
        match self {
            Action::RestartService { .. } => ActionName::RestartService,
            Action::SetCpuGovernor { .. } => ActionName::SetCpuGovernor,
            Action::ClearSystemCache => ActionName::ClearSystemCache,
            Action::RollbackGeneration => ActionName::RollbackGeneration,
            Action::KillProcess { .. } => ActionName::KillProcess,
            Action::AdjustSwappiness { .. } => ActionName::AdjustSwappiness,
            Action::RestartNetwork => ActionName::RestartNetwork,
            Action::CleanNixStore { .. } => ActionName::CleanNixStore,
        }
    }

    /// Commands for this action, before privilege elevation.
    ///
    /// Sequential steps run in order; for `RestartNetwork` the second entry
    /// is the fallback tried only when the first fails.
    pub fn commands(&self) -> Vec<CommandSpec> {
        match self {
            Action::RestartService { service } => {
                vec![CommandSpec::new("systemctl", ["restart", service.as_str()])
                    .with_timeout(Duration::from_secs(30))]
            }
            Action::SetCpuGovernor { governor } => vec![CommandSpec::new(
                "cpupower",
                ["frequency-set", "-g", governor.as_str()],
            )
            .with_timeout(Duration::from_secs(10))],
            Action::ClearSystemCache => vec![
                CommandSpec::new("sync", Vec::<String>::new())
                    .with_timeout(Duration::from_secs(30)),
                CommandSpec::new("sysctl", ["-w", "vm.drop_caches=3"])
                    .with_timeout(Duration::from_secs(10)),
            ],
            Action::RollbackGeneration => vec![CommandSpec::new(
                "nixos-rebuild",
                ["switch", "--rollback"],
            )
            .with_timeout(Duration::from_secs(300))],
            Action::KillProcess { pid, signal } => vec![CommandSpec::new(
                "kill",
                ["-s".to_string(), signal.clone(), pid.to_string()],
            )
            .with_timeout(Duration::from_secs(5))],
            Action::AdjustSwappiness { value } => vec![CommandSpec::new(
                "sysctl",
                ["-w".to_string(), format!("vm.swappiness={}", value)],
            )
            .with_timeout(Duration::from_secs(10))],
            Action::RestartNetwork => vec![
                CommandSpec::new("systemctl", ["restart", "NetworkManager"])
                    .with_timeout(Duration::from_secs(30)),
                CommandSpec::new("systemctl", ["restart", "systemd-networkd"])
                    .with_timeout(Duration::from_secs(30)),
            ],
            Action::CleanNixStore { older_than_days } => {
                let args = match older_than_days {
                    Some(days) => vec!["--delete-older-than".to_string(), format!("{}d", days)],
                    None => vec!["-d".to_string()],
                };
                vec![CommandSpec::new("nix-collect-garbage", args)
                    .with_timeout(Duration::from_secs(600))]
            }
        }
    }

    /// Governor fallback for hosts without cpupower: `tee` the name into each
    /// CPU's `scaling_governor` file.
    pub fn sysfs_governor_command(governor: &str, files: &[PathBuf]) -> CommandSpec {
        CommandSpec::new("tee", files.iter().map(|f| f.display().to_string()))
            .with_stdin(format!("{}\n", governor))
            .with_timeout(Duration::from_secs(10))
    }

    /// What a user could run by hand to get the same effect.
    pub fn manual_command(&self) -> String {
        // The network fallback is not part of the manual recipe
        let steps = match self {
            Action::RestartNetwork => 1,
            _ => usize::MAX,
        };
        self.commands()
            .iter()
            .take(steps)
            .map(|c| format!("sudo {}", c.command_line()))
            .collect::<Vec<_>>()
            .join(" && ")
    }

    /// Output reported on success when the command itself prints nothing useful
    pub fn success_message(&self) -> String {
        match self {
            Action::RestartService { service } => format!("Service {} restarted", service),
            Action::SetCpuGovernor { governor } => format!("CPU governor set to {}", governor),
            Action::ClearSystemCache => "System caches cleared".to_string(),
            Action::RollbackGeneration => "NixOS generation rolled back".to_string(),
            Action::KillProcess { pid, signal } => {
                format!("Process {} killed with {}", pid, signal)
            }
            Action::AdjustSwappiness { value } => format!("Swappiness set to {}", value),
            Action::RestartNetwork => "Network service restarted".to_string(),
            Action::CleanNixStore { .. } => "Nix store garbage collected".to_string(),
        }
    }
}

fn validate_service_name(service: &str) -> Result<()> {
    if !service_name_pattern().is_match(service) || service.starts_with('-') {
        return Err(HealingError::Validation(format!(
            "Invalid service name: {:?}",
            service
        )));
    }
    Ok(())
}

fn required_str<'a>(params: &'a Map<String, Value>, key: &str, missing: &str) -> Result<&'a str> {
    match optional_str(params, key)? {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(HealingError::Validation(missing.to_string())),
    }
}

fn optional_str<'a>(params: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(HealingError::Validation(format!(
            "Parameter {} must be a string, got {}",
            key, other
        ))),
    }
}

/// Accepts JSON integers and numeric strings
fn integer(value: &Value, key: &str) -> Result<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        HealingError::Validation(format!("Parameter {} must be an integer, got {}", key, value))
    })
}
