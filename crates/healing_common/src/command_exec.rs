//! Command execution layer for healing actions.
//!
//! - Commands are argv vectors, never shell strings
//! - Every command carries an explicit timeout
//! - Privilege elevation is a `sudo -n` prefix, applied in one place
//!
//! `CommandRunner` is the seam between action handlers and the OS: the
//! daemon and the development executor use `SystemRunner`, tests use
//! `FakeRunner` with scripted responses.

use crate::error::{HealingError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Maximum bytes of stdout/stderr kept per command
const MAX_OUTPUT_BYTES: usize = 16 * 1024;

/// Default timeout when a command does not specify one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// `sudo -n true` must answer within this, or sudo counts as unavailable
pub const SUDO_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Privilege
// ============================================================================

/// How commands reach root on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    /// Effective uid is 0, commands run as-is
    Root,
    /// Passwordless sudo is available, commands get a `sudo -n` prefix
    Sudo,
    /// Neither; privileged actions must be refused
    Unprivileged,
}

impl Privilege {
    /// Probe the current process. Runs `sudo -n true` at most once.
    pub async fn detect() -> Self {
        let root = is_root();
        let sudo = !root && has_passwordless_sudo(&SystemRunner).await;
        Self::from_probes(root, || sudo)
    }

    /// Combine probe results; the sudo probe is skipped when already root.
    pub fn from_probes(is_root: bool, has_sudo: impl FnOnce() -> bool) -> Self {
        if is_root {
            Privilege::Root
        } else if has_sudo() {
            Privilege::Sudo
        } else {
            Privilege::Unprivileged
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Privilege::Root => "root",
            Privilege::Sudo => "sudo",
            Privilege::Unprivileged => "unprivileged",
        }
    }
}

/// Check if we're running as root
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Check whether `sudo` works without a password prompt.
/// A probe that hangs past `SUDO_PROBE_TIMEOUT` is killed and counts as no.
pub async fn has_passwordless_sudo(runner: &dyn CommandRunner) -> bool {
    let probe = CommandSpec::new("sudo", ["-n", "true"]).with_timeout(SUDO_PROBE_TIMEOUT);
    match runner.run(&probe).await {
        Ok(output) => output.is_success(),
        Err(e) => {
            debug!("sudo probe failed: {}", e);
            false
        }
    }
}

// ============================================================================
// Command specification
// ============================================================================

/// A single command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Written to the child's stdin, which is then closed
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_TIMEOUT,
            stdin: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Apply the privilege prefix. Root and unprivileged leave the command untouched.
    pub fn elevate(self, privilege: Privilege) -> Self {
        match privilege {
            Privilege::Sudo => {
                let mut args = vec!["-n".to_string(), self.program];
                args.extend(self.args);
                Self {
                    program: "sudo".to_string(),
                    args,
                    timeout: self.timeout,
                    stdin: self.stdin,
                }
            }
            Privilege::Root | Privilege::Unprivileged => self,
        }
    }

    pub fn uses_sudo(&self) -> bool {
        self.program == "sudo"
    }

    /// Human-readable command line
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into `ExecutionFailed`
    pub fn into_result(self, spec: &CommandSpec) -> Result<CommandOutput> {
        if self.is_success() {
            return Ok(self);
        }
        let message = if self.stderr.trim().is_empty() {
            match self.exit_code {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            }
        } else {
            self.stderr.trim().to_string()
        };
        Err(HealingError::ExecutionFailed {
            command: spec.command_line(),
            message,
        })
    }
}

// ============================================================================
// Runner trait
// ============================================================================

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion or until its timeout elapses.
    ///
    /// A non-zero exit is not an error at this level; a timeout is.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs real processes through `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("Executing: {} (timeout {:?})", spec.command_line(), spec.timeout);

        let stdin = if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => HealingError::ExecutionFailed {
                    command: spec.command_line(),
                    message: format!("{} not found", spec.program),
                },
                std::io::ErrorKind::PermissionDenied => HealingError::ExecutionFailed {
                    command: spec.command_line(),
                    message: "permission denied".to_string(),
                },
                _ => HealingError::Io(e),
            })?;

        let pipe = child.stdin.take();
        let run = async move {
            if let (Some(mut pipe), Some(input)) = (pipe, spec.stdin.as_deref()) {
                pipe.write_all(input.as_bytes()).await?;
            }
            child.wait_with_output().await
        };

        // Dropping the run future on timeout drops the child, which kills it.
        match tokio::time::timeout(spec.timeout, run).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code(),
                stdout: truncate_output(&output.stdout),
                stderr: truncate_output(&output.stderr),
            }),
            Ok(Err(e)) => Err(HealingError::Io(e)),
            Err(_) => Err(HealingError::ExecutionTimeout {
                command: spec.command_line(),
                timeout_secs: spec.timeout.as_secs(),
            }),
        }
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    let slice = if bytes.len() > MAX_OUTPUT_BYTES {
        &bytes[..MAX_OUTPUT_BYTES]
    } else {
        bytes
    };
    String::from_utf8_lossy(slice).to_string()
}

// ============================================================================
// Fake runner (tests)
// ============================================================================

/// Scripted reply for `FakeRunner`
#[derive(Debug, Clone)]
pub enum FakeResponse {
    Output(CommandOutput),
    Timeout,
}

/// Records every command and replies from a script.
///
/// Rules are matched in insertion order against `command_line()` by substring;
/// unmatched commands succeed with stdout `"ok"`.
#[derive(Debug, Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<CommandSpec>>,
    rules: Mutex<Vec<(String, FakeResponse)>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, pattern: &str, response: FakeResponse) -> Self {
        self.rules
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((pattern.to_string(), response));
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(spec.clone());

        let line = spec.command_line();
        let reply = self
            .rules
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, response)| response.clone());

        match reply {
            Some(FakeResponse::Output(output)) => Ok(output),
            Some(FakeResponse::Timeout) => Err(HealingError::ExecutionTimeout {
                command: line,
                timeout_secs: spec.timeout.as_secs(),
            }),
            None => Ok(CommandOutput::success("ok")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevate_with_sudo_prefixes() {
        let spec = CommandSpec::new("systemctl", ["restart", "nginx"]).elevate(Privilege::Sudo);
        assert_eq!(spec.program, "sudo");
        assert_eq!(spec.args, vec!["-n", "systemctl", "restart", "nginx"]);
        assert!(spec.uses_sudo());
    }

    #[test]
    fn test_elevate_as_root_is_untouched() {
        let spec = CommandSpec::new("systemctl", ["restart", "nginx"]).elevate(Privilege::Root);
        assert_eq!(spec.command_line(), "systemctl restart nginx");
        assert!(!spec.uses_sudo());
    }

    #[test]
    fn test_privilege_from_probes() {
        assert_eq!(Privilege::from_probes(true, || panic!("not probed")), Privilege::Root);
        assert_eq!(Privilege::from_probes(false, || true), Privilege::Sudo);
        assert_eq!(Privilege::from_probes(false, || false), Privilege::Unprivileged);
    }

    #[tokio::test]
    async fn test_sudo_probe_outcomes() {
        let ok = FakeRunner::new();
        assert!(has_passwordless_sudo(&ok).await);
        assert_eq!(ok.calls()[0].command_line(), "sudo -n true");
        assert_eq!(ok.calls()[0].timeout, SUDO_PROBE_TIMEOUT);

        let password_needed = FakeRunner::new().respond(
            "sudo",
            FakeResponse::Output(CommandOutput::failure(1, "sudo: a password is required")),
        );
        assert!(!has_passwordless_sudo(&password_needed).await);

        let hung = FakeRunner::new().respond("sudo", FakeResponse::Timeout);
        assert!(!has_passwordless_sudo(&hung).await);
    }

    #[test]
    fn test_into_result_reports_stderr() {
        let spec = CommandSpec::new("systemctl", ["restart", "nope"]);
        let err = CommandOutput::failure(5, "Unit nope.service not found.\n")
            .into_result(&spec)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "systemctl restart nope failed: Unit nope.service not found."
        );
    }

    #[tokio::test]
    async fn test_system_runner_echo() {
        let spec = CommandSpec::new("echo", ["hello"]);
        let output = SystemRunner.run(&spec).await.unwrap();
        assert!(output.is_success());
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_system_runner_feeds_stdin() {
        let spec = CommandSpec::new("cat", Vec::<String>::new()).with_stdin("powersave\n");
        let output = SystemRunner.run(&spec).await.unwrap();
        assert!(output.is_success());
        assert_eq!(output.stdout, "powersave\n");
    }

    #[test]
    fn test_elevate_keeps_stdin() {
        let spec = CommandSpec::new("tee", ["/tmp/x"])
            .with_stdin("ondemand\n")
            .elevate(Privilege::Sudo);
        assert_eq!(spec.command_line(), "sudo -n tee /tmp/x");
        assert_eq!(spec.stdin.as_deref(), Some("ondemand\n"));
    }

    #[tokio::test]
    async fn test_system_runner_timeout() {
        let spec = CommandSpec::new("sleep", ["5"]).with_timeout(Duration::from_millis(100));
        let err = SystemRunner.run(&spec).await.unwrap_err();
        assert!(matches!(err, HealingError::ExecutionTimeout { .. }));
    }

    #[tokio::test]
    async fn test_system_runner_missing_program() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-xyz", Vec::<String>::new());
        let err = SystemRunner.run(&spec).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_fake_runner_rules() {
        let runner = FakeRunner::new()
            .respond("NetworkManager", FakeResponse::Output(CommandOutput::failure(1, "boom")))
            .respond("nixos-rebuild", FakeResponse::Timeout);

        let ok = runner.run(&CommandSpec::new("sync", Vec::<String>::new())).await.unwrap();
        assert_eq!(ok.stdout, "ok");

        let failed = runner
            .run(&CommandSpec::new("systemctl", ["restart", "NetworkManager"]))
            .await
            .unwrap();
        assert_eq!(failed.exit_code, Some(1));

        let timeout = runner
            .run(&CommandSpec::new("nixos-rebuild", ["switch", "--rollback"]))
            .await;
        assert!(matches!(timeout, Err(HealingError::ExecutionTimeout { .. })));
        assert_eq!(runner.call_count(), 3);
    }
}
