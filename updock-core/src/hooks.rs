//! Lifecycle hook execution.
//!
//! Hooks are operator-supplied shell commands run before and after an
//! update, bounded by a timeout. A timed-out or failed hook is reported as
//! an outcome, not an error; the orchestrator decides whether to abort.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

use crate::error::{Result, UpdockError};

/// A hook invocation request.
#[derive(Debug, Clone)]
pub struct HookSpec {
    pub command: String,
    pub timeout: Duration,
    pub env: HashMap<String, String>,
}

/// Result of a hook run.
#[derive(Debug, Clone, Default)]
pub struct HookOutcome {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

impl HookOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Short description for logs and audit entries.
    pub fn describe(&self) -> String {
        if self.timed_out {
            "timed out".to_string()
        } else {
            match self.exit_code {
                Some(0) => "exit code 0".to_string(),
                Some(code) => format!("exit code {code}: {}", self.stderr.trim()),
                None => "terminated by signal".to_string(),
            }
        }
    }
}

/// Hook execution seam.
#[async_trait]
pub trait HookRunner: Send + Sync {
    async fn run(&self, spec: &HookSpec) -> Result<HookOutcome>;
}

/// Default runner executing hooks through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct CommandHookRunner;

#[async_trait]
impl HookRunner for CommandHookRunner {
    async fn run(&self, spec: &HookSpec) -> Result<HookOutcome> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&spec.command)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| UpdockError::HookFailed {
            stage: "spawn".into(),
            reason: e.to_string(),
        })?;

        match timeout(spec.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(HookOutcome {
                exit_code: output.status.code(),
                timed_out: false,
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(UpdockError::HookFailed {
                stage: "wait".into(),
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(
                    command = %spec.command,
                    timeout_secs = spec.timeout.as_secs(),
                    "Hook timed out"
                );
                Ok(HookOutcome { timed_out: true, ..Default::default() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(command: &str, timeout: Duration) -> HookSpec {
        HookSpec { command: command.to_string(), timeout, env: HashMap::new() }
    }

    #[tokio::test]
    async fn test_successful_hook_captures_stdout() {
        let outcome = CommandHookRunner
            .run(&spec("echo hello", Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_failing_hook_reports_exit_code() {
        let outcome = CommandHookRunner
            .run(&spec("exit 3", Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_timeout_is_an_outcome_not_an_error() {
        let outcome = CommandHookRunner
            .run(&spec("sleep 5", Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn test_env_passed_through() {
        let mut env = HashMap::new();
        env.insert("UPDOCK_CONTAINER".to_string(), "web".to_string());
        let outcome = CommandHookRunner
            .run(&HookSpec {
                command: "echo $UPDOCK_CONTAINER".to_string(),
                timeout: Duration::from_secs(5),
                env,
            })
            .await
            .unwrap();
        assert_eq!(outcome.stdout.trim(), "web");
    }
}
