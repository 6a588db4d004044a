use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RunnerConfig;
use crate::error::ProcessError;
use crate::runner::{ManagedProcess, ProcessRetry, RunOptions};

use super::dispatch::{self, Dispatch};
use super::types::{Command, CommandOutcome};

/// Turns one [`Command`] into a [`CommandOutcome`].
///
/// `process` is shared with the orchestrator so shutdown can cancel it.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        command: &Command,
        process: Arc<ManagedProcess>,
    ) -> anyhow::Result<CommandOutcome>;
}

/// Runs commands through the local entry point: `<entry> [entry_args..] <argv..>`.
pub struct CliExecutor {
    cfg: RunnerConfig,
}

impl CliExecutor {
    pub fn new(cfg: RunnerConfig) -> Self {
        Self { cfg }
    }

    pub fn argv(&self, args: &[String]) -> Vec<String> {
        let mut argv = self.cfg.entry_args.clone();
        argv.extend(args.iter().cloned());
        argv
    }
}

#[async_trait]
impl CommandExecutor for CliExecutor {
    async fn execute(
        &self,
        command: &Command,
        process: Arc<ManagedProcess>,
    ) -> anyhow::Result<CommandOutcome> {
        let invocation = match dispatch::resolve(command, &self.cfg) {
            Dispatch::Run(invocation) => invocation,
            Dispatch::Reject(reason) => {
                tracing::warn!(
                    target: "outpost.agent",
                    stage = "command.rejected",
                    command.id = %command.id,
                    command.name = %command.name,
                    reason = %reason
                );
                return Ok(CommandOutcome::failure(reason));
            }
        };

        let argv = self.argv(&invocation.args);
        let opts = RunOptions::from_config(&self.cfg).with_timeout(invocation.timeout);
        let retry = ProcessRetry::from_config(&self.cfg);
        tracing::debug!(
            target: "outpost.agent",
            stage = "command.invoke",
            command.id = %command.id,
            entry = %self.cfg.entry,
            argv = ?argv,
            timeout_ms = invocation.timeout.as_millis() as u64
        );

        let cap = self.cfg.output_cap_chars;
        match process
            .run_with_retry(&self.cfg.entry, &argv, &opts, &retry)
            .await
        {
            Ok(result) => Ok(CommandOutcome::from_process(&result, cap)),
            Err(ProcessError::Timeout { timeout_ms, result }) => {
                Ok(CommandOutcome::from_timeout(timeout_ms, &result, cap))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runner::Signal;
    use pretty_assertions::assert_eq;

    /// `sh -c <script> <name> ...` so the script sees the command name as `$0`.
    fn sh_executor(script: &str) -> CliExecutor {
        CliExecutor::new(RunnerConfig {
            entry: "sh".into(),
            entry_args: vec!["-c".into(), script.into()],
            default_timeout_ms: 5_000,
            audit_timeout_ms: 5_000,
            ..RunnerConfig::default()
        })
    }

    #[tokio::test]
    async fn successful_invocation() {
        let exec = sh_executor(r#"echo "ran $0 $1""#);
        let outcome = exec
            .execute(
                &Command::new("c1", "export"),
                Arc::new(ManagedProcess::new()),
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CommandOutcome {
                ok: true,
                exit_code: 0,
                output: "ran export json".into(),
                error: None,
            }
        );
    }

    #[tokio::test]
    async fn nonzero_exit_reports_output_and_code() {
        let exec = sh_executor("echo found 2 issues; echo failing >&2; exit 4");
        let outcome = exec
            .execute(&Command::new("c1", "audit"), Arc::new(ManagedProcess::new()))
            .await
            .unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.exit_code, 4);
        assert_eq!(outcome.output, "found 2 issues\nfailing");
        assert_eq!(outcome.error.as_deref(), Some("command exited with code 4"));
    }

    #[tokio::test]
    async fn rejected_command_never_spawns() {
        let exec = CliExecutor::new(RunnerConfig {
            entry: "/definitely/not/a/program".into(),
            ..RunnerConfig::default()
        });
        let outcome = exec
            .execute(&Command::new("c1", "watch"), Arc::new(ManagedProcess::new()))
            .await
            .unwrap();
        assert!(!outcome.ok);
        assert_eq!(
            outcome.error.as_deref(),
            Some("command 'watch' requires an interactive session")
        );
    }

    #[tokio::test]
    async fn timeout_becomes_failed_outcome() {
        let exec = CliExecutor::new(RunnerConfig {
            entry: "sh".into(),
            entry_args: vec!["-c".into(), "echo started; sleep 5".into()],
            default_timeout_ms: 1_000,
            ..RunnerConfig::default()
        });
        let outcome = exec
            .execute(&Command::new("c1", "inventory"), Arc::new(ManagedProcess::new()))
            .await
            .unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.output, "started");
        assert_eq!(outcome.error.as_deref(), Some("command timed out after 1s"));
    }

    #[tokio::test]
    async fn cancelled_process_reports_signal() {
        let exec = sh_executor("sleep 5");
        let process = Arc::new(ManagedProcess::new());
        process.cancel(Signal::Term);
        let outcome = exec
            .execute(&Command::new("c1", "inventory"), process)
            .await
            .unwrap();
        assert_eq!(outcome.error.as_deref(), Some("command cancelled (SIGTERM)"));
    }

    #[tokio::test]
    async fn missing_entry_is_an_error() {
        let exec = CliExecutor::new(RunnerConfig {
            entry: "/definitely/not/a/program".into(),
            ..RunnerConfig::default()
        });
        let err = exec
            .execute(&Command::new("c1", "inventory"), Arc::new(ManagedProcess::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("spawn failed"));
    }
}
