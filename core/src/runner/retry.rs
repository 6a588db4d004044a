use crate::error::ProcessError;

use super::supervisor::ManagedProcess;
use super::types::{ProcessResult, ProcessRetry, RunOptions};

impl ManagedProcess {
    /// Like [`ManagedProcess::run`], re-running failed attempts up to `retry.retries` times.
    ///
    /// Timeouts and cancellations are returned as-is; everything else that is
    /// not a success (non-zero exit, spawn failure) is retried.
    pub async fn run_with_retry(
        &self,
        program: &str,
        args: &[String],
        opts: &RunOptions,
        retry: &ProcessRetry,
    ) -> Result<ProcessResult, ProcessError> {
        let attempts = retry.retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            let outcome = self.run(program, args, opts).await;
            let retryable = match &outcome {
                Ok(result) => !result.succeeded && !result.cancelled,
                Err(err) => !err.is_timeout(),
            };
            if !retryable || attempt >= attempts || self.cancel_requested().is_some() {
                return outcome;
            }

            tracing::warn!(
                target: "outpost.runner",
                stage = "process.retry",
                program,
                attempt,
                attempts,
                delay_ms = retry.delay.as_millis() as u64,
                error = %describe(&outcome),
                "process failed, retrying"
            );
            tokio::time::sleep(retry.delay).await;
            attempt += 1;
        }
    }
}

fn describe(outcome: &Result<ProcessResult, ProcessError>) -> String {
    match outcome {
        Ok(result) => format!("exit code {}", result.exit_code),
        Err(err) => err.to_string(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn opts(timeout_ms: u64) -> RunOptions {
        RunOptions {
            timeout: Duration::from_millis(timeout_ms),
            max_output_bytes: 4096,
            cwd: None,
            env: Vec::new(),
        }
    }

    fn retry(retries: u32) -> ProcessRetry {
        ProcessRetry {
            retries,
            delay: Duration::from_millis(10),
        }
    }

    fn script_args(script: &str, marker: &std::path::Path) -> Vec<String> {
        vec![
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
            marker.display().to_string(),
        ]
    }

    #[tokio::test]
    async fn failed_attempt_is_retried_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran-once");
        let args = script_args(
            r#"if [ -f "$1" ]; then echo second; else touch "$1"; exit 1; fi"#,
            &marker,
        );

        let r = ManagedProcess::new()
            .run_with_retry("sh", &args, &opts(5_000), &retry(2))
            .await
            .unwrap();
        assert!(r.succeeded);
        assert_eq!(r.stdout, "second\n");
    }

    #[tokio::test]
    async fn gives_up_after_configured_retries() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("count");
        let args = script_args(r#"echo x >> "$1"; exit 2"#, &counter);

        let r = ManagedProcess::new()
            .run_with_retry("sh", &args, &opts(5_000), &retry(2))
            .await
            .unwrap();
        assert_eq!(r.exit_code, 2);
        let runs = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(runs.lines().count(), 3);
    }

    #[tokio::test]
    async fn timeout_is_never_retried() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("count");
        let args = script_args(r#"echo x >> "$1"; sleep 5"#, &counter);

        let err = ManagedProcess::new()
            .run_with_retry("sh", &args, &opts(200), &retry(3))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        let runs = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(runs.lines().count(), 1);
    }

    #[tokio::test]
    async fn cancelled_process_is_never_retried() {
        let p = ManagedProcess::new();
        p.cancel(crate::runner::Signal::Term);
        let r = p
            .run_with_retry("sh", &["-c".into(), "exit 0".into()], &opts(1_000), &retry(3))
            .await
            .unwrap();
        assert!(r.cancelled);
    }
}
