use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ProcessError;
use crate::util::RingBytes;

use super::io_pump::pump;
use super::kill::{self, KILL_GRACE};
use super::types::{ProcessResult, RunOptions, Signal};

enum Exit {
    Exited(ExitStatus),
    TimedOut,
    Cancelled(Signal),
}

/// Runs one subprocess at a time and lets another task cancel it.
///
/// A cancel requested before [`ManagedProcess::run`] makes the next run return
/// a cancelled result without spawning anything.
pub struct ManagedProcess {
    cancel_tx: watch::Sender<Option<Signal>>,
}

impl Default for ManagedProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagedProcess {
    pub fn new() -> Self {
        let (cancel_tx, _) = watch::channel(None);
        Self { cancel_tx }
    }

    /// Request termination with `signal`. The first request wins.
    pub fn cancel(&self, signal: Signal) {
        self.cancel_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(signal);
            true
        });
    }

    pub fn cancel_requested(&self) -> Option<Signal> {
        *self.cancel_tx.borrow()
    }

    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        opts: &RunOptions,
    ) -> Result<ProcessResult, ProcessError> {
        let started = Instant::now();
        let mut cancel_rx = self.cancel_tx.subscribe();
        if let Some(signal) = *cancel_rx.borrow_and_update() {
            tracing::debug!(
                target: "outpost.runner",
                stage = "process.skipped",
                program,
                signal = %signal,
                "cancelled before spawn"
            );
            return Ok(ProcessResult::cancelled_before_start(signal));
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &opts.env {
            cmd.env(key, value);
        }
        kill::apply_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;
        let pid = child.id();
        let timeout_ms = opts.timeout.as_millis() as u64;
        tracing::info!(
            target: "outpost.runner",
            stage = "process.spawned",
            program,
            pid = ?pid,
            timeout_ms
        );

        let out_ring = RingBytes::new(opts.max_output_bytes);
        let err_ring = RingBytes::new(opts.max_output_bytes);
        let out_task = child
            .stdout
            .take()
            .map(|s| pump(s, out_ring.clone(), "stdout"));
        let err_task = child
            .stderr
            .take()
            .map(|s| pump(s, err_ring.clone(), "stderr"));

        let exit = tokio::select! {
            status = child.wait() => Exit::Exited(status.map_err(ProcessError::Wait)?),
            _ = tokio::time::sleep(opts.timeout) => Exit::TimedOut,
            signal = wait_for_cancel(&mut cancel_rx) => Exit::Cancelled(signal),
        };

        let (status, delivered, timed_out, cancelled) = match exit {
            Exit::Exited(status) => (Some(status), None, false, false),
            Exit::TimedOut => {
                tracing::warn!(
                    target: "outpost.runner",
                    stage = "process.timeout",
                    program,
                    pid = ?pid,
                    timeout_ms
                );
                let status = kill::terminate(&mut child, Signal::Term).await;
                (status, Some(Signal::Term), true, false)
            }
            Exit::Cancelled(signal) => {
                tracing::info!(
                    target: "outpost.runner",
                    stage = "process.cancel",
                    program,
                    pid = ?pid,
                    signal = %signal
                );
                let status = kill::terminate(&mut child, signal).await;
                (status, Some(signal), false, true)
            }
        };

        // Descendants can keep the pipes open after the leader exits.
        let out_closed = drain(out_task).await;
        let err_closed = drain(err_task).await;
        if !(out_closed && err_closed) {
            if let Some(pid) = pid {
                tracing::debug!(
                    target: "outpost.runner",
                    stage = "process.reap_group",
                    pid
                );
                kill::signal_group(pid, Signal::Kill);
            }
        }

        let exit_code = status.and_then(|s| s.code()).unwrap_or(-1);
        let signal = status
            .as_ref()
            .and_then(kill::exit_signal)
            .or_else(|| delivered.map(|s| s.as_str().to_string()));
        let result = ProcessResult {
            exit_code,
            signal,
            stdout: out_ring.to_string_lossy(),
            stderr: err_ring.to_string_lossy(),
            succeeded: !timed_out && !cancelled && exit_code == 0,
            timed_out,
            cancelled,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            target: "outpost.runner",
            stage = "process.exit",
            program,
            pid = ?pid,
            exit_code = result.exit_code,
            signal = ?result.signal,
            timed_out,
            cancelled,
            duration_ms = result.duration_ms
        );

        if timed_out {
            return Err(ProcessError::Timeout {
                timeout_ms,
                result: Box::new(result),
            });
        }
        Ok(result)
    }
}

async fn wait_for_cancel(rx: &mut watch::Receiver<Option<Signal>>) -> Signal {
    loop {
        if let Some(signal) = *rx.borrow_and_update() {
            return signal;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Wait for a pump to hit EOF. Returns false if it had to be abandoned.
async fn drain(task: Option<JoinHandle<std::io::Result<u64>>>) -> bool {
    let Some(mut task) = task else {
        return true;
    };
    match tokio::time::timeout(KILL_GRACE, &mut task).await {
        Ok(_) => true,
        Err(_) => {
            task.abort();
            false
        }
    }
}
