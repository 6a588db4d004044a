//! Process-tree termination. On Unix every child leads its own session, so a
//! signal sent to the negated pid reaches all of its descendants.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};

use super::types::Signal;

/// Time a process tree gets to exit after a signal before escalating to SIGKILL.
pub(crate) const KILL_GRACE: Duration = Duration::from_secs(2);

#[cfg(unix)]
pub(crate) fn apply_process_group(cmd: &mut Command) {
    // SAFETY: setsid is async-signal-safe and runs in the forked child only.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(crate) fn apply_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
pub(crate) fn signal_group(pid: u32, signal: Signal) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: plain syscall; a stale group id only yields ESRCH.
    unsafe {
        libc::kill(-pid, signal.as_raw());
    }
}

#[cfg(not(unix))]
pub(crate) fn signal_group(_pid: u32, _signal: Signal) {}

fn signal_child(child: &mut Child, signal: Signal) {
    match child.id() {
        #[cfg(unix)]
        Some(pid) => signal_group(pid, signal),
        #[cfg(not(unix))]
        Some(_) => {
            let _ = child.start_kill();
        }
        None => {}
    }
}

/// Send `signal` to the child's tree, wait up to [`KILL_GRACE`], then SIGKILL.
pub(crate) async fn terminate(child: &mut Child, signal: Signal) -> Option<ExitStatus> {
    signal_child(child, signal);
    if let Ok(status) = tokio::time::timeout(KILL_GRACE, child.wait()).await {
        return status.ok();
    }

    tracing::warn!(
        target: "outpost.runner",
        stage = "process.escalate",
        pid = ?child.id(),
        signal = %signal,
        "process ignored signal, sending SIGKILL"
    );
    signal_child(child, Signal::Kill);
    let _ = child.kill().await;
    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => None,
    }
}

/// Signal name for a status that ended by signal.
#[cfg(unix)]
pub(crate) fn exit_signal(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(Signal::name_of)
}

#[cfg(not(unix))]
pub(crate) fn exit_signal(_status: &ExitStatus) -> Option<String> {
    None
}
