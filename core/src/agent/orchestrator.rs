use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::watch;

use crate::config::ShutdownConfig;
use crate::error::AgentError;
use crate::runner::{ManagedProcess, Signal};
use crate::stream::{EventSource, FailureKind, StreamNotification};

use super::active::ActiveCommands;
use super::control::ControlPlane;
use super::executor::CommandExecutor;
use super::types::{AgentPhase, Command, CommandOutcome, ShutdownCause};

/// How long cancelled commands get to report before the agent exits anyway.
pub const REPORT_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Stream events for any other project are ignored.
    pub project_id: String,
    pub grace_period: Duration,
    pub poll_interval: Duration,
    pub report_wait: Duration,
}

impl AgentOptions {
    pub fn new(project_id: impl Into<String>, shutdown: &ShutdownConfig) -> Self {
        Self {
            project_id: project_id.into(),
            grace_period: Duration::from_millis(shutdown.grace_period_ms),
            poll_interval: Duration::from_millis(shutdown.poll_interval_ms.max(1)),
            report_wait: REPORT_WAIT,
        }
    }
}

/// Owns the agent lifecycle: handshake, backlog catch-up, live stream, shutdown.
pub struct Agent {
    control: Arc<dyn ControlPlane>,
    executor: Arc<dyn CommandExecutor>,
    opts: AgentOptions,
    active: Arc<ActiveCommands>,
    phase: watch::Sender<AgentPhase>,
    cause: watch::Sender<Option<ShutdownCause>>,
}

impl Agent {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        executor: Arc<dyn CommandExecutor>,
        opts: AgentOptions,
    ) -> Arc<Self> {
        let (phase, _) = watch::channel(AgentPhase::Starting);
        let (cause, _) = watch::channel(None);
        Arc::new(Self {
            control,
            executor,
            opts,
            active: ActiveCommands::new(),
            phase,
            cause,
        })
    }

    pub fn phase(&self) -> AgentPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<AgentPhase> {
        self.phase.subscribe()
    }

    /// Ids of commands currently executing, oldest first.
    pub fn active_commands(&self) -> Vec<String> {
        self.active.ids()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cause.borrow().is_some()
    }

    pub fn shutdown_cause(&self) -> Option<ShutdownCause> {
        self.cause.borrow().clone()
    }

    /// Request shutdown. Only the first cause counts; returns false afterwards.
    pub fn trigger_shutdown(&self, cause: ShutdownCause) -> bool {
        let label = cause.to_string();
        let first = self.cause.send_if_modified(move |current| {
            if current.is_some() {
                return false;
            }
            *current = Some(cause);
            true
        });
        if first {
            tracing::info!(
                target: "outpost.agent",
                stage = "agent.shutdown_requested",
                cause = %label
            );
        } else {
            tracing::debug!(
                target: "outpost.agent",
                stage = "agent.shutdown_ignored",
                cause = %label,
                "shutdown already in progress"
            );
        }
        first
    }

    fn set_phase(&self, next: AgentPhase) {
        let prev = self.phase.send_replace(next);
        if prev != next {
            tracing::debug!(
                target: "outpost.agent",
                stage = "agent.phase",
                from = %prev,
                to = %next
            );
        }
    }

    /// Full lifecycle. Returns the process exit code.
    pub async fn run(self: &Arc<Self>, stream: Arc<dyn EventSource>) -> i32 {
        if !self.start().await {
            return 1;
        }
        let mut cause_rx = self.cause.subscribe();
        self.catch_up(&mut cause_rx).await;
        if !self.is_shutting_down() {
            self.listen(stream.as_ref(), &mut cause_rx).await;
        }
        self.shutdown(Some(stream.as_ref())).await
    }

    /// Handshake and backlog only, then exit.
    pub async fn drain(self: &Arc<Self>) -> i32 {
        if !self.start().await {
            return 1;
        }
        let mut cause_rx = self.cause.subscribe();
        self.catch_up(&mut cause_rx).await;
        self.trigger_shutdown(ShutdownCause::Completed);
        self.shutdown(None).await
    }

    async fn start(&self) -> bool {
        self.set_phase(AgentPhase::Starting);
        match self.control.handshake().await {
            Ok(session) => {
                tracing::info!(
                    target: "outpost.agent",
                    stage = "agent.connected",
                    user = %session.user_label(),
                    project = %self.opts.project_id,
                    project_name = ?session.project_name,
                    dashboard = ?session.endpoints.dashboard
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    target: "outpost.agent",
                    stage = "agent.handshake_failed",
                    auth = e.is_auth(),
                    error = %e,
                    "refusing to start"
                );
                self.trigger_shutdown(ShutdownCause::AuthFailure(e.to_string()));
                self.set_phase(AgentPhase::Terminated);
                false
            }
        }
    }

    async fn catch_up(self: &Arc<Self>, cause_rx: &mut watch::Receiver<Option<ShutdownCause>>) {
        if self.is_shutting_down() {
            return;
        }
        self.set_phase(AgentPhase::DrainingBacklog);

        // Runs detached so a shutdown can proceed while the current command finishes.
        let agent = self.clone();
        let mut task = tokio::spawn(async move { agent.drain_backlog().await });
        tokio::select! {
            joined = &mut task => match joined {
                Ok(Ok(count)) => tracing::info!(
                    target: "outpost.agent",
                    stage = "backlog.done",
                    count
                ),
                Ok(Err(e)) if e.is_auth() => {
                    tracing::error!(
                        target: "outpost.agent",
                        stage = "backlog.auth_failed",
                        error = %e
                    );
                    self.trigger_shutdown(ShutdownCause::AuthFailure(e.to_string()));
                }
                Ok(Err(e)) => tracing::warn!(
                    target: "outpost.agent",
                    stage = "backlog.failed",
                    error = %e,
                    "continuing with live stream"
                ),
                Err(e) => tracing::error!(
                    target: "outpost.agent",
                    stage = "backlog.panicked",
                    error = %e
                ),
            },
            _ = wait_for_cause(cause_rx) => tracing::info!(
                target: "outpost.agent",
                stage = "backlog.interrupted",
                active = ?self.active.ids()
            ),
        }
    }

    /// Strictly sequential: each command is executed and reported before the next.
    async fn drain_backlog(&self) -> Result<usize, AgentError> {
        let commands = self.control.fetch_backlog().await?;
        let total = commands.len();
        tracing::info!(target: "outpost.agent", stage = "backlog.fetched", count = total);

        let mut done = 0;
        for command in commands {
            if self.is_shutting_down() {
                tracing::warn!(
                    target: "outpost.agent",
                    stage = "backlog.abandoned",
                    remaining = total - done
                );
                break;
            }
            let process = Arc::new(ManagedProcess::new());
            let _guard = self.active.track(&command.id, process.clone());
            self.execute_and_report(&command, process, "backlog").await;
            done += 1;
        }
        Ok(done)
    }

    async fn listen(
        self: &Arc<Self>,
        stream: &dyn EventSource,
        cause_rx: &mut watch::Receiver<Option<ShutdownCause>>,
    ) {
        self.set_phase(AgentPhase::StreamConnecting);
        let mut rx = match stream.connect() {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(target: "outpost.agent", stage = "stream.connect_failed", error = %e);
                self.trigger_shutdown(ShutdownCause::StreamFailed(e.to_string()));
                return;
            }
        };

        loop {
            tokio::select! {
                _ = wait_for_cause(cause_rx) => break,
                next = rx.recv() => match next {
                    Some(notification) => self.handle_notification(notification),
                    None => {
                        self.trigger_shutdown(ShutdownCause::StreamFailed(
                            "event stream closed".to_string(),
                        ));
                        break;
                    }
                },
            }
        }
    }

    pub fn handle_notification(self: &Arc<Self>, notification: StreamNotification) {
        match notification {
            StreamNotification::Connecting => {
                tracing::debug!(target: "outpost.agent", stage = "stream.connecting")
            }
            StreamNotification::Connected => {
                if !self.is_shutting_down() {
                    self.set_phase(AgentPhase::Listening);
                }
                tracing::info!(target: "outpost.agent", stage = "stream.connected");
            }
            StreamNotification::Reconnecting { attempt, delay } => tracing::warn!(
                target: "outpost.agent",
                stage = "stream.reconnecting",
                attempt,
                delay_ms = delay.as_millis() as u64
            ),
            StreamNotification::Disconnected => {
                tracing::info!(target: "outpost.agent", stage = "stream.disconnected")
            }
            StreamNotification::Error(failure) if failure.fatal => {
                let cause = match failure.kind {
                    FailureKind::Auth => ShutdownCause::AuthFailure(failure.message),
                    _ => ShutdownCause::StreamFailed(failure.message),
                };
                self.trigger_shutdown(cause);
            }
            StreamNotification::Error(failure) => tracing::warn!(
                target: "outpost.agent",
                stage = "stream.error",
                kind = ?failure.kind,
                error = %failure.message
            ),
            StreamNotification::Event(event) if event.event_type == "command" => {
                if let Some(command) = parse_stream_command(&event.data, &self.opts.project_id) {
                    self.accept(command);
                }
            }
            StreamNotification::Event(event) => tracing::debug!(
                target: "outpost.agent",
                stage = "stream.event",
                event_type = %event.event_type,
                id = ?event.id
            ),
        }
    }

    /// Dispatch a live command without blocking the receive loop.
    fn accept(self: &Arc<Self>, command: Command) {
        if self.is_shutting_down() {
            tracing::warn!(
                target: "outpost.agent",
                stage = "command.refused",
                command.id = %command.id,
                "shutting down, not accepting new commands"
            );
            return;
        }
        let process = Arc::new(ManagedProcess::new());
        let guard = self.active.track(&command.id, process.clone());
        let agent = self.clone();
        tokio::spawn(async move {
            agent.execute_and_report(&command, process, "stream").await;
            drop(guard);
        });
    }

    async fn execute_and_report(
        &self,
        command: &Command,
        process: Arc<ManagedProcess>,
        source: &'static str,
    ) -> CommandOutcome {
        let started = Instant::now();
        tracing::info!(
            target: "outpost.agent",
            stage = "command.start",
            command.id = %command.id,
            command.name = %command.name,
            source
        );

        let outcome = match self.executor.execute(command, process).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("{e:#}");
                tracing::error!(
                    target: "outpost.agent",
                    stage = "command.error",
                    command.id = %command.id,
                    error = %message
                );
                CommandOutcome::failure(message)
            }
        };
        tracing::info!(
            target: "outpost.agent",
            stage = "command.finish",
            command.id = %command.id,
            ok = outcome.ok,
            exit_code = outcome.exit_code,
            duration_ms = started.elapsed().as_millis() as u64
        );

        // Best effort; unreported work comes back through the backlog.
        match self.control.report(&command.id, &outcome).await {
            Ok(()) => tracing::debug!(
                target: "outpost.agent",
                stage = "command.reported",
                command.id = %command.id
            ),
            Err(e) => tracing::warn!(
                target: "outpost.agent",
                stage = "command.report_failed",
                command.id = %command.id,
                error = %e
            ),
        }
        outcome
    }

    async fn shutdown(&self, stream: Option<&dyn EventSource>) -> i32 {
        let cause = self.shutdown_cause().unwrap_or(ShutdownCause::Completed);
        self.set_phase(AgentPhase::ShuttingDown);
        tracing::info!(
            target: "outpost.agent",
            stage = "agent.shutdown",
            cause = %cause,
            active = self.active.len()
        );

        self.set_phase(AgentPhase::Draining);
        let idle = self
            .active
            .wait_idle(self.opts.grace_period, self.opts.poll_interval)
            .await;
        if !idle {
            tracing::warn!(
                target: "outpost.agent",
                stage = "agent.grace_exceeded",
                remaining = ?self.active.ids(),
                "cancelling remaining commands"
            );
            self.active.cancel_all(Signal::Term);
            let reported = self
                .active
                .wait_idle(self.opts.report_wait, self.opts.poll_interval)
                .await;
            if !reported {
                tracing::warn!(
                    target: "outpost.agent",
                    stage = "agent.abandoned",
                    remaining = ?self.active.ids()
                );
            }
        }

        if let Some(stream) = stream {
            stream.disconnect();
        }
        self.set_phase(AgentPhase::Terminated);
        let code = cause.exit_code();
        tracing::info!(target: "outpost.agent", stage = "agent.exit", exit_code = code);
        code
    }

    /// Route SIGINT, SIGTERM and SIGHUP (ctrl-c only off Unix) into [`Agent::trigger_shutdown`].
    pub fn install_signal_handlers(self: &Arc<Self>) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sighup = signal(SignalKind::hangup())?;
            let agent = self.clone();
            tokio::spawn(async move {
                loop {
                    let name = tokio::select! {
                        Some(()) = sigint.recv() => "SIGINT",
                        Some(()) = sigterm.recv() => "SIGTERM",
                        Some(()) = sighup.recv() => "SIGHUP",
                        else => break,
                    };
                    agent.on_signal(name);
                }
            });
        }
        #[cfg(not(unix))]
        {
            let agent = self.clone();
            tokio::spawn(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    agent.on_signal("SIGINT");
                }
            });
        }
        Ok(())
    }

    fn on_signal(&self, name: &str) {
        if !self.trigger_shutdown(ShutdownCause::Signal(name.to_string())) {
            tracing::info!(
                target: "outpost.agent",
                stage = "agent.signal_ignored",
                signal = name,
                "already shutting down"
            );
        }
    }
}

async fn wait_for_cause(rx: &mut watch::Receiver<Option<ShutdownCause>>) {
    let _ = rx.wait_for(Option::is_some).await;
}

/// `{project, id, name, args}` addressed to `project`, else `None`.
fn parse_stream_command(data: &Value, project: &str) -> Option<Command> {
    match data.get("project").and_then(Value::as_str) {
        Some(p) if p == project => {}
        other => {
            tracing::debug!(
                target: "outpost.agent",
                stage = "stream.foreign_command",
                project = ?other,
                "ignoring command for another project"
            );
            return None;
        }
    }
    match serde_json::from_value::<Command>(data.clone()) {
        Ok(command) => Some(command),
        Err(e) => {
            tracing::warn!(
                target: "outpost.agent",
                stage = "stream.bad_command",
                error = %e
            );
            None
        }
    }
}
