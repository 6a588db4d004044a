use std::sync::Arc;

use outpost_core::api::{
    Agent, AgentOptions, AppConfig, CliError, CliExecutor, Command, CommandExecutor,
    EventStreamClient, HttpControlPlane, ManagedProcess, ProcessError, Signal, StreamOptions,
};
use serde_json::Value;

use crate::commands::cli::{Args, Commands, ExecArgs};

pub async fn run(args: &Args, cfg: &AppConfig) -> Result<i32, CliError> {
    match args.command() {
        Commands::Connect => connect(cfg).await,
        Commands::Drain => drain(cfg).await,
        Commands::Exec(exec_args) => exec(cfg, exec_args).await,
    }
}

fn project_id(cfg: &AppConfig) -> Result<String, CliError> {
    cfg.server
        .project_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            CliError::Config("project id is required (--project or OUTPOST_PROJECT)".to_string())
        })
}

fn control_plane(cfg: &AppConfig) -> Result<HttpControlPlane, CliError> {
    HttpControlPlane::from_config(cfg).map_err(|e| CliError::Config(format!("{e:#}")))
}

fn agent(cfg: &AppConfig, control: HttpControlPlane, project: String) -> Arc<Agent> {
    Agent::new(
        Arc::new(control),
        Arc::new(CliExecutor::new(cfg.runner.clone())),
        AgentOptions::new(project, &cfg.shutdown),
    )
}

async fn connect(cfg: &AppConfig) -> Result<i32, CliError> {
    let project = project_id(cfg)?;
    let control = control_plane(cfg)?;
    let stream = EventStreamClient::new(
        control.events_url().as_str(),
        cfg.server.token().map(str::to_string),
        StreamOptions::from(&cfg.stream),
    )?;
    tracing::info!(
        target: "outpost.agent",
        stage = "app.connect",
        server = %cfg.server.base_url,
        project = %project,
        entry = %cfg.runner.entry
    );

    let agent = agent(cfg, control, project);
    agent.install_signal_handlers()?;
    Ok(agent.run(Arc::new(stream)).await)
}

async fn drain(cfg: &AppConfig) -> Result<i32, CliError> {
    let project = project_id(cfg)?;
    let control = control_plane(cfg)?;
    let agent = agent(cfg, control, project);
    agent.install_signal_handlers()?;
    Ok(agent.drain().await)
}

async fn exec(cfg: &AppConfig, args: ExecArgs) -> Result<i32, CliError> {
    let mut command = Command::new(args.id, args.name);
    for (key, raw) in args.args {
        command = command.with_arg(key, arg_value(&raw));
    }

    let process = Arc::new(ManagedProcess::new());
    let on_interrupt = process.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel(Signal::Interrupt);
        }
    });

    let outcome = CliExecutor::new(cfg.runner.clone())
        .execute(&command, process)
        .await
        .map_err(|e| match e.downcast::<ProcessError>() {
            Ok(pe) => CliError::Process(pe),
            Err(e) => CliError::Anyhow(e),
        })?;

    let json = serde_json::to_string_pretty(&outcome).map_err(anyhow::Error::from)?;
    println!("{json}");
    Ok(if outcome.ok { 0 } else { 1 })
}

/// `true`, `3`, `{"a":1}` keep their JSON type; anything else is a string.
fn arg_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
