use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use outpost_core::api::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "outpost", version, about = "Remote-command agent for the outpost control plane")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file. Defaults to ~/.outpost/config.toml, then ./outpost.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Control-plane base URL.
    #[arg(long, global = true)]
    pub server: Option<String>,

    #[arg(long, global = true)]
    pub token: Option<String>,

    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Local program that commands are dispatched to.
    #[arg(long, global = true)]
    pub entry: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ExecArgs {
    /// Logical command name, e.g. `audit`, `inventory`, `export`.
    pub name: String,

    /// Command argument (KEY=VALUE). Values that parse as JSON keep their type.
    /// Can be specified multiple times.
    #[arg(long = "arg", value_parser = parse_key_value, action = clap::ArgAction::Append)]
    pub args: Vec<(String, String)>,

    #[arg(long, default_value = "local")]
    pub id: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Handshake, drain the backlog, then listen for live commands (default).
    Connect,
    /// Handshake and drain the backlog, then exit.
    Drain,
    /// Run one command locally and print its outcome as JSON.
    Exec(ExecArgs),
}

impl Args {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Connect)
    }

    /// Flags win over config files and environment.
    pub fn apply_overrides(&self, cfg: &mut AppConfig) {
        let non_empty = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        if let Some(v) = non_empty(&self.server) {
            cfg.server.base_url = v;
        }
        if let Some(v) = non_empty(&self.token) {
            cfg.server.token = Some(v);
        }
        if let Some(v) = non_empty(&self.project) {
            cfg.server.project_id = Some(v);
        }
        if let Some(v) = non_empty(&self.entry) {
            cfg.runner.entry = v;
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
