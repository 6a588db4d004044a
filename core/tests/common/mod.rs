#![allow(dead_code)]

use std::sync::Arc;

use outpost_core::api::{
    Agent, AgentOptions, AppConfig, CliExecutor, EventStreamClient, HttpControlPlane,
    StreamOptions,
};

pub const TOKEN: &str = "test-token";
pub const PROJECT: &str = "p1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Config pointing at `server_url`, running `sh -c <script> <command-name>`.
pub fn config(server_url: &str, script: &str) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.server.base_url = server_url.to_string();
    cfg.server.token = Some(TOKEN.to_string());
    cfg.server.project_id = Some(PROJECT.to_string());
    cfg.server.request_timeout_ms = 5_000;
    cfg.retry.max_retries = 0;
    cfg.retry.base_delay_ms = 1;
    cfg.stream.reconnect_interval_ms = 5;
    cfg.stream.max_reconnect_attempts = 0;
    cfg.runner.entry = "sh".to_string();
    cfg.runner.entry_args = vec!["-c".to_string(), script.to_string()];
    cfg.runner.default_timeout_ms = 5_000;
    cfg.runner.audit_timeout_ms = 5_000;
    cfg.shutdown.grace_period_ms = 3_000;
    cfg.shutdown.poll_interval_ms = 10;
    cfg
}

pub fn assemble(cfg: &AppConfig) -> (Arc<Agent>, Arc<EventStreamClient>) {
    let control = HttpControlPlane::from_config(cfg).expect("control plane");
    let stream = EventStreamClient::new(
        control.events_url().as_str(),
        cfg.server.token().map(str::to_string),
        StreamOptions::from(&cfg.stream),
    )
    .expect("stream client");
    let agent = Agent::new(
        Arc::new(control),
        Arc::new(CliExecutor::new(cfg.runner.clone())),
        AgentOptions::new(PROJECT, &cfg.shutdown),
    );
    (agent, Arc::new(stream))
}
