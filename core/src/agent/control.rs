use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::AgentError;
use crate::http::ResilientClient;

use super::types::{AgentSession, Command, CommandOutcome};

/// Request/response side of the control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Authenticate the agent. Any error refuses startup.
    async fn handshake(&self) -> Result<AgentSession, AgentError>;

    /// Commands queued while the agent was away, in delivery order.
    async fn fetch_backlog(&self) -> Result<Vec<Command>, AgentError>;

    async fn report(&self, command_id: &str, outcome: &CommandOutcome) -> Result<(), AgentError>;
}

pub struct HttpControlPlane {
    client: ResilientClient,
    base: Url,
    project: Option<String>,
    has_token: bool,
}

impl HttpControlPlane {
    pub fn new(
        client: ResilientClient,
        base_url: &str,
        project: Option<String>,
        has_token: bool,
    ) -> Result<Self, AgentError> {
        let base = Url::parse(base_url).map_err(|e| AgentError::InvalidUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(AgentError::InvalidUrl {
                url: base_url.to_string(),
                message: "not a hierarchical url".to_string(),
            });
        }
        Ok(Self {
            client,
            base,
            project: project.filter(|p| !p.trim().is_empty()),
            has_token,
        })
    }

    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let client = ResilientClient::from_config(&cfg.server, &cfg.retry)?;
        Ok(Self::new(
            client,
            &cfg.server.base_url,
            cfg.server.project_id.clone(),
            cfg.server.token().is_some(),
        )?)
    }

    fn endpoint(&self, segments: &[&str], with_project: bool) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if with_project {
            if let Some(project) = &self.project {
                url.query_pairs_mut().append_pair("project", project);
            }
        }
        url
    }

    /// `{base}/events?project={id}`
    pub fn events_url(&self) -> Url {
        self.endpoint(&["events"], true)
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn handshake(&self) -> Result<AgentSession, AgentError> {
        if !self.has_token {
            return Err(AgentError::MissingToken);
        }
        let url = self.endpoint(&["agent", "connect"], false);
        let body = self.client.get(url.as_str()).await?;
        let session: AgentSession =
            serde_json::from_value(body).map_err(|e| AgentError::Malformed {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        if !session.ok {
            return Err(AgentError::HandshakeRejected {
                url: url.to_string(),
            });
        }
        Ok(session)
    }

    async fn fetch_backlog(&self) -> Result<Vec<Command>, AgentError> {
        let url = self.endpoint(&["commands"], true);
        let items = match self.client.get(url.as_str()).await? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(AgentError::Malformed {
                    url: url.to_string(),
                    message: format!("expected an array of commands, got {other}"),
                })
            }
        };

        let mut commands = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<Command>(item) {
                Ok(cmd) => commands.push(cmd),
                Err(e) => tracing::warn!(
                    target: "outpost.agent",
                    stage = "backlog.skip",
                    error = %e,
                    "skipping malformed backlog entry"
                ),
            }
        }
        Ok(commands)
    }

    async fn report(&self, command_id: &str, outcome: &CommandOutcome) -> Result<(), AgentError> {
        let url = self.endpoint(&["command", command_id, "done"], false);
        self.client.post(url.as_str(), outcome.report_body()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RetryPolicy;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::time::Duration;

    fn plane(base: &str, project: Option<&str>, token: Option<&str>) -> HttpControlPlane {
        let client = ResilientClient::new(
            token.map(str::to_string),
            RetryPolicy::none(),
            Duration::from_secs(2),
        )
        .unwrap();
        HttpControlPlane::new(client, base, project.map(str::to_string), token.is_some()).unwrap()
    }

    #[test]
    fn endpoints_keep_base_path_and_escape_ids() {
        let p = plane("http://host:4400/api/", Some("p 1"), None);
        assert_eq!(p.events_url().as_str(), "http://host:4400/api/events?project=p+1");
        assert_eq!(
            p.endpoint(&["command", "a/b", "done"], false).as_str(),
            "http://host:4400/api/command/a%2Fb/done"
        );
    }

    #[tokio::test]
    async fn handshake_requires_token() {
        let p = plane("http://127.0.0.1:9", Some("p1"), None);
        let err = p.handshake().await.unwrap_err();
        assert!(matches!(err, AgentError::MissingToken));
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn handshake_parses_session() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/agent/connect")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(
                json!({"ok": true, "user": "dev", "project": "p1", "projectName": "Demo",
                       "endpoints": {"dashboard": "http://dash/p1"}})
                .to_string(),
            )
            .create_async()
            .await;

        let session = plane(&server.url(), Some("p1"), Some("tok"))
            .handshake()
            .await
            .unwrap();
        assert_eq!(session.user_label(), "dev");
        assert_eq!(session.endpoints.dashboard.as_deref(), Some("http://dash/p1"));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn handshake_not_ok_is_rejected() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/agent/connect")
            .with_status(200)
            .with_body(r#"{"ok":false}"#)
            .create_async()
            .await;

        let err = plane(&server.url(), None, Some("tok"))
            .handshake()
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::HandshakeRejected { .. }));
    }

    #[tokio::test]
    async fn backlog_skips_malformed_entries() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/commands")
            .match_query(Matcher::UrlEncoded("project".into(), "p1".into()))
            .with_status(200)
            .with_body(
                json!([
                    {"id": "c1", "name": "audit", "args": {}},
                    {"name": "missing-id"},
                    {"id": "c2", "name": "inventory"}
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let cmds = plane(&server.url(), Some("p1"), None)
            .fetch_backlog()
            .await
            .unwrap();
        let ids: Vec<_> = cmds.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn empty_backlog_is_not_an_error() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/commands")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let cmds = plane(&server.url(), Some("p1"), None)
            .fetch_backlog()
            .await
            .unwrap();
        assert!(cmds.is_empty());
    }

    #[tokio::test]
    async fn report_posts_outcome_body() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("POST", "/command/c1/done")
            .match_body(Matcher::Json(json!({
                "ok": false,
                "output": "",
                "error": "unknown command 'nope'"
            })))
            .with_status(200)
            .create_async()
            .await;

        plane(&server.url(), None, None)
            .report("c1", &CommandOutcome::failure("unknown command 'nope'"))
            .await
            .unwrap();
        m.assert_async().await;
    }
}
