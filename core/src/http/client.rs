use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use crate::config::{RetryConfig, ServerConfig};
use crate::error::http::preview_body;
use crate::error::RequestError;

use super::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Decoded JSON body; `Value::Null` for an empty body.
    pub body: Value,
}

#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Per-request timeout; falls back to the client default.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn json(body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::default()
        }
    }
}

/// HTTP client that retries transient failures according to a [`RetryPolicy`].
#[derive(Clone)]
pub struct ResilientClient {
    http: reqwest::Client,
    token: Option<String>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl ResilientClient {
    pub fn new(
        token: Option<String>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            token: token.filter(|t| !t.trim().is_empty()),
            policy,
            timeout,
        })
    }

    pub fn from_config(server: &ServerConfig, retry: &RetryConfig) -> anyhow::Result<Self> {
        Self::new(
            server.token().map(str::to_string),
            RetryPolicy::from_config(retry),
            server.request_timeout(),
        )
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.as_deref() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Issue one logical request, retrying retryable failures.
    ///
    /// Auth failures (401/403) and terminal 4xx return after a single attempt.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        opts: RequestOptions,
    ) -> Result<HttpResponse, RequestError> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;
        loop {
            match self.send_once(&method, url, &opts).await {
                Ok(resp) => {
                    tracing::debug!(
                        target: "outpost.http",
                        stage = "http.response",
                        method = %method,
                        url = %url,
                        status = resp.status,
                        attempt
                    );
                    return Ok(resp);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.next_delay(attempt);
                    tracing::warn!(
                        target: "outpost.http",
                        stage = "http.retry",
                        method = %method,
                        url = %url,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error.kind = %err.kind(),
                        error.message = %err,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::debug!(
                        target: "outpost.http",
                        stage = "http.failed",
                        method = %method,
                        url = %url,
                        attempt,
                        error.kind = %err.kind(),
                        error.message = %err
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        opts: &RequestOptions,
    ) -> Result<HttpResponse, RequestError> {
        let mut req = self
            .http
            .request(method.clone(), url)
            .timeout(opts.timeout.unwrap_or(self.timeout));
        for (name, value) in &opts.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &opts.body {
            req = req.json(body);
        }

        let resp = self
            .auth(req)
            .send()
            .await
            .map_err(|err| RequestError::from_reqwest(err, url))?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|err| RequestError::from_reqwest(err, url))?;

        if !(200..300).contains(&status) {
            return Err(RequestError::from_status(status, url, &text));
        }

        if text.trim().is_empty() {
            return Ok(HttpResponse {
                status,
                body: Value::Null,
            });
        }

        let body = serde_json::from_str::<Value>(&text).map_err(|err| RequestError::Decode {
            url: url.to_string(),
            message: format!("{} | body={}", err, preview_body(&text)),
        })?;
        Ok(HttpResponse { status, body })
    }

    pub async fn get(&self, url: &str) -> Result<Value, RequestError> {
        self.request(Method::GET, url, RequestOptions::default())
            .await
            .map(|r| r.body)
    }

    pub async fn post(&self, url: &str, body: Value) -> Result<Value, RequestError> {
        self.request(Method::POST, url, RequestOptions::json(body))
            .await
            .map(|r| r.body)
    }

    pub async fn put(&self, url: &str, body: Value) -> Result<Value, RequestError> {
        self.request(Method::PUT, url, RequestOptions::json(body))
            .await
            .map(|r| r.body)
    }

    pub async fn delete(&self, url: &str) -> Result<Value, RequestError> {
        self.request(Method::DELETE, url, RequestOptions::default())
            .await
            .map(|r| r.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestErrorKind;
    use mockito::{Matcher, Server};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(5),
            jitter: 0.1,
        }
    }

    fn client(token: Option<&str>, max_retries: u32) -> ResilientClient {
        ResilientClient::new(
            token.map(str::to_string),
            fast_policy(max_retries),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn get_returns_decoded_json() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/commands")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id":"c1","name":"audit","args":{}}]"#)
            .expect(1)
            .create_async()
            .await;

        let value = client(None, 3)
            .get(&format!("{}/commands", server.url()))
            .await
            .unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["id"], "c1");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn empty_body_decodes_to_null() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/command/c1/done")
            .with_status(204)
            .create_async()
            .await;

        let value = client(None, 0)
            .post(
                &format!("{}/command/c1/done", server.url()),
                serde_json::json!({"ok": true}),
            )
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_exhausted() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/commands")
            .with_status(503)
            .with_body("unavailable")
            .expect(4)
            .create_async()
            .await;

        let err = client(None, 3)
            .get(&format!("{}/commands", server.url()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RequestErrorKind::Http);
        assert_eq!(err.status(), Some(503));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_is_retryable() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/commands")
            .with_status(429)
            .expect(2)
            .create_async()
            .await;

        let err = client(None, 1)
            .get(&format!("{}/commands", server.url()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(429));
        m.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_is_attempted_exactly_once() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let err = client(None, 3)
            .get(&format!("{}/missing", server.url()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RequestErrorKind::Http);
        assert!(!err.is_retryable());
        m.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_is_auth_failure_and_not_retried() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/agent/connect")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let err = client(Some("bad"), 3)
            .get(&format!("{}/agent/connect", server.url()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RequestErrorKind::Auth);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn invalid_json_is_decode_error_without_retry() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/commands")
            .with_status(200)
            .with_body("not json")
            .expect(1)
            .create_async()
            .await;

        let err = client(None, 3)
            .get(&format!("{}/commands", server.url()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), RequestErrorKind::Decode);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn refused_connection_is_network_failure() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(None, 1)
            .get(&format!("http://{addr}/commands"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            RequestErrorKind::Network | RequestErrorKind::Timeout
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn bearer_token_and_custom_headers_are_sent() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("PUT", "/things/1")
            .match_header("authorization", "Bearer secret-token")
            .match_header("x-request-source", "agent")
            .match_body(Matcher::Json(serde_json::json!({"a": 1})))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let c = client(Some("secret-token"), 0);
        let resp = c
            .request(
                Method::PUT,
                &format!("{}/things/1", server.url()),
                RequestOptions {
                    headers: vec![("x-request-source".into(), "agent".into())],
                    body: Some(serde_json::json!({"a": 1})),
                    timeout: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn no_authorization_header_without_token() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("DELETE", "/things/1")
            .match_header("authorization", Matcher::Missing)
            .with_status(204)
            .create_async()
            .await;

        client(Some("  "), 0)
            .delete(&format!("{}/things/1", server.url()))
            .await
            .unwrap();
        m.assert_async().await;
    }
}
