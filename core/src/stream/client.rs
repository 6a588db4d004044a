use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::http::is_auth_status;
use crate::error::StreamError;

use super::parser::SseParser;
use super::traits::EventSource;
use super::types::{
    ConnectionState, FailureKind, StreamFailure, StreamNotification, StreamOptions,
};

const LAST_EVENT_ID: &str = "Last-Event-ID";

/// Long-lived event stream consumer that reconnects on its own.
///
/// `connect()` spawns a background task that owns the HTTP connection and
/// pushes [`StreamNotification`]s into a bounded channel.
#[derive(Clone)]
pub struct EventStreamClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    url: reqwest::Url,
    token: Option<String>,
    opts: StreamOptions,
    state: watch::Sender<ConnectionState>,
    cursor: Mutex<Option<String>>,
    started: AtomicBool,
    cancel: CancellationToken,
}

enum SessionEnd {
    /// Connection lost or refused; eligible for reconnect.
    Dropped(StreamFailure),
    Fatal(StreamFailure),
    ReceiverGone,
}

impl EventStreamClient {
    pub fn new(
        url: &str,
        token: Option<String>,
        opts: StreamOptions,
    ) -> Result<Self, StreamError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| StreamError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .connect_timeout(opts.connect_timeout)
            .build()?;
        let (state, _) = watch::channel(ConnectionState::Idle);
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                url: parsed,
                token: token.filter(|t| !t.trim().is_empty()),
                opts,
                state,
                cursor: Mutex::new(None),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Resume cursor sent as `Last-Event-ID` on the next connection.
    pub fn last_event_id(&self) -> Option<String> {
        self.inner.cursor()
    }

    pub fn connect(&self) -> Result<mpsc::Receiver<StreamNotification>, StreamError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(StreamError::AlreadyStarted);
        }
        let (tx, rx) = mpsc::channel(self.inner.opts.notification_capacity);
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run(tx).await });
        Ok(rx)
    }

    /// Stop for good. Safe to call repeatedly and before `connect()`.
    pub fn disconnect(&self) {
        self.inner.cancel.cancel();
        self.inner.force_disconnected();
    }
}

impl EventSource for EventStreamClient {
    fn connect(&self) -> Result<mpsc::Receiver<StreamNotification>, StreamError> {
        EventStreamClient::connect(self)
    }

    fn disconnect(&self) {
        EventStreamClient::disconnect(self)
    }

    fn state(&self) -> ConnectionState {
        EventStreamClient::state(self)
    }
}

impl Inner {
    fn cursor(&self) -> Option<String> {
        self.cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_cursor(&self, id: &str) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.to_string());
    }

    /// Terminal states are sticky; only `disconnect()` may leave `Failed`.
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            tracing::debug!(
                target: "outpost.stream",
                stage = "stream.state",
                from = %current,
                to = %next
            );
            *current = next;
            true
        });
    }

    fn force_disconnected(&self) {
        self.state.send_if_modified(|current| {
            if *current == ConnectionState::Disconnected {
                return false;
            }
            *current = ConnectionState::Disconnected;
            true
        });
    }

    /// False once the owner is gone or `disconnect()` was called.
    async fn notify(&self, tx: &mpsc::Sender<StreamNotification>, n: StreamNotification) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = tx.send(n) => sent.is_ok(),
        }
    }

    async fn run(self: Arc<Self>, tx: mpsc::Sender<StreamNotification>) {
        let mut attempts: u32 = 0;
        let mut base = self.opts.reconnect_interval;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Connecting);
            if !self.notify(&tx, StreamNotification::Connecting).await {
                break;
            }

            let end = tokio::select! {
                _ = self.cancel.cancelled() => break,
                end = self.session(&tx, &mut attempts, &mut base) => end,
            };

            let failure = match end {
                SessionEnd::ReceiverGone => break,
                SessionEnd::Fatal(failure) => {
                    self.fail(&tx, failure).await;
                    return;
                }
                SessionEnd::Dropped(failure) => failure,
            };

            tracing::warn!(
                target: "outpost.stream",
                stage = "stream.dropped",
                url = %self.url,
                attempts,
                error = %failure.message
            );
            if !self.notify(&tx, StreamNotification::Error(failure)).await {
                break;
            }

            if attempts >= self.opts.max_reconnect_attempts {
                let failure = StreamFailure {
                    kind: FailureKind::Exhausted,
                    message: format!("gave up after {attempts} reconnect attempts"),
                    fatal: true,
                };
                self.fail(&tx, failure).await;
                return;
            }

            let delay = self.opts.reconnect_delay(base, attempts);
            attempts += 1;
            self.set_state(ConnectionState::Reconnecting);
            tracing::info!(
                target: "outpost.stream",
                stage = "stream.reconnect",
                attempt = attempts,
                max_attempts = self.opts.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64
            );
            let reconnecting = StreamNotification::Reconnecting {
                attempt: attempts,
                delay,
            };
            if !self.notify(&tx, reconnecting).await {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.force_disconnected();
        let _ = tx.try_send(StreamNotification::Disconnected);
        tracing::info!(target: "outpost.stream", stage = "stream.stopped", url = %self.url);
    }

    async fn fail(&self, tx: &mpsc::Sender<StreamNotification>, failure: StreamFailure) {
        tracing::error!(
            target: "outpost.stream",
            stage = "stream.failed",
            url = %self.url,
            kind = ?failure.kind,
            error = %failure.message
        );
        self.set_state(ConnectionState::Failed);
        self.notify(tx, StreamNotification::Error(failure)).await;
    }

    async fn session(
        &self,
        tx: &mpsc::Sender<StreamNotification>,
        attempts: &mut u32,
        base: &mut Duration,
    ) -> SessionEnd {
        let mut req = self
            .http
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = self.token.as_deref() {
            req = req.bearer_auth(token);
        }
        if let Some(id) = self.cursor() {
            req = req.header(LAST_EVENT_ID, id);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(err) => return SessionEnd::Dropped(transport_failure(&err)),
        };
        let status = resp.status().as_u16();
        if is_auth_status(status) {
            return SessionEnd::Fatal(StreamFailure {
                kind: FailureKind::Auth,
                message: format!("stream rejected with status {status}"),
                fatal: true,
            });
        }
        if status != 200 {
            return SessionEnd::Dropped(StreamFailure {
                kind: FailureKind::Http(status),
                message: format!("unexpected status {status}"),
                fatal: false,
            });
        }

        *attempts = 0;
        self.set_state(ConnectionState::Connected);
        tracing::info!(
            target: "outpost.stream",
            stage = "stream.connected",
            url = %self.url,
            last_event_id = ?self.cursor()
        );
        if tx.send(StreamNotification::Connected).await.is_err() {
            return SessionEnd::ReceiverGone;
        }

        let mut parser = SseParser::new();
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => return SessionEnd::Dropped(transport_failure(&err)),
            };
            for block in parser.push(&chunk) {
                if let Some(id) = block.id.as_deref() {
                    self.set_cursor(id);
                }
                if let Some(ms) = block.retry_ms {
                    *base = Duration::from_millis(ms);
                }
                if let Some(event) = block.into_event() {
                    if tx.send(StreamNotification::Event(event)).await.is_err() {
                        return SessionEnd::ReceiverGone;
                    }
                }
            }
        }

        SessionEnd::Dropped(StreamFailure {
            kind: FailureKind::Network,
            message: "stream closed by server".to_string(),
            fatal: false,
        })
    }
}

fn transport_failure(err: &reqwest::Error) -> StreamFailure {
    let kind = if err.is_timeout() {
        FailureKind::Timeout
    } else {
        FailureKind::Network
    };
    StreamFailure {
        kind,
        message: err.to_string(),
        fatal: false,
    }
}
