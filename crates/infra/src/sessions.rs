//! Realtime analysis sessions.
//!
//! A session strictly alternates: receive one request, dispatch it, send one
//! response. The next frame is not read until the response is out, so a
//! session never has more than one request in flight.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use spendlens_core::{ExpenseRecord, GatewayError, SessionId};

use crate::router::RequestRouter;

/// One inbound message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("framing error: {0}")]
    Framing(String),
    #[error("send failed: {0}")]
    Send(String),
}

/// Bidirectional message channel behind a session (a WebSocket in production).
#[async_trait]
pub trait SessionTransport: Send {
    /// `Ok(None)` means the client went away cleanly.
    async fn recv(&mut self) -> Result<Option<InboundFrame>, TransportError>;

    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    async fn close(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum CloseReason {
    ClientDisconnected,
    IdleTimeout,
    Protocol(String),
    SendFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingRequest,
    Dispatching,
    Responding,
    Closed(CloseReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub opened_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub exchanges: u64,
    pub state: SessionState,
}

/// Returned when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub exchanges: u64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub reason: CloseReason,
}

#[derive(Debug, Serialize)]
struct ErrorFrame<'a> {
    error: &'a str,
    message: String,
    timestamp: DateTime<Utc>,
}

fn error_frame(err: &GatewayError) -> String {
    let frame = ErrorFrame {
        error: err.code(),
        message: match err {
            GatewayError::InvalidRequest(msg) | GatewayError::SessionProtocolError(msg) => msg.clone(),
            _ => "Failed to analyze expense".to_string(),
        },
        timestamp: Utc::now(),
    };
    serde_json::to_string(&frame).unwrap_or_else(|_| format!(r#"{{"error":"{}"}}"#, err.code()))
}

fn decode(frame: InboundFrame) -> Result<ExpenseRecord, GatewayError> {
    let text = match frame {
        InboundFrame::Text(text) => text,
        InboundFrame::Binary(bytes) => String::from_utf8(bytes)
            .map_err(|_| GatewayError::invalid_request("binary message is not UTF-8 JSON"))?,
    };
    serde_json::from_str(&text)
        .map_err(|e| GatewayError::invalid_request(format!("malformed expense message: {e}")))
}

pub struct SessionManager {
    router: Arc<RequestRouter>,
    idle_timeout: Option<Duration>,
    sessions: RwLock<HashMap<SessionId, SessionInfo>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("idle_timeout", &self.idle_timeout)
            .field("active", &self.active_count())
            .finish()
    }
}

/// Removes the registry entry however the session ends.
struct Registration<'a> {
    manager: &'a SessionManager,
    id: SessionId,
}

impl Registration<'_> {
    fn update(&self, f: impl FnOnce(&mut SessionInfo)) {
        if let Some(info) = self.manager.sessions.write().unwrap().get_mut(&self.id) {
            f(info);
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.manager.sessions.write().unwrap().remove(&self.id);
    }
}

impl SessionManager {
    pub fn new(router: Arc<RequestRouter>, idle_timeout: Option<Duration>) -> Self {
        Self {
            router,
            idle_timeout,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut all: Vec<_> = self.sessions.read().unwrap().values().cloned().collect();
        all.sort_by_key(|s| s.opened_at);
        all
    }

    /// Serve one connection until it closes.
    pub async fn run<T: SessionTransport>(&self, mut transport: T) -> SessionSummary {
        let id = SessionId::new();
        let opened_at = Utc::now();
        self.sessions.write().unwrap().insert(
            id,
            SessionInfo {
                id,
                opened_at,
                last_activity_at: opened_at,
                exchanges: 0,
                state: SessionState::AwaitingRequest,
            },
        );
        let registration = Registration { manager: self, id };
        info!(session_id = %id, "realtime session opened");

        let mut exchanges = 0u64;
        let reason = loop {
            let received = match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, transport.recv()).await {
                    Ok(received) => received,
                    Err(_) => break CloseReason::IdleTimeout,
                },
                None => transport.recv().await,
            };
            let frame = match received {
                Ok(Some(frame)) => frame,
                Ok(None) => break CloseReason::ClientDisconnected,
                Err(e) => break CloseReason::Protocol(e.to_string()),
            };

            registration.update(|s| {
                s.state = SessionState::Dispatching;
                s.last_activity_at = Utc::now();
            });
            let reply = match decode(frame) {
                Ok(expense) => match self.router.realtime_analysis(expense).await {
                    Ok(analysis) => serde_json::to_string(&analysis)
                        .map_err(|e| GatewayError::session_protocol(e.to_string())),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            let reply = reply.unwrap_or_else(|e| {
                debug!(session_id = %id, error = %e, "realtime request rejected");
                error_frame(&e)
            });

            registration.update(|s| s.state = SessionState::Responding);
            if let Err(e) = transport.send(reply).await {
                break CloseReason::SendFailed(e.to_string());
            }
            exchanges += 1;
            registration.update(|s| {
                s.state = SessionState::AwaitingRequest;
                s.exchanges = exchanges;
            });
        };

        registration.update(|s| s.state = SessionState::Closed(reason.clone()));
        if !matches!(reason, CloseReason::ClientDisconnected | CloseReason::SendFailed(_)) {
            transport.close().await;
        }
        match &reason {
            CloseReason::Protocol(detail) | CloseReason::SendFailed(detail) => {
                warn!(session_id = %id, detail = %detail, exchanges, "realtime session closed abnormally")
            }
            _ => info!(session_id = %id, reason = ?reason, exchanges, "realtime session closed"),
        }
        drop(registration);

        SessionSummary {
            id,
            exchanges,
            opened_at,
            closed_at: Utc::now(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::TransientArtifactStore;
    use crate::dispatcher::ConcurrentDispatcher;
    use crate::jobs::{InMemoryJobRegistry, RetrainingConfig, RetrainingJobManager};
    use crate::router::RouterLimits;
    use spendlens_ai::fixtures::Script;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    type Inbound = Result<Option<InboundFrame>, TransportError>;

    /// Transport fed from a channel; records every recv/send in order.
    struct ChannelTransport {
        rx: mpsc::UnboundedReceiver<Inbound>,
        log: Arc<Mutex<Vec<String>>>,
        fail_sends: bool,
    }

    #[async_trait]
    impl SessionTransport for ChannelTransport {
        async fn recv(&mut self) -> Result<Option<InboundFrame>, TransportError> {
            let next = self.rx.recv().await.unwrap_or(Ok(None));
            if let Ok(Some(InboundFrame::Text(text))) = &next {
                self.log.lock().unwrap().push(format!("recv {text}"));
            }
            next
        }

        async fn send(&mut self, text: String) -> Result<(), TransportError> {
            if self.fail_sends {
                return Err(TransportError::Send("peer reset".to_string()));
            }
            self.log.lock().unwrap().push(format!("send {text}"));
            Ok(())
        }

        async fn close(&mut self) {
            self.log.lock().unwrap().push("close".to_string());
        }
    }

    fn channel() -> (mpsc::UnboundedSender<Inbound>, ChannelTransport, Arc<Mutex<Vec<String>>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = ChannelTransport {
            rx,
            log: log.clone(),
            fail_sends: false,
        };
        (tx, transport, log)
    }

    fn manager(script: &Arc<Script>, idle: Option<Duration>) -> (Arc<SessionManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let caps = script.capability_set();
        let jobs = RetrainingJobManager::start(
            caps.clone(),
            Arc::new(InMemoryJobRegistry::new()),
            RetrainingConfig::default(),
        );
        let router = RequestRouter::new(
            caps,
            ConcurrentDispatcher::new(Duration::from_secs(1)),
            TransientArtifactStore::new(dir.path()),
            jobs,
            RouterLimits::default(),
        );
        (Arc::new(SessionManager::new(Arc::new(router), idle)), dir)
    }

    fn expense_json(id: &str) -> String {
        serde_json::json!({
            "id": id,
            "description": "taxi to airport",
            "amount": 38.5,
            "vendor": "City Cabs",
            "date": "2026-03-11",
        })
        .to_string()
    }

    fn text(s: String) -> Inbound {
        Ok(Some(InboundFrame::Text(s)))
    }

    #[tokio::test]
    async fn each_response_is_sent_before_the_next_receive() {
        let script = Script::new();
        script.slow("r1", Duration::from_millis(50));
        let (sessions, _dir) = manager(&script, None);
        let (tx, transport, log) = channel();

        tx.send(text(expense_json("r1"))).unwrap();
        tx.send(text(expense_json("r2"))).unwrap();
        drop(tx);

        let summary = sessions.run(transport).await;
        assert_eq!(summary.exchanges, 2);
        assert_eq!(summary.reason, CloseReason::ClientDisconnected);

        let log = log.lock().unwrap();
        let kinds: Vec<&str> = log.iter().map(|e| &e[..4]).collect();
        assert_eq!(kinds, vec!["recv", "send", "recv", "send"]);
        assert!(log[1].contains("\"expense_id\":\"r1\""));
        assert!(log[3].contains("\"expense_id\":\"r2\""));
        assert_eq!(sessions.active_count(), 0);
    }

    #[tokio::test]
    async fn malformed_message_gets_error_frame_and_session_survives() {
        let script = Script::new();
        let (sessions, _dir) = manager(&script, None);
        let (tx, transport, log) = channel();

        tx.send(text("{not json".to_string())).unwrap();
        tx.send(Ok(Some(InboundFrame::Binary(vec![0xff, 0xfe])))).unwrap();
        tx.send(text(expense_json("ok"))).unwrap();
        drop(tx);

        let summary = sessions.run(transport).await;
        assert_eq!(summary.exchanges, 3);

        let log = log.lock().unwrap();
        let sends: Vec<&String> = log.iter().filter(|e| e.starts_with("send")).collect();
        let first: serde_json::Value = serde_json::from_str(&sends[0][5..]).unwrap();
        assert_eq!(first["error"], "invalid_request");
        assert!(first["timestamp"].is_string());
        let second: serde_json::Value = serde_json::from_str(&sends[1][5..]).unwrap();
        assert_eq!(second["error"], "invalid_request");
        let third: serde_json::Value = serde_json::from_str(&sends[2][5..]).unwrap();
        assert_eq!(third["category"]["predicted_category"], "meals");
    }

    #[tokio::test]
    async fn capability_failure_is_reported_inside_the_analysis() {
        let script = Script::new();
        script.fail("bad");
        let (sessions, _dir) = manager(&script, None);
        let (tx, transport, log) = channel();
        tx.send(text(expense_json("bad"))).unwrap();
        drop(tx);

        sessions.run(transport).await;
        let log = log.lock().unwrap();
        let reply: serde_json::Value = serde_json::from_str(&log[1][5..]).unwrap();
        assert!(reply["category"].is_null());
        assert_eq!(reply["errors"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn idle_session_is_closed_by_the_server() {
        let script = Script::new();
        let (sessions, _dir) = manager(&script, Some(Duration::from_millis(50)));
        let (tx, transport, log) = channel();

        let summary = sessions.run(transport).await;
        assert_eq!(summary.reason, CloseReason::IdleTimeout);
        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("close"));
        drop(tx);
    }

    #[tokio::test]
    async fn framing_error_closes_and_send_failure_ends_session() {
        let script = Script::new();
        let (sessions, _dir) = manager(&script, None);

        let (tx, transport, _) = channel();
        tx.send(Err(TransportError::Framing("bad opcode".to_string()))).unwrap();
        let summary = sessions.run(transport).await;
        assert!(matches!(summary.reason, CloseReason::Protocol(_)));

        let (tx, mut transport, _) = channel();
        transport.fail_sends = true;
        tx.send(text(expense_json("e1"))).unwrap();
        let summary = sessions.run(transport).await;
        assert!(matches!(summary.reason, CloseReason::SendFailed(_)));
        assert_eq!(summary.exchanges, 0);
    }

    #[tokio::test]
    async fn sessions_are_registered_while_open() {
        let script = Script::new();
        let (sessions, _dir) = manager(&script, None);
        let (tx, transport, _) = channel();

        let running = {
            let sessions = sessions.clone();
            tokio::spawn(async move { sessions.run(transport).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sessions.active_count(), 1);
        assert_eq!(sessions.sessions()[0].state, SessionState::AwaitingRequest);

        drop(tx);
        running.await.unwrap();
        assert_eq!(sessions.active_count(), 0);
    }
}
