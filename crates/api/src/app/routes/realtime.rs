//! `/ws/real-time-analysis`: WebSocket adapter over the session manager.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension,
    },
    response::IntoResponse,
};

use spendlens_infra::sessions::{InboundFrame, SessionTransport, TransportError};

use crate::app::services::AppServices;

pub async fn upgrade(
    Extension(services): Extension<Arc<AppServices>>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| async move {
        let summary = services.sessions.run(WsTransport { socket }).await;
        tracing::debug!(session_id = %summary.id, exchanges = summary.exchanges, "websocket closed");
    })
    .into_response()
}

pub struct WsTransport {
    socket: WebSocket,
}

#[async_trait]
impl SessionTransport for WsTransport {
    async fn recv(&mut self) -> Result<Option<InboundFrame>, TransportError> {
        loop {
            match self.socket.recv().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(InboundFrame::Text(text))),
                Some(Ok(Message::Binary(bytes))) => return Ok(Some(InboundFrame::Binary(bytes))),
                // axum answers pings itself
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Err(e)) => return Err(TransportError::Framing(e.to_string())),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "close frame not delivered");
        }
    }
}
