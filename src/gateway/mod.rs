pub mod protocol;
pub mod rooms;
pub mod session;

use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message as WsMessage, WebSocket, close_code},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::sync::{mpsc, oneshot};

use crate::{AppState, auth::AuthUser, model::UserId, registry::SessionHandle};

pub use protocol::{Ack, AckStatus, ClientEvent, ServerEvent};
pub use rooms::Rooms;
pub use session::{ConnState, Connection};

use protocol::{Inbound, parse_frame};

/// `GET /chat`. The bearer token is checked before the upgrade, so a bad
/// credential is a plain 401 and no socket is opened.
#[debug_handler(state = AppState)]
pub async fn chat_ws(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_socket(state, principal, socket))
}

async fn run_socket(state: AppState, principal: UserId, socket: WebSocket) {
    let (sender, mut receiver) = socket.split();
    let (handle, rx) = SessionHandle::channel();
    let (close_tx, close_rx) = oneshot::channel();

    let mut conn = Connection::new(principal, handle);
    let session_id = conn.handle().id();
    tracing::info!(%principal, session = %session_id, "socket opened");

    let writer = tokio::spawn(write_loop(sender, rx, close_rx));

    let close = loop {
        let frame = match receiver.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                tracing::debug!(session = %session_id, "socket error: {err}");
                break None;
            }
            None => break None,
        };

        match parse_frame(frame) {
            Ok(Inbound::Event(event)) => {
                let logout = matches!(event, ClientEvent::Logout);
                let ack = conn.apply(&state, event).await;
                conn.handle().push(ack);
                if logout {
                    break Some(CloseFrame { code: close_code::NORMAL, reason: "logged out".into() });
                }
            }
            Ok(Inbound::Control) => {}
            Ok(Inbound::Close) => break None,
            Err(err) => {
                tracing::warn!(session = %session_id, "protocol error: {err}");
                conn.handle().push(ServerEvent::error("protocol", err.to_string()));
                break Some(CloseFrame { code: close_code::POLICY, reason: "protocol error".into() });
            }
        }
    };

    conn.close(&state);
    let _ = close_tx.send(close);
    if let Err(err) = writer.await {
        tracing::error!(session = %session_id, "writer task failed: {err}");
    }
    tracing::info!(%principal, session = %session_id, "socket closed");
}

/// Owns the sink. Forwards queued events until told to close, then flushes
/// whatever is still queued and sends the close frame.
async fn write_loop(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<ServerEvent>,
    mut close_rx: oneshot::Receiver<Option<CloseFrame>>,
) {
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                if send_event(&mut sender, &event).await.is_err() {
                    return;
                }
            }
            frame = &mut close_rx => {
                while let Ok(event) = rx.try_recv() {
                    if send_event(&mut sender, &event).await.is_err() {
                        return;
                    }
                }
                let _ = sender.send(WsMessage::Close(frame.ok().flatten())).await;
                return;
            }
        }
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, WsMessage>, event: &ServerEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => sender.send(WsMessage::Text(text.into())).await,
        Err(err) => {
            tracing::error!("dropping unserializable event: {err}");
            Ok(())
        }
    }
}
