//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::{Outbound, PeerId, PeerInput};
use crate::http::middleware::{token_from_request, verify_session_token};
use crate::util::rate_limit::PeerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ProtocolError, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Session token; the Authorization header is used when absent
    pub token: Option<String>,
}

#[derive(Debug, Error)]
enum SendError {
    #[error(transparent)]
    Encode(#[from] ProtocolError),

    #[error("socket: {0}")]
    Socket(#[from] axum::Error),
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    // Verify session token before upgrading
    let claims = match token_from_request(query.token.as_deref(), &headers)
        .and_then(|token| verify_session_token(token, &state.config.session_secret))
    {
        Ok(claims) => claims,
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            return e.into_response();
        }
    };

    let peer = PeerId::new();
    info!(peer_id = %peer, subject = %claims.sub, "WebSocket upgrade for authenticated peer");
    ws.on_upgrade(move |socket| handle_socket(socket, peer, claims.sub, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, peer: PeerId, subject: String, state: AppState) {
    state.sessions.register(peer, &subject);
    info!(
        peer_id = %peer,
        subject = %subject,
        subject_sessions = state.sessions.count_for(&subject),
        "New WebSocket connection"
    );

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        peer_id: peer,
        server_time: unix_millis(),
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(peer_id = %peer, error = %e, "Failed to send welcome");
        state.sessions.unregister(peer);
        return;
    }

    let outbound_rx = state.arena.subscribe();
    let input_tx = state.arena.input_tx.clone();

    run_session(peer, ws_sink, ws_stream, input_tx, outbound_rx).await;

    state.sessions.unregister(peer);
    info!(peer_id = %peer, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    peer: PeerId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    input_tx: mpsc::Sender<PeerInput>,
    mut outbound_rx: broadcast::Receiver<Outbound>,
) {
    let rate_limiter = PeerRateLimiter::new();

    // Spawn writer task: arena outbound -> WebSocket
    let resync_tx = input_tx.clone();
    let writer_handle = tokio::spawn(async move {
        loop {
            match outbound_rx.recv().await {
                Ok(out) => {
                    if !out.is_for(peer) {
                        continue;
                    }
                    if let Err(e) = send_msg(&mut ws_sink, &out.msg).await {
                        debug!(peer_id = %peer, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(peer_id = %peer, lagged_count = n, "Client lagged, requesting resync");
                    // Skipped replication diffs are resent in full
                    let _ = resync_tx
                        .send(PeerInput {
                            peer,
                            msg: ClientMsg::Resync,
                            received_at: unix_millis(),
                        })
                        .await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(peer_id = %peer, "Outbound channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> arena
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(peer_id = %peer, "Rate limited input message");
                    continue;
                }

                match ClientMsg::decode(&text) {
                    Ok(msg) => {
                        let input = PeerInput {
                            peer,
                            msg,
                            received_at: unix_millis(),
                        };

                        if input_tx.send(input).await.is_err() {
                            debug!(peer_id = %peer, "Input channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(peer_id = %peer, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(peer_id = %peer, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(peer_id = %peer, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(peer_id = %peer, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Signal disconnect to the arena
    let _ = input_tx
        .send(PeerInput {
            peer,
            msg: ClientMsg::Leave,
            received_at: unix_millis(),
        })
        .await;

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), SendError> {
    let json = msg.encode()?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}
