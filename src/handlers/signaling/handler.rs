//! Signaling WebSocket handler
//!
//! One socket drives one peer: the first `offer` creates it (replacing any
//! peer registered under the same id), `candidate` messages feed ICE, and
//! `close` or socket end tears it down. Once the answer is sent the
//! conversation loop is started against the configured speech model.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::conversation::{ConversationDeps, ConversationHandle};
use crate::core::peer::{IceCandidate, Peer};
use crate::errors::{GatewayError, SignalingError};
use crate::services::SessionRecord;
use crate::state::AppState;

use super::messages::{SignalingIncomingMessage, SignalingOutgoingMessage, SignalingRoute};

/// Outgoing message buffer
const CHANNEL_BUFFER_SIZE: usize = 32;

/// Maximum WebSocket message size (256 KB)
const MAX_WS_MESSAGE_SIZE: usize = 256 * 1024;

/// Query parameters accepted on upgrade
#[derive(Debug, Default, Deserialize)]
pub struct SignalingQuery {
    /// Stable peer id; a fresh one is generated when absent
    pub peer_id: Option<String>,
    /// Conversation session for persona lookup and records
    pub session_id: Option<String>,
}

/// Signaling WebSocket handler
pub async fn signaling_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<SignalingQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let peer_id = query
        .peer_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!(peer_id = %peer_id, "signaling connection upgrade requested");

    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_signaling_socket(socket, state, peer_id, query.session_id))
}

/// Per-socket signaling state.
struct SignalingSession {
    peer_id: String,
    session_id: Option<String>,
    peer: Option<Arc<Peer>>,
}

async fn handle_signaling_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    peer_id: String,
    session_id: Option<String>,
) {
    info!(peer_id = %peer_id, "signaling connection established");

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<SignalingRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing messages
    let sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let result = match route {
                SignalingRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize signaling message: {}", e);
                        continue;
                    }
                },
                SignalingRoute::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                debug!("Failed to send signaling message: {}", e);
                break;
            }
        }
    });

    let mut session = SignalingSession {
        peer_id,
        session_id,
        peer: None,
    };

    loop {
        let current = session.peer.clone();
        let peer_closed = async move {
            match current {
                Some(peer) => peer.closed().await,
                None => std::future::pending().await,
            }
        };

        select! {
            msg_result = receiver.next() => {
                let keep_going = match msg_result {
                    Some(Ok(msg)) => process_message(msg, &mut session, &message_tx, &state).await,
                    Some(Err(e)) => {
                        warn!(peer_id = %session.peer_id, "signaling socket error: {}", e);
                        false
                    }
                    None => {
                        info!(peer_id = %session.peer_id, "signaling socket closed by client");
                        false
                    }
                };
                if !keep_going {
                    break;
                }
            }
            _ = peer_closed => {
                info!(peer_id = %session.peer_id, "peer closed, ending signaling");
                break;
            }
        }
    }

    let _ = message_tx.send(SignalingRoute::Close).await;
    drop(message_tx);
    if let Err(e) = sender_task.await {
        debug!("signaling sender task ended abnormally: {}", e);
    }

    if let Some(peer) = session.peer.take() {
        state.peers.release(&peer).await;
    }

    info!(peer_id = %session.peer_id, "signaling connection terminated");
}

/// Handle one socket message. Returns false when the connection should end.
async fn process_message(
    msg: Message,
    session: &mut SignalingSession,
    message_tx: &mpsc::Sender<SignalingRoute>,
    state: &Arc<AppState>,
) -> bool {
    let result = match msg {
        Message::Text(text) => match SignalingIncomingMessage::parse(&text) {
            Ok(message) => handle_incoming(message, session, message_tx, state).await,
            Err(e) => Err(e.into()),
        },
        Message::Binary(data) => Err(SignalingError::UnsupportedMessage(format!(
            "binary frame of {} bytes",
            data.len()
        ))
        .into()),
        Message::Ping(_) | Message::Pong(_) => Ok(true),
        Message::Close(_) => Ok(false),
    };

    match result {
        Ok(keep_going) => keep_going,
        Err(e) => {
            warn!(peer_id = %session.peer_id, "signaling failed: {}", e);
            let outgoing = match &e {
                GatewayError::Signaling(signaling) => SignalingOutgoingMessage::from(signaling),
                other => SignalingOutgoingMessage::Error {
                    code: None,
                    message: other.to_string(),
                },
            };
            let _ = message_tx.send(SignalingRoute::Outgoing(outgoing)).await;
            false
        }
    }
}

async fn handle_incoming(
    msg: SignalingIncomingMessage,
    session: &mut SignalingSession,
    message_tx: &mpsc::Sender<SignalingRoute>,
    state: &Arc<AppState>,
) -> Result<bool, GatewayError> {
    match msg {
        SignalingIncomingMessage::Offer { sdp, session_id } => {
            if session_id.is_some() {
                session.session_id = session_id;
            }
            handle_offer(sdp, session, message_tx, state).await?;
            Ok(true)
        }
        SignalingIncomingMessage::Candidate {
            candidate,
            sdp_mid,
            sdp_mline_index,
        } => {
            if candidate.trim().is_empty() {
                debug!(peer_id = %session.peer_id, "end of candidates");
                return Ok(true);
            }
            let parsed = IceCandidate::parse(&candidate)?;
            let peer = session.peer.as_ref().ok_or(SignalingError::NoPeer)?;
            peer.add_ice_candidate(&parsed, sdp_mid, sdp_mline_index)
                .await?;
            debug!(
                peer_id = %session.peer_id,
                candidate_type = %parsed.candidate_type,
                "remote candidate added"
            );
            Ok(true)
        }
        SignalingIncomingMessage::Close => {
            info!(peer_id = %session.peer_id, "client requested close");
            Ok(false)
        }
    }
}

/// Create (or replace) the peer, answer the offer and start the
/// conversation.
async fn handle_offer(
    sdp: String,
    session: &mut SignalingSession,
    message_tx: &mpsc::Sender<SignalingRoute>,
    state: &Arc<AppState>,
) -> Result<(), GatewayError> {
    if let Some(previous) = session.peer.take() {
        debug!(peer_id = %session.peer_id, "new offer on live socket, replacing peer");
        state.peers.release(&previous).await;
    }

    let peer = state.peers.create(&session.peer_id).await?;
    session.peer = Some(peer.clone());

    let answer = peer.accept_offer(sdp).await?;
    let _ = message_tx
        .send(SignalingRoute::Outgoing(SignalingOutgoingMessage::Answer {
            peer_id: session.peer_id.clone(),
            sdp: answer,
        }))
        .await;
    info!(peer_id = %session.peer_id, "answer sent");

    start_conversation(&peer, session.session_id.clone(), state).await?;
    Ok(())
}

async fn start_conversation(
    peer: &Arc<Peer>,
    session_id: Option<String>,
    state: &Arc<AppState>,
) -> Result<(), GatewayError> {
    let instructions = match &session_id {
        Some(id) => match state.personas.fetch_persona(id).await {
            Ok(persona) => persona.map(|p| p.into_instructions()),
            Err(e) => {
                warn!(peer_id = %peer.id(), session_id = %id, "persona lookup failed: {}", e);
                None
            }
        },
        None => None,
    };

    let Some(inbound) = peer.take_inbound_audio() else {
        warn!(peer_id = %peer.id(), "inbound audio already taken, not starting conversation");
        return Ok(());
    };

    let deps = ConversationDeps {
        connector: state.connector.clone(),
        sink: peer.audio_sink(),
        events: peer.events(),
        inbound,
        instructions,
    };
    let handle = Arc::new(ConversationHandle::start(
        peer.id(),
        state.config.conversation.clone(),
        deps,
    ));
    peer.attach_conversation(handle.clone()).await?;

    let peer_id = peer.id().to_string();
    let recorder = state.recorder.clone();
    tokio::spawn(async move {
        let Some(outcome) = handle.join().await else {
            return;
        };
        info!(peer_id = %peer_id, reason = %outcome.reason, "conversation ended");
        let record = SessionRecord::from_outcome(peer_id.clone(), session_id, outcome);
        if let Err(e) = recorder.append(record).await {
            warn!(peer_id = %peer_id, "failed to record session: {}", e);
        }
    });

    Ok(())
}
