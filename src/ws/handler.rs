//! WebSocket upgrade handler

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{GameSession, Refusal};
use crate::rewards::{Address, RewardService};
use crate::sync::{Participant, SharedStore};
use crate::util::rate_limit::ClickRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Session to join; defaults to the configured session name
    pub session: Option<String>,
    pub nickname: Option<String>,
    pub password: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    if let Some(expected) = &state.config.session_password {
        if query.password.as_deref() != Some(expected.as_str()) {
            warn!("WebSocket rejected, wrong session password");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    }

    let session_name = query
        .session
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| state.config.session_name.clone());

    let id = Uuid::new_v4();
    let display_name = query
        .nickname
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("Player_{}", &id.to_string()[..8]));

    info!(participant_id = %id, session = %session_name, "WebSocket upgrade");
    let participant = Participant { id, display_name };
    ws.on_upgrade(move |socket| handle_socket(socket, participant, session_name, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    participant: Participant,
    session_name: String,
    state: AppState,
) {
    let participant_id = participant.id;
    info!(
        participant_id = %participant_id,
        display_name = %participant.display_name,
        session = %session_name,
        "New WebSocket connection"
    );

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        participant_id,
        session: session_name.clone(),
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(participant_id = %participant_id, error = %e, "Failed to send welcome");
        return;
    }

    let (replica, link) = state.sessions.join(&session_name, participant);
    let events = replica.subscribe();
    let session = GameSession::new(
        replica,
        state.match_config.clone(),
        participant_id.as_u128() as u64,
    );

    run_session(&session, state.rewards.clone(), ws_sink, ws_stream, events).await;

    // Cleanup on disconnect
    session.shutdown();
    drop(link);
    state.sessions.leave(&session_name, participant_id);

    info!(participant_id = %participant_id, session = %session_name, "WebSocket connection closed");
}

/// What the reader loop does after a client message
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

async fn run_session(
    session: &Arc<GameSession>,
    rewards: Option<RewardService>,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut events: broadcast::Receiver<crate::sync::StoreEvent>,
) {
    let participant_id = session.participant_id();
    let rate_limiter = ClickRateLimiter::new();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMsg>();

    // Spawn writer task: outgoing messages -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(participant_id = %participant_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    session.reconcile();
    push_state(session, &out_tx);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(participant_id = %participant_id, skipped = n, "Store events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                // Coalesce bursts of writes into one push
                while events.try_recv().is_ok() {}
                session.reconcile();
                push_state(session, &out_tx);
            }
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMsg>(&text) {
                            Ok(msg) => {
                                let flow = handle_client_msg(session, msg, rewards.as_ref(), &rate_limiter, &out_tx);
                                if flow == Flow::Stop {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(participant_id = %participant_id, error = %e, "Failed to parse client message");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!(participant_id = %participant_id, "Received binary message, ignoring");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        info!(participant_id = %participant_id, "Client initiated close");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(participant_id = %participant_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
        }
    }

    drop(out_tx);
    writer_handle.abort();
}

fn handle_client_msg(
    session: &GameSession,
    msg: ClientMsg,
    rewards: Option<&RewardService>,
    rate_limiter: &ClickRateLimiter,
    out: &mpsc::UnboundedSender<ServerMsg>,
) -> Flow {
    let participant_id = session.participant_id();

    let result = match msg {
        ClientMsg::StartMatch => session.start_match(),
        ClientMsg::ClickTarget { side, target_id } => {
            if !rate_limiter.check_click() {
                debug!(participant_id = %participant_id, "Rate limited click");
                return Flow::Continue;
            }
            session.click_target(side, target_id).map(|points| {
                let _ = out.send(ServerMsg::ClickAccepted { target_id, points });
            })
        }
        ClientMsg::ResetScore => session.reset_score(),
        ClientMsg::ClaimReward { address } => session
            .check_reward_claim()
            .map(|()| claim_reward(rewards, address, out)),
        ClientMsg::Resize { viewport_width } => {
            session.resize(viewport_width);
            push_state(session, out);
            Ok(())
        }
        ClientMsg::Ping { t } => {
            let _ = out.send(ServerMsg::Pong { t });
            Ok(())
        }
        ClientMsg::Leave => {
            info!(participant_id = %participant_id, "Participant left");
            return Flow::Stop;
        }
    };

    if let Err(refusal) = result {
        debug!(participant_id = %participant_id, code = refusal.code(), "Request refused");
        send_refusal(out, refusal);
    }
    Flow::Continue
}

/// Submit the claim in the background; the outcome arrives as its own message
fn claim_reward(
    rewards: Option<&RewardService>,
    player: Address,
    out: &mpsc::UnboundedSender<ServerMsg>,
) {
    let Some(rewards) = rewards.cloned() else {
        let _ = out.send(ServerMsg::Refused {
            code: "rewards_unavailable".to_string(),
            message: "Reward contract is not configured".to_string(),
        });
        return;
    };

    let out = out.clone();
    tokio::spawn(async move {
        let msg = match rewards.claim(player).await {
            Ok(panel) => ServerMsg::ClaimStatus {
                panel: Box::new(panel),
            },
            Err(refusal) => ServerMsg::Refused {
                code: refusal.code().to_string(),
                message: refusal.to_string(),
            },
        };
        let _ = out.send(msg);
    });
}

fn send_refusal(out: &mpsc::UnboundedSender<ServerMsg>, refusal: Refusal) {
    let _ = out.send(ServerMsg::Refused {
        code: refusal.code().to_string(),
        message: refusal.to_string(),
    });
}

fn push_state(session: &GameSession, out: &mpsc::UnboundedSender<ServerMsg>) {
    let _ = out.send(ServerMsg::State {
        view: Box::new(session.view()),
    });
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
