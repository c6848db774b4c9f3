//! WebSocket transport for job progress.
//!
//! Session flow: authorize → authorize-for-job → connection frame →
//! replay missed events → live stream → terminate. Policy failures close
//! the socket with 1008; slow clients are terminated rather than buffered.

use std::borrow::Cow;
use std::sync::atomic::{AtomicI64, Ordering};

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use forge_broker::Recv;
use forge_models::subscription::STREAM_ERROR_RETRY_MS;
use forge_models::{ControlFrame, JobId, StreamFrame, SubscriptionFilter};

use crate::auth::bearer_token;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::sessions::{SessionInfo, TransportKind};
use crate::state::AppState;

/// Global counter for active WebSocket sessions.
static ACTIVE_WS_SESSIONS: AtomicI64 = AtomicI64::new(0);

/// Bounded send buffer per session; a client that cannot drain it is
/// terminated instead of buffered without limit.
const WS_SEND_BUFFER_SIZE: usize = 32;

/// WebSocket subscription query parameters.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    pub last_event_id: Option<u64>,
    pub filter_types: Option<String>,
    #[serde(default)]
    pub milestones_only: bool,
}

/// WebSocket progress endpoint.
pub async fn ws_job_progress(
    ws: WebSocketUpgrade,
    Path(job_id): Path<i64>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let token = query
        .token
        .clone()
        .or_else(|| bearer_token(&headers).map(str::to_string));

    metrics::record_ws_connection();
    ws.on_upgrade(move |socket| async move {
        let count = ACTIVE_WS_SESSIONS.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_ws_active_sessions(count);

        handle_job_socket(socket, state, JobId(job_id), token, query).await;

        let count = ACTIVE_WS_SESSIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_sessions(count);
    })
}

/// Send a frame without blocking; a full buffer means the client is too
/// slow and the session must end.
fn send_frame(tx: &mpsc::Sender<Message>, frame: &StreamFrame) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(_) => return false,
    };
    match tx.try_send(Message::Text(json)) {
        Ok(()) => {
            metrics::record_ws_frame_sent(frame.event_name());
            true
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("WebSocket send buffer full, terminating slow session");
            let error = StreamFrame::error("client too slow", Some(STREAM_ERROR_RETRY_MS));
            if let Ok(j) = serde_json::to_string(&error) {
                let _ = tx.try_send(Message::Text(j));
            }
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Close with a policy-violation frame (auth failure, unknown job, denied).
fn close_policy_violation(tx: &mpsc::Sender<Message>, reason: &'static str) {
    let error = StreamFrame::error(reason, None);
    if let Ok(j) = serde_json::to_string(&error) {
        let _ = tx.try_send(Message::Text(j));
    }
    let _ = tx.try_send(Message::Close(Some(CloseFrame {
        code: close_code::POLICY,
        reason: Cow::Borrowed(reason),
    })));
}

async fn handle_job_socket(
    socket: WebSocket,
    state: AppState,
    job_id: JobId,
    token: Option<String>,
    query: WsQuery,
) {
    let (ws_sender, mut receiver) = socket.split();

    // Bounded channel between the session loop and the socket writer.
    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);
    let send_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Authorize
    let subject = match token {
        Some(token) => match state.verifier.verify(&token).await {
            Ok(subject) => subject,
            Err(e) => {
                debug!("WebSocket authentication failed: {e}");
                close_policy_violation(&tx, "Authentication failed");
                drop(tx);
                let _ = send_task.await;
                return;
            }
        },
        None => {
            close_policy_violation(&tx, "No credential provided");
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    // Authorize for job
    let job = match state.jobs.get_job(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            close_policy_violation(&tx, "Job not found");
            drop(tx);
            let _ = send_task.await;
            return;
        }
        Err(e) => {
            warn!(%job_id, "job lookup failed: {e}");
            let _ = send_frame(&tx, &StreamFrame::error("Job lookup failed", Some(STREAM_ERROR_RETRY_MS)));
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };
    if !subject.can_access(&job) {
        close_policy_violation(&tx, "Access denied");
        drop(tx);
        let _ = send_task.await;
        return;
    }

    let filter = match SubscriptionFilter::from_params(query.filter_types.as_deref(), query.milestones_only) {
        Ok(f) => f,
        Err(e) => {
            close_policy_violation(&tx, "Invalid filter");
            debug!("invalid subscription filter: {e}");
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    // Session bookkeeping; the guard cleans both indices on every exit path.
    let session = SessionInfo::new(job_id, subject.subject_id, TransportKind::PushSocket);
    let session_id = session.session_id;
    state.sessions.register(session);
    let _session_guard = scopeguard::guard((state.sessions.clone(), session_id), |(sessions, id)| {
        sessions.remove(id);
    });

    info!(%job_id, %session_id, user_id = subject.subject_id, "WebSocket session subscribed");

    if !send_frame(
        &tx,
        &StreamFrame::connection(session_id.to_string(), job_id, job.status, job.progress),
    ) {
        drop(tx);
        let _ = send_task.await;
        return;
    }

    // Subscribe before replay so nothing published in between is lost;
    // duplicates are filtered by the cursor.
    let mut subscription = match state.broker.subscribe(job_id).await {
        Ok(s) => s,
        Err(e) => {
            warn!(%job_id, "broker subscribe failed: {e}");
            let _ = send_frame(
                &tx,
                &StreamFrame::error(
                    "Streaming service unavailable",
                    Some(forge_models::subscription::BROKER_UNAVAILABLE_RETRY_MS),
                ),
            );
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    let mut cursor = query.last_event_id.unwrap_or(0);
    let mut terminal = None;

    // Replay cached events after the client's cursor, in ascending order,
    // before any live event.
    if query.last_event_id.is_some() {
        match state.broker.get_missed(job_id, cursor).await {
            Ok(missed) => {
                for msg in missed {
                    cursor = cursor.max(msg.event_id);
                    if msg.is_terminal() {
                        terminal = msg.status;
                    }
                    if filter.accepts(&msg) && !send_frame(&tx, &StreamFrame::progress(msg)) {
                        drop(tx);
                        let _ = send_task.await;
                        return;
                    }
                    if terminal.is_some() {
                        break;
                    }
                }
            }
            Err(e) => warn!(%job_id, "missed-event replay failed: {e}"),
        }
    }

    // Live loop
    while terminal.is_none() {
        tokio::select! {
            recv = subscription.recv() => match recv {
                Recv::Message(msg) => {
                    // Dedupe against replayed events; event_id is the
                    // idempotency key.
                    if msg.event_id != 0 && msg.event_id <= cursor {
                        continue;
                    }
                    cursor = cursor.max(msg.event_id);
                    if msg.is_terminal() {
                        terminal = msg.status;
                    }
                    if filter.accepts(&msg) && !send_frame(&tx, &StreamFrame::progress(msg)) {
                        break;
                    }
                }
                Recv::Idle => {}
                Recv::Closed => {
                    let _ = send_frame(
                        &tx,
                        &StreamFrame::error("Progress stream ended", Some(STREAM_ERROR_RETRY_MS)),
                    );
                    break;
                }
            },
            client = receiver.next() => match client {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ControlFrame>(&text) {
                    Ok(ControlFrame::Ping) => {
                        if !send_frame(&tx, &StreamFrame::pong()) {
                            break;
                        }
                    }
                    Ok(ControlFrame::Unsubscribe) => {
                        info!(%job_id, %session_id, "client requested unsubscribe");
                        break;
                    }
                    Err(_) => debug!("ignoring unknown client action"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!(%job_id, %session_id, "client disconnected");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket receive error: {e}");
                    break;
                }
            },
        }
    }

    if let Some(status) = terminal {
        let _ = send_frame(&tx, &StreamFrame::complete(job_id, status));
    }

    subscription.close();
    drop(tx);
    let _ = send_task.await;
    info!(%job_id, %session_id, "WebSocket session closed");
}

/// Session statistics (admin only).
pub async fn get_connection_stats(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let token = bearer_token(&headers).ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;
    let subject = state.verifier.verify(token).await?;
    if !subject.is_admin() {
        return Err(ApiError::forbidden("Admin access required"));
    }

    Ok(Json(json!({
        "total_connections": state.sessions.session_count(),
        "job_subscriptions": state.sessions.job_subscriber_counts(),
        "timestamp": Utc::now(),
    })))
}
