//! HTTP event-stream transport (SSE) and the polling snapshot fallback.
//!
//! Each event is framed as `event:` / `data:` / `id:`; the `id` carries the
//! message's `event_id` and is the authoritative cursor clients send back
//! in `Last-Event-ID`. Keepalives go out every 30 seconds from the same
//! loop that drives delivery, and the broker receive is bounded to 1 s so
//! cancellation is serviced promptly.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName};
use axum::response::sse::{Event, Sse};
use axum::response::{AppendHeaders, IntoResponse};
use axum::Json;
use chrono::Utc;
use futures_util::stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use forge_broker::Recv;
use forge_models::subscription::{
    BROKER_UNAVAILABLE_RETRY_MS, KEEPALIVE_INTERVAL_SECS, STREAM_ERROR_RETRY_MS,
};
use forge_models::{JobId, JobSnapshot, StreamFrame, SubscriptionFilter};

use crate::auth::bearer_token;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::sessions::{SessionInfo, TransportKind};
use crate::state::AppState;

/// Bounded event buffer per stream; a client that cannot drain it within
/// the slow-client timeout is terminated.
const SSE_BUFFER_SIZE: usize = 32;

/// How long a send may wait on a slow client before the session ends.
const SLOW_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Event-stream query parameters.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
    pub last_event_id: Option<u64>,
    pub filter_types: Option<String>,
    #[serde(default)]
    pub milestones_only: bool,
}

/// Snapshot query parameters.
#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    pub token: Option<String>,
    #[serde(default)]
    pub include_recent: bool,
}

async fn authorize_for_job(
    state: &AppState,
    headers: &HeaderMap,
    query_token: Option<&str>,
    job_id: JobId,
) -> ApiResult<(i64, JobSnapshot)> {
    let token = bearer_token(headers)
        .or(query_token)
        .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?;
    let subject = state.verifier.verify(token).await?;

    let job = state
        .jobs
        .get_job(job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    if !subject.can_access(&job) {
        return Err(ApiError::forbidden("Access denied"));
    }
    Ok((subject.subject_id, job))
}

/// Stream job progress via Server-Sent Events.
///
/// Resumption: `Last-Event-ID` (header or query) replays every cached
/// event after the cursor, ascending, before any live event. Events lost
/// to cache eviction are reconciled through the snapshot endpoint.
pub async fn stream_job_progress(
    Path(job_id): Path<i64>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    let job_id = JobId(job_id);
    let (user_id, job) =
        authorize_for_job(&state, &headers, query.token.as_deref(), job_id).await?;

    let filter = SubscriptionFilter::from_params(query.filter_types.as_deref(), query.milestones_only)?;
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or(query.last_event_id);

    let session = SessionInfo::new(job_id, user_id, TransportKind::EventStream);
    let session_id = session.session_id;
    state.sessions.register(session);
    metrics::record_sse_connection();

    info!(%job_id, %session_id, user_id, ?last_event_id, "event-stream session subscribed");

    let (tx, mut rx) = mpsc::channel::<Event>(SSE_BUFFER_SIZE);
    tokio::spawn(run_event_stream(
        state,
        job,
        filter,
        last_event_id,
        tx,
        session_id,
    ));

    let stream = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event), rx))
    });

    Ok((
        AppendHeaders([
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            // Disable intermediary buffering (nginx)
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ]),
        Sse::new(stream),
    ))
}

/// Encode a frame and push it to the client, bounded by the slow-client
/// timeout. Returns false when the session must end.
async fn send_event(tx: &mpsc::Sender<Event>, frame: &StreamFrame, id: Option<u64>) -> bool {
    // The SSE data field carries the bare progress message; envelope
    // frames serialize whole.
    let data = match frame {
        StreamFrame::Progress(msg) => serde_json::to_string(msg),
        other => serde_json::to_string(other),
    };
    let data = match data {
        Ok(d) => d,
        Err(_) => return false,
    };

    let mut event = Event::default().event(frame.event_name()).data(data);
    if let Some(id) = id {
        event = event.id(id.to_string());
    }
    if let Some(retry_ms) = frame.retry_ms() {
        event = event.retry(Duration::from_millis(retry_ms));
    }

    metrics::record_sse_event_sent(frame.event_name());
    match tokio::time::timeout(SLOW_CLIENT_TIMEOUT, tx.send(event)).await {
        Ok(Ok(())) => true,
        Ok(Err(_)) => false,
        Err(_) => {
            warn!("event-stream client too slow, terminating session");
            false
        }
    }
}

async fn run_event_stream(
    state: AppState,
    job: JobSnapshot,
    filter: SubscriptionFilter,
    last_event_id: Option<u64>,
    tx: mpsc::Sender<Event>,
    session_id: uuid::Uuid,
) {
    let _session_guard = scopeguard::guard((state.sessions.clone(), session_id), |(sessions, id)| {
        sessions.remove(id);
    });
    let job_id = job.job_id;

    // Initial status snapshot
    if !send_event(&tx, &StreamFrame::status(job_id, job.status, job.progress), None).await {
        return;
    }

    // Subscribe before replay; the cursor dedupes the overlap.
    let mut subscription = match state.broker.subscribe(job_id).await {
        Ok(s) => s,
        Err(e) => {
            warn!(%job_id, "broker subscribe failed: {e}");
            let _ = send_event(
                &tx,
                &StreamFrame::error("Streaming service unavailable", Some(BROKER_UNAVAILABLE_RETRY_MS)),
                None,
            )
            .await;
            return;
        }
    };

    let mut cursor = last_event_id.unwrap_or(0);
    let mut terminal = None;

    if last_event_id.is_some() {
        match state.broker.get_missed(job_id, cursor).await {
            Ok(missed) => {
                for msg in missed {
                    let event_id = msg.event_id;
                    cursor = cursor.max(event_id);
                    if msg.is_terminal() {
                        terminal = msg.status;
                    }
                    if filter.accepts(&msg)
                        && !send_event(&tx, &StreamFrame::progress(msg), Some(event_id)).await
                    {
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

    // Keepalive is a timer in the same loop, not a second task.
    let keepalive_period = Duration::from_secs(KEEPALIVE_INTERVAL_SECS);
    let mut keepalive =
        tokio::time::interval_at(tokio::time::Instant::now() + keepalive_period, keepalive_period);

    while terminal.is_none() {
        tokio::select! {
            recv = subscription.recv() => match recv {
                Recv::Message(msg) => {
                    if msg.event_id != 0 && msg.event_id <= cursor {
                        continue;
                    }
                    let event_id = msg.event_id;
                    cursor = cursor.max(event_id);
                    if msg.is_terminal() {
                        terminal = msg.status;
                    }
                    if filter.accepts(&msg)
                        && !send_event(&tx, &StreamFrame::progress(msg), Some(event_id)).await
                    {
                        return;
                    }
                }
                Recv::Idle => {}
                Recv::Closed => {
                    let _ = send_event(
                        &tx,
                        &StreamFrame::error("Progress stream ended", Some(STREAM_ERROR_RETRY_MS)),
                        None,
                    )
                    .await;
                    return;
                }
            },
            _ = keepalive.tick() => {
                if !send_event(&tx, &StreamFrame::keepalive(), None).await {
                    return;
                }
            },
            // Client went away: the Sse body was dropped along with the
            // receiver; abandon replay and release the subscription.
            _ = tx.closed() => {
                info!(%job_id, %session_id, "event-stream client disconnected");
                return;
            },
        }
    }

    if let Some(status) = terminal {
        let _ = send_event(&tx, &StreamFrame::complete(job_id, status), None).await;
    }
    subscription.close();
    info!(%job_id, %session_id, "event-stream session closed");
}

/// Current job progress snapshot (polling fallback).
pub async fn get_job_progress(
    Path(job_id): Path<i64>,
    Query(query): Query<SnapshotQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let job_id = JobId(job_id);
    let (_, job) = authorize_for_job(&state, &headers, query.token.as_deref(), job_id).await?;

    let mut response = json!({
        "job_id": job_id,
        "status": job.status,
        "progress": job.progress,
        "current_step": job.current_step,
        "started_at": job.started_at,
        "updated_at": job.updated_at,
        "timestamp": Utc::now(),
    });

    if query.include_recent {
        match state.broker.recent(job_id, 10).await {
            Ok(events) => {
                response["recent_events"] = serde_json::to_value(events)?;
            }
            Err(e) => {
                warn!(%job_id, "recent-event lookup failed: {e}");
                response["recent_events"] = json!([]);
            }
        }
    }

    Ok(Json(response))
}
