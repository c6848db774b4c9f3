//! Stream envelopes shared by the WebSocket and SSE transports.
//!
//! Server-to-client frames carry a `type` tag; the SSE transport uses
//! [`StreamFrame::event_name`] for the `event:` field and the WebSocket
//! transport sends the tagged JSON object as-is.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus};
use crate::progress::ProgressMessage;

/// Server-to-client stream frame.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    /// Sent once when a session is accepted
    Connection {
        session_id: String,
        job_id: JobId,
        status: JobStatus,
        progress: u8,
        timestamp: DateTime<Utc>,
    },

    /// Initial job status snapshot on the SSE transport
    Status {
        job_id: JobId,
        status: JobStatus,
        progress: u8,
        timestamp: DateTime<Utc>,
    },

    /// A progress message, fields flattened into the frame
    Progress(ProgressMessage),

    /// Job reached a terminal status; the session closes after this frame
    Complete {
        job_id: JobId,
        status: JobStatus,
        timestamp: DateTime<Utc>,
    },

    /// Backend error with an optional client retry hint
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_ms: Option<u64>,
        timestamp: DateTime<Utc>,
    },

    /// Reply to a client ping
    Pong { timestamp: DateTime<Utc> },

    /// Periodic keepalive on the SSE transport
    Keepalive { timestamp: DateTime<Utc> },
}

impl StreamFrame {
    /// Create a connection frame from a job snapshot.
    pub fn connection(session_id: impl Into<String>, job_id: JobId, status: JobStatus, progress: u8) -> Self {
        StreamFrame::Connection {
            session_id: session_id.into(),
            job_id,
            status,
            progress,
            timestamp: Utc::now(),
        }
    }

    /// Create a status snapshot frame.
    pub fn status(job_id: JobId, status: JobStatus, progress: u8) -> Self {
        StreamFrame::Status {
            job_id,
            status,
            progress,
            timestamp: Utc::now(),
        }
    }

    /// Wrap a progress message.
    pub fn progress(msg: ProgressMessage) -> Self {
        StreamFrame::Progress(msg)
    }

    /// Create a completion frame.
    pub fn complete(job_id: JobId, status: JobStatus) -> Self {
        StreamFrame::Complete {
            job_id,
            status,
            timestamp: Utc::now(),
        }
    }

    /// Create an error frame with an optional retry hint in milliseconds.
    pub fn error(message: impl Into<String>, retry_ms: Option<u64>) -> Self {
        StreamFrame::Error {
            message: message.into(),
            retry_ms,
            timestamp: Utc::now(),
        }
    }

    /// Create a pong frame.
    pub fn pong() -> Self {
        StreamFrame::Pong {
            timestamp: Utc::now(),
        }
    }

    /// Create a keepalive frame.
    pub fn keepalive() -> Self {
        StreamFrame::Keepalive {
            timestamp: Utc::now(),
        }
    }

    /// The SSE event name for this frame.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamFrame::Connection { .. } => "connection",
            StreamFrame::Status { .. } => "status",
            StreamFrame::Progress(_) => "progress",
            StreamFrame::Complete { .. } => "complete",
            StreamFrame::Error { .. } => "error",
            StreamFrame::Pong { .. } => "pong",
            StreamFrame::Keepalive { .. } => "keepalive",
        }
    }

    /// The client retry hint carried by this frame, if any.
    pub fn retry_ms(&self) -> Option<u64> {
        match self {
            StreamFrame::Error { retry_ms, .. } => *retry_ms,
            StreamFrame::Keepalive { .. } => Some(crate::subscription::KEEPALIVE_RETRY_MS),
            _ => None,
        }
    }
}

/// Client-to-server control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Liveness probe; the server replies with a pong frame
    Ping,
    /// Orderly close request
    Unsubscribe,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::EventType;

    #[test]
    fn test_progress_frame_flattens_message() {
        let mut msg = ProgressMessage::new(JobId(5), EventType::ProgressUpdate);
        msg.event_id = 3;
        msg.progress_pct = Some(40);
        let frame = StreamFrame::progress(msg);

        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["job_id"], 5);
        assert_eq!(json["event_id"], 3);
        assert_eq!(json["progress_pct"], 40);
    }

    #[test]
    fn test_frame_event_names() {
        assert_eq!(StreamFrame::pong().event_name(), "pong");
        assert_eq!(StreamFrame::keepalive().event_name(), "keepalive");
        assert_eq!(
            StreamFrame::complete(JobId(1), JobStatus::Completed).event_name(),
            "complete"
        );
    }

    #[test]
    fn test_error_frame_retry_hint() {
        let frame = StreamFrame::error("stream failed", Some(5000));
        assert_eq!(frame.retry_ms(), Some(5000));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["retry_ms"], 5000);
    }

    #[test]
    fn test_control_frame_parsing() {
        let ping: ControlFrame = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(ping, ControlFrame::Ping);
        let unsub: ControlFrame = serde_json::from_str(r#"{"action":"unsubscribe"}"#).unwrap();
        assert_eq!(unsub, ControlFrame::Unsubscribe);
        // Unknown actions do not parse; callers ignore them at debug level.
        assert!(serde_json::from_str::<ControlFrame>(r#"{"action":"dance"}"#).is_err());
    }
}
