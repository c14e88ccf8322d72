//! Progress Notifier (C9): a session-keyed registry of open server-push
//! channels. Owns session -> connection bindings only; never reaches back into
//! Jobs (the Job Registry calls *into* this, not the other way around).

use crate::job::ProgressFrame;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

/// One push frame as it goes out over the wire: `event: progress` plus a JSON
/// payload, per §6's push channel contract.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub event: &'static str,
    #[serde(rename = "jobId")]
    pub job_id: uuid::Uuid,
    pub status: crate::job::JobStatus,
    pub message: Option<String>,
    pub progress: u8,
    #[serde(rename = "pollInterval")]
    pub poll_interval: u64,
    pub timestamp: u64,
}

impl From<&ProgressFrame> for ProgressEvent {
    fn from(frame: &ProgressFrame) -> Self {
        Self {
            event: "progress",
            job_id: frame.job_id,
            status: frame.status,
            message: frame.message.clone(),
            progress: frame.progress,
            poll_interval: frame.poll_interval_hint,
            timestamp: frame.timestamp,
        }
    }
}

pub type Connection = mpsc::UnboundedSender<ProgressEvent>;

/// Session-keyed registry of open push channels.
#[derive(Debug, Default)]
pub struct ProgressNotifier {
    sessions: DashMap<String, Connection>,
}

impl ProgressNotifier {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Registers a new session connection. Returns the receiving half so the
    /// caller can drive an actual transport (SSE writer, websocket, etc.).
    pub fn register(&self, session_id: impl Into<String>) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.insert(session_id.into(), tx);
        rx
    }

    pub fn unregister(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Delivers a frame to a session. Missing sessions are silently dropped
    /// (not an error, per §4.9); channels discovered closed are cleaned up
    /// lazily here rather than via an explicit close handler.
    pub fn send_progress(&self, session_id: &str, frame: &ProgressFrame) {
        let Some(conn) = self.sessions.get(session_id) else {
            return;
        };

        let event: ProgressEvent = frame.into();
        if conn.send(event).is_err() {
            drop(conn);
            self.sessions.remove(session_id);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use uuid::Uuid;

    fn frame() -> ProgressFrame {
        ProgressFrame {
            job_id: Uuid::new_v4(),
            status: JobStatus::Running,
            message: Some("working".into()),
            progress: 50,
            poll_interval_hint: 2000,
            timestamp: 123,
        }
    }

    #[test]
    fn missing_session_is_a_silent_no_op() {
        let notifier = ProgressNotifier::new();
        notifier.send_progress("ghost", &frame());
    }

    #[test]
    fn registered_session_receives_frame() {
        let notifier = ProgressNotifier::new();
        let mut rx = notifier.register("s1");
        notifier.send_progress("s1", &frame());
        let event = rx.try_recv().expect("frame delivered");
        assert_eq!(event.progress, 50);
    }

    #[test]
    fn closed_receiver_is_cleaned_up_on_next_send() {
        let notifier = ProgressNotifier::new();
        let rx = notifier.register("s1");
        drop(rx);
        notifier.send_progress("s1", &frame());
        assert_eq!(notifier.session_count(), 0);
    }

    #[test]
    fn unregister_is_idempotent() {
        let notifier = ProgressNotifier::new();
        notifier.unregister("never-registered");
        let _rx = notifier.register("s1");
        notifier.unregister("s1");
        notifier.unregister("s1");
        assert_eq!(notifier.session_count(), 0);
    }
}
