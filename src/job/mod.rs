pub mod cancel_token;
pub mod fingerprint;
pub mod registry;

pub use cancel_token::CancelToken;
pub use fingerprint::Fingerprint;
pub use registry::{JobRegistry, JobStats, RateLimitedRead};

use crate::timeout::OperationClass;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// The success/error payload a Job carries once terminal. Kept deliberately
/// opaque (`serde_json::Value`) since the domain meaning of a result is owned
/// by the caller's tool, not by the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobResult {
    Success { result: Value },
    Error { error: String },
}

impl JobResult {
    pub fn is_error(&self) -> bool {
        matches!(self, JobResult::Error { .. })
    }

    pub fn success(result: Value) -> Self {
        JobResult::Success { result }
    }

    pub fn error(message: impl Into<String>) -> Self {
        JobResult::Error {
            error: message.into(),
        }
    }
}

/// A process-wide unit of work, per §3.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub fingerprint: Fingerprint,
    pub tool_name: String,
    pub parameters: Value,
    pub status: JobStatus,
    pub created_at: u64,
    pub updated_at: u64,
    pub started_at: Option<u64>,
    pub progress_message: Option<String>,
    pub progress_percentage: u8,
    pub result: Option<JobResult>,
    pub details: Option<Value>,
    pub last_access_time: Option<u64>,
    pub access_count: u32,
    pub timeout_operation: OperationClass,
    pub timeout_ms: Option<u64>,
    pub cancel_token: Option<CancelToken>,
}

impl Job {
    pub(crate) fn new(id: Uuid, fingerprint: Fingerprint, tool_name: String, parameters: Value, now_ms: u64) -> Self {
        Self {
            id,
            fingerprint,
            tool_name,
            parameters,
            status: JobStatus::Pending,
            created_at: now_ms,
            updated_at: now_ms,
            started_at: None,
            progress_message: None,
            progress_percentage: 0,
            result: None,
            details: None,
            last_access_time: None,
            access_count: 0,
            timeout_operation: OperationClass::TaskExecution,
            timeout_ms: None,
            cancel_token: None,
        }
    }
}

/// A progress push event, per §3/§4.9. `poll_interval_hint` is derived at send
/// time from status and access history, never stored on the Job itself.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressFrame {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: Option<String>,
    pub progress: u8,
    pub poll_interval_hint: u64,
    pub timestamp: u64,
}

/// §6's poll-hint table: PENDING -> 5000ms, RUNNING -> 2000ms, terminal -> 0.
/// The Registry's rate-limit function (see `registry::recommended_wait`)
/// overrides this whenever it returns a non-zero wait.
pub fn status_poll_hint(status: JobStatus) -> u64 {
    match status {
        JobStatus::Pending => 5_000,
        JobStatus::Running => 2_000,
        JobStatus::Completed | JobStatus::Failed => 0,
    }
}
