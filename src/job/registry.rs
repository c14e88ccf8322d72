//! Job Registry (C6): identity, fingerprint-based dedup, status machine,
//! cancellation, access-count backoff, and the retention sweep.

use super::{fingerprint, CancelToken, Fingerprint, Job, JobResult, JobStatus, ProgressFrame};
use crate::clock::Clock;
use crate::notify::ProgressNotifier;
use crate::timeout::{OperationClass, TimeoutRegistry};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// The seam the Execution Adapter (C7) uses to let a RUNNING Job's
/// cancellation reach into the Scheduler, without the Registry ever importing
/// Scheduler/Adapter types directly (see DESIGN.md "cyclic relationships").
#[async_trait]
pub trait ExecutionCanceller: Send + Sync + std::fmt::Debug {
    async fn cancel_for_job(&self, job_id: Uuid, reason: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub oldest_age_ms: u64,
    pub average_age_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitedRead {
    pub job: Option<Job>,
    pub wait_ms: u64,
    pub should_wait: bool,
}

pub struct JobRegistry {
    jobs: DashMap<Uuid, Job>,
    fingerprints: DashMap<Fingerprint, Uuid>,
    sessions: DashMap<Uuid, String>,
    cancellers: DashMap<Uuid, Arc<dyn ExecutionCanceller>>,
    clock: Arc<dyn Clock>,
    timeouts: Arc<TimeoutRegistry>,
    notifier: Arc<ProgressNotifier>,
}

impl JobRegistry {
    pub fn new(clock: Arc<dyn Clock>, timeouts: Arc<TimeoutRegistry>, notifier: Arc<ProgressNotifier>) -> Self {
        Self {
            jobs: DashMap::new(),
            fingerprints: DashMap::new(),
            sessions: DashMap::new(),
            cancellers: DashMap::new(),
            clock,
            timeouts,
            notifier,
        }
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Creates or dedupes a Job, minting a fresh id.
    pub fn create_job(&self, tool_name: &str, parameters: &Value) -> Uuid {
        self.create_job_with_id(Uuid::new_v4(), tool_name, parameters)
    }

    /// As `create_job`, but `id` is used for a freshly-minted Job. If an
    /// active Job already exists under this fingerprint, `id` is discarded and
    /// the existing job's id is returned instead (per §4.6, dedup wins).
    pub fn create_job_with_id(&self, id: Uuid, tool_name: &str, parameters: &Value) -> Uuid {
        let fp = fingerprint::compute(tool_name, parameters);
        let now = self.now();
        let tool_name = tool_name.to_string();
        let parameters = parameters.clone();

        *self.fingerprints.entry(fp.clone()).or_insert_with(|| {
            self.jobs
                .insert(id, Job::new(id, fp.clone(), tool_name, parameters, now));
            id
        })
    }

    /// Binds a session id to a job so status fan-out has somewhere to push.
    /// A no-op association (never bound) makes `update_status`'s notifier call
    /// silently skip, matching §4.9's "no associated session" behavior.
    pub fn bind_session(&self, job_id: Uuid, session_id: impl Into<String>) {
        self.sessions.insert(job_id, session_id.into());
    }

    pub fn get_job(&self, id: Uuid, touch: bool) -> Option<Job> {
        let mut entry = self.jobs.get_mut(&id)?;
        if touch {
            let now = self.now();
            entry.access_count += 1;
            entry.last_access_time = Some(now);
        }
        Some(entry.clone())
    }

    /// The rate-limiting minimum-wait function, per §4.6/§8.
    fn recommended_wait(job: &Job, now: u64) -> u64 {
        if job.status.is_terminal() {
            return 0;
        }
        let Some(last_access) = job.last_access_time else {
            return 0;
        };

        let base = 1000u64;
        let factor = 2u64.saturating_pow((job.access_count / 3) as u32).min(10);
        let recommended = base * factor;
        let elapsed = now.saturating_sub(last_access);
        recommended.saturating_sub(elapsed)
    }

    pub fn get_job_with_rate_limit(&self, id: Uuid, touch: bool) -> Option<RateLimitedRead> {
        let mut entry = self.jobs.get_mut(&id)?;
        let now = self.now();
        let wait_ms = Self::recommended_wait(&entry, now);
        let should_wait = wait_ms > 0;

        if touch && !should_wait {
            entry.access_count += 1;
            entry.last_access_time = Some(now);
        }

        Some(RateLimitedRead {
            job: Some(entry.clone()),
            wait_ms,
            should_wait,
        })
    }

    pub fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        message: Option<String>,
        progress: Option<u8>,
        details: Option<Value>,
    ) -> bool {
        let Some(mut entry) = self.jobs.get_mut(&id) else {
            tracing::warn!(job_id = %id, "update_status on unknown job");
            return false;
        };

        if entry.status.is_terminal() {
            tracing::warn!(job_id = %id, status = ?entry.status, "update_status on terminal job; ignoring (terminal state is absorbing)");
            return false;
        }

        let now = self.now();
        let was_pending = entry.status == JobStatus::Pending;

        entry.status = status;
        if let Some(message) = message {
            entry.progress_message = Some(message);
        }
        if let Some(progress) = progress {
            entry.progress_percentage = progress;
        }
        if let Some(details) = details {
            entry.details = Some(details);
        }
        if was_pending && status == JobStatus::Running {
            entry.started_at = Some(now);
            entry.cancel_token = Some(CancelToken::new());
        }
        if status.is_terminal() {
            entry.progress_percentage = 100;
        }
        entry.updated_at = now;

        let frame = ProgressFrame {
            job_id: id,
            status: entry.status,
            message: entry.progress_message.clone(),
            progress: entry.progress_percentage,
            poll_interval_hint: super::status_poll_hint(entry.status),
            timestamp: now,
        };
        drop(entry);

        self.fan_out(id, &frame);
        true
    }

    pub fn set_job_result(&self, id: Uuid, result: JobResult) -> bool {
        let Some(mut entry) = self.jobs.get_mut(&id) else {
            tracing::warn!(job_id = %id, "set_job_result on unknown job");
            return false;
        };

        if entry.status.is_terminal() {
            tracing::warn!(job_id = %id, status = ?entry.status, "set_job_result on terminal job; ignoring (terminal state is absorbing)");
            return false;
        }

        let now = self.now();
        let is_error = result.is_error();
        entry.status = if is_error { JobStatus::Failed } else { JobStatus::Completed };
        entry.progress_percentage = 100;
        entry.result = Some(result);
        entry.updated_at = now;
        let fingerprint = entry.fingerprint.clone();

        let frame = ProgressFrame {
            job_id: id,
            status: entry.status,
            message: entry.progress_message.clone(),
            progress: 100,
            poll_interval_hint: 0,
            timestamp: now,
        };
        drop(entry);

        // Free the fingerprint slot iff it still points at this job.
        if let Some(active) = self.fingerprints.get(&fingerprint) {
            if *active == id {
                drop(active);
                self.fingerprints.remove(&fingerprint);
            }
        }
        self.cancellers.remove(&id);

        self.fan_out(id, &frame);
        true
    }

    fn fan_out(&self, id: Uuid, frame: &ProgressFrame) {
        if let Some(session) = self.sessions.get(&id) {
            self.notifier.send_progress(session.value(), frame);
        }
    }

    /// Only cancellable while RUNNING. Delegates to the Scheduler via the
    /// injected canceller when one is registered; falls back to tripping the
    /// cancel-token and writing a FAILED result directly.
    pub async fn cancel_job(&self, id: Uuid, reason: &str) -> bool {
        let running = matches!(self.jobs.get(&id).map(|j| j.status), Some(JobStatus::Running));
        if !running {
            return false;
        }

        if let Some(canceller) = self.cancellers.get(&id).map(|c| c.value().clone()) {
            if canceller.cancel_for_job(id, reason).await {
                return true;
            }
        }

        if let Some(token) = self.jobs.get(&id).and_then(|j| j.cancel_token.clone()) {
            token.cancel(reason);
        }
        self.set_job_result(id, JobResult::error(format!("cancelled: {reason}")));
        true
    }

    /// Registers the handle the Scheduler's execution for this Job can be
    /// cancelled through. Held only while the Job is RUNNING; the Adapter
    /// clears it once the execution reaches a terminal state.
    pub fn register_canceller(&self, id: Uuid, canceller: Arc<dyn ExecutionCanceller>) {
        self.cancellers.insert(id, canceller);
    }

    pub fn unregister_canceller(&self, id: Uuid) {
        self.cancellers.remove(&id);
    }

    pub fn get_job_abort_signal(&self, id: Uuid) -> Option<CancelToken> {
        self.jobs.get(&id).and_then(|j| j.cancel_token.clone())
    }

    /// Read-only; callers observe this and invoke `cancel_job` themselves.
    pub fn is_job_timed_out(&self, id: Uuid) -> bool {
        let Some(job) = self.jobs.get(&id) else {
            return false;
        };
        if job.status != JobStatus::Running {
            return false;
        }
        let Some(started_at) = job.started_at else {
            return false;
        };

        let effective_timeout_ms = job
            .timeout_ms
            .unwrap_or_else(|| self.timeouts.timeout(job.timeout_operation).as_millis() as u64);
        self.now().saturating_sub(started_at) > effective_timeout_ms
    }

    pub fn set_job_timeout(&self, id: Uuid, op: OperationClass, ms: Option<u64>) {
        if let Some(mut job) = self.jobs.get_mut(&id) {
            job.timeout_operation = op;
            job.timeout_ms = ms;
        }
    }

    /// Removes terminal jobs whose `updated_at` age exceeds `max_age_ms`.
    /// Returns the count removed.
    pub fn cleanup_old_jobs(&self, max_age_ms: u64) -> usize {
        let now = self.now();
        let stale: Vec<Uuid> = self
            .jobs
            .iter()
            .filter(|entry| entry.status.is_terminal() && now.saturating_sub(entry.updated_at) > max_age_ms)
            .map(|entry| *entry.key())
            .collect();

        for id in &stale {
            if let Some((_, job)) = self.jobs.remove(id) {
                if let Some(active) = self.fingerprints.get(&job.fingerprint) {
                    if *active == *id {
                        drop(active);
                        self.fingerprints.remove(&job.fingerprint);
                    }
                }
            }
            self.sessions.remove(id);
            self.cancellers.remove(id);
        }

        stale.len()
    }

    pub fn get_stats(&self) -> JobStats {
        let now = self.now();
        let mut stats = JobStats::default();
        let mut total_age = 0u64;
        let mut oldest = 0u64;
        let mut count = 0u64;

        for entry in self.jobs.iter() {
            match entry.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
            let age = now.saturating_sub(entry.created_at);
            total_age += age;
            oldest = oldest.max(age);
            count += 1;
        }

        stats.oldest_age_ms = oldest;
        stats.average_age_ms = if count > 0 { total_age / count } else { 0 };
        stats
    }

    /// Returns up to `max` jobs, most recently created first.
    pub fn list_jobs(&self, max: usize) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(max);
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
