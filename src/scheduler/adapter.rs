//! Execution Adapter (C7): the bidirectional bridge between a Job and a
//! scheduled execution. Translates Scheduler state changes into Job Registry
//! status updates, and exposes itself to the Registry as the cancellation
//! delegate for RUNNING jobs.

use crate::job::registry::ExecutionCanceller;
use crate::job::{JobRegistry, JobResult, JobStatus};
use crate::scheduler::coordinator::{ExecutionStatus, Scheduler, StateChange, StateChangeListener, TaskDescriptor, WorkFn};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, OnceLock, Weak};
use uuid::Uuid;

fn job_status_for(execution_status: ExecutionStatus) -> JobStatus {
    match execution_status {
        ExecutionStatus::Queued => JobStatus::Pending,
        ExecutionStatus::Running => JobStatus::Running,
        ExecutionStatus::Completed => JobStatus::Completed,
        ExecutionStatus::Failed | ExecutionStatus::Cancelled | ExecutionStatus::Timeout => JobStatus::Failed,
    }
}

pub struct ExecutionAdapter {
    registry: Arc<JobRegistry>,
    scheduler: Arc<Scheduler>,
    job_to_execution: DashMap<Uuid, Uuid>,
    execution_to_job: DashMap<Uuid, Uuid>,
    self_weak: OnceLock<Weak<ExecutionAdapter>>,
}

impl ExecutionAdapter {
    pub fn new(registry: Arc<JobRegistry>, scheduler: Arc<Scheduler>) -> Arc<Self> {
        let adapter = Arc::new(Self {
            registry,
            scheduler: scheduler.clone(),
            job_to_execution: DashMap::new(),
            execution_to_job: DashMap::new(),
            self_weak: OnceLock::new(),
        });
        let _ = adapter.self_weak.set(Arc::downgrade(&adapter));
        scheduler.register_listener(adapter.clone());
        adapter
    }

    /// Builds a `ScheduledExecution` descriptor from Job parameters, submits
    /// it to the Scheduler, and records both directions of the mapping.
    pub fn execute_job(&self, job_id: Uuid, task: TaskDescriptor, work: WorkFn) -> Uuid {
        let execution_id = self.scheduler.submit(task, work);
        self.job_to_execution.insert(job_id, execution_id);
        self.execution_to_job.insert(execution_id, job_id);

        if let Some(strong) = self.self_weak.get().and_then(Weak::upgrade) {
            self.registry.register_canceller(job_id, strong);
        }

        execution_id
    }

    pub fn cancel_job_execution(&self, job_id: Uuid, reason: &str) -> bool {
        let Some(execution_id) = self.job_to_execution.get(&job_id).map(|e| *e) else {
            return false;
        };
        self.scheduler.cancel_execution(execution_id, reason)
    }

    fn remove_mapping_for_execution(&self, execution_id: Uuid) {
        if let Some((_, job_id)) = self.execution_to_job.remove(&execution_id) {
            self.job_to_execution.remove(&job_id);
            self.registry.unregister_canceller(job_id);
        }
    }
}

impl StateChangeListener for ExecutionAdapter {
    fn on_state_change(&self, change: &StateChange) {
        let Some(job_id) = self.execution_to_job.get(&change.execution_id).map(|e| *e) else {
            return;
        };

        let job_status = job_status_for(change.new_status);
        match change.new_status {
            ExecutionStatus::Completed => {
                let result = match self.scheduler.take_result(change.execution_id) {
                    Some(Ok(value)) => JobResult::success(value),
                    Some(Err(message)) => JobResult::error(message),
                    None => JobResult::success(serde_json::Value::Null),
                };
                self.registry.set_job_result(job_id, result);
            }
            ExecutionStatus::Failed | ExecutionStatus::Cancelled | ExecutionStatus::Timeout => {
                let message = match self.scheduler.take_result(change.execution_id) {
                    Some(Err(message)) => message,
                    _ => change
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("execution ended: {:?}", change.new_status)),
                };
                self.registry.set_job_result(job_id, JobResult::error(message));
            }
            ExecutionStatus::Queued | ExecutionStatus::Running => {
                self.registry.update_status(job_id, job_status, None, None, None);
            }
        }

        if change.new_status.is_terminal() {
            self.remove_mapping_for_execution(change.execution_id);
        }
    }
}

#[async_trait]
impl ExecutionCanceller for ExecutionAdapter {
    async fn cancel_for_job(&self, job_id: Uuid, reason: &str) -> bool {
        self.cancel_job_execution(job_id, reason)
    }
}

impl std::fmt::Debug for ExecutionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionAdapter").finish_non_exhaustive()
    }
}
