//! Execution Coordinator / Scheduler (C8): admission control, priority
//! queueing, dependency gating, concurrency and resource caps, and the
//! periodic timeout scan.

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::job::CancelToken;
use crate::timeout::{Complexity, OperationClass, TimeoutRegistry};
use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::Timeout
        )
    }
}

#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub task_id: Uuid,
    pub title: String,
    pub priority: Priority,
    pub estimated_hours: Option<f64>,
    pub dependency_ids: Vec<Uuid>,
    pub memory_mb: u64,
    pub cpu_weight: u64,
    pub batch_id: Option<String>,
    pub operation: OperationClass,
    pub complexity: Complexity,
}

#[derive(Debug, Clone)]
pub struct ScheduledExecution {
    pub execution_id: Uuid,
    pub task: TaskDescriptor,
    pub status: ExecutionStatus,
    pub scheduled_start: Option<u64>,
    pub scheduled_end: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StateChange {
    pub execution_id: Uuid,
    pub task_id: Uuid,
    pub previous_status: ExecutionStatus,
    pub new_status: ExecutionStatus,
    pub timestamp: u64,
    pub reason: Option<String>,
}

pub trait StateChangeListener: Send + Sync {
    fn on_state_change(&self, change: &StateChange);
}

pub type WorkResult = Result<serde_json::Value, String>;
pub type WorkFuture = Pin<Box<dyn Future<Output = WorkResult> + Send>>;
pub type WorkFn = Box<dyn FnOnce(CancelToken) -> WorkFuture + Send>;

struct QueueEntry {
    execution_id: Uuid,
    priority_weight: u32,
    enqueue_seq: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority_weight == other.priority_weight && self.enqueue_seq == other.enqueue_seq
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // (priority desc, enqueue_time asc): higher weight wins; ties favor the
    // earlier arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority_weight
            .cmp(&other.priority_weight)
            .then_with(|| other.enqueue_seq.cmp(&self.enqueue_seq))
    }
}

/// The runtime's view of a `Scheduler` execution once it has been dispatched
/// to a worker.
struct RunningWork {
    run_start: u64,
    task: TaskDescriptor,
}

pub struct Scheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    timeouts: Arc<TimeoutRegistry>,
    queue: Mutex<BinaryHeap<QueueEntry>>,
    pending_work: DashMap<Uuid, WorkFn>,
    executions: DashMap<Uuid, ScheduledExecution>,
    cancel_tokens: DashMap<Uuid, CancelToken>,
    running: DashMap<Uuid, RunningWork>,
    results: DashMap<Uuid, WorkResult>,
    reserved_memory_mb: AtomicU64,
    reserved_cpu_weight: AtomicU64,
    running_count: AtomicUsize,
    listeners: Mutex<Vec<Arc<dyn StateChangeListener>>>,
    next_enqueue_seq: AtomicU64,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>, timeouts: Arc<TimeoutRegistry>) -> Arc<Self> {
        Arc::new(Self {
            config,
            clock,
            timeouts,
            queue: Mutex::new(BinaryHeap::new()),
            pending_work: DashMap::new(),
            executions: DashMap::new(),
            cancel_tokens: DashMap::new(),
            running: DashMap::new(),
            results: DashMap::new(),
            reserved_memory_mb: AtomicU64::new(0),
            reserved_cpu_weight: AtomicU64::new(0),
            running_count: AtomicUsize::new(0),
            listeners: Mutex::new(Vec::new()),
            next_enqueue_seq: AtomicU64::new(0),
        })
    }

    /// Consumes the stored outcome of a completed or failed execution. A
    /// listener typically calls this once, right after observing the
    /// terminal `StateChange`.
    pub fn take_result(&self, execution_id: Uuid) -> Option<WorkResult> {
        self.results.remove(&execution_id).map(|(_, result)| result)
    }

    pub fn register_listener(&self, listener: Arc<dyn StateChangeListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn priority_weight(&self, priority: Priority) -> u32 {
        match priority {
            Priority::Critical => self.config.priority_weight_critical,
            Priority::High => self.config.priority_weight_high,
            Priority::Medium => self.config.priority_weight_medium,
            Priority::Low => self.config.priority_weight_low,
        }
    }

    pub fn running_count(&self) -> usize {
        self.running_count.load(AtomicOrdering::Acquire)
    }

    pub fn get_execution(&self, id: Uuid) -> Option<ScheduledExecution> {
        self.executions.get(&id).map(|e| e.clone())
    }

    /// Enqueues `task`, storing `work` until admission. Returns the minted
    /// execution id.
    pub fn submit(&self, task: TaskDescriptor, work: WorkFn) -> Uuid {
        let execution_id = Uuid::new_v4();
        let weight = self.priority_weight(task.priority);
        let seq = self.next_enqueue_seq.fetch_add(1, AtomicOrdering::SeqCst);

        self.executions.insert(
            execution_id,
            ScheduledExecution {
                execution_id,
                task: task.clone(),
                status: ExecutionStatus::Queued,
                scheduled_start: None,
                scheduled_end: None,
            },
        );
        self.pending_work.insert(execution_id, work);
        self.queue.lock().unwrap().push(QueueEntry {
            execution_id,
            priority_weight: weight,
            enqueue_seq: seq,
        });

        execution_id
    }

    fn dependencies_satisfied(&self, task: &TaskDescriptor) -> bool {
        task.dependency_ids.iter().all(|dep_id| {
            self.executions
                .get(dep_id)
                .map(|dep| dep.status == ExecutionStatus::Completed)
                .unwrap_or(true)
        })
    }

    fn reservation_fits(&self, task: &TaskDescriptor) -> bool {
        let memory = self.reserved_memory_mb.load(AtomicOrdering::Acquire) + task.memory_mb;
        let cpu = self.reserved_cpu_weight.load(AtomicOrdering::Acquire) + task.cpu_weight;
        memory <= self.config.memory_cap_mb && cpu <= self.config.cpu_cap_weight
    }

    /// Runs one admission pass: pops candidates while concurrency, dependency,
    /// and resource constraints allow. Candidates that are blocked are
    /// returned to the queue so later, unblocked candidates can still be
    /// admitted in the same pass.
    pub fn admit_once(self: &Arc<Self>) {
        loop {
            if self.running_count() >= self.config.max_concurrent_jobs {
                return;
            }

            let mut deferred = Vec::new();
            let mut admitted = None;

            {
                let mut queue = self.queue.lock().unwrap();
                while let Some(entry) = queue.pop() {
                    let Some(exec) = self.executions.get(&entry.execution_id) else {
                        continue;
                    };
                    if exec.status != ExecutionStatus::Queued {
                        continue;
                    }
                    let task = exec.task.clone();
                    drop(exec);

                    if !self.dependencies_satisfied(&task) {
                        deferred.push(entry);
                        continue;
                    }
                    if !self.reservation_fits(&task) {
                        deferred.push(entry);
                        continue;
                    }

                    admitted = Some((entry, task));
                    break;
                }
                for entry in deferred {
                    queue.push(entry);
                }
            }

            let Some((entry, task)) = admitted else {
                return;
            };

            self.dispatch(entry.execution_id, task);
        }
    }

    fn dispatch(self: &Arc<Self>, execution_id: Uuid, task: TaskDescriptor) {
        let Some((_, work)) = self.pending_work.remove(&execution_id) else {
            return;
        };

        self.reserved_memory_mb.fetch_add(task.memory_mb, AtomicOrdering::AcqRel);
        self.reserved_cpu_weight.fetch_add(task.cpu_weight, AtomicOrdering::AcqRel);
        self.running_count.fetch_add(1, AtomicOrdering::AcqRel);

        let now = self.clock.now_ms();
        let token = CancelToken::new();
        self.cancel_tokens.insert(execution_id, token.clone());
        self.running.insert(
            execution_id,
            RunningWork {
                run_start: now,
                task: task.clone(),
            },
        );

        self.transition(execution_id, ExecutionStatus::Running, None, Some(now), None);

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = work(token).await;
            scheduler.complete(execution_id, outcome);
        });
    }

    fn complete(self: &Arc<Self>, execution_id: Uuid, outcome: WorkResult) {
        let Some(exec) = self.executions.get(&execution_id) else {
            return;
        };
        if exec.status.is_terminal() {
            return;
        }
        drop(exec);

        self.release_resources(execution_id);
        let now = self.clock.now_ms();
        let status = if outcome.is_ok() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        let reason = outcome.as_ref().err().cloned();
        self.results.insert(execution_id, outcome);
        self.transition(execution_id, status, reason, None, Some(now));
        self.admit_once();
    }

    fn release_resources(&self, execution_id: Uuid) {
        if let Some((_, work)) = self.running.remove(&execution_id) {
            self.reserved_memory_mb
                .fetch_sub(work.task.memory_mb, AtomicOrdering::AcqRel);
            self.reserved_cpu_weight
                .fetch_sub(work.task.cpu_weight, AtomicOrdering::AcqRel);
            self.running_count.fetch_sub(1, AtomicOrdering::AcqRel);
        }
        self.cancel_tokens.remove(&execution_id);
    }

    /// Cancels a queued-or-running execution. Queued executions are simply
    /// removed; running executions have their cancel-token tripped.
    pub fn cancel_execution(self: &Arc<Self>, execution_id: Uuid, reason: &str) -> bool {
        let Some(exec) = self.executions.get(&execution_id) else {
            return false;
        };
        if exec.status.is_terminal() {
            return false;
        }
        let was_running = exec.status == ExecutionStatus::Running;
        drop(exec);

        if was_running {
            if let Some(token) = self.cancel_tokens.get(&execution_id) {
                token.cancel(reason);
            }
            self.release_resources(execution_id);
        } else {
            self.pending_work.remove(&execution_id);
        }

        self.transition(execution_id, ExecutionStatus::Cancelled, Some(reason.to_string()), None, None);
        if !was_running {
            self.admit_once();
        }
        true
    }

    /// Compares `now - run_start` against the operation-class timeout;
    /// exceeded executions are cancelled with status `timeout`.
    pub fn scan_timeouts(self: &Arc<Self>) {
        let now = self.clock.now_ms();
        let timed_out: Vec<Uuid> = self
            .running
            .iter()
            .filter(|entry| {
                let deadline = self
                    .timeouts
                    .complexity_adjusted(entry.task.operation, entry.task.complexity, entry.task.estimated_hours)
                    .as_millis() as u64;
                now.saturating_sub(entry.run_start) > deadline
            })
            .map(|entry| *entry.key())
            .collect();

        for execution_id in timed_out {
            if let Some(token) = self.cancel_tokens.get(&execution_id) {
                token.cancel("timeout");
            }
            self.release_resources(execution_id);
            self.transition(execution_id, ExecutionStatus::Timeout, Some("timeout".into()), None, None);
        }
        if !self.pending_work.is_empty() {
            self.admit_once();
        }
    }

    fn transition(
        &self,
        execution_id: Uuid,
        new_status: ExecutionStatus,
        reason: Option<String>,
        scheduled_start: Option<u64>,
        scheduled_end: Option<u64>,
    ) {
        let Some(mut exec) = self.executions.get_mut(&execution_id) else {
            return;
        };
        let previous_status = exec.status;
        exec.status = new_status;
        if let Some(start) = scheduled_start {
            exec.scheduled_start = Some(start);
        }
        if let Some(end) = scheduled_end {
            exec.scheduled_end = Some(end);
        }
        let task_id = exec.task.task_id;
        drop(exec);

        let change = StateChange {
            execution_id,
            task_id,
            previous_status,
            new_status,
            timestamp: self.clock.now_ms(),
            reason,
        };
        for listener in self.listeners.lock().unwrap().iter() {
            listener.on_state_change(&change);
        }
    }

    /// Spawns the admission loop as a background task, polling every
    /// `admission_interval_ms`.
    pub fn spawn_admission_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let interval = crate::config::millis(self.config.admission_interval_ms.max(1));
        tokio::spawn(async move {
            loop {
                scheduler.admit_once();
                tokio::time::sleep(interval).await;
            }
        })
    }

    /// Spawns the timeout scan as a background task.
    pub fn spawn_timeout_scan_loop(self: &Arc<Self>, interval_ms: u64) -> tokio::task::JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let interval = crate::config::millis(interval_ms.max(1));
        tokio::spawn(async move {
            loop {
                scheduler.scan_timeouts();
                tokio::time::sleep(interval).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::config::TimeoutConfig;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn descriptor(id: Uuid, priority: Priority) -> TaskDescriptor {
        TaskDescriptor {
            task_id: id,
            title: "t".into(),
            priority,
            estimated_hours: None,
            dependency_ids: Vec::new(),
            memory_mb: 1,
            cpu_weight: 1,
            batch_id: None,
            operation: OperationClass::TaskExecution,
            complexity: Complexity::Simple,
        }
    }

    fn immediate_ok() -> WorkFn {
        Box::new(|_token| Box::pin(async { Ok(serde_json::json!({})) }))
    }

    fn scheduler_with(config: SchedulerConfig) -> Arc<Scheduler> {
        let clock = FakeClock::new();
        let timeouts = Arc::new(TimeoutRegistry::new(TimeoutConfig::default(), Default::default()));
        Scheduler::new(config, clock, timeouts)
    }

    #[tokio::test]
    async fn concurrency_cap_is_never_exceeded() {
        let mut config = SchedulerConfig::default();
        config.max_concurrent_jobs = 2;
        let scheduler = scheduler_with(config);

        for _ in 0..5 {
            scheduler.submit(descriptor(Uuid::new_v4(), Priority::Medium), Box::new(|_token| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(serde_json::json!({}))
                })
            }));
        }
        scheduler.admit_once();
        assert!(scheduler.running_count() <= 2);
    }

    #[tokio::test]
    async fn higher_priority_admitted_first_under_concurrency_cap() {
        let mut config = SchedulerConfig::default();
        config.max_concurrent_jobs = 1;
        let scheduler = scheduler_with(config);

        let low_id = scheduler.submit(descriptor(Uuid::new_v4(), Priority::Low), Box::new(|_t| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(serde_json::json!({}))
            })
        }));
        let critical_id = scheduler.submit(descriptor(Uuid::new_v4(), Priority::Critical), immediate_ok());

        scheduler.admit_once();
        assert_eq!(scheduler.get_execution(critical_id).unwrap().status, ExecutionStatus::Queued);
        assert_eq!(scheduler.get_execution(low_id).unwrap().status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn dependency_gating_blocks_until_dependency_completes() {
        let scheduler = scheduler_with(SchedulerConfig::default());
        let dep_id = scheduler.submit(descriptor(Uuid::new_v4(), Priority::Medium), immediate_ok());
        scheduler.admit_once();
        tokio::task::yield_now().await;

        let mut dependent = descriptor(Uuid::new_v4(), Priority::Medium);
        dependent.dependency_ids.push(dep_id);
        let dependent_id = scheduler.submit(dependent, immediate_ok());

        scheduler.admit_once();
        // Dependency hasn't completed yet from the scheduler's point of view
        // until its worker posts back; give it a moment to settle.
        for _ in 0..20 {
            if scheduler.get_execution(dep_id).unwrap().status == ExecutionStatus::Completed {
                break;
            }
            tokio::task::yield_now().await;
        }
        scheduler.admit_once();
        assert_eq!(scheduler.get_execution(dependent_id).unwrap().status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn resource_cap_defers_admission() {
        let mut config = SchedulerConfig::default();
        config.max_concurrent_jobs = 10;
        config.memory_cap_mb = 10;
        let scheduler = scheduler_with(config);

        let mut big = descriptor(Uuid::new_v4(), Priority::Medium);
        big.memory_mb = 8;
        scheduler.submit(big, Box::new(|_t| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(serde_json::json!({}))
            })
        }));

        let mut also_big = descriptor(Uuid::new_v4(), Priority::Medium);
        also_big.memory_mb = 8;
        let second_id = scheduler.submit(also_big, immediate_ok());

        scheduler.admit_once();
        assert_eq!(scheduler.get_execution(second_id).unwrap().status, ExecutionStatus::Queued);
    }

    #[tokio::test]
    async fn cancel_running_execution_trips_token_and_releases_resources() {
        let scheduler = scheduler_with(SchedulerConfig::default());
        let cancelled_flag = Arc::new(AtomicU32::new(0));
        let flag = cancelled_flag.clone();

        let id = scheduler.submit(
            descriptor(Uuid::new_v4(), Priority::Medium),
            Box::new(move |token| {
                Box::pin(async move {
                    token.cancelled().await;
                    flag.fetch_add(1, AtomicOrdering::SeqCst);
                    Ok(serde_json::json!({}))
                })
            }),
        );
        scheduler.admit_once();
        tokio::task::yield_now().await;

        assert!(scheduler.cancel_execution(id, "user-abort"));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(scheduler.get_execution(id).unwrap().status, ExecutionStatus::Cancelled);
        assert_eq!(cancelled_flag.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queued_cancel_is_immediate() {
        let mut config = SchedulerConfig::default();
        config.max_concurrent_jobs = 0;
        let scheduler = scheduler_with(config);
        let id = scheduler.submit(descriptor(Uuid::new_v4(), Priority::Medium), immediate_ok());
        assert!(scheduler.cancel_execution(id, "never started"));
        assert_eq!(scheduler.get_execution(id).unwrap().status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn timeout_scan_cancels_overrunning_execution() {
        let clock = FakeClock::new();
        let mut timeouts = TimeoutConfig::default();
        timeouts.task_execution_ms = 50;
        let timeouts = Arc::new(TimeoutRegistry::new(timeouts, Default::default()));
        let scheduler = Scheduler::new(SchedulerConfig::default(), clock.clone(), timeouts);

        let id = scheduler.submit(
            descriptor(Uuid::new_v4(), Priority::Medium),
            Box::new(|token| {
                Box::pin(async move {
                    token.cancelled().await;
                    Ok(serde_json::json!({}))
                })
            }),
        );
        scheduler.admit_once();
        tokio::task::yield_now().await;

        clock.advance(100);
        scheduler.scan_timeouts();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(scheduler.get_execution(id).unwrap().status, ExecutionStatus::Timeout);
    }
}
