//! MCP tool surface for the task orchestration runtime. Wires the Job
//! Registry, Scheduler, Execution Adapter, Search Engine, Progress Notifier,
//! and Performance Monitor together behind four core tools plus a handful of
//! read-only diagnostics, in the shape of the teacher's `#[tool_router]`
//! server.

use crate::clock::Clock;
use crate::config::RuntimeConfig;
use crate::job::JobRegistry;
use crate::metrics::PerformanceMonitor;
use crate::scheduler::{ExecutionAdapter, Priority, Scheduler, TaskDescriptor};
use crate::search::{SearchEngine, SearchOptions, SearchStrategy};
use crate::timeout::{Complexity, OperationClass, TimeoutRegistry};
use rmcp::{
    ErrorData as McpError, handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters, model::*, tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmitJobInput {
    /// Name of the tool/operation this job performs. "file_search" runs the
    /// search engine against `parameters`; any other name is executed as a
    /// no-op that echoes `parameters` back as the result.
    pub tool_name: String,
    /// Arbitrary JSON parameters for the job. Two equal-fingerprint submits
    /// (same tool_name + canonicalized parameters) dedupe onto the same job.
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Session id to bind for push-channel progress delivery.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
}

fn default_priority() -> String {
    "medium".to_string()
}

fn parse_priority(s: &str) -> Priority {
    match s.to_ascii_lowercase().as_str() {
        "critical" => Priority::Critical,
        "high" => Priority::High,
        "low" => Priority::Low,
        _ => Priority::Medium,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobIdInput {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CancelJobInput {
    pub job_id: String,
    #[serde(default = "default_cancel_reason")]
    pub reason: String,
}

fn default_cancel_reason() -> String {
    "cancelled by caller".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListJobsInput {
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
}

fn default_max_jobs() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchFilesInput {
    /// Directory to search from.
    pub root: String,
    /// Pattern to match, interpreted per `strategy`.
    pub pattern: String,
    /// One of "fuzzy" (default), "exact", "glob", "regex", "content".
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

fn parse_strategy(s: &str) -> SearchStrategy {
    match s.to_ascii_lowercase().as_str() {
        "exact" => SearchStrategy::Exact,
        "glob" => SearchStrategy::Glob,
        "regex" => SearchStrategy::Regex,
        "content" => SearchStrategy::Content,
        _ => SearchStrategy::Fuzzy,
    }
}

fn job_id_from_str(raw: &str) -> Result<uuid::Uuid, McpError> {
    raw.parse().map_err(|_| McpError::invalid_params("invalid job_id", None::<serde_json::Value>))
}

fn job_to_json(job: &crate::job::Job) -> serde_json::Value {
    serde_json::json!({
        "jobId": job.id,
        "status": job.status,
        "progress": job.progress_percentage,
        "message": job.progress_message,
        "result": job.result,
    })
}

#[derive(Clone)]
pub struct TaskRunnerServer {
    tool_router: ToolRouter<Self>,
    config: Arc<RuntimeConfig>,
    clock: Arc<dyn Clock>,
    registry: Arc<JobRegistry>,
    scheduler: Arc<Scheduler>,
    adapter: Arc<ExecutionAdapter>,
    search_engine: Arc<SearchEngine>,
    monitor: Arc<PerformanceMonitor>,
}

#[tool_router]
impl TaskRunnerServer {
    pub fn new(config: RuntimeConfig) -> Self {
        let config = Arc::new(config);
        let clock = crate::clock::SystemClock::new();
        let timeouts = Arc::new(TimeoutRegistry::new(config.timeouts.clone(), config.retry.clone()));
        let notifier = Arc::new(crate::notify::ProgressNotifier::new());
        let registry = Arc::new(JobRegistry::new(clock.clone(), timeouts.clone(), notifier));
        let scheduler = Scheduler::new(config.scheduler.clone(), clock.clone(), timeouts);
        let adapter = ExecutionAdapter::new(registry.clone(), scheduler.clone());
        let cache = Arc::new(crate::search::ResultCache::new(
            clock.clone(),
            config.cache.max_entries,
            config.cache.max_bytes,
            config.cache.ttl_ms,
        ));
        let monitor = Arc::new(PerformanceMonitor::new(clock.clone()));
        let search_engine = Arc::new(
            SearchEngine::new(config.walker.clone(), cache).with_metrics(monitor.clone()),
        );

        scheduler.clone().spawn_admission_loop();
        scheduler.clone().spawn_timeout_scan_loop(config.scheduler.admission_interval_ms);

        Self {
            tool_router: Self::tool_router(),
            config,
            clock,
            registry,
            scheduler,
            adapter,
            search_engine,
            monitor,
        }
    }

    /// A handle to the job registry for background tasks (e.g. the retention
    /// sweep in `main.rs`) that live outside the tool-call surface.
    pub fn registry_handle(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    fn build_work(&self, tool_name: &str, parameters: serde_json::Value) -> crate::scheduler::WorkFn {
        let search_engine = self.search_engine.clone();
        match tool_name {
            "file_search" => Box::new(move |_token: crate::job::CancelToken| {
                Box::pin(async move {
                    let root: String = parameters
                        .get("root")
                        .and_then(|v| v.as_str())
                        .unwrap_or(".")
                        .to_string();
                    let pattern = parameters
                        .get("pattern")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    let strategy = parameters
                        .get("strategy")
                        .and_then(|v| v.as_str())
                        .map(parse_strategy)
                        .unwrap_or_default();
                    let mut options = SearchOptions::from_config(pattern, &crate::config::SearchConfig::default());
                    options.strategy = strategy;
                    if let Some(max_results) = parameters.get("max_results").and_then(|v| v.as_u64()) {
                        options.max_results = max_results as usize;
                    }

                    let outcome: crate::scheduler::WorkResult = search_engine
                        .search(&PathBuf::from(root), &options)
                        .await
                        .map(|matches| serde_json::json!({ "matches": matches }))
                        .map_err(|e| e.to_string());
                    outcome
                }) as crate::scheduler::WorkFuture
            }),
            _ => Box::new(move |_token: crate::job::CancelToken| {
                Box::pin(async move {
                    let outcome: crate::scheduler::WorkResult = Ok(parameters);
                    outcome
                }) as crate::scheduler::WorkFuture
            }),
        }
    }

    #[tool(
        name = "submit_job",
        description = "Submit a unit of work for scheduled execution.

PARAMETERS:
- tool_name (string, required): operation to run. \"file_search\" runs the file search engine over parameters {root, pattern, strategy, max_results}; any other name is executed as an echo of its parameters.
- parameters (object, default: {}): arguments for the operation.
- session_id (string, optional): binds this job to a push-channel session.
- priority (string, default: \"medium\"): one of \"low\", \"medium\", \"high\", \"critical\".

BEHAVIOR:
- Two submits with the same tool_name and canonically-equal parameters dedupe onto the same job.
- Scheduling is asynchronous; poll with get_job_result.

RETURNS:
- jobId: identifier to pass to get_job_result / cancel_job."
    )]
    async fn submit_job(
        &self,
        Parameters(input): Parameters<SubmitJobInput>,
    ) -> Result<CallToolResult, McpError> {
        let job_id = self.registry.create_job(&input.tool_name, &input.parameters);
        if let Some(session_id) = &input.session_id {
            self.registry.bind_session(job_id, session_id.clone());
        }

        let work = self.build_work(&input.tool_name, input.parameters.clone());
        let task = TaskDescriptor {
            task_id: job_id,
            title: input.tool_name.clone(),
            priority: parse_priority(&input.priority),
            estimated_hours: None,
            dependency_ids: Vec::new(),
            memory_mb: 1,
            cpu_weight: 1,
            batch_id: None,
            operation: OperationClass::TaskExecution,
            complexity: Complexity::Simple,
        };
        self.adapter.execute_job(job_id, task, work);

        Ok(CallToolResult::success(vec![Content::text(
            serde_json::json!({ "jobId": job_id }).to_string(),
        )]))
    }

    #[tool(
        name = "get_job_result",
        description = "Rate-limited read of a job's current status and, once terminal, its result.

PARAMETERS:
- job_id (string, required): identifier returned by submit_job.

BEHAVIOR:
- Returns pollInterval hinting how long to wait before polling again.
- When the caller is polling faster than the adaptive backoff allows, returns shouldWait=true with pollInterval set to the remaining wait and no job body.
- When the job is terminal, pollInterval is 0 and result is populated.

RETURNS:
- status, progress, pollInterval, shouldWait, job (status/progress/message/result) when available."
    )]
    async fn get_job_result(
        &self,
        Parameters(input): Parameters<JobIdInput>,
    ) -> Result<CallToolResult, McpError> {
        let job_id = job_id_from_str(&input.job_id)?;
        let read = self
            .registry
            .get_job_with_rate_limit(job_id, true)
            .ok_or_else(|| McpError::invalid_params("job not found", None::<serde_json::Value>))?;

        let body = if read.should_wait {
            serde_json::json!({
                "shouldWait": true,
                "pollInterval": read.wait_ms,
            })
        } else {
            let job = read.job.expect("job present when not should_wait");
            serde_json::json!({
                "shouldWait": false,
                "pollInterval": if job.status.is_terminal() { 0 } else { crate::job::status_poll_hint(job.status) },
                "job": job_to_json(&job),
            })
        };

        Ok(CallToolResult::success(vec![Content::text(body.to_string())]))
    }

    #[tool(
        name = "cancel_job",
        description = "Cancel a running job.

PARAMETERS:
- job_id (string, required): identifier returned by submit_job.
- reason (string, default: \"cancelled by caller\"): recorded as the job's failure message.

BEHAVIOR:
- Only RUNNING jobs can be cancelled; PENDING or terminal jobs return ok=false.
- Cancellation is cooperative: the job's work function observes it via its cancel token.

RETURNS:
- ok: whether cancellation was accepted."
    )]
    async fn cancel_job(
        &self,
        Parameters(input): Parameters<CancelJobInput>,
    ) -> Result<CallToolResult, McpError> {
        let job_id = job_id_from_str(&input.job_id)?;
        let ok = self.registry.cancel_job(job_id, &input.reason).await;
        Ok(CallToolResult::success(vec![Content::text(
            serde_json::json!({ "ok": ok }).to_string(),
        )]))
    }

    #[tool(
        name = "list_jobs",
        description = "List jobs tracked by the registry, most recently created first.

PARAMETERS:
- max_jobs (number, default: 50): maximum number of jobs to return.

RETURNS: a JSON array of {jobId, status, progress, message}."
    )]
    async fn list_jobs(
        &self,
        Parameters(input): Parameters<ListJobsInput>,
    ) -> Result<CallToolResult, McpError> {
        let jobs: Vec<serde_json::Value> = self
            .registry
            .list_jobs(input.max_jobs)
            .iter()
            .map(job_to_json)
            .collect();
        Ok(CallToolResult::success(vec![Content::text(
            serde_json::to_string_pretty(&jobs).unwrap(),
        )]))
    }

    #[tool(
        name = "get_stats",
        description = "Diagnostic snapshot of the job registry and scheduler.

RETURNS:
- jobs: {pending, running, completed, failed, oldestAgeMs, averageAgeMs}
- scheduler: {runningCount, maxConcurrentJobs}
- alerts: any unresolved performance threshold alerts."
    )]
    async fn get_stats(&self) -> Result<CallToolResult, McpError> {
        let stats = self.registry.get_stats();
        let body = serde_json::json!({
            "jobs": stats_json(&stats),
            "scheduler": {
                "runningCount": self.scheduler.running_count(),
                "maxConcurrentJobs": self.config.scheduler.max_concurrent_jobs,
            },
            "alerts": self.monitor.alerts(),
        });
        Ok(CallToolResult::success(vec![Content::text(body.to_string())]))
    }

    #[tool(
        name = "search_files",
        description = "Search a directory tree for files matching a pattern, ranked by relevance.

PARAMETERS:
- root (string, required): directory to search from.
- pattern (string, required): pattern to match, interpreted per strategy.
- strategy (string, default: \"fuzzy\"): one of \"fuzzy\", \"exact\", \"glob\", \"regex\", \"content\".
- max_results (number, default: 100): maximum number of ranked matches to return.

BEHAVIOR:
- Runs synchronously (unlike submit_job's async jobs) since searches are typically interactive.
- Memory is bounded regardless of tree size via a top-K priority stream.

RETURNS: a JSON array of matches with path, score, match_type, and (for content strategy) line_numbers/preview."
    )]
    async fn search_files(
        &self,
        Parameters(input): Parameters<SearchFilesInput>,
    ) -> Result<CallToolResult, McpError> {
        let mut options = SearchOptions::from_config(input.pattern, &self.config.search);
        if let Some(strategy) = input.strategy.as_deref() {
            options.strategy = parse_strategy(strategy);
        }
        if let Some(max_results) = input.max_results {
            options.max_results = max_results;
        }

        let matches = self
            .search_engine
            .search(&PathBuf::from(input.root), &options)
            .await
            .map_err(|e| McpError::internal_error(format!("search failed: {e}"), None))?;

        Ok(CallToolResult::success(vec![Content::text(
            serde_json::to_string_pretty(&matches).unwrap(),
        )]))
    }
}

fn stats_json(stats: &crate::job::JobStats) -> serde_json::Value {
    serde_json::json!({
        "pending": stats.pending,
        "running": stats.running,
        "completed": stats.completed,
        "failed": stats.failed,
        "oldestAgeMs": stats.oldest_age_ms,
        "averageAgeMs": stats.average_age_ms,
    })
}

#[tool_handler(router = self.tool_router)]
impl rmcp::ServerHandler for TaskRunnerServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = "Task Orchestration Runtime - job submission, scheduling, and file search over MCP.\n\
            \n\
            TOOLS:\n\
            \n\
            1. submit_job - Submit a unit of work (tool_name + parameters) for scheduled, cancellable execution.\n\
            2. get_job_result - Rate-limited poll for a job's status/result; honors an adaptive backoff hint.\n\
            3. cancel_job - Cooperatively cancel a RUNNING job.\n\
            4. list_jobs / get_stats - Aggregate diagnostics over the job registry and scheduler.\n\
            5. search_files - Streaming, memory-bounded fuzzy/exact/glob/regex/content file search.\n\
            \n\
            Jobs with identical tool_name + parameters dedupe onto the same job id.\n\
            Poll get_job_result using the returned pollInterval; faster polling is throttled automatically.".to_string();

        ServerInfo {
            instructions: Some(instructions),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
