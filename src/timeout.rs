//! Timeout Registry (C5): per-operation-class timeout/retry policy lookup with
//! complexity multipliers, plus a `run_with_timeout` helper that retries
//! transient failures according to the resulting policy.

use crate::config::{RetryConfig, TimeoutConfig};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    TaskExecution,
    TaskDecomposition,
    RecursiveTaskDecomposition,
    TaskRefinement,
    AgentCommunication,
    LlmRequest,
    FileOperations,
    DatabaseOperations,
    NetworkOperations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    Critical,
}

impl Complexity {
    fn multiplier(self) -> f64 {
        match self {
            Complexity::Simple => 1.0,
            Complexity::Moderate => 1.5,
            Complexity::Complex => 2.0,
            Complexity::Critical => 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential: bool,
}

#[derive(Debug)]
pub struct TimeoutRegistry {
    timeouts: TimeoutConfig,
    retry: RetryConfig,
}

impl TimeoutRegistry {
    pub fn new(timeouts: TimeoutConfig, retry: RetryConfig) -> Self {
        Self { timeouts, retry }
    }

    /// Base timeout for an operation class, falling back to a hardcoded default
    /// (the same values as `TimeoutConfig::default()`) if the registry was ever
    /// constructed from a partially-populated config.
    pub fn timeout(&self, op: OperationClass) -> Duration {
        let ms = match op {
            OperationClass::TaskExecution => self.timeouts.task_execution_ms,
            OperationClass::TaskDecomposition => self.timeouts.task_decomposition_ms,
            OperationClass::RecursiveTaskDecomposition => {
                self.timeouts.recursive_task_decomposition_ms
            }
            OperationClass::TaskRefinement => self.timeouts.task_refinement_ms,
            OperationClass::AgentCommunication => self.timeouts.agent_communication_ms,
            OperationClass::LlmRequest => self.timeouts.llm_request_ms,
            OperationClass::FileOperations => self.timeouts.file_operations_ms,
            OperationClass::DatabaseOperations => self.timeouts.database_operations_ms,
            OperationClass::NetworkOperations => self.timeouts.network_operations_ms,
        };
        Duration::from_millis(ms.max(1))
    }

    /// Complexity- and (for `task_execution`) estimated-hours-adjusted timeout.
    pub fn complexity_adjusted(
        &self,
        op: OperationClass,
        complexity: Complexity,
        estimated_hours: Option<f64>,
    ) -> Duration {
        let base = self.timeout(op).as_millis() as f64;
        let mut adjusted = base * complexity.multiplier();

        if op == OperationClass::TaskExecution {
            if let Some(hours) = estimated_hours {
                adjusted *= (hours / 2.0).max(1.0);
            }
            adjusted = adjusted.min(Duration::from_secs(4 * 3600).as_millis() as f64);
        } else {
            adjusted = adjusted.min(base * 5.0);
        }

        Duration::from_millis(adjusted.round() as u64)
    }

    /// Retry policy for a given complexity, clamped to the caps in §4.5.
    pub fn retry_policy(&self, complexity: Complexity) -> RetryPolicy {
        let complexity_bump = match complexity {
            Complexity::Simple => 0,
            Complexity::Moderate => 1,
            Complexity::Complex => 2,
            Complexity::Critical => 3,
        };

        let max_retries = (self.retry.max_retries + complexity_bump).min(10);
        let backoff_multiplier = self.retry.backoff_multiplier.max(1.2);
        let initial_delay = Duration::from_millis(self.retry.initial_delay_ms);
        let max_delay = Duration::from_millis(self.retry.max_delay_ms).min(Duration::from_secs(120));

        RetryPolicy {
            max_retries,
            backoff_multiplier,
            initial_delay,
            max_delay,
            exponential: self.retry.exponential,
        }
    }

    /// Runs `make_attempt` under `timeout(op)`, retrying according to
    /// `retry_policy(complexity)` on timeout or failure.
    pub async fn run_with_timeout<F, Fut, T, E>(
        &self,
        op: OperationClass,
        complexity: Complexity,
        mut make_attempt: F,
    ) -> RunOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let base_timeout = self.timeout(op);
        let policy = self.retry_policy(complexity);

        let mut delay = policy.initial_delay;
        let mut retry_count = 0;
        let start = tokio::time::Instant::now();

        loop {
            let attempt = tokio::time::timeout(base_timeout, make_attempt()).await;

            match attempt {
                Ok(Ok(value)) => {
                    return RunOutcome {
                        success: true,
                        data: Some(value),
                        error: None,
                        timed_out: false,
                        duration_ms: start.elapsed().as_millis() as u64,
                        retry_count,
                    };
                }
                Ok(Err(err)) => {
                    if retry_count >= policy.max_retries {
                        return RunOutcome {
                            success: false,
                            data: None,
                            error: Some(err),
                            timed_out: false,
                            duration_ms: start.elapsed().as_millis() as u64,
                            retry_count,
                        };
                    }
                }
                Err(_elapsed) => {
                    if retry_count >= policy.max_retries {
                        return RunOutcome {
                            success: false,
                            data: None,
                            error: None,
                            timed_out: true,
                            duration_ms: start.elapsed().as_millis() as u64,
                            retry_count,
                        };
                    }
                }
            }

            retry_count += 1;
            tokio::time::sleep(delay).await;
            if policy.exponential {
                let next = delay.mul_f64(policy.backoff_multiplier);
                delay = next.min(policy.max_delay);
            }
        }
    }
}

#[derive(Debug)]
pub struct RunOutcome<T, E> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<E>,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, TimeoutConfig};

    fn registry() -> TimeoutRegistry {
        TimeoutRegistry::new(TimeoutConfig::default(), RetryConfig::default())
    }

    #[test]
    fn task_execution_scales_with_estimated_hours_and_caps_at_four_hours() {
        let r = registry();
        let adjusted =
            r.complexity_adjusted(OperationClass::TaskExecution, Complexity::Critical, Some(20.0));
        assert_eq!(adjusted, Duration::from_secs(4 * 3600));
    }

    #[test]
    fn non_execution_ops_cap_at_five_times_base() {
        let r = registry();
        let base = r.timeout(OperationClass::LlmRequest);
        let adjusted = r.complexity_adjusted(OperationClass::LlmRequest, Complexity::Critical, None);
        assert!(adjusted <= base * 5);
    }

    #[test]
    fn retry_policy_respects_caps() {
        let r = registry();
        let policy = r.retry_policy(Complexity::Critical);
        assert!(policy.max_retries <= 10);
        assert!(policy.backoff_multiplier >= 1.2);
        assert!(policy.max_delay <= Duration::from_secs(120));
    }

    #[tokio::test]
    async fn run_with_timeout_retries_then_succeeds() {
        let mut retry = RetryConfig::default();
        retry.initial_delay_ms = 1;
        retry.max_delay_ms = 5;
        let r = TimeoutRegistry::new(TimeoutConfig::default(), retry);
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let outcome = r
            .run_with_timeout(OperationClass::FileOperations, Complexity::Simple, || {
                let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    if n < 1 {
                        Err::<u32, &str>("transient")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.data, Some(42));
        assert_eq!(outcome.retry_count, 1);
    }
}
