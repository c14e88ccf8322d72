//! Performance Monitor (C10): per-operation timings, threshold alerts, and
//! rolling-average bottleneck/regression detection.

use crate::clock::Clock;
use crate::search::{SearchMetricsEvent, SearchMetricsSink};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    ResponseTime,
    MemoryUsage,
    CpuUsage,
    DiskIo,
    CacheHitRate,
    TaskThroughput,
    ErrorRate,
    AgentPerformance,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricPoint {
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: &'static str,
    pub tags: std::collections::BTreeMap<String, String>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub metric_type: MetricType,
    pub severity: AlertSeverity,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckSeverity {
    Medium,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bottleneck {
    pub metric_type: MetricType,
    pub severity: BottleneckSeverity,
    pub rolling_average: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Regression {
    pub metric_type: MetricType,
    pub baseline_average: f64,
    pub recent_average: f64,
    pub degradation_pct: f64,
}

struct OperationSpan {
    started_at: u64,
}

const HISTORY_LEN: usize = 256;

struct MetricHistory {
    samples: VecDeque<f64>,
    thresholds: Option<Thresholds>,
    last_unresolved_alert: Option<AlertSeverity>,
}

impl MetricHistory {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(HISTORY_LEN),
            thresholds: None,
            last_unresolved_alert: None,
        }
    }

    fn push(&mut self, value: f64) {
        if self.samples.len() == HISTORY_LEN {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn rolling_average(&self, window: usize) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let window = window.min(self.samples.len());
        let sum: f64 = self.samples.iter().rev().take(window).sum();
        Some(sum / window as f64)
    }
}

/// Records per-operation timings and derived metric points, raises threshold
/// alerts, and flags bottlenecks/regressions from rolling averages.
pub struct PerformanceMonitor {
    clock: Arc<dyn Clock>,
    spans: DashMap<String, OperationSpan>,
    history: DashMap<MetricType, Mutex<MetricHistory>>,
    alerts: Mutex<Vec<Alert>>,
}

impl PerformanceMonitor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            spans: DashMap::new(),
            history: DashMap::new(),
            alerts: Mutex::new(Vec::new()),
        }
    }

    pub fn set_thresholds(&self, metric_type: MetricType, thresholds: Thresholds) {
        self.history
            .entry(metric_type)
            .or_insert_with(|| Mutex::new(MetricHistory::new()))
            .lock()
            .unwrap()
            .thresholds = Some(thresholds);
    }

    pub fn start_operation(&self, id: impl Into<String>) {
        self.spans.insert(
            id.into(),
            OperationSpan {
                started_at: self.clock.now_ms(),
            },
        );
    }

    /// Returns the elapsed duration if `id` was started; records a
    /// `response_time` metric point and returns it alongside.
    pub fn end_operation(&self, id: &str) -> Option<u64> {
        let (_, span) = self.spans.remove(id)?;
        let duration_ms = self.clock.now_ms().saturating_sub(span.started_at);
        self.record(MetricType::ResponseTime, duration_ms as f64, "ms");
        Some(duration_ms)
    }

    /// Records a metric point, evaluates thresholds, and appends to the
    /// rolling-average history for that metric type.
    pub fn record(&self, metric_type: MetricType, value: f64, _unit: &'static str) {
        let history_lock = self
            .history
            .entry(metric_type)
            .or_insert_with(|| Mutex::new(MetricHistory::new()));
        let mut history = history_lock.lock().unwrap();
        history.push(value);

        if let Some(thresholds) = history.thresholds {
            let severity = if value >= thresholds.critical {
                Some(AlertSeverity::Critical)
            } else if value >= thresholds.warning {
                Some(AlertSeverity::Warning)
            } else {
                None
            };

            match severity {
                Some(severity) if history.last_unresolved_alert != Some(severity) => {
                    history.last_unresolved_alert = Some(severity);
                    drop(history);
                    self.alerts.lock().unwrap().push(Alert {
                        metric_type,
                        severity,
                        value,
                        threshold: if severity == AlertSeverity::Critical {
                            thresholds.critical
                        } else {
                            thresholds.warning
                        },
                        timestamp: self.clock.now_ms(),
                    });
                }
                None => history.last_unresolved_alert = None,
                _ => {}
            }
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    /// Rolling averages within 10% of critical are flagged critical; within
    /// 10% of warning, medium.
    pub fn bottlenecks(&self, window: usize) -> Vec<Bottleneck> {
        let mut out = Vec::new();
        for entry in self.history.iter() {
            let history = entry.value().lock().unwrap();
            let Some(thresholds) = history.thresholds else {
                continue;
            };
            let Some(avg) = history.rolling_average(window) else {
                continue;
            };

            if avg >= thresholds.critical * 0.9 {
                out.push(Bottleneck {
                    metric_type: *entry.key(),
                    severity: BottleneckSeverity::Critical,
                    rolling_average: avg,
                });
            } else if avg >= thresholds.warning * 0.9 {
                out.push(Bottleneck {
                    metric_type: *entry.key(),
                    severity: BottleneckSeverity::Medium,
                    rolling_average: avg,
                });
            }
        }
        out
    }

    /// Compares a recent window average to a baseline window; a degradation
    /// above `threshold_pct` emits a regression record.
    pub fn regressions(&self, baseline_window: usize, recent_window: usize, threshold_pct: f64) -> Vec<Regression> {
        let mut out = Vec::new();
        for entry in self.history.iter() {
            let history = entry.value().lock().unwrap();
            if history.samples.len() < baseline_window + recent_window {
                continue;
            }

            let total = history.samples.len();
            let baseline: f64 = history
                .samples
                .iter()
                .skip(total - baseline_window - recent_window)
                .take(baseline_window)
                .sum::<f64>()
                / baseline_window as f64;
            let recent = history.rolling_average(recent_window).unwrap_or(0.0);

            if baseline <= 0.0 {
                continue;
            }
            let degradation_pct = (recent - baseline) / baseline * 100.0;
            if degradation_pct >= threshold_pct {
                out.push(Regression {
                    metric_type: *entry.key(),
                    baseline_average: baseline,
                    recent_average: recent,
                    degradation_pct,
                });
            }
        }
        out
    }
}

impl SearchMetricsSink for PerformanceMonitor {
    fn record(&self, event: SearchMetricsEvent) {
        self.record(MetricType::ResponseTime, event.duration_ms as f64, "ms");
        self.record(MetricType::TaskThroughput, event.files_scanned as f64, "files");
        self.record(
            MetricType::CacheHitRate,
            if event.cache_hit { 1.0 } else { 0.0 },
            "ratio",
        );
        let _ = event.results;
        let _ = event.strategy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn end_operation_without_start_returns_none() {
        let monitor = PerformanceMonitor::new(FakeClock::new());
        assert!(monitor.end_operation("ghost").is_none());
    }

    #[test]
    fn end_operation_measures_elapsed_time() {
        let clock = FakeClock::new();
        let monitor = PerformanceMonitor::new(clock.clone());
        monitor.start_operation("op1");
        clock.advance(42);
        assert_eq!(monitor.end_operation("op1"), Some(42));
    }

    #[test]
    fn threshold_crossing_raises_one_alert_until_it_clears() {
        let monitor = PerformanceMonitor::new(FakeClock::new());
        monitor.set_thresholds(
            MetricType::ResponseTime,
            Thresholds {
                warning: 100.0,
                critical: 500.0,
            },
        );

        monitor.record(MetricType::ResponseTime, 150.0, "ms");
        monitor.record(MetricType::ResponseTime, 160.0, "ms");
        assert_eq!(monitor.alerts().len(), 1);

        monitor.record(MetricType::ResponseTime, 600.0, "ms");
        assert_eq!(monitor.alerts().len(), 2);
    }

    #[test]
    fn bottleneck_flagged_when_rolling_average_nears_critical() {
        let monitor = PerformanceMonitor::new(FakeClock::new());
        monitor.set_thresholds(
            MetricType::CpuUsage,
            Thresholds {
                warning: 50.0,
                critical: 90.0,
            },
        );
        for _ in 0..5 {
            monitor.record(MetricType::CpuUsage, 85.0, "pct");
        }

        let bottlenecks = monitor.bottlenecks(5);
        assert_eq!(bottlenecks.len(), 1);
        assert_eq!(bottlenecks[0].severity, BottleneckSeverity::Critical);
    }

    #[test]
    fn regression_detected_on_window_degradation() {
        let monitor = PerformanceMonitor::new(FakeClock::new());
        for _ in 0..5 {
            monitor.record(MetricType::ResponseTime, 100.0, "ms");
        }
        for _ in 0..5 {
            monitor.record(MetricType::ResponseTime, 200.0, "ms");
        }

        let regressions = monitor.regressions(5, 5, 20.0);
        assert_eq!(regressions.len(), 1);
        assert!(regressions[0].degradation_pct >= 20.0);
    }
}
