use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use crate::classifier::ErrorType;
use crate::request::ExecutionOutcome;

pub const DEFAULT_WINDOW_SIZE: usize = 100;

/// Fixed-capacity window of recent samples with a running sum.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    sum: f64,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= evicted;
            }
        }
        self.samples.push_back(value);
        self.sum += value;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum / self.samples.len() as f64
        }
    }

    pub fn summary(&self) -> DistributionSummary {
        if self.samples.is_empty() {
            return DistributionSummary::default();
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        DistributionSummary {
            count: sorted.len(),
            mean: self.mean(),
            median: nearest_rank(&sorted, 50.0),
            p95: nearest_rank(&sorted, 95.0),
            p99: nearest_rank(&sorted, 99.0),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        }
    }
}

/// Nearest-rank percentile over an ascending, non-empty slice.
fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DistributionSummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateSummary {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub timeouts: u64,
    /// Extra attempts beyond the first, summed over all requests
    pub retries: u64,
    pub success_rate: f64,
    pub errors_by_type: BTreeMap<ErrorType, u64>,
    pub duration_ms: DistributionSummary,
    pub payload_size: DistributionSummary,
    pub last_updated: Option<DateTime<Utc>>,
}

struct AggregateState {
    total: u64,
    successful: u64,
    failed: u64,
    timeouts: u64,
    retries: u64,
    errors_by_type: BTreeMap<ErrorType, u64>,
    durations: RollingWindow,
    payload_sizes: RollingWindow,
    last_updated: Option<DateTime<Utc>>,
}

impl AggregateState {
    fn new(window: usize) -> Self {
        Self {
            total: 0,
            successful: 0,
            failed: 0,
            timeouts: 0,
            retries: 0,
            errors_by_type: BTreeMap::new(),
            durations: RollingWindow::new(window),
            payload_sizes: RollingWindow::new(window),
            last_updated: None,
        }
    }
}

/// Running statistics over final outcomes. Counters are exact; distributions
/// cover the most recent `window` outcomes only.
pub struct ResultAggregator {
    window: usize,
    state: Mutex<AggregateState>,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl ResultAggregator {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            state: Mutex::new(AggregateState::new(window)),
        }
    }

    pub fn record(&self, outcome: &ExecutionOutcome) {
        let mut state = self.state.lock();
        state.total += 1;
        if outcome.success {
            state.successful += 1;
        } else {
            state.failed += 1;
            let error_type = outcome.error_type().cloned().unwrap_or(ErrorType::UNKNOWN);
            *state.errors_by_type.entry(error_type).or_insert(0) += 1;
        }
        if outcome.timed_out {
            state.timeouts += 1;
        }
        state.retries += u64::from(outcome.attempt_count.saturating_sub(1));
        state.durations.push(outcome.duration_ms as f64);
        state.payload_sizes.push(outcome.payload_size() as f64);
        state.last_updated = Some(Utc::now());
    }

    pub fn summary(&self) -> AggregateSummary {
        let state = self.state.lock();
        AggregateSummary {
            total: state.total,
            successful: state.successful,
            failed: state.failed,
            timeouts: state.timeouts,
            retries: state.retries,
            success_rate: if state.total == 0 {
                0.0
            } else {
                state.successful as f64 / state.total as f64
            },
            errors_by_type: state.errors_by_type.clone(),
            duration_ms: state.durations.summary(),
            payload_size: state.payload_sizes.summary(),
            last_updated: state.last_updated,
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = AggregateState::new(self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorClassification;
    use crate::request::{ExecutionErrorInfo, ExecutionRequest};

    fn outcome(success: bool, duration_ms: u64, attempts: u32) -> ExecutionOutcome {
        let request = ExecutionRequest::new("x");
        let mut outcome = ExecutionOutcome::synthesized_failure(
            &request,
            ExecutionErrorInfo::new("Error", "boom"),
        );
        outcome.success = success;
        if success {
            outcome.error = None;
            outcome.value = Some(serde_json::json!("ok"));
        } else {
            outcome.classification = Some(ErrorClassification::fallback());
        }
        outcome.duration_ms = duration_ms;
        outcome.attempt_count = attempts;
        outcome
    }

    #[test]
    fn percentiles_use_nearest_rank() {
        let mut window = RollingWindow::new(100);
        for v in 1..=100 {
            window.push(v as f64);
        }
        let summary = window.summary();
        assert_eq!(summary.median, 50.0);
        assert_eq!(summary.p95, 95.0);
        assert_eq!(summary.p99, 99.0);
        assert_eq!(summary.mean, 50.5);
    }

    #[test]
    fn window_evicts_oldest_and_keeps_sum() {
        let mut window = RollingWindow::new(3);
        for v in [10.0, 20.0, 30.0, 40.0] {
            window.push(v);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.mean(), 30.0);
        assert_eq!(window.summary().min, 20.0);
    }

    #[test]
    fn counters_and_error_types() {
        let aggregator = ResultAggregator::new(10);
        aggregator.record(&outcome(true, 100, 1));
        aggregator.record(&outcome(false, 300, 2));
        let mut timed_out = outcome(false, 500, 2);
        timed_out.timed_out = true;
        aggregator.record(&timed_out);

        let summary = aggregator.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.timeouts, 1);
        assert_eq!(summary.retries, 2);
        assert_eq!(summary.errors_by_type[&ErrorType::UNKNOWN], 2);
        assert!((summary.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.duration_ms.median, 300.0);
        assert!(summary.last_updated.is_some());
    }

    #[test]
    fn history_stays_bounded() {
        let aggregator = ResultAggregator::new(5);
        for i in 0..50 {
            aggregator.record(&outcome(true, i, 1));
        }
        let summary = aggregator.summary();
        assert_eq!(summary.total, 50);
        assert_eq!(summary.duration_ms.count, 5);
        assert_eq!(summary.duration_ms.min, 45.0);

        aggregator.reset();
        assert_eq!(aggregator.summary(), AggregateSummary::default());
    }
}
