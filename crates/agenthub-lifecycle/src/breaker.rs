use std::collections::VecDeque;

use serde::Serialize;
use tracing::{info, warn};

use agenthub_core::constants::{
    BREAKER_ERROR_RATE_PERCENT, BREAKER_HALF_OPEN_SAMPLES, BREAKER_HARD_STOP_RATE_PERCENT,
    BREAKER_LATENCY_SLO_PERCENT, BREAKER_MAX_WINDOW, BREAKER_MIN_SAMPLES, BREAKER_MIN_WINDOW,
};

/// One terminal delegation observation.
#[derive(Clone, Copy, Debug)]
pub struct Sample {
    pub success: bool,
    pub hard_stop: bool,
    pub latency_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::HalfOpen => "half_open",
            BreakerState::Open => "open",
        }
    }
}

/// Window metrics for the SLO dashboard.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct BreakerMetrics {
    pub sample_count: usize,
    pub success_rate: f64,
    pub error_rate: f64,
    pub hard_stop_rate: f64,
    pub p95_latency_ms: u64,
}

/// Error-budget and latency circuit breaker over a sliding window of the
/// most recent delegation samples.
///
/// - `open` when error rate ≥ 30%, hard-stop rate ≥ 20%, or p95 latency
///   exceeds 1.5× the SLO — once at least 10 samples exist;
/// - `half_open` when previously open and the 5 most recent window samples
///   are all successes (the recent window is the sample source, not a
///   separate post-open counter — frozen contract);
/// - `closed` again on the next successful sample after `half_open`, or via
///   operator reset.
pub struct Breaker {
    window: VecDeque<Sample>,
    window_size: usize,
    latency_slo_ms: u64,
    state: BreakerState,
}

impl Breaker {
    pub fn new(window_size: usize, latency_slo_ms: u64) -> Self {
        Self {
            window: VecDeque::new(),
            window_size: window_size.clamp(BREAKER_MIN_WINDOW, BREAKER_MAX_WINDOW),
            latency_slo_ms,
            state: BreakerState::Closed,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Whether `POST /v1/delegations` may admit new work.
    pub fn allow_new_work(&self) -> bool {
        self.state != BreakerState::Open
    }

    pub fn latency_slo_ms(&self) -> u64 {
        self.latency_slo_ms
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Record a terminal delegation and advance the state machine.
    pub fn record(&mut self, sample: Sample) {
        self.window.push_back(sample);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        let previous = self.state;
        self.state = match self.state {
            BreakerState::Closed => {
                if self.violates_slo() {
                    BreakerState::Open
                } else {
                    BreakerState::Closed
                }
            }
            BreakerState::Open => {
                if self.recent_all_success(BREAKER_HALF_OPEN_SAMPLES) {
                    BreakerState::HalfOpen
                } else {
                    BreakerState::Open
                }
            }
            BreakerState::HalfOpen => {
                if sample.success {
                    BreakerState::Closed
                } else {
                    BreakerState::Open
                }
            }
        };

        if self.state != previous {
            match self.state {
                BreakerState::Open => warn!(
                    metrics = ?self.metrics(None),
                    "circuit breaker opened; rejecting new delegations"
                ),
                state => info!(state = state.as_str(), "circuit breaker state change"),
            }
        }
    }

    /// Rebuild the window from persisted history (startup). The store, not
    /// process memory, is the source of truth for reliability state.
    pub fn seed(&mut self, samples: impl IntoIterator<Item = Sample>) {
        for sample in samples {
            self.record(sample);
        }
    }

    /// Operator action: drop back to `closed` without touching the window.
    pub fn operator_reset(&mut self) {
        info!("circuit breaker reset by operator");
        self.state = BreakerState::Closed;
    }

    /// Metrics over the most recent `window_size` samples (dashboard
    /// override) or the configured window.
    pub fn metrics(&self, window_size: Option<usize>) -> BreakerMetrics {
        let size = window_size
            .unwrap_or(self.window_size)
            .clamp(BREAKER_MIN_WINDOW, BREAKER_MAX_WINDOW);
        let samples: Vec<&Sample> = self
            .window
            .iter()
            .rev()
            .take(size)
            .collect();
        let n = samples.len();
        if n == 0 {
            return BreakerMetrics {
                sample_count: 0,
                success_rate: 1.0,
                error_rate: 0.0,
                hard_stop_rate: 0.0,
                p95_latency_ms: 0,
            };
        }
        let successes = samples.iter().filter(|s| s.success).count();
        let hard_stops = samples.iter().filter(|s| s.hard_stop).count();
        let mut latencies: Vec<u64> = samples.iter().map(|s| s.latency_ms).collect();
        latencies.sort_unstable();
        let p95_idx = ((n as f64 * 0.95).ceil() as usize).saturating_sub(1);
        BreakerMetrics {
            sample_count: n,
            success_rate: successes as f64 / n as f64,
            error_rate: (n - successes) as f64 / n as f64,
            hard_stop_rate: hard_stops as f64 / n as f64,
            p95_latency_ms: latencies[p95_idx.min(n - 1)],
        }
    }

    fn violates_slo(&self) -> bool {
        if self.window.len() < BREAKER_MIN_SAMPLES {
            return false;
        }
        let m = self.metrics(None);
        let error_violation = m.error_rate * 100.0 >= BREAKER_ERROR_RATE_PERCENT as f64;
        let hard_stop_violation =
            m.hard_stop_rate * 100.0 >= BREAKER_HARD_STOP_RATE_PERCENT as f64;
        let latency_violation =
            m.p95_latency_ms * 100 > self.latency_slo_ms * BREAKER_LATENCY_SLO_PERCENT;
        error_violation || hard_stop_violation || latency_violation
    }

    fn recent_all_success(&self, n: usize) -> bool {
        self.window.len() >= n && self.window.iter().rev().take(n).all(|s| s.success)
    }
}
