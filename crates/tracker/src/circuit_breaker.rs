//! Refresh-loop circuit breaker.
//!
//! Counts attempts in a rolling window. Once the threshold is exceeded the
//! breaker stays open until `reset()`; it never half-opens on its own.

use ordinal_core::{BreakerConfig, DiagnosticsSink};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Receives the one-time warning shown when the breaker trips.
pub trait UserNotifier: Send + Sync {
    fn warn_user(&self, message: &str);
}

/// Routes user warnings into the diagnostics sink.
pub struct SinkNotifier {
    sink: Arc<dyn DiagnosticsSink>,
}

impl SinkNotifier {
    pub fn new(sink: Arc<dyn DiagnosticsSink>) -> Arc<Self> {
        Arc::new(Self { sink })
    }
}

impl UserNotifier for SinkNotifier {
    fn warn_user(&self, message: &str) {
        self.sink.error(message, None);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerStatus {
    pub attempts: u32,
    pub is_open: bool,
}

#[derive(Debug)]
struct BreakerState {
    attempts: u32,
    window_start: Instant,
    open: bool,
}

pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    reset_window: Duration,
    state: Mutex<BreakerState>,
    notifier: Arc<dyn UserNotifier>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        threshold: u32,
        reset_window: Duration,
        notifier: Arc<dyn UserNotifier>,
    ) -> Self {
        Self {
            name: name.into(),
            threshold,
            reset_window,
            state: Mutex::new(BreakerState {
                attempts: 0,
                window_start: Instant::now(),
                open: false,
            }),
            notifier,
        }
    }

    pub fn from_config(
        name: impl Into<String>,
        config: &BreakerConfig,
        notifier: Arc<dyn UserNotifier>,
    ) -> Self {
        Self::new(name, config.threshold, config.reset_window(), notifier)
    }

    fn state(&self) -> MutexGuard<'_, BreakerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an attempt and report whether it may run.
    pub fn can_proceed(&self) -> bool {
        let tripped = {
            let mut state = self.state();
            if state.open {
                return false;
            }

            let now = Instant::now();
            if now.duration_since(state.window_start) > self.reset_window {
                state.attempts = 0;
                state.window_start = now;
            }

            state.attempts += 1;
            if state.attempts <= self.threshold {
                return true;
            }
            state.open = true;
            state.attempts
        };

        tracing::error!(
            breaker = %self.name,
            attempts = tripped,
            window_secs = self.reset_window.as_secs(),
            "Circuit breaker opened"
        );
        self.notifier.warn_user(&format!(
            "{} is refreshing too often and has been paused. Reload to resume.",
            self.name
        ));
        false
    }

    /// Close the breaker and start a fresh window.
    pub fn reset(&self) {
        let mut state = self.state();
        let was_open = state.open;
        state.attempts = 0;
        state.window_start = Instant::now();
        state.open = false;
        drop(state);

        if was_open {
            tracing::info!(breaker = %self.name, "Circuit breaker reset");
        }
    }

    pub fn status(&self) -> BreakerStatus {
        let state = self.state();
        BreakerStatus {
            attempts: state.attempts,
            is_open: state.open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("threshold", &self.threshold)
            .field("attempts", &status.attempts)
            .field("is_open", &status.is_open)
            .finish()
    }
}
