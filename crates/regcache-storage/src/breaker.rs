//! Circuit breaker guarding remote-tier traffic

use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use regcache_core::{BreakerConfig, BreakerState, BreakerStatus, CacheError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: State,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    /// Manual open masks all automatic transitions until force_close
    forced_open: bool,
}

/// Failure isolator with CLOSED / OPEN / HALF_OPEN states.
///
/// Cloning creates a new handle to the SAME breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<RwLock<Inner>>,
    failure_threshold: u32,
    open_timeout: Duration,
    success_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                state: State::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
                forced_open: false,
            })),
            failure_threshold: config.failure_threshold.max(1),
            open_timeout: Duration::from_millis(config.open_timeout_ms),
            success_threshold: config.success_threshold.max(1),
        }
    }

    /// Whether a request may proceed.
    ///
    /// When the breaker is OPEN and the open timeout has elapsed this
    /// admits the probe and moves to HALF_OPEN; no other mutation.
    pub fn allows_request(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.forced_open {
            return false;
        }
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let elapsed = inner.last_failure.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.open_timeout {
                    inner.state = State::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub fn on_success(&self) {
        let mut inner = self.inner.write();
        if inner.forced_open {
            return;
        }
        match inner.state {
            State::Closed => {
                inner.failure_count = 0;
            }
            State::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    inner.state = State::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    tracing::info!("circuit breaker closed after successful probes");
                }
            }
            State::Open => {}
        }
    }

    /// Record a failed call
    pub fn on_failure(&self) {
        let mut inner = self.inner.write();
        if inner.forced_open {
            return;
        }
        match inner.state {
            State::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = State::Open;
                    inner.last_failure = Some(Instant::now());
                    tracing::warn!(
                        failures = inner.failure_count,
                        "circuit breaker opened"
                    );
                } else {
                    inner.last_failure = Some(Instant::now());
                }
            }
            State::HalfOpen => {
                inner.state = State::Open;
                inner.success_count = 0;
                inner.last_failure = Some(Instant::now());
                tracing::warn!("circuit breaker reopened after failed probe");
            }
            State::Open => {
                inner.last_failure = Some(Instant::now());
            }
        }
    }

    /// Run `op`, recording success/failure.
    ///
    /// Denied requests fail with [`CacheError::CircuitOpen`] without
    /// touching failure accounting.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.allows_request() {
            return Err(CacheError::CircuitOpen("remote".to_string()));
        }
        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                if e.is_breaker_failure() {
                    self.on_failure();
                }
                Err(e)
            }
        }
    }

    /// Run `op` when admitted; otherwise, or when `op` fails, run
    /// `fallback`. If the fallback also fails, the original error
    /// propagates.
    pub async fn execute_with_fallback<T, F, Fut, FB, FbFut>(&self, op: F, fallback: FB) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = Result<T>>,
    {
        if !self.allows_request() {
            let original = CacheError::CircuitOpen("remote".to_string());
            return match fallback().await {
                Ok(value) => Ok(value),
                Err(_) => Err(original),
            };
        }
        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(original) => {
                if original.is_breaker_failure() {
                    self.on_failure();
                }
                match fallback().await {
                    Ok(value) => Ok(value),
                    Err(_) => Err(original),
                }
            }
        }
    }

    /// Manually open the breaker; masks all state until [`Self::force_close`]
    pub fn force_open(&self) {
        let mut inner = self.inner.write();
        inner.forced_open = true;
        inner.state = State::Open;
        inner.last_failure = Some(Instant::now());
    }

    /// Clear a manual open and reset to CLOSED
    pub fn force_close(&self) {
        let mut inner = self.inner.write();
        inner.forced_open = false;
        inner.state = State::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
    }

    /// Reset all counters and state
    pub fn reset(&self) {
        self.force_close();
    }

    /// Point-in-time snapshot
    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.read();
        let state = if inner.forced_open {
            BreakerState::Open
        } else {
            match inner.state {
                State::Closed => BreakerState::Closed,
                State::Open => BreakerState::Open,
                State::HalfOpen => BreakerState::HalfOpen,
            }
        };
        let is_request_allowed = match state {
            BreakerState::Closed | BreakerState::HalfOpen => !inner.forced_open,
            BreakerState::Open => {
                !inner.forced_open
                    && inner
                        .last_failure
                        .map(|t| t.elapsed() >= self.open_timeout)
                        .unwrap_or(false)
            }
        };
        BreakerStatus {
            state,
            failure_count: inner.failure_count,
            is_request_allowed,
            seconds_since_failure: inner.last_failure.map(|t| t.elapsed().as_secs()),
        }
    }
}
