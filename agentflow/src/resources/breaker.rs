//! Per-resource-kind circuit breakers.
//!
//! The breaker guards the resource boundary, not the plugin boundary:
//! it wraps calls made through the container, refusing them outright while
//! the kind's circuit is open. State checks are the hot path and run
//! lock-free on atomics; transitions use compare-and-swap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use super::ResourceKind;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are refused without touching the resource.
    Open,
    /// One trial call is allowed through.
    HalfOpen,
}

impl CircuitState {
    /// Lowercase stable name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn to_int(self) -> u8 {
        match self {
            Self::Closed => STATE_CLOSED,
            Self::Open => STATE_OPEN,
            Self::HalfOpen => STATE_HALF_OPEN,
        }
    }

    fn from_int(v: u8) -> Self {
        match v {
            STATE_OPEN => Self::Open,
            STATE_HALF_OPEN => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker tuning per resource kind.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial call.
    pub recovery_timeout: Duration,
}

impl BreakerConfig {
    /// The default configuration for a resource kind.
    #[must_use]
    pub fn for_kind(kind: ResourceKind) -> Self {
        Self {
            failure_threshold: kind.failure_threshold(),
            recovery_timeout: Duration::from_secs(60),
        }
    }

    /// Overrides the recovery timeout.
    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Overrides the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }
}

/// Monotonic milliseconds since process-local epoch.
#[inline]
fn now_ms() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

/// A failure-counting guard for one resource kind.
///
/// CLOSED counts consecutive failures; at the threshold it opens. OPEN
/// refuses every acquisition until the recovery timeout elapses, then
/// transitions to HALF_OPEN where exactly one trial call may pass. The
/// trial's outcome decides: success closes the circuit, failure reopens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    last_state_change_ms: AtomicU64,
    probe_available: AtomicBool,
    config: BreakerConfig,
    label: String,
}

impl CircuitBreaker {
    /// Creates a breaker with a kind's default configuration.
    #[must_use]
    pub fn for_kind(kind: ResourceKind) -> Self {
        Self::with_config(BreakerConfig::for_kind(kind), kind.as_str())
    }

    /// Creates a breaker with explicit configuration and a log label.
    #[must_use]
    pub fn with_config(config: BreakerConfig, label: impl Into<String>) -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicU32::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            last_state_change_ms: AtomicU64::new(now_ms()),
            probe_available: AtomicBool::new(false),
            config,
            label: label.into(),
        }
    }

    /// The current state, transitioning OPEN to HALF_OPEN when the
    /// recovery timeout has elapsed.
    #[inline]
    pub fn state(&self) -> CircuitState {
        let current = CircuitState::from_int(self.state.load(Ordering::Acquire));
        if current != CircuitState::Open {
            return current;
        }

        let elapsed = now_ms().saturating_sub(self.last_state_change_ms.load(Ordering::Acquire));
        if elapsed < self.config.recovery_timeout.as_millis() as u64 {
            return CircuitState::Open;
        }

        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.last_state_change_ms.store(now_ms(), Ordering::Release);
            self.probe_available.store(true, Ordering::Release);
            info!(breaker = %self.label, "circuit transition: open -> half_open");
            return CircuitState::HalfOpen;
        }
        // Another thread raced the transition; re-read.
        CircuitState::from_int(self.state.load(Ordering::Acquire))
    }

    /// Whether a call may currently be attempted, without consuming the
    /// half-open trial slot.
    #[inline]
    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Acquires permission for one call. In HALF_OPEN only the first
    /// acquirer wins the trial slot; everyone else is refused until the
    /// trial's outcome is recorded.
    pub fn try_acquire(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self
                .probe_available
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Release);

        if CircuitState::from_int(self.state.load(Ordering::Acquire)) == CircuitState::HalfOpen {
            self.transition_to(CircuitState::Closed);
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        match CircuitState::from_int(self.state.load(Ordering::Acquire)) {
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => self.transition_to(CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    /// Forces the circuit open (used when a background health check fails).
    pub fn force_open(&self) {
        self.transition_to(CircuitState::Open);
    }

    /// Resets the circuit to closed and clears counters.
    pub fn reset(&self) {
        self.transition_to(CircuitState::Closed);
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// Consecutive failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Total recorded failures.
    #[must_use]
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Total recorded successes.
    #[must_use]
    pub fn total_successes(&self) -> u64 {
        self.total_successes.load(Ordering::Relaxed)
    }

    fn transition_to(&self, new_state: CircuitState) {
        let old = CircuitState::from_int(self.state.swap(new_state.to_int(), Ordering::AcqRel));
        if old == new_state {
            return;
        }

        self.last_state_change_ms.store(now_ms(), Ordering::Release);
        self.probe_available
            .store(new_state == CircuitState::HalfOpen, Ordering::Release);
        if new_state == CircuitState::Closed {
            self.consecutive_failures.store(0, Ordering::Release);
        }
        info!(breaker = %self.label, "circuit transition: {} -> {}", old, new_state);
    }
}

/// One breaker per resource kind.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: HashMap<ResourceKind, Arc<CircuitBreaker>>,
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerRegistry {
    /// Creates a registry with default per-kind configuration.
    #[must_use]
    pub fn new() -> Self {
        let breakers = ResourceKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::new(CircuitBreaker::for_kind(kind))))
            .collect();
        Self { breakers }
    }

    /// Replaces the breaker for one kind with a custom configuration.
    pub fn configure(&mut self, kind: ResourceKind, config: BreakerConfig) {
        self.breakers
            .insert(kind, Arc::new(CircuitBreaker::with_config(config, kind.as_str())));
    }

    /// The breaker guarding a kind.
    #[must_use]
    pub fn for_kind(&self, kind: ResourceKind) -> Arc<CircuitBreaker> {
        self.breakers
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::new(CircuitBreaker::for_kind(kind)))
    }
}
